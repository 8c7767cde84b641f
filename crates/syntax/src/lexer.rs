#![allow(non_camel_case_types)]

use beef::lean::Cow;
use logos::Logos;
use span::Span;

/// A single token. Tokens carry no text; the lexeme is a slice of the
/// source buffer, obtained through [`Lexer::lexeme`]. The buffer must
/// outlive every token produced from it.
#[derive(Clone, Copy, Debug)]
pub struct Token {
  pub kind: TokenKind,
  pub span: Span,
  pub line: u32,
}

impl Token {
  pub fn is(&self, kind: TokenKind) -> bool {
    self.kind == kind
  }
}

/// Serializable layout-scanner state.
///
/// Everything the indentation pass needs to resume mid-file lives here,
/// which is what an incremental reparser (such as an editor's grammar
/// adjunct) persists between edits.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScannerState {
  pub pending_dedents: u32,
  pub indent_stack: Vec<u32>,
  pub inside_table: u32,
  pub line: u32,
}

/// Streaming lexer with the indentation layout pass applied.
///
/// `Clone` is cheap-ish and intentional: the compiler clones the lexer to
/// run speculative scans (comprehension detection, multi-assignment
/// detection) without disturbing the real token stream.
#[derive(Clone)]
pub struct Lexer<'src> {
  src: &'src str,
  inner: logos::Lexer<'src, TokenKind>,
  line: u32,
  /// Columns of the most recent line start, not yet reconciled with the
  /// indent stack. Tabs count as 4 columns, spaces as 1.
  ws: Option<u32>,
  indent_stack: Vec<u32>,
  pending_dedents: u32,
  inside_table: u32,
  buffered: Option<Token>,
  eof_unwound: bool,
  /// Message for the most recently produced `Tok_Error`.
  pub error: Option<Cow<'static, str>>,
}

impl<'src> Lexer<'src> {
  pub fn new(src: &'src str) -> Self {
    // Line 1 participates in layout even though no newline precedes it.
    let leading = src.len() - src.trim_start_matches(|c| c == ' ' || c == '\t').len();
    Self {
      src,
      inner: TokenKind::lexer(src),
      line: 1,
      ws: Some(measure_indent(&src[..leading])),
      indent_stack: vec![0],
      pending_dedents: 0,
      inside_table: 0,
      buffered: None,
      eof_unwound: false,
      error: None,
    }
  }

  #[inline]
  pub fn lexeme(&self, token: &Token) -> &'src str {
    &self.src[token.span.range()]
  }

  #[inline]
  pub fn source(&self) -> &'src str {
    self.src
  }

  pub fn state(&self) -> ScannerState {
    ScannerState {
      pending_dedents: self.pending_dedents,
      indent_stack: self.indent_stack.clone(),
      inside_table: self.inside_table,
      line: self.line,
    }
  }

  pub fn next_token(&mut self) -> Token {
    if self.pending_dedents > 0 {
      self.pending_dedents -= 1;
      return self.synthetic(TokenKind::Tok_Dedent, self.position());
    }
    if let Some(token) = self.buffered.take() {
      return token;
    }

    loop {
      let Some(kind) = self.inner.next() else {
        return self.at_eof();
      };
      let span = Span::from(self.inner.span());
      let lexeme = self.inner.slice();

      match kind {
        TokenKind::_Tok_Newline => {
          self.line += 1;
          if self.inside_table == 0 {
            self.ws = Some(measure_indent(&lexeme[1..]));
          }
        }
        TokenKind::_Tok_Error => {
          self.ws = None;
          self.error = Some(error_message(lexeme));
          return self.materialize(TokenKind::Tok_Error, span, lexeme);
        }
        kind => {
          if let Some(ws) = self.ws.take() {
            let token = self.materialize(kind, span, lexeme);
            if let Some(layout) = self.reconcile_indent(ws, span.start) {
              self.buffered = Some(token);
              return layout;
            }
            return token;
          }
          return self.materialize(kind, span, lexeme);
        }
      }
    }
  }

  /// Compare a new line's columns against the indent stack. Returns the
  /// first layout token to deliver, queueing the rest in `pending_dedents`.
  fn reconcile_indent(&mut self, ws: u32, at: usize) -> Option<Token> {
    let current = *self.indent_stack.last().unwrap_or(&0);
    if ws > current {
      self.indent_stack.push(ws);
      return Some(self.synthetic(TokenKind::Tok_Indent, at));
    }
    if ws < current {
      let mut popped = 0u32;
      while self.indent_stack.len() > 1 && *self.indent_stack.last().unwrap() > ws {
        self.indent_stack.pop();
        popped += 1;
      }
      if *self.indent_stack.last().unwrap() != ws {
        self.error = Some(Cow::borrowed("Inconsistent indentation."));
        return Some(self.synthetic(TokenKind::Tok_Error, at));
      }
      if popped > 0 {
        self.pending_dedents = popped - 1;
        return Some(self.synthetic(TokenKind::Tok_Dedent, at));
      }
    }
    None
  }

  fn at_eof(&mut self) -> Token {
    self.ws = None;
    if !self.eof_unwound {
      self.eof_unwound = true;
      let open = self.indent_stack.len() as u32 - 1;
      self.indent_stack.truncate(1);
      if open > 0 {
        self.pending_dedents = open - 1;
        return self.synthetic(TokenKind::Tok_Dedent, self.src.len());
      }
    }
    self.synthetic(TokenKind::Tok_Eof, self.src.len())
  }

  /// Build a token for a real lexeme, tracking lines spanned by the lexeme
  /// (multiline strings) and the table-literal depth that suppresses layout.
  fn materialize(&mut self, kind: TokenKind, span: Span, lexeme: &str) -> Token {
    let token = Token {
      kind,
      span,
      line: self.line,
    };
    self.line += lexeme.bytes().filter(|&b| b == b'\n').count() as u32;
    match kind {
      TokenKind::Brk_CurlyL => self.inside_table += 1,
      TokenKind::Brk_CurlyR => self.inside_table = self.inside_table.saturating_sub(1),
      _ => {}
    }
    token
  }

  fn synthetic(&self, kind: TokenKind, at: usize) -> Token {
    Token {
      kind,
      span: Span::empty(at),
      line: self.line,
    }
  }

  fn position(&self) -> usize {
    self.buffered.map(|t| t.span.start).unwrap_or(self.inner.span().end)
  }
}

fn measure_indent(ws: &str) -> u32 {
  ws.bytes()
    .map(|b| if b == b'\t' { 4 } else { 1 })
    .sum()
}

fn error_message(lexeme: &str) -> Cow<'static, str> {
  if lexeme.starts_with("f[[") || lexeme.starts_with("[[") {
    Cow::borrowed("Unterminated multiline string.")
  } else if lexeme.starts_with("f\"") || lexeme.starts_with("f'") {
    Cow::borrowed("Unterminated f-string.")
  } else if lexeme.starts_with('"') || lexeme.starts_with('\'') {
    Cow::borrowed("Unterminated string.")
  } else {
    Cow::owned(format!("Unexpected character: '{lexeme}'."))
  }
}

fn lex_string_dq(lex: &mut logos::Lexer<TokenKind>) -> bool {
  lex_quoted(lex, b'"')
}

fn lex_string_sq(lex: &mut logos::Lexer<TokenKind>) -> bool {
  lex_quoted(lex, b'\'')
}

fn lex_fstring_dq(lex: &mut logos::Lexer<TokenKind>) -> bool {
  lex_quoted(lex, b'"')
}

fn lex_fstring_sq(lex: &mut logos::Lexer<TokenKind>) -> bool {
  lex_quoted(lex, b'\'')
}

/// Scan past the closing quote, honoring `\` escapes. Newlines are legal
/// inside quoted strings.
fn lex_quoted(lex: &mut logos::Lexer<TokenKind>, quote: u8) -> bool {
  let bytes = lex.remainder().as_bytes();
  let mut i = 0;
  while i < bytes.len() {
    match bytes[i] {
      b'\\' if i + 1 < bytes.len() => i += 2,
      b if b == quote => {
        lex.bump(i + 1);
        return true;
      }
      _ => i += 1,
    }
  }
  lex.bump(bytes.len());
  false
}

/// `[[ ... ]]` content is raw; the only terminator is `]]`.
fn lex_raw(lex: &mut logos::Lexer<TokenKind>) -> bool {
  match lex.remainder().find("]]") {
    Some(i) => {
      lex.bump(i + 2);
      true
    }
    None => {
      lex.bump(lex.remainder().len());
      false
    }
  }
}

#[derive(Clone, Copy, Debug, Logos, PartialEq, Eq)]
pub enum TokenKind {
  // Keywords
  #[token("and")]
  Kw_And,
  #[token("or")]
  Kw_Or,
  #[token("not")]
  Kw_Not,
  #[token("nil")]
  Kw_Nil,
  #[token("true")]
  Kw_True,
  #[token("false")]
  Kw_False,
  #[token("fn")]
  Kw_Fn,
  #[token("return")]
  Kw_Return,
  #[token("yield")]
  Kw_Yield,
  #[token("if")]
  Kw_If,
  #[token("elif")]
  Kw_Elif,
  #[token("else")]
  Kw_Else,
  #[token("while")]
  Kw_While,
  #[token("for")]
  Kw_For,
  #[token("in")]
  Kw_In,
  #[token("has")]
  Kw_Has,
  #[token("break")]
  Kw_Break,
  #[token("continue")]
  Kw_Continue,
  #[token("local")]
  Kw_Local,
  #[token("global")]
  Kw_Global,
  #[token("print")]
  Kw_Print,
  #[token("try")]
  Kw_Try,
  #[token("except")]
  Kw_Except,
  #[token("finally")]
  Kw_Finally,
  #[token("throw")]
  Kw_Throw,
  #[token("with")]
  Kw_With,
  #[token("as")]
  Kw_As,
  #[token("import")]
  Kw_Import,
  #[token("from")]
  Kw_From,
  #[token("del")]
  Kw_Del,
  #[token("assert")]
  Kw_Assert,
  #[token("gc")]
  Kw_Gc,

  // Brackets
  #[token("(")]
  Brk_ParenL,
  #[token(")")]
  Brk_ParenR,
  #[token("{")]
  Brk_CurlyL,
  #[token("}")]
  Brk_CurlyR,
  #[token("[")]
  Brk_SquareL,
  #[token("]")]
  Brk_SquareR,

  // Punctuation
  #[token(";")]
  Tok_Semicolon,
  #[token(",")]
  Tok_Comma,
  #[token(":")]
  Tok_Colon,

  // Operators
  #[token(".")]
  Op_Dot,
  #[token("..")]
  Op_Range,
  #[token("+")]
  Op_Plus,
  #[token("-")]
  Op_Minus,
  #[token("*")]
  Op_Star,
  #[token("/")]
  Op_Slash,
  #[token("%")]
  Op_Percent,
  #[token("**")]
  Op_StarStar,
  #[token("//")]
  Op_SlashSlash,
  #[token("#")]
  Op_Hash,
  #[token("?")]
  Op_Question,
  #[token("::")]
  Op_ColonColon,
  #[token(":=")]
  Op_Walrus,
  #[token("@")]
  Op_At,
  #[token("=")]
  Op_Equal,
  #[token("==")]
  Op_EqualEqual,
  #[token("!=")]
  Op_BangEqual,
  #[token("<")]
  Op_Less,
  #[token("<=")]
  Op_LessEqual,
  #[token(">")]
  Op_More,
  #[token(">=")]
  Op_MoreEqual,
  #[token("<+")]
  Op_Append,
  #[token("+=")]
  Op_PlusEqual,
  #[token("-=")]
  Op_MinusEqual,
  #[token("*=")]
  Op_StarEqual,
  #[token("/=")]
  Op_SlashEqual,
  #[token("%=")]
  Op_PercentEqual,

  // Literals
  /// `0`, `1.5`, `1_000_000`. `_` is only a separator between digits.
  #[regex(r"[0-9](_?[0-9])*(\.[0-9](_?[0-9])*)?")]
  Lit_Number,
  #[token("\"", lex_string_dq)]
  #[token("'", lex_string_sq)]
  #[token("[[", lex_raw)]
  Lit_String,
  #[token("f\"", lex_fstring_dq)]
  #[token("f'", lex_fstring_sq)]
  #[token("f[[", lex_raw)]
  Lit_Fstring,
  #[regex("[a-zA-Z_][a-zA-Z0-9_]*")]
  Lit_Ident,

  // Layout tokens, produced by the `Lexer` wrapper.
  Tok_Indent,
  Tok_Dedent,
  Tok_Eof,
  Tok_Error,

  #[doc(hidden)]
  #[regex(r"\n[ \t]*")]
  _Tok_Newline,
  #[doc(hidden)]
  #[regex(r"[ \t\r]+", logos::skip)]
  _Tok_Whitespace,
  #[doc(hidden)]
  #[regex(r"--[^\n]*", logos::skip)]
  _Tok_Comment,

  #[doc(hidden)]
  #[error]
  _Tok_Error,
}

#[cfg(test)]
mod tests;
