//! Interactive shell: line editing, syntax highlighting, completion, and
//! multi-line continuation driven by the real lexer.

use std::borrow::Cow;

use rustyline::completion::Completer;
use rustyline::error::ReadlineError;
use rustyline::highlight::Highlighter;
use rustyline::{Context, Editor};
use rustyline_derive::{Helper, Hinter, Validator};
use syntax::{Lexer, TokenKind};
use toi::{Diagnostic, Error, Toi};

const RESET: &str = "\x1b[0m";
const KEYWORD: &str = "\x1b[35m";
const NUMBER: &str = "\x1b[36m";
const STRING: &str = "\x1b[32m";
const FSTRING: &str = "\x1b[92m";
const OPERATOR: &str = "\x1b[33m";
const FUNCTION: &str = "\x1b[94m";
const BOOL: &str = "\x1b[91m";

const COMPLETION_MAX: usize = 7;

const KEYWORDS: &[&str] = &[
  "and", "or", "not", "nil", "true", "false", "fn", "return", "yield", "if", "elif", "else",
  "while", "for", "in", "has", "break", "continue", "local", "global", "print", "try", "except",
  "finally", "throw", "with", "as", "import", "from", "del", "assert", "gc", "match", "case",
];

const BUILTINS: &[&str] = &[
  "exit", "bool", "int", "float", "input", "next", "inext", "range", "min", "max", "sum",
  "setmetatable", "getmetatable", "error", "type", "str", "string", "coroutine", "math",
];

#[derive(Helper, Hinter, Validator)]
struct ReplHelper;

impl Completer for ReplHelper {
  type Candidate = String;

  fn complete(
    &self,
    line: &str,
    pos: usize,
    _ctx: &Context<'_>,
  ) -> rustyline::Result<(usize, Vec<String>)> {
    let head = &line[..pos];
    let start = head
      .rfind(|c: char| !c.is_ascii_alphanumeric() && c != '_')
      .map(|i| i + 1)
      .unwrap_or(0);
    let word = &head[start..];
    if word.is_empty() {
      return Ok((start, Vec::new()));
    }

    let mut candidates = Vec::new();
    for list in [KEYWORDS, BUILTINS] {
      for name in list {
        if name.starts_with(word) && !candidates.iter().any(|c| c == name) {
          candidates.push(name.to_string());
          if candidates.len() >= COMPLETION_MAX {
            return Ok((start, candidates));
          }
        }
      }
    }
    Ok((start, candidates))
  }
}

impl Highlighter for ReplHelper {
  fn highlight<'l>(&self, line: &'l str, _pos: usize) -> Cow<'l, str> {
    use TokenKind::*;

    let mut out = String::with_capacity(line.len());
    let mut cursor = 0;
    let mut lexer = Lexer::new(line);
    loop {
      let token = lexer.next_token();
      if token.kind == Tok_Eof {
        break;
      }
      if token.span.is_empty() {
        continue;
      }
      let color = match token.kind {
        Kw_Fn => Some(FUNCTION),
        Kw_True | Kw_False | Kw_Nil => Some(BOOL),
        kind if is_keyword(kind) => Some(KEYWORD),
        Lit_Number => Some(NUMBER),
        Lit_String => Some(STRING),
        Lit_Fstring => Some(FSTRING),
        kind if is_operator(kind) => Some(OPERATOR),
        _ => None,
      };
      out.push_str(&line[cursor..token.span.start]);
      match color {
        Some(color) => {
          out.push_str(color);
          out.push_str(&line[token.span.range()]);
          out.push_str(RESET);
        }
        None => out.push_str(&line[token.span.range()]),
      }
      cursor = token.span.end;
    }
    out.push_str(&line[cursor..]);
    Cow::Owned(out)
  }

  fn highlight_char(&self, _line: &str, _pos: usize) -> bool {
    true
  }
}

fn is_keyword(kind: TokenKind) -> bool {
  use TokenKind::*;
  matches!(
    kind,
    Kw_And
      | Kw_Or
      | Kw_Not
      | Kw_Return
      | Kw_Yield
      | Kw_If
      | Kw_Elif
      | Kw_Else
      | Kw_While
      | Kw_For
      | Kw_In
      | Kw_Has
      | Kw_Break
      | Kw_Continue
      | Kw_Local
      | Kw_Global
      | Kw_Print
      | Kw_Try
      | Kw_Except
      | Kw_Finally
      | Kw_Throw
      | Kw_With
      | Kw_As
      | Kw_Import
      | Kw_From
      | Kw_Del
      | Kw_Assert
      | Kw_Gc
  )
}

fn is_operator(kind: TokenKind) -> bool {
  use TokenKind::*;
  matches!(
    kind,
    Op_Dot
      | Op_Range
      | Op_Plus
      | Op_Minus
      | Op_Star
      | Op_Slash
      | Op_Percent
      | Op_StarStar
      | Op_SlashSlash
      | Op_Hash
      | Op_Question
      | Op_ColonColon
      | Op_Walrus
      | Op_At
      | Op_Equal
      | Op_EqualEqual
      | Op_BangEqual
      | Op_Less
      | Op_LessEqual
      | Op_More
      | Op_MoreEqual
      | Op_Append
      | Op_PlusEqual
      | Op_MinusEqual
      | Op_StarEqual
      | Op_SlashEqual
      | Op_PercentEqual
  )
}

/// Whether the accumulated input looks unfinished: unbalanced brackets, a
/// trailing infix token, or an open block header. Once continuing, an
/// empty line submits.
fn needs_continuation(buffer: &str) -> bool {
  use TokenKind::*;

  let mut lexer = Lexer::new(buffer);
  let mut depth = 0i32;
  let mut last = None;
  let mut has_block_keyword = false;
  loop {
    let token = lexer.next_token();
    match token.kind {
      Tok_Eof => break,
      Tok_Error => return false, // let the compiler report it
      Tok_Indent | Tok_Dedent => continue,
      Brk_ParenL | Brk_SquareL | Brk_CurlyL => depth += 1,
      Brk_ParenR | Brk_SquareR | Brk_CurlyR => depth -= 1,
      Kw_Fn | Kw_If | Kw_Elif | Kw_Else | Kw_While | Kw_For | Kw_Try | Kw_Except | Kw_Finally
      | Kw_With => has_block_keyword = true,
      _ => {}
    }
    last = Some(token.kind);
  }

  if depth > 0 {
    return true;
  }
  if matches!(
    last,
    Some(
      Op_Dot
        | Op_Range
        | Op_Plus
        | Op_Minus
        | Op_Star
        | Op_Slash
        | Op_Percent
        | Op_StarStar
        | Op_SlashSlash
        | Op_Question
        | Op_ColonColon
        | Op_Walrus
        | Op_Equal
        | Op_EqualEqual
        | Op_BangEqual
        | Op_Less
        | Op_LessEqual
        | Op_More
        | Op_MoreEqual
        | Op_Append
        | Op_PlusEqual
        | Op_MinusEqual
        | Op_StarEqual
        | Op_SlashEqual
        | Op_PercentEqual
        | Tok_Comma
        | Tok_Colon
        | Kw_And
        | Kw_Or
        | Kw_Not
        | Kw_In
        | Kw_Has
    )
  ) {
    return true;
  }
  has_block_keyword
}

pub fn report_diagnostics(diagnostics: &[Diagnostic]) {
  for diagnostic in diagnostics {
    match diagnostic.emit_to_string(true) {
      Ok(rendered) => eprint!("{rendered}"),
      Err(_) => eprintln!("{diagnostic}"),
    }
  }
}

pub fn run() -> anyhow::Result<()> {
  let toi = Toi::default();
  let mut editor = Editor::<ReplHelper>::new()?;
  editor.set_helper(Some(ReplHelper));

  println!("toi {}", env!("CARGO_PKG_VERSION"));

  'line: loop {
    let mut buffer = String::new();
    let mut continuing = false;

    loop {
      let prompt = if continuing { "... " } else { "> " };
      match editor.readline(prompt) {
        Ok(line) => {
          if continuing {
            if line.trim().is_empty() {
              break; // empty line submits the accumulated input
            }
            buffer.push('\n');
            buffer.push_str(&line);
          } else {
            if line.trim().is_empty() {
              continue 'line;
            }
            buffer = line;
          }
          if needs_continuation(&buffer) {
            continuing = true;
            continue;
          }
          break;
        }
        Err(ReadlineError::Interrupted) => {
          println!("^C");
          continue 'line;
        }
        Err(ReadlineError::Eof) => return Ok(()),
        Err(error) => return Err(error.into()),
      }
    }

    if buffer.trim().is_empty() {
      continue;
    }
    editor.add_history_entry(buffer.as_str());

    match toi.eval_repl(&buffer) {
      Ok(value) => {
        if !value.is_nil() {
          println!("{value}");
        }
      }
      Err(Error::Compile(diagnostics)) => report_diagnostics(&diagnostics),
      Err(Error::Runtime(error)) => eprintln!("{error}"),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::needs_continuation;

  #[test]
  fn complete_lines_do_not_continue() {
    assert!(!needs_continuation("x = 1"));
    assert!(!needs_continuation("print(1, 2)"));
    assert!(!needs_continuation("t = {a = 1}"));
  }

  #[test]
  fn open_brackets_continue() {
    assert!(needs_continuation("t = {"));
    assert!(needs_continuation("f(1,"));
    assert!(needs_continuation("t = {a = 1,\n  b = 2,"));
  }

  #[test]
  fn trailing_operators_continue() {
    assert!(needs_continuation("x = 1 +"));
    assert!(needs_continuation("y ="));
    assert!(needs_continuation("t."));
  }

  #[test]
  fn block_keywords_continue_until_submitted() {
    assert!(needs_continuation("fn f(x)"));
    assert!(needs_continuation("fn f(x)\n  return x * x"));
    assert!(needs_continuation("if x: y = 1"));
  }

  #[test]
  fn errors_are_left_to_the_compiler() {
    assert!(!needs_continuation("x = \"abc"));
  }
}
