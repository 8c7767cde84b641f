use indoc::indoc;

use super::TokenKind::*;
use super::*;

fn kinds(src: &str) -> Vec<TokenKind> {
  let mut lexer = Lexer::new(src);
  let mut out = vec![];
  loop {
    let token = lexer.next_token();
    let kind = token.kind;
    out.push(kind);
    if kind == Tok_Eof || kind == Tok_Error {
      break;
    }
  }
  out
}

#[test]
fn simple_statement() {
  assert_eq!(
    kinds("local x = 10 + y"),
    vec![Kw_Local, Lit_Ident, Op_Equal, Lit_Number, Op_Plus, Lit_Ident, Tok_Eof]
  );
}

#[test]
fn block_layout() {
  let src = indoc! {"
    fn f(x)
      return x
    f(1)
  "};
  assert_eq!(
    kinds(src),
    vec![
      Kw_Fn, Lit_Ident, Brk_ParenL, Lit_Ident, Brk_ParenR,
      Tok_Indent, Kw_Return, Lit_Ident, Tok_Dedent,
      Lit_Ident, Brk_ParenL, Lit_Number, Brk_ParenR, Tok_Eof,
    ]
  );
}

#[test]
fn blank_and_comment_lines_do_not_affect_layout() {
  let src = indoc! {"
    if x
      a = 1

      -- a comment, more indented than anything
            -- another one
      b = 2
  "};
  assert_eq!(
    kinds(src),
    vec![
      Kw_If, Lit_Ident, Tok_Indent,
      Lit_Ident, Op_Equal, Lit_Number,
      Lit_Ident, Op_Equal, Lit_Number,
      Tok_Dedent, Tok_Eof,
    ]
  );
}

#[test]
fn eof_unwinds_all_blocks() {
  let src = "if a\n  if b\n    c = 1";
  assert_eq!(
    kinds(src),
    vec![
      Kw_If, Lit_Ident, Tok_Indent, Kw_If, Lit_Ident, Tok_Indent,
      Lit_Ident, Op_Equal, Lit_Number,
      Tok_Dedent, Tok_Dedent, Tok_Eof,
    ]
  );
}

#[test]
fn inconsistent_indentation() {
  let src = "if a\n    b = 1\n  c = 2\n";
  let mut lexer = Lexer::new(src);
  loop {
    let token = lexer.next_token();
    if token.kind == Tok_Error {
      assert_eq!(lexer.error.as_deref(), Some("Inconsistent indentation."));
      return;
    }
    assert_ne!(token.kind, Tok_Eof, "expected an error token");
  }
}

#[test]
fn tabs_are_four_columns() {
  // "\t" and "    " land on the same level.
  let src = "if a\n\tb = 1\n    c = 2\n";
  assert_eq!(
    kinds(src),
    vec![
      Kw_If, Lit_Ident, Tok_Indent,
      Lit_Ident, Op_Equal, Lit_Number,
      Lit_Ident, Op_Equal, Lit_Number,
      Tok_Dedent, Tok_Eof,
    ]
  );
}

#[test]
fn table_literal_suppresses_layout() {
  let src = indoc! {"
    t = {
      a = 1,
      b = 2,
    }
  "};
  assert_eq!(
    kinds(src),
    vec![
      Lit_Ident, Op_Equal, Brk_CurlyL,
      Lit_Ident, Op_Equal, Lit_Number, Tok_Comma,
      Lit_Ident, Op_Equal, Lit_Number, Tok_Comma,
      Brk_CurlyR, Tok_Eof,
    ]
  );
}

#[test]
fn number_separators() {
  let src = "1_000_000 1.5 1..3 1_";
  let mut lexer = Lexer::new(src);
  let t = lexer.next_token();
  assert_eq!((t.kind, lexer.lexeme(&t)), (Lit_Number, "1_000_000"));
  let t = lexer.next_token();
  assert_eq!((t.kind, lexer.lexeme(&t)), (Lit_Number, "1.5"));
  let t = lexer.next_token();
  assert_eq!((t.kind, lexer.lexeme(&t)), (Lit_Number, "1"));
  assert_eq!(lexer.next_token().kind, Op_Range);
  let t = lexer.next_token();
  assert_eq!((t.kind, lexer.lexeme(&t)), (Lit_Number, "3"));
  // a trailing underscore is not part of the number
  let t = lexer.next_token();
  assert_eq!((t.kind, lexer.lexeme(&t)), (Lit_Number, "1"));
  let t = lexer.next_token();
  assert_eq!((t.kind, lexer.lexeme(&t)), (Lit_Ident, "_"));
}

#[test]
fn strings() {
  let src = r#""a\"b" 'c' [[raw
  text]] f"v={v}" f[[x]]"#;
  let mut lexer = Lexer::new(src);
  let t = lexer.next_token();
  assert_eq!((t.kind, lexer.lexeme(&t)), (Lit_String, r#""a\"b""#));
  let t = lexer.next_token();
  assert_eq!((t.kind, lexer.lexeme(&t)), (Lit_String, "'c'"));
  let t = lexer.next_token();
  assert_eq!(t.kind, Lit_String);
  assert!(lexer.lexeme(&t).starts_with("[[raw"));
  assert_eq!(t.line, 1);
  let t = lexer.next_token();
  assert_eq!((t.kind, lexer.lexeme(&t)), (Lit_Fstring, "f\"v={v}\""));
  assert_eq!(t.line, 2);
  let t = lexer.next_token();
  assert_eq!((t.kind, lexer.lexeme(&t)), (Lit_Fstring, "f[[x]]"));
}

#[test]
fn unterminated_string() {
  let mut lexer = Lexer::new("x = \"abc");
  lexer.next_token();
  lexer.next_token();
  let t = lexer.next_token();
  assert_eq!(t.kind, Tok_Error);
  assert_eq!(lexer.error.as_deref(), Some("Unterminated string."));
}

#[test]
fn unexpected_character() {
  let mut lexer = Lexer::new("a ! b");
  lexer.next_token();
  let t = lexer.next_token();
  assert_eq!(t.kind, Tok_Error);
  assert_eq!(lexer.error.as_deref(), Some("Unexpected character: '!'."));
}

#[test]
fn operators() {
  assert_eq!(
    kinds("a <= b >= c != d == e ** f // g <+ h .. i :: j := k += l"),
    vec![
      Lit_Ident, Op_LessEqual, Lit_Ident, Op_MoreEqual, Lit_Ident, Op_BangEqual,
      Lit_Ident, Op_EqualEqual, Lit_Ident, Op_StarStar, Lit_Ident, Op_SlashSlash,
      Lit_Ident, Op_Append, Lit_Ident, Op_Range, Lit_Ident, Op_ColonColon,
      Lit_Ident, Op_Walrus, Lit_Ident, Op_PlusEqual, Lit_Ident, Tok_Eof,
    ]
  );
}

#[test]
fn clone_is_independent() {
  let mut lexer = Lexer::new("a b\n  c");
  assert_eq!(lexer.next_token().kind, Lit_Ident);
  let mut peek = lexer.clone();
  assert_eq!(peek.next_token().kind, Lit_Ident);
  assert_eq!(peek.next_token().kind, Tok_Indent);
  assert_eq!(peek.next_token().kind, Lit_Ident);
  // the original has not moved
  let t = lexer.next_token();
  assert_eq!((t.kind, lexer.lexeme(&t)), (Lit_Ident, "b"));
}

#[test]
fn scanner_state_snapshot() {
  let mut lexer = Lexer::new("if a\n  if b\n    c = {\n1");
  let mut last = lexer.next_token();
  while last.kind != Tok_Eof && !(last.kind == Lit_Number) {
    last = lexer.next_token();
  }
  let state = lexer.state();
  assert_eq!(state.indent_stack, vec![0, 2, 4]);
  assert_eq!(state.inside_table, 1);
  assert_eq!(state.pending_dedents, 0);
  assert_eq!(state.line, 4);
}

#[test]
fn token_lines() {
  let mut lexer = Lexer::new("a\nb\n\nc");
  assert_eq!(lexer.next_token().line, 1);
  assert_eq!(lexer.next_token().line, 2);
  assert_eq!(lexer.next_token().line, 4);
}
