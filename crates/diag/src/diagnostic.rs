//! Compile diagnostics.
//!
//! The compiler accumulates [`Diagnostic`] values instead of printing as it
//! goes; the driver decides where (and whether colored) they are emitted.

use std::fmt;
use std::fmt::{Display, Write};

use beef::lean::Cow;
use span::Span;
use thiserror::Error;

use crate::style::Style;

/// What the diagnostic points at.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TokenLabel {
  /// A concrete token; rendered as `at '<lexeme>'`.
  Lexeme(String),
  /// End of input; rendered as `at end`.
  Eof,
  /// An error token already carries its own message, so no label.
  None,
}

/// A single compile error: `[line N] Error at '<token>': <message>`.
#[derive(Clone, Debug)]
pub struct Diagnostic {
  pub line: u32,
  pub span: Span,
  pub label: TokenLabel,
  pub message: Cow<'static, str>,
}

impl Diagnostic {
  pub fn new(
    line: u32,
    span: Span,
    label: TokenLabel,
    message: impl Into<Cow<'static, str>>,
  ) -> Diagnostic {
    Diagnostic {
      line,
      span,
      label,
      message: message.into(),
    }
  }

  /// Emit the diagnostic to `w`, optionally colored.
  pub fn emit<W: Write>(&self, w: &mut W, color: bool) -> Result<(), EmitError> {
    let style = Style::new(color);
    write!(w, "{}", style.error(Header(self)))?;
    writeln!(w, ": {}", self.message)?;
    Ok(())
  }

  pub fn emit_to_string(&self, color: bool) -> Result<String, EmitError> {
    let mut buf = String::new();
    self.emit(&mut buf, color)?;
    Ok(buf)
  }
}

/// The colored part of the message, without the `: <message>` tail.
struct Header<'a>(&'a Diagnostic);

impl<'a> Display for Header<'a> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "[line {}] Error", self.0.line)?;
    match &self.0.label {
      TokenLabel::Lexeme(lexeme) => write!(f, " at '{lexeme}'"),
      TokenLabel::Eof => write!(f, " at end"),
      TokenLabel::None => Ok(()),
    }
  }
}

impl Display for Diagnostic {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}: {}", Header(self), self.message)
  }
}

#[derive(Debug, Error)]
pub enum EmitError {
  #[error("failed to format")]
  Fmt(#[from] fmt::Error),
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn render_at_token() {
    let d = Diagnostic::new(
      3,
      Span::from(10..11),
      TokenLabel::Lexeme("}".into()),
      "Expect expression.",
    );
    assert_eq!(d.to_string(), "[line 3] Error at '}': Expect expression.");
    assert_eq!(
      d.emit_to_string(false).unwrap(),
      "[line 3] Error at '}': Expect expression.\n"
    );
  }

  #[test]
  fn render_at_end() {
    let d = Diagnostic::new(7, Span::empty(42), TokenLabel::Eof, "Expect ')' after arguments.");
    assert_eq!(
      d.to_string(),
      "[line 7] Error at end: Expect ')' after arguments."
    );
  }

  #[test]
  fn render_error_token() {
    let d = Diagnostic::new(1, Span::from(0..1), TokenLabel::None, "Unterminated string.");
    assert_eq!(d.to_string(), "[line 1] Error: Unterminated string.");
  }

  #[test]
  fn colored_header_is_red() {
    let d = Diagnostic::new(1, Span::from(0..1), TokenLabel::Eof, "boom");
    let out = d.emit_to_string(true).unwrap();
    assert!(out.starts_with("\u{1b}["));
    assert!(out.contains("[line 1] Error at end"));
    assert!(out.trim_end().ends_with(": boom"));
  }
}
