//! Tokens for toi.
//!
//! Tokenization happens in two layers: a [`logos`]-generated scanner over
//! the raw bytes, and the indentation layout pass in [`lexer::Lexer`] which
//! turns changes in leading whitespace into synthetic `INDENT`/`DEDENT`
//! tokens. The layout pass is what makes the language's block structure
//! visible to the compiler without a separate parse tree.

pub mod lexer;

pub use lexer::{Lexer, ScannerState, Token, TokenKind};
