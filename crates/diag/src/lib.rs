pub mod diagnostic;
mod style;

pub use diagnostic::{Diagnostic, EmitError, TokenLabel};
