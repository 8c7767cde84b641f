use std::borrow::Borrow;
use std::fmt::{Debug, Display};
use std::hash::{Hash, Hasher};
use std::ops::Deref;

use super::ptr::Ptr;

/// An immutable string object.
///
/// String literals are copied out of the source buffer at compile time, so
/// compiled functions never borrow from the source they came from.
#[derive(PartialEq, Eq, PartialOrd, Ord)]
pub struct Str(String);

impl Str {
  pub fn as_str(&self) -> &str {
    &self.0
  }

  pub fn intern(s: impl Into<String>) -> Ptr<Str> {
    Ptr::new(Str(s.into()))
  }
}

impl From<&str> for Str {
  fn from(value: &str) -> Self {
    Str(value.to_owned())
  }
}

impl From<String> for Str {
  fn from(value: String) -> Self {
    Str(value)
  }
}

impl Deref for Str {
  type Target = str;

  fn deref(&self) -> &Self::Target {
    &self.0
  }
}

// Hashes like `str` so string-keyed maps can be probed with `&str`.
impl Hash for Str {
  fn hash<H: Hasher>(&self, state: &mut H) {
    self.0.as_str().hash(state)
  }
}

impl Borrow<str> for Str {
  fn borrow(&self) -> &str {
    &self.0
  }
}

impl Borrow<str> for Ptr<Str> {
  fn borrow(&self) -> &str {
    self.as_str()
  }
}

impl Display for Str {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(&self.0)
  }
}

impl Debug for Str {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{:?}", self.0)
  }
}
