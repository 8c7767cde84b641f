use std::cell::{Cell, RefCell};
use std::fmt::{Debug, Display};
use std::hash::{Hash, Hasher};

use indexmap::IndexMap;

use super::ptr::Ptr;
use super::string::Str;
use crate::value::Value;

/// A table key. Strings hash and compare by content (two distinct string
/// objects with the same text are the same key); numbers by bit pattern
/// with `-0.0` folded into `0.0`.
#[derive(Clone)]
pub enum Key {
  Number(f64),
  Str(Ptr<Str>),
  Bool(bool),
}

impl Key {
  /// `nil` and object values cannot be table keys.
  pub fn from_value(value: &Value) -> Result<Key, &'static str> {
    match value {
      Value::Number(n) => Ok(Key::Number(*n)),
      Value::Str(s) => Ok(Key::Str(s.clone())),
      Value::Bool(b) => Ok(Key::Bool(*b)),
      Value::Nil => Err("Table key cannot be nil."),
      _ => Err("Table key must be a number, string, or boolean."),
    }
  }

  pub fn int(n: usize) -> Key {
    Key::Number(n as f64)
  }

  pub fn to_value(&self) -> Value {
    match self {
      Key::Number(n) => Value::Number(*n),
      Key::Str(s) => Value::Str(s.clone()),
      Key::Bool(b) => Value::Bool(*b),
    }
  }

  fn bits(n: f64) -> u64 {
    if n == 0.0 {
      0
    } else {
      n.to_bits()
    }
  }
}

impl PartialEq for Key {
  fn eq(&self, other: &Self) -> bool {
    match (self, other) {
      (Key::Number(a), Key::Number(b)) => Key::bits(*a) == Key::bits(*b),
      (Key::Str(a), Key::Str(b)) => a.as_str() == b.as_str(),
      (Key::Bool(a), Key::Bool(b)) => a == b,
      _ => false,
    }
  }
}

impl Eq for Key {}

impl Hash for Key {
  fn hash<H: Hasher>(&self, state: &mut H) {
    match self {
      Key::Number(n) => {
        0u8.hash(state);
        Key::bits(*n).hash(state);
      }
      Key::Str(s) => {
        1u8.hash(state);
        s.as_str().hash(state);
      }
      Key::Bool(b) => {
        2u8.hash(state);
        b.hash(state);
      }
    }
  }
}

/// Hybrid map/array with an optional metatable.
///
/// Every mutation bumps `version`, which is what validates `GetTable`
/// inline-cache slots.
pub struct Table {
  data: RefCell<IndexMap<Key, Value>>,
  meta: RefCell<Option<Ptr<Table>>>,
  version: Cell<u64>,
}

impl Table {
  pub fn new() -> Ptr<Table> {
    Ptr::new(Table {
      data: RefCell::new(IndexMap::new()),
      meta: RefCell::new(None),
      version: Cell::new(0),
    })
  }

  #[inline]
  pub fn version(&self) -> u64 {
    self.version.get()
  }

  fn touch(&self) {
    self.version.set(self.version.get() + 1);
  }

  pub fn get(&self, key: &Key) -> Option<Value> {
    self.data.borrow().get(key).cloned()
  }

  pub fn insert(&self, key: Key, value: Value) {
    self.data.borrow_mut().insert(key, value);
    self.touch();
  }

  pub fn remove(&self, key: &Key) -> Option<Value> {
    let removed = self.data.borrow_mut().shift_remove(key);
    if removed.is_some() {
      self.touch();
    }
    removed
  }

  pub fn contains(&self, key: &Key) -> bool {
    self.data.borrow().contains_key(key)
  }

  pub fn len(&self) -> usize {
    self.data.borrow().len()
  }

  pub fn is_empty(&self) -> bool {
    self.data.borrow().is_empty()
  }

  /// Number of consecutive integer keys starting at 1 (the array part).
  pub fn array_len(&self) -> usize {
    let data = self.data.borrow();
    let mut n = 0;
    while data.contains_key(&Key::int(n + 1)) {
      n += 1;
    }
    n
  }

  /// Append to the array part.
  pub fn push(&self, value: Value) {
    let n = self.array_len();
    self.insert(Key::int(n + 1), value);
  }

  /// The entry following `control` in iteration order; `None` control
  /// starts from the front. This is the primitive behind keyed `for`.
  pub fn next_entry(&self, control: Option<&Key>) -> Option<(Key, Value)> {
    let data = self.data.borrow();
    let index = match control {
      None => 0,
      Some(key) => data.get_index_of(key)? + 1,
    };
    data
      .get_index(index)
      .map(|(k, v)| (k.clone(), v.clone()))
  }

  pub fn entries(&self) -> Vec<(Key, Value)> {
    self
      .data
      .borrow()
      .iter()
      .map(|(k, v)| (k.clone(), v.clone()))
      .collect()
  }

  pub fn metatable(&self) -> Option<Ptr<Table>> {
    self.meta.borrow().clone()
  }

  pub fn set_metatable(&self, meta: Option<Ptr<Table>>) {
    *self.meta.borrow_mut() = meta;
    self.touch();
  }
}

impl Display for Table {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "<table>")
  }
}

impl Debug for Table {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let mut s = f.debug_map();
    for (key, value) in self.data.borrow().iter() {
      s.entry(&key.to_value().to_string(), &value.to_string());
    }
    s.finish()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn string_keys_compare_by_content() {
    let t = Table::new();
    t.insert(Key::Str(Str::intern("a")), Value::Number(1.0));
    assert_eq!(
      t.get(&Key::Str(Str::intern("a"))),
      Some(Value::Number(1.0))
    );
  }

  #[test]
  fn array_part() {
    let t = Table::new();
    t.push(Value::Number(10.0));
    t.push(Value::Number(20.0));
    assert_eq!(t.array_len(), 2);
    t.insert(Key::int(4), Value::Number(40.0));
    assert_eq!(t.array_len(), 2);
    t.insert(Key::int(3), Value::Number(30.0));
    assert_eq!(t.array_len(), 4);
  }

  #[test]
  fn version_bumps_on_mutation() {
    let t = Table::new();
    let v0 = t.version();
    t.insert(Key::int(1), Value::Nil);
    assert!(t.version() > v0);
    let v1 = t.version();
    t.remove(&Key::int(1));
    assert!(t.version() > v1);
    let v2 = t.version();
    t.set_metatable(None);
    assert!(t.version() > v2);
  }

  #[test]
  fn next_entry_walks_in_order() {
    let t = Table::new();
    t.insert(Key::Str(Str::intern("a")), Value::Number(1.0));
    t.insert(Key::Str(Str::intern("b")), Value::Number(2.0));
    let (k1, v1) = t.next_entry(None).unwrap();
    assert_eq!(v1, Value::Number(1.0));
    let (k2, v2) = t.next_entry(Some(&k1)).unwrap();
    assert_eq!(v2, Value::Number(2.0));
    assert!(t.next_entry(Some(&k2)).is_none());
  }

  #[test]
  fn negative_zero_key_folds() {
    let t = Table::new();
    t.insert(Key::Number(0.0), Value::Bool(true));
    assert_eq!(t.get(&Key::Number(-0.0)), Some(Value::Bool(true)));
  }
}
