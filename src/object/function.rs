use std::cell::RefCell;
use std::fmt::{Debug, Display};

use super::ptr::Ptr;
use super::string::Str;
use crate::bytecode::Chunk;
use crate::value::Value;
use crate::vm::Stack;

/// Compile-time type tag used for arithmetic specialization and recorded
/// as parameter metadata.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TypeHint {
  #[default]
  Any,
  Int,
  Float,
  Bool,
  Str,
  Table,
}

impl TypeHint {
  pub fn is_numeric(self) -> bool {
    matches!(self, TypeHint::Int | TypeHint::Float)
  }
}

/// A compiled function. Created by the compiler, immutable afterwards.
pub struct Function {
  pub name: Option<Ptr<Str>>,
  pub arity: u8,
  pub is_variadic: bool,
  pub is_generator: bool,
  pub is_self: bool,
  pub upvalue_count: u8,
  pub chunk: Chunk,
  pub param_types: Vec<TypeHint>,
  pub param_names: Vec<Option<Ptr<Str>>>,
  pub defaults: Vec<Value>,
  pub doc: Option<Ptr<Str>>,
}

impl Function {
  pub fn name_str(&self) -> &str {
    self.name.as_ref().map(|n| n.as_str()).unwrap_or("<script>")
  }
}

impl Display for Function {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match &self.name {
      Some(name) => write!(f, "<function `{name}`>"),
      None => write!(f, "<script>"),
    }
  }
}

impl Debug for Function {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Function")
      .field("name", &self.name_str())
      .field("arity", &self.arity)
      .field("is_variadic", &self.is_variadic)
      .field("is_generator", &self.is_generator)
      .field("upvalue_count", &self.upvalue_count)
      .field("code_len", &self.chunk.code.len())
      .finish()
  }
}

/// A variable captured from an enclosing scope.
///
/// While the captured local is live its cell is `Open`, pointing at the
/// owning thread's stack slot; when the local leaves scope the value moves
/// into the cell (`Closed`) and every closure holding the cell keeps
/// seeing the same variable.
pub struct Upvalue(RefCell<UpvalueState>);

pub enum UpvalueState {
  Open { stack: Stack, slot: usize },
  Closed(Value),
}

impl Upvalue {
  pub fn open(stack: Stack, slot: usize) -> Ptr<Upvalue> {
    Ptr::new(Upvalue(RefCell::new(UpvalueState::Open { stack, slot })))
  }

  pub fn get(&self) -> Value {
    match &*self.0.borrow() {
      UpvalueState::Open { stack, slot } => stack.borrow()[*slot].clone(),
      UpvalueState::Closed(value) => value.clone(),
    }
  }

  pub fn set(&self, value: Value) {
    match &mut *self.0.borrow_mut() {
      UpvalueState::Open { stack, slot } => stack.borrow_mut()[*slot] = value,
      UpvalueState::Closed(cell) => *cell = value,
    }
  }

  /// Copy the stack slot into the heap cell. Idempotent.
  pub fn close(&self) {
    let value = self.get();
    *self.0.borrow_mut() = UpvalueState::Closed(value);
  }

  pub fn open_slot(&self) -> Option<usize> {
    match &*self.0.borrow() {
      UpvalueState::Open { slot, .. } => Some(*slot),
      UpvalueState::Closed(_) => None,
    }
  }
}

/// A function bound to its captured environment.
pub struct Closure {
  pub function: Ptr<Function>,
  pub upvalues: Vec<Ptr<Upvalue>>,
}

impl Closure {
  pub fn new(function: Ptr<Function>, upvalues: Vec<Ptr<Upvalue>>) -> Ptr<Closure> {
    Ptr::new(Closure { function, upvalues })
  }
}

impl Display for Closure {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    Display::fmt(&*self.function, f)
  }
}

impl Debug for Closure {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Closure")
      .field("function", &self.function)
      .field("upvalues", &self.upvalues.len())
      .finish()
  }
}
