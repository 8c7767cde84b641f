use std::fmt::{Debug, Display};

use super::ptr::Ptr;
use crate::value::Value;
use crate::vm::{Throw, Vm};

/// What a native call produced.
///
/// Natives can return multiple values (the iteration protocol depends on
/// it) and `coroutine.yield` surfaces as `Yield`, which only the coroutine
/// driver may consume — yielding on a non-coroutine thread is a runtime
/// error.
pub enum NativeFlow {
  Values(Vec<Value>),
  Yield(Vec<Value>),
}

impl NativeFlow {
  pub fn value(value: Value) -> NativeFlow {
    NativeFlow::Values(vec![value])
  }

  pub fn nil() -> NativeFlow {
    NativeFlow::Values(vec![Value::Nil])
  }
}

pub type NativeCallback = Box<dyn Fn(&mut Vm, &[Value]) -> Result<NativeFlow, Throw>>;

pub struct NativeFunction {
  pub name: &'static str,
  callback: NativeCallback,
}

impl NativeFunction {
  pub fn new<F>(name: &'static str, callback: F) -> Ptr<NativeFunction>
  where
    F: Fn(&mut Vm, &[Value]) -> Result<NativeFlow, Throw> + 'static,
  {
    Ptr::new(NativeFunction {
      name,
      callback: Box::new(callback),
    })
  }

  pub fn call(&self, vm: &mut Vm, args: &[Value]) -> Result<NativeFlow, Throw> {
    (self.callback)(vm, args)
  }
}

impl Display for NativeFunction {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "<native fn `{}`>", self.name)
  }
}

impl Debug for NativeFunction {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("NativeFunction").field("name", &self.name).finish()
  }
}
