pub mod dispatch;
pub mod import;

use std::cell::RefCell;
use std::fmt::{Debug, Display};
use std::io;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;

use crate::object::{Closure, Ptr, Str, Upvalue};
use crate::value::Value;

pub use import::{FsModuleLoader, ModuleLoader, NoopModuleLoader};

/// A value stack. Shared (`Rc`) so open upvalues can point into the stack
/// that owns their slot even when a different thread is executing.
pub type Stack = Rc<RefCell<Vec<Value>>>;

pub const MAX_FRAMES: usize = 1024;

/// Bail out of a VM operation with a thrown string value.
macro_rules! fail {
  ($($args:tt)*) => {
    return Err($crate::vm::Throw::msg(format!($($args)*)))
  };
}
pub(crate) use fail;

/// One execution context: the main program and every coroutine owns one.
pub struct Thread {
  pub stack: Stack,
  pub frames: Vec<CallFrame>,
  pub open_upvalues: Vec<Ptr<Upvalue>>,
}

impl Thread {
  pub fn new() -> Thread {
    Thread {
      stack: Rc::new(RefCell::new(Vec::with_capacity(64))),
      frames: Vec::with_capacity(8),
      open_upvalues: Vec::new(),
    }
  }
}

impl Default for Thread {
  fn default() -> Self {
    Thread::new()
  }
}

pub struct CallFrame {
  pub closure: Ptr<Closure>,
  pub ip: usize,
  /// Absolute stack index of slot 0 (the callee).
  pub base: usize,
  /// Active `Try` handlers, innermost last.
  pub tries: Vec<TryRecord>,
  /// What each currently-executing `finally` block should do when its
  /// `EndFinally` runs, innermost last.
  pub pending: Vec<Pending>,
  /// Set on module-body frames: cache the result and restore the caller's
  /// module context when this frame returns.
  pub module_return: Option<ModuleReturn>,
}

impl CallFrame {
  pub fn new(closure: Ptr<Closure>, base: usize) -> CallFrame {
    CallFrame {
      closure,
      ip: 0,
      base,
      tries: Vec::new(),
      pending: Vec::new(),
      module_return: None,
    }
  }
}

/// Pushed by `Try`, consumed by `EndTry` or the unwinder.
pub struct TryRecord {
  /// Absolute stack height to restore when this handler fires.
  pub depth: usize,
  pub has_except: bool,
  pub has_finally: bool,
  pub except_pc: usize,
  pub finally_pc: usize,
}

/// The action a `finally` block resumes when it completes.
pub enum Pending {
  Normal,
  Throw(Throw),
  Return(Vec<Value>),
}

pub struct ModuleReturn {
  pub name: String,
  /// Previous values of `__name__`, `__file__`, `__main__` (`None` means
  /// the key was absent).
  pub saved: [Option<Value>; 3],
}

/// A value in flight between `throw` and the handler that claims it.
/// Frames that decline to handle it append themselves to the trace.
pub struct Throw {
  pub value: Value,
  pub trace: Vec<TraceFrame>,
}

impl Throw {
  pub fn new(value: Value) -> Throw {
    Throw { value, trace: Vec::new() }
  }

  pub fn msg(message: impl Into<String>) -> Throw {
    Throw::new(Value::str(message.into()))
  }
}

#[derive(Clone, Debug)]
pub struct TraceFrame {
  pub line: u32,
  pub name: String,
}

/// An uncaught throw, as reported to the embedder: the thrown value
/// rendered to a message, plus the call stack it unwound through.
#[derive(Clone, Debug)]
pub struct RuntimeError {
  pub message: String,
  pub trace: Vec<TraceFrame>,
}

impl Display for RuntimeError {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.message)?;
    for frame in &self.trace {
      write!(f, "\n[line {}] in {}", frame.line, frame.name)?;
    }
    Ok(())
  }
}

impl std::error::Error for RuntimeError {}

impl From<Throw> for RuntimeError {
  fn from(throw: Throw) -> Self {
    RuntimeError {
      message: throw.value.to_string(),
      trace: throw.trace,
    }
  }
}

/// Where `print` and friends write. `Vec<u8>` captures output in tests;
/// the default is the process stdout.
pub trait Stdout {
  fn write_all(&mut self, buf: &[u8]) -> io::Result<()>;
  fn as_any(&self) -> &dyn std::any::Any;
}

impl Stdout for io::Stdout {
  fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
    io::Write::write_all(self, buf)
  }

  fn as_any(&self) -> &dyn std::any::Any {
    self
  }
}

impl Stdout for Vec<u8> {
  fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
    self.extend_from_slice(buf);
    Ok(())
  }

  fn as_any(&self) -> &dyn std::any::Any {
    self
  }
}

/// Cloneable handle the host uses to request an interrupt; the VM observes
/// it at loop back-edges, calls, and returns, and raises a runtime error.
#[derive(Clone)]
pub struct Interrupt(Arc<AtomicBool>);

impl Interrupt {
  pub fn trip(&self) {
    self.0.store(true, Ordering::Relaxed);
  }
}

pub struct Vm {
  pub(crate) globals: IndexMap<Ptr<Str>, Value>,
  pub(crate) globals_version: u64,
  pub(crate) modules: IndexMap<String, Value>,
  pub(crate) main: Thread,
  pub(crate) stdout: Box<dyn Stdout>,
  pub(crate) loader: Box<dyn ModuleLoader>,
  pub(crate) interrupt: Arc<AtomicBool>,
}

impl Vm {
  pub fn new(stdout: Box<dyn Stdout>, loader: Box<dyn ModuleLoader>) -> Vm {
    Vm {
      globals: IndexMap::new(),
      globals_version: 1,
      modules: IndexMap::new(),
      main: Thread::new(),
      stdout,
      loader,
      interrupt: Arc::new(AtomicBool::new(false)),
    }
  }

  pub fn interrupt_handle(&self) -> Interrupt {
    Interrupt(self.interrupt.clone())
  }

  pub(crate) fn interrupted(&self) -> bool {
    self.interrupt.swap(false, Ordering::Relaxed)
  }

  pub fn get_global(&self, name: &str) -> Option<Value> {
    self.globals.get(name).cloned()
  }

  pub fn set_global(&mut self, name: Ptr<Str>, value: Value) {
    self.globals.insert(name, value);
    self.globals_version += 1;
  }

  pub fn delete_global(&mut self, name: &str) -> bool {
    let removed = self.globals.shift_remove(name).is_some();
    if removed {
      self.globals_version += 1;
    }
    removed
  }

  /// Run a top-level closure on the main thread and return its result.
  /// On error the main thread is reset so a REPL can keep going.
  pub fn call_main(&mut self, closure: Ptr<Closure>) -> Result<Value, RuntimeError> {
    let mut thread = std::mem::take(&mut self.main);
    thread.stack.borrow_mut().clear();
    thread.frames.clear();
    thread.open_upvalues.clear();

    thread.stack.borrow_mut().push(Value::Closure(closure.clone()));
    thread.frames.push(CallFrame::new(closure, 0));

    match self.run(&mut thread, false) {
      Ok(_) => {
        let value = thread.stack.borrow_mut().pop().unwrap_or(Value::Nil);
        self.main = thread;
        Ok(value)
      }
      Err(throw) => {
        self.main = Thread::new();
        Err(throw.into())
      }
    }
  }
}

/// Capture an open upvalue for `slot`, reusing the existing cell if some
/// other closure already captured the same local.
pub(crate) fn capture_upvalue(thread: &mut Thread, slot: usize) -> Ptr<Upvalue> {
  for upvalue in &thread.open_upvalues {
    if upvalue.open_slot() == Some(slot) {
      return upvalue.clone();
    }
  }
  let upvalue = Upvalue::open(thread.stack.clone(), slot);
  thread.open_upvalues.push(upvalue.clone());
  upvalue
}

/// Close every open upvalue at or above `from`: the value moves from the
/// stack slot into the heap cell.
pub(crate) fn close_upvalues(thread: &mut Thread, from: usize) {
  thread.open_upvalues.retain(|upvalue| {
    match upvalue.open_slot() {
      Some(slot) if slot >= from => {
        upvalue.close();
        false
      }
      _ => true,
    }
  });
}
