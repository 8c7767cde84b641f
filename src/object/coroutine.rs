use std::cell::RefCell;
use std::fmt::{Debug, Display};

use super::ptr::Ptr;
use crate::vm::Thread;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CoroutineStatus {
  Suspended,
  Running,
  Dead,
}

/// A suspendable execution context.
///
/// Calling a generator function produces one of these instead of running
/// the body; `coroutine.resume` (and the `for` iteration protocol) drives
/// it. The coroutine owns its whole thread — value stack, frames, open
/// upvalues — which is parked here while suspended and temporarily moved
/// into the VM while running.
pub struct Coroutine {
  status: RefCell<CoroutineStatus>,
  thread: RefCell<Option<Thread>>,
}

impl Coroutine {
  pub fn new(thread: Thread) -> Ptr<Coroutine> {
    Ptr::new(Coroutine {
      status: RefCell::new(CoroutineStatus::Suspended),
      thread: RefCell::new(Some(thread)),
    })
  }

  pub fn status(&self) -> CoroutineStatus {
    *self.status.borrow()
  }

  pub fn set_status(&self, status: CoroutineStatus) {
    *self.status.borrow_mut() = status;
  }

  /// Take the thread out to run it. Returns `None` while it is already
  /// running (re-entrant resume) or after death.
  pub fn take_thread(&self) -> Option<Thread> {
    self.thread.borrow_mut().take()
  }

  pub fn park_thread(&self, thread: Thread) {
    *self.thread.borrow_mut() = Some(thread);
  }
}

impl Display for Coroutine {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "<coroutine>")
  }
}

impl Debug for Coroutine {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Coroutine")
      .field("status", &self.status())
      .finish()
  }
}
