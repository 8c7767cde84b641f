//! toi — an indentation-sensitive scripting language.
//!
//! A single-pass compiler turns source text straight into stack bytecode
//! ([`bytecode`]), which a virtual machine with closures, hybrid tables,
//! generators, exceptions, and a module system executes ([`vm`]). [`Toi`]
//! is the embedding surface:
//!
//! ```
//! let toi = toi::Toi::default();
//! let value = toi.eval("fn double(x)\n  return x * 2\nreturn double(21)").unwrap();
//! assert_eq!(value.to_string(), "42");
//! ```

mod builtins;
pub mod bytecode;
mod compiler;
pub mod object;
pub mod value;
pub mod vm;

use std::cell::{Ref, RefCell};
use std::fmt::Display;

pub use diag::Diagnostic;
pub use value::Value;
pub use vm::{FsModuleLoader, Interrupt, ModuleLoader, NoopModuleLoader, RuntimeError, Stdout};

use object::{Closure, Str};
use vm::Vm;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug)]
pub enum Error {
  Compile(Vec<Diagnostic>),
  Runtime(RuntimeError),
}

impl Display for Error {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      Error::Compile(diagnostics) => {
        for (i, diagnostic) in diagnostics.iter().enumerate() {
          if i > 0 {
            writeln!(f)?;
          }
          write!(f, "{diagnostic}")?;
        }
        Ok(())
      }
      Error::Runtime(error) => write!(f, "{error}"),
    }
  }
}

impl std::error::Error for Error {}

impl From<RuntimeError> for Error {
  fn from(value: RuntimeError) -> Self {
    Error::Runtime(value)
  }
}

pub struct Toi {
  vm: RefCell<Vm>,
}

impl Toi {
  pub fn builder() -> ToiBuilder {
    ToiBuilder {
      stdout: None,
      module_loader: None,
      use_builtins: false,
    }
  }

  /// Compile without running.
  pub fn check(&self, src: &str) -> Result<(), Vec<Diagnostic>> {
    compiler::compile(src)?;
    Ok(())
  }

  /// Compile and run a script; returns the script's value.
  pub fn eval(&self, src: &str) -> Result<Value> {
    let function = compiler::compile(src).map_err(Error::Compile)?;
    let closure = Closure::new(function, Vec::new());
    let value = self.vm.borrow_mut().call_main(closure)?;
    Ok(value)
  }

  /// Compile and run one REPL form: top-level assignments define globals
  /// and the result is the last expression's value (for echoing).
  pub fn eval_repl(&self, src: &str) -> Result<Value> {
    let function = compiler::compile_repl(src).map_err(Error::Compile)?;
    let closure = Closure::new(function, Vec::new());
    let value = self.vm.borrow_mut().call_main(closure)?;
    Ok(value)
  }

  /// Run an entry script with its module context installed:
  /// `__name__ = "__main__"`, `__file__` = `path`, `__main__ = true`.
  pub fn run_script(&self, src: &str, path: &str) -> Result<Value> {
    self
      .vm
      .borrow_mut()
      .install_module_context("__main__", path, true);
    self.eval(src)
  }

  /// Compile and render the chunk's disassembly.
  pub fn disassemble(&self, src: &str) -> Result<String, Vec<Diagnostic>> {
    let function = compiler::compile(src)?;
    Ok(function.chunk.disassemble())
  }

  pub fn globals(&self) -> Globals<'_> {
    Globals { toi: self }
  }

  /// Borrow the IO sink, typically to read captured output in tests.
  pub fn io<T: 'static>(&self) -> Option<Ref<'_, T>> {
    Ref::filter_map(self.vm.borrow(), |vm| vm.stdout.as_any().downcast_ref()).ok()
  }

  /// Handle for requesting a cooperative interrupt (e.g. from Ctrl-C).
  pub fn interrupt_handle(&self) -> Interrupt {
    self.vm.borrow().interrupt_handle()
  }
}

impl Default for Toi {
  fn default() -> Self {
    Self::builder().with_builtins().build()
  }
}

pub struct Globals<'a> {
  toi: &'a Toi,
}

impl<'a> Globals<'a> {
  pub fn get(&self, name: &str) -> Option<Value> {
    self.toi.vm.borrow().get_global(name)
  }

  pub fn set(&mut self, name: &str, value: Value) {
    self.toi.vm.borrow_mut().set_global(Str::intern(name), value);
  }
}

pub struct ToiBuilder {
  stdout: Option<Box<dyn Stdout>>,
  module_loader: Option<Box<dyn ModuleLoader>>,
  use_builtins: bool,
}

impl ToiBuilder {
  pub fn with_io<T: Stdout + 'static>(mut self, stdout: T) -> Self {
    let _ = self.stdout.replace(Box::new(stdout));
    self
  }

  pub fn with_module_loader<T: ModuleLoader + 'static>(mut self, loader: T) -> Self {
    let _ = self.module_loader.replace(Box::new(loader));
    self
  }

  pub fn with_builtins(mut self) -> Self {
    self.use_builtins = true;
    self
  }

  pub fn build(mut self) -> Toi {
    let stdout = self
      .stdout
      .take()
      .unwrap_or_else(|| Box::new(std::io::stdout()));
    let module_loader = self
      .module_loader
      .take()
      .unwrap_or_else(|| Box::new(FsModuleLoader::default()));
    let mut vm = Vm::new(stdout, module_loader);

    if self.use_builtins {
      builtins::register(&mut vm);
    }

    Toi {
      vm: RefCell::new(vm),
    }
  }
}

#[cfg(test)]
mod tests;
