//! `Import` / module loading.
//!
//! Resolution order: the VM's module cache, then native modules, then the
//! filesystem candidates `<p>.toi`, `<p>/__.toi`, `lib/<p>.toi`,
//! `lib/<p>/__.toi` (dots become slashes). A loaded module's body runs as
//! a zero-argument call whose frame is marked to cache the result and
//! restore the caller's module context on return.

use std::fmt::Write as _;
use std::path::PathBuf;

use super::{fail, CallFrame, ModuleReturn, Throw, Thread, Vm};
use crate::builtins;
use crate::object::{Closure, Ptr, Str};
use crate::value::Value;

/// The module-context globals installed around a module body.
pub const MODULE_NAME_KEY: &str = "__name__";
pub const MODULE_FILE_KEY: &str = "__file__";
pub const MODULE_MAIN_KEY: &str = "__main__";

/// Resolves a dotted module path to source text.
pub trait ModuleLoader {
  /// On success returns `(source, resolved_filename)`.
  fn load(&mut self, path: &str) -> Result<(String, String), String>;
}

/// Refuses to load anything; the default for embedders that do not want
/// scripts touching the filesystem.
pub struct NoopModuleLoader;

impl ModuleLoader for NoopModuleLoader {
  fn load(&mut self, path: &str) -> Result<(String, String), String> {
    Err(format!("could not load module `{path}`"))
  }
}

/// Filesystem loader rooted at a directory (the current directory for the
/// CLI, the script's directory for `toi run`).
pub struct FsModuleLoader {
  pub root: PathBuf,
}

impl FsModuleLoader {
  pub fn new(root: impl Into<PathBuf>) -> FsModuleLoader {
    FsModuleLoader { root: root.into() }
  }
}

impl Default for FsModuleLoader {
  fn default() -> Self {
    FsModuleLoader::new(".")
  }
}

impl ModuleLoader for FsModuleLoader {
  fn load(&mut self, path: &str) -> Result<(String, String), String> {
    let slashed = path.replace('.', "/");
    let candidates = [
      format!("{slashed}.toi"),
      format!("{slashed}/__.toi"),
      format!("lib/{slashed}.toi"),
      format!("lib/{slashed}/__.toi"),
    ];
    for candidate in &candidates {
      let full = self.root.join(candidate);
      if let Ok(source) = std::fs::read_to_string(&full) {
        return Ok((source, full.to_string_lossy().into_owned()));
      }
    }
    Err(format!(
      "Could not open module '{path}' (tried '{}', '{}', '{}', and '{}').",
      candidates[0], candidates[1], candidates[2], candidates[3]
    ))
  }
}

impl Vm {
  pub(crate) fn op_import(&mut self, thread: &mut Thread, name: &Ptr<Str>) -> Result<(), Throw> {
    if let Some(cached) = self.modules.get(name.as_str()).cloned() {
      thread.stack.borrow_mut().push(cached);
      return Ok(());
    }

    if let Some(module) = builtins::native_module(name.as_str()) {
      self.modules.insert(name.to_string(), module.clone());
      thread.stack.borrow_mut().push(module);
      return Ok(());
    }

    let (source, filename) = self.loader.load(name.as_str()).map_err(Throw::msg)?;

    let function = match crate::compiler::compile(&source) {
      Ok(function) => function,
      Err(diagnostics) => {
        let mut message = format!("Failed to compile module '{name}'.");
        for diagnostic in diagnostics {
          let _ = write!(message, "\n{diagnostic}");
        }
        fail!("{message}");
      }
    };
    let closure = Closure::new(function, Vec::new());

    let base = thread.stack.borrow().len();
    thread.stack.borrow_mut().push(Value::Closure(closure.clone()));

    let saved = self.save_module_context();
    self.install_module_context(name.as_str(), &filename, false);

    let mut frame = CallFrame::new(closure, base);
    frame.module_return = Some(ModuleReturn {
      name: name.to_string(),
      saved,
    });
    thread.frames.push(frame);
    Ok(())
  }

  pub(crate) fn save_module_context(&self) -> [Option<Value>; 3] {
    [
      self.get_global(MODULE_NAME_KEY),
      self.get_global(MODULE_FILE_KEY),
      self.get_global(MODULE_MAIN_KEY),
    ]
  }

  pub(crate) fn install_module_context(&mut self, name: &str, file: &str, main: bool) {
    self.set_global(Str::intern(MODULE_NAME_KEY), Value::str(name));
    self.set_global(Str::intern(MODULE_FILE_KEY), Value::str(file));
    self.set_global(Str::intern(MODULE_MAIN_KEY), Value::Bool(main));
  }

  pub(crate) fn restore_module_context(&mut self, saved: [Option<Value>; 3]) {
    let keys = [MODULE_NAME_KEY, MODULE_FILE_KEY, MODULE_MAIN_KEY];
    for (key, value) in keys.into_iter().zip(saved) {
      match value {
        Some(value) => self.set_global(Str::intern(key), value),
        None => {
          self.delete_global(key);
        }
      }
    }
  }

  /// Runs when a module-body frame returns normally: cache the module's
  /// value and put the caller's context back.
  pub(crate) fn finish_module(&mut self, module: ModuleReturn, value: Value) {
    self.modules.insert(module.name, value);
    self.restore_module_context(module.saved);
  }
}
