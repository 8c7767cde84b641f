use std::collections::HashMap;

use crate::ModuleLoader;

/// Run a script and compare captured stdout against the expectation.
macro_rules! check {
  ($name:ident, $input:literal, $expected:literal) => {
    #[test]
    fn $name() {
      let input = indoc::indoc!($input);
      let expected = indoc::indoc!($expected);
      let toi = crate::Toi::builder().with_io(Vec::<u8>::new()).with_builtins().build();
      match toi.eval(input) {
        Ok(_) => {
          let stdout = toi.io::<Vec<u8>>().unwrap();
          let stdout = std::str::from_utf8(&stdout[..]).unwrap();
          assert_eq!(stdout, expected, "stdout mismatch for:\n{input}");
        }
        Err(error) => panic!("eval failed:\n{error}\nfor input:\n{input}"),
      }
    }
  };
}

/// Run a script, expect a runtime error whose message contains `$message`.
macro_rules! check_error {
  ($name:ident, $input:literal, $message:literal) => {
    #[test]
    fn $name() {
      let input = indoc::indoc!($input);
      let toi = crate::Toi::builder().with_io(Vec::<u8>::new()).with_builtins().build();
      match toi.eval(input) {
        Ok(value) => panic!("unexpected eval success, value={value}, input:\n{input}"),
        Err(crate::Error::Runtime(error)) => {
          assert!(
            error.message.contains($message),
            "runtime error `{}` does not contain `{}`",
            error.message,
            $message
          );
        }
        Err(crate::Error::Compile(diagnostics)) => {
          panic!("expected runtime error, got compile errors: {diagnostics:?}")
        }
      }
    }
  };
}

/// Compile-only failure whose first diagnostic contains `$message`.
macro_rules! check_compile_error {
  ($name:ident, $input:literal, $message:literal) => {
    #[test]
    fn $name() {
      let input = indoc::indoc!($input);
      let toi = crate::Toi::default();
      match toi.check(input) {
        Ok(()) => panic!("unexpected compile success for:\n{input}"),
        Err(diagnostics) => {
          assert!(!diagnostics.is_empty());
          let rendered = diagnostics[0].to_string();
          assert!(
            rendered.contains($message),
            "diagnostic `{rendered}` does not contain `{}`",
            $message
          );
        }
      }
    }
  };
}

/// In-memory module loader for import tests.
pub struct MapLoader {
  modules: HashMap<&'static str, &'static str>,
}

impl MapLoader {
  pub fn new(modules: &[(&'static str, &'static str)]) -> MapLoader {
    MapLoader {
      modules: modules.iter().copied().collect(),
    }
  }
}

impl ModuleLoader for MapLoader {
  fn load(&mut self, path: &str) -> Result<(String, String), String> {
    match self.modules.get(path) {
      Some(source) => Ok((source.to_string(), format!("{path}.toi"))),
      None => Err(format!("Could not open module '{path}'.")),
    }
  }
}
