use super::common::MapLoader;
use crate::Toi;

fn toi_with_modules(modules: &[(&'static str, &'static str)]) -> Toi {
  Toi::builder()
    .with_io(Vec::<u8>::new())
    .with_module_loader(MapLoader::new(modules))
    .with_builtins()
    .build()
}

fn stdout_of(toi: &Toi) -> String {
  let stdout = toi.io::<Vec<u8>>().unwrap();
  String::from_utf8(stdout.clone()).unwrap()
}

const UTIL: &str = "fn double(x)\n  return x * 2\nreturn {double = double}\n";

#[test]
fn import_binds_last_component() {
  let toi = toi_with_modules(&[("util", UTIL)]);
  toi
    .eval("import util\nprint(util.double(21))")
    .expect("eval failed");
  assert_eq!(stdout_of(&toi), "42\n");
}

#[test]
fn from_import_names() {
  let toi = toi_with_modules(&[("util", UTIL)]);
  toi
    .eval("from util import double\nprint(double(4))")
    .expect("eval failed");
  assert_eq!(stdout_of(&toi), "8\n");
}

#[test]
fn from_import_star() {
  let toi = toi_with_modules(&[("util", UTIL)]);
  toi
    .eval("from util import *\nprint(double(5))")
    .expect("eval failed");
  assert_eq!(stdout_of(&toi), "10\n");
}

#[test]
fn module_body_runs_once() {
  let toi = toi_with_modules(&[("m", "print('loaded')\nreturn 7\n")]);
  toi
    .eval("import m\nfn again()\n  import m\n  return m\nprint(again())")
    .expect("eval failed");
  assert_eq!(stdout_of(&toi), "loaded\n7\n");
}

#[test]
fn module_context_installed_during_body() {
  let toi = toi_with_modules(&[("ctxmod", "print(__name__, __main__)\nreturn nil\n")]);
  toi.eval("import ctxmod").expect("eval failed");
  assert_eq!(stdout_of(&toi), "ctxmod false\n");
}

#[test]
fn module_context_restored_after_import() {
  let toi = toi_with_modules(&[("m", "return nil\n")]);
  let err = toi.eval("import m\nprint(__name__)").unwrap_err();
  // the caller had no module context, so the key is absent again
  assert!(err.to_string().contains("Undefined variable '__name__'"));
}

#[test]
fn entry_script_context() {
  let toi = toi_with_modules(&[]);
  toi
    .run_script("print(__name__, __main__)", "main.toi")
    .expect("eval failed");
  assert_eq!(stdout_of(&toi), "__main__ true\n");
}

#[test]
fn dotted_path_resolution() {
  let toi = toi_with_modules(&[("a.b", "return {value = 9}\n")]);
  toi
    .eval("import a.b\nprint(b.value)")
    .expect("eval failed");
  assert_eq!(stdout_of(&toi), "9\n");
}

#[test]
fn missing_module_is_a_runtime_error() {
  let toi = toi_with_modules(&[]);
  let err = toi.eval("import nope").unwrap_err();
  assert!(err.to_string().contains("Could not open module 'nope'"));
}

#[test]
fn import_expression_form() {
  let toi = toi_with_modules(&[]);
  toi
    .eval("print((import string).format('%03d', 5))")
    .expect("eval failed");
  assert_eq!(stdout_of(&toi), "005\n");
}

#[test]
fn native_math_module() {
  let toi = toi_with_modules(&[]);
  toi
    .eval("import math\nprint(math.floor(2.7), math.abs(0 - 3), math.pow(2, 10))")
    .expect("eval failed");
  assert_eq!(stdout_of(&toi), "2 3 1024\n");
}

#[test]
fn fs_loader_resolution_order() {
  use crate::vm::ModuleLoader;

  let dir = std::env::temp_dir().join(format!("toi-mod-test-{}", std::process::id()));
  let _ = std::fs::create_dir_all(dir.join("pkg"));
  std::fs::write(dir.join("pkg/__.toi"), "return {tag = 'pkg'}\n").unwrap();
  std::fs::write(dir.join("solo.toi"), "return {tag = 'solo'}\n").unwrap();

  let mut loader = crate::FsModuleLoader::new(dir.clone());
  let (source, file) = loader.load("solo").unwrap();
  assert!(source.contains("solo"));
  assert!(file.ends_with("solo.toi"));

  let (_, file) = loader.load("pkg").unwrap();
  assert!(file.ends_with("__.toi"));

  assert!(loader.load("absent").is_err());

  let _ = std::fs::remove_dir_all(&dir);
}
