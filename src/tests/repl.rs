use crate::{Toi, Value};

fn repl() -> Toi {
  Toi::builder().with_io(Vec::<u8>::new()).with_builtins().build()
}

#[test]
fn expressions_echo_their_value() {
  let toi = repl();
  let value = toi.eval_repl("1 + 2").unwrap();
  assert_eq!(value.to_string(), "3");
}

#[test]
fn assignments_define_globals_and_echo() {
  let toi = repl();
  let value = toi.eval_repl("x = 10").unwrap();
  assert_eq!(value.to_string(), "10");
  // globals persist across lines
  let value = toi.eval_repl("x * 2").unwrap();
  assert_eq!(value.to_string(), "20");
  assert_eq!(toi.globals().get("x").unwrap().to_string(), "10");
}

#[test]
fn statements_echo_nil() {
  let toi = repl();
  let value = toi.eval_repl("fn f(x)\n  return x * x").unwrap();
  assert!(value.is_nil());
  let value = toi.eval_repl("f(5)").unwrap();
  assert_eq!(value.to_string(), "25");
}

#[test]
fn repl_recovers_after_errors() {
  let toi = repl();
  assert!(toi.eval_repl("nonsense +").is_err());
  assert!(toi.eval_repl("undefined_name").is_err());
  let value = toi.eval_repl("40 + 2").unwrap();
  assert_eq!(value.to_string(), "42");
}

#[test]
fn multi_assignment_defines_globals() {
  let toi = repl();
  toi.eval_repl("a, b = 1, 2").unwrap();
  assert_eq!(toi.globals().get("a").unwrap().to_string(), "1");
  assert_eq!(toi.globals().get("b").unwrap().to_string(), "2");
}

#[test]
fn embedder_globals_are_visible() {
  let toi = repl();
  toi.globals().set("answer", Value::Number(42.0));
  let value = toi.eval_repl("answer").unwrap();
  assert_eq!(value.to_string(), "42");
}

#[test]
fn interrupt_stops_execution() {
  let toi = repl();
  toi.interrupt_handle().trip();
  let err = toi.eval("while true\n  x = 1").unwrap_err();
  assert!(err.to_string().contains("Interrupted."));
}

#[test]
fn disassembly_smoke() {
  let toi = repl();
  let listing = toi.disassemble("x = 1 + 2\nprint(x)").unwrap();
  assert!(listing.contains("Constant"));
  assert!(listing.contains("Print"));
  assert!(listing.contains("const pool"));
}
