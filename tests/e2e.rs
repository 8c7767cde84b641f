use toi::{Toi, Value};

#[test]
fn toi_e2e() {
  let toi = Toi::builder().with_io(Vec::<u8>::new()).with_builtins().build();

  toi.globals().set("limit", Value::Number(10.0));

  let value = toi
    .eval(
      r#"
fn evens_below(n)
  t = {x for x in 1..n if x % 2 == 0}
  return t

total = 0
for v in evens_below(limit)
  total += v
print(f"total={total}")
return total
"#,
    )
    .unwrap();

  assert_eq!(value.to_string(), "30");
  let stdout = toi.io::<Vec<u8>>().unwrap();
  assert_eq!(std::str::from_utf8(&stdout[..]).unwrap(), "total=30\n");
}

#[test]
fn errors_surface_with_traces() {
  let toi = Toi::builder().with_io(Vec::<u8>::new()).with_builtins().build();
  let err = toi
    .eval("fn inner()\n  throw 'kaboom'\nfn outer()\n  inner()\nouter()")
    .unwrap_err();
  let rendered = err.to_string();
  assert!(rendered.contains("kaboom"));
  assert!(rendered.contains("in inner()"));
  assert!(rendered.contains("in outer()"));
  assert!(rendered.contains("in <script>"));
}
