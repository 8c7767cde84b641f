//! Global native functions and the built-in native modules.

use crate::object::{
  Coroutine, CoroutineStatus, Key, NativeFlow, NativeFunction, Ptr, Str, Table,
};
use crate::value::{format_number, Value};
use crate::vm::{fail, Throw, Vm};

/// Install the global builtins into a fresh VM.
pub fn register(vm: &mut Vm) {
  fn global(vm: &mut Vm, name: &'static str, f: fn(&mut Vm, &[Value]) -> Result<NativeFlow, Throw>) {
    vm.set_global(Str::intern(name), Value::Native(NativeFunction::new(name, f)));
  }

  global(vm, "type", native_type);
  global(vm, "str", native_str);
  global(vm, "bool", native_bool);
  global(vm, "int", native_int);
  global(vm, "float", native_float);
  global(vm, "next", native_next);
  global(vm, "inext", native_inext);
  global(vm, "range", native_range);
  global(vm, "min", native_min);
  global(vm, "max", native_max);
  global(vm, "sum", native_sum);
  global(vm, "setmetatable", native_setmetatable);
  global(vm, "getmetatable", native_getmetatable);
  global(vm, "error", native_error);
  global(vm, "exit", native_exit);
  global(vm, "input", native_input);

  // `yield` resolves `coroutine.yield` through the globals, and sharing
  // the instance with the module cache keeps `import coroutine` aligned
  let coroutine = native_module("coroutine").expect("coroutine module");
  vm.modules.insert(String::from("coroutine"), coroutine.clone());
  vm.set_global(Str::intern("coroutine"), coroutine);
}

/// Built-in modules importable by name.
pub fn native_module(name: &str) -> Option<Value> {
  match name {
    "string" => Some(string_module()),
    "coroutine" => Some(coroutine_module()),
    "math" => Some(math_module()),
    _ => None,
  }
}

fn module_fn(
  table: &Ptr<Table>,
  name: &'static str,
  f: impl Fn(&mut Vm, &[Value]) -> Result<NativeFlow, Throw> + 'static,
) {
  table.insert(
    Key::Str(Str::intern(name)),
    Value::Native(NativeFunction::new(name, f)),
  );
}

// ---- argument helpers ----

fn arg_number(args: &[Value], index: usize, who: &str) -> Result<f64, Throw> {
  match args.get(index).and_then(|v| v.as_number()) {
    Some(n) => Ok(n),
    None => fail!("{who}: expected a number for argument {}.", index + 1),
  }
}

fn arg_str(args: &[Value], index: usize, who: &str) -> Result<Ptr<Str>, Throw> {
  match args.get(index) {
    Some(Value::Str(s)) => Ok(s.clone()),
    _ => fail!("{who}: expected a string for argument {}.", index + 1),
  }
}

fn arg_table(args: &[Value], index: usize, who: &str) -> Result<Ptr<Table>, Throw> {
  match args.get(index) {
    Some(Value::Table(t)) => Ok(t.clone()),
    _ => fail!("{who}: expected a table for argument {}.", index + 1),
  }
}

fn arg_coroutine(args: &[Value], index: usize, who: &str) -> Result<Ptr<Coroutine>, Throw> {
  match args.get(index) {
    Some(Value::Coroutine(c)) => Ok(c.clone()),
    _ => fail!("{who}: expected a coroutine for argument {}.", index + 1),
  }
}

// ---- iteration primitives (also used by IterPrep/Range) ----

/// `next(t, k)` — the entry after `k` in iteration order, `(nil, nil)` at
/// the end. Keyed `for` loops call this.
pub fn native_next(_vm: &mut Vm, args: &[Value]) -> Result<NativeFlow, Throw> {
  let table = arg_table(args, 0, "next")?;
  let control = match args.get(1) {
    None | Some(Value::Nil) => None,
    Some(v) => Some(Key::from_value(v).map_err(Throw::msg)?),
  };
  match table.next_entry(control.as_ref()) {
    Some((key, value)) => Ok(NativeFlow::Values(vec![key.to_value(), value])),
    None => Ok(NativeFlow::Values(vec![Value::Nil, Value::Nil])),
  }
}

/// `inext(t, i)` — `(i+1, t[i+1])` while the array part lasts.
pub fn native_inext(_vm: &mut Vm, args: &[Value]) -> Result<NativeFlow, Throw> {
  let table = arg_table(args, 0, "inext")?;
  let control = args.get(1).and_then(|v| v.as_number()).unwrap_or(0.0);
  let next = control + 1.0;
  match table.get(&Key::Number(next)) {
    Some(value) => Ok(NativeFlow::Values(vec![Value::Number(next), value])),
    None => Ok(NativeFlow::Values(vec![Value::Nil, Value::Nil])),
  }
}

/// Step function of the `Range` opcode's iterator triple.
pub fn range_iter(_vm: &mut Vm, args: &[Value]) -> Result<NativeFlow, Throw> {
  let end = arg_number(args, 0, "range")?;
  let control = arg_number(args, 1, "range")?;
  let next = control + 1.0;
  if next <= end {
    Ok(NativeFlow::Values(vec![Value::Number(next), Value::Number(next)]))
  } else {
    Ok(NativeFlow::Values(vec![Value::Nil, Value::Nil]))
  }
}

/// Step function for iterating a coroutine: resume and pair the yielded
/// value with an iteration counter (or pass `(k, v)` yields through).
pub fn generator_next(vm: &mut Vm, args: &[Value]) -> Result<NativeFlow, Throw> {
  let coroutine = arg_coroutine(args, 0, "next")?;
  let control = args.get(1).and_then(|v| v.as_number()).unwrap_or(0.0);
  if coroutine.status() == CoroutineStatus::Dead {
    return Ok(NativeFlow::Values(vec![Value::Nil, Value::Nil]));
  }
  let (values, done) = vm.resume(&coroutine, &[])?;
  if done {
    return Ok(NativeFlow::Values(vec![Value::Nil, Value::Nil]));
  }
  let n = Value::Number(control + 1.0);
  let out = match values.len() {
    0 => vec![n, Value::Nil],
    1 => vec![n, values[0].clone()],
    _ => vec![values[0].clone(), values[1].clone()],
  };
  Ok(NativeFlow::Values(out))
}

// ---- globals ----

fn native_type(_vm: &mut Vm, args: &[Value]) -> Result<NativeFlow, Throw> {
  match args.first() {
    Some(value) => Ok(NativeFlow::value(Value::str(value.type_name()))),
    None => fail!("type: expected 1 argument."),
  }
}

fn native_str(_vm: &mut Vm, args: &[Value]) -> Result<NativeFlow, Throw> {
  match args.first() {
    Some(value) => Ok(NativeFlow::value(Value::str(value.to_string()))),
    None => fail!("str: expected 1 argument."),
  }
}

fn native_bool(_vm: &mut Vm, args: &[Value]) -> Result<NativeFlow, Throw> {
  match args.first() {
    Some(value) => Ok(NativeFlow::value(Value::Bool(value.is_truthy()))),
    None => fail!("bool: expected 1 argument."),
  }
}

fn native_int(_vm: &mut Vm, args: &[Value]) -> Result<NativeFlow, Throw> {
  match args.first() {
    Some(Value::Number(n)) => Ok(NativeFlow::value(Value::Number(n.trunc()))),
    Some(Value::Str(s)) => match s.trim().parse::<f64>() {
      Ok(n) => Ok(NativeFlow::value(Value::Number(n.trunc()))),
      Err(_) => fail!("int: cannot convert '{s}' to a number."),
    },
    Some(Value::Bool(b)) => Ok(NativeFlow::value(Value::Number(*b as u8 as f64))),
    _ => fail!("int: expected a number or string."),
  }
}

fn native_float(_vm: &mut Vm, args: &[Value]) -> Result<NativeFlow, Throw> {
  match args.first() {
    Some(Value::Number(n)) => Ok(NativeFlow::value(Value::Number(*n))),
    Some(Value::Str(s)) => match s.trim().parse::<f64>() {
      Ok(n) => Ok(NativeFlow::value(Value::Number(n))),
      Err(_) => fail!("float: cannot convert '{s}' to a number."),
    },
    _ => fail!("float: expected a number or string."),
  }
}

/// `range(a, b)` — an array table of the numbers `a..=b`.
fn native_range(_vm: &mut Vm, args: &[Value]) -> Result<NativeFlow, Throw> {
  let start = arg_number(args, 0, "range")?;
  let end = arg_number(args, 1, "range")?;
  let table = Table::new();
  let mut n = start;
  while n <= end {
    table.push(Value::Number(n));
    n += 1.0;
  }
  Ok(NativeFlow::value(Value::Table(table)))
}

fn fold_numbers(args: &[Value], who: &str) -> Result<Vec<f64>, Throw> {
  // either a single array table or plain numeric arguments
  if args.len() == 1 {
    if let Value::Table(t) = &args[0] {
      let mut out = Vec::new();
      for i in 1..=t.array_len() {
        match t.get(&Key::int(i)).and_then(|v| v.as_number()) {
          Some(n) => out.push(n),
          None => fail!("{who}: table element {i} is not a number."),
        }
      }
      return Ok(out);
    }
  }
  let mut out = Vec::new();
  for (i, value) in args.iter().enumerate() {
    match value.as_number() {
      Some(n) => out.push(n),
      None => fail!("{who}: expected a number for argument {}.", i + 1),
    }
  }
  Ok(out)
}

fn native_min(_vm: &mut Vm, args: &[Value]) -> Result<NativeFlow, Throw> {
  let numbers = fold_numbers(args, "min")?;
  match numbers.into_iter().reduce(f64::min) {
    Some(n) => Ok(NativeFlow::value(Value::Number(n))),
    None => fail!("min: expected at least 1 value."),
  }
}

fn native_max(_vm: &mut Vm, args: &[Value]) -> Result<NativeFlow, Throw> {
  let numbers = fold_numbers(args, "max")?;
  match numbers.into_iter().reduce(f64::max) {
    Some(n) => Ok(NativeFlow::value(Value::Number(n))),
    None => fail!("max: expected at least 1 value."),
  }
}

fn native_sum(_vm: &mut Vm, args: &[Value]) -> Result<NativeFlow, Throw> {
  let numbers = fold_numbers(args, "sum")?;
  Ok(NativeFlow::value(Value::Number(numbers.into_iter().sum())))
}

fn native_setmetatable(_vm: &mut Vm, args: &[Value]) -> Result<NativeFlow, Throw> {
  let table = arg_table(args, 0, "setmetatable")?;
  match args.get(1) {
    Some(Value::Table(meta)) => table.set_metatable(Some(meta.clone())),
    Some(Value::Nil) => table.set_metatable(None),
    _ => fail!("setmetatable: expected a table or nil for argument 2."),
  }
  Ok(NativeFlow::value(Value::Table(table)))
}

fn native_getmetatable(_vm: &mut Vm, args: &[Value]) -> Result<NativeFlow, Throw> {
  let table = arg_table(args, 0, "getmetatable")?;
  Ok(NativeFlow::value(
    table.metatable().map(Value::Table).unwrap_or(Value::Nil),
  ))
}

fn native_error(_vm: &mut Vm, args: &[Value]) -> Result<NativeFlow, Throw> {
  Err(Throw::new(args.first().cloned().unwrap_or(Value::Nil)))
}

fn native_exit(_vm: &mut Vm, args: &[Value]) -> Result<NativeFlow, Throw> {
  let code = args.first().and_then(|v| v.as_number()).unwrap_or(0.0);
  std::process::exit(code as i32);
}

fn native_input(vm: &mut Vm, args: &[Value]) -> Result<NativeFlow, Throw> {
  if let Some(prompt) = args.first() {
    if vm.stdout.write_all(prompt.to_string().as_bytes()).is_err() {
      fail!("input: failed to write prompt.");
    }
  }
  let mut line = String::new();
  match std::io::stdin().read_line(&mut line) {
    Ok(0) => Ok(NativeFlow::nil()),
    Ok(_) => {
      let line = line.strip_suffix('\n').unwrap_or(&line);
      let line = line.strip_suffix('\r').unwrap_or(line);
      Ok(NativeFlow::value(Value::str(line)))
    }
    Err(_) => fail!("input: failed to read from stdin."),
  }
}

// ---- string module ----

fn string_module() -> Value {
  let table = Table::new();
  module_fn(&table, "format", string_format);
  module_fn(&table, "upper", |_vm, args| {
    let s = arg_str(args, 0, "upper")?;
    Ok(NativeFlow::value(Value::str(s.to_uppercase())))
  });
  module_fn(&table, "lower", |_vm, args| {
    let s = arg_str(args, 0, "lower")?;
    Ok(NativeFlow::value(Value::str(s.to_lowercase())))
  });
  module_fn(&table, "len", |_vm, args| {
    let s = arg_str(args, 0, "len")?;
    Ok(NativeFlow::value(Value::Number(s.chars().count() as f64)))
  });
  module_fn(&table, "sub", |_vm, args| {
    let s = arg_str(args, 0, "sub")?;
    let chars: Vec<char> = s.chars().collect();
    let len = chars.len() as i64;
    let resolve = |n: f64| -> i64 {
      let n = n as i64;
      if n < 0 {
        len + n + 1
      } else {
        n
      }
    };
    let i = resolve(arg_number(args, 1, "sub")?).max(1);
    let j = resolve(args.get(2).and_then(|v| v.as_number()).unwrap_or(len as f64)).min(len);
    let out: String = if i > j {
      String::new()
    } else {
      chars[(i - 1) as usize..j as usize].iter().collect()
    };
    Ok(NativeFlow::value(Value::str(out)))
  });
  module_fn(&table, "split", |_vm, args| {
    let s = arg_str(args, 0, "split")?;
    let sep = arg_str(args, 1, "split")?;
    let out = Table::new();
    if sep.is_empty() {
      for c in s.chars() {
        out.push(Value::str(c.to_string()));
      }
    } else {
      for part in s.split(sep.as_str()) {
        out.push(Value::str(part));
      }
    }
    Ok(NativeFlow::value(Value::Table(out)))
  });
  module_fn(&table, "join", |_vm, args| {
    let sep = arg_str(args, 0, "join")?;
    let parts = arg_table(args, 1, "join")?;
    let mut out = String::new();
    for i in 1..=parts.array_len() {
      if i > 1 {
        out.push_str(sep.as_str());
      }
      let part = parts.get(&Key::int(i)).unwrap_or(Value::Nil);
      out.push_str(&part.to_string());
    }
    Ok(NativeFlow::value(Value::str(out)))
  });
  Value::Table(table)
}

/// C-style `%` formatting, the subset f-string `|spec`s rely on.
fn string_format(_vm: &mut Vm, args: &[Value]) -> Result<NativeFlow, Throw> {
  let format = arg_str(args, 0, "format")?;
  let chars: Vec<char> = format.chars().collect();
  let mut out = String::new();
  let mut arg_index = 1;
  let mut i = 0;

  while i < chars.len() {
    if chars[i] != '%' {
      out.push(chars[i]);
      i += 1;
      continue;
    }
    i += 1;
    if i >= chars.len() {
      fail!("format: incomplete specifier at end of format string.");
    }
    if chars[i] == '%' {
      out.push('%');
      i += 1;
      continue;
    }

    let mut minus = false;
    let mut zero = false;
    let mut plus = false;
    loop {
      match chars.get(i) {
        Some('-') => minus = true,
        Some('0') => zero = true,
        Some('+') => plus = true,
        Some(' ') => {}
        _ => break,
      }
      i += 1;
    }
    let mut width = 0usize;
    while let Some(c) = chars.get(i).filter(|c| c.is_ascii_digit()) {
      width = width * 10 + (*c as u8 - b'0') as usize;
      i += 1;
    }
    let mut precision: Option<usize> = None;
    if chars.get(i) == Some(&'.') {
      i += 1;
      let mut p = 0usize;
      while let Some(c) = chars.get(i).filter(|c| c.is_ascii_digit()) {
        p = p * 10 + (*c as u8 - b'0') as usize;
        i += 1;
      }
      precision = Some(p);
    }
    let Some(&conv) = chars.get(i) else {
      fail!("format: incomplete specifier at end of format string.");
    };
    i += 1;

    let arg = args.get(arg_index).cloned().unwrap_or(Value::Nil);
    arg_index += 1;

    let number = |who: &str| -> Result<f64, Throw> {
      match arg.as_number() {
        Some(n) => Ok(n),
        None => fail!("format: %{who} expects a number, got a {}.", arg.type_name()),
      }
    };

    let mut piece = match conv {
      'd' | 'i' | 'u' => {
        let n = number("d")? as i64;
        if plus && n >= 0 {
          format!("+{n}")
        } else {
          format!("{n}")
        }
      }
      'f' | 'F' => {
        let n = number("f")?;
        let p = precision.unwrap_or(6);
        if plus && n >= 0.0 {
          format!("+{n:.p$}")
        } else {
          format!("{n:.p$}")
        }
      }
      'e' => format!("{:e}", number("e")?),
      'g' => format_number(number("g")?),
      'x' => format!("{:x}", number("x")? as i64),
      'X' => format!("{:X}", number("X")? as i64),
      'o' => format!("{:o}", number("o")? as i64),
      'c' => {
        let n = number("c")? as u32;
        char::from_u32(n).map(String::from).unwrap_or_default()
      }
      's' => {
        let mut s = arg.to_string();
        if let Some(p) = precision {
          s.truncate(p);
        }
        s
      }
      other => fail!("format: unknown specifier '%{other}'."),
    };

    if piece.len() < width {
      let pad = width - piece.len();
      if minus {
        piece.extend(std::iter::repeat(' ').take(pad));
      } else if zero && matches!(conv, 'd' | 'i' | 'u' | 'f' | 'F' | 'x' | 'X' | 'o') {
        let (sign, digits) = match piece.strip_prefix(|c| c == '-' || c == '+') {
          Some(rest) => (&piece[..1], rest),
          None => ("", piece.as_str()),
        };
        piece = format!("{sign}{}{digits}", "0".repeat(pad));
      } else {
        piece = format!("{}{piece}", " ".repeat(pad));
      }
    }
    out.push_str(&piece);
  }

  Ok(NativeFlow::value(Value::str(out)))
}

// ---- coroutine module ----

fn coroutine_module() -> Value {
  let table = Table::new();
  module_fn(&table, "create", |vm, args| {
    let Some(Value::Closure(closure)) = args.first() else {
      fail!("create: expected a function.");
    };
    let coroutine = vm.create_coroutine(closure, &args[1..])?;
    Ok(NativeFlow::value(Value::Coroutine(coroutine)))
  });
  module_fn(&table, "resume", |vm, args| {
    let coroutine = arg_coroutine(args, 0, "resume")?;
    let (values, _done) = vm.resume(&coroutine, &args[1..])?;
    if values.is_empty() {
      Ok(NativeFlow::nil())
    } else {
      Ok(NativeFlow::Values(values))
    }
  });
  module_fn(&table, "yield", |_vm, args| Ok(NativeFlow::Yield(args.to_vec())));
  module_fn(&table, "status", |_vm, args| {
    let coroutine = arg_coroutine(args, 0, "status")?;
    let status = match coroutine.status() {
      CoroutineStatus::Suspended => "suspended",
      CoroutineStatus::Running => "running",
      CoroutineStatus::Dead => "dead",
    };
    Ok(NativeFlow::value(Value::str(status)))
  });
  module_fn(&table, "wrap", |vm, args| {
    let Some(Value::Closure(closure)) = args.first() else {
      fail!("wrap: expected a function.");
    };
    let coroutine = vm.create_coroutine(closure, &args[1..])?;
    let wrapped = NativeFunction::new("wrapped", move |vm: &mut Vm, args: &[Value]| {
      let (values, _done) = vm.resume(&coroutine, args)?;
      if values.is_empty() {
        Ok(NativeFlow::nil())
      } else {
        Ok(NativeFlow::Values(values))
      }
    });
    Ok(NativeFlow::value(Value::Native(wrapped)))
  });
  Value::Table(table)
}

// ---- math module ----

fn math_module() -> Value {
  let table = Table::new();
  table.insert(Key::Str(Str::intern("pi")), Value::Number(std::f64::consts::PI));
  table.insert(Key::Str(Str::intern("huge")), Value::Number(f64::INFINITY));
  module_fn(&table, "floor", |_vm, args| {
    Ok(NativeFlow::value(Value::Number(arg_number(args, 0, "floor")?.floor())))
  });
  module_fn(&table, "ceil", |_vm, args| {
    Ok(NativeFlow::value(Value::Number(arg_number(args, 0, "ceil")?.ceil())))
  });
  module_fn(&table, "abs", |_vm, args| {
    Ok(NativeFlow::value(Value::Number(arg_number(args, 0, "abs")?.abs())))
  });
  module_fn(&table, "sqrt", |_vm, args| {
    Ok(NativeFlow::value(Value::Number(arg_number(args, 0, "sqrt")?.sqrt())))
  });
  module_fn(&table, "pow", |_vm, args| {
    let base = arg_number(args, 0, "pow")?;
    let exp = arg_number(args, 1, "pow")?;
    Ok(NativeFlow::value(Value::Number(base.powf(exp))))
  });
  Value::Table(table)
}
