//! F-string expansion.
//!
//! An f-string token is re-scanned here: literal fragments become string
//! constants, `{expr}` substitutions compile as expressions (with a fast
//! path for `name` and `name % int`), and `{expr|spec}` lowers to
//! `(import string).format("spec", (expr))`. The parts are assembled with
//! `BuildString`.

use super::Session;
use crate::bytecode::Opcode;
use crate::object::TypeHint;
use crate::value::Value;

impl<'src> Session<'src> {
  pub(crate) fn fstring(&mut self, _can_assign: bool) {
    let base_top = self.state.type_stack.len();
    let token = self.previous;
    let src = self.src;
    let lexeme = &src[token.span.range()];

    let body = if let Some(inner) = lexeme.strip_prefix("f[[").and_then(|s| s.strip_suffix("]]")) {
      inner
    } else if lexeme.len() >= 3 && (lexeme.starts_with("f\"") || lexeme.starts_with("f'")) {
      &lexeme[2..lexeme.len() - 1]
    } else {
      self.error("Invalid f-string token.");
      self.type_set_len(base_top);
      self.type_push(TypeHint::Str);
      return;
    };

    let bytes = body.as_bytes();
    let mut part_count: usize = 0;
    let mut i = 0;

    while i < bytes.len() {
      // literal fragment up to the next unescaped `{`
      let start = i;
      while i < bytes.len() && bytes[i] != b'{' {
        if bytes[i] == b'\\' && i + 1 < bytes.len() {
          i += 1;
        }
        i += 1;
      }
      if i > start {
        let literal = decode_fstring_literal(&body[start..i]);
        self.emit_constant(Value::str(literal));
        part_count += 1;
      }

      if i < bytes.len() && bytes[i] == b'{' {
        i += 1;
        let expr_start = i;
        let mut depth = 1;
        while i < bytes.len() && depth > 0 {
          // raw strings, comments, and quoted strings hide their braces
          if bytes[i] == b'[' && bytes.get(i + 1) == Some(&b'[') {
            i += 2;
            while i < bytes.len() && !(bytes[i] == b']' && bytes.get(i + 1) == Some(&b']')) {
              i += 1;
            }
            if i < bytes.len() {
              i += 2;
            }
            continue;
          }
          if bytes[i] == b'-' && bytes.get(i + 1) == Some(&b'-') {
            i += 2;
            while i < bytes.len() && bytes[i] != b'\n' {
              i += 1;
            }
            continue;
          }
          if bytes[i] == b'"' || bytes[i] == b'\'' {
            let quote = bytes[i];
            i += 1;
            while i < bytes.len() {
              if bytes[i] == b'\\' && i + 1 < bytes.len() {
                i += 2;
                continue;
              }
              if bytes[i] == quote {
                i += 1;
                break;
              }
              i += 1;
            }
            continue;
          }
          if bytes[i] == b'\\' {
            i = (i + 2).min(bytes.len());
            continue;
          }

          if bytes[i] == b'{' {
            depth += 1;
          } else if bytes[i] == b'}' {
            depth -= 1;
          }
          if depth > 0 {
            i += 1;
          }
        }
        let expr = &body[expr_start..i];
        i += 1; // closing `}`

        if !expr.is_empty() {
          if let Some(split) = find_top_level_pipe(expr) {
            if self.emit_fstring_format_call(&expr[..split], &expr[split + 1..]) {
              part_count += 1;
            }
            continue;
          }
          if self.emit_simple_fstring_expr(expr) {
            part_count += 1;
            continue;
          }
          self.compile_fstring_expression(expr);
          part_count += 1;
        }
      }
    }

    if part_count == 0 {
      self.emit_constant(Value::str(""));
      self.type_set_len(base_top);
      self.type_push(TypeHint::Str);
      return;
    }

    if part_count > 255 {
      self.error("f-string has too many parts.");
      self.type_set_len(base_top);
      self.type_push(TypeHint::Str);
      return;
    }

    self.emit_ops(Opcode::BuildString, part_count as u8);
    self.type_set_len(base_top);
    self.type_push(TypeHint::Str);
  }

  /// `name` or `name % int` compiles without re-entering the parser.
  fn emit_simple_fstring_expr(&mut self, expr: &str) -> bool {
    let expr = expr.trim();
    let bytes = expr.as_bytes();
    if bytes.is_empty() || !is_ident_start(bytes[0]) {
      return false;
    }
    let mut i = 1;
    while i < bytes.len() && is_ident_char(bytes[i]) {
      i += 1;
    }
    let name = expr[..i].to_string();
    let rest = expr[i..].trim_start();

    if rest.is_empty() {
      self.emit_get_named(&name);
      self.type_push(TypeHint::Any);
      return true;
    }

    let Some(rest) = rest.strip_prefix('%') else {
      return false;
    };
    let Some(value) = parse_int_slice(rest.trim()) else {
      return false;
    };

    self.emit_get_named(&name);
    self.emit_constant(Value::Number(value));
    self.emit_op(Opcode::IMod);
    self.type_push(TypeHint::Int);
    true
  }

  /// `{expr|spec}` becomes `(import string).format("spec", (expr))`.
  fn emit_fstring_format_call(&mut self, expr: &str, spec: &str) -> bool {
    let expr = expr.trim();
    let spec = spec.trim();
    if expr.is_empty() {
      self.error("f-string interpolation format: missing expression before '|'.");
      return false;
    }
    if spec.is_empty() {
      self.error("f-string interpolation format: missing format specifier after '|'.");
      return false;
    }

    let mut format = String::new();
    if !spec.starts_with('%') {
      format.push('%');
    }
    format.push_str(spec);

    let mut escaped = String::with_capacity(format.len());
    for c in format.chars() {
      if c == '\\' || c == '"' {
        escaped.push('\\');
      }
      escaped.push(c);
    }

    let expr_code = unescape_fstring_expr(expr);
    let generated = format!("(import string).format(\"{escaped}\", ({expr_code}))");
    self.compile_expression_source(&generated);
    true
  }

  fn compile_fstring_expression(&mut self, expr: &str) {
    let expr = expr.trim();
    if expr.is_empty() {
      self.error("f-string interpolation is empty.");
      return;
    }
    let code = unescape_fstring_expr(expr);
    self.compile_expression_source(&code);
  }
}

fn is_ident_start(b: u8) -> bool {
  b == b'_' || b.is_ascii_alphabetic()
}

fn is_ident_char(b: u8) -> bool {
  is_ident_start(b) || b.is_ascii_digit()
}

/// Base-10 integer with `_` separators, nothing else.
fn parse_int_slice(s: &str) -> Option<f64> {
  let mut value = 0.0f64;
  let mut saw_digit = false;
  for c in s.chars() {
    match c {
      '_' => {}
      '0'..='9' => {
        saw_digit = true;
        value = value * 10.0 + (c as u8 - b'0') as f64;
      }
      _ => return None,
    }
  }
  saw_digit.then_some(value)
}

/// `|` at bracket depth 0, outside strings and comments.
fn find_top_level_pipe(src: &str) -> Option<usize> {
  let bytes = src.as_bytes();
  let mut paren = 0i32;
  let mut bracket = 0i32;
  let mut brace = 0i32;
  let mut i = 0;
  while i < bytes.len() {
    if bytes[i] == b'[' && bytes.get(i + 1) == Some(&b'[') {
      i += 2;
      while i < bytes.len() && !(bytes[i] == b']' && bytes.get(i + 1) == Some(&b']')) {
        i += 1;
      }
      i = (i + 2).min(bytes.len());
      continue;
    }
    if bytes[i] == b'-' && bytes.get(i + 1) == Some(&b'-') {
      i += 2;
      while i < bytes.len() && bytes[i] != b'\n' {
        i += 1;
      }
      continue;
    }
    if bytes[i] == b'"' || bytes[i] == b'\'' {
      let quote = bytes[i];
      i += 1;
      while i < bytes.len() {
        if bytes[i] == b'\\' && i + 1 < bytes.len() {
          i += 2;
          continue;
        }
        if bytes[i] == quote {
          break;
        }
        i += 1;
      }
      i += 1;
      continue;
    }
    if bytes[i] == b'\\' {
      i += 2;
      continue;
    }
    match bytes[i] {
      b'(' => paren += 1,
      b')' if paren > 0 => paren -= 1,
      b'[' => bracket += 1,
      b']' if bracket > 0 => bracket -= 1,
      b'{' => brace += 1,
      b'}' if brace > 0 => brace -= 1,
      b'|' if paren == 0 && bracket == 0 && brace == 0 => return Some(i),
      _ => {}
    }
    i += 1;
  }
  None
}

/// Escapes inside a literal fragment; unknown escapes keep the backslash.
fn decode_fstring_literal(fragment: &str) -> String {
  let mut out = String::with_capacity(fragment.len());
  let mut chars = fragment.chars();
  while let Some(c) = chars.next() {
    if c != '\\' {
      out.push(c);
      continue;
    }
    match chars.next() {
      Some('n') => out.push('\n'),
      Some('t') => out.push('\t'),
      Some('r') => out.push('\r'),
      Some('"') => out.push('"'),
      Some('\\') => out.push('\\'),
      Some('{') => out.push('{'),
      Some('}') => out.push('}'),
      Some(other) => {
        out.push('\\');
        out.push(other);
      }
      None => out.push('\\'),
    }
  }
  out
}

/// Inside `{...}`, `\"`, `\\`, `\{`, `\}` unescape before the slice is
/// re-parsed as an expression.
fn unescape_fstring_expr(expr: &str) -> String {
  let mut out = String::with_capacity(expr.len());
  let mut chars = expr.chars().peekable();
  while let Some(c) = chars.next() {
    if c != '\\' {
      out.push(c);
      continue;
    }
    match chars.peek() {
      Some('"') | Some('\\') | Some('{') | Some('}') => {
        out.push(chars.next().unwrap());
      }
      _ => out.push('\\'),
    }
  }
  out
}
