check! {
  concat_and_length,
  r"
    a = 'foo' + 'bar'
    print(a, #a, #{1, 2, 3})
  ",
  r"
    foobar 6 3
  "
}

check! {
  escapes_and_raw_strings,
  r#"
    print("say \"hi\"")
    print([[raw \n stays]])
  "#,
  r#"
    say "hi"
    raw \n stays
  "#
}

check! {
  fstring_interpolation,
  r#"
    x = 42
    name = 'world'
    print(f"x={x}, hello {name}!")
  "#,
  r"
    x=42, hello world!
  "
}

check! {
  fstring_expression_and_modulo,
  r#"
    n = 17
    print(f"{n % 10} and {n * 2}")
  "#,
  r"
    7 and 34
  "
}

check! {
  fstring_format_spec,
  r#"
    n = 42
    print(f"[{n|04d}]")
    print(f"{3.14159|.2f}")
  "#,
  r"
    [0042]
    3.14
  "
}

check! {
  fstring_escaped_braces,
  r#"
    x = 1
    print(f"\{x\} is {x}")
  "#,
  r"
    {x} is 1
  "
}

check! {
  string_slices,
  r#"
    s = 'hello world'
    print(s[1..5])
    print(s[7..])
    print(s[-5..])
    print(s[1..11:2])
  "#,
  r"
    hello
    world
    world
    hlowrd
  "
}

check! {
  table_slices,
  r"
    t = {10, 20, 30, 40, 50}
    s = t[2..4]
    print(#s, s[1], s[3])
  ",
  r"
    3 20 40
  "
}

check! {
  membership_operators,
  r"
    t = {a = 1}
    print('a' in t, t has 'a', 'b' not in t, 'ell' in 'hello')
  ",
  r"
    true true true true
  "
}

check! {
  append_operator,
  r"
    t = {1}
    t <+ 2
    t <+ 3
    print(#t, t[2], t[3])
  ",
  r"
    3 2 3
  "
}

check! {
  string_module,
  r"
    import string
    print(string.upper('abc'), string.lower('XY'))
    print(string.format('%d-%s', 7, 'ok'))
    print(string.sub('hello', 2, 4))
    print(string.join(',', string.split('a b c', ' ')))
  ",
  r"
    ABC xy
    7-ok
    ell
    a,b,c
  "
}

check! {
  format_round_trips_integers,
  r"
    import string
    for n in 0..3
      print(string.format('%d', n))
    print(string.format('%d', 0 - 12345))
  ",
  r"
    0
    1
    2
    3
    -12345
  "
}

check! {
  fstring_agrees_with_str,
  r#"
    values = {true, false, 0, 1, 0 - 1, 'abc'}
    for v in values
      assert f"{v}" == str(v)
    x = nil
    print(f"{x}" == str(x))
    print('ok')
  "#,
  r"
    true
    ok
  "
}

check! {
  metatable_access,
  r"
    proto = {greeting = 'hi'}
    p = proto {x = 1}
    print(p::greeting, p.x, getmetatable(p) == proto)
  ",
  r"
    hi 1 true
  "
}

check! {
  multiline_table_literal,
  r"
    t = {
      a = 1,
      b = 2
      c = 3
    }
    print(t.a + t.b + t.c)
  ",
  r"
    6
  "
}

check_compile_error! {
  meta_assignment_rejected,
  r"
    t = {}
    t::x = 1
  ",
  "Can't assign through metatable method access."
}

check_compile_error! {
  slice_assignment_rejected,
  r"
    t = {1, 2}
    t[1..2] = 5
  ",
  "Can't assign to a slice."
}

check_compile_error! {
  unterminated_string,
  r#"
    x = "abc
  "#,
  "Unterminated string."
}
