check! {
  simple_arithmetic,
  r"
    x = 1 + 2
    print(x)
  ",
  r"
    3
  "
}

check! {
  local_declarations,
  r"
    local a, b = 1, 2
    local c
    print(a, b, c)
  ",
  r"
    1 2 nil
  "
}

check! {
  compound_assignment,
  r"
    x = 1
    x += 1
    x *= 10
    x -= 5
    print(x)
  ",
  r"
    15
  "
}

check! {
  multi_assignment_padding,
  r"
    a, b, c = 1, 2
    print(a, b, c)
  ",
  r"
    1 2 nil
  "
}

check! {
  multi_assignment_unpacks_table,
  r"
    t = {10, 20, 30}
    a, b, c = t
    print(a, b, c)
  ",
  r"
    10 20 30
  "
}

check! {
  multi_assignment_from_multi_return,
  r"
    fn pair()
      return 1, 2
    a, b = pair()
    print(a, b)
  ",
  r"
    1 2
  "
}

check! {
  comma_rhs_builds_array,
  r"
    t = 1, 2, 3
    print(#t, t[1], t[3])
  ",
  r"
    3 1 3
  "
}

check! {
  table_field_assignment,
  r"
    t = {}
    t.x = 1
    t['y'] = 2
    print(t.x + t.y)
  ",
  r"
    3
  "
}

check! {
  del_nils_locals_and_removes_keys,
  r"
    t = {a = 1, b = 2}
    del t.a
    x = 5
    del x
    print('a' in t, 'b' in t, x)
  ",
  r"
    false true nil
  "
}

check! {
  global_keyword_in_function,
  r"
    global count = 0
    fn bump()
      global count
      count = count + 1
    bump()
    bump()
    print(count)
  ",
  r"
    2
  "
}

check! {
  assignment_writes_through_captured_local,
  r"
    x = 'outer'
    fn shadow()
      x = 'inner'
      return x
    print(shadow(), x)
  ",
  r"
    inner inner
  "
}

check! {
  unresolved_assignment_binds_function_local,
  r"
    fn keep()
      y = 'inner'
      return y
    print(keep())
  ",
  r"
    inner
  "
}

check_error! {
  function_locals_do_not_leak,
  r"
    fn keep()
      y = 1
      return y
    keep()
    print(y)
  ",
  "Undefined variable 'y'"
}

check! {
  walrus_assignment,
  r"
    x = 1
    y = (x := 5)
    print(x, y)
  ",
  r"
    5 5
  "
}

check_error! {
  undefined_global_read,
  r"
    print(missing)
  ",
  "Undefined variable 'missing'"
}

check_compile_error! {
  compound_assign_undefined_in_function,
  r"
    fn broken()
      typo += 1
  ",
  "Undefined variable 'typo' in compound assignment"
}

check_compile_error! {
  invalid_assignment_target,
  r"
    1 = 2
  ",
  "Invalid assignment target."
}
