check! {
  while_with_break,
  r"
    i = 0
    while true
      i += 1
      if i == 3: break
    print(i)
  ",
  r"
    3
  "
}

check! {
  while_with_continue,
  r"
    i = 0
    total = 0
    while i < 5
      i += 1
      if i == 2: continue
      total += i
    print(total)
  ",
  r"
    13
  "
}

check! {
  numeric_range_loop,
  r"
    total = 0
    for i in 1..4
      total += i
    print(total)
  ",
  r"
    10
  "
}

check! {
  range_loop_continue_still_steps,
  r"
    total = 0
    for i in 1..5
      if i % 2 == 0: continue
      total += i
    print(total)
  ",
  r"
    9
  "
}

check! {
  keyed_table_iteration,
  r"
    t = {a = 1, b = 2}
    for k, v in t
      print(k, v)
  ",
  r"
    a 1
    b 2
  "
}

check! {
  single_variable_iterates_values,
  r"
    t = {a = 10, b = 20}
    for v in t: print(v)
  ",
  r"
    10
    20
  "
}

check! {
  index_sigil_iterates_array,
  r"
    t = {'x', 'y', 'z'}
    for i# , v in t
      print(i, v)
  ",
  r"
    1 x
    2 y
    3 z
  "
}

check! {
  nested_loops_and_break,
  r"
    hits = 0
    for i in 1..3
      for j in 1..3
        if j == 2: break
        hits += 1
    print(hits)
  ",
  r"
    3
  "
}

check! {
  explicit_iterator_triple,
  r"
    t = {5, 6}
    for k, v in inext, t, 0
      print(k, v)
  ",
  r"
    1 5
    2 6
  "
}

check! {
  table_comprehension,
  r"
    t = {x * 2 for x in 1..3}
    print(t[1], t[2], t[3])
  ",
  r"
    2 4 6
  "
}

check! {
  filtered_comprehension,
  r"
    t = {x for x in 1..10 if x % 2 == 0}
    print(#t, t[1], t[5])
  ",
  r"
    5 2 10
  "
}

check! {
  keyed_comprehension,
  r"
    t = {k = v * 10 for k, v in {a = 1, b = 2}}
    print(t.a, t.b)
  ",
  r"
    10 20
  "
}

check! {
  range_as_value_iterates,
  r"
    fn first_of(it)
      for x in it: return x
    print(first_of(range(4, 9)))
  ",
  r"
    4
  "
}

check_compile_error! {
  break_outside_loop,
  r"
    break
  ",
  "Can't use 'break' outside a loop."
}

check_compile_error! {
  range_with_extra_iterator_exprs,
  r"
    for i in 1..3, 4
      print(i)
  ",
  "Range expression cannot be used with multiple iterator expressions."
}
