check! {
  generator_for_loop,
  r"
    fn gen()
      for i in 1..3: yield i
    for x in gen(): print(x)
  ",
  r"
    1
    2
    3
  "
}

check! {
  generator_call_returns_coroutine,
  r"
    fn gen()
      yield 1
    g = gen()
    print(type(g))
  ",
  r"
    coroutine
  "
}

check! {
  coroutine_resume_and_status,
  r"
    import coroutine
    fn gen()
      yield 'a'
      yield 'b'
    g = gen()
    print(coroutine.status(g))
    print(coroutine.resume(g))
    print(coroutine.resume(g))
    coroutine.resume(g)
    print(coroutine.status(g))
  ",
  r"
    suspended
    a
    b
    dead
  "
}

check! {
  coroutine_create_from_function,
  r"
    import coroutine
    fn work()
      yield 10
    c = coroutine.create(work)
    print(coroutine.resume(c))
  ",
  r"
    10
  "
}

check! {
  coroutine_wrap,
  r"
    import coroutine
    fn gen()
      yield 'x'
      yield 'y'
    step = coroutine.wrap(gen)
    print(step(), step())
  ",
  r"
    x y
  "
}

check! {
  generator_comprehension,
  r"
    g = (x * x for x in 1..4)
    for v in g: print(v)
  ",
  r"
    1
    4
    9
    16
  "
}

check! {
  generator_comprehension_with_filter,
  r"
    g = (x for x in 1..6 if x % 3 == 0)
    for v in g: print(v)
  ",
  r"
    3
    6
  "
}

check! {
  generator_comprehension_as_call_argument,
  r"
    fn first(it)
      for v in it: return v
    print(first(n + 100 for n in 5..9))
  ",
  r"
    105
  "
}

check! {
  generator_sees_captured_variables,
  r"
    scale = 10
    fn gen()
      for i in 1..2: yield i * scale
    for v in gen(): print(v)
  ",
  r"
    10
    20
  "
}

check! {
  generators_are_independent,
  r"
    fn gen()
      for i in 1..2: yield i
    a = gen()
    b = gen()
    import coroutine
    print(coroutine.resume(a), coroutine.resume(b), coroutine.resume(a))
  ",
  r"
    1 1 2
  "
}

check_error! {
  yield_outside_coroutine,
  r"
    import coroutine
    coroutine.yield(1)
  ",
  "Cannot yield from outside a coroutine."
}

check_error! {
  resume_dead_coroutine,
  r"
    import coroutine
    fn gen()
      yield 1
    g = gen()
    coroutine.resume(g)
    coroutine.resume(g)
    coroutine.resume(g)
  ",
  "Cannot resume a dead coroutine."
}

check_error! {
  throw_inside_generator_propagates,
  r"
    fn gen()
      yield 1
      throw 'inside'
    for x in gen(): print(x)
  ",
  r"inside"
}
