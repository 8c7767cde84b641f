check! {
  fib,
  r"
    fn fib(n)
      if n < 2: return n
      return fib(n - 1) + fib(n - 2)
    print(fib(10))
  ",
  r"
    55
  "
}

check! {
  default_parameters,
  r"
    fn greet(name, greeting='hello')
      return greeting + ' ' + name
    print(greet('ada'))
    print(greet('ada', 'hi'))
  ",
  r"
    hello ada
    hi ada
  "
}

check! {
  named_arguments,
  r"
    fn describe(name, age=0, city='nowhere')
      print(name, age, city)
    describe('bob', city='york')
    describe('eve', age=30)
  ",
  r"
    bob 0 york
    eve 30 nowhere
  "
}

check! {
  variadic_collects_rest,
  r"
    fn tally(first, *rest)
      print(first, #rest, rest[1], rest[2])
    tally(1, 2, 3)
    tally(1)
  ",
  r"
    1 2 2 3
    1 0 nil nil
  "
}

check! {
  spread_call,
  r"
    fn add3(a, b, c)
      return a + b + c
    args = {1, 2, 3}
    print(add3(*args))
    print(add3(10, *{20, 30}))
  ",
  r"
    6
    60
  "
}

check! {
  multiple_returns,
  r"
    fn divmod(a, b)
      return a // b, a % b
    q, r = divmod(17, 5)
    print(q, r)
  ",
  r"
    3 2
  "
}

check! {
  anonymous_functions,
  r"
    apply = fn (f, x)
      return f(x)
    triple = fn (n): return n * 3
    print(apply(triple, 7))
  ",
  r"
    21
  "
}

check! {
  closures_share_cells,
  r"
    fn counter()
      n = 0
      fn tick()
        n = n + 1
        return n
      return tick
    c = counter()
    d = counter()
    print(c(), c(), c(), d())
  ",
  r"
    1 2 3 1
  "
}

check! {
  decorators_apply_in_order,
  r"
    fn shout(f)
      fn wrapped(x)
        return f(x) + '!'
      return wrapped
    fn soften(f)
      fn wrapped(x)
        return '(' + f(x) + ')'
      return wrapped

    @shout
    @soften
    fn speak(word)
      return word
    print(speak('hi'))
  ",
  r"
    (hi)!
  "
}

check_error! {
  arity_mismatch,
  r"
    fn two(a, b)
      return a
    two(1)
  ",
  "Expected 2 arguments but got 1."
}

check_error! {
  missing_named_argument,
  r"
    fn f(a)
      return a
    f(b=1)
  ",
  "Missing argument 'a'."
}

check_error! {
  unknown_named_argument,
  r"
    fn f(a=1)
      return a
    f(b=2)
  ",
  "Unknown argument 'b'."
}

check_error! {
  call_non_function,
  r"
    x = 10
    x()
  ",
  "Can only call functions"
}

check_error! {
  stack_overflow,
  r"
    fn forever()
      return forever()
    forever()
  ",
  "Stack overflow."
}
