check! {
  if_elif_else,
  r"
    fn grade(n)
      if n >= 90
        return 'a'
      elif n >= 50: return 'b'
      else
        return 'c'
    print(grade(95), grade(70), grade(10))
  ",
  r"
    a b c
  "
}

check! {
  ternary_right_associates,
  r"
    x = 5
    print(x < 0 ? 'neg' : x == 0 ? 'zero' : 'pos')
  ",
  r"
    pos
  "
}

check! {
  short_circuit,
  r"
    fn boom()
      throw 'called'
    print(false and boom(), nil or 'default', 1 and 2)
  ",
  r"
    false default 2
  "
}

check! {
  match_statement,
  r"
    fn kind(x)
      match x
        case 1: return 'one'
        case 'two': return 'string two'
        else: return 'other'
    print(kind(1), kind('two'), kind(99))
  ",
  r"
    one string two other
  "
}

check! {
  try_except_finally,
  r"
    try: throw 'boom'
    except e: print(e)
    finally: print('done')
  ",
  r"
    boom
    done
  "
}

check! {
  try_without_throw_still_runs_finally,
  r"
    try
      print('body')
    except e
      print('never', e)
    finally
      print('cleanup')
  ",
  r"
    body
    cleanup
  "
}

check! {
  finally_runs_on_return,
  r"
    fn f()
      try
        return 'value'
      finally
        print('finally')
    print(f())
  ",
  r"
    finally
    value
  "
}

check! {
  except_filter,
  r"
    fn attempt(n)
      try
        throw n
      except e if e > 10
        print('big', e)
    try
      attempt(42)
      attempt(3)
    except e
      print('rethrown', e)
  ",
  r"
    big 42
    rethrown 3
  "
}

check! {
  nested_try_propagates,
  r"
    try
      try
        throw 'inner'
      finally
        print('inner finally')
    except e
      print('caught', e)
  ",
  r"
    inner finally
    caught inner
  "
}

check! {
  throw_unwinds_call_frames,
  r"
    fn deep(n)
      if n == 0: throw 'bottom'
      deep(n - 1)
    try
      deep(4)
    except e
      print('caught', e)
  ",
  r"
    caught bottom
  "
}

check! {
  assert_passes_and_fails,
  r"
    assert 1 + 1 == 2, 'math works'
    try
      assert false
    except e
      print(e)
  ",
  r"
    assert failed
  "
}

check! {
  with_binds_and_calls_enter,
  r"
    ctx = {}
    ctx.__enter = fn (): return 'resource'
    with ctx as r
      print(r)
  ",
  r"
    resource
  "
}

check! {
  with_calls_exit_on_throw,
  r"
    ctx = {}
    ctx.__exit = fn (e): print('exit got', e)
    try
      with ctx
        throw 'oops'
    except e
      print('caught', e)
  ",
  r"
    exit got oops
    caught oops
  "
}

check_error! {
  uncaught_throw,
  r"
    throw 'unhandled'
  ",
  "unhandled"
}

check_error! {
  integer_division_by_zero,
  r"
    print(1 // 0)
  ",
  "Integer division by zero."
}

check_error! {
  modulo_by_zero,
  r"
    x = 7
    print(x % 0)
  ",
  "Modulo by zero."
}

check_compile_error! {
  try_requires_handler,
  r"
    try
      print(1)
    print(2)
  ",
  "Expect 'except' or 'finally' after try block."
}
