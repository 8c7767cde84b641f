//! Statement parsing and control-flow lowering.

use syntax::TokenKind;

use super::{FunctionKind, LoopContext, Session, TypeHint};
use crate::bytecode::Opcode;
use crate::value::Value;

impl<'src> Session<'src> {
  pub(crate) fn declaration(&mut self) {
    use TokenKind::*;
    if self.match_(Op_At) {
      self.decorated_function_declaration();
    } else if self.match_(Kw_Fn) {
      self.function_declaration();
    } else if self.match_(Kw_Import) {
      self.import_statement();
    } else if self.match_(Kw_From) {
      self.from_import_statement();
    } else if self.match_(Kw_Global) {
      if self.match_(Kw_Fn) {
        self.global_function_declaration();
      } else {
        self.global_declaration();
      }
    } else if self.match_(Kw_Local) {
      if self.match_(Kw_Fn) {
        self.function_declaration();
      } else {
        self.variable_declaration();
      }
    } else {
      self.statement();
    }
  }

  pub(crate) fn statement(&mut self) {
    use TokenKind::*;
    if self.match_(Kw_Print) {
      self.print_statement();
    } else if self.match_(Kw_If) {
      self.if_statement();
    } else if self.match_identifier_keyword("match") {
      self.match_statement();
    } else if self.match_(Kw_Try) {
      self.try_statement();
    } else if self.match_(Kw_With) {
      self.with_statement();
    } else if self.match_(Kw_Throw) {
      self.throw_statement();
    } else if self.match_(Kw_Yield) {
      self.yield_statement();
    } else if self.match_(Kw_While) {
      self.while_statement();
    } else if self.match_(Kw_For) {
      self.for_statement();
    } else if self.match_(Kw_Return) {
      self.return_statement();
    } else if self.match_(Kw_Break) {
      self.break_statement();
    } else if self.match_(Kw_Continue) {
      self.continue_statement();
    } else if self.match_(Kw_Gc) {
      self.emit_op(Opcode::Gc);
    } else if self.match_(Kw_Assert) {
      self.assert_statement();
    } else if self.match_(Kw_Del) {
      self.del_statement();
    } else if self.is_multi_assignment_statement() {
      self.multi_assignment_statement();
    } else {
      self.expression_statement();
    }
  }

  /// Soft keywords: `match` and `case` are plain identifiers elsewhere.
  fn match_identifier_keyword(&mut self, keyword: &str) -> bool {
    if !self.check(TokenKind::Lit_Ident) {
      return false;
    }
    if self.lexeme(&self.current) != keyword {
      return false;
    }
    self.advance();
    true
  }

  fn expression_statement(&mut self) {
    self.type_reset();
    self.expression();
    if self.state.repl && self.fs_ref().kind == FunctionKind::Script {
      // keep the value in slot 0 so the REPL can display it
      self.emit_ops(Opcode::SetLocal, 0);
      self.emit_op(Opcode::Pop);
    }
    // normalize to exactly the local slots: discards the expression value
    // (and any multi-return extras) while a local-by-default assignment's
    // fresh slot, which sits within the local count, survives
    let count = self.fs_ref().locals.len() as u8;
    self.emit_ops(Opcode::AdjustStack, count);
  }

  pub(crate) fn block(&mut self) {
    use TokenKind::*;
    while !self.check(Kw_Else) && !self.check(Kw_Elif) && !self.check(Tok_Dedent) && !self.check(Tok_Eof)
    {
      self.declaration();
    }
  }

  /// Leading whitespace columns of the line `token` starts.
  fn token_indent(&self, token: &syntax::Token) -> u32 {
    let at = token.span.start.min(self.src.len());
    let line_start = self.src[..at].rfind('\n').map(|i| i + 1).unwrap_or(0);
    let mut indent = 0;
    for b in self.src[line_start..at].bytes() {
      match b {
        b' ' => indent += 1,
        b'\t' => indent += 4,
        _ => break,
      }
    }
    indent
  }

  /// A statement suite: an optional `:`, then either an indented block or
  /// statement(s) on the header line. Inside table literals (where layout
  /// tokens are suppressed) indentation is measured from the source text.
  pub(crate) fn parse_statement_suite(&mut self, header_line: u32, indent_error: &'static str) {
    use TokenKind::*;
    self.match_(Tok_Colon);

    if self.match_(Tok_Indent) {
      self.block();
      self.match_(Tok_Dedent);
      return;
    }

    if self.current.line > header_line {
      if !self.state.in_table_entry_expression {
        self.error(indent_error);
        self.statement();
        return;
      }

      let header_indent = self.token_indent(&self.previous);
      let body_indent = self.token_indent(&self.current);
      if body_indent <= header_indent {
        self.error(indent_error);
        self.statement();
        return;
      }
      while !self.check(Tok_Eof)
        && !self.check(Brk_CurlyR)
        && !self.check(Tok_Dedent)
        && self.current.line > header_line
        && self.token_indent(&self.current) > header_indent
      {
        self.statement();
      }
      return;
    }

    self.statement();
  }

  // ---- simple statements ----

  fn print_statement(&mut self) {
    use TokenKind::*;
    let mut count: usize = 0;
    if self.match_(Brk_ParenL) {
      if !self.check(Brk_ParenR) {
        loop {
          self.type_reset();
          self.expression();
          if count == 255 {
            self.error("Can't print more than 255 values.");
            return;
          }
          count += 1;
          if !self.match_(Tok_Comma) {
            break;
          }
        }
      }
      self.consume(Brk_ParenR, "Expect ')' after print arguments.");
    } else {
      loop {
        self.type_reset();
        self.expression();
        if count == 255 {
          self.error("Can't print more than 255 values.");
          return;
        }
        count += 1;
        if !self.match_(Tok_Comma) {
          break;
        }
      }
    }
    self.emit_ops(Opcode::Print, count as u8);
  }

  fn throw_statement(&mut self) {
    self.type_reset();
    self.expression();
    self.emit_op(Opcode::Throw);
  }

  fn yield_statement(&mut self) {
    use TokenKind::*;
    if self.fs_ref().kind == FunctionKind::Script {
      self.error("Can't use 'yield' outside a function.");
      return;
    }
    self.fs().is_generator = true;

    let coroutine = self.identifier_constant("coroutine");
    self.emit_ops(Opcode::GetGlobal, coroutine);
    let yield_name = self.identifier_constant("yield");
    self.emit_ops(Opcode::Constant, yield_name);
    self.emit_op(Opcode::GetTable);

    let mut count: usize = 0;
    if !(self.check(Kw_Else) || self.check(Kw_Elif) || self.check(Tok_Dedent) || self.check(Tok_Eof)) {
      loop {
        self.type_reset();
        self.expression();
        count += 1;
        if !self.match_(TokenKind::Tok_Comma) {
          break;
        }
      }
    }
    // yield is stack-neutral; the call pushes nothing when resumed
    self.emit_call(count.min(255) as u8);
  }

  fn assert_statement(&mut self) {
    self.type_reset();
    self.expression();

    let fail_jump = self.emit_jump(Opcode::JumpIfFalse);
    self.emit_op(Opcode::Pop);
    let done_jump = self.emit_jump(Opcode::Jump);

    self.patch_jump(fail_jump);
    self.emit_op(Opcode::Pop);

    if self.match_(TokenKind::Tok_Comma) {
      self.type_reset();
      self.expression();
    } else {
      self.emit_constant(Value::str("assert failed"));
    }
    self.emit_op(Opcode::Throw);

    self.patch_jump(done_jump);
  }

  fn return_statement(&mut self) {
    use TokenKind::*;
    if self.match_(Tok_Semicolon) {
      self.emit_op(Opcode::Nil);
      self.emit_op(Opcode::Return);
      return;
    }
    if self.check(Kw_Else) || self.check(Kw_Elif) || self.check(Tok_Dedent) || self.check(Tok_Eof) {
      self.emit_op(Opcode::Nil);
      self.emit_op(Opcode::Return);
      return;
    }
    let mut count: usize = 0;
    loop {
      self.type_reset();
      self.expression();
      count += 1;
      if !self.match_(Tok_Comma) {
        break;
      }
    }
    if count == 1 {
      self.emit_op(Opcode::Return);
    } else {
      self.emit_ops(Opcode::ReturnN, count.min(255) as u8);
    }
  }

  // ---- del ----

  fn delete_variable(&mut self, name: &str) {
    if let Some(slot) = self.resolve_local(name) {
      self.emit_op(Opcode::Nil);
      self.emit_ops(Opcode::SetLocal, slot);
      self.emit_op(Opcode::Pop);
      return;
    }
    if let Some(slot) = self.resolve_upvalue(name) {
      self.emit_op(Opcode::Nil);
      self.emit_ops(Opcode::SetUpvalue, slot);
      self.emit_op(Opcode::Pop);
      return;
    }
    let index = self.identifier_constant(name);
    self.emit_ops(Opcode::DeleteGlobal, index);
  }

  fn delete_access_chain(&mut self) {
    use TokenKind::*;
    let mut deleted = false;
    loop {
      if self.match_(Op_Dot) {
        self.consume_property_name_after_dot();
        let name = self.lexeme(&self.previous).to_string();
        let index = self.identifier_constant(&name);
        self.emit_ops(Opcode::Constant, index);
      } else if self.match_(Brk_SquareL) {
        self.expression();
        self.consume(Brk_SquareR, "Expect ']' after index.");
      } else {
        if !deleted {
          self.error("Expect property or index to delete.");
        }
        return;
      }

      if self.check(Op_Dot) || self.check(Brk_SquareL) {
        self.emit_op(Opcode::GetTable);
      } else {
        self.emit_op(Opcode::DeleteTable);
        deleted = true;
        return;
      }
    }
  }

  fn del_statement(&mut self) {
    use TokenKind::*;
    loop {
      if self.match_(Lit_Ident) {
        let token = self.previous;
        if self.check(Op_Dot) || self.check(Brk_SquareL) {
          self.named_variable(token, false);
          self.delete_access_chain();
        } else {
          let name = self.lexeme(&token).to_string();
          self.delete_variable(&name);
        }
      } else if self.match_(Brk_ParenL) {
        self.expression();
        self.consume(Brk_ParenR, "Expect ')' after expression.");
        if !(self.check(Op_Dot) || self.check(Brk_SquareL)) {
          self.error("Expect property or index to delete.");
          return;
        }
        self.delete_access_chain();
      } else {
        self.error("Expect variable or table access after 'del'.");
        return;
      }
      if !self.match_(Tok_Comma) {
        break;
      }
    }
  }

  // ---- control flow ----

  fn if_statement(&mut self) {
    self.type_reset();
    self.expression();
    let header_line = self.previous.line;

    let then_jump = self.emit_jump(Opcode::JumpIfFalse);
    self.emit_op(Opcode::Pop);

    self.begin_scope();
    self.parse_statement_suite(header_line, "Expected indented block after 'if'.");
    self.end_scope();
    let else_jump = self.emit_jump(Opcode::Jump);

    self.patch_jump(then_jump);
    self.emit_op(Opcode::Pop);

    if self.match_(TokenKind::Kw_Elif) {
      self.if_statement();
    } else if self.match_(TokenKind::Kw_Else) {
      let else_line = self.previous.line;
      self.begin_scope();
      self.parse_statement_suite(else_line, "Expected indented block after 'else'.");
      self.end_scope();
    }

    self.patch_jump(else_jump);
  }

  fn match_statement(&mut self) {
    use TokenKind::*;
    self.begin_scope();

    self.type_reset();
    self.expression();
    let match_slot = self.fs_ref().locals.len() as u8;
    self.add_local("$match_value");
    self.mark_initialized();
    self.type_reset();

    self.match_(Tok_Colon);
    self.consume(Tok_Indent, "Expected indented block after 'match'.");

    let mut clause_end_jumps = Vec::new();
    let mut pending_case_fail: Option<usize> = None;
    let mut saw_clause = false;
    let mut saw_else = false;

    while !self.check(Tok_Dedent) && !self.check(Tok_Eof) {
      if let Some(fail) = pending_case_fail.take() {
        self.patch_jump(fail);
        self.emit_op(Opcode::Pop);
      }

      if self.match_identifier_keyword("case") {
        if saw_else {
          self.error("Can't have 'case' after 'else' in match.");
          break;
        }
        saw_clause = true;
        self.type_reset();
        self.emit_ops(Opcode::GetLocal, match_slot);
        self.expression();
        self.emit_op(Opcode::Equal);

        let case_fail = self.emit_jump(Opcode::JumpIfFalse);
        self.emit_op(Opcode::Pop);

        let case_line = self.previous.line;
        self.begin_scope();
        self.parse_statement_suite(case_line, "Expected indented block after 'case'.");
        self.end_scope();

        if clause_end_jumps.len() > 256 {
          self.error("Too many clauses in match statement.");
        } else {
          clause_end_jumps.push(self.emit_jump(Opcode::Jump));
        }
        pending_case_fail = Some(case_fail);
        continue;
      }

      if self.match_(Kw_Else) {
        if saw_else {
          self.error("Can't have multiple 'else' clauses in match.");
          break;
        }
        saw_clause = true;
        saw_else = true;

        let else_line = self.previous.line;
        self.begin_scope();
        self.parse_statement_suite(else_line, "Expected indented block after 'else'.");
        self.end_scope();
        break;
      }

      self.error_at_current("Expect 'case' or 'else' in match block.");
      break;
    }

    if let Some(fail) = pending_case_fail.take() {
      self.patch_jump(fail);
      self.emit_op(Opcode::Pop);
    }

    self.consume(Tok_Dedent, "Expect end of match block.");

    for jump in clause_end_jumps {
      self.patch_jump(jump);
    }

    self.end_scope();

    if !saw_clause {
      self.error("Match block must contain at least one clause.");
    }
  }

  fn try_statement(&mut self) {
    use TokenKind::*;
    let depth = self.fs_ref().locals.len() as u8;
    let handler = self.emit_try(depth);
    let header_line = self.previous.line;

    self.begin_scope();
    self.parse_statement_suite(header_line, "Expected indented block after 'try'.");
    self.end_scope();

    if !self.check(Kw_Except) && !self.check(Kw_Finally) {
      self.error_at_current("Expect 'except' or 'finally' after try block.");
      return;
    }

    self.emit_op(Opcode::EndTry);

    let mut has_except = false;
    let mut has_finally = false;
    let mut after_try_jump = None;

    if self.match_(Kw_Except) {
      has_except = true;
      after_try_jump = Some(self.emit_jump(Opcode::Jump));

      self.patch_try(handler.except_offset);

      self.begin_scope();
      let mut except_local = None;
      let mut filter_fail = None;
      if self.match_(Lit_Ident) {
        let name = self.lexeme(&self.previous).to_string();
        self.add_local(&name);
        self.mark_initialized();
        let slot = (self.fs_ref().locals.len() - 1) as u8;
        // the thrown value pushed by the unwinder is the local's slot
        self.emit_ops(Opcode::SetLocal, slot);
        except_local = Some(slot);
      } else {
        self.emit_op(Opcode::Pop);
      }

      if self.match_(Kw_If) {
        match except_local {
          None => self.error("Filtered except requires an exception variable: use 'except e if ...'."),
          Some(_) => {
            self.type_reset();
            self.expression();
            filter_fail = Some(self.emit_jump(Opcode::JumpIfFalse));
            self.emit_op(Opcode::Pop);
          }
        }
      }

      let except_line = self.previous.line;
      self.parse_statement_suite(except_line, "Expected indented block after 'except'.");

      if let (Some(fail), Some(slot)) = (filter_fail, except_local) {
        let after = self.emit_jump(Opcode::Jump);
        self.patch_jump(fail);
        self.emit_op(Opcode::Pop);
        self.emit_ops(Opcode::GetLocal, slot);
        self.emit_op(Opcode::Throw);
        self.patch_jump(after);
      }

      self.end_scope();
      self.emit_op(Opcode::EndTry);
    }

    if self.match_(Kw_Finally) {
      has_finally = true;
      if let Some(jump) = after_try_jump.take() {
        self.patch_jump(jump);
      }

      self.patch_try_finally(handler.finally_offset);

      self.begin_scope();
      let finally_line = self.previous.line;
      self.parse_statement_suite(finally_line, "Expected indented block after 'finally'.");
      self.end_scope();
      self.emit_op(Opcode::EndFinally);
    } else if let Some(jump) = after_try_jump.take() {
      self.patch_jump(jump);
    }

    let flags = (has_except as u8) | ((has_finally as u8) << 1);
    self.set_code_byte(handler.flags_offset, flags);
  }

  /// `with ctx [as x]: body` — call `ctx.__enter()` if present, run the
  /// body under a try, and call `ctx.__exit(exc_or_nil)` on every exit,
  /// rethrowing if the body threw.
  fn with_statement(&mut self) {
    use TokenKind::*;
    self.begin_scope();
    self.type_reset();

    self.expression();

    let ctx_slot = self.fs_ref().locals.len() as u8;
    self.add_local("$with_ctx");
    self.mark_initialized();

    let enter = self.identifier_constant("__enter");
    self.emit_ops(Opcode::GetLocal, ctx_slot);
    self.emit_ops(Opcode::Constant, enter);
    self.emit_op(Opcode::GetTable);
    let skip_enter = self.emit_jump(Opcode::JumpIfFalse);
    self.emit_call(0);
    let after_enter = self.emit_jump(Opcode::Jump);
    self.patch_jump(skip_enter);
    self.emit_op(Opcode::Pop);
    self.emit_ops(Opcode::GetLocal, ctx_slot);
    self.patch_jump(after_enter);

    if self.match_(Kw_As) {
      self.consume(Lit_Ident, "Expect name after 'as'.");
      let name = self.lexeme(&self.previous).to_string();
      if let Some(slot) = self.resolve_local(&name) {
        self.emit_ops(Opcode::SetLocal, slot);
        self.emit_op(Opcode::Pop);
      } else if let Some(slot) = self.resolve_upvalue(&name) {
        self.emit_ops(Opcode::SetUpvalue, slot);
        self.emit_op(Opcode::Pop);
      } else {
        self.add_local(&name);
        self.mark_initialized();
      }
    } else {
      self.emit_op(Opcode::Pop);
    }

    let ex_slot = self.fs_ref().locals.len() as u8;
    self.emit_op(Opcode::Nil);
    self.add_local("$with_ex");
    self.mark_initialized();

    let depth = self.fs_ref().locals.len() as u8;
    let handler = self.emit_try(depth);
    let header_line = self.previous.line;

    self.begin_scope();
    self.parse_statement_suite(header_line, "Expected indented block after 'with'.");
    self.end_scope();

    self.emit_op(Opcode::EndTry);
    let after_try_jump = self.emit_jump(Opcode::Jump);

    self.patch_try(handler.except_offset);
    self.emit_ops(Opcode::SetLocal, ex_slot);
    self.emit_ops(Opcode::GetLocal, ex_slot);
    self.emit_op(Opcode::Throw);

    self.patch_jump(after_try_jump);
    self.patch_try_finally(handler.finally_offset);

    let exit = self.identifier_constant("__exit");
    self.emit_ops(Opcode::GetLocal, ctx_slot);
    self.emit_ops(Opcode::Constant, exit);
    self.emit_op(Opcode::GetTable);
    let skip_exit = self.emit_jump(Opcode::JumpIfFalse);
    self.emit_ops(Opcode::GetLocal, ex_slot);
    self.emit_call(1);
    self.emit_op(Opcode::Pop);
    let after_exit = self.emit_jump(Opcode::Jump);
    self.patch_jump(skip_exit);
    self.emit_op(Opcode::Pop);
    self.patch_jump(after_exit);

    self.emit_op(Opcode::EndFinally);
    self.set_code_byte(handler.flags_offset, 1 | 2);
    self.end_scope();
  }

  fn while_statement(&mut self) {
    let loop_start = self.code_len();
    let scope_depth = self.fs_ref().scope_depth;
    self.fs().loops.push(LoopContext {
      start: loop_start,
      scope_depth,
      break_jumps: Vec::new(),
      continue_jumps: Vec::new(),
      is_for_loop: false,
      slots_to_pop: 0,
    });

    self.type_reset();
    self.expression();
    let header_line = self.previous.line;

    let exit_jump = self.emit_jump(Opcode::JumpIfFalse);
    self.emit_op(Opcode::Pop);

    self.begin_scope();
    self.parse_statement_suite(header_line, "Expected indented block after 'while'.");
    self.end_scope();

    self.emit_loop(loop_start);

    self.patch_jump(exit_jump);
    self.emit_op(Opcode::Pop);

    let ctx = self.fs().loops.pop().expect("unbalanced loop context");
    for jump in ctx.break_jumps {
      self.patch_jump(jump);
    }
  }

  fn for_statement(&mut self) {
    use TokenKind::*;
    self.begin_scope();
    let scope_depth = self.fs_ref().scope_depth;

    self.consume(Lit_Ident, "Expect variable name.");
    let name = self.lexeme(&self.previous).to_string();
    let mut has_index_sigil = false;
    if self.check(Op_Hash) {
      if self.current.span.start != self.previous.span.end {
        self.error_at_current("Whitespace is not allowed before '#'.");
      }
      self.advance();
      has_index_sigil = true;
    }

    if !(self.match_(Tok_Comma) || self.check(Kw_In)) {
      self.error_at_current("Expect 'in' after loop variable.");
      self.end_scope();
      return;
    }

    let mut loop_vars = vec![name];
    if self.previous.kind == Tok_Comma {
      self.consume(Lit_Ident, "Expect second variable name.");
      loop_vars.push(self.lexeme(&self.previous).to_string());
    }

    self.consume(Kw_In, "Expect 'in'.");

    let eligible_for_range = loop_vars.len() == 1 && !has_index_sigil;
    self.state.in_for_range_header = eligible_for_range;
    self.type_reset();
    self.expression();
    self.state.in_for_range_header = false;
    let mut expr_count = 1;
    let is_range = eligible_for_range && self.state.last_expr_was_range;

    if is_range && self.check(Tok_Comma) {
      self.error("Range expression cannot be used with multiple iterator expressions.");
      self.end_scope();
      return;
    }

    while self.match_(Tok_Comma) && expr_count < 3 {
      self.type_reset();
      self.expression();
      expr_count += 1;
    }

    let header_line = self.previous.line;

    if is_range && expr_count == 1 {
      // numeric loop over two hidden slots: (var, end)
      let var = loop_vars[0].clone();
      self.add_local(&var);
      self.add_local("(end)");
      self.mark_initialized_count(2);
      let var_slot = (self.fs_ref().locals.len() - 2) as u8;
      let end_slot = var_slot + 1;

      let loop_start = self.code_len();
      self.fs().loops.push(LoopContext {
        start: loop_start,
        scope_depth,
        break_jumps: Vec::new(),
        continue_jumps: Vec::new(),
        is_for_loop: true,
        slots_to_pop: 0,
      });

      self.emit_op(Opcode::ForPrep);
      self.emit_byte(var_slot);
      self.emit_byte(end_slot);
      self.emit_byte(0);
      self.emit_byte(0);
      let exit_jump = self.code_len() - 2;

      self.begin_scope();
      self.parse_statement_suite(header_line, "Expected indented block after 'for'.");
      self.end_scope();

      // continue lands on the ForLoop so the step still runs
      let step_offset = self.code_len();
      let continues = std::mem::take(&mut self.fs().loops.last_mut().unwrap().continue_jumps);
      for jump in continues {
        self.patch_jump_to(jump, step_offset);
      }

      self.emit_op(Opcode::ForLoop);
      self.emit_byte(var_slot);
      self.emit_byte(end_slot);
      let back = self.code_len() + 2 - loop_start;
      self.emit_byte((back >> 8) as u8);
      self.emit_byte((back & 0xff) as u8);

      let target = self.code_len();
      self.patch_jump_to(exit_jump, target);

      let ctx = self.fs().loops.pop().expect("unbalanced loop context");
      for jump in ctx.break_jumps {
        self.patch_jump(jump);
      }
      self.end_scope();
      return;
    }

    // generic iteration: materialize the iterable, build the triple
    if expr_count == 1 {
      self.add_local("(iterable)");
      self.mark_initialized();
      let iterable_slot = (self.fs_ref().locals.len() - 1) as u8;
      self.emit_ops(Opcode::GetLocal, iterable_slot);
    }

    if expr_count > 1 {
      while expr_count < 3 {
        self.emit_op(Opcode::Nil);
        expr_count += 1;
      }
    } else if has_index_sigil {
      self.emit_op(Opcode::IterPrepIpairs);
    } else {
      self.emit_op(Opcode::IterPrep);
    }

    if has_index_sigil && expr_count > 1 {
      self.error("Index loop syntax 'i#' only works with implicit table iteration.");
    }

    if loop_vars.len() == 1 && !has_index_sigil {
      loop_vars.insert(0, String::from("(key)"));
    }
    let var_count = loop_vars.len();

    let iter_slot = self.fs_ref().locals.len() as u8;
    self.add_local("(iter)");
    let state_slot = self.fs_ref().locals.len() as u8;
    self.add_local("(state)");
    let control_slot = self.fs_ref().locals.len() as u8;
    self.add_local("(control)");
    self.mark_initialized_count(3);

    let loop_start = self.code_len();
    self.fs().loops.push(LoopContext {
      start: loop_start,
      scope_depth,
      break_jumps: Vec::new(),
      continue_jumps: Vec::new(),
      is_for_loop: true,
      slots_to_pop: var_count,
    });

    self.emit_ops(Opcode::GetLocal, iter_slot);
    self.emit_ops(Opcode::GetLocal, state_slot);
    self.emit_ops(Opcode::GetLocal, control_slot);
    self.emit_call(2);

    for _ in var_count..2 {
      self.emit_op(Opcode::Pop);
    }

    for i in 0..var_count {
      let var = loop_vars[i].clone();
      self.add_local(&var);
    }
    self.mark_initialized_count(var_count);

    let first_var_slot = (self.fs_ref().locals.len() - var_count) as u8;
    self.emit_ops(Opcode::GetLocal, first_var_slot);
    self.emit_op(Opcode::Nil);
    self.emit_op(Opcode::Equal);
    let exit_jump = self.emit_jump(Opcode::JumpIfTrue);
    self.emit_op(Opcode::Pop);

    // the first returned value drives the next iteration
    self.emit_ops(Opcode::GetLocal, first_var_slot);
    self.emit_ops(Opcode::SetLocal, first_var_slot - 1);
    self.emit_op(Opcode::Pop);

    self.begin_scope();
    self.parse_statement_suite(header_line, "Expected indented block after 'for'.");
    self.end_scope();

    for _ in 0..var_count {
      let captured = self.fs_ref().locals.last().map(|l| l.is_captured).unwrap_or(false);
      if captured {
        self.emit_op(Opcode::CloseUpvalue);
      } else {
        self.emit_op(Opcode::Pop);
      }
      self.fs().locals.pop();
    }

    let continues = std::mem::take(&mut self.fs().loops.last_mut().unwrap().continue_jumps);
    for jump in continues {
      self.patch_jump(jump);
    }

    self.emit_loop(loop_start);

    self.patch_jump(exit_jump);
    for _ in 0..var_count {
      self.emit_op(Opcode::Pop);
    }
    self.emit_op(Opcode::Pop); // comparison result

    let ctx = self.fs().loops.pop().expect("unbalanced loop context");
    for jump in ctx.break_jumps {
      self.patch_jump(jump);
    }

    self.end_scope();
  }

  fn break_statement(&mut self) {
    if self.fs_ref().loops.is_empty() {
      self.error("Can't use 'break' outside a loop.");
      return;
    }
    let loop_depth = self.fs_ref().loops.last().unwrap().scope_depth;

    let mut i = self.fs_ref().locals.len();
    while i > 0 && self.fs_ref().locals[i - 1].depth > loop_depth {
      if self.fs_ref().locals[i - 1].is_captured {
        self.emit_op(Opcode::CloseUpvalue);
      } else {
        self.emit_op(Opcode::Pop);
      }
      i -= 1;
    }

    let offset = self.emit_jump(Opcode::Jump);
    self.fs().loops.last_mut().unwrap().break_jumps.push(offset);
  }

  fn continue_statement(&mut self) {
    if self.fs_ref().loops.is_empty() {
      self.error("Can't use 'continue' outside a loop.");
      return;
    }
    let loop_depth = self.fs_ref().loops.last().unwrap().scope_depth;

    let mut i = self.fs_ref().locals.len();
    while i > 0 && self.fs_ref().locals[i - 1].depth > loop_depth {
      if self.fs_ref().locals[i - 1].is_captured {
        self.emit_op(Opcode::CloseUpvalue);
      } else {
        self.emit_op(Opcode::Pop);
      }
      i -= 1;
    }

    let (is_for_loop, start, slots_to_pop) = {
      let ctx = self.fs_ref().loops.last().unwrap();
      (ctx.is_for_loop, ctx.start, ctx.slots_to_pop)
    };
    for _ in 0..slots_to_pop {
      self.emit_op(Opcode::Pop);
    }

    if is_for_loop {
      let offset = self.emit_jump(Opcode::Jump);
      self.fs().loops.last_mut().unwrap().continue_jumps.push(offset);
    } else {
      self.emit_loop(start);
    }
  }

  // ---- declarations ----

  pub(crate) fn parse_variable(&mut self, message: &'static str) -> u8 {
    self.consume(TokenKind::Lit_Ident, message);
    self.declare_variable();
    if self.fs_ref().scope_depth > 0 {
      return 0;
    }
    let name = self.lexeme(&self.previous).to_string();
    self.identifier_constant(&name)
  }

  pub(crate) fn define_variable(&mut self, global: u8) {
    if self.fs_ref().scope_depth > 0 {
      return;
    }
    self.emit_ops(Opcode::DefineGlobal, global);
  }

  fn variable_declaration(&mut self) {
    let mut globals = Vec::new();
    loop {
      globals.push(self.parse_variable("Expect variable name."));
      if globals.len() > 255 {
        self.error("Too many variables in declaration.");
        return;
      }
      if !self.match_(TokenKind::Tok_Comma) {
        break;
      }
    }

    if self.match_(TokenKind::Op_Equal) {
      let start_line = self.current.line;
      let mut expr_count: usize;
      if globals.len() == 1 && self.rhs_has_top_level_comma(start_line) {
        self.parse_array_literal_from_comma_list();
        expr_count = 1;
      } else {
        expr_count = 0;
        loop {
          self.type_reset();
          self.expression();
          expr_count += 1;
          if !self.match_(TokenKind::Tok_Comma) {
            break;
          }
        }
      }
      if expr_count > 1 {
        while expr_count < globals.len() {
          self.emit_op(Opcode::Nil);
          expr_count += 1;
        }
      }
    } else {
      for _ in &globals {
        self.emit_op(Opcode::Nil);
      }
    }

    if self.fs_ref().scope_depth > 0 {
      self.mark_initialized_count(globals.len());
    }

    for global in globals.iter().rev() {
      self.define_variable(*global);
    }
  }

  fn global_declaration(&mut self) {
    let mut names = Vec::new();
    loop {
      self.consume(TokenKind::Lit_Ident, "Expect variable name.");
      let name = self.lexeme(&self.previous).to_string();
      self.register_explicit_global(&name);
      names.push(name);
      if names.len() > 255 {
        self.error("Too many variables in declaration.");
        return;
      }
      if !self.match_(TokenKind::Tok_Comma) {
        break;
      }
    }

    if self.fs_ref().kind == FunctionKind::Function && !self.check(TokenKind::Op_Equal) {
      // `global x` inside a function only declares binding intent
      return;
    }

    if self.match_(TokenKind::Op_Equal) {
      let start_line = self.current.line;
      let mut expr_count: usize;
      if names.len() == 1 && self.rhs_has_top_level_comma(start_line) {
        self.parse_array_literal_from_comma_list();
        expr_count = 1;
      } else {
        expr_count = 0;
        loop {
          self.type_reset();
          self.expression();
          expr_count += 1;
          if !self.match_(TokenKind::Tok_Comma) {
            break;
          }
        }
      }
      if expr_count > 1 {
        while expr_count < names.len() {
          self.emit_op(Opcode::Nil);
          expr_count += 1;
        }
      }
    } else {
      for _ in &names {
        self.emit_op(Opcode::Nil);
      }
    }

    for name in names.iter().rev() {
      let index = self.identifier_constant(name);
      self.emit_ops(Opcode::DefineGlobal, index);
    }
  }

  fn function_declaration(&mut self) {
    let _ = self.function_declaration_named();
  }

  fn function_declaration_named(&mut self) -> String {
    let global = self.parse_variable("Expect function name.");
    let name = self.lexeme(&self.previous).to_string();
    if self.fs_ref().scope_depth > 0 {
      self.mark_initialized();
    }
    self.function_body(FunctionKind::Function);
    self.define_variable(global);
    name
  }

  fn global_function_declaration(&mut self) {
    let _ = self.global_function_declaration_named();
  }

  fn global_function_declaration_named(&mut self) -> String {
    self.consume(TokenKind::Lit_Ident, "Expect function name.");
    let name = self.lexeme(&self.previous).to_string();
    let global = self.identifier_constant(&name);
    self.function_body(FunctionKind::Function);
    self.emit_ops(Opcode::DefineGlobal, global);
    name
  }

  fn decorated_function_declaration(&mut self) {
    use TokenKind::*;
    let mut decorators: Vec<(usize, usize)> = Vec::new();

    loop {
      if self.current.line != self.previous.line || self.current.kind == Tok_Eof {
        self.error("Expect decorator expression after '@'.");
        return;
      }

      let start = self.current.span.start;
      let mut end = start;
      let line = self.previous.line;
      while self.current.kind != Tok_Eof && self.current.line == line {
        end = self.current.span.end;
        self.advance();
      }

      if decorators.len() == 64 {
        self.error("Too many decorators on function.");
        return;
      }
      decorators.push((start, end));

      if !self.match_(Op_At) {
        break;
      }
    }

    let name = if self.match_(Kw_Fn) {
      self.function_declaration_named()
    } else if self.match_(Kw_Local) {
      self.consume(Kw_Fn, "Expect 'fn' after 'local' in decorated declaration.");
      self.function_declaration_named()
    } else if self.match_(Kw_Global) {
      self.consume(Kw_Fn, "Expect 'fn' after 'global' in decorated declaration.");
      self.global_function_declaration_named()
    } else {
      self.error("Decorators can only be applied to function declarations.");
      return;
    };

    // innermost decorator applies first
    let src = self.src;
    for (start, end) in decorators.into_iter().rev() {
      let slice = &src[start..end];
      self.compile_trimmed_expression(slice);
      self.emit_get_named(&name);
      self.emit_call(1);
      self.emit_set_named(&name);
      self.emit_op(Opcode::Pop);
    }
  }

  // ---- functions ----

  pub(crate) fn function_body(&mut self, kind: FunctionKind) {
    use TokenKind::*;
    self.begin_function(kind);
    self.begin_scope();

    self.consume(Brk_ParenL, "Expect '(' after function name.");
    let mut param_index = 0;
    if !self.check(Brk_ParenR) {
      loop {
        if self.match_(Op_Star) {
          self.fs().is_variadic = true;
          self.fs().arity += 1;

          let constant = self.parse_variable("Expect parameter name after '*'.");
          let param_name = self.lexeme(&self.previous).to_string();
          if param_index == 0 && param_name == "self" {
            self.fs().is_self = true;
          }
          param_index += 1;
          if self.match_(Tok_Colon) {
            self.consume(Lit_Ident, "Expect type name after ':'.");
            let ty = parse_type_name(self.lexeme(&self.previous));
            let local = self.fs_ref().locals.len() - 1;
            self.set_local_type(local, ty);
            let param = self.fs_ref().arity - 1;
            self.set_param_type(param, ty);
          }
          let param = self.fs_ref().arity - 1;
          self.set_param_name(param, &param_name);
          self.define_variable(constant);
          // *rest must be the last parameter
          break;
        }

        self.fs().arity += 1;
        if self.fs_ref().arity > 255 {
          self.error_at_current("Can't have more than 255 parameters.");
        }
        let constant = self.parse_variable("Expect parameter name.");
        let param_name = self.lexeme(&self.previous).to_string();
        if param_index == 0 && param_name == "self" {
          self.fs().is_self = true;
        }
        param_index += 1;
        if self.match_(Tok_Colon) {
          self.consume(Lit_Ident, "Expect type name after ':'.");
          let ty = parse_type_name(self.lexeme(&self.previous));
          let local = self.fs_ref().locals.len() - 1;
          self.set_local_type(local, ty);
          let param = self.fs_ref().arity - 1;
          self.set_param_type(param, ty);
        }
        let param = self.fs_ref().arity - 1;
        self.set_param_name(param, &param_name);

        if self.match_(Op_Equal) {
          if self.match_(Lit_Number) {
            let lexeme = self.lexeme(&self.previous);
            let cleaned: String = lexeme.chars().filter(|&c| c != '_').collect();
            let value: f64 = cleaned.parse().unwrap_or(0.0);
            self.fs().defaults.push(Value::Number(value));
          } else if self.match_(Lit_String) {
            let text = self.string_from_token(&self.previous);
            self.fs().defaults.push(Value::str(text));
          } else if self.match_(Kw_Nil) {
            self.fs().defaults.push(Value::Nil);
          } else if self.match_(Kw_True) {
            self.fs().defaults.push(Value::Bool(true));
          } else if self.match_(Kw_False) {
            self.fs().defaults.push(Value::Bool(false));
          } else {
            self.error("Default value must be a constant (number, string, nil, true, false).");
          }
        } else if !self.fs_ref().defaults.is_empty() {
          self.error("Parameters with defaults cannot be followed by parameters without defaults.");
        }

        self.define_variable(constant);
        if !self.match_(Tok_Comma) {
          break;
        }
      }
    }
    self.consume(Brk_ParenR, "Expect ')' after parameters.");

    // parameters are initialized at function entry
    let depth = self.fs_ref().scope_depth;
    for local in self.fs().locals.iter_mut() {
      if local.depth == -1 {
        local.depth = depth;
      }
    }

    let header_line = self.previous.line;
    self.match_(Tok_Colon);

    if self.match_(Tok_Indent) {
      self.maybe_capture_docstring();
      self.block();
      self.match_(Tok_Dedent);
    } else if self.current.line > header_line {
      if !self.state.in_table_entry_expression {
        self.error("Expected indented block for function body.");
      } else {
        let header_indent = self.token_indent(&self.previous);
        let body_indent = self.token_indent(&self.current);
        if body_indent <= header_indent {
          self.error("Expected indented block for function body.");
        } else {
          self.maybe_capture_docstring();
          while !self.check(Tok_Eof)
            && !self.check(Brk_CurlyR)
            && self.current.line > header_line
            && self.token_indent(&self.current) > header_indent
          {
            self.statement();
          }
        }
      }
    } else {
      self.maybe_capture_docstring();
      if !self.check(Tok_Eof) && !self.check(Tok_Dedent) && !self.check(Brk_CurlyR) {
        self.statement();
      }
    }

    self.finish_function();
  }

  fn maybe_capture_docstring(&mut self) {
    use TokenKind::*;
    if !self.check(Lit_String) {
      return;
    }
    let first = self.current;
    let mut peek = self.peek_lexer();
    let next = peek.next_token();
    if !(next.kind == Tok_Dedent || next.kind == Tok_Eof || next.line > first.line) {
      return;
    }
    self.advance();
    let text = self.string_from_token(&self.previous);
    self.fs().doc = Some(text);
  }

  fn set_param_type(&mut self, index: usize, ty: TypeHint) {
    let arity = self.fs_ref().arity;
    let types = &mut self.fs().param_types;
    if types.len() < arity {
      types.resize(arity, TypeHint::Any);
    }
    if index < types.len() {
      types[index] = ty;
    }
  }

  fn set_param_name(&mut self, index: usize, name: &str) {
    let arity = self.fs_ref().arity;
    let names = &mut self.fs().param_names;
    if names.len() < arity {
      names.resize(arity, None);
    }
    if index < names.len() {
      names[index] = Some(name.to_string());
    }
  }

  // ---- imports ----

  fn import_statement(&mut self) {
    let (path, last) = self.parse_module_path();
    self.declare_variable_named(&last);
    let index = self.make_constant(Value::str(path));
    self.emit_ops(Opcode::Import, index);
    if self.fs_ref().scope_depth > 0 {
      self.mark_initialized();
    } else {
      let name = self.identifier_constant(&last);
      self.emit_ops(Opcode::DefineGlobal, name);
    }
  }

  fn from_import_statement(&mut self) {
    use TokenKind::*;
    let (path, _) = self.parse_module_path();
    self.consume(Kw_Import, "Expect 'import' after module path.");

    let path_constant = self.make_constant(Value::str(path));
    if self.match_(Op_Star) {
      self.emit_ops(Opcode::Import, path_constant);
      self.emit_op(Opcode::ImportStar);
      return;
    }

    loop {
      self.consume(Lit_Ident, "Expect imported name.");
      let name = self.lexeme(&self.previous).to_string();

      self.emit_ops(Opcode::Import, path_constant);
      self.emit_constant(Value::str(name.clone()));
      self.emit_op(Opcode::GetTable);

      if self.fs_ref().scope_depth > 0 {
        self.declare_variable_named(&name);
        self.mark_initialized();
      } else {
        let index = self.identifier_constant(&name);
        self.emit_ops(Opcode::DefineGlobal, index);
      }
      if !self.match_(Tok_Comma) {
        break;
      }
    }
  }

  // ---- multiple assignment ----

  fn is_multi_assignment_statement(&self) -> bool {
    use TokenKind::*;
    if !self.check(Lit_Ident) {
      return false;
    }
    let start_line = self.current.line;
    let mut targets = 1;
    let mut peek = self.peek_lexer();
    loop {
      let tok = peek.next_token();
      if tok.line > start_line {
        return false;
      }
      if tok.kind == Tok_Comma {
        let tok = peek.next_token();
        if tok.line > start_line || tok.kind != Lit_Ident {
          return false;
        }
        targets += 1;
        continue;
      }
      return tok.kind == Op_Equal && targets > 1;
    }
  }

  fn assign_name_from_stack(&mut self, name: &str, rhs_ty: TypeHint) {
    if let Some(slot) = self.resolve_local(name) {
      self.emit_ops(Opcode::SetLocal, slot);
      self.update_local_type(slot as usize, rhs_ty);
      return;
    }

    if self.is_explicit_global(name) {
      let index = self.identifier_constant(name);
      self.emit_ops(Opcode::SetGlobal, index);
      return;
    }

    if let Some(slot) = self.resolve_upvalue(name) {
      self.emit_ops(Opcode::SetUpvalue, slot);
      return;
    }

    if self.fs_ref().kind == FunctionKind::Function {
      let slot = self.fs_ref().locals.len() as u8;
      self.add_local(name);
      self.mark_initialized();
      self.emit_ops(Opcode::SetLocal, slot);
      self.set_local_type(slot as usize, rhs_ty);
      return;
    }

    if self.state.repl && self.fs_ref().kind == FunctionKind::Script {
      let index = self.identifier_constant(name);
      self.emit_op(Opcode::Dup);
      self.emit_ops(Opcode::DefineGlobal, index);
      return;
    }

    let slot = self.fs_ref().locals.len() as u8;
    self.add_local(name);
    self.mark_initialized();
    self.emit_ops(Opcode::SetLocal, slot);
    self.set_local_type(slot as usize, rhs_ty);
  }

  fn multi_assignment_statement(&mut self) {
    use TokenKind::*;
    let mut targets = Vec::new();
    loop {
      self.consume(Lit_Ident, "Expect variable name.");
      targets.push(self.lexeme(&self.previous).to_string());
      if targets.len() > 255 {
        self.error("Too many variables in assignment.");
        return;
      }
      if !self.match_(Tok_Comma) {
        break;
      }
    }

    if !(self.state.repl && self.fs_ref().kind == FunctionKind::Script) {
      let mut declared = 0;
      for i in 0..targets.len() {
        if self.is_explicit_global(&targets[i]) {
          continue;
        }
        if self.resolve_local(&targets[i]).is_some() {
          continue;
        }
        if targets[..i].contains(&targets[i]) {
          continue;
        }
        self.add_local(&targets[i]);
        declared += 1;
      }
      if declared > 0 {
        self.mark_initialized_count(declared);
      }
    }

    self.consume(Op_Equal, "Expect '=' in assignment.");

    // normalize the stack to the local slots before evaluating the RHS
    let local_count = self.fs_ref().locals.len() as u8;
    self.emit_ops(Opcode::AdjustStack, local_count);

    let mut expr_count: usize = 0;
    loop {
      self.type_reset();
      self.expression();
      expr_count += 1;
      if !self.match_(Tok_Comma) {
        break;
      }
    }

    if expr_count > 1 {
      // explicit multi-expression RHS: pad with nil
      while expr_count < targets.len() {
        self.emit_op(Opcode::Nil);
        expr_count += 1;
      }
    } else {
      // single expression: spread tables / multi-return values, pad nil
      self.emit_op(Opcode::Unpack);
      let local_count = self.fs_ref().locals.len() as u8;
      self.emit_byte(local_count);
      self.emit_byte(targets.len() as u8);
    }

    // assign right to left so stack order lines up with targets
    for name in targets.iter().rev() {
      let name = name.clone();
      self.assign_name_from_stack(&name, TypeHint::Any);
      self.emit_op(Opcode::Pop);
    }

    let local_count = self.fs_ref().locals.len() as u8;
    self.emit_ops(Opcode::AdjustStack, local_count);
  }
}

fn parse_type_name(name: &str) -> TypeHint {
  match name {
    "int" => TypeHint::Int,
    "float" => TypeHint::Float,
    "bool" => TypeHint::Bool,
    "str" | "string" => TypeHint::Str,
    "table" => TypeHint::Table,
    _ => TypeHint::Any,
  }
}
