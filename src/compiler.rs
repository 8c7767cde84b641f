//! Single-pass compiler: a Pratt parser that emits bytecode as it goes.
//!
//! There is no AST. A [`Session`] owns the lexer, the two-token parse
//! window, and a stack of [`FuncState`]s (one per function currently being
//! compiled); nothing survives a `compile` call. Sub-expressions that live
//! in their own little source buffers (f-string interpolations, decorator
//! slices, comprehension bodies) are compiled by a child session that
//! temporarily takes over the same state.

mod fstring;
mod opt;
mod stmt;

use beef::lean::Cow;
use diag::{Diagnostic, TokenLabel};
use span::Span;
use syntax::{Lexer, Token, TokenKind};

use crate::bytecode::{Chunk, Opcode};
use crate::object::{Function, Ptr, Str, TypeHint};
use crate::value::Value;

pub const MAX_LOCALS: usize = 256;
pub const MAX_UPVALUES: usize = 256;
const TYPE_STACK_LIMIT: usize = 512;

/// Compile a script. Top-level assignments are local-by-default.
pub fn compile(src: &str) -> Result<Ptr<Function>, Vec<Diagnostic>> {
  compile_inner(src, false)
}

/// Compile one REPL form: the top-level scope is depth 0, assignments
/// define globals, and the last expression value becomes the result.
pub fn compile_repl(src: &str) -> Result<Ptr<Function>, Vec<Diagnostic>> {
  compile_inner(src, true)
}

fn compile_inner(src: &str, repl: bool) -> Result<Ptr<Function>, Vec<Diagnostic>> {
  let mut session = Session::new(src, repl);
  session.begin_function(FunctionKind::Script);
  if repl {
    // slot 0 holds the last expression value for display
    session.emit_op(Opcode::Nil);
    session.emit_ops(Opcode::SetLocal, 0);
    session.emit_op(Opcode::Pop);
  }

  session.advance();
  while !session.match_(TokenKind::Tok_Eof) {
    session.declaration();
  }

  let (function, _) = session.end_function();
  if session.state.had_error {
    Err(session.state.diagnostics)
  } else {
    Ok(function)
  }
}

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum Prec {
  None,
  Assignment,
  Ternary,
  Or,
  And,
  Equality,
  Comparison,
  Range,
  Term,
  Factor,
  Unary,
  Call,
  Primary,
}

impl Prec {
  fn next(self) -> Prec {
    use Prec::*;
    match self {
      None => Assignment,
      Assignment => Ternary,
      Ternary => Or,
      Or => And,
      And => Equality,
      Equality => Comparison,
      Comparison => Range,
      Range => Term,
      Term => Factor,
      Factor => Unary,
      Unary => Call,
      Call | Primary => Primary,
    }
  }
}

type ParseFn<'src> = fn(&mut Session<'src>, bool);

struct Rule<'src> {
  prefix: Option<ParseFn<'src>>,
  infix: Option<ParseFn<'src>>,
  prec: Prec,
}

fn rule<'src>(kind: TokenKind) -> Rule<'src> {
  use TokenKind::*;

  let (prefix, infix, prec): (Option<ParseFn>, Option<ParseFn>, Prec) = match kind {
    Brk_ParenL => (Some(Session::grouping), Some(Session::parse_call), Prec::Call),
    Brk_CurlyL => (Some(Session::table), Some(Session::table_infix), Prec::Call),
    Brk_SquareL => (None, Some(Session::subscript), Prec::Call),
    Op_Dot => (None, Some(Session::dot), Prec::Call),
    Op_ColonColon => (None, Some(Session::meta_dot), Prec::Call),
    Op_Range => (None, Some(Session::range_expr), Prec::Range),
    Op_Minus => (Some(Session::unary), Some(Session::binary), Prec::Term),
    Op_Plus => (None, Some(Session::binary), Prec::Term),
    Op_Append => (None, Some(Session::binary), Prec::Term),
    Op_Slash | Op_Star | Op_Percent | Op_StarStar | Op_SlashSlash => {
      (None, Some(Session::binary), Prec::Factor)
    }
    Op_BangEqual | Op_EqualEqual => (None, Some(Session::binary), Prec::Equality),
    Op_Less | Op_LessEqual | Op_More | Op_MoreEqual => {
      (None, Some(Session::binary), Prec::Comparison)
    }
    Op_Hash => (Some(Session::unary), None, Prec::None),
    Op_Question => (None, Some(Session::ternary), Prec::Ternary),
    Kw_In | Kw_Has => (None, Some(Session::binary), Prec::Comparison),
    Kw_And => (None, Some(Session::and_), Prec::And),
    Kw_Or => (None, Some(Session::or_), Prec::Or),
    Kw_Not => (Some(Session::unary), Some(Session::not_in), Prec::Comparison),
    Kw_Nil | Kw_True | Kw_False => (Some(Session::literal), None, Prec::None),
    Kw_Fn => (Some(Session::anonymous_function), None, Prec::None),
    Kw_Import => (Some(Session::import_expression), None, Prec::None),
    Lit_Ident => (Some(Session::variable), None, Prec::None),
    Lit_Number => (Some(Session::number), None, Prec::None),
    Lit_String => (Some(Session::string), None, Prec::None),
    Lit_Fstring => (Some(Session::fstring), None, Prec::None),
    _ => (None, None, Prec::None),
  };
  Rule { prefix, infix, prec }
}

#[derive(Clone, Copy, PartialEq, Eq)]
pub(crate) enum FunctionKind {
  Script,
  Function,
}

pub(crate) struct Local {
  pub name: String,
  /// -1 while declared but not yet initialized.
  pub depth: i32,
  pub is_captured: bool,
  pub ty: TypeHint,
}

#[derive(Clone, Copy)]
pub(crate) struct UpvalueDesc {
  pub index: u8,
  pub is_local: bool,
}

pub(crate) struct LoopContext {
  pub start: usize,
  pub scope_depth: i32,
  pub break_jumps: Vec<usize>,
  pub continue_jumps: Vec<usize>,
  pub is_for_loop: bool,
  pub slots_to_pop: usize,
}

pub(crate) struct TryPatch {
  pub flags_offset: usize,
  pub except_offset: usize,
  pub finally_offset: usize,
}

/// Per-function compile state.
pub(crate) struct FuncState {
  pub kind: FunctionKind,
  pub name: Option<String>,
  pub arity: usize,
  pub is_variadic: bool,
  pub is_generator: bool,
  pub is_self: bool,
  pub chunk: Chunk,
  pub param_types: Vec<TypeHint>,
  pub param_names: Vec<Option<String>>,
  pub defaults: Vec<Value>,
  pub doc: Option<String>,
  pub locals: Vec<Local>,
  pub explicit_globals: Vec<String>,
  pub upvalues: Vec<UpvalueDesc>,
  pub scope_depth: i32,
  pub loops: Vec<LoopContext>,
}

/// State that survives sub-session handoffs (f-strings, decorators,
/// comprehension bodies compile from their own buffers).
#[derive(Default)]
pub(crate) struct State {
  pub funcs: Vec<FuncState>,
  pub repl: bool,
  pub had_error: bool,
  pub diagnostics: Vec<Diagnostic>,
  pub in_for_range_header: bool,
  pub in_table_entry_expression: bool,
  pub last_expr_ends_with_call: bool,
  pub last_expr_was_range: bool,
  pub type_stack: Vec<TypeHint>,
}

impl Default for FuncState {
  fn default() -> Self {
    FuncState {
      kind: FunctionKind::Script,
      name: None,
      arity: 0,
      is_variadic: false,
      is_generator: false,
      is_self: false,
      chunk: Chunk::new("<script>"),
      param_types: Vec::new(),
      param_names: Vec::new(),
      defaults: Vec::new(),
      doc: None,
      locals: Vec::new(),
      explicit_globals: Vec::new(),
      upvalues: Vec::new(),
      scope_depth: 0,
      loops: Vec::new(),
    }
  }
}

pub(crate) struct Session<'src> {
  src: &'src str,
  lexer: Lexer<'src>,
  pub(crate) previous: Token,
  pub(crate) current: Token,
  panic_mode: bool,
  pub(crate) state: State,
}

impl<'src> Session<'src> {
  fn new(src: &'src str, repl: bool) -> Session<'src> {
    let mut session = Session::with_state(src, State::default());
    session.state.repl = repl;
    session
  }

  fn with_state(src: &'src str, state: State) -> Session<'src> {
    let placeholder = Token {
      kind: TokenKind::Tok_Eof,
      span: Span::empty(0),
      line: 1,
    };
    Session {
      src,
      lexer: Lexer::new(src),
      previous: placeholder,
      current: placeholder,
      panic_mode: false,
      state,
    }
  }

  // ---- tokens ----

  pub(crate) fn lexeme(&self, token: &Token) -> &'src str {
    &self.src[token.span.range()]
  }

  pub(crate) fn advance(&mut self) {
    self.previous = self.current;
    loop {
      self.current = self.lexer.next_token();
      if self.current.kind != TokenKind::Tok_Error {
        break;
      }
      let message = self
        .lexer
        .error
        .take()
        .unwrap_or(Cow::borrowed("Invalid token."));
      let token = self.current;
      self.error_at(token, message);
    }
  }

  pub(crate) fn consume(&mut self, kind: TokenKind, message: &'static str) {
    if self.current.kind == kind {
      self.advance();
      return;
    }
    self.error_at_current(message);
  }

  pub(crate) fn match_(&mut self, kind: TokenKind) -> bool {
    if self.current.kind == kind {
      self.advance();
      return true;
    }
    false
  }

  pub(crate) fn check(&self, kind: TokenKind) -> bool {
    self.current.kind == kind
  }

  // ---- errors ----

  pub(crate) fn error_at(&mut self, token: Token, message: impl Into<Cow<'static, str>>) {
    if self.panic_mode {
      return;
    }
    self.panic_mode = true;
    let label = match token.kind {
      TokenKind::Tok_Eof => TokenLabel::Eof,
      TokenKind::Tok_Error => TokenLabel::None,
      _ => TokenLabel::Lexeme(self.lexeme(&token).to_string()),
    };
    self
      .state
      .diagnostics
      .push(Diagnostic::new(token.line, token.span, label, message.into()));
    self.state.had_error = true;
  }

  pub(crate) fn error(&mut self, message: impl Into<Cow<'static, str>>) {
    let token = self.previous;
    self.error_at(token, message);
  }

  pub(crate) fn error_at_current(&mut self, message: impl Into<Cow<'static, str>>) {
    let token = self.current;
    self.error_at(token, message);
  }

  // ---- function state ----

  pub(crate) fn fs(&mut self) -> &mut FuncState {
    self.state.funcs.last_mut().expect("no function under compilation")
  }

  pub(crate) fn fs_ref(&self) -> &FuncState {
    self.state.funcs.last().expect("no function under compilation")
  }

  pub(crate) fn begin_function(&mut self, kind: FunctionKind) {
    let mut fs = FuncState {
      kind,
      ..FuncState::default()
    };
    if kind == FunctionKind::Script {
      // scripts are local-by-default, except in REPL mode where the
      // top-level scope stays at depth 0 so assignments define globals
      if !self.state.repl {
        fs.scope_depth = 1;
      }
    } else {
      let name = self.lexeme(&self.previous).to_string();
      fs.chunk.name = Cow::owned(name.clone());
      fs.name = Some(name);
    }
    // slot 0 is reserved for the callee
    fs.locals.push(Local {
      name: String::new(),
      depth: 0,
      is_captured: false,
      ty: TypeHint::Any,
    });
    self.state.funcs.push(fs);
  }

  pub(crate) fn end_function(&mut self) -> (Ptr<Function>, Vec<UpvalueDesc>) {
    self.emit_return();
    let fs = self.state.funcs.pop().expect("unbalanced end_function");
    let mut chunk = fs.chunk;
    if !self.state.had_error {
      opt::optimize(&mut chunk);
    }
    chunk.prime_caches();
    let function = Function {
      name: fs.name.map(Str::intern),
      arity: fs.arity.min(255) as u8,
      is_variadic: fs.is_variadic,
      is_generator: fs.is_generator,
      is_self: fs.is_self,
      upvalue_count: fs.upvalues.len().min(255) as u8,
      chunk,
      param_types: fs.param_types,
      param_names: fs.param_names.into_iter().map(|n| n.map(Str::intern)).collect(),
      defaults: fs.defaults,
      doc: fs.doc.map(Str::intern),
    };
    (Ptr::new(function), fs.upvalues)
  }

  fn emit_return(&mut self) {
    if self.fs_ref().kind == FunctionKind::Script && self.state.repl {
      self.emit_ops(Opcode::GetLocal, 0);
      self.emit_op(Opcode::Return);
    } else {
      self.emit_op(Opcode::Nil);
      self.emit_op(Opcode::Return);
    }
  }

  /// `end_function` plus the `Closure` instruction in the enclosing chunk.
  pub(crate) fn finish_function(&mut self) {
    let (function, upvalues) = self.end_function();
    let index = self.make_constant(Value::Function(function));
    self.emit_ops(Opcode::Closure, index);
    for upvalue in upvalues {
      self.emit_byte(upvalue.is_local as u8);
      self.emit_byte(upvalue.index);
    }
  }

  // ---- emission ----

  pub(crate) fn emit_byte(&mut self, byte: u8) {
    let line = self.previous.line;
    self.fs().chunk.write(byte, line);
  }

  pub(crate) fn emit_op(&mut self, op: Opcode) {
    self.emit_byte(op as u8);
  }

  pub(crate) fn emit_ops(&mut self, op: Opcode, operand: u8) {
    self.emit_op(op);
    self.emit_byte(operand);
  }

  pub(crate) fn emit_call(&mut self, argc: u8) {
    match argc {
      0 => self.emit_op(Opcode::Call0),
      1 => self.emit_op(Opcode::Call1),
      2 => self.emit_op(Opcode::Call2),
      n => self.emit_ops(Opcode::Call, n),
    }
  }

  pub(crate) fn code_len(&self) -> usize {
    self.fs_ref().chunk.code.len()
  }

  pub(crate) fn emit_jump(&mut self, op: Opcode) -> usize {
    self.emit_op(op);
    self.emit_byte(0xff);
    self.emit_byte(0xff);
    self.code_len() - 2
  }

  pub(crate) fn patch_jump(&mut self, offset: usize) {
    let target = self.code_len();
    self.patch_jump_to(offset, target);
  }

  pub(crate) fn patch_jump_to(&mut self, offset: usize, target: usize) {
    let jump = target - offset - 2;
    if jump > u16::MAX as usize {
      self.error("Too much code to jump over.");
      return;
    }
    let code = &mut self.fs().chunk.code;
    code[offset] = (jump >> 8) as u8;
    code[offset + 1] = (jump & 0xff) as u8;
  }

  pub(crate) fn emit_loop(&mut self, loop_start: usize) {
    self.emit_op(Opcode::Loop);
    let offset = self.code_len() - loop_start + 2;
    if offset > u16::MAX as usize {
      self.error("Loop body too large.");
    }
    self.emit_byte((offset >> 8) as u8);
    self.emit_byte((offset & 0xff) as u8);
  }

  pub(crate) fn emit_try(&mut self, depth: u8) -> TryPatch {
    self.emit_op(Opcode::Try);
    self.emit_byte(depth);
    let flags_offset = self.code_len();
    self.emit_byte(0);
    let except_offset = self.code_len();
    self.emit_byte(0);
    self.emit_byte(0);
    let finally_offset = self.code_len();
    self.emit_byte(0);
    self.emit_byte(0);
    TryPatch {
      flags_offset,
      except_offset,
      finally_offset,
    }
  }

  /// Point the try's except offset at the current position.
  pub(crate) fn patch_try(&mut self, offset: usize) {
    let jump = self.code_len() - offset - 4;
    if jump > u16::MAX as usize {
      self.error("Too much code to jump over.");
      return;
    }
    let code = &mut self.fs().chunk.code;
    code[offset] = (jump >> 8) as u8;
    code[offset + 1] = (jump & 0xff) as u8;
  }

  /// Point the try's finally offset at the current position.
  pub(crate) fn patch_try_finally(&mut self, offset: usize) {
    let jump = self.code_len() - offset - 2;
    if jump > u16::MAX as usize {
      self.error("Too much code to jump over.");
      return;
    }
    let code = &mut self.fs().chunk.code;
    code[offset] = (jump >> 8) as u8;
    code[offset + 1] = (jump & 0xff) as u8;
  }

  pub(crate) fn set_code_byte(&mut self, offset: usize, byte: u8) {
    self.fs().chunk.code[offset] = byte;
  }

  pub(crate) fn make_constant(&mut self, value: Value) -> u8 {
    match self.fs().chunk.add_constant(value) {
      Some(index) => index,
      None => {
        self.error("Too many constants in one chunk.");
        0
      }
    }
  }

  pub(crate) fn emit_constant(&mut self, value: Value) {
    let index = self.make_constant(value);
    self.emit_ops(Opcode::Constant, index);
  }

  pub(crate) fn identifier_constant(&mut self, name: &str) -> u8 {
    self.make_constant(Value::str(name))
  }

  // ---- type stack ----

  pub(crate) fn type_push(&mut self, ty: TypeHint) {
    if self.state.type_stack.len() < TYPE_STACK_LIMIT {
      self.state.type_stack.push(ty);
    }
  }

  pub(crate) fn type_pop(&mut self) -> TypeHint {
    self.state.type_stack.pop().unwrap_or(TypeHint::Any)
  }

  pub(crate) fn type_reset(&mut self) {
    self.state.type_stack.clear();
  }

  pub(crate) fn type_set_len(&mut self, len: usize) {
    self.state.type_stack.resize(len, TypeHint::Any);
  }

  // ---- scoping ----

  pub(crate) fn begin_scope(&mut self) {
    self.fs().scope_depth += 1;
  }

  pub(crate) fn end_scope(&mut self) {
    self.fs().scope_depth -= 1;
    loop {
      let leaving = {
        let fs = self.fs_ref();
        match fs.locals.last() {
          Some(local) if local.depth > fs.scope_depth => Some(local.is_captured),
          _ => None,
        }
      };
      let Some(captured) = leaving else {
        break;
      };
      if captured {
        self.emit_op(Opcode::CloseUpvalue);
      } else {
        self.emit_op(Opcode::Pop);
      }
      self.fs().locals.pop();
    }
  }

  pub(crate) fn add_local(&mut self, name: &str) {
    if self.fs_ref().locals.len() >= MAX_LOCALS {
      self.error("Too many local variables in function.");
      return;
    }
    self.fs().locals.push(Local {
      name: name.to_string(),
      depth: -1,
      is_captured: false,
      ty: TypeHint::Any,
    });
  }

  pub(crate) fn mark_initialized(&mut self) {
    if self.fs_ref().scope_depth == 0 {
      return;
    }
    let depth = self.fs_ref().scope_depth;
    if let Some(local) = self.fs().locals.last_mut() {
      local.depth = depth;
    }
  }

  pub(crate) fn mark_initialized_count(&mut self, count: usize) {
    if self.fs_ref().scope_depth == 0 {
      return;
    }
    let depth = self.fs_ref().scope_depth;
    let fs = self.fs();
    let len = fs.locals.len();
    for i in 0..count {
      fs.locals[len - 1 - i].depth = depth;
    }
  }

  pub(crate) fn declare_variable(&mut self) {
    let name = self.lexeme(&self.previous).to_string();
    self.declare_variable_named(&name);
  }

  pub(crate) fn declare_variable_named(&mut self, name: &str) {
    if self.fs_ref().scope_depth == 0 && !self.state.repl {
      return;
    }
    let fs = self.fs_ref();
    let mut shadowed = false;
    for local in fs.locals.iter().rev() {
      if local.depth != -1 && local.depth < fs.scope_depth {
        break;
      }
      if local.name == name {
        shadowed = true;
        break;
      }
    }
    if shadowed {
      self.error("Already a variable with this name in this scope.");
    }
    self.add_local(name);
  }

  pub(crate) fn resolve_local(&mut self, name: &str) -> Option<u8> {
    let top = self.state.funcs.len() - 1;
    self.resolve_local_in(top, name)
  }

  fn resolve_local_in(&mut self, func: usize, name: &str) -> Option<u8> {
    let index = self.state.funcs[func]
      .locals
      .iter()
      .rposition(|local| local.name == name)?;
    if self.state.funcs[func].locals[index].depth == -1 {
      self.error("Can't read local variable in its own initializer.");
    }
    Some(index as u8)
  }

  pub(crate) fn resolve_upvalue(&mut self, name: &str) -> Option<u8> {
    let top = self.state.funcs.len() - 1;
    self.resolve_upvalue_in(top, name)
  }

  fn resolve_upvalue_in(&mut self, func: usize, name: &str) -> Option<u8> {
    if func == 0 {
      return None;
    }
    let enclosing = func - 1;
    if let Some(local) = self.resolve_local_in(enclosing, name) {
      self.state.funcs[enclosing].locals[local as usize].is_captured = true;
      return Some(self.add_upvalue(func, local, true));
    }
    if let Some(upvalue) = self.resolve_upvalue_in(enclosing, name) {
      return Some(self.add_upvalue(func, upvalue, false));
    }
    None
  }

  fn add_upvalue(&mut self, func: usize, index: u8, is_local: bool) -> u8 {
    let upvalues = &mut self.state.funcs[func].upvalues;
    for (i, upvalue) in upvalues.iter().enumerate() {
      if upvalue.index == index && upvalue.is_local == is_local {
        return i as u8;
      }
    }
    if upvalues.len() >= MAX_UPVALUES {
      self.error("Too many closure variables in function.");
      return 0;
    }
    upvalues.push(UpvalueDesc { index, is_local });
    (self.state.funcs[func].upvalues.len() - 1) as u8
  }

  pub(crate) fn is_explicit_global(&self, name: &str) -> bool {
    self.fs_ref().explicit_globals.iter().any(|g| g == name)
  }

  pub(crate) fn register_explicit_global(&mut self, name: &str) {
    if self.fs_ref().kind == FunctionKind::Script {
      return;
    }
    if self.is_explicit_global(name) {
      return;
    }
    if self.fs_ref().explicit_globals.len() >= 256 {
      self.error("Too many global declarations in function.");
      return;
    }
    self.fs().explicit_globals.push(name.to_string());
  }

  pub(crate) fn set_local_type(&mut self, index: usize, ty: TypeHint) {
    let fs = self.fs();
    if index < fs.locals.len() {
      fs.locals[index].ty = ty;
    }
  }

  pub(crate) fn update_local_type(&mut self, index: usize, rhs: TypeHint) {
    let fs = self.fs();
    let Some(local) = fs.locals.get_mut(index) else {
      return;
    };
    if rhs == TypeHint::Any {
      local.ty = TypeHint::Any;
    } else if local.ty == TypeHint::Any {
      local.ty = rhs;
    } else if local.ty != rhs {
      local.ty = TypeHint::Any;
    }
  }

  // ---- expressions ----

  pub(crate) fn expression(&mut self) {
    self.state.last_expr_ends_with_call = false;
    self.state.last_expr_was_range = false;
    self.parse_precedence(Prec::Assignment);
  }

  fn parse_precedence(&mut self, prec: Prec) {
    self.advance();
    let Some(prefix) = rule(self.previous.kind).prefix else {
      self.error("Expect expression.");
      return;
    };
    let can_assign = prec <= Prec::Assignment;
    prefix(self, can_assign);

    while prec <= rule(self.current.kind).prec {
      if self.state.in_table_entry_expression
        && self.current.line > self.previous.line
        && is_table_entry_start(self.current.kind)
      {
        break;
      }
      self.advance();
      let infix = rule(self.previous.kind).infix.expect("infix rule missing");
      infix(self, can_assign);
    }

    if can_assign
      && (self.match_(TokenKind::Op_Equal)
        || self.match_(TokenKind::Op_Walrus)
        || self.match_compound_assign().is_some())
    {
      self.error("Invalid assignment target.");
    }
  }

  fn number(&mut self, _can_assign: bool) {
    let lexeme = self.lexeme(&self.previous);
    let is_int = !lexeme.contains(|c| matches!(c, '.' | 'e' | 'E'));
    let cleaned: String = lexeme.chars().filter(|&c| c != '_').collect();
    let value: f64 = cleaned.parse().unwrap_or(0.0);
    self.emit_constant(Value::Number(value));
    self.type_push(if is_int { TypeHint::Int } else { TypeHint::Float });
  }

  fn string(&mut self, _can_assign: bool) {
    let token = self.previous;
    let text = self.string_from_token(&token);
    self.emit_constant(Value::str(text));
    self.type_push(TypeHint::Str);
  }

  pub(crate) fn string_from_token(&self, token: &Token) -> String {
    let lexeme = self.lexeme(token);
    // raw multiline string
    if let Some(inner) = lexeme.strip_prefix("[[").and_then(|s| s.strip_suffix("]]")) {
      return inner.to_string();
    }
    let quote = lexeme.as_bytes()[0] as char;
    let inner = &lexeme[1..lexeme.len() - 1];
    decode_escapes(inner, quote)
  }

  fn literal(&mut self, _can_assign: bool) {
    match self.previous.kind {
      TokenKind::Kw_False => {
        self.emit_op(Opcode::False);
        self.type_push(TypeHint::Bool);
      }
      TokenKind::Kw_True => {
        self.emit_op(Opcode::True);
        self.type_push(TypeHint::Bool);
      }
      TokenKind::Kw_Nil => {
        self.emit_op(Opcode::Nil);
        self.type_push(TypeHint::Any);
      }
      _ => {}
    }
  }

  fn grouping(&mut self, can_assign: bool) {
    if self.current.kind != TokenKind::Brk_ParenL
      && self.is_generator_comprehension_start(self.previous.line)
    {
      self.generator_comprehension(can_assign);
      self.consume(TokenKind::Brk_ParenR, "Expect ')' after expression.");
      return;
    }
    self.expression();
    self.consume(TokenKind::Brk_ParenR, "Expect ')' after expression.");
  }

  fn unary(&mut self, _can_assign: bool) {
    let operator = self.previous.kind;
    self.parse_precedence(Prec::Unary);
    let rhs = self.type_pop();
    match operator {
      TokenKind::Kw_Not => {
        self.emit_op(Opcode::Not);
        self.type_push(TypeHint::Bool);
      }
      TokenKind::Op_Minus => {
        self.emit_op(Opcode::Negate);
        self.type_push(if rhs.is_numeric() { rhs } else { TypeHint::Any });
      }
      TokenKind::Op_Hash => {
        self.emit_op(Opcode::Length);
        self.type_push(TypeHint::Int);
      }
      _ => return,
    }
    self.state.last_expr_ends_with_call = false;
  }

  fn not_in(&mut self, _can_assign: bool) {
    self.consume(TokenKind::Kw_In, "Expect 'in' after 'not'.");
    self.parse_precedence(rule(TokenKind::Kw_In).prec.next());
    self.type_pop();
    self.type_pop();
    self.emit_op(Opcode::In);
    self.emit_op(Opcode::Not);
    self.type_push(TypeHint::Bool);
    self.state.last_expr_ends_with_call = false;
  }

  /// Emit the type-specialized opcode for a binary arithmetic operator.
  fn emit_arith(&mut self, operator: TokenKind, lhs: TypeHint, rhs: TypeHint) -> TypeHint {
    use TokenKind::*;
    let both_numeric = lhs.is_numeric() && rhs.is_numeric();
    let both_int = lhs == TypeHint::Int && rhs == TypeHint::Int;
    match operator {
      Op_Plus => {
        if both_numeric {
          if both_int {
            self.emit_op(Opcode::IAdd);
            return TypeHint::Int;
          }
          self.emit_op(Opcode::FAdd);
          return TypeHint::Float;
        }
        self.emit_op(Opcode::Add);
      }
      Op_Minus => {
        if both_numeric {
          if both_int {
            self.emit_op(Opcode::ISub);
            return TypeHint::Int;
          }
          self.emit_op(Opcode::FSub);
          return TypeHint::Float;
        }
        self.emit_op(Opcode::Subtract);
      }
      Op_Star => {
        if both_numeric {
          if both_int {
            self.emit_op(Opcode::IMul);
            return TypeHint::Int;
          }
          self.emit_op(Opcode::FMul);
          return TypeHint::Float;
        }
        self.emit_op(Opcode::Multiply);
      }
      Op_Slash => {
        if both_numeric {
          self.emit_op(Opcode::FDiv);
          return TypeHint::Float;
        }
        self.emit_op(Opcode::Divide);
      }
      Op_Percent => {
        if both_numeric {
          if both_int {
            self.emit_op(Opcode::IMod);
            return TypeHint::Int;
          }
          self.emit_op(Opcode::FMod);
          return TypeHint::Float;
        }
        self.emit_op(Opcode::Modulo);
      }
      _ => {}
    }
    TypeHint::Any
  }

  fn binary(&mut self, _can_assign: bool) {
    use TokenKind::*;
    let operator = self.previous.kind;
    self.parse_precedence(rule(operator).prec.next());
    let rhs = self.type_pop();
    let lhs = self.type_pop();
    let out = match operator {
      Op_BangEqual => {
        self.emit_op(Opcode::Equal);
        self.emit_op(Opcode::Not);
        TypeHint::Bool
      }
      Op_EqualEqual => {
        self.emit_op(Opcode::Equal);
        TypeHint::Bool
      }
      Op_More => {
        self.emit_op(Opcode::Greater);
        TypeHint::Bool
      }
      Op_MoreEqual => {
        self.emit_op(Opcode::Less);
        self.emit_op(Opcode::Not);
        TypeHint::Bool
      }
      Op_Less => {
        self.emit_op(Opcode::Less);
        TypeHint::Bool
      }
      Op_LessEqual => {
        self.emit_op(Opcode::Greater);
        self.emit_op(Opcode::Not);
        TypeHint::Bool
      }
      Kw_Has => {
        self.emit_op(Opcode::Has);
        TypeHint::Bool
      }
      Kw_In => {
        self.emit_op(Opcode::In);
        TypeHint::Bool
      }
      Op_Append => {
        self.emit_op(Opcode::Append);
        TypeHint::Any
      }
      Op_StarStar => {
        self.emit_op(Opcode::Power);
        TypeHint::Any
      }
      Op_SlashSlash => {
        self.emit_op(Opcode::IntDiv);
        TypeHint::Any
      }
      Op_Plus | Op_Minus | Op_Star | Op_Slash | Op_Percent => self.emit_arith(operator, lhs, rhs),
      _ => return,
    };
    self.type_push(out);
    self.state.last_expr_ends_with_call = false;
  }

  fn and_(&mut self, _can_assign: bool) {
    self.type_pop();
    let end_jump = self.emit_jump(Opcode::JumpIfFalse);
    self.emit_op(Opcode::Pop);
    self.parse_precedence(Prec::And);
    self.patch_jump(end_jump);
    self.type_pop();
    self.type_push(TypeHint::Any);
    self.state.last_expr_ends_with_call = false;
  }

  fn or_(&mut self, _can_assign: bool) {
    self.type_pop();
    let else_jump = self.emit_jump(Opcode::JumpIfFalse);
    let end_jump = self.emit_jump(Opcode::Jump);
    self.patch_jump(else_jump);
    self.emit_op(Opcode::Pop);
    self.parse_precedence(Prec::Or);
    self.patch_jump(end_jump);
    self.type_pop();
    self.type_push(TypeHint::Any);
    self.state.last_expr_ends_with_call = false;
  }

  fn ternary(&mut self, _can_assign: bool) {
    self.type_pop();
    let else_branch = self.emit_jump(Opcode::JumpIfFalse);
    self.emit_op(Opcode::Pop);
    self.parse_precedence(Prec::Ternary.next());
    self.consume(
      TokenKind::Tok_Colon,
      "Expect ':' after true branch of ternary operator.",
    );
    let end_jump = self.emit_jump(Opcode::Jump);
    self.patch_jump(else_branch);
    self.emit_op(Opcode::Pop);
    // same precedence on the false branch makes `?:` right-associative
    self.parse_precedence(Prec::Ternary);
    self.patch_jump(end_jump);
    let false_ty = self.type_pop();
    let true_ty = self.type_pop();
    self.type_push(if true_ty == false_ty { true_ty } else { TypeHint::Any });
    self.state.last_expr_ends_with_call = false;
  }

  fn range_expr(&mut self, _can_assign: bool) {
    self.parse_precedence(Prec::Term);
    if self.state.in_for_range_header {
      // the `for` header turns (start, end) into a numeric loop itself
      self.state.last_expr_was_range = true;
      return;
    }
    self.emit_op(Opcode::Range);
    self.type_pop();
    self.type_pop();
    self.type_push(TypeHint::Any);
    self.state.last_expr_ends_with_call = false;
  }

  fn variable(&mut self, can_assign: bool) {
    let token = self.previous;
    self.named_variable(token, can_assign);
  }

  pub(crate) fn match_compound_assign(&mut self) -> Option<TokenKind> {
    use TokenKind::*;
    for (tok, op) in [
      (Op_PlusEqual, Op_Plus),
      (Op_MinusEqual, Op_Minus),
      (Op_StarEqual, Op_Star),
      (Op_SlashEqual, Op_Slash),
      (Op_PercentEqual, Op_Percent),
    ] {
      if self.match_(tok) {
        return Some(op);
      }
    }
    None
  }

  pub(crate) fn named_variable(&mut self, token: Token, can_assign: bool) {
    use TokenKind::*;
    let name = self.lexeme(&token).to_string();
    let declared_global = self.is_explicit_global(&name);

    enum Target {
      Local(u8),
      Upvalue(u8),
      Global,
    }

    let target = if let Some(slot) = self.resolve_local(&name) {
      Target::Local(slot)
    } else if let Some(slot) = (!declared_global)
      .then(|| self.resolve_upvalue(&name))
      .flatten()
    {
      Target::Upvalue(slot)
    } else {
      Target::Global
    };

    if can_assign && (self.match_(Op_Equal) || self.match_(Op_Walrus)) {
      let walrus = self.previous.kind == Op_Walrus;
      let in_function = self.fs_ref().kind == FunctionKind::Function;

      // `x = e` in a function binds a fresh local unless `x` resolves;
      // the local is pre-declared so the RHS can close over it
      let mut target = target;
      let mut predeclared = false;
      if in_function && !declared_global && matches!(target, Target::Global) && !walrus {
        let slot = self.fs_ref().locals.len() as u8;
        self.add_local(&name);
        self.mark_initialized();
        self.emit_op(Opcode::Nil);
        self.emit_ops(Opcode::SetLocal, slot);
        self.emit_op(Opcode::Pop);
        target = Target::Local(slot);
        predeclared = true;
      }

      let start_line = self.current.line;
      if !walrus && self.rhs_has_top_level_comma(start_line) {
        self.parse_array_literal_from_comma_list();
      } else {
        self.expression();
      }
      let rhs_ty = self.type_pop();

      if declared_global {
        let index = self.identifier_constant(&name);
        self.emit_ops(Opcode::SetGlobal, index);
      } else {
        match target {
          Target::Local(slot) => {
            self.emit_ops(Opcode::SetLocal, slot);
            self.update_local_type(slot as usize, rhs_ty);
          }
          Target::Upvalue(slot) => {
            self.emit_ops(Opcode::SetUpvalue, slot);
          }
          Target::Global if in_function && !predeclared => {
            let slot = self.fs_ref().locals.len() as u8;
            self.add_local(&name);
            self.mark_initialized();
            self.emit_ops(Opcode::SetLocal, slot);
            self.set_local_type(slot as usize, rhs_ty);
          }
          Target::Global if walrus => {
            let index = self.identifier_constant(&name);
            self.emit_ops(Opcode::SetGlobal, index);
          }
          Target::Global => {
            self.assignment_store_global(&name, rhs_ty);
          }
        }
      }
      self.type_push(rhs_ty);
      return;
    }

    if can_assign {
      if let Some(operator) = self.match_compound_assign() {
        let in_function = self.fs_ref().kind == FunctionKind::Function;
        let mut lhs_ty = TypeHint::Any;
        if declared_global {
          let index = self.identifier_constant(&name);
          self.emit_ops(Opcode::GetGlobal, index);
        } else {
          match target {
            Target::Local(slot) => {
              self.emit_ops(Opcode::GetLocal, slot);
              lhs_ty = self
                .fs_ref()
                .locals
                .get(slot as usize)
                .map(|l| l.ty)
                .unwrap_or(TypeHint::Any);
            }
            Target::Upvalue(slot) => {
              self.emit_ops(Opcode::GetUpvalue, slot);
            }
            Target::Global if in_function => {
              // a typo'd compound assignment would otherwise target a
              // silent nil-initialized local
              self.error(format!("Undefined variable '{name}' in compound assignment."));
              return;
            }
            Target::Global => {
              let index = self.identifier_constant(&name);
              self.emit_ops(Opcode::GetGlobal, index);
            }
          }
        }
        self.type_push(lhs_ty);
        self.expression();
        let rhs_ty = self.type_pop();
        let lhs_ty = self.type_pop();
        let out = self.emit_arith(operator, lhs_ty, rhs_ty);

        if declared_global {
          let index = self.identifier_constant(&name);
          self.emit_ops(Opcode::SetGlobal, index);
        } else {
          match target {
            Target::Local(slot) => {
              self.emit_ops(Opcode::SetLocal, slot);
              self.update_local_type(slot as usize, out);
            }
            Target::Upvalue(slot) => {
              self.emit_ops(Opcode::SetUpvalue, slot);
            }
            Target::Global => {
              self.assignment_store_global(&name, out);
            }
          }
        }
        self.type_push(out);
        return;
      }
    }

    match target {
      Target::Local(slot) => {
        self.emit_ops(Opcode::GetLocal, slot);
        let ty = self
          .fs_ref()
          .locals
          .get(slot as usize)
          .map(|l| l.ty)
          .unwrap_or(TypeHint::Any);
        self.type_push(ty);
      }
      Target::Upvalue(slot) => {
        self.emit_ops(Opcode::GetUpvalue, slot);
        self.type_push(TypeHint::Any);
      }
      Target::Global => {
        let index = self.identifier_constant(&name);
        self.emit_ops(Opcode::GetGlobal, index);
        self.type_push(TypeHint::Any);
      }
    }
  }

  /// Assignment to an unresolved name at statement level: REPL top scope
  /// defines a global (keeping the value for display); everywhere else it
  /// binds a fresh local.
  fn assignment_store_global(&mut self, name: &str, rhs_ty: TypeHint) {
    if self.state.repl && self.fs_ref().kind == FunctionKind::Script {
      let index = self.identifier_constant(name);
      self.emit_op(Opcode::Dup);
      self.emit_ops(Opcode::DefineGlobal, index);
    } else {
      let slot = self.fs_ref().locals.len() as u8;
      self.add_local(name);
      self.mark_initialized();
      self.emit_ops(Opcode::SetLocal, slot);
      self.set_local_type(slot as usize, rhs_ty);
    }
  }

  pub(crate) fn emit_get_named(&mut self, name: &str) {
    if let Some(slot) = self.resolve_local(name) {
      self.emit_ops(Opcode::GetLocal, slot);
      return;
    }
    if let Some(slot) = self.resolve_upvalue(name) {
      self.emit_ops(Opcode::GetUpvalue, slot);
      return;
    }
    let index = self.identifier_constant(name);
    self.emit_ops(Opcode::GetGlobal, index);
  }

  pub(crate) fn emit_set_named(&mut self, name: &str) {
    if let Some(slot) = self.resolve_local(name) {
      self.emit_ops(Opcode::SetLocal, slot);
      return;
    }
    if let Some(slot) = self.resolve_upvalue(name) {
      self.emit_ops(Opcode::SetUpvalue, slot);
      return;
    }
    let index = self.identifier_constant(name);
    self.emit_ops(Opcode::SetGlobal, index);
  }

  pub(crate) fn consume_property_name_after_dot(&mut self) {
    if self.check(TokenKind::Lit_Ident) || self.check(TokenKind::Kw_Yield) {
      self.advance();
      return;
    }
    self.error_at_current("Expect property name after '.'.");
  }

  fn dot(&mut self, can_assign: bool) {
    use TokenKind::*;
    self.state.last_expr_ends_with_call = false;
    let base_top = self.state.type_stack.len().saturating_sub(1);
    self.consume_property_name_after_dot();
    let name = self.lexeme(&self.previous).to_string();
    let index = self.identifier_constant(&name);

    if can_assign && (self.match_(Op_Equal) || self.match_(Op_Walrus)) {
      let walrus = self.previous.kind == Op_Walrus;
      self.emit_ops(Opcode::Constant, index);
      let start_line = self.current.line;
      if !walrus && self.rhs_has_top_level_comma(start_line) {
        self.parse_array_literal_from_comma_list();
      } else {
        self.expression();
      }
      self.emit_op(Opcode::SetTable);
      let rhs_ty = self.type_pop();
      self.type_set_len(base_top);
      self.type_push(rhs_ty);
    } else {
      self.emit_ops(Opcode::Constant, index);
      self.emit_op(Opcode::GetTable);
      self.type_set_len(base_top);
      self.type_push(TypeHint::Any);
    }
  }

  fn meta_dot(&mut self, can_assign: bool) {
    use TokenKind::*;
    self.state.last_expr_ends_with_call = false;
    let base_top = self.state.type_stack.len().saturating_sub(1);
    self.consume_property_name_after_dot();
    let name = self.lexeme(&self.previous).to_string();
    let index = self.identifier_constant(&name);

    if can_assign && (self.match_(Op_Equal) || self.match_(Op_Walrus)) {
      self.error("Can't assign through metatable method access.");
      self.expression();
      self.type_set_len(base_top);
      self.type_push(TypeHint::Any);
      return;
    }

    self.emit_ops(Opcode::Constant, index);
    self.emit_op(Opcode::GetMetaTable);
    self.type_set_len(base_top);
    self.type_push(TypeHint::Any);
  }

  fn subscript(&mut self, can_assign: bool) {
    use TokenKind::*;
    self.state.last_expr_ends_with_call = false;
    let base_top = self.state.type_stack.len().saturating_sub(1);

    if self.has_slice_range_in_subscript() {
      if self.check(Op_Range) {
        self.advance();
        self.emit_op(Opcode::Nil); // start
      } else {
        // the start bound is a full arithmetic expression ending at `..`
        self.parse_precedence(Prec::Term);
        self.consume(Op_Range, "Expect '..' in slice.");
      }
      if self.check(Tok_Colon) || self.check(Brk_SquareR) {
        self.emit_op(Opcode::Nil); // end
      } else {
        self.expression();
      }
      if self.match_(Tok_Colon) {
        if self.check(Brk_SquareR) {
          self.emit_constant(Value::Number(1.0));
        } else {
          self.expression();
        }
      } else {
        self.emit_constant(Value::Number(1.0));
      }
      self.consume(Brk_SquareR, "Expect ']' after slice.");
      if can_assign && (self.match_(Op_Equal) || self.match_(Op_Walrus)) {
        self.error("Can't assign to a slice.");
        self.expression();
      }
      self.emit_op(Opcode::Slice);
      self.type_set_len(base_top);
      self.type_push(TypeHint::Any);
      return;
    }

    self.expression();
    self.consume(Brk_SquareR, "Expect ']' after index.");

    if can_assign && (self.match_(Op_Equal) || self.match_(Op_Walrus)) {
      let walrus = self.previous.kind == Op_Walrus;
      let start_line = self.current.line;
      if !walrus && self.rhs_has_top_level_comma(start_line) {
        self.parse_array_literal_from_comma_list();
      } else {
        self.expression();
      }
      self.emit_op(Opcode::SetTable);
      let rhs_ty = self.type_pop();
      self.type_set_len(base_top);
      self.type_push(rhs_ty);
    } else {
      self.emit_op(Opcode::GetTable);
      self.type_set_len(base_top);
      self.type_push(TypeHint::Any);
    }
  }

  fn import_expression(&mut self, _can_assign: bool) {
    let (path, _) = self.parse_module_path();
    let index = self.make_constant(Value::str(path));
    self.emit_ops(Opcode::Import, index);
    self.type_push(TypeHint::Any);
  }

  /// `name(.name)*` — returns the dotted path and the last component.
  pub(crate) fn parse_module_path(&mut self) -> (String, String) {
    self.consume(TokenKind::Lit_Ident, "Expect module name after 'import'.");
    let mut path = self.lexeme(&self.previous).to_string();
    let mut last = path.clone();
    while self.match_(TokenKind::Op_Dot) {
      self.consume(TokenKind::Lit_Ident, "Expect module name after '.'.");
      last = self.lexeme(&self.previous).to_string();
      path.push('.');
      path.push_str(&last);
    }
    (path, last)
  }

  fn anonymous_function(&mut self, _can_assign: bool) {
    self.function_body(FunctionKind::Function);
    self.type_push(TypeHint::Any);
  }

  // ---- calls ----

  fn parse_call(&mut self, can_assign: bool) {
    use TokenKind::*;
    let mut arg_count: usize = 0;
    let mut in_named_args = false;
    let mut has_spread = false;
    let base_top = self.state.type_stack.len();

    if !self.check(Brk_ParenR) {
      loop {
        if self.match_(Op_Star) {
          if in_named_args {
            self.error("Spread argument cannot be used with named arguments.");
          }
          if has_spread {
            self.error("Can't use more than one spread argument.");
          }
          if arg_count == 255 {
            self.error("Can't have more than 255 arguments.");
          }
          self.expression();
          self.type_pop();
          has_spread = true;
          if self.check(Tok_Comma) {
            self.error("Spread argument must be last.");
          }
          if self.match_(Tok_Comma) {
            continue;
          }
          break;
        }

        // named argument? identifier followed by `=`
        let is_named = self.check(Lit_Ident) && {
          let mut peek = self.lexer.clone();
          peek.next_token().kind == Op_Equal
        };

        if is_named {
          if has_spread {
            self.error("Named arguments cannot follow spread argument.");
          }
          if !in_named_args {
            self.emit_op(Opcode::NewTable);
            in_named_args = true;
          }
          self.consume(Lit_Ident, "Expect parameter name.");
          let name = self.lexeme(&self.previous).to_string();
          self.consume(Op_Equal, "Expect '=' after parameter name.");
          self.emit_op(Opcode::Dup);
          self.emit_constant(Value::str(name));
          self.expression();
          self.type_pop();
          self.emit_op(Opcode::SetTable);
          self.emit_op(Opcode::Pop);
        } else {
          if in_named_args {
            self.error("Positional arguments cannot follow named arguments.");
          }
          if has_spread {
            self.error("Positional arguments cannot follow spread argument.");
          }
          if arg_count == 0
            && self.current.kind != Brk_ParenL
            && self.find_comprehension_for_until(Brk_ParenR).is_some()
          {
            self.generator_comprehension(can_assign);
            self.type_pop();
            arg_count += 1;
            break;
          }
          self.expression();
          self.type_pop();
          if arg_count == 255 {
            self.error("Can't have more than 255 arguments.");
          }
          arg_count += 1;
        }
        if !self.match_(Tok_Comma) {
          break;
        }
      }
    }

    if in_named_args {
      if arg_count == 255 {
        self.error("Can't have more than 255 arguments.");
      }
      arg_count += 1;
    }

    self.consume(Brk_ParenR, "Expect ')' after arguments.");
    let argc = arg_count.min(255) as u8;
    if has_spread {
      self.emit_ops(Opcode::CallExpand, argc);
    } else if in_named_args {
      self.emit_ops(Opcode::CallNamed, argc);
    } else {
      self.emit_call(argc);
    }
    self.state.last_expr_ends_with_call = true;
    self.type_set_len(base_top);
    self.type_pop();
    self.type_push(TypeHint::Any);
  }

  // ---- tables ----

  fn table(&mut self, can_assign: bool) {
    let base_top = self.state.type_stack.len();
    if self.is_table_comprehension_start(self.previous.line) {
      self.table_comprehension(can_assign);
      self.type_set_len(base_top);
      self.type_push(TypeHint::Table);
      return;
    }
    self.emit_op(Opcode::NewTable);
    self.parse_table_entries();
    self.type_set_len(base_top);
    self.type_push(TypeHint::Table);
  }

  /// `<expr> { ... }` — the preceding value becomes the metatable of the
  /// new table.
  fn table_infix(&mut self, _can_assign: bool) {
    let base_top = self.state.type_stack.len();
    self.emit_op(Opcode::NewTable);
    self.parse_table_entries();
    self.emit_op(Opcode::SetMetatable);
    self.type_set_len(base_top.saturating_sub(1));
    self.type_push(TypeHint::Table);
  }

  fn table_entry_expression(&mut self) {
    let saved = self.state.in_table_entry_expression;
    self.state.in_table_entry_expression = true;
    self.expression();
    self.state.in_table_entry_expression = saved;
  }

  fn is_implicit_table_separator(&self) -> bool {
    if self.current.line <= self.previous.line {
      return false;
    }
    is_table_entry_start(self.current.kind)
  }

  fn parse_table_entries(&mut self) {
    use TokenKind::*;
    let mut array_index = 1.0f64;
    while !self.check(Brk_CurlyR) && !self.check(Tok_Eof) {
      self.emit_op(Opcode::Dup);
      if self.match_(Brk_SquareL) {
        self.table_entry_expression();
        self.consume(Brk_SquareR, "Expect ']' after key.");
        self.consume(Op_Equal, "Expect '=' after key.");
        self.table_entry_expression();
        self.emit_op(Opcode::SetTable);
        self.emit_op(Opcode::Pop);
      } else if self.check(Lit_Ident) && {
        let mut peek = self.peek_lexer();
        peek.next_token().kind == Op_Equal
      } {
        self.advance();
        let text = self.lexeme(&self.previous).to_string();
        self.consume(Op_Equal, "Expect '=' after key.");
        self.emit_constant(Value::str(text));
        self.table_entry_expression();
        self.emit_op(Opcode::SetTable);
        self.emit_op(Opcode::Pop);
      } else {
        self.emit_constant(Value::Number(array_index));
        array_index += 1.0;
        self.table_entry_expression();
        self.emit_op(Opcode::SetTable);
        self.emit_op(Opcode::Pop);
      }
      if self.match_(Tok_Comma) || self.is_implicit_table_separator() {
        continue;
      }
      break;
    }
    self.consume(Brk_CurlyR, "Expect '}' after table.");
  }

  pub(crate) fn parse_array_literal_from_comma_list(&mut self) {
    self.emit_op(Opcode::NewTable);
    let mut index = 1.0f64;
    loop {
      self.emit_op(Opcode::Dup);
      self.emit_constant(Value::Number(index));
      index += 1.0;
      self.expression();
      self.emit_op(Opcode::SetTable);
      self.emit_op(Opcode::Pop);
      if !self.match_(TokenKind::Tok_Comma) {
        break;
      }
    }
  }

  // ---- speculative scans ----

  /// Scan ahead with a throwaway lexer; `self.current` has already been
  /// consumed from the real one, so callers inspect it separately.
  pub(crate) fn peek_lexer(&self) -> Lexer<'src> {
    self.lexer.clone()
  }

  pub(crate) fn rhs_has_top_level_comma(&self, start_line: u32) -> bool {
    use TokenKind::*;
    let mut paren = 0i32;
    let mut bracket = 0i32;
    let mut brace = 0i32;
    let mut tok = self.current;
    let mut peek = self.peek_lexer();
    loop {
      if tok.kind == Tok_Eof {
        return false;
      }
      if tok.line > start_line && paren == 0 && bracket == 0 && brace == 0 {
        return false;
      }
      match tok.kind {
        Brk_ParenL => paren += 1,
        Brk_ParenR => paren = (paren - 1).max(0),
        Brk_SquareL => bracket += 1,
        Brk_SquareR => bracket = (bracket - 1).max(0),
        Brk_CurlyL => brace += 1,
        Brk_CurlyR => brace = (brace - 1).max(0),
        Tok_Comma => {
          if paren == 0 && bracket == 0 && brace == 0 {
            return true;
          }
        }
        Tok_Semicolon | Tok_Dedent => {
          if paren == 0 && bracket == 0 && brace == 0 {
            return false;
          }
        }
        _ => {}
      }
      tok = peek.next_token();
    }
  }

  fn has_slice_range_in_subscript(&self) -> bool {
    use TokenKind::*;
    if self.current.kind == Op_Range {
      return true;
    }
    let mut peek = self.peek_lexer();
    let mut paren = 0i32;
    let mut bracket = 0i32;
    let mut brace = 0i32;
    loop {
      let tok = peek.next_token();
      match tok.kind {
        Brk_ParenL => paren += 1,
        Brk_ParenR => paren = (paren - 1).max(0),
        Brk_CurlyL => brace += 1,
        Brk_CurlyR => brace = (brace - 1).max(0),
        Brk_SquareL => bracket += 1,
        Brk_SquareR => {
          if bracket == 0 && paren == 0 && brace == 0 {
            return false;
          }
          bracket = (bracket - 1).max(0);
        }
        Op_Range => {
          if paren == 0 && bracket == 0 && brace == 0 {
            return true;
          }
        }
        Tok_Eof => return false,
        _ => {}
      }
    }
  }

  /// Find a top-level `for` before `end_token`; returns its span start.
  pub(crate) fn find_comprehension_for_until(&self, end_token: TokenKind) -> Option<usize> {
    use TokenKind::*;
    let mut peek = self.peek_lexer();
    let mut paren = 0i32;
    let mut bracket = 0i32;
    let mut brace = 0i32;
    loop {
      let tok = peek.next_token();
      match tok.kind {
        Brk_ParenL => paren += 1,
        Brk_SquareL => bracket += 1,
        Brk_SquareR => bracket = (bracket - 1).max(0),
        Brk_CurlyL => brace += 1,
        Brk_ParenR => {
          if paren > 0 {
            paren -= 1;
          } else if end_token == Brk_ParenR && bracket == 0 && brace == 0 {
            return None;
          }
        }
        Brk_CurlyR => {
          if brace > 0 {
            brace -= 1;
          } else if end_token == Brk_CurlyR && paren == 0 && bracket == 0 {
            return None;
          }
        }
        Kw_For => {
          if paren == 0 && bracket == 0 && brace == 0 {
            return Some(tok.span.start);
          }
        }
        Tok_Eof => return None,
        _ => {}
      }
    }
  }

  fn is_table_comprehension_start(&self, start_line: u32) -> bool {
    self.comprehension_scan(TokenKind::Brk_CurlyR, Some(start_line))
  }

  fn is_generator_comprehension_start(&self, start_line: u32) -> bool {
    self.comprehension_scan(TokenKind::Brk_ParenR, Some(start_line))
  }

  fn comprehension_scan(&self, end_token: TokenKind, start_line: Option<u32>) -> bool {
    use TokenKind::*;
    let mut peek = self.peek_lexer();
    let mut paren = 0i32;
    let mut bracket = 0i32;
    let mut brace = 0i32;
    loop {
      let tok = peek.next_token();
      if let Some(line) = start_line {
        if tok.line > line && paren == 0 && bracket == 0 && brace == 0 {
          return false;
        }
      }
      match tok.kind {
        Brk_ParenL => paren += 1,
        Brk_SquareL => bracket += 1,
        Brk_SquareR => bracket = (bracket - 1).max(0),
        Brk_CurlyL => brace += 1,
        Brk_ParenR => {
          if paren > 0 {
            paren -= 1;
          } else if end_token == Brk_ParenR && bracket == 0 && brace == 0 {
            return false;
          }
        }
        Brk_CurlyR => {
          if brace > 0 {
            brace -= 1;
          } else if end_token == Brk_CurlyR && paren == 0 && bracket == 0 {
            return false;
          }
        }
        Kw_For => {
          if paren == 0 && bracket == 0 && brace == 0 {
            return true;
          }
        }
        Tok_Eof => return false,
        _ => {}
      }
    }
  }

  // ---- sub-compilation ----

  /// Compile an expression from its own buffer, sharing this session's
  /// function stack. Errors propagate into this session's diagnostics.
  pub(crate) fn compile_expression_source(&mut self, source: &str) {
    let state = std::mem::take(&mut self.state);
    let mut sub = Session::with_state(source, state);
    sub.advance();
    sub.expression();
    self.state = sub.state;
  }

  /// Like [`compile_expression_source`], but trims the slice and keeps the
  /// caller's call-flag and type stack intact.
  pub(crate) fn compile_trimmed_expression(&mut self, source: &str) {
    let source = source.trim();
    let saved_call = self.state.last_expr_ends_with_call;
    let saved_types = self.state.type_stack.len();
    self.compile_expression_source(source);
    self.state.last_expr_ends_with_call = saved_call;
    self.type_set_len(saved_types);
  }

  // ---- comprehensions ----

  /// Shared loop machinery for table and generator comprehensions: parse
  /// the `for` header, set up the iterator triple and loop variables, run
  /// `body(session)` per iteration, then close the loop.
  fn comprehension_loop(&mut self, body: impl FnOnce(&mut Session<'src>)) {
    use TokenKind::*;

    self.consume(Kw_For, "Expect 'for' in comprehension.");
    self.consume(Lit_Ident, "Expect variable name.");
    let name = self.lexeme(&self.previous).to_string();
    let mut has_index_sigil = false;
    if self.check(Op_Hash) {
      if self.current.span.start == self.previous.span.end {
        self.advance();
        has_index_sigil = true;
      } else {
        self.error_at_current("Whitespace is not allowed before '#'.");
        self.advance();
        has_index_sigil = true;
      }
    }

    let mut loop_vars = vec![name];
    if self.match_(Tok_Comma) {
      self.consume(Lit_Ident, "Expect second variable name.");
      loop_vars.push(self.lexeme(&self.previous).to_string());
    }

    self.consume(Kw_In, "Expect 'in'.");

    let eligible_for_range = loop_vars.len() == 1 && !has_index_sigil;
    self.state.in_for_range_header = eligible_for_range;
    self.expression();
    self.state.in_for_range_header = false;
    let mut expr_count = 1;
    let is_range_expr = eligible_for_range && self.state.last_expr_was_range;

    if is_range_expr && self.check(Tok_Comma) {
      self.error("Range expression cannot be used with multiple iterator expressions.");
      return;
    }
    if is_range_expr {
      // the header left (start, end); build the iterator triple
      self.emit_op(Opcode::Range);
    }

    while self.match_(Tok_Comma) && expr_count < 3 {
      self.expression();
      expr_count += 1;
    }

    if expr_count == 1 && !is_range_expr {
      self.add_local("(iterable)");
      self.mark_initialized();
      let iterable_slot = (self.fs_ref().locals.len() - 1) as u8;
      self.emit_ops(Opcode::GetLocal, iterable_slot);
    }

    if is_range_expr {
      // triple already on the stack
    } else if expr_count > 1 {
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

    self.emit_ops(Opcode::GetLocal, first_var_slot);
    self.emit_ops(Opcode::SetLocal, first_var_slot - 1); // control
    self.emit_op(Opcode::Pop);

    let mut skip_jump = None;
    if self.match_(Kw_If) {
      self.expression();
      skip_jump = Some(self.emit_jump(Opcode::JumpIfFalse));
      self.emit_op(Opcode::Pop);
    }

    body(self);

    if let Some(skip) = skip_jump {
      let end_jump = self.emit_jump(Opcode::Jump);
      self.patch_jump(skip);
      self.emit_op(Opcode::Pop);
      self.patch_jump(end_jump);
    }

    for _ in 0..var_count {
      let captured = self.fs_ref().locals.last().map(|l| l.is_captured).unwrap_or(false);
      if captured {
        self.emit_op(Opcode::CloseUpvalue);
      } else {
        self.emit_op(Opcode::Pop);
      }
      self.fs().locals.pop();
    }

    self.emit_loop(loop_start);

    self.patch_jump(exit_jump);
    for _ in 0..var_count {
      self.emit_op(Opcode::Pop);
    }
    self.emit_op(Opcode::Pop);
  }

  /// `( expr for x in it [if cond] )` — an anonymous generator, called
  /// immediately so the expression's value is a coroutine.
  fn generator_comprehension(&mut self, _can_assign: bool) {
    let expr_start = self.current.span.start;
    let Some(for_start) = self.find_comprehension_for_until(TokenKind::Brk_ParenR) else {
      self.error("Expected generator comprehension 'expr for ...'.");
      return;
    };
    let expr_src = &self.src[expr_start..for_start];

    // skip the real token stream forward to that `for`
    while !(self.current.kind == TokenKind::Kw_For && self.current.span.start == for_start) {
      if self.current.kind == TokenKind::Tok_Eof {
        self.error("Expected 'for' in generator comprehension.");
        return;
      }
      self.advance();
    }

    self.begin_function(FunctionKind::Function);
    self.begin_scope();
    self.fs().is_generator = true;

    self.comprehension_loop(|s| {
      let coroutine = s.make_constant(Value::str("coroutine"));
      s.emit_ops(Opcode::Import, coroutine);
      let yield_name = s.identifier_constant("yield");
      s.emit_ops(Opcode::Constant, yield_name);
      s.emit_op(Opcode::GetTable);
      s.compile_trimmed_expression(expr_src);
      // a resumed yield pushes nothing, so the call is stack-neutral
      s.emit_call(1);
    });

    self.finish_function();
    self.emit_call(0);
    self.type_push(TypeHint::Any);
    self.state.last_expr_ends_with_call = true;
  }

  /// `{ expr for x in it [if cond] }`, with `key=value` lowering to keyed
  /// inserts instead of appends.
  fn table_comprehension(&mut self, _can_assign: bool) {
    let expr_start = self.current.span.start;
    let Some(for_start) = self.find_comprehension_for_until(TokenKind::Brk_CurlyR) else {
      self.error("Expected table comprehension 'expr for ...'.");
      return;
    };
    let expr_src = &self.src[expr_start..for_start];

    while !(self.current.kind == TokenKind::Kw_For && self.current.span.start == for_start) {
      if self.current.kind == TokenKind::Tok_Eof {
        self.error("Expected 'for' in table comprehension.");
        return;
      }
      self.advance();
    }

    self.begin_function(FunctionKind::Function);
    self.begin_scope();

    self.emit_op(Opcode::NewTable);
    self.add_local("(list)");
    self.mark_initialized();
    let list_slot = (self.fs_ref().locals.len() - 1) as u8;

    self.emit_constant(Value::Number(1.0));
    self.add_local("(idx)");
    self.mark_initialized();
    let idx_slot = (self.fs_ref().locals.len() - 1) as u8;

    self.comprehension_loop(|s| {
      match find_comprehension_assign(expr_src) {
        Some(split) => {
          s.emit_ops(Opcode::GetLocal, list_slot);
          s.compile_trimmed_expression(&expr_src[..split]);
          s.compile_trimmed_expression(&expr_src[split + 1..]);
          s.emit_op(Opcode::SetTable);
          s.emit_op(Opcode::Pop);
        }
        None => {
          s.emit_ops(Opcode::GetLocal, list_slot);
          s.emit_ops(Opcode::GetLocal, idx_slot);
          s.compile_trimmed_expression(expr_src);
          s.emit_op(Opcode::SetTable);
          s.emit_op(Opcode::Pop);

          s.emit_ops(Opcode::GetLocal, idx_slot);
          s.emit_constant(Value::Number(1.0));
          s.emit_op(Opcode::Add);
          s.emit_ops(Opcode::SetLocal, idx_slot);
          s.emit_op(Opcode::Pop);
        }
      }
    });

    self.consume(TokenKind::Brk_CurlyR, "Expect '}' after table comprehension.");

    self.emit_ops(Opcode::GetLocal, list_slot);

    self.finish_function();
    self.emit_call(0);
    self.state.last_expr_ends_with_call = true;
  }
}

pub(crate) fn is_table_entry_start(kind: TokenKind) -> bool {
  use TokenKind::*;
  matches!(
    kind,
    Brk_SquareL
      | Brk_ParenL
      | Brk_CurlyL
      | Lit_Ident
      | Lit_String
      | Lit_Fstring
      | Lit_Number
      | Kw_Nil
      | Kw_True
      | Kw_False
      | Kw_Not
      | Op_Minus
      | Op_Hash
      | Kw_Fn
      | Kw_Import
  )
}

fn decode_escapes(inner: &str, quote: char) -> String {
  let mut out = String::with_capacity(inner.len());
  let mut chars = inner.chars();
  while let Some(c) = chars.next() {
    if c == '\\' {
      match chars.next() {
        Some('n') => out.push('\n'),
        Some('t') => out.push('\t'),
        Some('r') => out.push('\r'),
        Some('\'') => out.push('\''),
        Some('"') => out.push('"'),
        Some('\\') => out.push('\\'),
        Some(other) => {
          out.push('\\');
          out.push(other);
        }
        None => out.push('\\'),
      }
    } else if c == quote {
      continue;
    } else {
      out.push(c);
    }
  }
  out
}

/// Top-level `=` inside a table-comprehension expression, skipping
/// strings, comments, and nested brackets. `==` never matches because the
/// scan only accepts `=` not preceded or followed by another `=`.
fn find_comprehension_assign(expr: &str) -> Option<usize> {
  let bytes = expr.as_bytes();
  let mut paren = 0i32;
  let mut bracket = 0i32;
  let mut brace = 0i32;
  let mut i = 0;
  while i < bytes.len() {
    let c = bytes[i];
    match c {
      b'\'' | b'"' => {
        let quote = c;
        i += 1;
        while i < bytes.len() {
          if bytes[i] == b'\\' {
            i += 2;
            continue;
          }
          if bytes[i] == quote {
            break;
          }
          i += 1;
        }
      }
      b'\\' => i += 1,
      b'(' => paren += 1,
      b')' => paren = (paren - 1).max(0),
      b'[' => bracket += 1,
      b']' => bracket = (bracket - 1).max(0),
      b'{' => brace += 1,
      b'}' => brace = (brace - 1).max(0),
      b'=' if paren == 0 && bracket == 0 && brace == 0 => {
        let next_eq = bytes.get(i + 1) == Some(&b'=');
        let prev_eq = i > 0 && matches!(bytes[i - 1], b'=' | b'!' | b'<' | b'>' | b':');
        if !next_eq && !prev_eq {
          return Some(i);
        }
        if next_eq {
          i += 1;
        }
      }
      _ => {}
    }
    i += 1;
  }
  None
}
