//! Chunk disassembler, used by tests and the CLI's `--dump` flag.

use std::fmt::Write;

use super::{Chunk, Opcode};
use crate::value::Value;

/// Total instruction size in bytes at `offset`, including the `Closure`
/// upvalue pairs, which requires looking at the function constant.
pub fn instruction_size(code: &[u8], constants: &[Value], offset: usize) -> usize {
  let Some(op) = Opcode::from_byte(code[offset]) else {
    return 1;
  };
  let mut size = 1 + op.operands();
  if op == Opcode::Closure {
    if let Some(Value::Function(function)) = constants.get(code[offset + 1] as usize) {
      size += 2 * function.upvalue_count as usize;
    }
  }
  size
}

impl Chunk {
  pub fn disassemble(&self) -> String {
    let mut f = String::new();

    {
      let f = &mut f;

      writeln!(f, "chunk <{}>:", self.name).unwrap();
      writeln!(f, "length = {}", self.code.len()).unwrap();

      if self.constants.is_empty() {
        writeln!(f, "const pool = <empty>").unwrap();
      } else {
        writeln!(f, "const pool = (length={}) {{", self.constants.len()).unwrap();
        for (i, value) in self.constants.iter().enumerate() {
          writeln!(f, "  {i} = {value}").unwrap();
        }
        writeln!(f, "}}").unwrap();
      }

      writeln!(f, "bytecode:").unwrap();
      let offset_align = self.code.len().to_string().len().max(1);
      let mut pc = 0;
      while pc < self.code.len() {
        let size = instruction_size(&self.code, &self.constants, pc);
        write!(f, " {pc:offset_align$} | {:4} | ", self.line(pc)).unwrap();
        write_instruction(f, self, pc);
        writeln!(f).unwrap();
        pc += size;
      }
    }

    f
  }
}

fn write_instruction(f: &mut String, chunk: &Chunk, pc: usize) {
  let Some(op) = Opcode::from_byte(chunk.code[pc]) else {
    write!(f, "<bad {:#04x}>", chunk.code[pc]).unwrap();
    return;
  };
  write!(f, "{}", op.name()).unwrap();

  let operand = |i: usize| chunk.code[pc + 1 + i];
  let wide = |i: usize| u16::from_be_bytes([operand(i), operand(i + 1)]) as usize;

  match op {
    Opcode::Constant
    | Opcode::AddConst
    | Opcode::SubConst
    | Opcode::MulConst
    | Opcode::DivConst
    | Opcode::ModConst
    | Opcode::GetGlobal
    | Opcode::DefineGlobal
    | Opcode::SetGlobal
    | Opcode::DeleteGlobal
    | Opcode::Import => {
      let index = operand(0) as usize;
      match chunk.constants.get(index) {
        Some(value) => write!(f, " {index} ; {value}").unwrap(),
        None => write!(f, " {index} ; <bad constant>").unwrap(),
      }
    }
    Opcode::Closure => {
      let index = operand(0) as usize;
      match chunk.constants.get(index) {
        Some(Value::Function(function)) => {
          write!(f, " {index} ; {function}").unwrap();
          for i in 0..function.upvalue_count as usize {
            let is_local = chunk.code[pc + 2 + 2 * i];
            let slot = chunk.code[pc + 3 + 2 * i];
            let kind = if is_local == 1 { "local" } else { "upvalue" };
            write!(f, " [{kind} {slot}]").unwrap();
          }
        }
        _ => write!(f, " {index} ; <bad function>").unwrap(),
      }
    }
    Opcode::Jump | Opcode::JumpIfFalse | Opcode::JumpIfTrue => {
      write!(f, " -> {}", pc + 3 + wide(0)).unwrap();
    }
    Opcode::Loop => {
      write!(f, " -> {}", pc + 3 - wide(0)).unwrap();
    }
    Opcode::Try => {
      let depth = operand(0);
      let flags = operand(1);
      let end = pc + 7;
      write!(f, " depth={depth} flags={flags:#04b}").unwrap();
      if flags & 1 != 0 {
        write!(f, " except -> {}", end + wide(2)).unwrap();
      }
      if flags & 2 != 0 {
        write!(f, " finally -> {}", end + wide(4)).unwrap();
      }
    }
    Opcode::ForPrep => {
      write!(f, " var={} end={} exit -> {}", operand(0), operand(1), pc + 5 + wide(2)).unwrap();
    }
    Opcode::ForLoop => {
      write!(f, " var={} end={} back -> {}", operand(0), operand(1), pc + 5 - wide(2)).unwrap();
    }
    Opcode::SubLocalConst | Opcode::MulLocalConst | Opcode::DivLocalConst | Opcode::ModLocalConst => {
      let slot = operand(0);
      let index = operand(1) as usize;
      match chunk.constants.get(index) {
        Some(value) => write!(f, " slot={slot} {index} ; {value}").unwrap(),
        None => write!(f, " slot={slot} {index} ; <bad constant>").unwrap(),
      }
    }
    _ => {
      for i in 0..op.operands() {
        write!(f, " {}", operand(i)).unwrap();
      }
    }
  }
}
