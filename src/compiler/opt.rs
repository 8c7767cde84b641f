//! Peephole pass, run once over a finished chunk.
//!
//! Fusions shrink the code, so every jump is relocated through an
//! old-offset → new-offset map. A fusion is only applied when no jump
//! lands *inside* the fused window (landing on its first instruction is
//! fine — the fused opcode computes the same result the window did).
//! Fused bytes keep the line of the window's first instruction so debug
//! traces are unchanged.

use crate::bytecode::disasm::instruction_size;
use crate::bytecode::{Chunk, Opcode};
use crate::value::Value;

enum Item {
  Copy { old: usize, size: usize },
  Fused { op: Opcode, operands: Vec<u8>, old: usize },
}

impl Item {
  fn old(&self) -> usize {
    match self {
      Item::Copy { old, .. } | Item::Fused { old, .. } => *old,
    }
  }

  fn new_size(&self, chunk: &Chunk) -> usize {
    match self {
      Item::Copy { old, .. } => instruction_size(&chunk.code, &chunk.constants, *old),
      Item::Fused { operands, .. } => 1 + operands.len(),
    }
  }
}

fn arith_const_fusion(op: Opcode) -> Option<Opcode> {
  match op {
    Opcode::Add => Some(Opcode::AddConst),
    Opcode::Subtract => Some(Opcode::SubConst),
    Opcode::Multiply => Some(Opcode::MulConst),
    Opcode::Divide => Some(Opcode::DivConst),
    Opcode::Modulo => Some(Opcode::ModConst),
    _ => None,
  }
}

fn arith_set_local_fusion(op: Opcode) -> Option<Opcode> {
  match op {
    Opcode::Add => Some(Opcode::AddSetLocal),
    Opcode::Subtract => Some(Opcode::SubSetLocal),
    Opcode::Multiply => Some(Opcode::MulSetLocal),
    Opcode::Divide => Some(Opcode::DivSetLocal),
    Opcode::Modulo => Some(Opcode::ModSetLocal),
    _ => None,
  }
}

fn local_const_fusion(op: Opcode) -> Option<Opcode> {
  match op {
    Opcode::Subtract => Some(Opcode::SubLocalConst),
    Opcode::Multiply => Some(Opcode::MulLocalConst),
    Opcode::Divide => Some(Opcode::DivLocalConst),
    Opcode::Modulo => Some(Opcode::ModLocalConst),
    _ => None,
  }
}

pub(crate) fn optimize(chunk: &mut Chunk) {
  let code = &chunk.code;
  if code.is_empty() {
    return;
  }

  // instruction boundaries; bail on anything malformed
  let mut starts = Vec::new();
  let mut pc = 0;
  while pc < code.len() {
    if Opcode::from_byte(code[pc]).is_none() {
      return;
    }
    starts.push(pc);
    pc += instruction_size(code, &chunk.constants, pc);
  }
  if pc != code.len() {
    return;
  }

  // every position a jump can land on
  let mut is_target = vec![false; code.len() + 1];
  for &pc in &starts {
    let op = Opcode::from_byte(code[pc]).unwrap();
    let wide = |i: usize| u16::from_be_bytes([code[pc + i], code[pc + i + 1]]) as usize;
    match op {
      Opcode::Jump | Opcode::JumpIfFalse | Opcode::JumpIfTrue => {
        is_target[pc + 3 + wide(1)] = true;
      }
      Opcode::Loop => is_target[pc + 3 - wide(1)] = true,
      Opcode::Try => {
        let flags = code[pc + 2];
        if flags & 1 != 0 {
          is_target[pc + 7 + wide(3)] = true;
        }
        if flags & 2 != 0 {
          is_target[pc + 7 + wide(5)] = true;
        }
      }
      Opcode::ForPrep => is_target[pc + 5 + wide(3)] = true,
      Opcode::ForLoop => is_target[pc + 5 - wide(3)] = true,
      _ => {}
    }
  }

  let op_at = |i: usize| Opcode::from_byte(code[starts[i]]).unwrap();
  let operand = |i: usize, j: usize| code[starts[i] + 1 + j];
  let interior_clear = |from: usize, to: usize| (from..=to).all(|i| !is_target[starts[i]]);

  // plan fusions
  let mut items: Vec<Item> = Vec::new();
  let mut idx = 0;
  while idx < starts.len() {
    let pc = starts[idx];

    // GetLocal s ; Constant 1 ; IAdd ; SetLocal s  =>  IncLocal s
    if idx + 3 < starts.len()
      && op_at(idx) == Opcode::GetLocal
      && op_at(idx + 1) == Opcode::Constant
      && op_at(idx + 2) == Opcode::IAdd
      && op_at(idx + 3) == Opcode::SetLocal
      && operand(idx, 0) == operand(idx + 3, 0)
      && matches!(
        chunk.constants.get(operand(idx + 1, 0) as usize),
        Some(Value::Number(n)) if *n == 1.0
      )
      && interior_clear(idx + 1, idx + 3)
    {
      items.push(Item::Fused {
        op: Opcode::IncLocal,
        operands: vec![operand(idx, 0)],
        old: pc,
      });
      idx += 4;
      continue;
    }

    // GetLocal s ; Constant k ; <op>  =>  <Op>LocalConst s k
    if idx + 2 < starts.len()
      && op_at(idx) == Opcode::GetLocal
      && op_at(idx + 1) == Opcode::Constant
      && interior_clear(idx + 1, idx + 2)
    {
      if let Some(fused) = local_const_fusion(op_at(idx + 2)) {
        items.push(Item::Fused {
          op: fused,
          operands: vec![operand(idx, 0), operand(idx + 1, 0)],
          old: pc,
        });
        idx += 3;
        continue;
      }
    }

    // Constant k ; <op>  =>  <Op>Const k
    if idx + 1 < starts.len() && op_at(idx) == Opcode::Constant && interior_clear(idx + 1, idx + 1) {
      if let Some(fused) = arith_const_fusion(op_at(idx + 1)) {
        items.push(Item::Fused {
          op: fused,
          operands: vec![operand(idx, 0)],
          old: pc,
        });
        idx += 2;
        continue;
      }
    }

    // <op> ; SetLocal s  =>  <Op>SetLocal s
    if idx + 1 < starts.len()
      && op_at(idx + 1) == Opcode::SetLocal
      && interior_clear(idx + 1, idx + 1)
    {
      if let Some(fused) = arith_set_local_fusion(op_at(idx)) {
        items.push(Item::Fused {
          op: fused,
          operands: vec![operand(idx + 1, 0)],
          old: pc,
        });
        idx += 2;
        continue;
      }
    }

    items.push(Item::Copy {
      old: pc,
      size: instruction_size(code, &chunk.constants, pc),
    });
    idx += 1;
  }

  // old offset -> new offset, for every surviving boundary
  let mut map = vec![usize::MAX; code.len() + 1];
  let mut new_len = 0;
  for item in &items {
    map[item.old()] = new_len;
    new_len += item.new_size(chunk);
  }
  map[code.len()] = new_len;

  // emit, fixing up jump operands through the map
  let mut new_code = Vec::with_capacity(new_len);
  let mut new_lines = Vec::with_capacity(new_len);
  for item in &items {
    match item {
      Item::Fused { op, operands, old } => {
        let line = chunk.lines[*old];
        new_code.push(*op as u8);
        new_lines.push(line);
        for &b in operands {
          new_code.push(b);
          new_lines.push(line);
        }
      }
      Item::Copy { old, size } => {
        let pc = *old;
        let new_pc = map[pc];
        let op = Opcode::from_byte(code[pc]).unwrap();
        let start = new_code.len();
        new_code.extend_from_slice(&code[pc..pc + size]);
        new_lines.extend_from_slice(&chunk.lines[pc..pc + size]);

        let wide = |i: usize| u16::from_be_bytes([code[pc + i], code[pc + i + 1]]) as usize;
        let mut rewrite = |at: usize, value: usize| {
          let value = value as u16;
          new_code[start + at] = (value >> 8) as u8;
          new_code[start + at + 1] = (value & 0xff) as u8;
        };
        match op {
          Opcode::Jump | Opcode::JumpIfFalse | Opcode::JumpIfTrue => {
            let target = map[pc + 3 + wide(1)];
            rewrite(1, target - (new_pc + 3));
          }
          Opcode::Loop => {
            let target = map[pc + 3 - wide(1)];
            rewrite(1, (new_pc + 3) - target);
          }
          Opcode::Try => {
            let flags = code[pc + 2];
            if flags & 1 != 0 {
              let target = map[pc + 7 + wide(3)];
              rewrite(3, target - (new_pc + 7));
            }
            if flags & 2 != 0 {
              let target = map[pc + 7 + wide(5)];
              rewrite(5, target - (new_pc + 7));
            }
          }
          Opcode::ForPrep => {
            let target = map[pc + 5 + wide(3)];
            rewrite(3, target - (new_pc + 5));
          }
          Opcode::ForLoop => {
            let target = map[pc + 5 - wide(3)];
            rewrite(3, (new_pc + 5) - target);
          }
          _ => {}
        }
      }
    }
  }

  chunk.code = new_code;
  chunk.lines = new_lines;
}

#[cfg(test)]
mod tests {
  use super::*;

  fn chunk_of(ops: &[(Opcode, &[u8])], constants: Vec<Value>) -> Chunk {
    let mut chunk = Chunk::new("test");
    for (op, operands) in ops {
      chunk.write_op(*op, 1);
      for &b in *operands {
        chunk.write(b, 1);
      }
    }
    chunk.constants = constants;
    chunk
  }

  fn ops_of(chunk: &Chunk) -> Vec<Opcode> {
    let mut out = vec![];
    let mut pc = 0;
    while pc < chunk.code.len() {
      let op = Opcode::from_byte(chunk.code[pc]).unwrap();
      out.push(op);
      pc += instruction_size(&chunk.code, &chunk.constants, pc);
    }
    out
  }

  #[test]
  fn fuses_constant_add() {
    let mut chunk = chunk_of(
      &[
        (Opcode::GetGlobal, &[0]),
        (Opcode::Constant, &[1]),
        (Opcode::Add, &[]),
        (Opcode::Pop, &[]),
        (Opcode::Nil, &[]),
        (Opcode::Return, &[]),
      ],
      vec![Value::str("x"), Value::Number(2.0)],
    );
    optimize(&mut chunk);
    assert_eq!(
      ops_of(&chunk),
      vec![Opcode::GetGlobal, Opcode::AddConst, Opcode::Pop, Opcode::Nil, Opcode::Return]
    );
    assert_eq!(chunk.code.len(), chunk.lines.len());
  }

  #[test]
  fn fuses_increment() {
    let mut chunk = chunk_of(
      &[
        (Opcode::GetLocal, &[1]),
        (Opcode::Constant, &[0]),
        (Opcode::IAdd, &[]),
        (Opcode::SetLocal, &[1]),
        (Opcode::Pop, &[]),
        (Opcode::Nil, &[]),
        (Opcode::Return, &[]),
      ],
      vec![Value::Number(1.0)],
    );
    optimize(&mut chunk);
    assert_eq!(
      ops_of(&chunk),
      vec![Opcode::IncLocal, Opcode::Pop, Opcode::Nil, Opcode::Return]
    );
  }

  #[test]
  fn increment_needs_matching_slot() {
    let mut chunk = chunk_of(
      &[
        (Opcode::GetLocal, &[1]),
        (Opcode::Constant, &[0]),
        (Opcode::IAdd, &[]),
        (Opcode::SetLocal, &[2]),
        (Opcode::Nil, &[]),
        (Opcode::Return, &[]),
      ],
      vec![Value::Number(1.0)],
    );
    optimize(&mut chunk);
    // slots differ, so only the IAdd;SetLocal tail is eligible, and IAdd
    // is a typed op the pass leaves alone
    assert!(ops_of(&chunk).contains(&Opcode::IAdd));
  }

  #[test]
  fn relocates_jumps_across_fusions() {
    // JumpIfFalse over [Constant; Add; Pop; Pop] to the Nil at offset 8
    let mut chunk = chunk_of(
      &[
        (Opcode::JumpIfFalse, &[0, 5]),
        (Opcode::Constant, &[0]),
        (Opcode::Add, &[]),
        (Opcode::Pop, &[]),
        (Opcode::Pop, &[]),
        (Opcode::Nil, &[]),
        (Opcode::Return, &[]),
      ],
      vec![Value::Number(1.0)],
    );
    optimize(&mut chunk);
    let ops = ops_of(&chunk);
    assert_eq!(
      ops,
      vec![
        Opcode::JumpIfFalse,
        Opcode::AddConst,
        Opcode::Pop,
        Opcode::Pop,
        Opcode::Nil,
        Opcode::Return
      ]
    );
    // new layout: AddConst (2 bytes) + Pop + Pop before the Nil target
    let offset = u16::from_be_bytes([chunk.code[1], chunk.code[2]]) as usize;
    assert_eq!(3 + offset, 3 + 2 + 1 + 1);
    assert_eq!(Opcode::from_byte(chunk.code[3 + offset]), Some(Opcode::Nil));
  }

  #[test]
  fn no_fusion_into_jump_target() {
    // the Add at offset 5 is a jump target, so Constant;Add must not fuse
    let mut chunk = chunk_of(
      &[
        (Opcode::Jump, &[0, 2]),
        (Opcode::Constant, &[0]),
        (Opcode::Add, &[]),
        (Opcode::Nil, &[]),
        (Opcode::Return, &[]),
      ],
      vec![Value::Number(1.0)],
    );
    optimize(&mut chunk);
    let ops = ops_of(&chunk);
    assert!(ops.contains(&Opcode::Add));
    assert!(!ops.contains(&Opcode::AddConst));
  }
}
