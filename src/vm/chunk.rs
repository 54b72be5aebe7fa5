//! Bytecode chunks.

use std::mem;

use crate::heap::value::Value;

use super::opcode::Op;

/// Constant operands are a single byte.
pub const MAX_CONSTANTS: usize = 256;

/// A chunk of bytecode: instructions + constant pool + line info.
#[derive(Debug, Default)]
pub struct Chunk {
    /// The bytecode instructions.
    pub code: Vec<Op>,
    /// Source line numbers, parallel to `code`.
    pub lines: Vec<usize>,
    /// Constant pool.
    pub constants: Vec<Value>,
}

impl Chunk {
    pub fn new() -> Self {
        Self::default()
    }

    /// Emit an instruction and record its source line.
    pub fn emit(&mut self, op: Op, line: usize) -> usize {
        let offset = self.code.len();
        self.code.push(op);
        self.lines.push(line);
        offset
    }

    /// Add a constant to the pool and return its index, or `None` when
    /// the pool is full. Equal constants share a slot; interning makes
    /// this an exact check for strings too.
    pub fn add_constant(&mut self, value: Value) -> Option<u8> {
        if let Some(index) = self.constants.iter().position(|&c| c == value) {
            return Some(index as u8);
        }
        if self.constants.len() >= MAX_CONSTANTS {
            return None;
        }
        self.constants.push(value);
        Some((self.constants.len() - 1) as u8)
    }

    /// Get the current offset (next instruction index).
    pub fn len(&self) -> usize {
        self.code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    /// Patch a forward jump at `offset` to land on the next instruction.
    pub fn patch_jump(&mut self, offset: usize) {
        let jump = (self.code.len() - offset - 1) as u16;
        match &mut self.code[offset] {
            Op::Jump(target) | Op::JumpIfFalse(target) => {
                *target = jump;
            }
            _ => panic!("Tried to patch non-jump instruction at offset {}", offset),
        }
    }

    /// Approximate allocation size, for GC byte accounting.
    pub fn byte_size(&self) -> usize {
        self.code.capacity() * mem::size_of::<Op>()
            + self.lines.capacity() * mem::size_of::<usize>()
            + self.constants.capacity() * mem::size_of::<Value>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emit_records_lines() {
        let mut chunk = Chunk::new();
        assert_eq!(chunk.emit(Op::Nil, 1), 0);
        assert_eq!(chunk.emit(Op::Return, 2), 1);
        assert_eq!(chunk.lines, vec![1, 2]);
    }

    #[test]
    fn test_add_constant_dedups() {
        let mut chunk = Chunk::new();
        let a = chunk.add_constant(Value::Number(1.0));
        let b = chunk.add_constant(Value::Number(2.0));
        let c = chunk.add_constant(Value::Number(1.0));
        assert_eq!(a, Some(0));
        assert_eq!(b, Some(1));
        assert_eq!(c, Some(0));
        assert_eq!(chunk.constants.len(), 2);
    }

    #[test]
    fn test_constant_pool_overflow() {
        let mut chunk = Chunk::new();
        for i in 0..MAX_CONSTANTS {
            assert!(chunk.add_constant(Value::Number(i as f64)).is_some());
        }
        assert_eq!(chunk.add_constant(Value::Number(9999.0)), None);
        // An existing constant still resolves.
        assert_eq!(chunk.add_constant(Value::Number(0.0)), Some(0));
    }

    #[test]
    fn test_patch_jump() {
        let mut chunk = Chunk::new();
        let jump = chunk.emit(Op::JumpIfFalse(0xffff), 1);
        chunk.emit(Op::Pop, 1);
        chunk.emit(Op::Nil, 1);
        chunk.patch_jump(jump);
        // Lands on the instruction after Nil, two ops ahead.
        assert_eq!(chunk.code[jump], Op::JumpIfFalse(2));
    }

    #[test]
    #[should_panic(expected = "non-jump")]
    fn test_patch_non_jump_panics() {
        let mut chunk = Chunk::new();
        let offset = chunk.emit(Op::Pop, 1);
        chunk.patch_jump(offset);
    }
}
