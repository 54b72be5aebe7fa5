//! Bytecode disassembler for debug output.

use crate::heap::object::Obj;
use crate::heap::value::Value;
use crate::heap::Heap;

use super::chunk::Chunk;
use super::opcode::Op;

/// Disassemble a chunk to a human-readable string, nested functions
/// included.
pub fn disassemble(chunk: &Chunk, heap: &Heap, name: &str) -> String {
    let mut out = String::new();
    out.push_str(&format!("== {} ==\n", name));
    for (offset, op) in chunk.code.iter().enumerate() {
        out.push_str(&instruction(chunk, heap, offset, op));
        out.push('\n');
    }

    for constant in &chunk.constants {
        if let Value::Obj(handle) = constant {
            if let Obj::Function(nested) = heap.get(*handle) {
                out.push('\n');
                let name = heap.display_value(*constant);
                out.push_str(&disassemble(&nested.chunk, heap, &name));
            }
        }
    }
    out
}

/// Render one instruction with its offset and source line.
pub fn disassemble_instruction(chunk: &Chunk, heap: &Heap, offset: usize) -> String {
    instruction(chunk, heap, offset, &chunk.code[offset])
}

fn instruction(chunk: &Chunk, heap: &Heap, offset: usize, op: &Op) -> String {
    let line = chunk.lines.get(offset).copied().unwrap_or(0);
    let line_str = if offset > 0 && chunk.lines.get(offset - 1).copied() == Some(line) {
        "   |".to_owned()
    } else {
        format!("{:4}", line)
    };
    format!("{:04} {} {}", offset, line_str, render_op(op, chunk, heap))
}

fn render_op(op: &Op, chunk: &Chunk, heap: &Heap) -> String {
    match op {
        Op::Constant(idx) => format!("CONSTANT     {:>5} ({})", idx, constant(chunk, heap, *idx)),
        Op::Nil => "NIL".to_owned(),
        Op::True => "TRUE".to_owned(),
        Op::False => "FALSE".to_owned(),
        Op::Pop => "POP".to_owned(),
        Op::Dup => "DUP".to_owned(),
        Op::GetLocal(slot) => format!("GET_LOCAL    {:>5}", slot),
        Op::SetLocal(slot) => format!("SET_LOCAL    {:>5}", slot),
        Op::GetGlobal(idx) => format!("GET_GLOBAL   {:>5} ({})", idx, constant(chunk, heap, *idx)),
        Op::SetGlobal(idx) => format!("SET_GLOBAL   {:>5} ({})", idx, constant(chunk, heap, *idx)),
        Op::DefineGlobal(idx) => {
            format!("DEF_GLOBAL   {:>5} ({})", idx, constant(chunk, heap, *idx))
        }
        Op::GetUpvalue(idx) => format!("GET_UPVALUE  {:>5}", idx),
        Op::SetUpvalue(idx) => format!("SET_UPVALUE  {:>5}", idx),
        Op::CloseUpvalue => "CLOSE_UPVALUE".to_owned(),
        Op::GetProperty(idx) => {
            format!("GET_PROPERTY {:>5} ({})", idx, constant(chunk, heap, *idx))
        }
        Op::SetProperty(idx) => {
            format!("SET_PROPERTY {:>5} ({})", idx, constant(chunk, heap, *idx))
        }
        Op::GetSuper(idx) => format!("GET_SUPER    {:>5} ({})", idx, constant(chunk, heap, *idx)),
        Op::Add => "ADD".to_owned(),
        Op::Subtract => "SUBTRACT".to_owned(),
        Op::Multiply => "MULTIPLY".to_owned(),
        Op::Divide => "DIVIDE".to_owned(),
        Op::Modulo => "MODULO".to_owned(),
        Op::Power => "POWER".to_owned(),
        Op::Negate => "NEGATE".to_owned(),
        Op::BitAnd => "BIT_AND".to_owned(),
        Op::BitOr => "BIT_OR".to_owned(),
        Op::BitXor => "BIT_XOR".to_owned(),
        Op::Shl => "SHL".to_owned(),
        Op::Shr => "SHR".to_owned(),
        Op::Equal => "EQUAL".to_owned(),
        Op::Greater => "GREATER".to_owned(),
        Op::Less => "LESS".to_owned(),
        Op::Not => "NOT".to_owned(),
        Op::Jump(offset) => format!("JUMP         {:>5}", offset),
        Op::JumpIfFalse(offset) => format!("JUMP_IF_FALSE {:>4}", offset),
        Op::Loop(offset) => format!("LOOP         {:>5}", offset),
        Op::Call(argc) => format!("CALL         {:>5}", argc),
        Op::Invoke(idx, argc) => format!(
            "INVOKE       {:>5} ({}) args={}",
            idx,
            constant(chunk, heap, *idx),
            argc
        ),
        Op::SuperInvoke(idx, argc) => format!(
            "SUPER_INVOKE {:>5} ({}) args={}",
            idx,
            constant(chunk, heap, *idx),
            argc
        ),
        Op::Closure(idx) => format!("CLOSURE      {:>5} ({})", idx, constant(chunk, heap, *idx)),
        Op::Return => "RETURN".to_owned(),
        Op::Class(idx) => format!("CLASS        {:>5} ({})", idx, constant(chunk, heap, *idx)),
        Op::Inherit => "INHERIT".to_owned(),
        Op::Method(idx) => format!("METHOD       {:>5} ({})", idx, constant(chunk, heap, *idx)),
        Op::Print => "PRINT".to_owned(),
    }
}

fn constant(chunk: &Chunk, heap: &Heap, idx: u8) -> String {
    match chunk.constants.get(idx as usize) {
        Some(&value) => match value {
            Value::Obj(handle) if matches!(heap.get(handle), Obj::Str(_)) => {
                format!("\"{}\"", heap.str_text(handle))
            }
            _ => heap.display_value(value),
        },
        None => format!("?{}", idx),
    }
}
