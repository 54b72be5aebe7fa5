//! The bytecode pipeline: compiler, chunks, and the interpreter.

pub mod chunk;
pub mod compiler;
mod compiler_classes;
mod compiler_exprs;
mod compiler_stmts;
pub mod disassembler;
pub mod natives;
pub mod opcode;
#[allow(clippy::module_inception)]
pub mod vm;
mod vm_calls;

pub use compiler::compile;
pub use vm::Vm;
