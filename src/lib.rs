//! Lax: a small dynamically typed scripting language.
//!
//! The pipeline is a single-pass Pratt compiler from source to bytecode
//! (`vm::compiler`), executed by a stack-based interpreter (`vm::vm`)
//! over a mark-and-sweep garbage-collected heap (`heap`). Strings are
//! interned, closures capture variables through upvalues, and classes
//! use copy-down method inheritance.
//!
//! ```no_run
//! use laxlang::Vm;
//!
//! let mut vm = Vm::new();
//! vm.interpret("print \"hello\" + \" world\";").unwrap();
//! ```

pub mod error;
pub mod heap;
pub mod lexer;
pub mod repl;
pub mod vm;

pub use error::{CompileError, LaxError, RuntimeError};
pub use vm::{compile, Vm};

/// Compile and run a source string on a fresh VM.
pub fn run(source: &str) -> Result<(), LaxError> {
    let mut vm = Vm::new();
    vm.interpret(source)?;
    Ok(())
}
