//! Error types for compilation and execution.

use thiserror::Error;

/// A single diagnostic produced while scanning or parsing.
///
/// `location` is pre-rendered (" at 'foo'", " at end", or empty) so the
/// message matches the reference diagnostics exactly.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("[line {line}] Error{location}: {message}")]
pub struct CompileError {
    pub line: usize,
    pub location: String,
    pub message: String,
}

impl CompileError {
    pub fn new(line: usize, location: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            line,
            location: location.into(),
            message: message.into(),
        }
    }
}

/// Runtime errors. Every variant carries the source line of the failing
/// instruction; the VM resets its stacks after producing one, so the same
/// `Vm` can interpret again.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RuntimeError {
    #[error("[line {line}] {message}")]
    TypeError { message: String, line: usize },

    #[error("[line {line}] Undefined variable '{name}'.")]
    UndefinedVariable { name: String, line: usize },

    #[error("[line {line}] Undefined property '{name}'.")]
    UndefinedProperty { name: String, line: usize },

    #[error("[line {line}] Expected {expected} arguments but got {got}.")]
    WrongArity {
        expected: usize,
        got: usize,
        line: usize,
    },

    #[error("[line {line}] Can only call functions and classes.")]
    NotCallable { line: usize },

    #[error("[line {line}] Stack overflow.")]
    StackOverflow { line: usize },

    #[error("[line {line}] {message}")]
    NativeError { message: String, line: usize },
}

impl RuntimeError {
    pub fn type_error(message: impl Into<String>, line: usize) -> Self {
        Self::TypeError {
            message: message.into(),
            line,
        }
    }

    pub fn undefined_variable(name: impl Into<String>, line: usize) -> Self {
        Self::UndefinedVariable {
            name: name.into(),
            line,
        }
    }

    pub fn undefined_property(name: impl Into<String>, line: usize) -> Self {
        Self::UndefinedProperty {
            name: name.into(),
            line,
        }
    }

    pub fn wrong_arity(expected: usize, got: usize, line: usize) -> Self {
        Self::WrongArity {
            expected,
            got,
            line,
        }
    }

    pub fn line(&self) -> usize {
        match self {
            Self::TypeError { line, .. }
            | Self::UndefinedVariable { line, .. }
            | Self::UndefinedProperty { line, .. }
            | Self::WrongArity { line, .. }
            | Self::NotCallable { line }
            | Self::StackOverflow { line }
            | Self::NativeError { line, .. } => *line,
        }
    }
}

/// A unified error type for all phases.
#[derive(Debug, Error)]
pub enum LaxError {
    #[error("aborted with {} compile error(s)", .0.len())]
    Compile(Vec<CompileError>),

    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
