//! Bytecode opcodes for the Lax VM.

/// A single bytecode instruction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Op {
    // --- Constants & Literals ---
    /// Push a constant from the constant pool onto the stack.
    Constant(u8),
    /// Push nil.
    Nil,
    /// Push true.
    True,
    /// Push false.
    False,

    // --- Stack manipulation ---
    /// Pop the top value off the stack.
    Pop,
    /// Duplicate the top of the stack.
    Dup,

    // --- Variables ---
    /// Get a local variable by stack slot index.
    GetLocal(u8),
    /// Set a local variable by stack slot index.
    SetLocal(u8),
    /// Get a global variable by name constant index.
    GetGlobal(u8),
    /// Set a global variable by name constant index.
    SetGlobal(u8),
    /// Define a global variable by name constant index.
    DefineGlobal(u8),

    // --- Upvalues (closures) ---
    /// Get an upvalue by index.
    GetUpvalue(u8),
    /// Set an upvalue by index.
    SetUpvalue(u8),
    /// Close the upvalue for the top stack slot, then pop it.
    CloseUpvalue,

    // --- Properties ---
    /// Get a property by name constant index.
    GetProperty(u8),
    /// Set a property by name constant index.
    SetProperty(u8),
    /// Look up a method on the superclass by name constant index.
    GetSuper(u8),

    // --- Arithmetic ---
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Power,
    Negate,

    // --- Bitwise ---
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,

    // --- Comparison ---
    Equal,
    Greater,
    Less,

    // --- Logical ---
    Not,

    // --- Control flow ---
    /// Unconditional forward jump by offset.
    Jump(u16),
    /// Jump forward if top of stack is falsey. Peeks; the compiler emits
    /// the pops, which lets `and`/`or` leave the operand in place.
    JumpIfFalse(u16),
    /// Jump backward by offset (for loops).
    Loop(u16),

    // --- Functions ---
    /// Call a callee with N arguments.
    Call(u8),
    /// Invoke a method by name constant index with N arguments.
    Invoke(u8, u8),
    /// Invoke a superclass method by name constant index with N arguments.
    SuperInvoke(u8, u8),
    /// Create a closure from a function constant index, capturing the
    /// upvalues its descriptors name.
    Closure(u8),
    /// Return from a function.
    Return,

    // --- Classes ---
    /// Create a class with the given name constant index.
    Class(u8),
    /// Set up inheritance: stack has [superclass, subclass].
    Inherit,
    /// Add a method to a class. Name from constant index.
    Method(u8),

    // --- I/O ---
    /// Print the top of the stack.
    Print,
}
