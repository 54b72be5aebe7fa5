//! Heap object variants.

use std::fmt;
use std::mem;

use crate::vm::chunk::Chunk;

use super::table::Table;
use super::value::Value;
use super::Handle;

/// Every kind of garbage-collected object.
#[derive(Debug)]
pub enum Obj {
    Str(LaxStr),
    Function(Function),
    Closure(Closure),
    Upvalue(Upvalue),
    Class(Class),
    Instance(Instance),
    BoundMethod(BoundMethod),
    Native(Native),
}

impl Obj {
    pub fn type_name(&self) -> &'static str {
        match self {
            Obj::Str(_) => "string",
            Obj::Function(_) => "function",
            Obj::Closure(_) => "function",
            Obj::Upvalue(_) => "upvalue",
            Obj::Class(_) => "class",
            Obj::Instance(_) => "instance",
            Obj::BoundMethod(_) => "method",
            Obj::Native(_) => "native function",
        }
    }

    /// Approximate heap footprint in bytes, used to drive the collector.
    pub fn heap_size(&self) -> usize {
        let payload = match self {
            Obj::Str(s) => s.text.capacity(),
            Obj::Function(f) => {
                f.chunk.byte_size() + f.upvalues.capacity() * mem::size_of::<UpvalueDescriptor>()
            }
            Obj::Closure(c) => c.upvalues.capacity() * mem::size_of::<Handle>(),
            Obj::Upvalue(_) => 0,
            Obj::Class(c) => c.methods.byte_size(),
            Obj::Instance(i) => i.fields.byte_size(),
            Obj::BoundMethod(_) => 0,
            Obj::Native(_) => 0,
        };
        mem::size_of::<Obj>() + payload
    }
}

/// An interned, immutable string with its cached hash.
#[derive(Debug)]
pub struct LaxStr {
    pub text: String,
    pub hash: u32,
}

/// A compiled function (or the top-level script). Immutable once
/// compilation finishes.
#[derive(Debug)]
pub struct Function {
    /// Function name, `None` for the top-level script.
    pub name: Option<Handle>,
    /// Number of parameters.
    pub arity: u8,
    /// One descriptor per upvalue the function captures.
    pub upvalues: Vec<UpvalueDescriptor>,
    /// The bytecode.
    pub chunk: Chunk,
}

impl Function {
    pub fn new(name: Option<Handle>) -> Self {
        Self {
            name,
            arity: 0,
            upvalues: Vec::new(),
            chunk: Chunk::new(),
        }
    }
}

/// Descriptor emitted by the compiler for each upvalue a closure captures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpvalueDescriptor {
    /// Capture a local of the immediately enclosing function (by stack
    /// slot), as opposed to one of the enclosing closure's upvalues.
    pub is_local: bool,
    pub index: u8,
}

/// A function plus the upvalues it closed over.
#[derive(Debug)]
pub struct Closure {
    pub function: Handle,
    pub upvalues: Vec<Handle>,
}

/// An upvalue captures a variable from an enclosing scope.
///
/// While the variable still lives on the stack the upvalue is open and
/// names its slot; once that slot is about to die the value moves into
/// the upvalue itself. At most one open upvalue exists per stack slot.
#[derive(Debug)]
pub enum Upvalue {
    Open(usize),
    Closed(Value),
}

#[derive(Debug)]
pub struct Class {
    pub name: Handle,
    pub methods: Table,
}

#[derive(Debug)]
pub struct Instance {
    pub class: Handle,
    pub fields: Table,
}

/// A closure bound to the receiver it was accessed through.
#[derive(Debug)]
pub struct BoundMethod {
    pub receiver: Value,
    pub method: Handle,
}

/// A host function callable without a Lax call frame.
pub type NativeFn = fn(&[Value]) -> Result<Value, String>;

#[derive(Clone, Copy)]
pub struct Native {
    pub name: &'static str,
    pub arity: u8,
    pub function: NativeFn,
}

impl fmt::Debug for Native {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<native fn {}>", self.name)
    }
}
