//! Source-to-bytecode compiler.
//!
//! Single pass: the parser pulls tokens straight from the scanner and
//! emits bytecode as it goes, with no AST in between. Expression parsing
//! is Pratt-style (`compiler_exprs`), statements and declarations are
//! recursive descent (`compiler_stmts`, `compiler_classes`). Variable
//! resolution happens here at compile time: locals become stack slot
//! indices, captured variables become upvalue indices.
//!
//! Errors don't abort the pass. The compiler enters panic mode, skips to
//! the next statement boundary, and keeps going so one mistake doesn't
//! hide the rest.

use crate::error::CompileError;
use crate::heap::object::{Function, Obj, UpvalueDescriptor};
use crate::heap::value::Value;
use crate::heap::{Handle, Heap};
use crate::lexer::{Scanner, Token, TokenKind};

use super::chunk::Chunk;
use super::opcode::Op;

/// Local slots are a single byte, and slot 0 is reserved.
pub const MAX_LOCALS: usize = 256;
/// Upvalue indices are a single byte.
pub const MAX_UPVALUES: usize = 256;

/// Compile a source string into the top-level script function.
pub fn compile(source: &str, heap: &mut Heap) -> Result<Handle, Vec<CompileError>> {
    let mut compiler = Compiler::new(source, heap);
    compiler.advance();
    while !compiler.match_token(TokenKind::Eof) {
        compiler.declaration();
    }
    let function = compiler.end_function();

    if compiler.had_error {
        Err(compiler.errors)
    } else {
        Ok(compiler.heap.alloc(Obj::Function(function)))
    }
}

/// A local variable tracked during compilation.
#[derive(Debug)]
pub struct Local<'src> {
    pub name: &'src str,
    /// Scope depth, or -1 while the initializer is still running.
    pub depth: i32,
    pub is_captured: bool,
}

/// What kind of function is being compiled.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FunctionKind {
    Script,
    Function,
    Method,
    Initializer,
}

/// Per-function compilation state. Nested function declarations push a
/// new one; the innermost is always last.
pub struct FuncState<'src> {
    pub function: Function,
    pub kind: FunctionKind,
    pub locals: Vec<Local<'src>>,
    pub scope_depth: i32,
    pub loops: Vec<LoopState>,
}

impl<'src> FuncState<'src> {
    fn new(function: Function, kind: FunctionKind) -> Self {
        // Slot 0 holds the callee. In methods it is addressable as `self`.
        let slot_zero = match kind {
            FunctionKind::Method | FunctionKind::Initializer => "self",
            _ => "",
        };
        Self {
            function,
            kind,
            locals: vec![Local {
                name: slot_zero,
                depth: 0,
                is_captured: false,
            }],
            scope_depth: 0,
            loops: Vec::new(),
        }
    }
}

/// The loop a `break` or `continue` refers to.
#[derive(Debug)]
pub struct LoopState {
    /// Where `continue` jumps: the condition, or a for loop's increment.
    pub continue_target: usize,
    /// Scope depth outside the body; locals deeper than this are
    /// discarded before jumping.
    pub depth: i32,
    /// Forward jumps to patch once the loop's end is known.
    pub break_jumps: Vec<usize>,
}

/// The class a `self` or `super` refers to.
#[derive(Debug)]
pub struct ClassState {
    pub has_superclass: bool,
}

pub struct Compiler<'src, 'h> {
    scanner: Scanner<'src>,
    pub(super) previous: Token<'src>,
    pub(super) current: Token<'src>,
    pub(super) had_error: bool,
    pub(super) panic_mode: bool,
    pub(super) errors: Vec<CompileError>,
    pub(super) heap: &'h mut Heap,
    pub(super) funcs: Vec<FuncState<'src>>,
    pub(super) classes: Vec<ClassState>,
}

impl<'src, 'h> Compiler<'src, 'h> {
    fn new(source: &'src str, heap: &'h mut Heap) -> Self {
        Self {
            scanner: Scanner::new(source),
            previous: Token::synthetic(""),
            current: Token::synthetic(""),
            had_error: false,
            panic_mode: false,
            errors: Vec::new(),
            heap,
            funcs: vec![FuncState::new(Function::new(None), FunctionKind::Script)],
            classes: Vec::new(),
        }
    }

    // --- Token plumbing ---

    pub(super) fn advance(&mut self) {
        self.previous = self.current;
        loop {
            self.current = self.scanner.scan_token();
            if self.current.kind != TokenKind::Error {
                break;
            }
            // Error tokens carry their message as the lexeme.
            let message = self.current.lexeme;
            self.error_at_current(message);
        }
    }

    pub(super) fn consume(&mut self, kind: TokenKind, message: &str) {
        if self.current.kind == kind {
            self.advance();
        } else {
            self.error_at_current(message);
        }
    }

    pub(super) fn check(&self, kind: TokenKind) -> bool {
        self.current.kind == kind
    }

    pub(super) fn match_token(&mut self, kind: TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    // --- Error reporting ---

    pub(super) fn error(&mut self, message: &str) {
        self.error_at(self.previous, message);
    }

    pub(super) fn error_at_current(&mut self, message: &str) {
        self.error_at(self.current, message);
    }

    fn error_at(&mut self, token: Token<'src>, message: &str) {
        if self.panic_mode {
            return;
        }
        self.panic_mode = true;
        self.had_error = true;

        let location = match token.kind {
            TokenKind::Eof => " at end".to_owned(),
            // The lexeme is the scanner's message, not source text.
            TokenKind::Error => String::new(),
            _ => format!(" at '{}'", token.lexeme),
        };
        self.errors
            .push(CompileError::new(token.line, location, message));
    }

    /// Leave panic mode at the next statement boundary.
    pub(super) fn synchronize(&mut self) {
        self.panic_mode = false;
        while self.current.kind != TokenKind::Eof {
            if self.previous.kind == TokenKind::Semicolon {
                return;
            }
            match self.current.kind {
                TokenKind::Class
                | TokenKind::Fun
                | TokenKind::Var
                | TokenKind::For
                | TokenKind::If
                | TokenKind::While
                | TokenKind::Print
                | TokenKind::Return => return,
                _ => self.advance(),
            }
        }
    }

    // --- Chunk helpers ---

    pub(super) fn func(&mut self) -> &mut FuncState<'src> {
        self.funcs.last_mut().unwrap()
    }

    pub(super) fn chunk(&mut self) -> &mut Chunk {
        &mut self.func().function.chunk
    }

    pub(super) fn emit(&mut self, op: Op) -> usize {
        let line = self.previous.line;
        self.chunk().emit(op, line)
    }

    pub(super) fn make_constant(&mut self, value: Value) -> u8 {
        match self.chunk().add_constant(value) {
            Some(index) => index,
            None => {
                self.error("Too many constants in one chunk.");
                0
            }
        }
    }

    pub(super) fn emit_constant(&mut self, value: Value) {
        let index = self.make_constant(value);
        self.emit(Op::Constant(index));
    }

    /// Intern an identifier and stash it in the constant pool.
    pub(super) fn identifier_constant(&mut self, name: &str) -> u8 {
        let handle = self.heap.intern(name);
        self.make_constant(Value::Obj(handle))
    }

    pub(super) fn emit_jump(&mut self, op: Op) -> usize {
        self.emit(op)
    }

    pub(super) fn patch_jump(&mut self, offset: usize) {
        if self.chunk().len() - offset - 1 > u16::MAX as usize {
            self.error("Too much code to jump over.");
            return;
        }
        self.chunk().patch_jump(offset);
    }

    pub(super) fn emit_loop(&mut self, loop_start: usize) {
        let offset = self.chunk().len() - loop_start + 1;
        if offset > u16::MAX as usize {
            self.error("Loop body too large.");
            return;
        }
        self.emit(Op::Loop(offset as u16));
    }

    pub(super) fn emit_return(&mut self) {
        if self.func().kind == FunctionKind::Initializer {
            self.emit(Op::GetLocal(0));
        } else {
            self.emit(Op::Nil);
        }
        self.emit(Op::Return);
    }

    /// Finish the innermost function and hand its bytecode back.
    pub(super) fn end_function(&mut self) -> Function {
        self.emit_return();
        let state = self.funcs.pop().unwrap();

        // The script is the outermost function; by the time it ends the
        // nested ones are reachable through its constants, so one
        // recursive dump covers everything.
        #[cfg(feature = "print_code")]
        if self.funcs.is_empty() && !self.had_error {
            print!(
                "{}",
                super::disassembler::disassemble(&state.function.chunk, self.heap, "<script>")
            );
        }

        state.function
    }

    pub(super) fn push_function(&mut self, name: &str, kind: FunctionKind) {
        let name = self.heap.intern(name);
        self.funcs
            .push(FuncState::new(Function::new(Some(name)), kind));
    }

    // --- Scopes and locals ---

    pub(super) fn begin_scope(&mut self) {
        self.func().scope_depth += 1;
    }

    pub(super) fn end_scope(&mut self) {
        self.func().scope_depth -= 1;
        loop {
            let func = self.func();
            let Some(local) = func.locals.last() else {
                break;
            };
            if local.depth <= func.scope_depth {
                break;
            }
            let captured = local.is_captured;
            self.func().locals.pop();
            if captured {
                self.emit(Op::CloseUpvalue);
            } else {
                self.emit(Op::Pop);
            }
        }
    }

    /// Emit pops for locals deeper than `depth` without forgetting them.
    /// `break` and `continue` jump out of scopes the compiler is still in.
    pub(super) fn discard_locals(&mut self, depth: i32) {
        let ops: Vec<Op> = self
            .func()
            .locals
            .iter()
            .rev()
            .take_while(|local| local.depth > depth)
            .map(|local| {
                if local.is_captured {
                    Op::CloseUpvalue
                } else {
                    Op::Pop
                }
            })
            .collect();
        for op in ops {
            self.emit(op);
        }
    }

    pub(super) fn declare_variable(&mut self) {
        let func = self.funcs.last().unwrap();
        if func.scope_depth == 0 {
            return;
        }
        let name = self.previous.lexeme;
        let mut shadowed = false;
        for local in func.locals.iter().rev() {
            if local.depth != -1 && local.depth < func.scope_depth {
                break;
            }
            if local.name == name {
                shadowed = true;
                break;
            }
        }
        if shadowed {
            self.error("Already a variable with this name in this scope.");
            return;
        }
        self.add_local(name);
    }

    pub(super) fn add_local(&mut self, name: &'src str) {
        if self.func().locals.len() >= MAX_LOCALS {
            self.error("Too many local variables in function.");
            return;
        }
        self.func().locals.push(Local {
            name,
            depth: -1,
            is_captured: false,
        });
    }

    pub(super) fn mark_initialized(&mut self) {
        let func = self.func();
        if func.scope_depth == 0 {
            return;
        }
        let depth = func.scope_depth;
        if let Some(local) = func.locals.last_mut() {
            local.depth = depth;
        }
    }

    /// Consume a variable name and return its global-name constant index
    /// (unused for locals).
    pub(super) fn parse_variable(&mut self, message: &str) -> u8 {
        self.consume(TokenKind::Identifier, message);
        self.declare_variable();
        if self.func().scope_depth > 0 {
            return 0;
        }
        let name = self.previous.lexeme;
        self.identifier_constant(name)
    }

    pub(super) fn define_variable(&mut self, global: u8) {
        if self.func().scope_depth > 0 {
            self.mark_initialized();
            return;
        }
        self.emit(Op::DefineGlobal(global));
    }

    // --- Variable resolution ---

    /// Resolve a name in the function at `level` (an index into `funcs`).
    fn resolve_local_at(&mut self, level: usize, name: &str) -> Option<u8> {
        let mut uninitialized = false;
        let mut found = None;
        for (slot, local) in self.funcs[level].locals.iter().enumerate().rev() {
            if local.name == name {
                if local.depth == -1 {
                    uninitialized = true;
                }
                found = Some(slot as u8);
                break;
            }
        }
        if uninitialized {
            self.error("Can't read local variable in its own initializer.");
        }
        found
    }

    pub(super) fn resolve_local(&mut self, name: &str) -> Option<u8> {
        self.resolve_local_at(self.funcs.len() - 1, name)
    }

    pub(super) fn resolve_upvalue(&mut self, name: &str) -> Option<u8> {
        self.resolve_upvalue_at(self.funcs.len() - 1, name)
    }

    /// Walk outward one function at a time. A capture of a grandparent's
    /// local materializes as a chain of upvalues through every function
    /// in between.
    fn resolve_upvalue_at(&mut self, level: usize, name: &str) -> Option<u8> {
        if level == 0 {
            return None;
        }
        let enclosing = level - 1;
        if let Some(slot) = self.resolve_local_at(enclosing, name) {
            self.funcs[enclosing].locals[slot as usize].is_captured = true;
            return Some(self.add_upvalue(level, slot, true));
        }
        if let Some(index) = self.resolve_upvalue_at(enclosing, name) {
            return Some(self.add_upvalue(level, index, false));
        }
        None
    }

    fn add_upvalue(&mut self, level: usize, index: u8, is_local: bool) -> u8 {
        let upvalues = &mut self.funcs[level].function.upvalues;
        for (i, upvalue) in upvalues.iter().enumerate() {
            if upvalue.index == index && upvalue.is_local == is_local {
                return i as u8;
            }
        }
        if upvalues.len() >= MAX_UPVALUES {
            self.error("Too many closure variables in function.");
            return 0;
        }
        upvalues.push(UpvalueDescriptor { is_local, index });
        (upvalues.len() - 1) as u8
    }
}

#[cfg(test)]
mod tests {
    use crate::heap::object::Obj;
    use crate::vm::opcode::Op;

    use super::*;

    fn compile_ok(source: &str) -> (Heap, Handle) {
        let mut heap = Heap::new();
        let handle = compile(source, &mut heap).expect("source should compile");
        (heap, handle)
    }

    fn compile_errors(source: &str) -> Vec<String> {
        let mut heap = Heap::new();
        compile(source, &mut heap)
            .expect_err("source should not compile")
            .iter()
            .map(|e| e.to_string())
            .collect()
    }

    #[test]
    fn test_script_function_shape() {
        let (heap, handle) = compile_ok("print 1 + 2;");
        let script = heap.function(handle);
        assert_eq!(script.name, None);
        assert_eq!(script.arity, 0);
        // Implicit nil return at the end.
        let code = &script.chunk.code;
        assert_eq!(&code[code.len() - 2..], &[Op::Nil, Op::Return][..]);
    }

    #[test]
    fn test_nested_function_captures_enclosing_local() {
        let (heap, handle) = compile_ok(
            "fun outer() {\n\
                 var x = 1;\n\
                 fun inner() { return x; }\n\
                 return inner;\n\
             }",
        );

        let script = heap.function(handle);
        let outer = script
            .chunk
            .constants
            .iter()
            .find_map(|c| match c {
                Value::Obj(h) => match heap.get(*h) {
                    Obj::Function(f) => Some(f),
                    _ => None,
                },
                _ => None,
            })
            .expect("outer function in constants");

        let inner = outer
            .chunk
            .constants
            .iter()
            .find_map(|c| match c {
                Value::Obj(h) => match heap.get(*h) {
                    Obj::Function(f) => Some(f),
                    _ => None,
                },
                _ => None,
            })
            .expect("inner function in constants");

        // `x` is outer's local slot 1 (slot 0 is the callee).
        assert_eq!(
            inner.upvalues,
            vec![UpvalueDescriptor {
                is_local: true,
                index: 1
            }]
        );
        assert!(outer.upvalues.is_empty());
    }

    #[test]
    fn test_duplicate_local_is_an_error() {
        let errors = compile_errors("{ var a = 1; var a = 2; }");
        assert_eq!(
            errors[0],
            "[line 1] Error at 'a': Already a variable with this name in this scope."
        );
    }

    #[test]
    fn test_local_cannot_read_its_own_initializer() {
        let errors = compile_errors("{ var a = a; }");
        assert_eq!(
            errors[0],
            "[line 1] Error at 'a': Can't read local variable in its own initializer."
        );
    }

    #[test]
    fn test_synchronize_recovers_between_statements() {
        let errors = compile_errors("var 1 = 2;\nprint 3;\nvar 4 = 5;");
        assert_eq!(errors.len(), 2);
        assert!(errors[0].contains("[line 1]"));
        assert!(errors[1].contains("[line 3]"));
    }

    #[test]
    fn test_error_at_end() {
        let errors = compile_errors("print 1");
        assert_eq!(errors[0], "[line 1] Error at end: Expect ';' after value.");
    }

    #[test]
    fn test_super_outside_class() {
        let errors = compile_errors("print super.x;");
        assert!(errors[0].contains("Can't use 'super' outside of a class."));
    }

    #[test]
    fn test_class_cannot_inherit_itself() {
        let errors = compile_errors("class A < A {}");
        assert!(errors[0].contains("A class can't inherit from itself."));
    }

    #[test]
    fn test_break_outside_loop() {
        let errors = compile_errors("break;");
        assert!(errors[0].contains("Can't use 'break' outside of a loop."));
    }
}
