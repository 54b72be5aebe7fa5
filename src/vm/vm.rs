//! The bytecode interpreter.
//!
//! A `Vm` owns the heap, the value stack, and the call frame stack, and
//! can interpret any number of sources in sequence; globals persist
//! between runs, which is what the REPL leans on. A runtime error resets
//! the stacks but keeps the heap and globals, so the same `Vm` stays
//! usable afterwards.
//!
//! Garbage collection runs only from the allocation points in this
//! module, where every live value is reachable from the VM's roots: the
//! value stack, the frame closures, the open upvalues, and the globals.

use crate::error::{LaxError, RuntimeError};
use crate::heap::object::{Class, Closure, Obj, Upvalue};
use crate::heap::table::{hash_str, Table};
use crate::heap::value::Value;
use crate::heap::{Handle, Heap};

use super::compiler::compile;
use super::natives::NATIVES;
use super::opcode::Op;

/// Call depth limit; crossing it is a stack overflow.
pub const FRAMES_MAX: usize = 64;

/// One function activation.
pub(super) struct CallFrame {
    pub closure: Handle,
    /// Index of the next instruction.
    pub ip: usize,
    /// Stack slot of the callee; locals index from here.
    pub base: usize,
}

pub struct Vm {
    pub heap: Heap,
    pub(super) stack: Vec<Value>,
    pub(super) frames: Vec<CallFrame>,
    globals: Table,
    pub(super) open_upvalues: Vec<Handle>,
    /// When capturing, print statements land here instead of stdout.
    output: Vec<String>,
    capture_output: bool,
    /// Collect before every allocation. Shakes out missing GC roots.
    pub stress_gc: bool,
    /// Cached "init" string, so instantiation doesn't re-intern it.
    pub(super) init_string: Handle,
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}

impl Vm {
    pub fn new() -> Self {
        let mut heap = Heap::new();
        let init_string = heap.intern("init");
        let mut vm = Self {
            heap,
            stack: Vec::new(),
            frames: Vec::new(),
            globals: Table::new(),
            open_upvalues: Vec::new(),
            output: Vec::new(),
            capture_output: false,
            stress_gc: false,
            init_string,
        };
        vm.define_natives();
        vm
    }

    fn define_natives(&mut self) {
        for native in NATIVES {
            let name = self.heap.intern(native.name);
            let hash = self.heap.str_hash(name);
            let handle = self.heap.alloc(Obj::Native(*native));
            self.globals.set(name, hash, Value::Obj(handle));
        }
    }

    /// Route print output into a buffer instead of stdout.
    pub fn capture_output(&mut self, capture: bool) {
        self.capture_output = capture;
    }

    pub fn output(&self) -> &[String] {
        &self.output
    }

    pub fn take_output(&mut self) -> Vec<String> {
        std::mem::take(&mut self.output)
    }

    /// Look up a global by name.
    pub fn get_global(&self, name: &str) -> Option<Value> {
        let hash = hash_str(name);
        let key = self
            .globals
            .find_key(hash, |handle| self.heap.str_text(handle) == name)?;
        self.globals.get(key, hash)
    }

    /// Compile and run a source string to completion.
    pub fn interpret(&mut self, source: &str) -> Result<Value, LaxError> {
        let function = compile(source, &mut self.heap).map_err(LaxError::Compile)?;
        let closure = self.heap.alloc(Obj::Closure(Closure {
            function,
            upvalues: Vec::new(),
        }));
        self.stack.push(Value::Obj(closure));
        self.call_closure(closure, 0, 0)?;

        match self.run() {
            Ok(value) => Ok(value),
            Err(err) => {
                // The caller prints the error itself; the trace is
                // logged here while the frames still exist.
                self.log_stack_trace();
                self.reset();
                Err(err.into())
            }
        }
    }

    fn reset(&mut self) {
        self.stack.clear();
        self.frames.clear();
        self.open_upvalues.clear();
    }

    fn log_stack_trace(&self) {
        for frame in self.frames.iter().rev() {
            let function = self.heap.closure(frame.closure).function;
            let function = self.heap.function(function);
            let line = function
                .chunk
                .lines
                .get(frame.ip.saturating_sub(1))
                .copied()
                .unwrap_or(0);
            match function.name {
                Some(name) => {
                    log::error!("[line {}] in {}()", line, self.heap.str_text(name));
                }
                None => log::error!("[line {}] in script", line),
            }
        }
    }

    // --- Stack primitives ---

    pub(super) fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    pub(super) fn pop(&mut self) -> Value {
        self.stack.pop().unwrap()
    }

    pub(super) fn peek(&self, distance: usize) -> Value {
        self.stack[self.stack.len() - 1 - distance]
    }

    // --- Garbage collection ---

    /// Allocate through a collection checkpoint. Values the new object
    /// must reference have to be reachable from the roots at this point,
    /// usually by still sitting on the stack.
    pub(super) fn allocate(&mut self, obj: Obj) -> Handle {
        self.gc_checkpoint();
        self.heap.alloc(obj)
    }

    pub(super) fn gc_checkpoint(&mut self) {
        if self.stress_gc || self.heap.should_collect() {
            self.collect_garbage();
        }
    }

    /// Mark the VM roots, trace, and sweep.
    pub fn collect_garbage(&mut self) {
        self.heap.begin_mark();

        for &value in &self.stack {
            self.heap.mark_value(value);
        }
        for frame in &self.frames {
            self.heap.mark_object(frame.closure);
        }
        for &upvalue in &self.open_upvalues {
            self.heap.mark_object(upvalue);
        }
        for (key, value) in self.globals.iter() {
            self.heap.mark_object(key);
            self.heap.mark_value(value);
        }
        self.heap.mark_object(self.init_string);

        self.heap.trace_references();
        self.heap.sweep();
    }

    // --- Dispatch ---

    fn read_constant(&self, index: u8) -> Value {
        let frame = self.frames.last().unwrap();
        let function = self.heap.closure(frame.closure).function;
        self.heap.function(function).chunk.constants[index as usize]
    }

    fn read_string(&self, index: u8) -> Handle {
        match self.read_constant(index) {
            Value::Obj(handle) => handle,
            _ => unreachable!("name constants are strings"),
        }
    }

    fn run(&mut self) -> Result<Value, RuntimeError> {
        loop {
            let (op, line) = {
                let frame = self.frames.last().unwrap();
                let function = self.heap.closure(frame.closure).function;
                let chunk = &self.heap.function(function).chunk;

                #[cfg(feature = "op_trace")]
                {
                    let slots: Vec<String> = self
                        .stack
                        .iter()
                        .map(|&v| self.heap.display_value(v))
                        .collect();
                    println!("          [ {} ]", slots.join(" ][ "));
                    println!(
                        "{}",
                        super::disassembler::disassemble_instruction(chunk, &self.heap, frame.ip)
                    );
                }

                (chunk.code[frame.ip], chunk.lines[frame.ip])
            };
            self.frames.last_mut().unwrap().ip += 1;

            match op {
                Op::Constant(index) => {
                    let value = self.read_constant(index);
                    self.push(value);
                }
                Op::Nil => self.push(Value::Nil),
                Op::True => self.push(Value::Bool(true)),
                Op::False => self.push(Value::Bool(false)),
                Op::Pop => {
                    self.pop();
                }
                Op::Dup => self.push(self.peek(0)),

                Op::GetLocal(slot) => {
                    let base = self.frames.last().unwrap().base;
                    self.push(self.stack[base + slot as usize]);
                }
                Op::SetLocal(slot) => {
                    let base = self.frames.last().unwrap().base;
                    self.stack[base + slot as usize] = self.peek(0);
                }

                Op::GetGlobal(index) => {
                    let name = self.read_string(index);
                    let hash = self.heap.str_hash(name);
                    match self.globals.get(name, hash) {
                        Some(value) => self.push(value),
                        None => {
                            return Err(RuntimeError::undefined_variable(
                                self.heap.str_text(name),
                                line,
                            ));
                        }
                    }
                }
                Op::DefineGlobal(index) => {
                    let name = self.read_string(index);
                    let hash = self.heap.str_hash(name);
                    let value = self.peek(0);
                    self.globals.set(name, hash, value);
                    self.pop();
                }
                Op::SetGlobal(index) => {
                    let name = self.read_string(index);
                    let hash = self.heap.str_hash(name);
                    let value = self.peek(0);
                    if self.globals.set(name, hash, value) {
                        // Assignment doesn't create globals.
                        self.globals.delete(name, hash);
                        return Err(RuntimeError::undefined_variable(
                            self.heap.str_text(name),
                            line,
                        ));
                    }
                }

                Op::GetUpvalue(index) => {
                    let frame = self.frames.last().unwrap();
                    let upvalue = self.heap.closure(frame.closure).upvalues[index as usize];
                    let value = match *self.heap.upvalue(upvalue) {
                        Upvalue::Open(slot) => self.stack[slot],
                        Upvalue::Closed(value) => value,
                    };
                    self.push(value);
                }
                Op::SetUpvalue(index) => {
                    let frame = self.frames.last().unwrap();
                    let upvalue = self.heap.closure(frame.closure).upvalues[index as usize];
                    let value = self.peek(0);
                    match self.heap.upvalue_mut(upvalue) {
                        Upvalue::Open(slot) => {
                            let slot = *slot;
                            self.stack[slot] = value;
                        }
                        Upvalue::Closed(cell) => *cell = value,
                    }
                }

                Op::GetProperty(index) => {
                    let receiver = self.peek(0);
                    let instance = match receiver {
                        Value::Obj(handle) if matches!(self.heap.get(handle), Obj::Instance(_)) => {
                            handle
                        }
                        _ => {
                            return Err(RuntimeError::type_error(
                                "Only instances have properties.",
                                line,
                            ));
                        }
                    };
                    let name = self.read_string(index);
                    let hash = self.heap.str_hash(name);
                    if let Some(value) = self.heap.instance(instance).fields.get(name, hash) {
                        self.pop();
                        self.push(value);
                    } else {
                        let class = self.heap.instance(instance).class;
                        self.bind_method(class, name, line)?;
                    }
                }
                Op::SetProperty(index) => {
                    let instance = match self.peek(1) {
                        Value::Obj(handle) if matches!(self.heap.get(handle), Obj::Instance(_)) => {
                            handle
                        }
                        _ => {
                            return Err(RuntimeError::type_error(
                                "Only instances have fields.",
                                line,
                            ));
                        }
                    };
                    let name = self.read_string(index);
                    let hash = self.heap.str_hash(name);
                    let value = self.peek(0);
                    self.heap.instance_mut(instance).fields.set(name, hash, value);
                    let value = self.pop();
                    self.pop();
                    self.push(value);
                }
                Op::GetSuper(index) => {
                    let name = self.read_string(index);
                    let superclass = match self.pop() {
                        Value::Obj(handle) => handle,
                        _ => unreachable!("'super' resolves to a class"),
                    };
                    self.bind_method(superclass, name, line)?;
                }

                Op::Equal => {
                    let b = self.pop();
                    let a = self.pop();
                    self.push(Value::Bool(a == b));
                }
                Op::Greater => self.comparison_op(line, |a, b| a > b)?,
                Op::Less => self.comparison_op(line, |a, b| a < b)?,

                Op::Add => self.add(line)?,
                Op::Subtract => self.numeric_op(line, |a, b| a - b)?,
                Op::Multiply => self.numeric_op(line, |a, b| a * b)?,
                Op::Divide => self.numeric_op(line, |a, b| a / b)?,
                // `%` and `**` truncate their operands to integers, the
                // same as the shifts. A zero modulus yields NaN.
                Op::Modulo => self.numeric_op(line, |a, b| {
                    let (a, b) = (a as i64, b as i64);
                    if b == 0 {
                        f64::NAN
                    } else {
                        (a % b) as f64
                    }
                })?,
                Op::Power => {
                    self.numeric_op(line, |a, b| ((a as i64) as f64).powf((b as i64) as f64))?
                }

                Op::BitAnd => self.integer_op(line, |a, b| a & b)?,
                Op::BitOr => self.integer_op(line, |a, b| a | b)?,
                Op::BitXor => self.integer_op(line, |a, b| a ^ b)?,
                Op::Shl => self.integer_op(line, |a, b| a << (b as u64 & 63))?,
                Op::Shr => self.integer_op(line, |a, b| a >> (b as u64 & 63))?,

                Op::Not => {
                    let value = self.pop();
                    self.push(Value::Bool(value.is_falsey()));
                }
                Op::Negate => {
                    let Value::Number(n) = self.peek(0) else {
                        return Err(RuntimeError::type_error("Operand must be a number.", line));
                    };
                    self.pop();
                    self.push(Value::Number(-n));
                }

                Op::Print => {
                    let value = self.pop();
                    let text = self.heap.display_value(value);
                    if self.capture_output {
                        self.output.push(text);
                    } else {
                        println!("{}", text);
                    }
                }

                Op::Jump(offset) => {
                    self.frames.last_mut().unwrap().ip += offset as usize;
                }
                Op::JumpIfFalse(offset) => {
                    if self.peek(0).is_falsey() {
                        self.frames.last_mut().unwrap().ip += offset as usize;
                    }
                }
                Op::Loop(offset) => {
                    self.frames.last_mut().unwrap().ip -= offset as usize;
                }

                Op::Call(argc) => {
                    let callee = self.peek(argc as usize);
                    self.call_value(callee, argc, line)?;
                }
                Op::Invoke(index, argc) => {
                    let name = self.read_string(index);
                    let receiver = self.peek(argc as usize);
                    let instance = match receiver {
                        Value::Obj(handle) if matches!(self.heap.get(handle), Obj::Instance(_)) => {
                            handle
                        }
                        _ => {
                            return Err(RuntimeError::type_error(
                                "Only instances have methods.",
                                line,
                            ));
                        }
                    };
                    let hash = self.heap.str_hash(name);
                    // A field holding a callable shadows any method.
                    if let Some(value) = self.heap.instance(instance).fields.get(name, hash) {
                        let slot = self.stack.len() - 1 - argc as usize;
                        self.stack[slot] = value;
                        self.call_value(value, argc, line)?;
                    } else {
                        let class = self.heap.instance(instance).class;
                        self.invoke_from_class(class, name, argc, line)?;
                    }
                }
                Op::SuperInvoke(index, argc) => {
                    let name = self.read_string(index);
                    let superclass = match self.pop() {
                        Value::Obj(handle) => handle,
                        _ => unreachable!("'super' resolves to a class"),
                    };
                    self.invoke_from_class(superclass, name, argc, line)?;
                }

                Op::Closure(index) => {
                    let function = match self.read_constant(index) {
                        Value::Obj(handle) => handle,
                        _ => unreachable!("closure constants are functions"),
                    };
                    // One checkpoint up front; the upvalues allocated
                    // below are rooted through the open upvalue list.
                    self.gc_checkpoint();
                    let descriptors = self.heap.function(function).upvalues.clone();
                    let frame_base = self.frames.last().unwrap().base;
                    let enclosing = self.frames.last().unwrap().closure;

                    let mut upvalues = Vec::with_capacity(descriptors.len());
                    for descriptor in descriptors {
                        let upvalue = if descriptor.is_local {
                            self.capture_upvalue(frame_base + descriptor.index as usize)
                        } else {
                            self.heap.closure(enclosing).upvalues[descriptor.index as usize]
                        };
                        upvalues.push(upvalue);
                    }
                    let closure = self.heap.alloc(Obj::Closure(Closure { function, upvalues }));
                    self.push(Value::Obj(closure));
                }
                Op::CloseUpvalue => {
                    self.close_upvalues(self.stack.len() - 1);
                    self.pop();
                }

                Op::Return => {
                    let result = self.pop();
                    let frame = self.frames.pop().unwrap();
                    self.close_upvalues(frame.base);
                    self.stack.truncate(frame.base);
                    if self.frames.is_empty() {
                        return Ok(result);
                    }
                    self.push(result);
                }

                Op::Class(index) => {
                    let name = self.read_string(index);
                    let class = self.allocate(Obj::Class(Class {
                        name,
                        methods: Table::new(),
                    }));
                    self.push(Value::Obj(class));
                }
                Op::Inherit => {
                    let superclass = match self.peek(1) {
                        Value::Obj(handle) if matches!(self.heap.get(handle), Obj::Class(_)) => {
                            handle
                        }
                        _ => {
                            return Err(RuntimeError::type_error(
                                "Superclass must be a class.",
                                line,
                            ));
                        }
                    };
                    let Value::Obj(subclass) = self.peek(0) else {
                        unreachable!("subclass is on the stack");
                    };
                    // Methods declared afterwards overwrite inherited
                    // ones slot by slot.
                    let methods = self.heap.class(superclass).methods.clone();
                    self.heap.class_mut(subclass).methods = methods;
                    self.pop();
                }
                Op::Method(index) => {
                    let name = self.read_string(index);
                    let hash = self.heap.str_hash(name);
                    let method = self.peek(0);
                    let Value::Obj(class) = self.peek(1) else {
                        unreachable!("class is on the stack");
                    };
                    self.heap.class_mut(class).methods.set(name, hash, method);
                    self.pop();
                }
            }
        }
    }

    fn numeric_op(
        &mut self,
        line: usize,
        op: impl Fn(f64, f64) -> f64,
    ) -> Result<(), RuntimeError> {
        let (Value::Number(b), Value::Number(a)) = (self.peek(0), self.peek(1)) else {
            return Err(RuntimeError::type_error("Operands must be numbers.", line));
        };
        self.pop();
        self.pop();
        self.push(Value::Number(op(a, b)));
        Ok(())
    }

    fn comparison_op(
        &mut self,
        line: usize,
        op: impl Fn(f64, f64) -> bool,
    ) -> Result<(), RuntimeError> {
        let (Value::Number(b), Value::Number(a)) = (self.peek(0), self.peek(1)) else {
            return Err(RuntimeError::type_error("Operands must be numbers.", line));
        };
        self.pop();
        self.pop();
        self.push(Value::Bool(op(a, b)));
        Ok(())
    }

    /// Bitwise and shift operators truncate to 64-bit integers and hand
    /// back a double.
    fn integer_op(
        &mut self,
        line: usize,
        op: impl Fn(i64, i64) -> i64,
    ) -> Result<(), RuntimeError> {
        let (Value::Number(b), Value::Number(a)) = (self.peek(0), self.peek(1)) else {
            return Err(RuntimeError::type_error("Operands must be numbers.", line));
        };
        self.pop();
        self.pop();
        self.push(Value::Number(op(a as i64, b as i64) as f64));
        Ok(())
    }

    /// `+` is numeric addition or string concatenation. Concatenation
    /// interns the result; the operands stay on the stack across the
    /// checkpoint so the collector can see them.
    fn add(&mut self, line: usize) -> Result<(), RuntimeError> {
        match (self.peek(1), self.peek(0)) {
            (Value::Number(a), Value::Number(b)) => {
                self.pop();
                self.pop();
                self.push(Value::Number(a + b));
                Ok(())
            }
            (Value::Obj(a), Value::Obj(b))
                if matches!(self.heap.get(a), Obj::Str(_))
                    && matches!(self.heap.get(b), Obj::Str(_)) =>
            {
                let text = format!("{}{}", self.heap.str_text(a), self.heap.str_text(b));
                self.gc_checkpoint();
                let result = self.heap.intern_owned(text);
                self.pop();
                self.pop();
                self.push(Value::Obj(result));
                Ok(())
            }
            _ => Err(RuntimeError::type_error(
                "Operands must be two numbers or two strings.",
                line,
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use crate::error::LaxError;

    use super::*;

    fn run(source: &str) -> Vec<String> {
        let mut vm = Vm::new();
        vm.capture_output(true);
        vm.interpret(source).expect("program should run");
        vm.take_output()
    }

    fn run_err(source: &str) -> LaxError {
        let mut vm = Vm::new();
        vm.capture_output(true);
        vm.interpret(source).expect_err("program should fail")
    }

    #[test]
    fn test_arithmetic_precedence() {
        assert_eq!(run("print 1 + 2 * 3;"), vec!["7"]);
        assert_eq!(run("print (1 + 2) * 3;"), vec!["9"]);
        assert_eq!(run("print 10 % 3;"), vec!["1"]);
        assert_eq!(run("print -2 * 3;"), vec!["-6"]);
    }

    #[test]
    fn test_power_is_left_associative() {
        // (2 ** 3) ** 2, not 2 ** (3 ** 2).
        assert_eq!(run("print 2 ** 3 ** 2;"), vec!["64"]);
        assert_eq!(run("print 2 ** 0.5 * 0;"), vec!["0"]);
    }

    #[test]
    fn test_modulo_and_power_truncate_to_integers() {
        assert_eq!(run("print 10.9 % 3.9;"), vec!["1"]);
        assert_eq!(run("print 2.9 ** 3.9;"), vec!["8"]);
        assert_eq!(run("print 7 % 0;"), vec!["NaN"]);
    }

    #[test]
    fn test_bitwise_truncates_to_integers() {
        assert_eq!(run("print 6 & 3;"), vec!["2"]);
        assert_eq!(run("print 6 | 3;"), vec!["7"]);
        assert_eq!(run("print 6 ^ 3;"), vec!["5"]);
        assert_eq!(run("print 1 << 4;"), vec!["16"]);
        assert_eq!(run("print 32 >> 2;"), vec!["8"]);
        assert_eq!(run("print 7.9 & 3.9;"), vec!["3"]);
    }

    #[test]
    fn test_division_by_zero_is_ieee() {
        assert_eq!(run("print 1 / 0;"), vec!["inf"]);
        assert_eq!(run("print -1 / 0;"), vec!["-inf"]);
    }

    #[test]
    fn test_comparison_and_equality() {
        assert_eq!(run("print 1 < 2;"), vec!["true"]);
        assert_eq!(run("print 2 <= 1;"), vec!["false"]);
        assert_eq!(run("print \"a\" == \"a\";"), vec!["true"]);
        assert_eq!(run("print nil == false;"), vec!["false"]);
    }

    #[test]
    fn test_logical_operators_return_operands() {
        assert_eq!(run("print nil or \"x\";"), vec!["x"]);
        assert_eq!(run("print nil and \"x\";"), vec!["nil"]);
        assert_eq!(run("print 1 and 2;"), vec!["2"]);
        assert_eq!(run("print false or false;"), vec!["false"]);
    }

    #[test]
    fn test_ternary() {
        assert_eq!(run("print true ? \"a\" : \"b\";"), vec!["a"]);
        assert_eq!(run("print false ? \"a\" : \"b\";"), vec!["b"]);
        // Right-associative: false ? 1 : (true ? 2 : 3).
        assert_eq!(run("print false ? 1 : true ? 2 : 3;"), vec!["2"]);
    }

    #[test]
    fn test_local_shadowing() {
        assert_eq!(
            run("var a = 1; { var a = 2; print a; } print a;"),
            vec!["2", "1"]
        );
    }

    #[test]
    fn test_compound_assignment() {
        assert_eq!(run("var a = 10; a += 5; a -= 3; print a;"), vec!["12"]);
        assert_eq!(run("var a = 4; a *= 3; a /= 2; print a;"), vec!["6"]);
        assert_eq!(
            run("{ var a = \"x\"; a += \"y\"; print a; }"),
            vec!["xy"]
        );
    }

    #[test]
    fn test_if_else() {
        assert_eq!(
            run("if (1 < 2) print \"yes\"; else print \"no\";"),
            vec!["yes"]
        );
        assert_eq!(
            run("if (nil) print \"yes\"; else print \"no\";"),
            vec!["no"]
        );
    }

    #[test]
    fn test_while_loop() {
        assert_eq!(
            run("var i = 0; while (i < 3) { print i; i = i + 1; }"),
            vec!["0", "1", "2"]
        );
    }

    #[test]
    fn test_for_loop_with_break_and_continue() {
        assert_eq!(
            run("var sum = 0;\n\
                 for (var i = 0; i < 10; i = i + 1) {\n\
                     if (i == 3) continue;\n\
                     if (i == 5) break;\n\
                     sum = sum + i;\n\
                 }\n\
                 print sum;"),
            vec!["7"]
        );
    }

    #[test]
    fn test_continue_jumps_to_increment() {
        // If continue skipped the increment this would never terminate.
        assert_eq!(
            run("var n = 0;\n\
                 for (var i = 0; i < 3; i = i + 1) {\n\
                     if (i == 1) continue;\n\
                     n = n + 1;\n\
                 }\n\
                 print n;"),
            vec!["2"]
        );
    }

    #[test]
    fn test_functions_and_recursion() {
        assert_eq!(
            run("fun fib(n) { if (n < 2) return n; return fib(n - 1) + fib(n - 2); }\n\
                 print fib(10);"),
            vec!["55"]
        );
    }

    #[test]
    fn test_closures_capture_independently() {
        assert_eq!(
            run("fun counter() {\n\
                     var n = 0;\n\
                     fun inc() { n = n + 1; return n; }\n\
                     return inc;\n\
                 }\n\
                 var a = counter();\n\
                 var b = counter();\n\
                 a(); a(); print a();\n\
                 b(); print b();"),
            vec!["3", "2"]
        );
    }

    #[test]
    fn test_loop_variable_is_one_shared_binding() {
        // Every iteration closes over the same variable; after the loop
        // both closures see its final value.
        assert_eq!(
            run("var f = nil;\n\
                 var g = nil;\n\
                 for (var i = 0; i < 2; i = i + 1) {\n\
                     fun h() { return i; }\n\
                     if (f == nil) { f = h; } else { g = h; }\n\
                 }\n\
                 print f();\n\
                 print g();"),
            vec!["2", "2"]
        );
    }

    #[test]
    fn test_classes_init_and_self() {
        assert_eq!(
            run("class Counter {\n\
                     init() { self.count = 0; }\n\
                     inc() { self.count = self.count + 1; return self.count; }\n\
                 }\n\
                 var c = Counter();\n\
                 c.inc();\n\
                 print c.inc();"),
            vec!["2"]
        );
    }

    #[test]
    fn test_bound_methods_remember_their_receiver() {
        assert_eq!(
            run("class Greeter {\n\
                     init(name) { self.name = name; }\n\
                     greet() { return \"hi \" + self.name; }\n\
                 }\n\
                 var m = Greeter(\"ada\").greet;\n\
                 print m();"),
            vec!["hi ada"]
        );
    }

    #[test]
    fn test_inheritance_and_super() {
        assert_eq!(
            run("class A { greet() { return \"A\"; } }\n\
                 class B < A { greet() { return \"B\" + super.greet(); } }\n\
                 print B().greet();"),
            vec!["BA"]
        );
    }

    #[test]
    fn test_inherited_method_without_override() {
        assert_eq!(
            run("class A { ping() { return \"pong\"; } }\n\
                 class B < A { }\n\
                 print B().ping();"),
            vec!["pong"]
        );
    }

    #[test]
    fn test_field_shadows_method_on_invoke() {
        assert_eq!(
            run("fun one() { return 1; }\n\
                 class Box { f() { return 2; } }\n\
                 var b = Box();\n\
                 print b.f();\n\
                 b.f = one;\n\
                 print b.f();"),
            vec!["2", "1"]
        );
    }

    #[test]
    fn test_property_compound_assignment() {
        assert_eq!(
            run("class P { init() { self.n = 10; } }\n\
                 var p = P();\n\
                 p.n += 5;\n\
                 print p.n;"),
            vec!["15"]
        );
    }

    #[test]
    fn test_concatenation_results_are_interned() {
        let mut vm = Vm::new();
        vm.capture_output(true);
        vm.interpret("var s = \"ab\" + \"cd\";").unwrap();
        let value = vm.get_global("s").unwrap();
        let handle = value.as_handle().unwrap();
        assert_eq!(vm.heap.str_text(handle), "abcd");
        assert_eq!(vm.heap.intern("abcd"), handle);
    }

    #[test]
    fn test_get_global() {
        let mut vm = Vm::new();
        vm.interpret("var x = 42;").unwrap();
        assert_eq!(vm.get_global("x"), Some(Value::Number(42.0)));
        assert_eq!(vm.get_global("missing"), None);
    }

    #[test]
    fn test_clock_native() {
        let mut vm = Vm::new();
        vm.interpret("var t = clock();").unwrap();
        let t = vm.get_global("t").unwrap().as_number().unwrap();
        assert!(t > 0.0);
    }

    #[test]
    fn test_type_error_message() {
        let err = run_err("print 1 + \"a\";");
        assert_eq!(
            err.to_string(),
            "[line 1] Operands must be two numbers or two strings."
        );
    }

    #[test]
    fn test_undefined_variable_error() {
        let err = run_err("print missing;");
        assert_eq!(err.to_string(), "[line 1] Undefined variable 'missing'.");
    }

    #[test]
    fn test_wrong_arity_error() {
        let err = run_err("fun f(a) { return a; } f();");
        assert_eq!(
            err.to_string(),
            "[line 1] Expected 1 arguments but got 0."
        );
    }

    #[test]
    fn test_stack_overflow() {
        let err = run_err("fun f() { f(); } f();");
        assert_eq!(err.to_string(), "[line 1] Stack overflow.");
    }

    #[test]
    fn test_vm_survives_runtime_errors() {
        let mut vm = Vm::new();
        vm.capture_output(true);
        assert!(vm.interpret("print 1 + \"a\";").is_err());
        vm.interpret("print 2;").unwrap();
        assert_eq!(vm.take_output(), vec!["2"]);
    }

    #[test]
    fn test_globals_persist_between_runs() {
        let mut vm = Vm::new();
        vm.capture_output(true);
        vm.interpret("var x = 1;").unwrap();
        vm.interpret("print x + 1;").unwrap();
        assert_eq!(vm.take_output(), vec!["2"]);
    }

    #[test]
    fn test_compile_error_reporting() {
        let mut vm = Vm::new();
        let err = vm.interpret("var = 3;").unwrap_err();
        let LaxError::Compile(errors) = err else {
            panic!("expected a compile error");
        };
        assert_eq!(
            errors[0].to_string(),
            "[line 1] Error at '=': Expect variable name."
        );
    }

    #[test]
    fn test_invalid_assignment_target() {
        let mut vm = Vm::new();
        let LaxError::Compile(errors) = vm.interpret("1 + 2 = 3;").unwrap_err() else {
            panic!("expected a compile error");
        };
        assert!(errors[0].to_string().contains("Invalid assignment target."));
    }

    #[test]
    fn test_constant_pool_overflow_is_reported() {
        let mut source = String::new();
        for i in 0..300 {
            source.push_str(&format!("print {};", i));
        }
        let mut vm = Vm::new();
        let LaxError::Compile(errors) = vm.interpret(&source).unwrap_err() else {
            panic!("expected a compile error");
        };
        assert!(errors[0]
            .to_string()
            .contains("Too many constants in one chunk."));
    }

    #[test]
    fn test_self_outside_class_is_a_compile_error() {
        let mut vm = Vm::new();
        let LaxError::Compile(errors) = vm.interpret("print self;").unwrap_err() else {
            panic!("expected a compile error");
        };
        assert!(errors[0]
            .to_string()
            .contains("Can't use 'self' outside of a class."));
    }

    #[test]
    fn test_return_at_top_level_is_a_compile_error() {
        let mut vm = Vm::new();
        let LaxError::Compile(errors) = vm.interpret("return 1;").unwrap_err() else {
            panic!("expected a compile error");
        };
        assert!(errors[0]
            .to_string()
            .contains("Can't return from top-level code."));
    }

    #[test]
    fn test_stress_gc_keeps_programs_correct() {
        let mut vm = Vm::new();
        vm.capture_output(true);
        vm.stress_gc = true;
        vm.interpret(
            "class Node { init(v) { self.v = v; } }\n\
             fun make(n) {\n\
                 var s = \"\";\n\
                 for (var i = 0; i < n; i = i + 1) { s = s + \"x\"; }\n\
                 return Node(s);\n\
             }\n\
             print make(20).v;",
        )
        .unwrap();
        assert_eq!(vm.take_output(), vec!["xxxxxxxxxxxxxxxxxxxx"]);
    }

    #[test]
    fn test_gc_accounts_for_instances_that_grow_after_allocation() {
        // Each instance's field table grows past the size it was
        // allocated at; collecting the dead ones must not push the byte
        // count below zero.
        let mut vm = Vm::new();
        vm.capture_output(true);
        vm.stress_gc = true;
        vm.interpret(
            "class Wide {\n\
                 init() {\n\
                     self.a = 1; self.b = 2; self.c = 3; self.d = 4;\n\
                     self.e = 5; self.f = 6; self.g = 7; self.h = 8;\n\
                 }\n\
             }\n\
             for (var i = 0; i < 200; i = i + 1) { Wide(); }\n\
             print \"done\";",
        )
        .unwrap();
        assert_eq!(vm.take_output(), vec!["done"]);
    }

    #[test]
    fn test_collect_garbage_reclaims_bytes() {
        let mut vm = Vm::new();
        vm.capture_output(true);
        vm.interpret(
            "var s = \"a\";\n\
             for (var i = 0; i < 50; i = i + 1) { s = s + \"b\"; }",
        )
        .unwrap();
        let before = vm.heap.bytes_allocated();
        vm.collect_garbage();
        assert!(vm.heap.bytes_allocated() < before);
        // The survivor is still intact.
        let s = vm.get_global("s").unwrap().as_handle().unwrap();
        assert_eq!(vm.heap.str_text(s).len(), 51);
    }
}
