//! Calls, method dispatch, and upvalue bookkeeping.

use crate::error::RuntimeError;
use crate::heap::object::{BoundMethod, Instance, Obj, Upvalue};
use crate::heap::table::Table;
use crate::heap::value::Value;
use crate::heap::Handle;

use super::vm::{CallFrame, Vm, FRAMES_MAX};

impl Vm {
    /// Dispatch on what the callee is. The callee sits below its
    /// arguments at `stack[len - argc - 1]` and becomes slot 0 of the
    /// new frame.
    pub(super) fn call_value(
        &mut self,
        callee: Value,
        argc: u8,
        line: usize,
    ) -> Result<(), RuntimeError> {
        let Value::Obj(handle) = callee else {
            return Err(RuntimeError::NotCallable { line });
        };

        match self.heap.get(handle) {
            Obj::Closure(_) => self.call_closure(handle, argc, line),
            Obj::BoundMethod(_) => {
                let bound = self.heap.bound_method(handle);
                let receiver = bound.receiver;
                let method = bound.method;
                // The receiver replaces the bound method as slot 0, so
                // the body's `self` resolves to it.
                let slot = self.stack.len() - 1 - argc as usize;
                self.stack[slot] = receiver;
                self.call_closure(method, argc, line)
            }
            Obj::Class(_) => self.call_class(handle, argc, line),
            Obj::Native(native) => {
                let native = *native;
                if native.arity != argc {
                    return Err(RuntimeError::wrong_arity(
                        native.arity as usize,
                        argc as usize,
                        line,
                    ));
                }
                let args_start = self.stack.len() - argc as usize;
                let result = (native.function)(&self.stack[args_start..])
                    .map_err(|message| RuntimeError::NativeError { message, line })?;
                self.stack.truncate(args_start - 1);
                self.stack.push(result);
                Ok(())
            }
            _ => Err(RuntimeError::NotCallable { line }),
        }
    }

    pub(super) fn call_closure(
        &mut self,
        closure: Handle,
        argc: u8,
        line: usize,
    ) -> Result<(), RuntimeError> {
        let function = self.heap.closure(closure).function;
        let arity = self.heap.function(function).arity;
        if arity != argc {
            return Err(RuntimeError::wrong_arity(
                arity as usize,
                argc as usize,
                line,
            ));
        }
        if self.frames.len() >= FRAMES_MAX {
            return Err(RuntimeError::StackOverflow { line });
        }
        self.frames.push(CallFrame {
            closure,
            ip: 0,
            base: self.stack.len() - argc as usize - 1,
        });
        Ok(())
    }

    /// Calling a class makes an instance and runs `init` if there is one.
    fn call_class(&mut self, class: Handle, argc: u8, line: usize) -> Result<(), RuntimeError> {
        // The class value at the callee slot roots itself through the
        // checkpoint inside allocate.
        let instance = self.allocate(Obj::Instance(Instance {
            class,
            fields: Table::new(),
        }));
        let slot = self.stack.len() - 1 - argc as usize;
        self.stack[slot] = Value::Obj(instance);

        let init = self.init_string;
        let hash = self.heap.str_hash(init);
        match self.heap.class(class).methods.get(init, hash) {
            Some(Value::Obj(initializer)) => self.call_closure(initializer, argc, line),
            Some(_) => unreachable!("methods are closures"),
            None if argc != 0 => Err(RuntimeError::wrong_arity(0, argc as usize, line)),
            None => Ok(()),
        }
    }

    /// Method call without materializing a bound method.
    pub(super) fn invoke_from_class(
        &mut self,
        class: Handle,
        name: Handle,
        argc: u8,
        line: usize,
    ) -> Result<(), RuntimeError> {
        let hash = self.heap.str_hash(name);
        match self.heap.class(class).methods.get(name, hash) {
            Some(Value::Obj(method)) => self.call_closure(method, argc, line),
            Some(_) => unreachable!("methods are closures"),
            None => Err(RuntimeError::undefined_property(
                self.heap.str_text(name),
                line,
            )),
        }
    }

    /// Replace the receiver on top of the stack with the named method
    /// bound to it.
    pub(super) fn bind_method(
        &mut self,
        class: Handle,
        name: Handle,
        line: usize,
    ) -> Result<(), RuntimeError> {
        let hash = self.heap.str_hash(name);
        let Some(method) = self.heap.class(class).methods.get(name, hash) else {
            return Err(RuntimeError::undefined_property(
                self.heap.str_text(name),
                line,
            ));
        };
        let Value::Obj(method) = method else {
            unreachable!("methods are closures");
        };

        let receiver = self.peek(0);
        let bound = self.allocate(Obj::BoundMethod(BoundMethod { receiver, method }));
        self.pop();
        self.push(Value::Obj(bound));
        Ok(())
    }

    /// Find or create the open upvalue for a stack slot. The list is
    /// kept sorted by slot so closing can peel from the back.
    pub(super) fn capture_upvalue(&mut self, slot: usize) -> Handle {
        let mut insert_at = 0;
        for (i, &handle) in self.open_upvalues.iter().enumerate().rev() {
            let Upvalue::Open(open_slot) = *self.heap.upvalue(handle) else {
                unreachable!("closed upvalue in the open list");
            };
            if open_slot == slot {
                return handle;
            }
            if open_slot < slot {
                insert_at = i + 1;
                break;
            }
        }

        let handle = self.heap.alloc(Obj::Upvalue(Upvalue::Open(slot)));
        self.open_upvalues.insert(insert_at, handle);
        handle
    }

    /// Close every open upvalue for slots at or above `from`, moving the
    /// stack values into the upvalues themselves.
    pub(super) fn close_upvalues(&mut self, from: usize) {
        while let Some(&handle) = self.open_upvalues.last() {
            let Upvalue::Open(slot) = *self.heap.upvalue(handle) else {
                unreachable!("closed upvalue in the open list");
            };
            if slot < from {
                break;
            }
            let value = self.stack[slot];
            *self.heap.upvalue_mut(handle) = Upvalue::Closed(value);
            self.open_upvalues.pop();
        }
    }
}
