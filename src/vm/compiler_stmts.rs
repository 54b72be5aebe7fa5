//! Statement and declaration compilation.

use crate::lexer::TokenKind;

use super::compiler::{Compiler, FunctionKind, LoopState};
use super::opcode::Op;

impl<'src, 'h> Compiler<'src, 'h> {
    pub(super) fn declaration(&mut self) {
        if self.match_token(TokenKind::Class) {
            self.class_declaration();
        } else if self.match_token(TokenKind::Fun) {
            self.fun_declaration();
        } else if self.match_token(TokenKind::Var) {
            self.var_declaration();
        } else {
            self.statement();
        }

        if self.panic_mode {
            self.synchronize();
        }
    }

    fn var_declaration(&mut self) {
        let global = self.parse_variable("Expect variable name.");

        if self.match_token(TokenKind::Equal) {
            self.expression();
        } else {
            self.emit(Op::Nil);
        }
        self.consume(
            TokenKind::Semicolon,
            "Expect ';' after variable declaration.",
        );

        self.define_variable(global);
    }

    fn fun_declaration(&mut self) {
        let global = self.parse_variable("Expect function name.");
        // A function may call itself; its name is usable immediately.
        self.mark_initialized();
        self.function(self.previous.lexeme, FunctionKind::Function);
        self.define_variable(global);
    }

    /// Compile a function body and emit the closure that wraps it.
    pub(super) fn function(&mut self, name: &str, kind: FunctionKind) {
        self.push_function(name, kind);
        self.begin_scope();

        self.consume(TokenKind::LeftParen, "Expect '(' after function name.");
        if !self.check(TokenKind::RightParen) {
            loop {
                if self.func().function.arity == u8::MAX {
                    self.error_at_current("Can't have more than 255 parameters.");
                } else {
                    self.func().function.arity += 1;
                }
                let constant = self.parse_variable("Expect parameter name.");
                self.define_variable(constant);
                if !self.match_token(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightParen, "Expect ')' after parameters.");
        self.consume(TokenKind::LeftBrace, "Expect '{' before function body.");
        self.block();

        // No end_scope: Return throws the whole frame away.
        let function = self.end_function();
        let handle = self.heap.alloc(crate::heap::object::Obj::Function(function));
        let constant = self.make_constant(crate::heap::value::Value::Obj(handle));
        self.emit(Op::Closure(constant));
    }

    fn statement(&mut self) {
        if self.match_token(TokenKind::Print) {
            self.print_statement();
        } else if self.match_token(TokenKind::If) {
            self.if_statement();
        } else if self.match_token(TokenKind::While) {
            self.while_statement();
        } else if self.match_token(TokenKind::For) {
            self.for_statement();
        } else if self.match_token(TokenKind::Return) {
            self.return_statement();
        } else if self.match_token(TokenKind::Break) {
            self.break_statement();
        } else if self.match_token(TokenKind::Continue) {
            self.continue_statement();
        } else if self.match_token(TokenKind::LeftBrace) {
            self.begin_scope();
            self.block();
            self.end_scope();
        } else {
            self.expression_statement();
        }
    }

    pub(super) fn block(&mut self) {
        while !self.check(TokenKind::RightBrace) && !self.check(TokenKind::Eof) {
            self.declaration();
        }
        self.consume(TokenKind::RightBrace, "Expect '}' after block.");
    }

    fn print_statement(&mut self) {
        self.expression();
        self.consume(TokenKind::Semicolon, "Expect ';' after value.");
        self.emit(Op::Print);
    }

    fn expression_statement(&mut self) {
        self.expression();
        self.consume(TokenKind::Semicolon, "Expect ';' after expression.");
        self.emit(Op::Pop);
    }

    fn if_statement(&mut self) {
        self.consume(TokenKind::LeftParen, "Expect '(' after 'if'.");
        self.expression();
        self.consume(TokenKind::RightParen, "Expect ')' after condition.");

        let then_jump = self.emit_jump(Op::JumpIfFalse(0xffff));
        self.emit(Op::Pop);
        self.statement();
        let else_jump = self.emit_jump(Op::Jump(0xffff));

        self.patch_jump(then_jump);
        self.emit(Op::Pop);
        if self.match_token(TokenKind::Else) {
            self.statement();
        }
        self.patch_jump(else_jump);
    }

    fn while_statement(&mut self) {
        let loop_start = self.chunk().len();
        self.consume(TokenKind::LeftParen, "Expect '(' after 'while'.");
        self.expression();
        self.consume(TokenKind::RightParen, "Expect ')' after condition.");

        let exit_jump = self.emit_jump(Op::JumpIfFalse(0xffff));
        self.emit(Op::Pop);

        let depth = self.func().scope_depth;
        self.func().loops.push(LoopState {
            continue_target: loop_start,
            depth,
            break_jumps: Vec::new(),
        });

        self.statement();
        self.emit_loop(loop_start);

        self.patch_jump(exit_jump);
        self.emit(Op::Pop);

        // Breaks land after the condition value has been popped.
        let state = self.func().loops.pop().unwrap();
        for jump in state.break_jumps {
            self.patch_jump(jump);
        }
    }

    fn for_statement(&mut self) {
        // The loop variable lives in its own scope, shared by every
        // iteration. Closures made in the body all capture that one
        // binding and see its final value after the loop.
        self.begin_scope();
        self.consume(TokenKind::LeftParen, "Expect '(' after 'for'.");

        if self.match_token(TokenKind::Semicolon) {
            // No initializer.
        } else if self.match_token(TokenKind::Var) {
            self.var_declaration();
        } else {
            self.expression_statement();
        }

        let mut loop_start = self.chunk().len();

        let mut exit_jump = None;
        if !self.match_token(TokenKind::Semicolon) {
            self.expression();
            self.consume(TokenKind::Semicolon, "Expect ';' after loop condition.");
            exit_jump = Some(self.emit_jump(Op::JumpIfFalse(0xffff)));
            self.emit(Op::Pop);
        }

        if !self.match_token(TokenKind::RightParen) {
            // The increment textually precedes the body but runs after
            // it, so the body jumps over it and it loops back to the
            // condition.
            let body_jump = self.emit_jump(Op::Jump(0xffff));
            let increment_start = self.chunk().len();
            self.expression();
            self.emit(Op::Pop);
            self.consume(TokenKind::RightParen, "Expect ')' after for clauses.");

            self.emit_loop(loop_start);
            loop_start = increment_start;
            self.patch_jump(body_jump);
        }

        let depth = self.func().scope_depth;
        self.func().loops.push(LoopState {
            continue_target: loop_start,
            depth,
            break_jumps: Vec::new(),
        });

        self.statement();
        self.emit_loop(loop_start);

        if let Some(exit_jump) = exit_jump {
            self.patch_jump(exit_jump);
            self.emit(Op::Pop);
        }

        let state = self.func().loops.pop().unwrap();
        for jump in state.break_jumps {
            self.patch_jump(jump);
        }

        self.end_scope();
    }

    fn return_statement(&mut self) {
        if self.func().kind == FunctionKind::Script {
            self.error("Can't return from top-level code.");
        }

        if self.match_token(TokenKind::Semicolon) {
            self.emit_return();
        } else {
            if self.func().kind == FunctionKind::Initializer {
                self.error("Can't return a value from an initializer.");
            }
            self.expression();
            self.consume(TokenKind::Semicolon, "Expect ';' after return value.");
            self.emit(Op::Return);
        }
    }

    fn break_statement(&mut self) {
        self.consume(TokenKind::Semicolon, "Expect ';' after 'break'.");
        let Some(depth) = self.func().loops.last().map(|l| l.depth) else {
            self.error("Can't use 'break' outside of a loop.");
            return;
        };
        self.discard_locals(depth);
        let jump = self.emit_jump(Op::Jump(0xffff));
        self.func().loops.last_mut().unwrap().break_jumps.push(jump);
    }

    fn continue_statement(&mut self) {
        self.consume(TokenKind::Semicolon, "Expect ';' after 'continue'.");
        let Some((target, depth)) = self
            .func()
            .loops
            .last()
            .map(|l| (l.continue_target, l.depth))
        else {
            self.error("Can't use 'continue' outside of a loop.");
            return;
        };
        self.discard_locals(depth);
        self.emit_loop(target);
    }
}
