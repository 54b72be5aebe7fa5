//! Class declarations, `self`, and `super`.

use crate::lexer::{Token, TokenKind};

use super::compiler::{ClassState, Compiler, FunctionKind};
use super::opcode::Op;

impl<'src, 'h> Compiler<'src, 'h> {
    pub(super) fn class_declaration(&mut self) {
        self.consume(TokenKind::Identifier, "Expect class name.");
        let class_name = self.previous;
        let name_constant = self.identifier_constant(class_name.lexeme);
        self.declare_variable();

        self.emit(Op::Class(name_constant));
        self.define_variable(name_constant);

        self.classes.push(ClassState {
            has_superclass: false,
        });

        if self.match_token(TokenKind::Less) {
            self.consume(TokenKind::Identifier, "Expect superclass name.");
            self.variable(false);
            if class_name.lexeme == self.previous.lexeme {
                self.error("A class can't inherit from itself.");
            }

            // The superclass stays on the stack as a scoped local named
            // `super`, which is how super calls find it at runtime.
            self.begin_scope();
            self.add_local("super");
            self.define_variable(0);

            self.named_variable(class_name, false);
            self.emit(Op::Inherit);
            self.classes.last_mut().unwrap().has_superclass = true;
        }

        // Methods attach to the class value, so load it back on the stack.
        self.named_variable(class_name, false);
        self.consume(TokenKind::LeftBrace, "Expect '{' before class body.");
        while !self.check(TokenKind::RightBrace) && !self.check(TokenKind::Eof) {
            self.method();
        }
        self.consume(TokenKind::RightBrace, "Expect '}' after class body.");
        self.emit(Op::Pop);

        if self.classes.last().unwrap().has_superclass {
            self.end_scope();
        }
        self.classes.pop();
    }

    fn method(&mut self) {
        self.consume(TokenKind::Identifier, "Expect method name.");
        let name = self.previous.lexeme;
        let constant = self.identifier_constant(name);

        let kind = if name == "init" {
            FunctionKind::Initializer
        } else {
            FunctionKind::Method
        };
        self.function(name, kind);
        self.emit(Op::Method(constant));
    }

    pub(super) fn self_(&mut self) {
        if self.classes.is_empty() {
            self.error("Can't use 'self' outside of a class.");
            return;
        }
        self.variable(false);
    }

    pub(super) fn super_(&mut self) {
        match self.classes.last() {
            None => self.error("Can't use 'super' outside of a class."),
            Some(class) if !class.has_superclass => {
                self.error("Can't use 'super' in a class with no superclass.");
            }
            Some(_) => {}
        }

        self.consume(TokenKind::Dot, "Expect '.' after 'super'.");
        self.consume(TokenKind::Identifier, "Expect superclass method name.");
        let name = self.identifier_constant(self.previous.lexeme);

        self.named_variable(Token::synthetic("self"), false);
        if self.match_token(TokenKind::LeftParen) {
            let arg_count = self.argument_list();
            self.named_variable(Token::synthetic("super"), false);
            self.emit(Op::SuperInvoke(name, arg_count));
        } else {
            self.named_variable(Token::synthetic("super"), false);
            self.emit(Op::GetSuper(name));
        }
    }
}
