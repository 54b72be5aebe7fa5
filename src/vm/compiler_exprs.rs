//! Expression compilation: the Pratt parser.
//!
//! Each token kind maps to an optional prefix handler, an optional infix
//! handler, and an infix binding power. `parse_precedence` drives them:
//! one prefix, then infix handlers as long as the next operator binds at
//! least as tightly as the caller allows.

use crate::heap::value::Value;
use crate::lexer::TokenKind;

use super::compiler::Compiler;
use super::opcode::Op;

/// Binding power, loosest to tightest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Precedence {
    None,
    Assignment, // = += -= *= /=
    Conditional, // ?:
    Or,
    And,
    Bitwise, // & | ^ << >>
    Equality,
    Comparison,
    Term,
    Factor,
    Power, // **
    Unary,
    Call,
    Primary,
}

impl Precedence {
    /// One step tighter; what a left-associative infix parses its right
    /// operand at.
    fn next(self) -> Precedence {
        match self {
            Precedence::None => Precedence::Assignment,
            Precedence::Assignment => Precedence::Conditional,
            Precedence::Conditional => Precedence::Or,
            Precedence::Or => Precedence::And,
            Precedence::And => Precedence::Bitwise,
            Precedence::Bitwise => Precedence::Equality,
            Precedence::Equality => Precedence::Comparison,
            Precedence::Comparison => Precedence::Term,
            Precedence::Term => Precedence::Factor,
            Precedence::Factor => Precedence::Power,
            Precedence::Power => Precedence::Unary,
            Precedence::Unary => Precedence::Call,
            Precedence::Call | Precedence::Primary => Precedence::Primary,
        }
    }
}

/// Infix binding power of a token, `None` if it never appears infix.
fn precedence_of(kind: TokenKind) -> Precedence {
    match kind {
        TokenKind::Question => Precedence::Conditional,
        TokenKind::Or => Precedence::Or,
        TokenKind::And => Precedence::And,
        TokenKind::Amp
        | TokenKind::Pipe
        | TokenKind::Caret
        | TokenKind::Shl
        | TokenKind::Shr => Precedence::Bitwise,
        TokenKind::EqualEqual | TokenKind::BangEqual => Precedence::Equality,
        TokenKind::Greater | TokenKind::GreaterEqual | TokenKind::Less | TokenKind::LessEqual => {
            Precedence::Comparison
        }
        TokenKind::Plus | TokenKind::Minus => Precedence::Term,
        TokenKind::Star | TokenKind::Slash | TokenKind::Percent => Precedence::Factor,
        TokenKind::StarStar => Precedence::Power,
        TokenKind::LeftParen | TokenKind::Dot => Precedence::Call,
        _ => Precedence::None,
    }
}

/// The arithmetic op behind a compound assignment token.
fn compound_op(kind: TokenKind) -> Option<Op> {
    match kind {
        TokenKind::PlusEqual => Some(Op::Add),
        TokenKind::MinusEqual => Some(Op::Subtract),
        TokenKind::StarEqual => Some(Op::Multiply),
        TokenKind::SlashEqual => Some(Op::Divide),
        _ => None,
    }
}

impl<'src, 'h> Compiler<'src, 'h> {
    pub(super) fn expression(&mut self) {
        self.parse_precedence(Precedence::Assignment);
    }

    pub(super) fn parse_precedence(&mut self, precedence: Precedence) {
        self.advance();
        // Assignment is only legal when the whole expression up to here
        // could be a target; handlers below that threshold must refuse
        // the `=` themselves.
        let can_assign = precedence <= Precedence::Assignment;
        if !self.prefix(self.previous.kind, can_assign) {
            self.error("Expect expression.");
            return;
        }

        while precedence <= precedence_of(self.current.kind) {
            self.advance();
            self.infix(self.previous.kind, can_assign);
        }

        if can_assign
            && (self.check(TokenKind::Equal) || compound_op(self.current.kind).is_some())
        {
            self.advance();
            self.error("Invalid assignment target.");
        }
    }

    fn prefix(&mut self, kind: TokenKind, can_assign: bool) -> bool {
        match kind {
            TokenKind::LeftParen => self.grouping(),
            TokenKind::Minus | TokenKind::Bang => self.unary(),
            TokenKind::Number => self.number(),
            TokenKind::Str => self.string(),
            TokenKind::Nil => {
                self.emit(Op::Nil);
            }
            TokenKind::True => {
                self.emit(Op::True);
            }
            TokenKind::False => {
                self.emit(Op::False);
            }
            TokenKind::Identifier => self.variable(can_assign),
            TokenKind::SelfKw => self.self_(),
            TokenKind::Super => self.super_(),
            _ => return false,
        }
        true
    }

    fn infix(&mut self, kind: TokenKind, can_assign: bool) {
        match kind {
            TokenKind::LeftParen => self.call(),
            TokenKind::Dot => self.dot(can_assign),
            TokenKind::Question => self.ternary(),
            TokenKind::And => self.and_(),
            TokenKind::Or => self.or_(),
            _ => self.binary(kind),
        }
    }

    fn grouping(&mut self) {
        self.expression();
        self.consume(TokenKind::RightParen, "Expect ')' after expression.");
    }

    fn number(&mut self) {
        match self.previous.lexeme.parse::<f64>() {
            Ok(n) => self.emit_constant(Value::Number(n)),
            Err(_) => self.error("Invalid number literal."),
        }
    }

    fn string(&mut self) {
        // Trim the surrounding quotes.
        let lexeme = self.previous.lexeme;
        let text = &lexeme[1..lexeme.len() - 1];
        let handle = self.heap.intern(text);
        self.emit_constant(Value::Obj(handle));
    }

    fn unary(&mut self) {
        let operator = self.previous.kind;
        self.parse_precedence(Precedence::Unary);
        match operator {
            TokenKind::Minus => self.emit(Op::Negate),
            TokenKind::Bang => self.emit(Op::Not),
            _ => unreachable!(),
        };
    }

    fn binary(&mut self, operator: TokenKind) {
        self.parse_precedence(precedence_of(operator).next());
        match operator {
            TokenKind::Plus => {
                self.emit(Op::Add);
            }
            TokenKind::Minus => {
                self.emit(Op::Subtract);
            }
            TokenKind::Star => {
                self.emit(Op::Multiply);
            }
            TokenKind::Slash => {
                self.emit(Op::Divide);
            }
            TokenKind::Percent => {
                self.emit(Op::Modulo);
            }
            TokenKind::StarStar => {
                self.emit(Op::Power);
            }
            TokenKind::Amp => {
                self.emit(Op::BitAnd);
            }
            TokenKind::Pipe => {
                self.emit(Op::BitOr);
            }
            TokenKind::Caret => {
                self.emit(Op::BitXor);
            }
            TokenKind::Shl => {
                self.emit(Op::Shl);
            }
            TokenKind::Shr => {
                self.emit(Op::Shr);
            }
            TokenKind::EqualEqual => {
                self.emit(Op::Equal);
            }
            TokenKind::BangEqual => {
                self.emit(Op::Equal);
                self.emit(Op::Not);
            }
            TokenKind::Greater => {
                self.emit(Op::Greater);
            }
            TokenKind::GreaterEqual => {
                self.emit(Op::Less);
                self.emit(Op::Not);
            }
            TokenKind::Less => {
                self.emit(Op::Less);
            }
            TokenKind::LessEqual => {
                self.emit(Op::Greater);
                self.emit(Op::Not);
            }
            _ => unreachable!(),
        }
    }

    /// `and` short-circuits by leaving the falsey left operand as the
    /// result. `JumpIfFalse` peeks, so the operand survives the jump.
    fn and_(&mut self) {
        let end_jump = self.emit_jump(Op::JumpIfFalse(0xffff));
        self.emit(Op::Pop);
        self.parse_precedence(Precedence::And);
        self.patch_jump(end_jump);
    }

    fn or_(&mut self) {
        let else_jump = self.emit_jump(Op::JumpIfFalse(0xffff));
        let end_jump = self.emit_jump(Op::Jump(0xffff));
        self.patch_jump(else_jump);
        self.emit(Op::Pop);
        self.parse_precedence(Precedence::Or);
        self.patch_jump(end_jump);
    }

    /// `cond ? a : b`, right-associative.
    fn ternary(&mut self) {
        let else_jump = self.emit_jump(Op::JumpIfFalse(0xffff));
        self.emit(Op::Pop);
        self.parse_precedence(Precedence::Conditional);
        let end_jump = self.emit_jump(Op::Jump(0xffff));
        self.consume(TokenKind::Colon, "Expect ':' after then branch of conditional.");
        self.patch_jump(else_jump);
        self.emit(Op::Pop);
        self.parse_precedence(Precedence::Conditional);
        self.patch_jump(end_jump);
    }

    fn call(&mut self) {
        let arg_count = self.argument_list();
        self.emit(Op::Call(arg_count));
    }

    fn dot(&mut self, can_assign: bool) {
        self.consume(TokenKind::Identifier, "Expect property name after '.'.");
        let name = self.identifier_constant(self.previous.lexeme);

        if can_assign && self.match_token(TokenKind::Equal) {
            self.expression();
            self.emit(Op::SetProperty(name));
        } else if can_assign && compound_op(self.current.kind).is_some() {
            self.advance();
            let op = compound_op(self.previous.kind).unwrap();
            // Keep the receiver around: read the field, modify, write back.
            self.emit(Op::Dup);
            self.emit(Op::GetProperty(name));
            self.expression();
            self.emit(op);
            self.emit(Op::SetProperty(name));
        } else if self.match_token(TokenKind::LeftParen) {
            let arg_count = self.argument_list();
            self.emit(Op::Invoke(name, arg_count));
        } else {
            self.emit(Op::GetProperty(name));
        }
    }

    pub(super) fn variable(&mut self, can_assign: bool) {
        let name = self.previous;
        self.named_variable(name, can_assign);
    }

    pub(super) fn named_variable(&mut self, name: crate::lexer::Token<'src>, can_assign: bool) {
        let (get_op, set_op) = if let Some(slot) = self.resolve_local(name.lexeme) {
            (Op::GetLocal(slot), Op::SetLocal(slot))
        } else if let Some(index) = self.resolve_upvalue(name.lexeme) {
            (Op::GetUpvalue(index), Op::SetUpvalue(index))
        } else {
            let constant = self.identifier_constant(name.lexeme);
            (Op::GetGlobal(constant), Op::SetGlobal(constant))
        };

        if can_assign && self.match_token(TokenKind::Equal) {
            self.expression();
            self.emit(set_op);
        } else if can_assign && compound_op(self.current.kind).is_some() {
            self.advance();
            let op = compound_op(self.previous.kind).unwrap();
            self.emit(get_op);
            self.expression();
            self.emit(op);
            self.emit(set_op);
        } else {
            self.emit(get_op);
        }
    }

    pub(super) fn argument_list(&mut self) -> u8 {
        let mut arg_count: usize = 0;
        if !self.check(TokenKind::RightParen) {
            loop {
                self.expression();
                if arg_count == 255 {
                    self.error("Can't have more than 255 arguments.");
                }
                arg_count += 1;
                if !self.match_token(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightParen, "Expect ')' after arguments.");
        arg_count.min(255) as u8
    }
}
