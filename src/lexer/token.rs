//! Token kinds and the token type produced by the scanner.

/// Every kind of token in the Lax grammar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    // Symbols
    LeftParen,
    RightParen,
    LeftBrace,
    RightBrace,
    Comma,
    Dot,
    Semicolon,
    Question,
    Colon,

    // Arithmetic
    Minus,
    Plus,
    Slash,
    Star,
    Percent,
    StarStar,

    // Bitwise
    Amp,
    Pipe,
    Caret,
    Shl,
    Shr,

    // Equality and comparison
    Bang,
    BangEqual,
    Equal,
    EqualEqual,
    Greater,
    GreaterEqual,
    Less,
    LessEqual,

    // Reassignment
    PlusEqual,
    MinusEqual,
    StarEqual,
    SlashEqual,

    // Literals
    Identifier,
    Str,
    Number,

    // Keywords
    And,
    Break,
    Class,
    Continue,
    Else,
    False,
    For,
    Fun,
    If,
    Nil,
    Or,
    Print,
    Return,
    Super,
    SelfKw,
    True,
    Var,
    While,

    // Special
    Error,
    Eof,
}

impl TokenKind {
    /// Resolve a keyword, or `None` for a plain identifier.
    pub fn keyword(text: &str) -> Option<TokenKind> {
        let kind = match text {
            "and" => TokenKind::And,
            "break" => TokenKind::Break,
            "class" => TokenKind::Class,
            "continue" => TokenKind::Continue,
            "else" => TokenKind::Else,
            "false" => TokenKind::False,
            "for" => TokenKind::For,
            "fun" => TokenKind::Fun,
            "if" => TokenKind::If,
            "nil" => TokenKind::Nil,
            "or" => TokenKind::Or,
            "print" => TokenKind::Print,
            "return" => TokenKind::Return,
            "self" => TokenKind::SelfKw,
            "super" => TokenKind::Super,
            "true" => TokenKind::True,
            "var" => TokenKind::Var,
            "while" => TokenKind::While,
            _ => return None,
        };
        Some(kind)
    }
}

/// A single token. The lexeme borrows from the source text; for
/// `TokenKind::Error` tokens it is the error message instead.
#[derive(Debug, Clone, Copy)]
pub struct Token<'src> {
    pub kind: TokenKind,
    pub lexeme: &'src str,
    pub line: usize,
}

impl<'src> Token<'src> {
    pub fn new(kind: TokenKind, lexeme: &'src str, line: usize) -> Self {
        Self { kind, lexeme, line }
    }

    /// A token that exists in no source text, used for implicit names
    /// like `self` and `super`.
    pub fn synthetic(lexeme: &'static str) -> Self {
        Self {
            kind: TokenKind::Identifier,
            lexeme,
            line: 0,
        }
    }
}
