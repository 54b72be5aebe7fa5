//! Lexer for Lax source code.
//!
//! Tokens are produced lazily, one per `scan_token` call. Malformed input
//! (an unterminated string, a character the language doesn't know) becomes
//! a `TokenKind::Error` token whose lexeme is the message; the compiler
//! decides how to report it.

use crate::lexer::token::{Token, TokenKind};

/// The scanner walks the source bytes with a start/current cursor pair.
pub struct Scanner<'src> {
    source: &'src str,
    start: usize,
    current: usize,
    line: usize,
}

impl<'src> Scanner<'src> {
    pub fn new(source: &'src str) -> Self {
        Self {
            source,
            start: 0,
            current: 0,
            line: 1,
        }
    }

    /// Scan the next token.
    pub fn scan_token(&mut self) -> Token<'src> {
        self.skip_whitespace_and_comments();
        self.start = self.current;

        let Some(c) = self.advance() else {
            return self.make_token(TokenKind::Eof);
        };

        match c {
            b'(' => self.make_token(TokenKind::LeftParen),
            b')' => self.make_token(TokenKind::RightParen),
            b'{' => self.make_token(TokenKind::LeftBrace),
            b'}' => self.make_token(TokenKind::RightBrace),
            b',' => self.make_token(TokenKind::Comma),
            b'.' => self.make_token(TokenKind::Dot),
            b';' => self.make_token(TokenKind::Semicolon),
            b'?' => self.make_token(TokenKind::Question),
            b':' => self.make_token(TokenKind::Colon),
            b'%' => self.make_token(TokenKind::Percent),
            b'&' => self.make_token(TokenKind::Amp),
            b'|' => self.make_token(TokenKind::Pipe),
            b'^' => self.make_token(TokenKind::Caret),

            b'+' => {
                if self.match_byte(b'=') {
                    self.make_token(TokenKind::PlusEqual)
                } else {
                    self.make_token(TokenKind::Plus)
                }
            }
            b'-' => {
                if self.match_byte(b'=') {
                    self.make_token(TokenKind::MinusEqual)
                } else {
                    self.make_token(TokenKind::Minus)
                }
            }
            b'*' => {
                if self.match_byte(b'*') {
                    self.make_token(TokenKind::StarStar)
                } else if self.match_byte(b'=') {
                    self.make_token(TokenKind::StarEqual)
                } else {
                    self.make_token(TokenKind::Star)
                }
            }
            b'/' => {
                if self.match_byte(b'=') {
                    self.make_token(TokenKind::SlashEqual)
                } else {
                    self.make_token(TokenKind::Slash)
                }
            }
            b'!' => {
                if self.match_byte(b'=') {
                    self.make_token(TokenKind::BangEqual)
                } else {
                    self.make_token(TokenKind::Bang)
                }
            }
            b'=' => {
                if self.match_byte(b'=') {
                    self.make_token(TokenKind::EqualEqual)
                } else {
                    self.make_token(TokenKind::Equal)
                }
            }
            b'<' => {
                if self.match_byte(b'=') {
                    self.make_token(TokenKind::LessEqual)
                } else if self.match_byte(b'<') {
                    self.make_token(TokenKind::Shl)
                } else {
                    self.make_token(TokenKind::Less)
                }
            }
            b'>' => {
                if self.match_byte(b'=') {
                    self.make_token(TokenKind::GreaterEqual)
                } else if self.match_byte(b'>') {
                    self.make_token(TokenKind::Shr)
                } else {
                    self.make_token(TokenKind::Greater)
                }
            }

            b'"' => self.scan_string(),
            c if c.is_ascii_digit() => self.scan_number(),
            c if c.is_ascii_alphabetic() || c == b'_' => self.scan_identifier(),

            _ => self.error_token("Unexpected character."),
        }
    }

    fn skip_whitespace_and_comments(&mut self) {
        loop {
            match self.peek() {
                Some(b' ' | b'\t' | b'\r') => {
                    self.advance();
                }
                Some(b'\n') => {
                    self.line += 1;
                    self.advance();
                }
                Some(b'/') if self.peek_next() == Some(b'/') => {
                    while self.peek().is_some() && self.peek() != Some(b'\n') {
                        self.advance();
                    }
                }
                _ => break,
            }
        }
    }

    fn scan_string(&mut self) -> Token<'src> {
        while let Some(c) = self.peek() {
            if c == b'"' {
                break;
            }
            if c == b'\n' {
                self.line += 1;
            }
            self.advance();
        }

        if self.peek().is_none() {
            return self.error_token("Unterminated string.");
        }

        // The closing quote.
        self.advance();
        self.make_token(TokenKind::Str)
    }

    fn scan_number(&mut self) -> Token<'src> {
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.advance();
        }

        // A single fractional part; no exponents.
        if self.peek() == Some(b'.') && self.peek_next().is_some_and(|c| c.is_ascii_digit()) {
            self.advance();
            while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                self.advance();
            }
        }

        self.make_token(TokenKind::Number)
    }

    fn scan_identifier(&mut self) -> Token<'src> {
        while self
            .peek()
            .is_some_and(|c| c.is_ascii_alphanumeric() || c == b'_')
        {
            self.advance();
        }

        let text = &self.source[self.start..self.current];
        let kind = TokenKind::keyword(text).unwrap_or(TokenKind::Identifier);
        self.make_token(kind)
    }

    fn advance(&mut self) -> Option<u8> {
        let c = self.source.as_bytes().get(self.current).copied();
        if c.is_some() {
            self.current += 1;
        }
        c
    }

    fn peek(&self) -> Option<u8> {
        self.source.as_bytes().get(self.current).copied()
    }

    fn peek_next(&self) -> Option<u8> {
        self.source.as_bytes().get(self.current + 1).copied()
    }

    fn match_byte(&mut self, expected: u8) -> bool {
        if self.peek() == Some(expected) {
            self.current += 1;
            true
        } else {
            false
        }
    }

    fn make_token(&self, kind: TokenKind) -> Token<'src> {
        Token::new(kind, &self.source[self.start..self.current], self.line)
    }

    fn error_token(&self, message: &'static str) -> Token<'src> {
        Token::new(TokenKind::Error, message, self.line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scan(source: &str) -> Vec<TokenKind> {
        let mut scanner = Scanner::new(source);
        let mut kinds = Vec::new();
        loop {
            let token = scanner.scan_token();
            let is_eof = token.kind == TokenKind::Eof;
            kinds.push(token.kind);
            if is_eof {
                break;
            }
        }
        kinds
    }

    #[test]
    fn test_basic_tokens() {
        assert_eq!(
            scan("(){};,."),
            vec![
                TokenKind::LeftParen,
                TokenKind::RightParen,
                TokenKind::LeftBrace,
                TokenKind::RightBrace,
                TokenKind::Semicolon,
                TokenKind::Comma,
                TokenKind::Dot,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_maximal_munch() {
        assert_eq!(
            scan("= == ! != < <= << > >= >> * ** *= + +="),
            vec![
                TokenKind::Equal,
                TokenKind::EqualEqual,
                TokenKind::Bang,
                TokenKind::BangEqual,
                TokenKind::Less,
                TokenKind::LessEqual,
                TokenKind::Shl,
                TokenKind::Greater,
                TokenKind::GreaterEqual,
                TokenKind::Shr,
                TokenKind::Star,
                TokenKind::StarStar,
                TokenKind::StarEqual,
                TokenKind::Plus,
                TokenKind::PlusEqual,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_bitwise_operators() {
        assert_eq!(
            scan("& | ^ %"),
            vec![
                TokenKind::Amp,
                TokenKind::Pipe,
                TokenKind::Caret,
                TokenKind::Percent,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_numbers() {
        let mut scanner = Scanner::new("42 3.14 7.");
        assert_eq!(scanner.scan_token().lexeme, "42");
        assert_eq!(scanner.scan_token().lexeme, "3.14");
        // A trailing dot is not part of the number.
        assert_eq!(scanner.scan_token().lexeme, "7");
        assert_eq!(scanner.scan_token().kind, TokenKind::Dot);
    }

    #[test]
    fn test_string_keeps_quotes_in_lexeme() {
        let mut scanner = Scanner::new("\"hello\"");
        let token = scanner.scan_token();
        assert_eq!(token.kind, TokenKind::Str);
        assert_eq!(token.lexeme, "\"hello\"");
    }

    #[test]
    fn test_string_tracks_lines() {
        let mut scanner = Scanner::new("\"a\nb\" x");
        let token = scanner.scan_token();
        assert_eq!(token.kind, TokenKind::Str);
        let x = scanner.scan_token();
        assert_eq!(x.line, 2);
    }

    #[test]
    fn test_keywords() {
        assert_eq!(
            scan("var fun class if else while for break continue"),
            vec![
                TokenKind::Var,
                TokenKind::Fun,
                TokenKind::Class,
                TokenKind::If,
                TokenKind::Else,
                TokenKind::While,
                TokenKind::For,
                TokenKind::Break,
                TokenKind::Continue,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_receiver_keyword_is_self() {
        assert_eq!(
            scan("self super"),
            vec![TokenKind::SelfKw, TokenKind::Super, TokenKind::Eof]
        );
        // `this` is just an identifier.
        assert_eq!(scan("this"), vec![TokenKind::Identifier, TokenKind::Eof]);
    }

    #[test]
    fn test_keyword_prefix_is_identifier() {
        assert_eq!(
            scan("classy variable"),
            vec![TokenKind::Identifier, TokenKind::Identifier, TokenKind::Eof]
        );
    }

    #[test]
    fn test_line_comments() {
        assert_eq!(
            scan("1 // comment ** % &\n2"),
            vec![TokenKind::Number, TokenKind::Number, TokenKind::Eof]
        );
    }

    #[test]
    fn test_unterminated_string_is_error_token() {
        let mut scanner = Scanner::new("\"oops");
        let token = scanner.scan_token();
        assert_eq!(token.kind, TokenKind::Error);
        assert_eq!(token.lexeme, "Unterminated string.");
    }

    #[test]
    fn test_unexpected_character_is_error_token() {
        let mut scanner = Scanner::new("@");
        let token = scanner.scan_token();
        assert_eq!(token.kind, TokenKind::Error);
        assert_eq!(token.lexeme, "Unexpected character.");
    }

    #[test]
    fn test_eof_is_sticky() {
        let mut scanner = Scanner::new("");
        assert_eq!(scanner.scan_token().kind, TokenKind::Eof);
        assert_eq!(scanner.scan_token().kind, TokenKind::Eof);
    }
}
