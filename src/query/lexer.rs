//! Error-tolerant tokenizer for shell-style query text and shell output
//!
//! The lexer never panics and never rejects input: unknown characters become
//! `Unknown` tokens and unterminated strings become `UnterminatedString`, so
//! the validator can point at them while the classifier simply falls back to
//! the script path. Spans are character offsets into the input.

use std::ops::Range;

/// Token types for shell syntax
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    /// Identifier or keyword (`db`, `find`, `true`, `$gt`, ...)
    Ident(String),
    Dot,
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Comma,
    Colon,
    Semicolon,
    Minus,
    Plus,
    Bang,
    /// Other JavaScript punctuation (`=`, `<`, `*`, `/`, `&`, ...)
    Operator(char),
    /// String literal with escapes resolved
    String(String),
    /// String literal missing its closing quote
    UnterminatedString(String),
    /// Number literal, raw text
    Number(String),
    /// End of input
    Eof,
    /// Character that cannot start any token
    Unknown(char),
}

/// Token with position information
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Range<usize>,
}

impl Token {
    pub fn new(kind: TokenKind, span: Range<usize>) -> Self {
        Self { kind, span }
    }
}

/// Shell lexer
pub struct Lexer {
    input: Vec<char>,
    pos: usize,
}

impl Lexer {
    pub fn new(input: &str) -> Self {
        Self {
            input: input.chars().collect(),
            pos: 0,
        }
    }

    /// Tokenize the entire input. The last token is always `Eof`.
    pub fn tokenize(input: &str) -> Vec<Token> {
        let mut lexer = Self::new(input);
        let mut tokens = Vec::new();

        loop {
            let token = lexer.next_token();
            let is_eof = matches!(token.kind, TokenKind::Eof);
            tokens.push(token);
            if is_eof {
                break;
            }
        }

        tokens
    }

    fn next_token(&mut self) -> Token {
        self.skip_trivia();

        let start = self.pos;

        if self.is_at_end() {
            return Token::new(TokenKind::Eof, start..start);
        }

        let ch = self.current_char();
        let single = |kind: TokenKind, lexer: &mut Self| {
            lexer.advance();
            Token::new(kind, start..lexer.pos)
        };

        match ch {
            '.' if self.peek_char().is_ascii_digit() => self.scan_number(start),
            '.' => single(TokenKind::Dot, self),
            '(' => single(TokenKind::LParen, self),
            ')' => single(TokenKind::RParen, self),
            '{' => single(TokenKind::LBrace, self),
            '}' => single(TokenKind::RBrace, self),
            '[' => single(TokenKind::LBracket, self),
            ']' => single(TokenKind::RBracket, self),
            ',' => single(TokenKind::Comma, self),
            ':' => single(TokenKind::Colon, self),
            ';' => single(TokenKind::Semicolon, self),
            '-' => single(TokenKind::Minus, self),
            '+' => single(TokenKind::Plus, self),
            '!' => single(TokenKind::Bang, self),
            '=' | '<' | '>' | '*' | '/' | '%' | '&' | '|' | '?' | '^' | '~' => {
                single(TokenKind::Operator(ch), self)
            }
            '\'' | '"' | '`' => self.scan_string(ch, start),
            '0'..='9' => self.scan_number(start),
            c if c.is_alphabetic() || c == '_' || c == '$' => self.scan_identifier(start),
            _ => single(TokenKind::Unknown(ch), self),
        }
    }

    fn scan_string(&mut self, quote: char, start: usize) -> Token {
        self.advance(); // opening quote

        let mut value = String::new();

        while !self.is_at_end() && self.current_char() != quote {
            let ch = self.current_char();
            if ch == '\n' && quote != '`' {
                break;
            }
            if ch == '\\' {
                self.advance();
                if self.is_at_end() {
                    break;
                }
                match self.current_char() {
                    'n' => value.push('\n'),
                    't' => value.push('\t'),
                    'r' => value.push('\r'),
                    '\\' => value.push('\\'),
                    '\'' => value.push('\''),
                    '"' => value.push('"'),
                    '`' => value.push('`'),
                    '/' => value.push('/'),
                    other => {
                        value.push('\\');
                        value.push(other);
                    }
                }
            } else {
                value.push(ch);
            }
            self.advance();
        }

        if !self.is_at_end() && self.current_char() == quote {
            self.advance();
            Token::new(TokenKind::String(value), start..self.pos)
        } else {
            Token::new(TokenKind::UnterminatedString(value), start..self.pos)
        }
    }

    /// Integer, decimal, or exponent form.
    fn scan_number(&mut self, start: usize) -> Token {
        let mut value = String::new();

        while !self.is_at_end() && self.current_char().is_ascii_digit() {
            value.push(self.current_char());
            self.advance();
        }

        if self.current_char() == '.' && self.peek_char().is_ascii_digit() {
            value.push('.');
            self.advance();
            while !self.is_at_end() && self.current_char().is_ascii_digit() {
                value.push(self.current_char());
                self.advance();
            }
        }

        if matches!(self.current_char(), 'e' | 'E') {
            let sign = self.peek_char();
            let has_sign = sign == '+' || sign == '-';
            let digit_at = if has_sign { self.pos + 2 } else { self.pos + 1 };
            if self.input.get(digit_at).is_some_and(|c| c.is_ascii_digit()) {
                value.push('e');
                self.advance();
                if has_sign {
                    value.push(sign);
                    self.advance();
                }
                while !self.is_at_end() && self.current_char().is_ascii_digit() {
                    value.push(self.current_char());
                    self.advance();
                }
            }
        }

        Token::new(TokenKind::Number(value), start..self.pos)
    }

    fn scan_identifier(&mut self, start: usize) -> Token {
        let mut value = String::new();

        while !self.is_at_end() {
            let ch = self.current_char();
            if ch.is_alphanumeric() || ch == '_' || ch == '$' {
                value.push(ch);
                self.advance();
            } else {
                break;
            }
        }

        Token::new(TokenKind::Ident(value), start..self.pos)
    }

    /// Skip whitespace and `//` / `/* */` comments.
    fn skip_trivia(&mut self) {
        loop {
            while !self.is_at_end() && self.current_char().is_whitespace() {
                self.advance();
            }
            if self.current_char() == '/' && self.peek_char() == '/' {
                while !self.is_at_end() && self.current_char() != '\n' {
                    self.advance();
                }
            } else if self.current_char() == '/' && self.peek_char() == '*' {
                self.advance();
                self.advance();
                while !self.is_at_end() && !(self.current_char() == '*' && self.peek_char() == '/')
                {
                    self.advance();
                }
                self.advance();
                self.advance();
            } else {
                break;
            }
        }
    }

    fn current_char(&self) -> char {
        self.input.get(self.pos).copied().unwrap_or('\0')
    }

    fn peek_char(&self) -> char {
        self.input.get(self.pos + 1).copied().unwrap_or('\0')
    }

    fn advance(&mut self) {
        if !self.is_at_end() {
            self.pos += 1;
        }
    }

    fn is_at_end(&self) -> bool {
        self.pos >= self.input.len()
    }
}
