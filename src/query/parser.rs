//! Recursive-descent parser for shell expressions
//!
//! Handles the expression subset that filters, projections and printed shell
//! results use: literals, objects, arrays, member chains, calls, `new` and
//! unary operators. Full JavaScript statements are out of reach on purpose;
//! anything the parser rejects goes down the script path instead.

use super::ast::*;
use super::lexer::{Lexer, Token, TokenKind};
use crate::error::ParseError;

pub type ParseResult<T> = std::result::Result<T, ParseError>;

/// Shell expression parser
pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    /// Create a new parser from input string
    pub fn new(input: &str) -> Self {
        Self {
            tokens: Lexer::tokenize(input),
            pos: 0,
        }
    }

    /// Parse a single expression
    pub fn parse(input: &str) -> ParseResult<Expr> {
        Self::parse_statement(input).map(|spanned| spanned.expr)
    }

    /// Parse exactly one statement: an expression, optional `;`, then end of input
    pub fn parse_statement(input: &str) -> ParseResult<Spanned> {
        let mut parser = Self::new(input);
        let spanned = parser.parse_spanned()?;
        while parser.match_token(&TokenKind::Semicolon) {}
        parser.expect_eof()?;
        Ok(spanned)
    }

    /// Parse a whitespace-separated sequence of expressions, as printed by a shell
    pub fn parse_sequence(input: &str) -> ParseResult<Vec<Spanned>> {
        let mut parser = Self::new(input);
        let mut values = Vec::new();
        while !parser.check(&TokenKind::Eof) {
            values.push(parser.parse_spanned()?);
            while parser.match_token(&TokenKind::Semicolon) {}
        }
        Ok(values)
    }

    fn parse_spanned(&mut self) -> ParseResult<Spanned> {
        let start = self.current_pos();
        let expr = self.parse_expression()?;
        let end = self.previous_pos();
        Ok(Spanned {
            expr,
            span: start..end,
        })
    }

    fn parse_expression(&mut self) -> ParseResult<Expr> {
        self.parse_unary()
    }

    /// Parse unary expression: -x, +x, !x
    fn parse_unary(&mut self) -> ParseResult<Expr> {
        let start = self.current_pos();

        let operator = if self.match_token(&TokenKind::Minus) {
            Some(UnaryOperator::Minus)
        } else if self.match_token(&TokenKind::Plus) {
            Some(UnaryOperator::Plus)
        } else if self.match_token(&TokenKind::Bang) {
            Some(UnaryOperator::Not)
        } else {
            None
        };

        match operator {
            Some(operator) => {
                let argument = self.parse_unary()?;
                let end = self.previous_pos();
                Ok(Expr::Unary(Box::new(UnaryExpr {
                    operator,
                    argument,
                    span: start..end,
                })))
            }
            None => self.parse_member_or_call(),
        }
    }

    /// Parse member expression, call expression, or new expression
    fn parse_member_or_call(&mut self) -> ParseResult<Expr> {
        let start = self.current_pos();

        if matches!(self.current_kind(), TokenKind::Ident(name) if name == "new") {
            self.advance();
            return self.parse_new_expression(start);
        }

        let mut expr = self.parse_primary()?;

        loop {
            if self.match_token(&TokenKind::Dot) {
                let prop_name = self.expect_identifier("Expected property name after '.'")?;
                let end = self.previous_pos();
                expr = Expr::Member(Box::new(MemberExpr {
                    object: expr,
                    property: MemberProperty::Ident(prop_name),
                    span: start..end,
                }));
            } else if self.match_token(&TokenKind::LBracket) {
                let property = self.parse_expression()?;
                self.expect_token(&TokenKind::RBracket, "Expected ']' after computed member")?;
                let end = self.previous_pos();
                expr = Expr::Member(Box::new(MemberExpr {
                    object: expr,
                    property: MemberProperty::Computed(property),
                    span: start..end,
                }));
            } else if self.match_token(&TokenKind::LParen) {
                let arguments = self.parse_arguments()?;
                self.expect_token(&TokenKind::RParen, "Expected ')' after arguments")?;
                let end = self.previous_pos();
                expr = Expr::Call(Box::new(CallExpr {
                    callee: expr,
                    arguments,
                    span: start..end,
                }));
            } else {
                break;
            }
        }

        Ok(expr)
    }

    /// Parse new expression: new Ctor(args)
    fn parse_new_expression(&mut self, start: usize) -> ParseResult<Expr> {
        let callee = self.parse_primary()?;

        let arguments = if self.match_token(&TokenKind::LParen) {
            let args = self.parse_arguments()?;
            self.expect_token(&TokenKind::RParen, "Expected ')' after new arguments")?;
            args
        } else {
            vec![]
        };

        let end = self.previous_pos();
        Ok(Expr::New(Box::new(NewExpr {
            callee,
            arguments,
            span: start..end,
        })))
    }

    /// Parse primary expression (literals, identifiers, objects, arrays)
    fn parse_primary(&mut self) -> ParseResult<Expr> {
        let start = self.current_pos();

        match self.current_kind().clone() {
            TokenKind::String(s) => {
                self.advance();
                Ok(Expr::String(s))
            }
            TokenKind::Number(n) => {
                self.advance();
                Ok(Expr::Number(n))
            }
            TokenKind::Ident(name) => {
                self.advance();
                Ok(match name.as_str() {
                    "true" => Expr::Boolean(true),
                    "false" => Expr::Boolean(false),
                    "null" | "undefined" => Expr::Null,
                    _ => Expr::Ident(name),
                })
            }
            TokenKind::LBrace => self.parse_object(start),
            TokenKind::LBracket => self.parse_array(start),
            TokenKind::LParen => {
                self.advance();
                let expr = self.parse_expression()?;
                self.expect_token(&TokenKind::RParen, "Expected ')' after expression")?;
                Ok(expr)
            }
            TokenKind::UnterminatedString(_) => Err(self.error_here("Unterminated string literal")),
            TokenKind::Eof => Err(self.error_here("Unexpected end of input")),
            TokenKind::Unknown(ch) => Err(self.error_here(format!("Unexpected character '{ch}'"))),
            _ => Err(self.error_here(format!("Unexpected token {}", self.describe_current()))),
        }
    }

    /// Parse object literal: { key: value, ... }
    fn parse_object(&mut self, start: usize) -> ParseResult<Expr> {
        self.expect_token(&TokenKind::LBrace, "Expected '{'")?;

        let mut properties = Vec::new();

        if self.match_token(&TokenKind::RBrace) {
            let end = self.previous_pos();
            return Ok(Expr::Object(ObjectExpr::new(properties, start..end)));
        }

        loop {
            let prop_start = self.current_pos();
            let key = self.parse_property_key()?;
            let key_span = prop_start..self.previous_pos();

            self.expect_token(&TokenKind::Colon, "Expected ':' after property key")?;

            let value = self.parse_expression()?;

            let prop_end = self.previous_pos();
            properties.push(Property::new(key, value, key_span, prop_start..prop_end));

            if self.match_token(&TokenKind::Comma) {
                // Allow trailing comma
                if self.check(&TokenKind::RBrace) {
                    break;
                }
                continue;
            } else if self.check(&TokenKind::RBrace) {
                break;
            } else {
                return Err(self.error_here("Expected ',' or '}' after property"));
            }
        }

        self.expect_token(&TokenKind::RBrace, "Expected '}'")?;
        let end = self.previous_pos();

        Ok(Expr::Object(ObjectExpr::new(properties, start..end)))
    }

    /// Parse property key (identifier, string, or number)
    fn parse_property_key(&mut self) -> ParseResult<PropertyKey> {
        let key = match self.current_kind() {
            TokenKind::Ident(name) => PropertyKey::Ident(name.clone()),
            TokenKind::String(s) => PropertyKey::String(s.clone()),
            TokenKind::Number(n) => PropertyKey::Number(n.clone()),
            _ => {
                return Err(
                    self.error_here("Expected property key (identifier, string, or number)")
                );
            }
        };
        self.advance();
        Ok(key)
    }

    /// Parse array literal: [elem1, elem2, ...]
    fn parse_array(&mut self, start: usize) -> ParseResult<Expr> {
        self.expect_token(&TokenKind::LBracket, "Expected '['")?;

        let mut elements = Vec::new();

        if self.match_token(&TokenKind::RBracket) {
            let end = self.previous_pos();
            return Ok(Expr::Array(ArrayExpr::new(elements, start..end)));
        }

        loop {
            elements.push(self.parse_expression()?);

            if self.match_token(&TokenKind::Comma) {
                if self.check(&TokenKind::RBracket) {
                    break;
                }
                continue;
            } else if self.check(&TokenKind::RBracket) {
                break;
            } else {
                return Err(self.error_here("Expected ',' or ']' after array element"));
            }
        }

        self.expect_token(&TokenKind::RBracket, "Expected ']'")?;
        let end = self.previous_pos();

        Ok(Expr::Array(ArrayExpr::new(elements, start..end)))
    }

    /// Parse function arguments: arg1, arg2, ...
    fn parse_arguments(&mut self) -> ParseResult<Vec<Spanned>> {
        let mut arguments = Vec::new();

        if self.check(&TokenKind::RParen) {
            return Ok(arguments);
        }

        loop {
            arguments.push(self.parse_spanned()?);

            if self.match_token(&TokenKind::Comma) {
                if self.check(&TokenKind::RParen) {
                    break;
                }
                continue;
            } else {
                break;
            }
        }

        Ok(arguments)
    }

    // Token manipulation methods

    fn current(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn current_kind(&self) -> &TokenKind {
        self.current().map(|t| &t.kind).unwrap_or(&TokenKind::Eof)
    }

    fn check(&self, kind: &TokenKind) -> bool {
        std::mem::discriminant(self.current_kind()) == std::mem::discriminant(kind)
    }

    fn match_token(&mut self, kind: &TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn advance(&mut self) {
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
    }

    fn expect_token(&mut self, kind: &TokenKind, message: &str) -> ParseResult<()> {
        if self.match_token(kind) {
            Ok(())
        } else {
            Err(self.error_here(message))
        }
    }

    fn expect_identifier(&mut self, message: &str) -> ParseResult<String> {
        match self.current_kind() {
            TokenKind::Ident(name) => {
                let name = name.clone();
                self.advance();
                Ok(name)
            }
            _ => Err(self.error_here(message)),
        }
    }

    fn expect_eof(&self) -> ParseResult<()> {
        if self.check(&TokenKind::Eof) {
            Ok(())
        } else {
            Err(self.error_here(format!(
                "Unexpected {} after end of expression",
                self.describe_current()
            )))
        }
    }

    fn error_here(&self, message: impl Into<String>) -> ParseError {
        let span = match self.current() {
            Some(token) if token.span.is_empty() => token.span.start..token.span.start + 1,
            Some(token) => token.span.clone(),
            None => {
                let end = self.previous_pos();
                end..end + 1
            }
        };
        ParseError::syntax(message, span)
    }

    fn describe_current(&self) -> String {
        match self.current_kind() {
            TokenKind::Ident(name) => format!("identifier '{name}'"),
            TokenKind::String(_) => "string".to_string(),
            TokenKind::Number(n) => format!("number {n}"),
            TokenKind::Operator(c) | TokenKind::Unknown(c) => format!("'{c}'"),
            TokenKind::Eof => "end of input".to_string(),
            other => format!("{other:?}"),
        }
    }

    fn current_pos(&self) -> usize {
        if let Some(token) = self.current() {
            token.span.start
        } else if let Some(last) = self.tokens.last() {
            last.span.end
        } else {
            0
        }
    }

    fn previous_pos(&self) -> usize {
        if self.pos > 0
            && let Some(token) = self.tokens.get(self.pos - 1)
        {
            return token.span.end;
        }
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_scalars() {
        assert!(matches!(Parser::parse("'hello'").unwrap(), Expr::String(s) if s == "hello"));
        assert!(matches!(Parser::parse("42").unwrap(), Expr::Number(n) if n == "42"));
        assert!(matches!(Parser::parse("true").unwrap(), Expr::Boolean(true)));
        assert!(matches!(Parser::parse("undefined").unwrap(), Expr::Null));
    }

    #[test]
    fn test_parse_simple_object() {
        match Parser::parse("{name: 'John', age: 30}").unwrap() {
            Expr::Object(obj) => {
                assert_eq!(obj.properties.len(), 2);
                assert_eq!(obj.properties[0].key.as_str(), "name");
                assert_eq!(obj.properties[0].key_span, 1..5);
                assert_eq!(obj.properties[1].key.as_str(), "age");
                assert_eq!(obj.span, 0..23);
            }
            other => panic!("Expected object expression, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_trailing_commas() {
        assert!(Parser::parse("{a: [1, 2,], }").is_ok());
    }

    #[test]
    fn test_parse_chained_call() {
        match Parser::parse("db.users.find({}).sort({a: 1})").unwrap() {
            Expr::Call(call) => match call.callee {
                Expr::Member(member) => {
                    assert_eq!(member.property.name(), Some("sort"));
                    assert!(matches!(member.object, Expr::Call(_)));
                }
                other => panic!("Expected member callee, got {other:?}"),
            },
            other => panic!("Expected call expression, got {other:?}"),
        }
    }

    #[test]
    fn test_argument_spans() {
        let input = "db.c.find({a: 1}, {b: 1})";
        match Parser::parse(input).unwrap() {
            Expr::Call(call) => {
                assert_eq!(call.arguments.len(), 2);
                assert_eq!(call.arguments[0].span, 10..16);
                assert_eq!(call.arguments[1].span, 18..24);
            }
            other => panic!("Expected call expression, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_new_and_unary() {
        assert!(matches!(Parser::parse("new Date()").unwrap(), Expr::New(_)));
        match Parser::parse("-5").unwrap() {
            Expr::Unary(unary) => assert_eq!(unary.operator, UnaryOperator::Minus),
            other => panic!("Expected unary, got {other:?}"),
        }
    }

    #[test]
    fn test_statement_rejects_trailing_tokens() {
        let err = Parser::parse_statement("{a: 1} {b: 2}").unwrap_err();
        assert_eq!(err.span(), Some(7..8));
        assert!(Parser::parse_statement("{a: 1};").is_ok());
    }

    #[test]
    fn test_error_points_at_offending_token() {
        let err = Parser::parse_statement("{a: 1 b: 2}").unwrap_err();
        assert!(err.to_string().contains("Expected ',' or '}'"));
        assert_eq!(err.span(), Some(6..7));
    }

    #[test]
    fn test_error_at_end_of_input() {
        let err = Parser::parse_statement("{a: ").unwrap_err();
        assert!(err.to_string().contains("end of input"));
        assert_eq!(err.span(), Some(4..5));
    }

    #[test]
    fn test_parse_sequence() {
        let values = Parser::parse_sequence("{a: 1}\n{b: 2}\n").unwrap();
        assert_eq!(values.len(), 2);
        assert!(Parser::parse_sequence("").unwrap().is_empty());
        assert!(Parser::parse_sequence("{a: 1} }").is_err());
    }
}
