//! Live diagnostics for the query editor
//!
//! Two independent checks feed one ordered list:
//! - syntax: delimiter balance, unterminated strings and, for filter-shaped
//!   text, parser errors and stray characters
//! - fields: filter keys that never appeared in the collection's observed
//!   schema (only when a schema is cached)
//!
//! [`debounce::ValidationDebouncer`] reruns the checks after the user stops
//! typing and publishes the result on a watch channel.

pub mod debounce;

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::ParseError;
use crate::query::ast::{Expr, ObjectExpr, Span};
use crate::query::classifier::method_call;
use crate::query::lexer::{Lexer, TokenKind};
use crate::query::{Parser, QueryClassifier};

pub use debounce::ValidationDebouncer;

/// Logical operators whose array elements are filters themselves
const LOGICAL_OPERATORS: &[&str] = &["$and", "$or", "$nor"];

/// Diagnostic severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    Error,
    Warning,
}

/// Which check produced a diagnostic
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DiagnosticSource {
    Syntax,
    Field,
}

/// Zero-based line and character column
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SourcePosition {
    pub line: usize,
    pub column: usize,
}

/// Range in the editor text
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SourceRange {
    pub start: SourcePosition,
    pub end: SourcePosition,
}

impl SourceRange {
    /// Convert a character span of `text` into line/column positions
    pub fn from_span(text: &str, span: &Span) -> Self {
        Self {
            start: position_at(text, span.start),
            end: position_at(text, span.end),
        }
    }
}

/// One editor diagnostic
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
    pub range: SourceRange,
    pub source: DiagnosticSource,
}

impl Diagnostic {
    fn syntax(text: &str, message: impl Into<String>, span: &Span) -> Self {
        Self {
            severity: Severity::Error,
            message: message.into(),
            range: SourceRange::from_span(text, span),
            source: DiagnosticSource::Syntax,
        }
    }
}

/// Stateless query validator
pub struct Validator;

impl Validator {
    /// All diagnostics for `text`, ordered by position
    ///
    /// # Arguments
    /// * `text` - Editor text
    /// * `known_fields` - Field paths of the cached schema, if any
    ///
    /// # Returns
    /// * `Vec<Diagnostic>` - Syntax and field diagnostics merged
    pub fn validate(text: &str, known_fields: Option<&BTreeSet<String>>) -> Vec<Diagnostic> {
        let mut diagnostics = Self::syntax_diagnostics(text);
        if let Some(known) = known_fields {
            diagnostics.extend(Self::field_diagnostics(text, known));
        }
        diagnostics.sort_by(|a, b| {
            a.range
                .start
                .cmp(&b.range.start)
                .then(a.source.cmp(&b.source))
                .then(a.range.end.cmp(&b.range.end))
        });
        diagnostics
    }

    /// Delimiter, string and (for filter-shaped text) parser diagnostics
    pub fn syntax_diagnostics(text: &str) -> Vec<Diagnostic> {
        let tokens = Lexer::tokenize(text);
        let mut diagnostics = Vec::new();
        let mut open: Vec<(char, Span)> = Vec::new();
        let filter_form = is_filter_form(text);

        for token in &tokens {
            match &token.kind {
                TokenKind::LBrace => open.push(('{', token.span.clone())),
                TokenKind::LBracket => open.push(('[', token.span.clone())),
                TokenKind::LParen => open.push(('(', token.span.clone())),
                TokenKind::RBrace | TokenKind::RBracket | TokenKind::RParen => {
                    let close = match token.kind {
                        TokenKind::RBrace => '}',
                        TokenKind::RBracket => ']',
                        _ => ')',
                    };
                    match open.pop() {
                        Some((opener, _)) if matching_close(opener) == close => {}
                        Some((opener, _)) => diagnostics.push(Diagnostic::syntax(
                            text,
                            format!("Expected '{}' but found '{}'", matching_close(opener), close),
                            &token.span,
                        )),
                        None => diagnostics.push(Diagnostic::syntax(
                            text,
                            format!("Unmatched '{close}'"),
                            &token.span,
                        )),
                    }
                }
                TokenKind::UnterminatedString(_) => diagnostics.push(Diagnostic::syntax(
                    text,
                    "Unterminated string literal",
                    &token.span,
                )),
                TokenKind::Unknown(ch) if filter_form => diagnostics.push(Diagnostic::syntax(
                    text,
                    format!("Unexpected character '{ch}'"),
                    &token.span,
                )),
                _ => {}
            }
        }

        for (opener, span) in open {
            diagnostics.push(Diagnostic::syntax(
                text,
                format!("Unclosed '{opener}'"),
                &span,
            ));
        }

        // Parser errors only add information when the cheaper checks found nothing
        if filter_form
            && diagnostics.is_empty()
            && let Err(ParseError::Syntax { message, span }) = Parser::parse_statement(text)
        {
            diagnostics.push(Diagnostic::syntax(text, message, &span));
        }

        diagnostics
    }

    /// Warnings for filter keys missing from `known_fields`
    ///
    /// Only Simple queries are checked. Keys inside `$and`, `$or` and `$nor`
    /// are checked too; operator values are not.
    pub fn field_diagnostics(text: &str, known_fields: &BTreeSet<String>) -> Vec<Diagnostic> {
        if !QueryClassifier::classify(text).is_simple() {
            return Vec::new();
        }
        let Ok(statement) = Parser::parse_statement(text) else {
            return Vec::new();
        };
        let Some(filter) = filter_object(&statement.expr) else {
            return Vec::new();
        };

        let mut diagnostics = Vec::new();
        check_filter_keys(text, filter, known_fields, &mut diagnostics);
        diagnostics
    }
}

/// Bare object or text containing a `find(` call
fn is_filter_form(text: &str) -> bool {
    text.trim_start().starts_with('{') || text.contains("find(")
}

fn matching_close(opener: char) -> char {
    match opener {
        '{' => '}',
        '[' => ']',
        _ => ')',
    }
}

/// Filter argument of a Simple statement
fn filter_object(expr: &Expr) -> Option<&ObjectExpr> {
    match expr {
        Expr::Object(obj) => Some(obj),
        Expr::Call(call) => {
            let call = match method_call(call)? {
                (Expr::Call(inner), "sort") => inner.as_ref(),
                (_, "find") => call.as_ref(),
                _ => return None,
            };
            match call.arguments.first().map(|arg| &arg.expr) {
                Some(Expr::Object(obj)) => Some(obj),
                _ => None,
            }
        }
        _ => None,
    }
}

fn check_filter_keys(
    text: &str,
    filter: &ObjectExpr,
    known: &BTreeSet<String>,
    diagnostics: &mut Vec<Diagnostic>,
) {
    for property in &filter.properties {
        let key = property.key.as_str();

        if key.starts_with('$') {
            if LOGICAL_OPERATORS.contains(&key)
                && let Expr::Array(branches) = &property.value
            {
                for branch in &branches.elements {
                    if let Expr::Object(obj) = branch {
                        check_filter_keys(text, obj, known, diagnostics);
                    }
                }
            }
            continue;
        }

        if !is_known_field(key, known) {
            diagnostics.push(Diagnostic {
                severity: Severity::Warning,
                message: format!("Field '{key}' does not appear in sampled documents"),
                range: SourceRange::from_span(text, &property.key_span),
                source: DiagnosticSource::Field,
            });
        }
    }
}

/// Known path, a prefix of a known path, or a path below a known leaf
fn is_known_field(path: &str, known: &BTreeSet<String>) -> bool {
    if known.contains(path) {
        return true;
    }

    let nested_prefix = format!("{path}.");
    if known.iter().any(|field| field.starts_with(&nested_prefix)) {
        return true;
    }

    // `tags.0` or `loc.coordinates` under a field whose children were never sampled
    let mut prefix_end = path.len();
    while let Some(dot) = path[..prefix_end].rfind('.') {
        let prefix = &path[..dot];
        if known.contains(prefix) {
            let child_prefix = format!("{prefix}.");
            return !known.iter().any(|field| field.starts_with(&child_prefix));
        }
        prefix_end = dot;
    }
    false
}

fn position_at(text: &str, offset: usize) -> SourcePosition {
    let mut line = 0;
    let mut column = 0;
    for ch in text.chars().take(offset) {
        if ch == '\n' {
            line += 1;
            column = 0;
        } else {
            column += 1;
        }
    }
    SourcePosition { line, column }
}
