//! AST for shell-style expressions
//!
//! Covers the literal subset needed for filters, projections and shell
//! output: objects, arrays, scalars, constructor calls and member chains.
//! Spans are character offsets into the source text.

use std::ops::Range;

/// Span information for source locations
pub type Span = Range<usize>;

/// Root expression type
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Object literal: { key: value, ... }
    Object(ObjectExpr),
    /// Array literal: [1, 2, 3]
    Array(ArrayExpr),
    /// String literal: "hello" or 'world'
    String(String),
    /// Number literal, raw text: 42 or 3.14
    Number(String),
    /// Boolean literal: true or false
    Boolean(bool),
    /// Null literal
    Null,
    /// Identifier: variable name
    Ident(String),
    /// Member expression: obj.prop
    Member(Box<MemberExpr>),
    /// Call expression: fn(args)
    Call(Box<CallExpr>),
    /// New expression: new Ctor(args)
    New(Box<NewExpr>),
    /// Unary expression: -x, +x, !x
    Unary(Box<UnaryExpr>),
}

/// Expression together with its source range
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    pub expr: Expr,
    pub span: Span,
}

/// Object expression: { key: value, ... }
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectExpr {
    pub properties: Vec<Property>,
    pub span: Span,
}

impl ObjectExpr {
    pub fn new(properties: Vec<Property>, span: Span) -> Self {
        Self { properties, span }
    }
}

/// Object property: key: value
#[derive(Debug, Clone, PartialEq)]
pub struct Property {
    pub key: PropertyKey,
    pub value: Expr,
    /// Range of the key alone, used to place field diagnostics
    pub key_span: Span,
    pub span: Span,
}

impl Property {
    pub fn new(key: PropertyKey, value: Expr, key_span: Span, span: Span) -> Self {
        Self {
            key,
            value,
            key_span,
            span,
        }
    }
}

/// Property key (can be identifier, string, or number)
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyKey {
    Ident(String),
    String(String),
    Number(String),
}

impl PropertyKey {
    pub fn as_str(&self) -> &str {
        match self {
            PropertyKey::Ident(s) | PropertyKey::String(s) | PropertyKey::Number(s) => s,
        }
    }
}

/// Array expression: [1, 2, 3]
#[derive(Debug, Clone, PartialEq)]
pub struct ArrayExpr {
    pub elements: Vec<Expr>,
    pub span: Span,
}

impl ArrayExpr {
    pub fn new(elements: Vec<Expr>, span: Span) -> Self {
        Self { elements, span }
    }
}

/// Member expression: obj.prop or obj[expr]
#[derive(Debug, Clone, PartialEq)]
pub struct MemberExpr {
    pub object: Expr,
    pub property: MemberProperty,
    pub span: Span,
}

/// Member property (static or computed)
#[derive(Debug, Clone, PartialEq)]
pub enum MemberProperty {
    /// Static: obj.prop
    Ident(String),
    /// Computed: obj[expr]
    Computed(Expr),
}

impl MemberProperty {
    /// Name of a static property or a computed string key
    pub fn name(&self) -> Option<&str> {
        match self {
            MemberProperty::Ident(name) => Some(name),
            MemberProperty::Computed(Expr::String(name)) => Some(name),
            MemberProperty::Computed(_) => None,
        }
    }
}

/// Call expression: fn(arg1, arg2, ...)
#[derive(Debug, Clone, PartialEq)]
pub struct CallExpr {
    pub callee: Expr,
    pub arguments: Vec<Spanned>,
    pub span: Span,
}

/// New expression: new Ctor(arg1, arg2, ...)
#[derive(Debug, Clone, PartialEq)]
pub struct NewExpr {
    pub callee: Expr,
    pub arguments: Vec<Spanned>,
    pub span: Span,
}

/// Unary expression: -x, +x, !x
#[derive(Debug, Clone, PartialEq)]
pub struct UnaryExpr {
    pub operator: UnaryOperator,
    pub argument: Expr,
    pub span: Span,
}

/// Unary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOperator {
    Minus,
    Plus,
    Not,
}

impl Expr {
    /// Identifier name, if this is a bare identifier
    pub fn as_ident(&self) -> Option<&str> {
        match self {
            Expr::Ident(name) => Some(name),
            _ => None,
        }
    }

    /// Source range when the node records one
    pub fn span(&self) -> Option<Span> {
        match self {
            Expr::Object(obj) => Some(obj.span.clone()),
            Expr::Array(arr) => Some(arr.span.clone()),
            Expr::Member(member) => Some(member.span.clone()),
            Expr::Call(call) => Some(call.span.clone()),
            Expr::New(new_expr) => Some(new_expr.span.clone()),
            Expr::Unary(unary) => Some(unary.span.clone()),
            _ => None,
        }
    }
}
