//! Query text analysis
//!
//! Everything that looks at the text in the query editor without talking to
//! a server.
//!
//! # Architecture
//!
//! - `lexer`: error-tolerant tokenizer with character spans
//! - `ast` / `parser`: expression tree for filters and shell output
//! - `converter`: expression tree to BSON, including shell constructors
//! - `classifier`: Simple (find-style) vs. Complex (script) queries
//! - `guard`: write detection for read-only views
//!
//! # Examples
//!
//! ```
//! use mongolens::query::{QueryClassifier, QueryKind};
//!
//! let kind = QueryClassifier::classify("db.users.find({ age: { $gt: 18 } })");
//! assert!(kind.is_simple());
//!
//! let kind = QueryClassifier::classify("db.users.aggregate([])");
//! assert_eq!(kind, QueryKind::Complex);
//! ```

pub mod ast;
pub mod classifier;
pub mod converter;
pub mod guard;
pub mod lexer;
pub mod parser;

pub use classifier::{FindQuery, QueryClassifier, QueryKind, is_trivial_filter};
pub use converter::ExpressionConverter;
pub use guard::check_read_only;
pub use parser::Parser;
