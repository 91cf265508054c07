//! Query classification
//!
//! Decides whether editor text is a single find-style statement that can run
//! through the structured driver path (`Simple`) or needs the script path
//! (`Complex`). Simple queries keep the character spans of their arguments so
//! the text can be rewritten around an automatic projection.

use mongodb::bson::{Bson, Document};
use tracing::debug;

use super::ast::{CallExpr, Expr, MemberExpr, MemberProperty, Span, Spanned};
use super::converter::ExpressionConverter;
use super::parser::Parser;
use crate::utils::string;

/// Result of classifying query text
#[derive(Debug, Clone, PartialEq)]
pub enum QueryKind {
    /// Single find-style statement
    Simple(FindQuery),
    /// Anything that needs full script execution
    Complex,
}

impl QueryKind {
    pub fn is_simple(&self) -> bool {
        matches!(self, QueryKind::Simple(_))
    }

    pub fn as_simple(&self) -> Option<&FindQuery> {
        match self {
            QueryKind::Simple(find) => Some(find),
            QueryKind::Complex => None,
        }
    }
}

/// A find-style query derived from editor text
#[derive(Debug, Clone, PartialEq)]
pub struct FindQuery {
    /// Collection named in the text; `None` for a bare filter object
    pub collection: Option<String>,
    pub filter: Document,
    pub projection: Option<Document>,
    pub sort: Option<Document>,
    pub filter_span: Option<Span>,
    pub projection_span: Option<Span>,
    pub sort_span: Option<Span>,
    source: String,
}

impl FindQuery {
    /// Source text of the filter argument, `{}` when absent
    pub fn filter_text(&self) -> String {
        match &self.filter_span {
            Some(span) => slice_chars(&self.source, span),
            None => "{}".to_string(),
        }
    }

    /// Source text of the projection argument
    pub fn projection_text(&self) -> Option<String> {
        self.projection_span
            .as_ref()
            .map(|span| slice_chars(&self.source, span))
    }

    /// Source text of the sort argument
    pub fn sort_text(&self) -> Option<String> {
        self.sort_span
            .as_ref()
            .map(|span| slice_chars(&self.source, span))
    }

    /// Whether the text carries a projection argument
    pub fn has_projection(&self) -> bool {
        self.projection.is_some()
    }

    /// Rewrite the query text with `projection` embedded as the second find argument
    ///
    /// # Arguments
    /// * `default_collection` - Collection used when the text is a bare filter
    /// * `projection` - Projection to embed
    ///
    /// # Returns
    /// * `String` - `db.<coll>.find(<filter>, <projection>)`, keeping any sort
    pub fn with_projection(&self, default_collection: &str, projection: &Document) -> String {
        self.render(default_collection, Some(&projection_to_shell(projection)))
    }

    /// Rewrite the query text without any projection argument
    pub fn without_projection(&self, default_collection: &str) -> String {
        self.render(default_collection, None)
    }

    fn render(&self, default_collection: &str, projection: Option<&str>) -> String {
        let collection = self.collection.as_deref().unwrap_or(default_collection);
        let mut text = format!("{}.find({}", collection_ref(collection), self.filter_text());
        if let Some(projection) = projection {
            text.push_str(", ");
            text.push_str(projection);
        }
        text.push(')');
        if let Some(sort) = self.sort_text() {
            text.push_str(".sort(");
            text.push_str(&sort);
            text.push(')');
        }
        text
    }
}

/// Stateless classifier for query text
pub struct QueryClassifier;

impl QueryClassifier {
    /// Classify raw editor text
    ///
    /// # Arguments
    /// * `text` - Raw query text
    ///
    /// # Returns
    /// * `QueryKind` - `Simple` for a single find-style statement, else `Complex`
    pub fn classify(text: &str) -> QueryKind {
        if text.trim().is_empty() {
            return QueryKind::Simple(FindQuery {
                collection: None,
                filter: Document::new(),
                projection: None,
                sort: None,
                filter_span: None,
                projection_span: None,
                sort_span: None,
                source: text.to_string(),
            });
        }

        let statement = match Parser::parse_statement(text) {
            Ok(statement) => statement,
            Err(e) => {
                debug!("Query is not a single expression: {}", e);
                return QueryKind::Complex;
            }
        };

        match Self::find_from_statement(&statement, text) {
            Some(find) => QueryKind::Simple(find),
            None => QueryKind::Complex,
        }
    }

    fn find_from_statement(statement: &Spanned, source: &str) -> Option<FindQuery> {
        match &statement.expr {
            Expr::Object(obj) => Some(FindQuery {
                collection: None,
                filter: ExpressionConverter::object_to_bson(obj).ok()?,
                projection: None,
                sort: None,
                filter_span: Some(statement.span.clone()),
                projection_span: None,
                sort_span: None,
                source: source.to_string(),
            }),
            Expr::Call(call) => {
                let (find_call, sort_arg) = match method_call(call) {
                    Some((inner, "sort")) => {
                        let Expr::Call(find_call) = inner else {
                            return None;
                        };
                        let [sort] = call.arguments.as_slice() else {
                            return None;
                        };
                        (find_call.as_ref(), Some(sort))
                    }
                    Some((_, "find")) => (call.as_ref(), None),
                    _ => return None,
                };

                let (target, "find") = method_call(find_call)? else {
                    return None;
                };
                let collection = collection_name(target)?;

                let mut find = FindQuery {
                    collection: Some(collection),
                    filter: Document::new(),
                    projection: None,
                    sort: None,
                    filter_span: None,
                    projection_span: None,
                    sort_span: None,
                    source: source.to_string(),
                };

                match find_call.arguments.as_slice() {
                    [] => {}
                    [filter] => {
                        find.filter = document_argument(filter)?;
                        find.filter_span = Some(filter.span.clone());
                    }
                    [filter, projection] => {
                        find.filter = document_argument(filter)?;
                        find.filter_span = Some(filter.span.clone());
                        find.projection = Some(document_argument(projection)?);
                        find.projection_span = Some(projection.span.clone());
                    }
                    _ => return None,
                }

                if let Some(sort) = sort_arg {
                    find.sort = Some(document_argument(sort)?);
                    find.sort_span = Some(sort.span.clone());
                }

                Some(find)
            }
            _ => None,
        }
    }
}

/// Split `<target>.<method>(...)` into target and method name
pub(crate) fn method_call(call: &CallExpr) -> Option<(&Expr, &str)> {
    let Expr::Member(member) = &call.callee else {
        return None;
    };
    let MemberExpr {
        object, property, ..
    } = member.as_ref();
    let MemberProperty::Ident(method) = property else {
        return None;
    };
    Some((object, method.as_str()))
}

/// Collection name from `db.<coll>`, `db["coll"]` or `db.getCollection("coll")`
fn collection_name(target: &Expr) -> Option<String> {
    match target {
        Expr::Member(member) if member.object.as_ident() == Some("db") => {
            member.property.name().map(str::to_string)
        }
        Expr::Call(call) => {
            let (db, "getCollection") = method_call(call)? else {
                return None;
            };
            if db.as_ident() != Some("db") {
                return None;
            }
            match call.arguments.as_slice() {
                [Spanned {
                    expr: Expr::String(name),
                    ..
                }] => Some(name.clone()),
                _ => None,
            }
        }
        _ => None,
    }
}

fn document_argument(argument: &Spanned) -> Option<Document> {
    match &argument.expr {
        Expr::Object(_) => ExpressionConverter::expr_to_document(&argument.expr).ok(),
        _ => None,
    }
}

/// Whether filter text is empty or `{}`
pub fn is_trivial_filter(text: &str) -> bool {
    let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    compact.is_empty() || compact == "{}"
}

/// Shell reference to a collection: `db.name` or `db.getCollection("name")`
pub fn collection_ref(collection: &str) -> String {
    if string::is_valid_identifier(collection) {
        format!("db.{collection}")
    } else {
        format!("db.getCollection({})", string::quote(collection))
    }
}

/// Render a projection document in shell style: `{ name: 1, "a.b": 1 }`
pub fn projection_to_shell(projection: &Document) -> String {
    if projection.is_empty() {
        return "{}".to_string();
    }
    let fields: Vec<String> = projection
        .iter()
        .map(|(key, value)| {
            let key = if string::is_valid_identifier(key) {
                key.clone()
            } else {
                string::quote(key)
            };
            let value = match value {
                Bson::Int32(n) => n.to_string(),
                Bson::Int64(n) => n.to_string(),
                Bson::Boolean(b) => b.to_string(),
                other => other.clone().into_relaxed_extjson().to_string(),
            };
            format!("{key}: {value}")
        })
        .collect();
    format!("{{ {} }}", fields.join(", "))
}

fn slice_chars(text: &str, span: &Span) -> String {
    text.chars()
        .skip(span.start)
        .take(span.end.saturating_sub(span.start))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use mongodb::bson::doc;

    fn simple(text: &str) -> FindQuery {
        match QueryClassifier::classify(text) {
            QueryKind::Simple(find) => find,
            QueryKind::Complex => panic!("Expected simple query for {text:?}"),
        }
    }

    #[test]
    fn test_bare_filter_is_simple() {
        let find = simple("{ age: { $gt: 18 } }");
        assert_eq!(find.collection, None);
        assert_eq!(find.filter, doc! { "age": { "$gt": 18 } });
        assert_eq!(find.filter_text(), "{ age: { $gt: 18 } }");
    }

    #[test]
    fn test_empty_text_is_simple_with_empty_filter() {
        let find = simple("   ");
        assert!(find.filter.is_empty());
        assert!(is_trivial_filter(&find.filter_text()));
    }

    #[test]
    fn test_find_forms() {
        let find = simple("db.users.find({ name: 'a' }, { name: 1 });");
        assert_eq!(find.collection.as_deref(), Some("users"));
        assert_eq!(find.projection, Some(doc! { "name": 1 }));
        assert_eq!(find.projection_text().as_deref(), Some("{ name: 1 }"));

        let find = simple("db.getCollection('my-logs').find()");
        assert_eq!(find.collection.as_deref(), Some("my-logs"));
        assert!(find.filter.is_empty());

        let find = simple("db['order items'].find({})");
        assert_eq!(find.collection.as_deref(), Some("order items"));
    }

    #[test]
    fn test_find_with_sort() {
        let find = simple("db.users.find({ a: 1 }).sort({ createdAt: -1 })");
        assert_eq!(find.sort, Some(doc! { "createdAt": -1 }));
        assert_eq!(find.sort_text().as_deref(), Some("{ createdAt: -1 }"));
    }

    #[test]
    fn test_shell_constructors_in_filter() {
        let find = simple("db.users.find({ _id: ObjectId('507f1f77bcf86cd799439011') })");
        assert!(matches!(find.filter.get("_id"), Some(Bson::ObjectId(_))));
    }

    #[test]
    fn test_complex_queries() {
        for text in [
            "db.users.aggregate([{ $match: {} }])",
            "db.users.find({}).limit(5)",
            "db.users.find({}).sort({a: 1}).sort({b: 1})",
            "db.users.find(filter)",
            "db.users.find({}, {}, {})",
            "db.users.countDocuments()",
            "{a: 1}; {b: 2}",
            "const x = 1",
            "show collections",
            "other.users.find({})",
            "db.users.find({ a: 1 ",
        ] {
            assert_eq!(QueryClassifier::classify(text), QueryKind::Complex, "{text}");
        }
    }

    #[test]
    fn test_with_projection_rewrites_bare_filter() {
        let find = simple("{ status: 'active' }");
        let rewritten = find.with_projection("users", &doc! { "name": 1, "address.city": 1 });
        assert_eq!(
            rewritten,
            r#"db.users.find({ status: 'active' }, { name: 1, "address.city": 1 })"#
        );
        let reclassified = simple(&rewritten);
        assert_eq!(
            reclassified.projection,
            Some(doc! { "name": 1, "address.city": 1 })
        );
    }

    #[test]
    fn test_rewrite_keeps_sort_and_quotes_collection() {
        let find = simple("db.getCollection('my-logs').find({}).sort({ ts: -1 })");
        let rewritten = find.with_projection("ignored", &doc! { "level": 1 });
        assert_eq!(
            rewritten,
            r#"db.getCollection("my-logs").find({}, { level: 1 }).sort({ ts: -1 })"#
        );
        let stripped = simple(&rewritten).without_projection("ignored");
        assert_eq!(
            stripped,
            r#"db.getCollection("my-logs").find({}).sort({ ts: -1 })"#
        );
    }

    #[test]
    fn test_trivial_filter() {
        assert!(is_trivial_filter(""));
        assert!(is_trivial_filter(" { } "));
        assert!(!is_trivial_filter("{ a: 1 }"));
    }
}
