//! Shell expression to BSON converter
//!
//! Turns parsed shell literals into BSON values. Understands the constructor
//! forms that appear both in hand-written filters and in printed shell output
//! (`ObjectId(...)`, `ISODate(...)`, `Long(...)`, `Timestamp({ t, i })`, ...).

use mongodb::bson::oid::ObjectId;
use mongodb::bson::spec::BinarySubtype;
use mongodb::bson::{Binary, Bson, DateTime, Document, Timestamp};

use super::ast::*;
use crate::error::{ParseError, Result};

/// Converter for shell expressions to BSON
pub struct ExpressionConverter;

impl ExpressionConverter {
    /// Convert an expression to a BSON value
    pub fn expr_to_bson(expr: &Expr) -> Result<Bson> {
        match expr {
            Expr::Object(obj) => Self::object_to_bson(obj).map(Bson::Document),
            Expr::Array(arr) => Self::array_to_bson(arr).map(Bson::Array),
            Expr::String(s) => Ok(Bson::String(s.clone())),
            Expr::Number(raw) => Self::number_to_bson(raw, false),
            Expr::Boolean(b) => Ok(Bson::Boolean(*b)),
            Expr::Null => Ok(Bson::Null),
            Expr::Ident(name) => Self::identifier_to_bson(name),
            Expr::Unary(unary) => Self::unary_to_bson(unary),
            Expr::New(new_expr) => Self::constructor_to_bson(&new_expr.callee, &new_expr.arguments),
            Expr::Call(call) => Self::constructor_to_bson(&call.callee, &call.arguments),
            Expr::Member(_) => Err(ParseError::InvalidQuery(
                "Member expressions not supported in BSON literals".to_string(),
            )
            .into()),
        }
    }

    /// Convert an object to a BSON document
    pub fn object_to_bson(obj: &ObjectExpr) -> Result<Document> {
        let mut doc = Document::new();

        for prop in &obj.properties {
            let value = Self::expr_to_bson(&prop.value)?;
            doc.insert(prop.key.as_str(), value);
        }

        Ok(doc)
    }

    /// Convert an array to a BSON array
    pub fn array_to_bson(arr: &ArrayExpr) -> Result<Vec<Bson>> {
        arr.elements.iter().map(Self::expr_to_bson).collect()
    }

    /// Convert an expression that must be a document
    pub fn expr_to_document(expr: &Expr) -> Result<Document> {
        match expr {
            Expr::Object(obj) => Self::object_to_bson(obj),
            _ => Err(ParseError::InvalidQuery("Expected a document".to_string()).into()),
        }
    }

    /// Number literal: Int32 when it fits, Int64 otherwise, Double for fractions
    fn number_to_bson(raw: &str, negate: bool) -> Result<Bson> {
        let is_float = raw.contains(['.', 'e', 'E']);

        if !is_float && let Ok(value) = raw.parse::<i64>() {
            let value = if negate { -value } else { value };
            return Ok(match i32::try_from(value) {
                Ok(small) => Bson::Int32(small),
                Err(_) => Bson::Int64(value),
            });
        }

        let value = raw
            .parse::<f64>()
            .map_err(|e| ParseError::InvalidQuery(format!("Invalid number '{raw}': {e}")))?;
        Ok(Bson::Double(if negate { -value } else { value }))
    }

    /// Convert identifier to BSON (e.g., Infinity, NaN)
    fn identifier_to_bson(name: &str) -> Result<Bson> {
        match name {
            "Infinity" => Ok(Bson::Double(f64::INFINITY)),
            "NaN" => Ok(Bson::Double(f64::NAN)),
            _ => Err(ParseError::InvalidQuery(format!("Unknown identifier: {name}")).into()),
        }
    }

    /// Convert unary expression to BSON (e.g., -5, +3, !true)
    fn unary_to_bson(unary: &UnaryExpr) -> Result<Bson> {
        match (unary.operator, &unary.argument) {
            (UnaryOperator::Minus, Expr::Number(raw)) => Self::number_to_bson(raw, true),
            (UnaryOperator::Plus, Expr::Number(raw)) => Self::number_to_bson(raw, false),
            (UnaryOperator::Minus, Expr::Ident(name)) if name == "Infinity" => {
                Ok(Bson::Double(f64::NEG_INFINITY))
            }
            (UnaryOperator::Not, argument) => match Self::expr_to_bson(argument)? {
                Bson::Boolean(b) => Ok(Bson::Boolean(!b)),
                _ => Err(
                    ParseError::InvalidQuery("Logical NOT requires boolean value".to_string())
                        .into(),
                ),
            },
            _ => Err(ParseError::InvalidQuery(
                "Unary sign only supported for numeric literals".to_string(),
            )
            .into()),
        }
    }

    /// Convert constructor forms, with or without `new`
    fn constructor_to_bson(callee: &Expr, arguments: &[Spanned]) -> Result<Bson> {
        let Some(name) = callee.as_ident() else {
            return Err(ParseError::InvalidQuery(
                "Constructor call must have identifier callee".to_string(),
            )
            .into());
        };
        let first = arguments.first().map(|arg| &arg.expr);

        match (name, first) {
            ("ObjectId", None) => Ok(Bson::ObjectId(ObjectId::new())),
            ("ObjectId", Some(arg)) => Self::parse_objectid_argument(arg),
            ("ISODate" | "Date", None) => Ok(Bson::DateTime(DateTime::now())),
            ("ISODate" | "Date", Some(arg)) => Self::parse_date_argument(arg),
            ("NumberInt" | "Int32", Some(arg)) => Self::parse_int_argument(arg),
            ("NumberLong" | "Long", Some(arg)) => Self::parse_long_argument(arg),
            ("Double", Some(arg)) => Self::parse_double_argument(arg),
            ("NumberDecimal" | "Decimal128", Some(arg)) => Self::parse_decimal_argument(arg),
            ("Timestamp", Some(arg)) => Self::parse_timestamp_argument(arg, arguments.get(1)),
            ("UUID", Some(arg)) => Self::parse_uuid_argument(arg),
            ("MinKey", None) => Ok(Bson::MinKey),
            ("MaxKey", None) => Ok(Bson::MaxKey),
            (_, None) if Self::needs_argument(name) => {
                Err(ParseError::InvalidQuery(format!("{name} requires argument")).into())
            }
            _ => Err(ParseError::InvalidQuery(format!("Unsupported function: {name}")).into()),
        }
    }

    fn needs_argument(name: &str) -> bool {
        matches!(
            name,
            "NumberInt"
                | "Int32"
                | "NumberLong"
                | "Long"
                | "Double"
                | "NumberDecimal"
                | "Decimal128"
                | "Timestamp"
                | "UUID"
        )
    }

    /// Parse Date argument
    fn parse_date_argument(expr: &Expr) -> Result<Bson> {
        match expr {
            Expr::String(s) => {
                if let Ok(datetime) = DateTime::parse_rfc3339_str(s) {
                    return Ok(Bson::DateTime(datetime));
                }
                // Date-only form: ISODate("2024-01-31")
                let date = chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d")
                    .map_err(|e| ParseError::InvalidQuery(format!("Invalid date string: {e}")))?;
                let millis = date
                    .and_hms_opt(0, 0, 0)
                    .map(|dt| dt.and_utc().timestamp_millis())
                    .unwrap_or_default();
                Ok(Bson::DateTime(DateTime::from_millis(millis)))
            }
            Expr::Number(raw) => {
                let millis = raw
                    .parse::<f64>()
                    .map_err(|e| ParseError::InvalidQuery(format!("Invalid timestamp: {e}")))?;
                Ok(Bson::DateTime(DateTime::from_millis(millis as i64)))
            }
            _ => Err(ParseError::InvalidQuery(
                "Date argument must be string or number".to_string(),
            )
            .into()),
        }
    }

    /// Parse ObjectId argument
    fn parse_objectid_argument(expr: &Expr) -> Result<Bson> {
        if let Expr::String(s) = expr {
            let oid = ObjectId::parse_str(s)
                .map_err(|e| ParseError::InvalidQuery(format!("Invalid ObjectId: {e}")))?;
            Ok(Bson::ObjectId(oid))
        } else {
            Err(ParseError::InvalidQuery("ObjectId argument must be string".to_string()).into())
        }
    }

    /// Parse NumberInt argument
    fn parse_int_argument(expr: &Expr) -> Result<Bson> {
        let text = Self::numeric_text(expr, "NumberInt")?;
        let value = text
            .parse::<i32>()
            .map_err(|e| ParseError::InvalidQuery(format!("Invalid int: {e}")))?;
        Ok(Bson::Int32(value))
    }

    /// Parse NumberLong argument
    fn parse_long_argument(expr: &Expr) -> Result<Bson> {
        let text = Self::numeric_text(expr, "NumberLong")?;
        let value = text
            .parse::<i64>()
            .map_err(|e| ParseError::InvalidQuery(format!("Invalid long: {e}")))?;
        Ok(Bson::Int64(value))
    }

    /// Parse Double argument
    fn parse_double_argument(expr: &Expr) -> Result<Bson> {
        let text = Self::numeric_text(expr, "Double")?;
        let value = text
            .parse::<f64>()
            .map_err(|e| ParseError::InvalidQuery(format!("Invalid double: {e}")))?;
        Ok(Bson::Double(value))
    }

    /// Parse NumberDecimal argument. Kept as its string form.
    fn parse_decimal_argument(expr: &Expr) -> Result<Bson> {
        let text = Self::numeric_text(expr, "NumberDecimal")?;
        Ok(Bson::String(text))
    }

    /// Parse Timestamp({ t: 1, i: 2 }) or Timestamp(1, 2)
    fn parse_timestamp_argument(first: &Expr, second: Option<&Spanned>) -> Result<Bson> {
        let (time, increment) = match (first, second) {
            (Expr::Object(obj), _) => {
                let doc = Self::object_to_bson(obj)?;
                (Self::timestamp_part(doc.get("t"))?, Self::timestamp_part(doc.get("i"))?)
            }
            (time, Some(increment)) => (
                Self::timestamp_part(Some(&Self::expr_to_bson(time)?))?,
                Self::timestamp_part(Some(&Self::expr_to_bson(&increment.expr)?))?,
            ),
            _ => {
                return Err(ParseError::InvalidQuery(
                    "Timestamp requires { t, i } or two numbers".to_string(),
                )
                .into());
            }
        };
        Ok(Bson::Timestamp(Timestamp { time, increment }))
    }

    fn timestamp_part(value: Option<&Bson>) -> Result<u32> {
        let number = match value {
            Some(Bson::Int32(n)) => i64::from(*n),
            Some(Bson::Int64(n)) => *n,
            _ => -1,
        };
        u32::try_from(number)
            .map_err(|_| ParseError::InvalidQuery("Invalid Timestamp component".to_string()).into())
    }

    /// Parse UUID("...") into a subtype-4 binary
    fn parse_uuid_argument(expr: &Expr) -> Result<Bson> {
        let Expr::String(s) = expr else {
            return Err(ParseError::InvalidQuery("UUID argument must be string".to_string()).into());
        };
        let uuid = uuid::Uuid::parse_str(s)
            .map_err(|e| ParseError::InvalidQuery(format!("Invalid UUID: {e}")))?;
        Ok(Bson::Binary(Binary {
            subtype: BinarySubtype::Uuid,
            bytes: uuid.as_bytes().to_vec(),
        }))
    }

    /// Text of a numeric constructor argument, which may be quoted or signed
    fn numeric_text(expr: &Expr, ctor: &str) -> Result<String> {
        match expr {
            Expr::Number(raw) => Ok(raw.clone()),
            Expr::String(s) => Ok(s.trim().to_string()),
            Expr::Unary(unary) => match (unary.operator, &unary.argument) {
                (UnaryOperator::Minus, Expr::Number(raw)) => Ok(format!("-{raw}")),
                (UnaryOperator::Plus, Expr::Number(raw)) => Ok(raw.clone()),
                _ => Err(ParseError::InvalidQuery(format!(
                    "{ctor} argument must be number or string"
                ))
                .into()),
            },
            _ => Err(
                ParseError::InvalidQuery(format!("{ctor} argument must be number or string"))
                    .into(),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::parser::Parser;

    fn parse_and_convert(code: &str) -> Bson {
        let expr = Parser::parse(code).unwrap();
        ExpressionConverter::expr_to_bson(&expr).unwrap()
    }

    #[test]
    fn test_simple_object() {
        let bson = parse_and_convert("{name: 'John', age: 30}");
        let doc = bson.as_document().unwrap();
        assert_eq!(doc.get_str("name").unwrap(), "John");
        assert_eq!(doc.get_i32("age").unwrap(), 30);
    }

    #[test]
    fn test_integer_widths() {
        assert_eq!(parse_and_convert("2147483647"), Bson::Int32(i32::MAX));
        assert_eq!(parse_and_convert("2147483648"), Bson::Int64(2_147_483_648));
        assert_eq!(parse_and_convert("-2147483648"), Bson::Int32(i32::MIN));
        assert_eq!(parse_and_convert("1.5"), Bson::Double(1.5));
        assert_eq!(parse_and_convert("1e3"), Bson::Double(1000.0));
    }

    #[test]
    fn test_operators_keep_key_order() {
        let bson = parse_and_convert("{age: {$gt: 18, $lt: 65}}");
        let age = bson.as_document().unwrap().get_document("age").unwrap();
        let keys: Vec<_> = age.keys().cloned().collect();
        assert_eq!(keys, vec!["$gt", "$lt"]);
    }

    #[test]
    fn test_objectid_call() {
        let bson = parse_and_convert("ObjectId('507f1f77bcf86cd799439011')");
        assert_eq!(
            bson,
            Bson::ObjectId(ObjectId::parse_str("507f1f77bcf86cd799439011").unwrap())
        );
        assert!(matches!(parse_and_convert("new ObjectId()"), Bson::ObjectId(_)));
    }

    #[test]
    fn test_isodate() {
        let bson = parse_and_convert("ISODate('2024-01-31T10:00:00.000Z')");
        assert_eq!(
            bson,
            Bson::DateTime(DateTime::parse_rfc3339_str("2024-01-31T10:00:00Z").unwrap())
        );
        assert!(matches!(parse_and_convert("ISODate('2024-01-31')"), Bson::DateTime(_)));
    }

    #[test]
    fn test_shell_number_wrappers() {
        assert_eq!(parse_and_convert("NumberInt(42)"), Bson::Int32(42));
        assert_eq!(
            parse_and_convert("Long('9007199254740993')"),
            Bson::Int64(9_007_199_254_740_993)
        );
        assert_eq!(parse_and_convert("NumberLong(-7)"), Bson::Int64(-7));
        assert_eq!(parse_and_convert("Double(2)"), Bson::Double(2.0));
        assert_eq!(
            parse_and_convert("Decimal128('1.10')"),
            Bson::String("1.10".to_string())
        );
    }

    #[test]
    fn test_timestamp_forms() {
        let expected = Bson::Timestamp(Timestamp {
            time: 1_700_000_000,
            increment: 3,
        });
        assert_eq!(parse_and_convert("Timestamp({ t: 1700000000, i: 3 })"), expected);
        assert_eq!(parse_and_convert("Timestamp(1700000000, 3)"), expected);
    }

    #[test]
    fn test_uuid() {
        let bson = parse_and_convert("UUID('0e3c5d6a-8f6b-4f43-9a7c-3a1b2c4d5e6f')");
        match bson {
            Bson::Binary(binary) => {
                assert_eq!(binary.subtype, BinarySubtype::Uuid);
                assert_eq!(binary.bytes.len(), 16);
            }
            other => panic!("Expected binary, got {other:?}"),
        }
    }

    #[test]
    fn test_special_identifiers() {
        assert!(parse_and_convert("Infinity").as_f64().unwrap().is_infinite());
        assert_eq!(parse_and_convert("-Infinity"), Bson::Double(f64::NEG_INFINITY));
        assert_eq!(parse_and_convert("!true"), Bson::Boolean(false));
    }

    #[test]
    fn test_rejects_unknown_forms() {
        let expr = Parser::parse("foo(1)").unwrap();
        assert!(ExpressionConverter::expr_to_bson(&expr).is_err());
        let expr = Parser::parse("db.users").unwrap();
        assert!(ExpressionConverter::expr_to_bson(&expr).is_err());
        let expr = Parser::parse("NumberInt()").unwrap();
        let err = ExpressionConverter::expr_to_bson(&expr).unwrap_err();
        assert!(err.to_string().contains("requires argument"));
    }
}
