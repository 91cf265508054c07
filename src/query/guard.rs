//! Read-only write guard
//!
//! Detects write operations in query text so a read-only view can refuse them
//! before any epoch or collaborator call is spent.

use std::sync::LazyLock;

use regex::Regex;

use crate::error::{PolicyError, Result};

static WRITE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\.\s*(insert(?:One|Many)?|update(?:One|Many)?|replaceOne|delete(?:One|Many)?|remove|drop(?:Database|Indexes|Index)?|createIndex(?:es)?|createCollection|bulkWrite|renameCollection|findOneAnd(?:Update|Replace|Delete)|findAndModify)\s*\(",
    )
    .expect("write operation pattern is a valid regex")
});

/// Name of the first write operation in `text`, if any
pub fn find_write_operation(text: &str) -> Option<String> {
    WRITE_PATTERN
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Refuse `text` when `read_only` is set and it contains a write operation
///
/// # Arguments
/// * `text` - Raw query text
/// * `read_only` - Whether the view is read-only
///
/// # Returns
/// * `Result<()>` - `PolicyError::WriteInReadOnly` when refused
pub fn check_read_only(text: &str, read_only: bool) -> Result<()> {
    if !read_only {
        return Ok(());
    }
    match find_write_operation(text) {
        Some(operation) => Err(PolicyError::WriteInReadOnly { operation }.into()),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LensError;

    #[test]
    fn test_write_pattern_compiles() {
        assert!(WRITE_PATTERN.is_match("db.orders.drop()"));
    }

    #[test]
    fn test_detects_writes_case_insensitively() {
        assert_eq!(
            find_write_operation("db.users.deleteOne({ a: 1 })").as_deref(),
            Some("deleteOne")
        );
        assert_eq!(
            find_write_operation("db.users.INSERTMANY ([])").as_deref(),
            Some("INSERTMANY")
        );
        assert!(find_write_operation("db.users.findOneAndUpdate({}, {})").is_some());
        assert!(find_write_operation("db.users.drop()").is_some());
        assert!(find_write_operation("db.getCollection('x').bulkWrite([])").is_some());
    }

    #[test]
    fn test_reads_pass() {
        assert!(find_write_operation("db.users.find({ updated: true })").is_none());
        assert!(find_write_operation("db.users.aggregate([{ $count: 'n' }])").is_none());
        assert!(find_write_operation("{ remove: 1 }").is_none());
    }

    #[test]
    fn test_check_read_only() {
        assert!(check_read_only("db.users.deleteOne({})", false).is_ok());
        let err = check_read_only("db.users.deleteOne({})", true).unwrap_err();
        let LensError::Policy(PolicyError::WriteInReadOnly { operation }) = err else {
            panic!("expected a read-only refusal, got {err:?}");
        };
        assert_eq!(operation, "deleteOne");
    }
}
