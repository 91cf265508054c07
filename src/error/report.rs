use serde::{Deserialize, Serialize};

use super::LensError;
use crate::utils::string;

/// Longest summary shown in an error banner.
const SUMMARY_MAX_CHARS: usize = 160;

/// An error ready for display: a one-line summary plus the full text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserFacingError {
    /// Short message for banners.
    pub summary: String,

    /// Full error text, shown on demand.
    pub details: String,
}

impl UserFacingError {
    /// Build from the full error text.
    pub fn new(details: impl Into<String>) -> Self {
        let details = details.into();
        let summary = string::truncate(string::first_line(&details), SUMMARY_MAX_CHARS);
        Self { summary, details }
    }

    /// Build with an explicit summary.
    pub fn with_summary(summary: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            details: details.into(),
        }
    }
}

impl From<&LensError> for UserFacingError {
    fn from(err: &LensError) -> Self {
        UserFacingError::new(err.to_string())
    }
}

impl std::fmt::Display for UserFacingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_is_first_line() {
        let err = UserFacingError::new("Query failed: bad\n  at line 2\n  at line 3");
        assert_eq!(err.summary, "Query failed: bad");
        assert!(err.details.contains("at line 3"));
    }

    #[test]
    fn test_summary_is_truncated() {
        let long = "x".repeat(400);
        let err = UserFacingError::new(long.clone());
        assert!(err.summary.chars().count() <= SUMMARY_MAX_CHARS);
        assert!(err.summary.ends_with("..."));
        assert_eq!(err.details, long);
    }

    #[test]
    fn test_leading_blank_lines_skipped() {
        let err = UserFacingError::new("\n\n  MongoServerError: unauthorized\n");
        assert_eq!(err.summary, "MongoServerError: unauthorized");
    }
}
