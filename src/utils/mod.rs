//! Small helpers shared across the query core
//!
//! - String shortening for banners and log lines
//! - Timestamps for history entries
//! - Directory helpers for local storage
//! - Byte-size formatting for payload estimates

use std::path::{Path, PathBuf};

use crate::error::Result;

/// Bytes in one megabyte, as used by payload budgets and size warnings.
pub const BYTES_PER_MB: f64 = 1_000_000.0;

/// String utilities
pub mod string {
    /// Truncate string to at most `max_chars` characters
    ///
    /// # Arguments
    /// * `s` - String to truncate
    /// * `max_chars` - Maximum length in characters
    ///
    /// # Returns
    /// * `String` - Truncated string with ellipsis if needed
    pub fn truncate(s: &str, max_chars: usize) -> String {
        if s.chars().count() <= max_chars {
            s.to_string()
        } else {
            let kept: String = s.chars().take(max_chars.saturating_sub(3)).collect();
            format!("{kept}...")
        }
    }

    /// First non-blank line, trimmed.
    pub fn first_line(s: &str) -> &str {
        s.lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .unwrap_or("")
    }

    /// Check if string is a valid JavaScript identifier
    ///
    /// # Arguments
    /// * `s` - String to check
    ///
    /// # Returns
    /// * `bool` - True if valid identifier
    pub fn is_valid_identifier(s: &str) -> bool {
        let mut chars = s.chars();
        match chars.next() {
            Some(first) if first.is_alphabetic() || first == '_' || first == '$' => {}
            _ => return false,
        }
        chars.all(|c| c.is_alphanumeric() || c == '_' || c == '$')
    }

    /// Quote a string as a JavaScript double-quoted literal.
    pub fn quote(s: &str) -> String {
        let escaped = s
            .replace('\\', "\\\\")
            .replace('"', "\\\"")
            .replace('\n', "\\n")
            .replace('\r', "\\r")
            .replace('\t', "\\t");
        format!("\"{escaped}\"")
    }
}

/// Time utilities
pub mod time {
    /// Current Unix timestamp in milliseconds
    pub fn now_millis() -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// File system utilities
pub mod fs {
    use super::*;

    /// Ensure directory exists, create if not
    ///
    /// # Arguments
    /// * `path` - Directory path
    ///
    /// # Returns
    /// * `Result<()>` - Success or error
    pub fn ensure_dir_exists<P: AsRef<Path>>(path: P) -> Result<()> {
        let path = path.as_ref();
        if !path.exists() {
            std::fs::create_dir_all(path)?;
        }
        Ok(())
    }

    /// Expand home directory in path
    ///
    /// # Arguments
    /// * `path` - Path potentially starting with ~
    ///
    /// # Returns
    /// * `PathBuf` - Expanded path
    pub fn expand_home(path: &str) -> PathBuf {
        if let Some(rest) = path.strip_prefix("~/")
            && let Some(home) = dirs::home_dir()
        {
            return home.join(rest);
        }
        PathBuf::from(path)
    }
}

/// Conversion utilities
pub mod convert {
    use super::BYTES_PER_MB;

    /// Format bytes as a human-readable decimal size
    ///
    /// # Arguments
    /// * `bytes` - Number of bytes
    ///
    /// # Returns
    /// * `String` - Formatted size (e.g., "1.50 MB")
    pub fn format_bytes(bytes: u64) -> String {
        const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
        let mut size = bytes as f64;
        let mut unit_index = 0;

        while size >= 1000.0 && unit_index < UNITS.len() - 1 {
            size /= 1000.0;
            unit_index += 1;
        }

        if unit_index == 0 {
            format!("{} {}", size as u64, UNITS[unit_index])
        } else {
            format!("{:.2} {}", size, UNITS[unit_index])
        }
    }

    /// Convert a byte count to megabytes.
    pub fn bytes_to_mb(bytes: f64) -> f64 {
        bytes / BYTES_PER_MB
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate() {
        assert_eq!(string::truncate("hello", 10), "hello");
        assert_eq!(string::truncate("hello world", 8), "hello...");
        assert_eq!(string::truncate("héllo wörld", 8), "héllo...");
    }

    #[test]
    fn test_first_line() {
        assert_eq!(string::first_line("\n  a \nb"), "a");
        assert_eq!(string::first_line(""), "");
    }

    #[test]
    fn test_valid_identifier() {
        assert!(string::is_valid_identifier("users"));
        assert!(string::is_valid_identifier("_private"));
        assert!(string::is_valid_identifier("$special"));
        assert!(!string::is_valid_identifier("123invalid"));
        assert!(!string::is_valid_identifier("my-coll"));
        assert!(!string::is_valid_identifier(""));
    }

    #[test]
    fn test_quote() {
        assert_eq!(string::quote("a\"b"), r#""a\"b""#);
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(convert::format_bytes(500), "500 B");
        assert_eq!(convert::format_bytes(1_500), "1.50 KB");
        assert_eq!(convert::format_bytes(9_900_000), "9.90 MB");
    }

    #[test]
    fn test_bytes_to_mb() {
        assert!((convert::bytes_to_mb(2_500_000.0) - 2.5).abs() < f64::EPSILON);
    }
}
