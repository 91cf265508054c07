//! Configuration management for mongolens
//!
//! This module handles loading, parsing, and managing configuration from various sources:
//! - Configuration files (TOML format)
//! - Environment variables
//! - Command-line arguments (applied by the CLI layer)
//!
//! Configuration precedence (highest to lowest):
//! 1. Command-line arguments
//! 2. Environment variables
//! 3. Configuration file
//! 4. Default values

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{ConfigError, Result};

/// Prefix for environment overrides, e.g. `MONGOLENS_QUERY_TIMEOUT_SECS=60`.
const ENV_PREFIX: &str = "MONGOLENS_";

/// Largest page size a user may request.
pub const MAX_PAGE_SIZE: usize = 10_000;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Connection configuration
    #[serde(default)]
    pub connection: ConnectionConfig,

    /// Query pipeline configuration
    #[serde(default)]
    pub query: QueryConfig,

    /// Query history configuration
    #[serde(default)]
    pub history: HistoryConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Connection-related configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Default MongoDB connection URI
    #[serde(default = "default_uri")]
    pub default_uri: String,

    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub timeout: u64,

    /// Path to the mongosh binary used for script execution
    #[serde(default = "default_mongosh_path")]
    pub mongosh_path: String,
}

/// Settings for the adaptive execution pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryConfig {
    /// Query timeout in seconds, 0 disables the timer
    #[serde(default)]
    pub query_timeout_secs: u64,

    /// Page size used when a view opens
    #[serde(default = "default_page_size")]
    pub default_page_size: usize,

    /// Shrink pages of large documents to stay under the payload budget
    #[serde(default = "default_true")]
    pub adaptive_page_size: bool,

    /// Payload budget for a single page, in bytes
    #[serde(default = "default_max_page_payload_bytes")]
    pub max_page_payload_bytes: u64,

    /// Projected response size that triggers the pre-flight warning, in MB
    #[serde(default = "default_response_warning_mb")]
    pub response_warning_mb: f64,

    /// Generate a projection for wide collections
    #[serde(default = "default_true")]
    pub auto_projection: bool,

    /// Field count above which a collection counts as wide
    #[serde(default = "default_auto_projection_field_threshold")]
    pub auto_projection_field_threshold: usize,

    /// Number of fields kept by a generated projection
    #[serde(default = "default_auto_projection_max_fields")]
    pub auto_projection_max_fields: usize,

    /// Quiet period before diagnostics are recomputed, in milliseconds
    #[serde(default = "default_validation_debounce_ms")]
    pub validation_debounce_ms: u64,
}

/// Query history configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// Maximum number of history entries
    #[serde(default = "default_max_history_entries")]
    pub max_entries: usize,

    /// Directory holding persisted local state
    #[serde(default = "default_state_directory")]
    pub directory: PathBuf,

    /// Enable history persistence
    #[serde(default = "default_true")]
    pub persist: bool,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub level: LogLevel,

    /// Enable timestamps in logs
    #[serde(default = "default_true")]
    pub timestamps: bool,
}

/// Log level options
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

// Default value functions
fn default_uri() -> String {
    "mongodb://localhost:27017".to_string()
}

fn default_connect_timeout() -> u64 {
    30
}

fn default_mongosh_path() -> String {
    "mongosh".to_string()
}

fn default_true() -> bool {
    true
}

fn default_page_size() -> usize {
    50
}

fn default_max_page_payload_bytes() -> u64 {
    10_000_000
}

fn default_response_warning_mb() -> f64 {
    8.0
}

fn default_auto_projection_field_threshold() -> usize {
    30
}

fn default_auto_projection_max_fields() -> usize {
    15
}

fn default_validation_debounce_ms() -> u64 {
    300
}

fn default_max_history_entries() -> usize {
    20
}

fn default_state_directory() -> PathBuf {
    dirs::data_local_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join("mongolens")
}

fn default_log_level() -> LogLevel {
    LogLevel::Warn
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            default_uri: default_uri(),
            timeout: default_connect_timeout(),
            mongosh_path: default_mongosh_path(),
        }
    }
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            query_timeout_secs: 0,
            default_page_size: default_page_size(),
            adaptive_page_size: true,
            max_page_payload_bytes: default_max_page_payload_bytes(),
            response_warning_mb: default_response_warning_mb(),
            auto_projection: true,
            auto_projection_field_threshold: default_auto_projection_field_threshold(),
            auto_projection_max_fields: default_auto_projection_max_fields(),
            validation_debounce_ms: default_validation_debounce_ms(),
        }
    }
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_entries: default_max_history_entries(),
            directory: default_state_directory(),
            persist: true,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            timestamps: true,
        }
    }
}

impl Config {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from a TOML file
    ///
    /// # Arguments
    /// * `path` - Path to the configuration file
    ///
    /// # Returns
    /// * `Result<Config>` - Loaded configuration or error
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()).into());
        }
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// Load configuration from all sources with proper precedence
    ///
    /// A missing file at the default location is not an error; an explicit
    /// path that does not exist is.
    ///
    /// # Arguments
    /// * `path` - Optional explicit configuration file
    ///
    /// # Returns
    /// * `Result<Config>` - Merged configuration or error
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                let default_path = Self::default_path();
                if default_path.exists() {
                    Self::from_file(default_path)?
                } else {
                    Self::default()
                }
            }
        };

        config.apply_env(std::env::vars())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `MONGOLENS_*` overrides from the given variables
    ///
    /// Accepted keys: `URI`, `QUERY_TIMEOUT_SECS`, `PAGE_SIZE`,
    /// `MAX_PAGE_PAYLOAD_BYTES`, `RESPONSE_WARNING_MB`, `LOG_LEVEL`,
    /// `MONGOSH_PATH`. Unknown keys are ignored.
    pub fn apply_env<I>(&mut self, vars: I) -> Result<()>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            let Some(name) = key.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            match name {
                "URI" => self.connection.default_uri = value,
                "MONGOSH_PATH" => self.connection.mongosh_path = value,
                "QUERY_TIMEOUT_SECS" => {
                    self.query.query_timeout_secs = parse_env(&key, &value)?;
                }
                "PAGE_SIZE" => self.query.default_page_size = parse_env(&key, &value)?,
                "MAX_PAGE_PAYLOAD_BYTES" => {
                    self.query.max_page_payload_bytes = parse_env(&key, &value)?;
                }
                "RESPONSE_WARNING_MB" => {
                    self.query.response_warning_mb = parse_env(&key, &value)?;
                }
                "LOG_LEVEL" => {
                    self.logging.level = LogLevel::parse(&value).ok_or_else(|| {
                        ConfigError::InvalidValue {
                            field: key.clone(),
                            value: value.clone(),
                        }
                    })?;
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Get the default configuration file path
    ///
    /// # Returns
    /// * `PathBuf` - Path to default configuration file
    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".mongolens")
            .join("config.toml")
    }

    /// Save configuration to a file
    ///
    /// # Arguments
    /// * `path` - Path where to save the configuration
    ///
    /// # Returns
    /// * `Result<()>` - Success or error
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            crate::utils::fs::ensure_dir_exists(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Validate the configuration
    ///
    /// # Returns
    /// * `Result<()>` - Ok if valid, error otherwise
    pub fn validate(&self) -> Result<()> {
        let q = &self.query;
        if q.default_page_size == 0 || q.default_page_size > MAX_PAGE_SIZE {
            return Err(invalid("query.default_page_size", q.default_page_size));
        }
        if q.max_page_payload_bytes == 0 {
            return Err(invalid("query.max_page_payload_bytes", q.max_page_payload_bytes));
        }
        if q.response_warning_mb.is_nan() || q.response_warning_mb <= 0.0 {
            return Err(invalid("query.response_warning_mb", q.response_warning_mb));
        }
        if q.auto_projection_max_fields == 0 {
            return Err(invalid(
                "query.auto_projection_max_fields",
                q.auto_projection_max_fields,
            ));
        }
        if self.history.max_entries == 0 {
            return Err(invalid("history.max_entries", self.history.max_entries));
        }
        Ok(())
    }
}

impl ConnectionConfig {
    /// Connect and server selection timeout
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }
}

impl QueryConfig {
    /// Query timeout, `None` when disabled
    pub fn query_timeout(&self) -> Option<Duration> {
        (self.query_timeout_secs > 0).then(|| Duration::from_secs(self.query_timeout_secs))
    }

    /// Validation debounce period
    pub fn validation_debounce(&self) -> Duration {
        Duration::from_millis(self.validation_debounce_ms)
    }
}

impl LogLevel {
    /// Parse a level name, case-insensitive
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "error" => Some(LogLevel::Error),
            "warn" | "warning" => Some(LogLevel::Warn),
            "info" => Some(LogLevel::Info),
            "debug" => Some(LogLevel::Debug),
            "trace" => Some(LogLevel::Trace),
            _ => None,
        }
    }

    /// Convert to tracing::Level
    pub fn to_tracing_level(&self) -> tracing::Level {
        match self {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value.trim().parse().map_err(|_| {
        ConfigError::InvalidValue {
            field: key.to_string(),
            value: value.to_string(),
        }
        .into()
    })
}

fn invalid(field: &str, value: impl std::fmt::Display) -> crate::error::LensError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.connection.default_uri, "mongodb://localhost:27017");
        assert_eq!(config.query.default_page_size, 50);
        assert_eq!(config.query.max_page_payload_bytes, 10_000_000);
        assert_eq!(config.history.max_entries, 20);
        assert!(config.query.query_timeout().is_none());
        assert_eq!(
            config.connection.connect_timeout(),
            Duration::from_secs(config.connection.timeout)
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = Config::from_toml_str(
            r#"
            [query]
            query_timeout_secs = 15
            response_warning_mb = 4.5
            "#,
        )
        .unwrap();
        assert_eq!(config.query.query_timeout(), Some(Duration::from_secs(15)));
        assert_eq!(config.query.response_warning_mb, 4.5);
        assert_eq!(config.query.auto_projection_max_fields, 15);
        assert_eq!(config.logging.level, LogLevel::Warn);
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        let err = Config::from_toml_str("[query\nbroken").unwrap_err();
        assert!(err.to_string().starts_with("Configuration error"));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config
            .apply_env(vec![
                ("MONGOLENS_QUERY_TIMEOUT_SECS".to_string(), "45".to_string()),
                ("MONGOLENS_LOG_LEVEL".to_string(), "debug".to_string()),
                ("UNRELATED".to_string(), "1".to_string()),
            ])
            .unwrap();
        assert_eq!(config.query.query_timeout_secs, 45);
        assert_eq!(config.logging.level, LogLevel::Debug);
    }

    #[test]
    fn test_env_override_rejects_garbage() {
        let mut config = Config::default();
        let result = config.apply_env(vec![(
            "MONGOLENS_PAGE_SIZE".to_string(),
            "lots".to_string(),
        )]);
        assert!(result.is_err());
    }

    #[test]
    fn test_validate_rejects_zero_page_size() {
        let mut config = Config::default();
        config.query.default_page_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut config = Config::default();
        config.query.query_timeout_secs = 12;
        config.save(&path).unwrap();

        let loaded = Config::from_file(&path).unwrap();
        assert_eq!(loaded.query.query_timeout_secs, 12);
    }

    #[test]
    fn test_missing_explicit_file() {
        let err = Config::from_file("/definitely/not/here.toml").unwrap_err();
        assert!(err.to_string().contains("not found"));
    }
}
