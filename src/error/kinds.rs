use std::ops::Range;
use std::{fmt, io};

/// Crate-wide `Result` type using [`LensError`] as the error.
///
/// This alias is re-exported by the parent `error` module and is intended
/// to be used throughout the crate for fallible operations.
pub type Result<T> = std::result::Result<T, LensError>;

/// Top-level error type for the query core.
///
/// This type wraps more specific error kinds and provides a single
/// error type that can be used throughout the crate.
#[derive(Debug)]
pub enum LensError {
    /// Execution refused by a connection policy (read-only mode).
    Policy(PolicyError),

    /// Failures reported by the driver/script collaborator.
    Collaborator(CollaboratorError),

    /// Query text parsing errors.
    Parse(ParseError),

    /// Configuration errors.
    Config(ConfigError),

    /// Local persisted-state errors.
    Storage(StorageError),

    /// I/O errors.
    Io(io::Error),

    /// MongoDB driver errors.
    MongoDb(mongodb::error::Error),

    /// JSON (de)serialization errors.
    Json(serde_json::Error),

    /// Generic error with a free-form message.
    Generic(String),
}

/// Policy errors. Surfaced immediately, never retried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyError {
    /// A write operation was submitted against a read-only connection.
    WriteInReadOnly { operation: String },

    /// The operation is only available for find-style queries.
    RequiresSimpleQuery(String),
}

/// Errors raised by the driver or script collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollaboratorError {
    /// Collection profile could not be computed.
    ProfileUnavailable(String),

    /// Structured find failed.
    QueryFailed(String),

    /// Script execution failed.
    ScriptFailed {
        exit_code: Option<i32>,
        message: String,
    },

    /// The external shell binary is missing.
    MongoshUnavailable,

    /// Explain command failed.
    ExplainFailed(String),

    /// No client registered for the connection id.
    UnknownConnection(String),

    /// The query exceeded the configured timeout.
    Timeout { seconds: u64 },
}

/// Parsing-specific errors.
#[derive(Debug, Clone, PartialEq)]
pub enum ParseError {
    /// Syntax error with the offending character range.
    Syntax { message: String, span: Range<usize> },

    /// Well-formed text that cannot be turned into a query value.
    InvalidQuery(String),

    /// Shell output that does not match the accepted grammar.
    UnrecognizedOutput(String),
}

/// Configuration-specific errors.
#[derive(Debug)]
pub enum ConfigError {
    /// Config file not found.
    FileNotFound(String),

    /// Invalid config format.
    InvalidFormat(String),

    /// Invalid field value.
    InvalidValue { field: String, value: String },
}

/// Errors from the local key/value storage.
#[derive(Debug)]
pub enum StorageError {
    /// Reading a key failed.
    ReadFailed { key: String, message: String },

    /// Writing a key failed.
    WriteFailed { key: String, message: String },
}

impl ParseError {
    /// Build a syntax error covering `span`.
    pub fn syntax(message: impl Into<String>, span: Range<usize>) -> Self {
        ParseError::Syntax {
            message: message.into(),
            span,
        }
    }

    /// Character range of the error, when known.
    pub fn span(&self) -> Option<Range<usize>> {
        match self {
            ParseError::Syntax { span, .. } => Some(span.clone()),
            _ => None,
        }
    }
}

/* ========================= Display & Error impls ========================= */

impl fmt::Display for LensError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LensError::Policy(e) => write!(f, "{e}"),
            LensError::Collaborator(e) => write!(f, "{e}"),
            LensError::Parse(e) => write!(f, "{e}"),
            LensError::Config(e) => write!(f, "Configuration error: {e}"),
            LensError::Storage(e) => write!(f, "Storage error: {e}"),
            LensError::Io(e) => write!(f, "I/O error: {e}"),
            LensError::MongoDb(e) => write!(f, "MongoDB error: {e}"),
            LensError::Json(e) => write!(f, "JSON error: {e}"),
            LensError::Generic(msg) => write!(f, "{msg}"),
        }
    }
}

impl fmt::Display for PolicyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PolicyError::WriteInReadOnly { operation } => write!(
                f,
                "Write operation '{operation}' is not allowed on a read-only connection"
            ),
            PolicyError::RequiresSimpleQuery(what) => {
                write!(f, "{what} is only available for find queries")
            }
        }
    }
}

impl fmt::Display for CollaboratorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CollaboratorError::ProfileUnavailable(msg) => {
                write!(f, "Collection profile unavailable: {msg}")
            }
            CollaboratorError::QueryFailed(msg) => write!(f, "Query failed: {msg}"),
            CollaboratorError::ScriptFailed { exit_code, message } => match exit_code {
                Some(code) => write!(f, "Script failed (exit code {code}): {message}"),
                None => write!(f, "Script failed: {message}"),
            },
            CollaboratorError::MongoshUnavailable => write!(
                f,
                "mongosh was not found on this machine. Install mongosh to run scripts and aggregations"
            ),
            CollaboratorError::ExplainFailed(msg) => write!(f, "Explain failed: {msg}"),
            CollaboratorError::UnknownConnection(id) => write!(f, "Unknown connection: {id}"),
            CollaboratorError::Timeout { seconds } => write!(
                f,
                "Query timed out after {seconds}s. Increase the query timeout in settings or narrow the filter"
            ),
        }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::Syntax { message, .. } => write!(f, "Syntax error: {message}"),
            ParseError::InvalidQuery(msg) => write!(f, "Invalid query: {msg}"),
            ParseError::UnrecognizedOutput(msg) => write!(f, "Unrecognized output: {msg}"),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::FileNotFound(path) => write!(f, "Config file not found: {path}"),
            ConfigError::InvalidFormat(msg) => write!(f, "Invalid config format: {msg}"),
            ConfigError::InvalidValue { field, value } => {
                write!(f, "Invalid value '{value}' for field '{field}'")
            }
        }
    }
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::ReadFailed { key, message } => {
                write!(f, "Failed to read '{key}': {message}")
            }
            StorageError::WriteFailed { key, message } => {
                write!(f, "Failed to write '{key}': {message}")
            }
        }
    }
}

impl std::error::Error for LensError {}
impl std::error::Error for PolicyError {}
impl std::error::Error for CollaboratorError {}
impl std::error::Error for ParseError {}
impl std::error::Error for ConfigError {}
impl std::error::Error for StorageError {}

/* ========================= Conversions to LensError ========================= */

impl From<io::Error> for LensError {
    fn from(err: io::Error) -> Self {
        LensError::Io(err)
    }
}

impl From<mongodb::error::Error> for LensError {
    fn from(err: mongodb::error::Error) -> Self {
        LensError::MongoDb(err)
    }
}

impl From<serde_json::Error> for LensError {
    fn from(err: serde_json::Error) -> Self {
        LensError::Json(err)
    }
}

impl From<toml::de::Error> for LensError {
    fn from(err: toml::de::Error) -> Self {
        LensError::Config(ConfigError::InvalidFormat(err.to_string()))
    }
}

impl From<toml::ser::Error> for LensError {
    fn from(err: toml::ser::Error) -> Self {
        LensError::Config(ConfigError::InvalidFormat(err.to_string()))
    }
}

impl From<PolicyError> for LensError {
    fn from(err: PolicyError) -> Self {
        LensError::Policy(err)
    }
}

impl From<CollaboratorError> for LensError {
    fn from(err: CollaboratorError) -> Self {
        LensError::Collaborator(err)
    }
}

impl From<ParseError> for LensError {
    fn from(err: ParseError) -> Self {
        LensError::Parse(err)
    }
}

impl From<ConfigError> for LensError {
    fn from(err: ConfigError) -> Self {
        LensError::Config(err)
    }
}

impl From<StorageError> for LensError {
    fn from(err: StorageError) -> Self {
        LensError::Storage(err)
    }
}

impl From<String> for LensError {
    fn from(msg: String) -> Self {
        LensError::Generic(msg)
    }
}

impl From<&str> for LensError {
    fn from(msg: &str) -> Self {
        LensError::Generic(msg.to_owned())
    }
}
