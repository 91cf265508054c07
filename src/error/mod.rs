//! Error handling for the query core.
//!
//! Errors are split by origin so the execution controller can apply the
//! right policy to each:
//! - policy errors (read-only guard) are surfaced immediately
//! - collaborator errors resolve the running query to `Failed`
//! - parse errors degrade to fallback documents instead of aborting
//!
//! Anything shown to the user goes through [`UserFacingError`], which keeps a
//! short summary for banners and the full text for a details view.

pub mod kinds;
pub mod report;

// Re-export commonly used types
pub use kinds::{
    CollaboratorError, ConfigError, LensError, ParseError, PolicyError, Result, StorageError,
};
pub use report::UserFacingError;
