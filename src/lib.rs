//! MongoLens query core
//!
//! Adaptive query execution for a MongoDB collection browser. The crate
//! decides how a query typed into a collection view runs, how large its
//! pages are, which fields it fetches, and how the shell output becomes
//! documents again.
//!
//! # Modules
//!
//! - `cli`: Command-line interface and argument parsing
//! - `collaborator`: Driver and mongosh boundary
//! - `config`: Configuration management
//! - `error`: Error types and user-facing reports
//! - `executor`: Epoch-based execution controller
//! - `history`: Persisted query history
//! - `normalizer`: Output normalization into documents
//! - `profile`: Adaptive page sizing and response size estimates
//! - `projection`: Automatic projection planning
//! - `query`: Query text lexing, parsing and classification
//! - `schema`: Per-collection field and profile cache
//! - `utils`: Utility functions and helpers
//! - `validator`: Editor diagnostics
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use mongolens::collaborator::{CollectionKey, MongoCollaborator};
//! use mongolens::history::{HistoryStore, MemoryStorage};
//! use mongolens::schema::SchemaCache;
//! use mongolens::{Config, ExecutionController};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::default();
//!     let mongo = MongoCollaborator::new(config.connection.clone());
//!     mongo.connect("local", "mongodb://localhost:27017").await?;
//!
//!     let controller = ExecutionController::new(
//!         CollectionKey::new("local", "shop", "orders"),
//!         Arc::new(mongo),
//!         Arc::new(SchemaCache::new()),
//!         HistoryStore::load(Arc::new(MemoryStorage::new()), 20),
//!         &config.query,
//!     );
//!
//!     controller.set_query_text(r#"{ status: "open" }"#);
//!     let outcome = controller.execute_query().await?;
//!     println!("{:?}", outcome);
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod collaborator;
pub mod config;
pub mod error;
pub mod executor;
pub mod history;
pub mod normalizer;
pub mod profile;
pub mod projection;
pub mod query;
pub mod schema;
pub mod utils;
pub mod validator;

// Re-export commonly used types
pub use collaborator::{Collaborator, CollectionKey};
pub use config::Config;
pub use error::{LensError, Result, UserFacingError};
pub use executor::{ExecutionController, ExecutionOutcome, QueryStatus, ViewState};
pub use query::{QueryClassifier, QueryKind};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get library version string
///
/// # Returns
/// * `&str` - Version string
pub fn version() -> &'static str {
    VERSION
}
