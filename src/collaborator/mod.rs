//! Boundary to the driver and script layer
//!
//! The execution controller only talks to the database through the
//! [`Collaborator`] trait, so it can run against a live deployment
//! ([`mongo::MongoCollaborator`]) or a scripted double in tests.

pub mod mongo;

use async_trait::async_trait;
use mongodb::bson::{Bson, Document};
use serde::{Deserialize, Serialize};

use crate::error::Result;

pub use mongo::MongoCollaborator;

/// Identity of a collection on a given connection
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CollectionKey {
    pub connection_id: String,
    pub database: String,
    pub collection: String,
}

impl CollectionKey {
    pub fn new(
        connection_id: impl Into<String>,
        database: impl Into<String>,
        collection: impl Into<String>,
    ) -> Self {
        Self {
            connection_id: connection_id.into(),
            database: database.into(),
            collection: collection.into(),
        }
    }

    /// `database.collection`
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.database, self.collection)
    }

    /// Same connection and database, different collection
    pub fn with_collection(&self, collection: impl Into<String>) -> Self {
        Self {
            connection_id: self.connection_id.clone(),
            database: self.database.clone(),
            collection: collection.into(),
        }
    }
}

impl std::fmt::Display for CollectionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.connection_id, self.qualified_name())
    }
}

/// Per-collection statistics that drive paging and projection heuristics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentProfile {
    /// Average BSON size of one document
    pub avg_doc_size_bytes: f64,

    /// Number of distinct top-level fields seen in sampled documents
    pub field_count: usize,

    /// Most frequent fields, most frequent first
    pub top_fields: Vec<String>,
}

/// One page of a structured find
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindRequest {
    pub filter: Document,
    pub skip: u64,
    pub limit: u64,
    pub sort: Option<Document>,
    pub projection: Option<Document>,
}

/// Raw page returned by the driver layer
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindResponse {
    /// One Extended JSON string per document
    pub documents: Vec<String>,

    /// Number of documents matching the filter
    pub total: u64,

    pub query_time_ms: u64,
}

/// Output of an external script run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScriptOutput {
    pub output: String,
    pub exit_code: Option<i32>,
    pub error: Option<String>,
}

impl ScriptOutput {
    /// Whether the process exited with status zero (or reported none)
    ///
    /// Output on stderr alone does not make a run fail; mongosh prints
    /// deprecation notices there.
    pub fn exited_cleanly(&self) -> bool {
        self.exit_code.is_none_or(|code| code == 0)
    }
}

/// Summary of a find explain
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExplainResult {
    /// Stage chain of the winning plan, outermost first (e.g. `FETCH -> IXSCAN`)
    pub winning_plan: String,
    pub keys_examined: u64,
    pub docs_examined: u64,
    pub n_returned: u64,
    pub execution_time_ms: u64,
    /// Full explain document
    pub raw: Document,
}

impl ExplainResult {
    /// Summarize an explain command response
    ///
    /// # Arguments
    /// * `raw` - Response of `explain` with `executionStats` verbosity
    ///
    /// # Returns
    /// * `ExplainResult` - Winning plan stages and execution counters
    pub fn from_explain_document(raw: Document) -> Self {
        let mut stages = Vec::new();
        let mut plan = raw
            .get_document("queryPlanner")
            .ok()
            .and_then(|planner| planner.get_document("winningPlan").ok());

        while let Some(stage) = plan {
            // Newer servers wrap the classic plan in `queryPlan`
            let stage = stage.get_document("queryPlan").unwrap_or(stage);
            if let Ok(name) = stage.get_str("stage") {
                stages.push(name.to_string());
            }
            plan = stage.get_document("inputStage").ok();
        }

        let stats = raw.get_document("executionStats").ok();
        let counter = |field: &str| -> u64 {
            stats
                .and_then(|s| s.get(field))
                .and_then(bson_to_u64)
                .unwrap_or(0)
        };

        Self {
            winning_plan: stages.join(" -> "),
            keys_examined: counter("totalKeysExamined"),
            docs_examined: counter("totalDocsExamined"),
            n_returned: counter("nReturned"),
            execution_time_ms: counter("executionTimeMillis"),
            raw,
        }
    }

    /// Whether the plan scanned the whole collection
    pub fn is_collection_scan(&self) -> bool {
        self.winning_plan.split(" -> ").any(|stage| stage == "COLLSCAN")
    }
}

fn bson_to_u64(value: &Bson) -> Option<u64> {
    match value {
        Bson::Int32(n) => u64::try_from(*n).ok(),
        Bson::Int64(n) => u64::try_from(*n).ok(),
        Bson::Double(n) if *n >= 0.0 => Some(*n as u64),
        _ => None,
    }
}

/// Driver and script operations the execution pipeline depends on
#[async_trait]
pub trait Collaborator: Send + Sync {
    /// Size and shape statistics for a collection
    async fn get_collection_profile(&self, key: &CollectionKey) -> Result<DocumentProfile>;

    /// Run one page of a structured find
    async fn find_documents(&self, key: &CollectionKey, request: FindRequest)
    -> Result<FindResponse>;

    /// Run an arbitrary shell script against a database
    async fn execute_script_with_database(
        &self,
        connection_id: &str,
        database: &str,
        script: &str,
    ) -> Result<ScriptOutput>;

    /// Whether the external shell binary can be launched
    async fn check_mongosh_available(&self) -> bool;

    /// Explain a find filter
    async fn explain_query(&self, key: &CollectionKey, filter: &Document)
    -> Result<ExplainResult>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use mongodb::bson::doc;

    #[test]
    fn test_collection_key_names() {
        let key = CollectionKey::new("local", "shop", "orders");
        assert_eq!(key.qualified_name(), "shop.orders");
        assert_eq!(key.to_string(), "local/shop.orders");
        assert_eq!(key.with_collection("users").collection, "users");
    }

    #[test]
    fn test_script_output_exit_status() {
        assert!(ScriptOutput::default().exited_cleanly());
        assert!(
            !ScriptOutput {
                exit_code: Some(1),
                ..Default::default()
            }
            .exited_cleanly()
        );
        assert!(
            ScriptOutput {
                exit_code: Some(0),
                error: Some("DeprecationWarning".into()),
                ..Default::default()
            }
            .exited_cleanly()
        );
    }

    #[test]
    fn test_explain_summary() {
        let raw = doc! {
            "queryPlanner": {
                "winningPlan": {
                    "stage": "FETCH",
                    "inputStage": { "stage": "IXSCAN", "indexName": "age_1" }
                }
            },
            "executionStats": {
                "nReturned": 12,
                "executionTimeMillis": 3,
                "totalKeysExamined": 12_i64,
                "totalDocsExamined": 12.0
            }
        };
        let explain = ExplainResult::from_explain_document(raw);
        assert_eq!(explain.winning_plan, "FETCH -> IXSCAN");
        assert_eq!(explain.n_returned, 12);
        assert_eq!(explain.keys_examined, 12);
        assert_eq!(explain.docs_examined, 12);
        assert_eq!(explain.execution_time_ms, 3);
        assert!(!explain.is_collection_scan());
    }

    #[test]
    fn test_explain_summary_with_query_plan_wrapper() {
        let raw = doc! {
            "queryPlanner": { "winningPlan": { "queryPlan": { "stage": "COLLSCAN" } } }
        };
        let explain = ExplainResult::from_explain_document(raw);
        assert_eq!(explain.winning_plan, "COLLSCAN");
        assert!(explain.is_collection_scan());
        assert_eq!(explain.n_returned, 0);
    }
}
