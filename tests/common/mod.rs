//! Scripted collaborator shared by the integration tests

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use mongodb::bson::{Bson, Document};

use mongolens::collaborator::{
    Collaborator, CollectionKey, DocumentProfile, ExplainResult, FindRequest, FindResponse,
    ScriptOutput,
};
use mongolens::config::QueryConfig;
use mongolens::error::{CollaboratorError, Result};
use mongolens::history::{HistoryStore, MemoryStorage};
use mongolens::schema::SchemaCache;
use mongolens::ExecutionController;

pub fn orders_key() -> CollectionKey {
    CollectionKey::new("local", "shop", "orders")
}

/// Collaborator whose answers are set up front
#[derive(Default)]
pub struct MockCollaborator {
    profile: Mutex<Option<DocumentProfile>>,
    documents: Mutex<Vec<Document>>,
    total: Mutex<Option<u64>>,
    find_error: Mutex<Option<String>>,
    find_delay: Mutex<Duration>,
    script: Mutex<Option<ScriptOutput>>,
    script_error: Mutex<Option<String>>,
    mongosh_missing: AtomicBool,
    pub find_calls: AtomicUsize,
    pub profile_calls: AtomicUsize,
    pub script_calls: AtomicUsize,
    pub requests: Mutex<Vec<FindRequest>>,
}

impl MockCollaborator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_profile(self, avg_doc_size_bytes: f64, field_count: usize) -> Self {
        self.set_profile(DocumentProfile {
            avg_doc_size_bytes,
            field_count,
            top_fields: (0..field_count).map(|i| format!("f{i:02}")).collect(),
        });
        self
    }

    pub fn set_profile(&self, profile: DocumentProfile) {
        *self.profile.lock().unwrap() = Some(profile);
    }

    pub fn with_documents(self, documents: Vec<Document>) -> Self {
        self.set_documents(documents);
        self
    }

    pub fn set_documents(&self, documents: Vec<Document>) {
        *self.documents.lock().unwrap() = documents;
    }

    pub fn with_total(self, total: u64) -> Self {
        *self.total.lock().unwrap() = Some(total);
        self
    }

    pub fn with_find_delay(self, delay: Duration) -> Self {
        *self.find_delay.lock().unwrap() = delay;
        self
    }

    pub fn failing_find(self, message: &str) -> Self {
        *self.find_error.lock().unwrap() = Some(message.to_string());
        self
    }

    pub fn with_script_output(self, output: &str) -> Self {
        *self.script.lock().unwrap() = Some(ScriptOutput {
            output: output.to_string(),
            exit_code: Some(0),
            error: None,
        });
        self
    }

    pub fn failing_script(self, message: &str) -> Self {
        *self.script_error.lock().unwrap() = Some(message.to_string());
        self
    }

    pub fn without_mongosh(self) -> Self {
        self.mongosh_missing.store(true, Ordering::SeqCst);
        self
    }

    pub fn find_calls(&self) -> usize {
        self.find_calls.load(Ordering::SeqCst)
    }

    pub fn script_calls(&self) -> usize {
        self.script_calls.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Option<FindRequest> {
        self.requests.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl Collaborator for MockCollaborator {
    async fn get_collection_profile(&self, _key: &CollectionKey) -> Result<DocumentProfile> {
        self.profile_calls.fetch_add(1, Ordering::SeqCst);
        self.profile
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| CollaboratorError::ProfileUnavailable("no profile".into()).into())
    }

    async fn find_documents(
        &self,
        _key: &CollectionKey,
        request: FindRequest,
    ) -> Result<FindResponse> {
        self.find_calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());

        let delay = *self.find_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if let Some(message) = self.find_error.lock().unwrap().clone() {
            return Err(CollaboratorError::QueryFailed(message).into());
        }

        let documents = self.documents.lock().unwrap().clone();
        let total = self
            .total
            .lock()
            .unwrap()
            .unwrap_or(documents.len() as u64);
        let page = documents
            .into_iter()
            .skip(request.skip as usize)
            .take(request.limit as usize)
            .map(|doc| Bson::Document(doc).into_relaxed_extjson().to_string())
            .collect();

        Ok(FindResponse {
            documents: page,
            total,
            query_time_ms: 4,
        })
    }

    async fn execute_script_with_database(
        &self,
        _connection_id: &str,
        _database: &str,
        _script: &str,
    ) -> Result<ScriptOutput> {
        self.script_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = self.script_error.lock().unwrap().clone() {
            return Err(CollaboratorError::ScriptFailed {
                exit_code: None,
                message,
            }
            .into());
        }
        Ok(self.script.lock().unwrap().clone().unwrap_or_default())
    }

    async fn check_mongosh_available(&self) -> bool {
        !self.mongosh_missing.load(Ordering::SeqCst)
    }

    async fn explain_query(
        &self,
        _key: &CollectionKey,
        _filter: &Document,
    ) -> Result<ExplainResult> {
        Ok(ExplainResult {
            winning_plan: "COLLSCAN".to_string(),
            ..Default::default()
        })
    }
}

/// Query settings with no timeout and a page size of 50
pub fn query_config() -> QueryConfig {
    QueryConfig {
        default_page_size: 50,
        query_timeout_secs: 0,
        ..QueryConfig::default()
    }
}

pub fn controller(mock: Arc<MockCollaborator>) -> ExecutionController {
    controller_with(mock, &query_config())
}

pub fn controller_with(mock: Arc<MockCollaborator>, config: &QueryConfig) -> ExecutionController {
    controller_with_schema(mock, Arc::new(SchemaCache::new()), config)
}

/// Controller on `orders` sharing `schema` with the caller
pub fn controller_with_schema(
    mock: Arc<MockCollaborator>,
    schema: Arc<SchemaCache>,
    config: &QueryConfig,
) -> ExecutionController {
    ExecutionController::new(
        orders_key(),
        mock,
        schema,
        HistoryStore::load(Arc::new(MemoryStorage::new()), 20),
        config,
    )
}
