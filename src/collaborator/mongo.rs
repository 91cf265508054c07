//! Live collaborator backed by the MongoDB driver and an external mongosh
//!
//! Structured finds, profiles and explains go through `mongodb::Client`s
//! registered per connection id. Scripts are handed to the `mongosh` binary
//! with `--eval`; its stdout is returned untouched for the normalizer.

use std::collections::HashMap;
use std::time::Instant;

use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::bson::{Bson, Document, doc};
use mongodb::options::{ClientOptions, CountOptions, FindOptions};
use mongodb::{Client, Collection};
use tokio::process::Command;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{
    Collaborator, CollectionKey, DocumentProfile, ExplainResult, FindRequest, FindResponse,
    ScriptOutput,
};
use crate::config::ConnectionConfig;
use crate::error::{CollaboratorError, Result};
use crate::utils::string;

/// Documents sampled when profiling a collection
const PROFILE_SAMPLE_SIZE: i64 = 100;

/// Field names kept in a profile
const PROFILE_TOP_FIELDS: usize = 32;

/// Collaborator talking to live deployments
pub struct MongoCollaborator {
    /// Driver clients by connection id
    clients: RwLock<HashMap<String, Client>>,

    /// Connection URIs by connection id, passed to mongosh
    uris: RwLock<HashMap<String, String>>,

    /// Connection configuration
    config: ConnectionConfig,
}

impl MongoCollaborator {
    /// Create a collaborator with no registered connections
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            clients: RwLock::new(HashMap::new()),
            uris: RwLock::new(HashMap::new()),
            config,
        }
    }

    /// Connect to `uri` and register the client under `connection_id`
    ///
    /// # Arguments
    /// * `connection_id` - Identifier used by collection keys
    /// * `uri` - MongoDB connection string
    ///
    /// # Returns
    /// * `Result<()>` - Success once the server answered a ping
    pub async fn connect(&self, connection_id: &str, uri: &str) -> Result<()> {
        debug!("Connecting '{}'", connection_id);

        let mut options = ClientOptions::parse(uri).await?;
        let timeout = self.config.connect_timeout();
        options.connect_timeout = Some(timeout);
        options.server_selection_timeout = Some(timeout);
        options.app_name = Some(format!("mongolens/{}", crate::VERSION));

        let client = Client::with_options(options)?;
        client
            .database("admin")
            .run_command(doc! { "ping": 1 })
            .await?;

        self.clients
            .write()
            .await
            .insert(connection_id.to_string(), client);
        self.uris
            .write()
            .await
            .insert(connection_id.to_string(), uri.to_string());

        info!("Connected '{}'", connection_id);
        Ok(())
    }

    async fn client(&self, connection_id: &str) -> Result<Client> {
        self.clients
            .read()
            .await
            .get(connection_id)
            .cloned()
            .ok_or_else(|| CollaboratorError::UnknownConnection(connection_id.to_string()).into())
    }

    async fn collection(&self, key: &CollectionKey) -> Result<Collection<Document>> {
        let client = self.client(&key.connection_id).await?;
        Ok(client.database(&key.database).collection(&key.collection))
    }

    fn operation_comment() -> Bson {
        Bson::String(format!("mongolens-{}", Uuid::new_v4()))
    }
}

#[async_trait]
impl Collaborator for MongoCollaborator {
    async fn get_collection_profile(&self, key: &CollectionKey) -> Result<DocumentProfile> {
        debug!("Profiling {}", key);

        let client = self.client(&key.connection_id).await?;
        let db = client.database(&key.database);

        // Views and some hosted tiers reject collStats; the sample still gives a size
        let stats_cmd = doc! { "collStats": key.collection.as_str() };
        let avg_obj_size = match db.run_command(stats_cmd).await {
            Ok(stats) => stats.get("avgObjSize").and_then(bson_to_f64),
            Err(e) => {
                warn!("collStats failed for {}: {}", key, e);
                None
            }
        };

        let coll: Collection<Document> = db.collection(&key.collection);
        let pipeline = vec![doc! { "$sample": { "size": PROFILE_SAMPLE_SIZE } }];
        let sample: Vec<Document> = coll
            .aggregate(pipeline)
            .await
            .map_err(|e| CollaboratorError::ProfileUnavailable(e.to_string()))?
            .try_collect()
            .await
            .map_err(|e| CollaboratorError::ProfileUnavailable(e.to_string()))?;

        let profile = profile_from_sample(&sample, avg_obj_size);
        debug!(
            "Profile for {}: avg {} bytes, {} fields",
            key, profile.avg_doc_size_bytes, profile.field_count
        );
        Ok(profile)
    }

    async fn find_documents(
        &self,
        key: &CollectionKey,
        request: FindRequest,
    ) -> Result<FindResponse> {
        let coll = self.collection(key).await?;
        let started = Instant::now();
        let comment = Self::operation_comment();

        let mut find_opts = FindOptions::default();
        find_opts.comment = Some(comment.clone());
        find_opts.skip = Some(request.skip);
        find_opts.limit = Some(i64::try_from(request.limit).unwrap_or(i64::MAX));
        find_opts.sort = request.sort;
        find_opts.projection = request.projection;

        let documents: Vec<Document> = coll
            .find(request.filter.clone())
            .with_options(find_opts)
            .await
            .map_err(|e| CollaboratorError::QueryFailed(e.to_string()))?
            .try_collect()
            .await
            .map_err(|e| CollaboratorError::QueryFailed(e.to_string()))?;

        let mut count_opts = CountOptions::default();
        count_opts.comment = Some(comment);
        let total = coll
            .count_documents(request.filter)
            .with_options(count_opts)
            .await
            .map_err(|e| CollaboratorError::QueryFailed(e.to_string()))?;

        let query_time_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        info!(
            "Fetched {} of {} documents from {} in {}ms",
            documents.len(),
            total,
            key,
            query_time_ms
        );

        Ok(FindResponse {
            documents: documents
                .into_iter()
                .map(|doc| Bson::Document(doc).into_relaxed_extjson().to_string())
                .collect(),
            total,
            query_time_ms,
        })
    }

    async fn execute_script_with_database(
        &self,
        connection_id: &str,
        database: &str,
        script: &str,
    ) -> Result<ScriptOutput> {
        let uri = self
            .uris
            .read()
            .await
            .get(connection_id)
            .cloned()
            .ok_or_else(|| CollaboratorError::UnknownConnection(connection_id.to_string()))?;

        let eval = format!("db = db.getSiblingDB({});\n{}", string::quote(database), script);
        debug!("Running script on {}.{}", connection_id, database);

        let output = Command::new(&self.config.mongosh_path)
            .arg(&uri)
            .arg("--quiet")
            .arg("--norc")
            .arg("--eval")
            .arg(&eval)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| CollaboratorError::ScriptFailed {
                exit_code: None,
                message: e.to_string(),
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let exit_code = output.status.code();

        if !output.status.success() {
            let message = if stderr.is_empty() {
                stdout.trim().to_string()
            } else {
                stderr
            };
            return Err(CollaboratorError::ScriptFailed { exit_code, message }.into());
        }

        Ok(ScriptOutput {
            output: stdout,
            exit_code,
            error: (!stderr.is_empty()).then_some(stderr),
        })
    }

    async fn check_mongosh_available(&self) -> bool {
        match Command::new(&self.config.mongosh_path)
            .arg("--version")
            .kill_on_drop(true)
            .output()
            .await
        {
            Ok(output) => output.status.success(),
            Err(e) => {
                debug!("mongosh not available at '{}': {}", self.config.mongosh_path, e);
                false
            }
        }
    }

    async fn explain_query(&self, key: &CollectionKey, filter: &Document) -> Result<ExplainResult> {
        let client = self.client(&key.connection_id).await?;
        let db = client.database(&key.database);

        let explain_cmd = doc! {
            "explain": { "find": key.collection.as_str(), "filter": filter.clone() },
            "verbosity": "executionStats",
        };
        let raw = db
            .run_command(explain_cmd)
            .await
            .map_err(|e| CollaboratorError::ExplainFailed(e.to_string()))?;

        Ok(ExplainResult::from_explain_document(raw))
    }
}

/// Build a profile from sampled documents
///
/// # Arguments
/// * `sample` - Sampled documents
/// * `avg_obj_size` - Server-reported average size, when available
///
/// # Returns
/// * `DocumentProfile` - Average size plus top-level field frequencies
pub fn profile_from_sample(sample: &[Document], avg_obj_size: Option<f64>) -> DocumentProfile {
    let mut occurrences: HashMap<&str, usize> = HashMap::new();
    let mut sampled_bytes = 0usize;

    for doc in sample {
        for key in doc.keys() {
            *occurrences.entry(key.as_str()).or_default() += 1;
        }
        sampled_bytes += mongodb::bson::to_vec(doc).map(|bytes| bytes.len()).unwrap_or(0);
    }

    let avg_doc_size_bytes = match avg_obj_size {
        Some(size) if size > 0.0 => size,
        _ if !sample.is_empty() => sampled_bytes as f64 / sample.len() as f64,
        _ => 0.0,
    };

    let field_count = occurrences.len();
    let mut ranked: Vec<(&str, usize)> = occurrences
        .into_iter()
        .filter(|(name, _)| *name != "_id")
        .collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));

    DocumentProfile {
        avg_doc_size_bytes,
        field_count,
        top_fields: ranked
            .into_iter()
            .take(PROFILE_TOP_FIELDS)
            .map(|(name, _)| name.to_string())
            .collect(),
    }
}

fn bson_to_f64(value: &Bson) -> Option<f64> {
    match value {
        Bson::Int32(n) => Some(f64::from(*n)),
        Bson::Int64(n) => Some(*n as f64),
        Bson::Double(n) => Some(*n),
        _ => None,
    }
}
