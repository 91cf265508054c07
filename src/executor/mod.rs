//! Query execution for one collection view
//!
//! [`ExecutionController`] owns the view state and the execution epoch. Every
//! call to [`ExecutionController::execute_query`] allocates a new epoch and
//! captures it; after each await the pipeline re-checks under the state lock
//! that its epoch is still current and otherwise drops what it has.
//! Cancellation, collection switches and the timeout all work by moving the
//! epoch on. Backend calls are never aborted, only ignored.
//!
//! Pipeline:
//! 1. read-only guard (no epoch spent on refusal)
//! 2. epoch allocation and classification
//! 3. Simple: profile, auto-projection, adaptive page size, size guard,
//!    structured find, normalization, schema merge, history
//! 4. Complex: script run and shell output normalization

pub mod state;

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::collaborator::{Collaborator, CollectionKey, ExplainResult, FindRequest};
use crate::config::{MAX_PAGE_SIZE, QueryConfig};
use crate::error::{
    CollaboratorError, ConfigError, LensError, PolicyError, Result, UserFacingError,
};
use crate::history::{HistoryStore, QueryHistoryItem};
use crate::normalizer::{NormalizedResult, OutputNormalizer};
use crate::profile::{PagingState, ProfileEstimator};
use crate::projection::{AutoProjectionState, ProjectionPlanner, projection_json};
use crate::query::{FindQuery, QueryClassifier, QueryKind, check_read_only};
use crate::schema::{FieldObservations, SchemaCache};
use crate::validator::{Diagnostic, ValidationDebouncer};

use state::ControllerState;
pub use state::{ExecutionOutcome, QuerySnapshot, QueryStatus, ViewState};

/// Cloneable handle to one collection view's execution state
#[derive(Clone)]
pub struct ExecutionController {
    inner: Arc<ControllerInner>,
}

struct ControllerInner {
    collaborator: Arc<dyn Collaborator>,
    schema: Arc<SchemaCache>,
    history: Mutex<HistoryStore>,
    debouncer: ValidationDebouncer,
    estimator: ProfileEstimator,
    planner: ProjectionPlanner,
    query_timeout: Option<Duration>,
    state: Mutex<ControllerState>,
}

/// Aborts the timeout task when the pipeline leaves the in-flight states
struct TimeoutGuard(Option<JoinHandle<()>>);

impl Drop for TimeoutGuard {
    fn drop(&mut self) {
        if let Some(handle) = self.0.take() {
            handle.abort();
        }
    }
}

impl ExecutionController {
    /// Create a controller for the collection `key`
    ///
    /// # Arguments
    /// * `key` - Collection shown by the view
    /// * `collaborator` - Driver and script layer
    /// * `schema` - Shared schema and profile cache
    /// * `history` - Query history of the application
    /// * `config` - Query pipeline settings
    pub fn new(
        key: CollectionKey,
        collaborator: Arc<dyn Collaborator>,
        schema: Arc<SchemaCache>,
        history: HistoryStore,
        config: &QueryConfig,
    ) -> Self {
        Self {
            inner: Arc::new(ControllerInner {
                collaborator,
                schema,
                history: Mutex::new(history),
                debouncer: ValidationDebouncer::new(config.validation_debounce()),
                estimator: ProfileEstimator::from_config(config),
                planner: ProjectionPlanner::from_config(config),
                query_timeout: config.query_timeout(),
                state: Mutex::new(ControllerState::new(key, config.default_page_size as u64)),
            }),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, ControllerState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_history(&self) -> MutexGuard<'_, HistoryStore> {
        self.inner
            .history
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Copy of the current view state
    pub fn snapshot(&self) -> ViewState {
        self.lock_state().view()
    }

    pub fn epoch(&self) -> u64 {
        self.lock_state().epoch
    }

    pub fn status(&self) -> QueryStatus {
        self.lock_state().status
    }

    /// Refuse write operations from now on (or stop refusing them)
    pub fn set_read_only(&self, read_only: bool) {
        self.lock_state().read_only = read_only;
    }

    /// Replace the editor text and schedule validation
    pub fn set_query_text(&self, text: impl Into<String>) {
        let text = text.into();
        let key = {
            let mut state = self.lock_state();
            state.query_text = text.clone();
            state.key.clone()
        };
        let known = self.known_fields(&text, &key);
        self.inner.debouncer.schedule(text, known);
    }

    /// Receiver of debounced diagnostics
    pub fn subscribe_diagnostics(&self) -> watch::Receiver<Vec<Diagnostic>> {
        self.inner.debouncer.subscribe()
    }

    /// Validate the current text without waiting for the debounce delay
    pub fn validate_now(&self) -> Vec<Diagnostic> {
        let (text, key) = {
            let state = self.lock_state();
            (state.query_text.clone(), state.key.clone())
        };
        let known = self.known_fields(&text, &key);
        self.inner.debouncer.validate_now(&text, known.as_ref())
    }

    /// Sampled field names of the collection `text` would run against
    fn known_fields(&self, text: &str, view: &CollectionKey) -> Option<BTreeSet<String>> {
        match QueryClassifier::classify(text) {
            QueryKind::Simple(find) => self.inner.schema.field_names(&target_key(view, &find)),
            QueryKind::Complex => self.inner.schema.field_names(view),
        }
    }

    /// Run the current query text
    ///
    /// # Returns
    /// * `Result<ExecutionOutcome>` - How the run ended; `Err` only when the
    ///   read-only guard refused the text
    pub async fn execute_query(&self) -> Result<ExecutionOutcome> {
        let (text, read_only) = {
            let state = self.lock_state();
            (state.query_text.clone(), state.read_only)
        };

        if let Err(e) = check_read_only(&text, read_only) {
            warn!("Refused in read-only view: {}", e);
            self.lock_state().error = Some(UserFacingError::from(&e));
            return Err(e);
        }

        let snapshot = {
            let mut state = self.lock_state();
            let epoch = state.bump_epoch();
            state.status = QueryStatus::Estimating;
            state.error = None;
            state.pending_warning = None;
            QuerySnapshot {
                epoch,
                kind: QueryClassifier::classify(&text),
                text,
                key: state.key.clone(),
                paging: state.paging,
                auto_projection: state.auto_projection.clone(),
                size_guard_armed: std::mem::replace(&mut state.size_guard_armed, true),
                profile: state.profile.clone(),
            }
        };

        debug!(
            "Epoch {} on {}: {} query",
            snapshot.epoch,
            snapshot.key,
            if snapshot.kind.is_simple() { "simple" } else { "complex" }
        );

        let _timeout = self.arm_timeout(snapshot.epoch);

        match snapshot.kind.clone() {
            QueryKind::Simple(find) => self.run_simple(&snapshot, find).await,
            QueryKind::Complex => self.run_script(&snapshot).await,
        }
    }

    /// Abandon whatever is running or waiting for a size decision
    pub fn cancel_query(&self) {
        let mut state = self.lock_state();
        let epoch = state.bump_epoch();
        state.pending_warning = None;
        state.status = QueryStatus::Idle;
        info!("Query cancelled (epoch now {})", epoch);
    }

    /// Run once without the response size guard
    pub async fn bypass_size_warning_once(&self) -> Result<ExecutionOutcome> {
        {
            let mut state = self.lock_state();
            state.size_guard_armed = false;
            state.pending_warning = None;
        }
        self.execute_query().await
    }

    /// Accept the suggested page size of the pending warning and run again
    pub async fn shrink_page_to_suggestion(&self) -> Result<ExecutionOutcome> {
        {
            let mut state = self.lock_state();
            let Some(estimate) = state.pending_warning.take() else {
                return Err(LensError::Generic(
                    "No response size warning is pending".to_string(),
                ));
            };
            let skip = state.paging.skip;
            state.paging.set_user_limit(estimate.suggested_page_size);
            state.paging.skip = skip;
            info!("Page size shrunk to {}", estimate.suggested_page_size);
        }
        self.execute_query().await
    }

    /// Opt out of auto-projection for this collection session and run again
    pub async fn show_all_fields(&self) -> Result<ExecutionOutcome> {
        {
            let mut state = self.lock_state();
            state.auto_projection = AutoProjectionState::OptedOut;
            if let QueryKind::Simple(find) = QueryClassifier::classify(&state.query_text)
                && find.has_projection()
            {
                state.query_text = find.without_projection(&state.key.collection);
            }
        }
        self.execute_query().await
    }

    /// Point the view at another collection
    ///
    /// Moves the epoch on so nothing in flight for the old collection lands,
    /// and resets the per-collection session: projection marker, paging
    /// position, pending warning, size guard and profile.
    pub fn switch_collection(&self, key: CollectionKey) {
        {
            let mut state = self.lock_state();
            state.bump_epoch();
            info!("Switching view from {} to {}", state.key, key);
            state.key = key;
            state.auto_projection = AutoProjectionState::Empty;
            state.paging = PagingState::new(state.paging.user_limit);
            state.pending_warning = None;
            state.size_guard_armed = true;
            state.profile = None;
            state.documents.clear();
            state.issues.clear();
            state.status = QueryStatus::Idle;
            state.error = None;
            state.query_time_ms = None;
        }
        self.inner.debouncer.cancel();
    }

    /// Run the next page
    pub async fn next_page(&self) -> Result<ExecutionOutcome> {
        {
            let mut state = self.lock_state();
            if state.paging.has_next_page() {
                state.paging.advance();
            }
        }
        self.execute_query().await
    }

    /// Run the previous page
    pub async fn previous_page(&self) -> Result<ExecutionOutcome> {
        {
            let mut state = self.lock_state();
            if state.paging.has_previous_page() {
                state.paging.retreat();
            }
        }
        self.execute_query().await
    }

    /// Change the requested page size and run from the first page
    pub async fn set_page_size(&self, page_size: u64) -> Result<ExecutionOutcome> {
        if page_size == 0 || page_size > MAX_PAGE_SIZE as u64 {
            return Err(ConfigError::InvalidValue {
                field: "page_size".to_string(),
                value: page_size.to_string(),
            }
            .into());
        }
        self.lock_state().paging.set_user_limit(page_size);
        self.execute_query().await
    }

    /// Explain the current filter
    ///
    /// # Returns
    /// * `Result<ExplainResult>` - Plan summary; only find-style queries can be explained
    pub async fn explain_query(&self) -> Result<ExplainResult> {
        let (text, key) = {
            let state = self.lock_state();
            (state.query_text.clone(), state.key.clone())
        };
        let QueryKind::Simple(find) = QueryClassifier::classify(&text) else {
            return Err(PolicyError::RequiresSimpleQuery("Explain".to_string()).into());
        };
        let target = target_key(&key, &find);
        debug!("Explaining filter on {}", target);

        self.inner
            .collaborator
            .explain_query(&target, &find.filter)
            .await
            .inspect_err(|e| warn!("Explain failed on {}: {}", target, e))
    }

    /// History entries, newest first
    pub fn history(&self) -> Vec<QueryHistoryItem> {
        self.lock_history().items().to_vec()
    }

    pub fn clear_history(&self) {
        self.lock_history().clear();
    }

    async fn run_simple(
        &self,
        snapshot: &QuerySnapshot,
        mut find: FindQuery,
    ) -> Result<ExecutionOutcome> {
        let target = target_key(&snapshot.key, &find);
        let same_collection = target == snapshot.key;

        let profile = match snapshot.profile.clone().filter(|_| same_collection) {
            Some(profile) => Some(profile),
            None => {
                self.inner
                    .schema
                    .fetch_collection_profile(self.inner.collaborator.as_ref(), &target)
                    .await
            }
        };

        let mut paging = snapshot.paging;
        let rewritten_text = {
            let mut state = self.lock_state();
            if !state.is_current(snapshot.epoch) {
                return Ok(stale_outcome(&state, snapshot.epoch));
            }
            if same_collection {
                state.profile = profile.clone();
            }

            let marker = ProjectionPlanner::reconcile(&state.auto_projection, &find);
            let schema = self.inner.schema.cached_schema(&target);
            let planned =
                self.inner
                    .planner
                    .plan(&marker, &find, schema.as_ref(), profile.as_ref());

            let mut rewritten_text = None;
            state.auto_projection = match planned {
                Some(projection) => {
                    info!(
                        "Auto-projecting {} fields on {}",
                        projection.len(),
                        target
                    );
                    let text = find.with_projection(&target.collection, &projection);
                    state.query_text = text.clone();
                    rewritten_text = Some(text);
                    let marker = AutoProjectionState::Applied(projection_json(&projection));
                    find.projection = Some(projection);
                    marker
                }
                None => marker,
            };

            self.inner.estimator.apply(&mut paging, profile.as_ref());
            state.paging = paging;

            if snapshot.size_guard_armed
                && let Some(estimate) = self
                    .inner
                    .estimator
                    .preflight(paging.effective_limit, profile.as_ref())
            {
                info!(
                    "Estimated response {:.1} MB exceeds {:.1} MB, suggesting {} documents",
                    estimate.estimated_mb, estimate.threshold_mb, estimate.suggested_page_size
                );
                state.status = QueryStatus::WarningPending;
                state.pending_warning = Some(estimate);
                return Ok(ExecutionOutcome::WarningPending(estimate));
            }

            state.status = QueryStatus::Running;
            rewritten_text
        };

        if let Some(text) = rewritten_text {
            let known = self.inner.schema.field_names(&target);
            self.inner.debouncer.schedule(text, known);
        }

        let request = FindRequest {
            filter: find.filter.clone(),
            skip: paging.skip,
            limit: paging.effective_limit,
            sort: find.sort.clone(),
            projection: find.projection.clone(),
        };
        debug!(
            "Finding on {} (skip {}, limit {})",
            target, request.skip, request.limit
        );

        match self.inner.collaborator.find_documents(&target, request).await {
            Ok(response) => {
                let normalized = OutputNormalizer::normalize_documents(response);
                // Projected documents would hide fields from the schema
                let observations = find
                    .projection
                    .is_none()
                    .then(|| OutputNormalizer::extract_field_paths(&normalized.documents));
                let outcome = self.apply_results(
                    snapshot,
                    normalized,
                    true,
                    observations.map(|obs| (&target, obs)),
                );
                if matches!(outcome, ExecutionOutcome::Completed { .. }) {
                    self.lock_history()
                        .record(&find.filter_text(), &target.qualified_name());
                }
                Ok(outcome)
            }
            Err(e) => Ok(self.apply_failure(snapshot, e)),
        }
    }

    async fn run_script(&self, snapshot: &QuerySnapshot) -> Result<ExecutionOutcome> {
        {
            let mut state = self.lock_state();
            if !state.is_current(snapshot.epoch) {
                return Ok(stale_outcome(&state, snapshot.epoch));
            }
            state.status = QueryStatus::Running;
        }

        let key = &snapshot.key;
        let result = self
            .inner
            .collaborator
            .execute_script_with_database(&key.connection_id, &key.database, &snapshot.text)
            .await
            .and_then(|output| {
                if output.exited_cleanly() {
                    return Ok(output);
                }
                Err(CollaboratorError::ScriptFailed {
                    exit_code: output.exit_code,
                    message: output
                        .error
                        .clone()
                        .unwrap_or_else(|| output.output.trim().to_string()),
                }
                .into())
            });

        match result {
            Ok(output) => {
                if let Some(stderr) = &output.error {
                    warn!("Script on {} wrote to stderr: {}", key, stderr);
                }
                let normalized = OutputNormalizer::normalize_shell_output(&output.output);
                Ok(self.apply_results(snapshot, normalized, false, None))
            }
            Err(e) => {
                let e = if self.inner.collaborator.check_mongosh_available().await {
                    e
                } else {
                    CollaboratorError::MongoshUnavailable.into()
                };
                Ok(self.apply_failure(snapshot, e))
            }
        }
    }

    fn apply_results(
        &self,
        snapshot: &QuerySnapshot,
        normalized: NormalizedResult,
        structured: bool,
        schema_merge: Option<(&CollectionKey, FieldObservations)>,
    ) -> ExecutionOutcome {
        let mut state = self.lock_state();
        if !state.is_current(snapshot.epoch) {
            return stale_outcome(&state, snapshot.epoch);
        }

        if let Some((key, observations)) = schema_merge {
            self.inner.schema.merge_field_names(key, &observations);
        }

        let returned = normalized.documents.len();
        let total = normalized.total;
        if !normalized.issues.is_empty() {
            warn!(
                "{} of {} documents could not be parsed",
                normalized.issues.len(),
                returned
            );
        }

        state.documents = normalized.documents;
        state.issues = normalized.issues;
        if structured {
            state.paging.total = total;
        }
        state.query_time_ms = normalized.query_time_ms;
        state.status = QueryStatus::Completed;
        state.error = None;

        info!(
            "Epoch {} completed: {} documents of {}",
            snapshot.epoch, returned, total
        );
        ExecutionOutcome::Completed { returned, total }
    }

    fn apply_failure(&self, snapshot: &QuerySnapshot, err: LensError) -> ExecutionOutcome {
        let mut state = self.lock_state();
        if !state.is_current(snapshot.epoch) {
            debug!("Dropping failure of stale epoch {}: {}", snapshot.epoch, err);
            return stale_outcome(&state, snapshot.epoch);
        }

        error!(
            "Query on {} failed: {} (query: {})",
            snapshot.key,
            err,
            crate::utils::string::truncate(&snapshot.text, 200)
        );
        let report = UserFacingError::from(&err);
        state.status = QueryStatus::Failed;
        state.documents.clear();
        state.issues.clear();
        state.error = Some(report.clone());
        ExecutionOutcome::Failed(report)
    }

    fn arm_timeout(&self, epoch: u64) -> TimeoutGuard {
        let Some(timeout) = self.inner.query_timeout else {
            return TimeoutGuard(None);
        };
        let inner = Arc::downgrade(&self.inner);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(inner) = inner.upgrade() {
                ExecutionController { inner }.expire(epoch, timeout);
            }
        });
        TimeoutGuard(Some(handle))
    }

    fn expire(&self, epoch: u64, timeout: Duration) {
        let mut state = self.lock_state();
        if !state.is_current(epoch) || !state.status.is_in_flight() {
            return;
        }

        state.bump_epoch();
        state.timed_out_epoch = Some(epoch);
        state.status = QueryStatus::TimedOut;
        state.documents.clear();
        state.issues.clear();
        state.pending_warning = None;
        let err = LensError::from(CollaboratorError::Timeout {
            seconds: timeout.as_secs(),
        });
        warn!("Epoch {} timed out after {:?}", epoch, timeout);
        state.error = Some(UserFacingError::from(&err));
    }
}

/// Collection a Simple query runs against: the one it names, else the view's
fn target_key(view: &CollectionKey, find: &FindQuery) -> CollectionKey {
    match &find.collection {
        Some(collection) if *collection != view.collection => view.with_collection(collection),
        _ => view.clone(),
    }
}

fn stale_outcome(state: &ControllerState, epoch: u64) -> ExecutionOutcome {
    if state.timed_out_epoch == Some(epoch) {
        ExecutionOutcome::TimedOut
    } else {
        debug!("Epoch {} superseded by {}", epoch, state.epoch);
        ExecutionOutcome::Superseded
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_key_prefers_named_collection() {
        let view = CollectionKey::new("c", "shop", "orders");
        let find = QueryClassifier::classify("db.users.find({})");
        let find = find.as_simple().unwrap();
        assert_eq!(target_key(&view, find).collection, "users");

        let bare = QueryClassifier::classify("{ a: 1 }");
        assert_eq!(target_key(&view, bare.as_simple().unwrap()), view);
    }

    #[test]
    fn test_stale_outcome() {
        let mut state = ControllerState::new(CollectionKey::new("c", "d", "e"), 10);
        state.bump_epoch();
        state.bump_epoch();
        assert_eq!(stale_outcome(&state, 1), ExecutionOutcome::Superseded);
        state.timed_out_epoch = Some(1);
        assert_eq!(stale_outcome(&state, 1), ExecutionOutcome::TimedOut);
    }
}
