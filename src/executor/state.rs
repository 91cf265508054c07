//! State owned by one collection view

use mongodb::bson::Document;
use serde::{Deserialize, Serialize};

use crate::collaborator::{CollectionKey, DocumentProfile};
use crate::error::UserFacingError;
use crate::normalizer::DocumentIssue;
use crate::profile::{PagingState, ResponseSizeEstimate};
use crate::projection::AutoProjectionState;
use crate::query::QueryKind;

/// Lifecycle of the current query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueryStatus {
    Idle,
    /// Profiling and planning before any find is issued
    Estimating,
    /// Stopped by the response size guard, waiting for the user
    WarningPending,
    Running,
    Completed,
    Failed,
    TimedOut,
}

impl QueryStatus {
    /// Whether a request for the current epoch is still outstanding
    pub fn is_in_flight(&self) -> bool {
        matches!(self, QueryStatus::Estimating | QueryStatus::Running)
    }
}

/// How one `execute_query` call ended
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    /// Results were applied
    Completed { returned: usize, total: u64 },
    /// The response size guard stopped the query
    WarningPending(ResponseSizeEstimate),
    /// The collaborator failed; the error is shown in the view
    Failed(UserFacingError),
    /// The timeout fired before the results arrived
    TimedOut,
    /// A newer epoch took over; nothing was applied
    Superseded,
}

/// Immutable inputs of one execution, captured when its epoch is allocated
#[derive(Debug, Clone)]
pub struct QuerySnapshot {
    pub epoch: u64,
    pub text: String,
    pub kind: QueryKind,
    pub key: CollectionKey,
    pub paging: PagingState,
    pub auto_projection: AutoProjectionState,
    pub size_guard_armed: bool,
    pub profile: Option<DocumentProfile>,
}

/// Read-only copy of the view state
#[derive(Debug, Clone, PartialEq)]
pub struct ViewState {
    pub epoch: u64,
    pub status: QueryStatus,
    pub key: CollectionKey,
    pub query_text: String,
    pub documents: Vec<Document>,
    pub issues: Vec<DocumentIssue>,
    pub paging: PagingState,
    pub auto_projection: AutoProjectionState,
    pub pending_warning: Option<ResponseSizeEstimate>,
    pub error: Option<UserFacingError>,
    pub query_time_ms: Option<u64>,
    pub read_only: bool,
}

/// Mutable state behind the controller's lock
#[derive(Debug)]
pub(crate) struct ControllerState {
    pub epoch: u64,
    pub status: QueryStatus,
    pub key: CollectionKey,
    pub query_text: String,
    pub documents: Vec<Document>,
    pub issues: Vec<DocumentIssue>,
    pub paging: PagingState,
    /// Profile of the current collection, dropped on collection switch
    pub profile: Option<DocumentProfile>,
    pub auto_projection: AutoProjectionState,
    pub pending_warning: Option<ResponseSizeEstimate>,
    /// When false, the next execution skips the response size guard
    pub size_guard_armed: bool,
    pub error: Option<UserFacingError>,
    pub query_time_ms: Option<u64>,
    pub read_only: bool,
    /// Epoch that the timeout last ended
    pub timed_out_epoch: Option<u64>,
}

impl ControllerState {
    pub fn new(key: CollectionKey, page_size: u64) -> Self {
        Self {
            epoch: 0,
            status: QueryStatus::Idle,
            key,
            query_text: String::new(),
            documents: Vec::new(),
            issues: Vec::new(),
            paging: PagingState::new(page_size),
            profile: None,
            auto_projection: AutoProjectionState::Empty,
            pending_warning: None,
            size_guard_armed: true,
            error: None,
            query_time_ms: None,
            read_only: false,
            timed_out_epoch: None,
        }
    }

    pub fn is_current(&self, epoch: u64) -> bool {
        self.epoch == epoch
    }

    /// Allocate the next epoch
    pub fn bump_epoch(&mut self) -> u64 {
        self.epoch += 1;
        self.epoch
    }

    pub fn view(&self) -> ViewState {
        ViewState {
            epoch: self.epoch,
            status: self.status,
            key: self.key.clone(),
            query_text: self.query_text.clone(),
            documents: self.documents.clone(),
            issues: self.issues.clone(),
            paging: self.paging,
            auto_projection: self.auto_projection.clone(),
            pending_warning: self.pending_warning,
            error: self.error.clone(),
            query_time_ms: self.query_time_ms,
            read_only: self.read_only,
        }
    }
}
