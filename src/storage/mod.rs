//! Persistence gateway
//!
//! The scheduler depends only on [`ScanStore`]: a small CRUD/upsert contract
//! keyed by string ids with JSON-shaped payloads. Upserts by id are idempotent,
//! so re-processing the same step or result never duplicates a row.
//! [`SqliteStore`] is the shipped implementation.

pub mod sqlite;

use crate::models::{
    JsonMap, RemoteJobRecord, RemoteJobStatus, ScanRequest, ScanResult, UnknownVariant, Workflow,
    WorkflowState, WorkflowStep,
};
use async_trait::async_trait;
pub use sqlite::SqliteStore;
use thiserror::Error;

/// Errors raised by the persistence layer
#[derive(Error, Debug)]
pub enum StoreError {
    /// Connection could not be established
    #[error("Failed to connect to database: {0}")]
    Connection(String),

    /// Schema migration failed
    #[error("Migration failed: {0}")]
    Migration(String),

    /// Query failed
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// JSON column could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A row with this id already exists
    #[error("Duplicate id: {0}")]
    Duplicate(String),

    /// A stored status did not parse
    #[error("Corrupt row: {0}")]
    Corrupt(#[from] UnknownVariant),
}

/// Partial update of a remote job record
///
/// `None` fields keep their stored value.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteJobUpdate {
    /// New status
    pub status: RemoteJobStatus,
    /// Start timestamp
    pub started_at: Option<String>,
    /// Completion timestamp
    pub completed_at: Option<String>,
    /// Error text
    pub error_message: Option<String>,
    /// Replacement metadata
    pub metadata: Option<JsonMap>,
}

impl RemoteJobUpdate {
    /// Change only the status
    pub fn status(status: RemoteJobStatus) -> Self {
        Self {
            status,
            started_at: None,
            completed_at: None,
            error_message: None,
            metadata: None,
        }
    }

    /// Also set the start timestamp
    pub fn started_at(mut self, at: impl Into<String>) -> Self {
        self.started_at = Some(at.into());
        self
    }

    /// Also set the completion timestamp
    pub fn completed_at(mut self, at: impl Into<String>) -> Self {
        self.completed_at = Some(at.into());
        self
    }

    /// Also set the error message
    pub fn error_message(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }

    /// Also replace the metadata
    pub fn metadata(mut self, metadata: JsonMap) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Filter for listing remote job records
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteJobFilter {
    /// Only records in this status
    pub status: Option<RemoteJobStatus>,
    /// Only records for this request
    pub request_id: Option<String>,
    /// Maximum number of records
    pub limit: i64,
}

impl Default for RemoteJobFilter {
    fn default() -> Self {
        Self {
            status: None,
            request_id: None,
            limit: 50,
        }
    }
}

/// Durable store for workflows, steps, requests, results and remote job records
#[async_trait]
pub trait ScanStore: Send + Sync {
    /// Upsert a workflow together with all of its steps
    async fn save_workflow(&self, workflow: &Workflow) -> Result<(), StoreError>;

    /// Upsert one workflow step
    async fn save_workflow_step(&self, step: &WorkflowStep) -> Result<(), StoreError>;

    /// Load a workflow with its steps in creation order
    async fn get_workflow(&self, id: &str) -> Result<Option<Workflow>, StoreError>;

    /// Change a workflow's lifecycle state
    async fn update_workflow_state(&self, id: &str, state: WorkflowState)
        -> Result<(), StoreError>;

    /// Insert a scan request; [`StoreError::Duplicate`] if the id already exists
    async fn save_scan_request(&self, request: &ScanRequest) -> Result<(), StoreError>;

    /// Most recent scan requests first
    async fn list_scan_history(&self, limit: i64) -> Result<Vec<ScanRequest>, StoreError>;

    /// Upsert a scan result
    async fn save_scan_result(&self, result: &ScanResult) -> Result<(), StoreError>;

    /// All results recorded for a request
    async fn get_scan_results(&self, request_id: &str) -> Result<Vec<ScanResult>, StoreError>;

    /// A single result by id
    async fn get_scan_report(&self, result_id: &str) -> Result<Option<ScanResult>, StoreError>;

    /// Upsert a remote job record
    async fn save_remote_job(&self, record: &RemoteJobRecord) -> Result<(), StoreError>;

    /// Apply a partial status update to a remote job record
    async fn update_remote_job_status(
        &self,
        id: &str,
        update: RemoteJobUpdate,
    ) -> Result<(), StoreError>;

    /// A remote job record by id
    async fn get_remote_job(&self, id: &str) -> Result<Option<RemoteJobRecord>, StoreError>;

    /// Records in `pending` or `running`, newest first
    async fn list_active_remote_jobs(&self, limit: i64)
        -> Result<Vec<RemoteJobRecord>, StoreError>;

    /// Records matching a filter, newest first
    async fn list_remote_jobs(
        &self,
        filter: &RemoteJobFilter,
    ) -> Result<Vec<RemoteJobRecord>, StoreError>;
}
