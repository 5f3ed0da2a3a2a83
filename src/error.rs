//! Error types and error handling for the HTTP layer
//!
//! Subsystem errors convert into [`AppError`], which renders as a JSON body
//! `{"error": ..., "status": ...}` with a matching status code.

use crate::jobs::JobError;
use crate::orchestrator::OrchestratorError;
use crate::reconcile::ReconcileError;
use crate::storage::StoreError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Application-level error types
#[derive(Error, Debug)]
pub enum AppError {
    /// Request body or query is invalid
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Remote job record not found
    #[error("Job not found: {0}")]
    JobNotFound(String),

    /// Workflow not found
    #[error("Workflow not found: {0}")]
    WorkflowNotFound(String),

    /// Scan result not found
    #[error("Result not found: {0}")]
    ResultNotFound(String),

    /// Storage failure
    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    /// Cluster access failure
    #[error("{0}")]
    Jobs(#[from] JobError),

    /// Scheduler failure
    #[error("Orchestration error: {0}")]
    Orchestrator(#[from] OrchestratorError),

    /// Internal server error (catch-all for unexpected errors)
    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<ReconcileError> for AppError {
    fn from(err: ReconcileError) -> Self {
        match err {
            ReconcileError::Jobs(e) => AppError::Jobs(e),
            ReconcileError::Store(e) => AppError::Store(e),
        }
    }
}

impl AppError {
    /// HTTP status for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            AppError::JobNotFound(_)
            | AppError::WorkflowNotFound(_)
            | AppError::ResultNotFound(_) => StatusCode::NOT_FOUND,
            AppError::Orchestrator(OrchestratorError::DuplicateRequest(_))
            | AppError::Store(StoreError::Duplicate(_)) => StatusCode::CONFLICT,
            AppError::Jobs(e) if e.is_unavailable() => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Jobs(_) => StatusCode::BAD_GATEWAY,
            AppError::Store(_) | AppError::Orchestrator(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() && status != StatusCode::SERVICE_UNAVAILABLE {
            tracing::error!(error = %self, "Request failed");
        }

        let body = Json(json!({
            "error": self.to_string(),
            "status": status.as_u16(),
        }));

        (status, body).into_response()
    }
}
