//! Remote job API handlers
//!
//! Map directly onto the job manager and the stored job records.

use super::AppState;
use crate::error::AppError;
use crate::models::{now_iso, RemoteJobRecord, RemoteJobStatus};
use crate::reconcile::refresh_job;
use crate::storage::{RemoteJobFilter, RemoteJobUpdate};
use axum::{
    extract::{Path, Query, State},
    response::Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

const DEFAULT_TAIL_LINES: u32 = 2000;

/// Filters for listing jobs
#[derive(Debug, Deserialize)]
pub struct JobsQuery {
    /// Only jobs in this status
    pub status: Option<String>,
    /// Only jobs for this request
    pub request_id: Option<String>,
    /// Maximum number of jobs
    pub limit: Option<i64>,
}

/// Log tail query
#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    /// Number of lines from the end
    pub tail: Option<u32>,
}

/// Cancel response
#[derive(Debug, Serialize)]
pub struct CancelResponse {
    /// Always `cancelled`
    pub status: RemoteJobStatus,
    /// Cancelled record
    pub job_id: String,
}

async fn find_job(state: &AppState, job_id: &str) -> Result<RemoteJobRecord, AppError> {
    state
        .store
        .get_remote_job(job_id)
        .await?
        .ok_or_else(|| AppError::JobNotFound(job_id.to_string()))
}

/// GET /jobs - List remote job records
pub async fn list_jobs(
    State(state): State<Arc<AppState>>,
    Query(query): Query<JobsQuery>,
) -> Result<Json<Vec<RemoteJobRecord>>, AppError> {
    let status = query
        .status
        .as_deref()
        .map(str::parse::<RemoteJobStatus>)
        .transpose()
        .map_err(|e| AppError::InvalidRequest(e.to_string()))?;

    let filter = RemoteJobFilter {
        status,
        request_id: query.request_id,
        limit: query.limit.unwrap_or(RemoteJobFilter::default().limit),
    };
    Ok(Json(state.store.list_remote_jobs(&filter).await?))
}

/// GET /jobs/:job_id - One record, refreshed from the cluster while active
pub async fn get_job(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> Result<Json<RemoteJobRecord>, AppError> {
    let mut record = find_job(&state, &job_id).await?;

    if record.status.is_active() {
        if let Err(e) = refresh_job(state.store.as_ref(), &state.jobs, &mut record).await {
            debug!(job_id = %job_id, error = %e, "Live status refresh skipped");
        }
    }

    Ok(Json(record))
}

/// GET /jobs/:job_id/logs - Tail of the job's pod log
pub async fn get_job_logs(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
    Query(query): Query<LogsQuery>,
) -> Result<String, AppError> {
    let record = find_job(&state, &job_id).await?;
    let tail = query.tail.unwrap_or(DEFAULT_TAIL_LINES);
    Ok(state.jobs.get_job_logs(&record.job_name, tail).await?)
}

/// POST /jobs/:job_id/cancel - Delete the job and its pods, mark it cancelled
pub async fn cancel_job(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> Result<Json<CancelResponse>, AppError> {
    let record = find_job(&state, &job_id).await?;

    state.jobs.delete_job(&record.job_name, true).await?;
    state
        .store
        .update_remote_job_status(
            &job_id,
            RemoteJobUpdate::status(RemoteJobStatus::Cancelled).completed_at(now_iso()),
        )
        .await?;

    info!(job_id = %job_id, job_name = %record.job_name, "Cancelled remote job");
    Ok(Json(CancelResponse {
        status: RemoteJobStatus::Cancelled,
        job_id,
    }))
}
