//! Scan API handlers
//!
//! Submission runs the scheduler to completion and returns its results.

use super::AppState;
use crate::error::AppError;
use crate::models::{ExecutionMode, ScanRequest, ScanResult, Workflow};
use axum::{
    extract::{Path, Query, State},
    response::Json,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

const DEFAULT_HISTORY_LIMIT: i64 = 50;

/// Scan submission body
#[derive(Debug, Deserialize)]
pub struct ScanBody {
    /// Request id; generated when absent
    pub id: Option<String>,
    /// Target to scan
    pub target: Option<String>,
    /// Agents to run; empty runs the defaults
    #[serde(default)]
    pub agents: Vec<String>,
    /// Caller priority
    #[serde(default)]
    pub priority: i64,
    /// Workflow to attach to
    pub workflow_id: Option<String>,
    /// `local` or `k8s`
    pub execution_mode: Option<ExecutionMode>,
}

/// Limit query
#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    /// Maximum number of rows
    pub limit: Option<i64>,
}

/// POST /scan - Run a scan and return its results
pub async fn run_scan(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ScanBody>,
) -> Result<Json<Vec<ScanResult>>, AppError> {
    let target = body
        .target
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| AppError::InvalidRequest("must include 'target'".to_string()))?;

    let request = ScanRequest {
        id: body.id.unwrap_or_else(|| Uuid::new_v4().to_string()),
        target,
        requested_agents: body.agents,
        priority: body.priority,
        workflow_id: body.workflow_id,
        execution_mode: body.execution_mode,
    };
    info!(request_id = %request.id, target = %request.target, "Scan requested");

    let results = state.orchestrator.run_scan(request).await?;
    Ok(Json(results))
}

/// GET /history - Most recent scan requests
pub async fn list_history(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LimitQuery>,
) -> Result<Json<Vec<ScanRequest>>, AppError> {
    let limit = query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
    Ok(Json(state.store.list_scan_history(limit).await?))
}

/// GET /results/:request_id - Results recorded for a request
pub async fn get_results(
    State(state): State<Arc<AppState>>,
    Path(request_id): Path<String>,
) -> Result<Json<Vec<ScanResult>>, AppError> {
    Ok(Json(state.store.get_scan_results(&request_id).await?))
}

/// GET /report/:result_id - One result
pub async fn get_report(
    State(state): State<Arc<AppState>>,
    Path(result_id): Path<String>,
) -> Result<Json<ScanResult>, AppError> {
    state
        .store
        .get_scan_report(&result_id)
        .await?
        .map(Json)
        .ok_or(AppError::ResultNotFound(result_id))
}

/// GET /workflow/:workflow_id - A workflow with its steps
pub async fn get_workflow(
    State(state): State<Arc<AppState>>,
    Path(workflow_id): Path<String>,
) -> Result<Json<Workflow>, AppError> {
    state
        .store
        .get_workflow(&workflow_id)
        .await?
        .map(Json)
        .ok_or(AppError::WorkflowNotFound(workflow_id))
}
