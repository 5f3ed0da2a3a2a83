//! API module
//!
//! HTTP handlers for scan submission, history and remote job management.

pub mod jobs;
pub mod recommendations;
pub mod scans;

use crate::jobs::JobManager;
use crate::orchestrator::Orchestrator;
use crate::policy::{NoFollowUp, Recommender};
use crate::storage::ScanStore;
use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;

/// Shared state handed to every handler
#[derive(Clone)]
pub struct AppState {
    /// Scheduler
    pub orchestrator: Arc<Orchestrator>,
    /// Persistence gateway
    pub store: Arc<dyn ScanStore>,
    /// Job lifecycle manager
    pub jobs: Arc<JobManager>,
    /// Remediation advice backend
    pub recommender: Arc<dyn Recommender>,
}

impl AppState {
    /// State sharing the orchestrator's store and job manager
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        let store = orchestrator.store().clone();
        let jobs = orchestrator.jobs().clone();
        Self {
            orchestrator,
            store,
            jobs,
            recommender: Arc::new(NoFollowUp),
        }
    }

    /// Replace the recommendation backend
    pub fn with_recommender(mut self, recommender: Arc<dyn Recommender>) -> Self {
        self.recommender = recommender;
        self
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    k8s_enabled: bool,
}

/// GET /api/health - Health check endpoint
async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        k8s_enabled: state.jobs.enabled(),
    })
}

/// All routes, without middleware
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/health", get(health_check))
        // Scans
        .route("/scan", post(scans::run_scan))
        .route("/history", get(scans::list_history))
        .route("/results/:request_id", get(scans::get_results))
        .route("/report/:result_id", get(scans::get_report))
        .route("/workflow/:workflow_id", get(scans::get_workflow))
        .route("/recommendations", post(recommendations::recommend))
        // Remote jobs
        .route("/jobs", get(jobs::list_jobs))
        .route("/jobs/:job_id", get(jobs::get_job))
        .route("/jobs/:job_id/logs", get(jobs::get_job_logs))
        .route("/jobs/:job_id/cancel", post(jobs::cancel_job))
        .with_state(state)
}
