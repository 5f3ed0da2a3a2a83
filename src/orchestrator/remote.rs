//! Remote step dispatch
//!
//! Submits a step as a Kubernetes Job. The scheduler's work ends at
//! submission; the job's outcome is picked up later by reconciliation.

use super::{Run, Shared};
use crate::jobs::{build_job_name, job_salt, sanitize_job_name, JobSpec};
use crate::models::{
    now_iso, RemoteJobRecord, RemoteJobStatus, ScanResult, ScanStatus, StepStatus, WorkflowStep,
};
use crate::storage::RemoteJobUpdate;
use tracing::{info, warn};
use uuid::Uuid;

/// Value of the `app` label on every job
pub const APP_LABEL: &str = "scan-orchestrator";

pub(super) fn job_spec(
    shared: &Shared,
    job_name: &str,
    step: &WorkflowStep,
    target: &str,
    request_id: &str,
) -> JobSpec {
    let remote = &shared.config.remote;
    let mut spec = JobSpec::new(job_name, remote.image.as_str());
    spec.command = remote.command.clone();
    spec.args = vec![
        "--agent".to_string(),
        step.agent.clone(),
        "--target".to_string(),
        target.to_string(),
        "--request-id".to_string(),
        request_id.to_string(),
    ];
    spec.labels.insert("app".to_string(), APP_LABEL.to_string());
    spec.labels
        .insert("scan-request-id".to_string(), sanitize_job_name(request_id));
    spec.labels
        .insert("agent".to_string(), sanitize_job_name(&step.agent));
    spec.annotations
        .insert("scan-orchestrator/step-id".to_string(), step.id.clone());
    spec.annotations
        .insert("scan-orchestrator/target".to_string(), target.to_string());
    spec
}

pub(super) async fn submit(shared: &Shared, run: &Run, step: &WorkflowStep, target: &str) {
    let request = &run.request;
    let job_id = Uuid::new_v4().to_string();
    let job_name = build_job_name(&step.agent, &request.id, &job_salt());
    let namespace = shared.jobs.namespace().to_string();

    let record = RemoteJobRecord::pending(
        job_id.as_str(),
        request.id.as_str(),
        step.agent.as_str(),
        target,
        job_name.as_str(),
        namespace.as_str(),
    );
    if let Err(e) = shared.store.save_remote_job(&record).await {
        if shared.config.remote.strict || request.wants_remote() {
            // No job without a record to reconcile it.
            let message = format!("Failed to persist remote job record: {}", e);
            warn!(step_id = %step.id, job_id = %job_id, error = %message, "Remote submission failed");
            let result = failed_result(run, step, &message, job_id, job_name);
            run.record_failure(shared, step, message, Some(result)).await;
            return;
        }
        warn!(job_id = %job_id, error = %e, "Failed to persist remote job record");
    }

    let spec = job_spec(shared, &job_name, step, target, &request.id);
    match shared.jobs.create_job(&spec).await {
        Ok(created) => {
            info!(
                step_id = %step.id,
                job_id = %job_id,
                job_name = %created.job_name,
                namespace = %created.namespace,
                "Scheduled remote step"
            );
            let result = ScanResult::new(
                step.result_id(),
                request.id.as_str(),
                step.agent.as_str(),
                ScanStatus::Scheduled,
            )
            .with_metadata("job_id", job_id)
            .with_metadata("job_name", created.job_name)
            .with_metadata("namespace", created.namespace)
            .with_metadata("execution_mode", "k8s");
            run.record_result(shared, step, result).await;
        }
        Err(e) => {
            let message = e.to_string();
            let update = RemoteJobUpdate::status(RemoteJobStatus::Failed)
                .completed_at(now_iso())
                .error_message(message.as_str());
            if let Err(store_err) = shared.store.update_remote_job_status(&job_id, update).await {
                warn!(job_id = %job_id, error = %store_err, "Failed to mark remote job failed");
            }

            if shared.config.remote.strict || request.wants_remote() {
                warn!(step_id = %step.id, job_id = %job_id, error = %message, "Remote submission failed");
                let result = failed_result(run, step, &message, job_id, job_name);
                run.record_failure(shared, step, message, Some(result)).await;
            } else {
                // No local fallback is attempted; the step simply ends here.
                warn!(
                    step_id = %step.id,
                    job_id = %job_id,
                    unavailable = e.is_unavailable(),
                    error = %message,
                    "Remote submission failed, dropping step"
                );
                run.set_step_status(shared, &step.id, StepStatus::Failed, None)
                    .await;
            }
        }
    }
}

fn failed_result(
    run: &Run,
    step: &WorkflowStep,
    message: &str,
    job_id: String,
    job_name: String,
) -> ScanResult {
    ScanResult::new(
        step.result_id(),
        run.request.id.as_str(),
        step.agent.as_str(),
        ScanStatus::Failed,
    )
    .with_metadata("error", message)
    .with_metadata("job_id", job_id)
    .with_metadata("job_name", job_name)
    .with_metadata("execution_mode", "k8s")
}
