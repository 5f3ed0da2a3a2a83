//! Remote job status reconciliation
//!
//! One pass over the records still marked `pending` or `running`, bringing
//! them in line with what the cluster reports. Runs out of band of the
//! scheduler (CronJob via the `poll-jobs` binary, or on demand from the API).

use crate::jobs::{JobError, JobManager};
use crate::models::{now_iso, RemoteJobRecord, RemoteJobStatus};
use crate::storage::{RemoteJobUpdate, ScanStore, StoreError};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Records examined per pass when no limit is given
pub const DEFAULT_POLL_LIMIT: i64 = 500;

/// Errors raised by a reconciliation pass
#[derive(Error, Debug)]
pub enum ReconcileError {
    /// Cluster access failed or is not configured
    #[error(transparent)]
    Jobs(#[from] JobError),

    /// Records could not be read or written
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Outcome of one pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PollSummary {
    /// Active records examined
    pub polled: usize,
    /// Records whose status changed
    pub updated: usize,
}

/// Build the update for a status change, or `None` when nothing changed
///
/// `unknown` never overwrites a known status: the record stays active and is
/// retried on the next pass.
pub fn status_transition(
    record: &RemoteJobRecord,
    live: RemoteJobStatus,
) -> Option<RemoteJobUpdate> {
    if live == record.status || live == RemoteJobStatus::Unknown {
        return None;
    }

    let mut update = RemoteJobUpdate::status(live);
    if live == RemoteJobStatus::Running && record.started_at.is_none() {
        update = update.started_at(now_iso());
    }
    if live.is_terminal() {
        update = update.completed_at(now_iso());
    }
    Some(update)
}

/// Refresh one record from the cluster, persisting any change
///
/// Returns whether the record changed.
pub async fn refresh_job(
    store: &dyn ScanStore,
    jobs: &JobManager,
    record: &mut RemoteJobRecord,
) -> Result<bool, ReconcileError> {
    let live = jobs.get_job_status(&record.job_name).await?;
    let Some(update) = status_transition(record, live) else {
        return Ok(false);
    };

    debug!(
        job_id = %record.id,
        job_name = %record.job_name,
        from = %record.status,
        to = %live,
        "Remote job status changed"
    );
    store.update_remote_job_status(&record.id, update.clone()).await?;

    record.status = update.status;
    if update.started_at.is_some() {
        record.started_at = update.started_at;
    }
    if update.completed_at.is_some() {
        record.completed_at = update.completed_at;
    }
    Ok(true)
}

/// Reconcile up to `limit` active records
///
/// A record that fails to refresh is logged and left for the next pass.
pub async fn poll_active_jobs(
    store: &dyn ScanStore,
    jobs: &JobManager,
    limit: i64,
) -> Result<PollSummary, ReconcileError> {
    if !jobs.enabled() {
        return Err(JobError::Unavailable(
            "Kubernetes job execution is not available; poller cannot run".to_string(),
        )
        .into());
    }

    let active = store.list_active_remote_jobs(limit).await?;
    let mut summary = PollSummary {
        polled: active.len(),
        updated: 0,
    };

    for mut record in active {
        match refresh_job(store, jobs, &mut record).await {
            Ok(true) => summary.updated += 1,
            Ok(false) => {}
            Err(e) => warn!(job_id = %record.id, error = %e, "Failed to reconcile remote job"),
        }
    }

    info!(polled = summary.polled, updated = summary.updated, "Reconciliation pass finished");
    Ok(summary)
}
