//! One reconciliation pass over active remote jobs
//!
//! Meant to run on a schedule (e.g. a Kubernetes CronJob). Exits non-zero when
//! the cluster is unreachable.

use clap::Parser;
use scan_orchestrator::config::Config;
use scan_orchestrator::jobs::JobManager;
use scan_orchestrator::reconcile::{poll_active_jobs, DEFAULT_POLL_LIMIT};
use scan_orchestrator::storage::SqliteStore;

#[derive(Debug, Parser)]
#[command(name = "poll-jobs")]
#[command(about = "Refresh stored remote job statuses from the cluster", long_about = None)]
struct Args {
    /// Maximum number of active records to examine
    #[arg(long, default_value_t = DEFAULT_POLL_LIMIT)]
    limit: i64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = Config::from_env();

    let store = SqliteStore::connect(&config.persistence.database_url).await?;
    let jobs = JobManager::from_env(config.k8s.namespace.as_str());

    let summary = poll_active_jobs(&store, &jobs, args.limit).await?;
    println!("polled={} updated={}", summary.polled, summary.updated);
    Ok(())
}
