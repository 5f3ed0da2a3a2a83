//! Entry point executed inside a Kubernetes Job
//!
//! Runs a single tool against a target and prints the scan result as JSON on
//! stdout so it can be collected from the pod log. Diagnostics go to stderr.
//!
//! ```text
//! scan-job-runner --agent nmap --target example.com --request-id req-123
//! ```

use clap::Parser;
use scan_orchestrator::agents::AgentRegistry;
use scan_orchestrator::executor::CliExecutor;
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(name = "scan-job-runner")]
#[command(about = "Run one scanning tool and print its result as JSON", long_about = None)]
struct Args {
    /// Agent/tool name (e.g. nmap, nikto, sqlmap)
    #[arg(long)]
    agent: String,

    /// Target to scan
    #[arg(long)]
    target: String,

    /// Scan request id
    #[arg(long)]
    request_id: String,

    /// Per-tool timeout in seconds
    #[arg(long, env = "TOOL_TIMEOUT_SECS", default_value_t = 60)]
    timeout_secs: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let registry = AgentRegistry::with_builtin_tools(CliExecutor::new(args.timeout_secs));

    let (result, code) = registry
        .run_standalone(&args.agent, &args.target, &args.request_id)
        .await;
    tracing::info!(agent = %args.agent, status = %result.status, exit_code = code, "Tool run finished");

    println!("{}", serde_json::to_string(&result)?);
    Ok(ExitCode::from(u8::try_from(code).unwrap_or(1)))
}
