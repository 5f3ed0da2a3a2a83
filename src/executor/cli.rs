//! CLI executor implementation
//!
//! Executes scanning tools by spawning processes and capturing their output.

use crate::executor::error::ExecutionError;
use std::io::ErrorKind;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, error, info};

/// Captured result of a finished process
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessOutput {
    /// Trimmed standard output
    pub stdout: String,
    /// Trimmed standard error
    pub stderr: String,
    /// Exit code, `-1` when the process was terminated by a signal
    pub exit_code: i32,
    /// Wall-clock run time
    pub duration: Duration,
}

impl ProcessOutput {
    /// Whether the process exited with code 0
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// CLI executor for running tool processes
#[derive(Debug, Clone)]
pub struct CliExecutor {
    /// Default timeout for process execution
    default_timeout: Duration,
}

impl CliExecutor {
    /// Create a new CLI executor with a timeout in seconds
    pub fn new(default_timeout_secs: u64) -> Self {
        Self::with_timeout(Duration::from_secs(default_timeout_secs))
    }

    /// Create a new CLI executor with an explicit timeout
    pub fn with_timeout(default_timeout: Duration) -> Self {
        Self { default_timeout }
    }

    /// Get the default timeout duration
    pub fn timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Run `command` with `args` and capture its output
    ///
    /// # Returns
    /// * `Ok(ProcessOutput)` - The process ran to completion (any exit code)
    /// * `Err(ExecutionError)` - The process could not be spawned or timed out
    pub async fn execute(
        &self,
        command: &str,
        args: &[String],
    ) -> Result<ProcessOutput, ExecutionError> {
        info!(command = %command, arg_count = args.len(), "Executing tool");

        let mut cmd = Command::new(command);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // Dropping the output future on timeout kills the child.
            .kill_on_drop(true);

        debug!(command = %command, args = ?args, "Spawning process");

        let started = Instant::now();
        match timeout(self.default_timeout, cmd.output()).await {
            Ok(Ok(output)) => {
                let result = ProcessOutput {
                    stdout: String::from_utf8_lossy(&output.stdout).trim().to_string(),
                    stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
                    exit_code: output.status.code().unwrap_or(-1),
                    duration: started.elapsed(),
                };

                if result.success() {
                    info!(
                        command = %command,
                        stdout_len = result.stdout.len(),
                        duration_ms = result.duration.as_millis(),
                        "Tool finished"
                    );
                } else {
                    error!(
                        command = %command,
                        exit_code = result.exit_code,
                        stderr = %result.stderr,
                        "Tool exited with non-zero status"
                    );
                }

                Ok(result)
            }
            Ok(Err(e)) if e.kind() == ErrorKind::NotFound => {
                error!(command = %command, "Tool not found in PATH");
                Err(ExecutionError::CommandNotFound(command.to_string()))
            }
            Ok(Err(e)) => {
                error!(command = %command, error = %e, "Failed to spawn or execute process");
                Err(ExecutionError::SpawnFailed(e))
            }
            Err(_) => {
                error!(
                    command = %command,
                    timeout_secs = self.default_timeout.as_secs(),
                    "Process execution timed out"
                );
                Err(ExecutionError::Timeout(self.default_timeout.as_secs()))
            }
        }
    }
}
