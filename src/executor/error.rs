//! Execution-specific error types
//!
//! Errors that can occur while running a tool subprocess (spawning, timeouts).
//! A non-zero exit code is not an error at this level; it becomes a failed
//! scan result.

use thiserror::Error;

/// Errors that can occur during tool execution
///
/// Every variant is treated as a transient step failure by the scheduler and
/// is eligible for retry.
#[derive(Error, Debug)]
pub enum ExecutionError {
    /// Command execution exceeded the timeout limit; the process was killed
    #[error("Command execution timed out after {0} seconds")]
    Timeout(u64),

    /// Failed to spawn the process (e.g., permission denied)
    #[error("Failed to spawn process: {0}")]
    SpawnFailed(#[from] std::io::Error),

    /// Command executable was not found in PATH
    #[error("Command not found: {0}")]
    CommandNotFound(String),

    /// The agent failed for a reason of its own
    #[error("Agent failed: {0}")]
    AgentFailed(String),
}
