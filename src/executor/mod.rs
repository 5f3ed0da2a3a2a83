//! Tool execution module
//!
//! Runs external scanning tools as subprocesses with a per-process timeout and
//! captures their output.

pub mod cli;
pub mod error;

pub use cli::{CliExecutor, ProcessOutput};
pub use error::ExecutionError;
