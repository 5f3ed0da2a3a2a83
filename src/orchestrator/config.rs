//! Orchestrator configuration
//!
//! Concurrency, retry and remote-routing settings for the scheduler.

use super::OrchestratorError;
use crate::models::ExecutionMode;
use serde::Serialize;
use std::collections::BTreeSet;

/// Default container image for remote steps
pub const DEFAULT_JOB_IMAGE: &str = "scan-orchestrator-runner:latest";

/// Scheduler configuration
#[derive(Debug, Clone, Serialize)]
pub struct OrchestratorConfig {
    /// Maximum number of steps executing at once
    pub max_concurrency: usize,
    /// Extra attempts after a failed local run
    pub max_retries: u32,
    /// Remote (Kubernetes Job) routing
    pub remote: RemoteExecutionConfig,
}

/// When and how steps are dispatched as Kubernetes Jobs
#[derive(Debug, Clone, Serialize)]
pub struct RemoteExecutionConfig {
    /// Master switch for remote dispatch
    pub enabled: bool,
    /// Agents always routed remotely when enabled
    pub agents: BTreeSet<String>,
    /// Surface backend unavailability as a failed result even when not explicitly requested
    pub strict: bool,
    /// Runner image
    pub image: String,
    /// Entrypoint inside the runner image
    pub command: Vec<String>,
}

impl Default for RemoteExecutionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            agents: BTreeSet::new(),
            strict: false,
            image: DEFAULT_JOB_IMAGE.to_string(),
            command: vec!["scan-job-runner".to_string()],
        }
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 3,
            max_retries: 2,
            remote: RemoteExecutionConfig::default(),
        }
    }
}

impl OrchestratorConfig {
    /// Reject settings the scheduler cannot run with
    pub fn validate(&self) -> Result<(), OrchestratorError> {
        if self.max_concurrency == 0 {
            return Err(OrchestratorError::InvalidConfig(
                "max_concurrency must be > 0".to_string(),
            ));
        }
        if self.remote.enabled && self.remote.image.trim().is_empty() {
            return Err(OrchestratorError::InvalidConfig(
                "remote image cannot be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Whether a step for `agent` should run as a remote job
    ///
    /// Remote dispatch requires the switch to be on, and then either an
    /// explicit `k8s` request or the agent being on the allow-list.
    pub fn routes_remote(&self, agent: &str, mode: Option<ExecutionMode>) -> bool {
        self.remote.enabled
            && (mode == Some(ExecutionMode::K8s) || self.remote.agents.contains(agent))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn remote(agents: &[&str]) -> OrchestratorConfig {
        let mut config = OrchestratorConfig::default();
        config.remote.enabled = true;
        config.remote.agents = agents.iter().map(|a| a.to_string()).collect();
        config
    }

    #[test]
    fn test_defaults() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.max_concurrency, 3);
        assert_eq!(config.max_retries, 2);
        assert!(!config.remote.enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_concurrency_is_rejected() {
        let config = OrchestratorConfig {
            max_concurrency: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_routing() {
        let disabled = OrchestratorConfig::default();
        assert!(!disabled.routes_remote("nmap", Some(ExecutionMode::K8s)));

        let config = remote(&["nikto"]);
        assert!(config.routes_remote("nikto", None));
        assert!(config.routes_remote("nikto", Some(ExecutionMode::Local)));
        assert!(!config.routes_remote("nmap", None));
        assert!(config.routes_remote("nmap", Some(ExecutionMode::K8s)));
    }
}
