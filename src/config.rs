//! Application configuration
//!
//! Environment variables with defaults. Loading never fails; malformed values
//! fall back to the default.

use crate::orchestrator::{OrchestratorConfig, RemoteExecutionConfig};
use std::env;

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Server configuration
    pub server: ServerConfig,
    /// Persistence configuration
    pub persistence: PersistenceConfig,
    /// Execution configuration
    pub execution: ExecutionConfig,
    /// Kubernetes configuration
    pub k8s: K8sConfig,
    /// Decision policy configuration
    pub policy: PolicyConfig,
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Port to bind the server to
    pub port: u16,
    /// Host address to bind to
    pub host: String,
}

/// Persistence configuration
#[derive(Debug, Clone)]
pub struct PersistenceConfig {
    /// SQLite database URL or path
    pub database_url: String,
}

/// Execution configuration
#[derive(Debug, Clone)]
pub struct ExecutionConfig {
    /// Per-subprocess timeout (in seconds)
    pub tool_timeout_secs: u64,
    /// Concurrency slots
    pub max_concurrency: usize,
    /// Extra attempts per failed local step
    pub max_retries: u32,
}

/// Kubernetes Job execution settings
#[derive(Debug, Clone)]
pub struct K8sConfig {
    /// Global remote-execution switch
    pub enabled: bool,
    /// Agents routed remotely
    pub agents: Vec<String>,
    /// Surface unavailability as failed results
    pub strict: bool,
    /// Runner image
    pub image: String,
    /// Namespace jobs run in
    pub namespace: String,
}

/// Decision policy settings
#[derive(Clone)]
pub struct PolicyConfig {
    /// Gemini API key; no key means no follow-up steps
    pub gemini_api_key: Option<String>,
    /// Gemini model
    pub gemini_model: String,
}

impl std::fmt::Debug for PolicyConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolicyConfig")
            .field("gemini_api_key", &self.gemini_api_key.as_ref().map(|_| "<redacted>"))
            .field("gemini_model", &self.gemini_model)
            .finish()
    }
}

fn parse_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

/// `1`, `true`, `yes` and `on` (any case) are true; anything else is false
pub fn parse_bool(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn flag(name: &str) -> bool {
    env::var(name).map(|v| parse_bool(&v)).unwrap_or(false)
}

/// Split a comma-separated list, dropping blanks
pub fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn default_database_url() -> String {
    match env::var_os("HOME") {
        Some(home) => format!(
            "sqlite://{}/.scan-orchestrator/scans.db",
            home.to_string_lossy()
        ),
        None => "sqlite://.scan-orchestrator/scans.db".to_string(),
    }
}

impl Config {
    /// Load configuration from environment variables with defaults
    pub fn from_env() -> Self {
        let defaults = OrchestratorConfig::default();
        Self {
            server: ServerConfig {
                port: parse_or("PORT", 5000),
                host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            },
            persistence: PersistenceConfig {
                database_url: env::var("DATABASE_URL").unwrap_or_else(|_| default_database_url()),
            },
            execution: ExecutionConfig {
                tool_timeout_secs: parse_or("TOOL_TIMEOUT_SECS", 60),
                max_concurrency: parse_or("SCAN_MAX_CONCURRENCY", defaults.max_concurrency),
                max_retries: parse_or("SCAN_MAX_RETRIES", defaults.max_retries),
            },
            k8s: K8sConfig {
                enabled: flag("USE_K8S_JOBS"),
                agents: env::var("K8S_JOB_AGENTS")
                    .map(|v| parse_list(&v))
                    .unwrap_or_default(),
                strict: flag("K8S_STRICT"),
                image: env::var("K8S_JOB_IMAGE").unwrap_or(defaults.remote.image),
                namespace: env::var("K8S_NAMESPACE").unwrap_or_else(|_| "default".to_string()),
            },
            policy: PolicyConfig {
                gemini_api_key: env::var("GEMINI_API_KEY").ok().filter(|k| !k.is_empty()),
                gemini_model: env::var("GEMINI_MODEL")
                    .unwrap_or_else(|_| crate::policy::gemini::DEFAULT_GEMINI_MODEL.to_string()),
            },
        }
    }

    /// Get the server address as a string
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// Scheduler settings derived from this configuration
    pub fn orchestrator(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            max_concurrency: self.execution.max_concurrency,
            max_retries: self.execution.max_retries,
            remote: RemoteExecutionConfig {
                enabled: self.k8s.enabled,
                agents: self.k8s.agents.iter().cloned().collect(),
                strict: self.k8s.strict,
                image: self.k8s.image.clone(),
                ..RemoteExecutionConfig::default()
            },
        }
    }
}
