//! Scanning agents
//!
//! An agent is a named wrapper around one external scanning tool. The scheduler
//! only sees the [`ScanAgent`] execution contract; [`ToolAgent`] implements it
//! for any [`ToolCapability`] by spawning the tool through [`CliExecutor`].
//! Agents are looked up by name in an explicit [`AgentRegistry`].

pub mod tools;

use crate::executor::{CliExecutor, ExecutionError, ProcessOutput};
use crate::models::{JsonMap, ScanResult, ScanStatus};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
pub use tools::ToolCapability;

/// Names scheduled when a request does not list agents
pub const DEFAULT_AGENTS: [&str; 3] = ["nmap", "nikto", "sqlmap"];

/// Process exit code reported for an unregistered agent
pub const UNKNOWN_AGENT_EXIT_CODE: i32 = 127;

/// Execution contract between the scheduler and a scanning tool
#[async_trait]
pub trait ScanAgent: Send + Sync {
    /// Logical agent name
    fn name(&self) -> &str;

    /// Run the tool against `target`
    ///
    /// `Err` means the run itself failed (spawn error, timeout) and may be retried.
    async fn run(&self, target: &str) -> Result<ProcessOutput, ExecutionError>;

    /// Structured view of the tool's stdout
    fn parse_output(&self, _stdout: &str) -> Value {
        Value::Null
    }

    /// Run the tool and shape the outcome as a scan result
    ///
    /// The status is `completed` iff the exit code is 0. The result id is left
    /// for the caller to assign.
    async fn run_async(&self, target: &str, request_id: &str) -> Result<ScanResult, ExecutionError> {
        let started = Instant::now();
        let output = self.run(target).await?;

        let status = if output.success() {
            ScanStatus::Completed
        } else {
            ScanStatus::Failed
        };

        let mut result = ScanResult::new(String::new(), request_id, self.name(), status);
        result.output = JsonMap::from_iter([
            ("stdout".to_string(), Value::String(output.stdout.clone())),
            ("parsed".to_string(), self.parse_output(&output.stdout)),
        ]);
        result.metadata = JsonMap::from_iter([
            ("exit_code".to_string(), Value::from(output.exit_code)),
            ("stderr".to_string(), Value::String(output.stderr)),
            (
                "duration_seconds".to_string(),
                Value::from((started.elapsed().as_secs_f64() * 1000.0).round() / 1000.0),
            ),
        ]);
        Ok(result)
    }
}

/// A [`ScanAgent`] backed by an external CLI tool
pub struct ToolAgent {
    capability: Box<dyn ToolCapability>,
    executor: CliExecutor,
    options: Vec<(String, Value)>,
}

impl ToolAgent {
    /// Wrap a tool capability
    pub fn new(capability: Box<dyn ToolCapability>, executor: CliExecutor) -> Self {
        Self {
            capability,
            executor,
            options: Vec::new(),
        }
    }

    /// Add an extra option rendered after the tool's own arguments
    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.options.push((key.into(), value.into()));
        self
    }

    /// Full argument list for a target
    pub fn arguments(&self, target: &str) -> Vec<String> {
        let mut args = self.capability.build_arguments(target);
        args.extend(tools::render_options(
            self.capability.option_prefix(),
            &self.options,
        ));
        args
    }
}

impl std::fmt::Debug for ToolAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolAgent")
            .field("name", &self.capability.name())
            .field("command", &self.capability.command())
            .field("options", &self.options)
            .finish()
    }
}

#[async_trait]
impl ScanAgent for ToolAgent {
    fn name(&self) -> &str {
        self.capability.name()
    }

    async fn run(&self, target: &str) -> Result<ProcessOutput, ExecutionError> {
        let args = self.arguments(target);
        self.executor.execute(self.capability.command(), &args).await
    }

    fn parse_output(&self, stdout: &str) -> Value {
        self.capability.parse_output(stdout)
    }
}

/// Name-to-agent mapping consulted by the scheduler
#[derive(Clone, Default)]
pub struct AgentRegistry {
    agents: HashMap<String, Arc<dyn ScanAgent>>,
    /// Registration order, used when no defaults are set
    order: Vec<String>,
    defaults: Option<Vec<String>>,
}

impl AgentRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in tool, defaulting to [`DEFAULT_AGENTS`]
    pub fn with_builtin_tools(executor: CliExecutor) -> Self {
        let mut registry = Self::new();
        for capability in tools::builtin_tools() {
            registry.register(Arc::new(ToolAgent::new(capability, executor.clone())));
        }
        registry.set_defaults(DEFAULT_AGENTS);
        registry
    }

    /// Register an agent under its own name, replacing any previous one
    pub fn register(&mut self, agent: Arc<dyn ScanAgent>) {
        let name = agent.name().to_string();
        if self.agents.insert(name.clone(), agent).is_none() {
            self.order.push(name);
        }
    }

    /// Set the agents scheduled for requests that list none
    pub fn set_defaults<I, S>(&mut self, names: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.defaults = Some(names.into_iter().map(Into::into).collect());
    }

    /// Look up an agent by name
    pub fn get(&self, name: &str) -> Option<Arc<dyn ScanAgent>> {
        self.agents.get(name).cloned()
    }

    /// Whether an agent is registered
    pub fn contains(&self, name: &str) -> bool {
        self.agents.contains_key(name)
    }

    /// Agents to schedule when a request lists none
    pub fn default_agents(&self) -> Vec<String> {
        self.defaults.clone().unwrap_or_else(|| self.order.clone())
    }

    /// Registered names in registration order
    pub fn names(&self) -> &[String] {
        &self.order
    }

    /// Run one agent outside the scheduler, as a job container does
    ///
    /// Returns the result and the process exit code: 0 iff the result is
    /// `completed`, [`UNKNOWN_AGENT_EXIT_CODE`] for an unknown agent, 1 otherwise.
    pub async fn run_standalone(
        &self,
        agent_name: &str,
        target: &str,
        request_id: &str,
    ) -> (ScanResult, i32) {
        let result_id = format!("{}-{}-result", request_id, agent_name);

        let Some(agent) = self.get(agent_name) else {
            let mut result = ScanResult::new(result_id, request_id, agent_name, ScanStatus::Failed);
            result.output.insert("stdout".to_string(), Value::String(String::new()));
            result = result
                .with_metadata("stderr", format!("Unknown agent: {}", agent_name))
                .with_metadata("exit_code", UNKNOWN_AGENT_EXIT_CODE);
            return (result, UNKNOWN_AGENT_EXIT_CODE);
        };

        let started = Instant::now();
        let mut result = match agent.run_async(target, request_id).await {
            Ok(result) => result,
            Err(e) => {
                let mut result =
                    ScanResult::new(String::new(), request_id, agent_name, ScanStatus::Failed);
                result.output.insert("stdout".to_string(), Value::String(String::new()));
                result
                    .with_metadata("stderr", e.to_string())
                    .with_metadata("exit_code", -1)
            }
        };
        result.id = result_id;
        result.metadata.insert(
            "duration_seconds".to_string(),
            Value::from((started.elapsed().as_secs_f64() * 1000.0).round() / 1000.0),
        );

        let code = if result.status == ScanStatus::Completed { 0 } else { 1 };
        (result, code)
    }
}

impl std::fmt::Debug for AgentRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentRegistry")
            .field("agents", &self.order)
            .field("defaults", &self.defaults)
            .finish()
    }
}
