//! Scan data model
//!
//! Requests, workflows, steps, results and remote job records shared by the
//! scheduler, the storage layer and the HTTP surface. Every status enum has a
//! lowercase wire form, used both in JSON and in the database.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Free-form JSON object used for step inputs, outputs and metadata
pub type JsonMap = Map<String, Value>;

/// Input key every step must carry
pub const TARGET_KEY: &str = "target";

/// A stored or received status string did not match any known variant
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown {kind} value: {value}")]
pub struct UnknownVariant {
    /// Name of the enum being parsed
    pub kind: &'static str,
    /// The offending value
    pub value: String,
}

macro_rules! wire_enum {
    ($ty:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $ty {
            /// Wire representation of the variant
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(UnknownVariant {
                        kind: stringify!($ty),
                        value: other.to_string(),
                    }),
                }
            }
        }
    };
}

/// Where a request asks its steps to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// In-process subprocess execution
    Local,
    /// Kubernetes Job execution
    K8s,
}

wire_enum!(ExecutionMode { Local => "local", K8s => "k8s" });

/// Lifecycle of a workflow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowState {
    /// Steps may still be added or running
    #[default]
    Active,
    /// Held by an operator
    Paused,
    /// The run that owned it has drained
    Completed,
}

wire_enum!(WorkflowState {
    Active => "active",
    Paused => "paused",
    Completed => "completed",
});

/// Lifecycle of a single workflow step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    /// Created, not yet executed
    #[default]
    Pending,
    /// Handed to an agent or submitted as a remote job
    Running,
    /// Finished with a result
    Completed,
    /// Finished without a usable result
    Failed,
}

wire_enum!(StepStatus {
    Pending => "pending",
    Running => "running",
    Completed => "completed",
    Failed => "failed",
});

/// Status of a scan result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanStatus {
    /// Accepted, not started
    Queued,
    /// In progress
    Running,
    /// Tool exited successfully
    Completed,
    /// Tool exited with an error or could not be submitted
    Failed,
    /// Submitted as a remote job; completion is observed out of band
    Scheduled,
}

wire_enum!(ScanStatus {
    Queued => "queued",
    Running => "running",
    Completed => "completed",
    Failed => "failed",
    Scheduled => "scheduled",
});

/// Status of a remote batch job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteJobStatus {
    /// Created, no pod active yet
    Pending,
    /// At least one pod active
    Running,
    /// Completed successfully
    Succeeded,
    /// Completed with failure
    Failed,
    /// Deleted by an operator
    Cancelled,
    /// Status could not be read
    Unknown,
}

wire_enum!(RemoteJobStatus {
    Pending => "pending",
    Running => "running",
    Succeeded => "succeeded",
    Failed => "failed",
    Cancelled => "cancelled",
    Unknown => "unknown",
});

impl RemoteJobStatus {
    /// Whether the job can no longer change state
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RemoteJobStatus::Succeeded | RemoteJobStatus::Failed | RemoteJobStatus::Cancelled
        )
    }

    /// Whether the job is still tracked by the reconciliation pass
    pub fn is_active(&self) -> bool {
        matches!(self, RemoteJobStatus::Pending | RemoteJobStatus::Running)
    }
}

/// A request to scan one target with a set of agents
///
/// Immutable once submitted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScanRequest {
    /// Unique request identifier
    pub id: String,
    /// Host, URL or domain to scan
    pub target: String,
    /// Agents to run, in order; empty means every default agent
    #[serde(default)]
    pub requested_agents: Vec<String>,
    /// Caller-assigned priority (stored, not used for ordering)
    #[serde(default)]
    pub priority: i64,
    /// Workflow to attach to; defaults to the request id
    #[serde(default)]
    pub workflow_id: Option<String>,
    /// Requested execution backend
    #[serde(default)]
    pub execution_mode: Option<ExecutionMode>,
}

impl ScanRequest {
    /// Create a request with default priority and no explicit agents
    pub fn new(id: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            target: target.into(),
            requested_agents: Vec::new(),
            priority: 0,
            workflow_id: None,
            execution_mode: None,
        }
    }

    /// Set the requested agents
    pub fn with_agents<I, S>(mut self, agents: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.requested_agents = agents.into_iter().map(Into::into).collect();
        self
    }

    /// Set the execution mode
    pub fn with_execution_mode(mut self, mode: ExecutionMode) -> Self {
        self.execution_mode = Some(mode);
        self
    }

    /// Id of the workflow this request runs in
    pub fn workflow_id(&self) -> &str {
        self.workflow_id.as_deref().unwrap_or(&self.id)
    }

    /// Whether the caller explicitly asked for remote execution
    pub fn wants_remote(&self) -> bool {
        self.execution_mode == Some(ExecutionMode::K8s)
    }
}

/// One agent invocation within a workflow
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowStep {
    /// Unique step id, also the upsert key
    pub id: String,
    /// Owning workflow
    pub workflow_id: String,
    /// Logical tool name
    pub agent: String,
    /// Step input; always carries `target`
    #[serde(default)]
    pub input: JsonMap,
    /// Output copied from the step's result
    #[serde(default)]
    pub output: Option<JsonMap>,
    /// Current status
    #[serde(default)]
    pub status: StepStatus,
    /// Declared dependencies (stored, not enforced)
    #[serde(default)]
    pub dependencies: Vec<String>,
}

impl WorkflowStep {
    /// Create a pending step targeting `target`
    pub fn new(
        id: impl Into<String>,
        workflow_id: impl Into<String>,
        agent: impl Into<String>,
        target: &str,
    ) -> Self {
        let mut input = JsonMap::new();
        input.insert(TARGET_KEY.to_string(), Value::String(target.to_string()));
        Self {
            id: id.into(),
            workflow_id: workflow_id.into(),
            agent: agent.into(),
            input,
            output: None,
            status: StepStatus::Pending,
            dependencies: Vec::new(),
        }
    }

    /// A step proposed by a decision policy; the scheduler assigns id and workflow
    pub fn proposed(agent: impl Into<String>, input: JsonMap) -> Self {
        Self {
            id: String::new(),
            workflow_id: String::new(),
            agent: agent.into(),
            input,
            output: None,
            status: StepStatus::Pending,
            dependencies: Vec::new(),
        }
    }

    /// The step's scan target, if present
    pub fn target(&self) -> Option<&str> {
        self.input.get(TARGET_KEY).and_then(Value::as_str)
    }

    /// Derive a step id from its request, agent and position in the workflow
    pub fn derive_id(request_id: &str, agent: &str, sequence: usize) -> String {
        format!("{}-{}-{}", request_id, agent, sequence)
    }

    /// Id of the result produced by this step
    pub fn result_id(&self) -> String {
        format!("{}-result", self.id)
    }
}

/// Ordered steps derived from one request plus context for the decision policy
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Workflow {
    /// Workflow id
    pub id: String,
    /// Display name
    pub name: String,
    /// Optional description
    #[serde(default)]
    pub description: Option<String>,
    /// Lifecycle state
    #[serde(default)]
    pub state: WorkflowState,
    /// Steps in creation order; append-only during a run
    #[serde(default)]
    pub steps: Vec<WorkflowStep>,
    /// Opaque context handed to the decision policy
    #[serde(default)]
    pub context: JsonMap,
}

impl Workflow {
    /// Build the workflow a request runs in
    pub fn for_request(request: &ScanRequest) -> Self {
        let mut context = JsonMap::new();
        context.insert("request_id".to_string(), Value::String(request.id.clone()));
        context.insert(
            TARGET_KEY.to_string(),
            Value::String(request.target.clone()),
        );
        Self {
            id: request.workflow_id().to_string(),
            name: format!("Workflow-{}", request.id),
            description: None,
            state: WorkflowState::Active,
            steps: Vec::new(),
            context,
        }
    }

    /// Whether a step with this id is already part of the workflow
    pub fn contains_step(&self, step_id: &str) -> bool {
        self.steps.iter().any(|s| s.id == step_id)
    }

    /// Mutable access to a step by id
    pub fn step_mut(&mut self, step_id: &str) -> Option<&mut WorkflowStep> {
        self.steps.iter_mut().find(|s| s.id == step_id)
    }
}

/// Outcome of one executed or scheduled step
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScanResult {
    /// Unique result id, also the upsert key
    pub id: String,
    /// Request this result belongs to
    pub request_id: String,
    /// Agent that produced it
    pub agent: String,
    /// Result status
    pub status: ScanStatus,
    /// Tool output; local runs always carry `stdout`
    #[serde(default)]
    pub output: JsonMap,
    /// Reserved for later enrichment
    #[serde(default)]
    pub analysis: Option<JsonMap>,
    /// Exit code, stderr, timing or remote job linkage
    #[serde(default)]
    pub metadata: JsonMap,
}

impl ScanResult {
    /// Create a result with empty output and metadata
    pub fn new(
        id: impl Into<String>,
        request_id: impl Into<String>,
        agent: impl Into<String>,
        status: ScanStatus,
    ) -> Self {
        Self {
            id: id.into(),
            request_id: request_id.into(),
            agent: agent.into(),
            status,
            output: JsonMap::new(),
            analysis: None,
            metadata: JsonMap::new(),
        }
    }

    /// Add a metadata entry
    pub fn with_metadata(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }
}

/// Persistence record of a Kubernetes Job launched for one step
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RemoteJobRecord {
    /// Record id (also reported to callers as `job_id`)
    pub id: String,
    /// Request the job runs for
    pub request_id: String,
    /// Agent executed by the job
    pub agent: String,
    /// Scan target
    pub target: String,
    /// DNS-label job name, unique per namespace
    #[serde(rename = "k8s_job_name")]
    pub job_name: String,
    /// Namespace the job lives in
    pub namespace: String,
    /// Last known status
    pub status: RemoteJobStatus,
    /// ISO-8601 UTC, second precision
    #[serde(default)]
    pub created_at: Option<String>,
    /// Set on the first observed transition to running
    #[serde(default)]
    pub started_at: Option<String>,
    /// Set when a terminal status is recorded
    #[serde(default)]
    pub completed_at: Option<String>,
    /// Submission or execution error
    #[serde(default)]
    pub error_message: Option<String>,
    /// Free-form metadata
    #[serde(default)]
    pub metadata: Option<JsonMap>,
}

impl RemoteJobRecord {
    /// A freshly created record in `pending` state
    pub fn pending(
        id: impl Into<String>,
        request_id: impl Into<String>,
        agent: impl Into<String>,
        target: impl Into<String>,
        job_name: impl Into<String>,
        namespace: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            request_id: request_id.into(),
            agent: agent.into(),
            target: target.into(),
            job_name: job_name.into(),
            namespace: namespace.into(),
            status: RemoteJobStatus::Pending,
            created_at: Some(now_iso()),
            started_at: None,
            completed_at: None,
            error_message: None,
            metadata: None,
        }
    }
}

/// Next steps proposed by a decision policy after a completion
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentDecision {
    /// Workflow the decision applies to
    pub workflow_id: String,
    /// Steps to schedule, possibly none
    pub next_steps: Vec<WorkflowStep>,
    /// Free-text reasoning
    pub reasoning: String,
}

impl AgentDecision {
    /// A decision that schedules nothing
    pub fn none(workflow_id: impl Into<String>, reasoning: impl Into<String>) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            next_steps: Vec::new(),
            reasoning: reasoning.into(),
        }
    }
}

/// Current UTC time as ISO-8601 with second precision, e.g. `2024-05-01T12:00:00Z`
pub fn now_iso() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()
}
