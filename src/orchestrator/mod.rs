//! Scan orchestrator
//!
//! Turns a [`ScanRequest`] into workflow steps and drives them through the
//! event bus until nothing is queued and nothing is in flight.
//!
//! - `scan_started` spawns a step task. The task takes one of the shared
//!   concurrency slots and keeps it for every attempt, retries included.
//! - `scan_completed` asks the decision policy for follow-up steps.
//! - `scan_failed` is terminal for its step.
//!
//! Steps routed to the cluster are handed to [`remote`] and end at submission.

pub mod config;
mod remote;

use crate::agents::{AgentRegistry, ScanAgent};
use crate::events::{EventBus, EventKind, EventPayload, OrchestrationEvent};
use crate::jobs::JobManager;
use crate::models::{
    JsonMap, ScanRequest, ScanResult, ScanStatus, StepStatus, Workflow, WorkflowState,
    WorkflowStep, TARGET_KEY,
};
use crate::policy::DecisionPolicy;
use crate::storage::{ScanStore, StoreError};
pub use config::{OrchestratorConfig, RemoteExecutionConfig};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{broadcast, Mutex, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Capacity of the observation channel returned by [`Orchestrator::subscribe`]
const TAP_CAPACITY: usize = 1024;

/// Errors that abort a scan before its steps run
#[derive(Error, Debug)]
pub enum OrchestratorError {
    /// Configuration rejected at construction
    #[error("Invalid orchestrator configuration: {0}")]
    InvalidConfig(String),

    /// A request with this id was already submitted
    #[error("Scan request already exists: {0}")]
    DuplicateRequest(String),

    /// Workflow or request could not be persisted
    #[error("Storage error: {0}")]
    Store(#[from] StoreError),
}

/// Collaborators shared by every run and step task
struct Shared {
    agents: Arc<AgentRegistry>,
    store: Arc<dyn ScanStore>,
    jobs: Arc<JobManager>,
    policy: Arc<dyn DecisionPolicy>,
    config: OrchestratorConfig,
    slots: Arc<Semaphore>,
}

/// State of one `run_scan` call
struct Run {
    request: ScanRequest,
    bus: EventBus,
    workflow: Mutex<Workflow>,
    results: Mutex<Vec<ScanResult>>,
}

/// Event-driven scheduler for scan requests
pub struct Orchestrator {
    shared: Arc<Shared>,
    tap: broadcast::Sender<OrchestrationEvent>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("agents", &self.shared.agents)
            .field("jobs", &self.shared.jobs)
            .field("config", &self.shared.config)
            .finish()
    }
}

impl Orchestrator {
    /// Build a scheduler; the concurrency bound is shared by all runs
    pub fn new(
        agents: Arc<AgentRegistry>,
        store: Arc<dyn ScanStore>,
        jobs: Arc<JobManager>,
        policy: Arc<dyn DecisionPolicy>,
        config: OrchestratorConfig,
    ) -> Result<Self, OrchestratorError> {
        config.validate()?;
        let (tap, _) = broadcast::channel(TAP_CAPACITY);
        let slots = Arc::new(Semaphore::new(config.max_concurrency));
        Ok(Self {
            shared: Arc::new(Shared {
                agents,
                store,
                jobs,
                policy,
                config,
                slots,
            }),
            tap,
        })
    }

    /// Receive every event published by any run from now on
    pub fn subscribe(&self) -> broadcast::Receiver<OrchestrationEvent> {
        self.tap.subscribe()
    }

    /// Scheduler configuration
    pub fn config(&self) -> &OrchestratorConfig {
        &self.shared.config
    }

    /// Registered agents
    pub fn agents(&self) -> &AgentRegistry {
        &self.shared.agents
    }

    /// Persistence gateway
    pub fn store(&self) -> &Arc<dyn ScanStore> {
        &self.shared.store
    }

    /// Job lifecycle manager
    pub fn jobs(&self) -> &Arc<JobManager> {
        &self.shared.jobs
    }

    /// Run a request to completion and return every result it produced
    ///
    /// Results come back in completion order. Unknown agents, exhausted
    /// retries and dropped remote steps contribute no result.
    pub async fn run_scan(&self, request: ScanRequest) -> Result<Vec<ScanResult>, OrchestratorError> {
        let shared = &self.shared;
        info!(request_id = %request.id, target = %request.target, "Starting scan");

        // A resubmitted id fails before its workflow is touched.
        match shared.store.save_scan_request(&request).await {
            Err(StoreError::Duplicate(id)) => return Err(OrchestratorError::DuplicateRequest(id)),
            other => other?,
        }

        let workflow_id = request.workflow_id().to_string();
        let mut workflow = match shared.store.get_workflow(&workflow_id).await? {
            Some(existing) => {
                debug!(workflow_id = %workflow_id, steps = existing.steps.len(), "Reusing workflow");
                existing
            }
            None => Workflow::for_request(&request),
        };
        workflow.state = WorkflowState::Active;

        let agents = if request.requested_agents.is_empty() {
            shared.agents.default_agents()
        } else {
            request.requested_agents.clone()
        };

        let mut initial = Vec::with_capacity(agents.len());
        for agent in &agents {
            let id = unique_step_id(&workflow, &request.id, agent);
            let step = WorkflowStep::new(id, &workflow.id, agent.as_str(), &request.target);
            workflow.steps.push(step.clone());
            initial.push(step);
        }

        shared.store.save_workflow(&workflow).await?;

        let run = Arc::new(Run {
            request,
            bus: EventBus::with_tap(self.tap.clone()),
            workflow: Mutex::new(workflow),
            results: Mutex::new(Vec::new()),
        });

        for step in initial {
            run.bus.publish(OrchestrationEvent::started(step));
        }

        let mut tasks = JoinSet::new();
        loop {
            if let Some(event) = run.bus.consume() {
                dispatch(shared, &run, event, &mut tasks);
                continue;
            }
            match tasks.join_next().await {
                Some(Ok(())) => {}
                Some(Err(e)) => error!(request_id = %run.request.id, error = %e, "Scan task aborted"),
                None => break,
            }
        }

        if let Err(e) = shared
            .store
            .update_workflow_state(&workflow_id, WorkflowState::Completed)
            .await
        {
            warn!(workflow_id = %workflow_id, error = %e, "Failed to mark workflow completed");
        }

        let results = run.results.lock().await.clone();
        info!(request_id = %run.request.id, results = results.len(), "Scan drained");
        Ok(results)
    }
}

/// First `<request>-<agent>-<seq>` id not yet used in the workflow
fn unique_step_id(workflow: &Workflow, request_id: &str, agent: &str) -> String {
    let mut seq = workflow.steps.len();
    loop {
        let id = WorkflowStep::derive_id(request_id, agent, seq);
        if !workflow.contains_step(&id) {
            return id;
        }
        seq += 1;
    }
}

fn dispatch(
    shared: &Arc<Shared>,
    run: &Arc<Run>,
    event: OrchestrationEvent,
    tasks: &mut JoinSet<()>,
) {
    match (event.kind, event.payload) {
        (EventKind::ScanStarted, EventPayload::Step(step)) => {
            tasks.spawn(execute_step(shared.clone(), run.clone(), step));
        }
        (EventKind::ScanCompleted, EventPayload::Result(result)) => {
            debug!(step_id = %event.id, status = %result.status, "Step completed");
            tasks.spawn(consult_policy(shared.clone(), run.clone()));
        }
        (EventKind::ScanFailed, EventPayload::Error { agent, error, .. }) => {
            warn!(step_id = %event.id, agent = %agent, error = %error, "Step failed");
        }
        (kind, _) => {
            warn!(step_id = %event.id, kind = ?kind, "Dropping event with mismatched payload");
        }
    }
}

async fn execute_step(shared: Arc<Shared>, run: Arc<Run>, step: WorkflowStep) {
    let Some(agent) = shared.agents.get(&step.agent) else {
        debug!(step_id = %step.id, agent = %step.agent, "Unknown agent, dropping step");
        return;
    };

    let _permit = match shared.slots.clone().acquire_owned().await {
        Ok(permit) => permit,
        Err(_) => {
            error!(step_id = %step.id, "Concurrency slots closed");
            return;
        }
    };

    let target = step
        .target()
        .unwrap_or(run.request.target.as_str())
        .to_string();

    run.set_step_status(&shared, &step.id, StepStatus::Running, None)
        .await;

    if shared
        .config
        .routes_remote(&step.agent, run.request.execution_mode)
    {
        remote::submit(&shared, &run, &step, &target).await;
    } else {
        run_local(&shared, &run, agent.as_ref(), &step, &target).await;
    }
}

async fn run_local(
    shared: &Shared,
    run: &Run,
    agent: &dyn ScanAgent,
    step: &WorkflowStep,
    target: &str,
) {
    let max_retries = shared.config.max_retries;
    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        match agent.run_async(target, &run.request.id).await {
            Ok(mut result) => {
                result.id = step.result_id();
                result.request_id = run.request.id.clone();
                run.record_result(shared, step, result).await;
                return;
            }
            Err(e) if attempt <= max_retries => {
                warn!(step_id = %step.id, agent = %step.agent, attempt, error = %e, "Step attempt failed, retrying");
            }
            Err(e) => {
                warn!(step_id = %step.id, agent = %step.agent, attempts = attempt, error = %e, "Step retries exhausted");
                run.record_failure(shared, step, e.to_string(), None).await;
                return;
            }
        }
    }
}

async fn consult_policy(shared: Arc<Shared>, run: Arc<Run>) {
    let workflow = run.workflow.lock().await.clone();
    let results = run.results.lock().await.clone();

    let decision = match shared.policy.decide_next_steps(&workflow, &results).await {
        Ok(decision) => decision,
        Err(e) => {
            warn!(workflow_id = %workflow.id, error = %e, "Decision policy failed, scheduling nothing");
            return;
        }
    };

    if decision.next_steps.is_empty() {
        return;
    }
    info!(
        workflow_id = %workflow.id,
        steps = decision.next_steps.len(),
        reasoning = %decision.reasoning,
        "Decision policy proposed follow-up steps"
    );

    let adopted = {
        let mut workflow = run.workflow.lock().await;
        let mut adopted = Vec::with_capacity(decision.next_steps.len());
        for mut step in decision.next_steps {
            if step.id.is_empty() || workflow.contains_step(&step.id) {
                step.id = unique_step_id(&workflow, &run.request.id, &step.agent);
            }
            step.workflow_id = workflow.id.clone();
            step.status = StepStatus::Pending;
            step.output = None;
            if !step.input.contains_key(TARGET_KEY) {
                step.input.insert(
                    TARGET_KEY.to_string(),
                    Value::String(run.request.target.clone()),
                );
            }
            workflow.steps.push(step.clone());
            adopted.push(step);
        }
        adopted
    };

    for step in adopted {
        if let Err(e) = shared.store.save_workflow_step(&step).await {
            warn!(step_id = %step.id, error = %e, "Failed to persist proposed step");
        }
        run.bus.publish(OrchestrationEvent::started(step));
    }
}

impl Run {
    async fn set_step_status(
        &self,
        shared: &Shared,
        step_id: &str,
        status: StepStatus,
        output: Option<JsonMap>,
    ) {
        let snapshot = {
            let mut workflow = self.workflow.lock().await;
            let Some(step) = workflow.step_mut(step_id) else {
                return;
            };
            step.status = status;
            if output.is_some() {
                step.output = output;
            }
            step.clone()
        };
        if let Err(e) = shared.store.save_workflow_step(&snapshot).await {
            warn!(step_id = %step_id, error = %e, "Failed to persist step status");
        }
    }

    /// Record a result and hand the step to the decision policy
    async fn record_result(&self, shared: &Shared, step: &WorkflowStep, result: ScanResult) {
        let step_status = match result.status {
            ScanStatus::Completed => StepStatus::Completed,
            ScanStatus::Failed => StepStatus::Failed,
            ScanStatus::Queued | ScanStatus::Running | ScanStatus::Scheduled => StepStatus::Running,
        };

        self.results.lock().await.push(result.clone());
        if let Err(e) = shared.store.save_scan_result(&result).await {
            warn!(result_id = %result.id, error = %e, "Failed to persist scan result");
        }
        self.set_step_status(shared, &step.id, step_status, Some(result.output.clone()))
            .await;

        self.bus
            .publish(OrchestrationEvent::completed(&step.id, result));
    }

    /// End a step with `scan_failed`, optionally keeping a failed result
    async fn record_failure(
        &self,
        shared: &Shared,
        step: &WorkflowStep,
        error: String,
        result: Option<ScanResult>,
    ) {
        if let Some(result) = result {
            self.results.lock().await.push(result.clone());
            if let Err(e) = shared.store.save_scan_result(&result).await {
                warn!(result_id = %result.id, error = %e, "Failed to persist scan result");
            }
        }
        self.set_step_status(shared, &step.id, StepStatus::Failed, None)
            .await;
        self.bus.publish(OrchestrationEvent::failed(step, error));
    }
}
