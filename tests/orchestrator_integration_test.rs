//! Integration tests for the scheduling pipeline
//!
//! Scripted agents stand in for the scanning tools and an in-memory SQLite
//! store backs persistence, so each test drives a full `run_scan` from
//! request to drained bus.

use async_trait::async_trait;
use scan_orchestrator::agents::{AgentRegistry, ScanAgent};
use scan_orchestrator::events::{EventKind, EventPayload};
use scan_orchestrator::executor::{ExecutionError, ProcessOutput};
use scan_orchestrator::jobs::{ClusterApi, JobCounters, JobError, JobManager};
use scan_orchestrator::models::{
    AgentDecision, ExecutionMode, JsonMap, RemoteJobRecord, RemoteJobStatus, ScanRequest,
    ScanResult, ScanStatus, StepStatus, Workflow, WorkflowState, WorkflowStep,
};
use scan_orchestrator::orchestrator::{Orchestrator, OrchestratorConfig, OrchestratorError};
use scan_orchestrator::policy::{DecisionPolicy, NoFollowUp, PolicyError};
use scan_orchestrator::storage::{
    RemoteJobFilter, RemoteJobUpdate, ScanStore, SqliteStore, StoreError,
};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Tracks how many agents run at the same time
#[derive(Default)]
struct Gauge {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl Gauge {
    fn enter(&self) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn leave(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Agent with a fixed exit code that errors on its first `failures` calls
struct ScriptedAgent {
    name: String,
    exit_code: i32,
    failures: usize,
    delay: Duration,
    calls: AtomicUsize,
    gauge: Option<Arc<Gauge>>,
    log: Option<Arc<Mutex<Vec<String>>>>,
}

impl ScriptedAgent {
    fn ok(name: &str) -> Self {
        Self {
            name: name.to_string(),
            exit_code: 0,
            failures: 0,
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
            gauge: None,
            log: None,
        }
    }

    fn failing(name: &str, failures: usize) -> Self {
        Self {
            failures,
            ..Self::ok(name)
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ScanAgent for ScriptedAgent {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, target: &str) -> Result<ProcessOutput, ExecutionError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(log) = &self.log {
            log.lock().unwrap().push(self.name.clone());
        }
        if let Some(gauge) = &self.gauge {
            gauge.enter();
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if let Some(gauge) = &self.gauge {
            gauge.leave();
        }

        if call < self.failures {
            return Err(ExecutionError::AgentFailed(format!("attempt {} failed", call + 1)));
        }
        Ok(ProcessOutput {
            stdout: format!("{} scanned {}", self.name, target),
            stderr: String::new(),
            exit_code: self.exit_code,
            duration: self.delay,
        })
    }
}

/// Proposes one follow-up step on its first call, nothing afterwards
struct FollowUpOnce {
    agent: String,
    fired: AtomicBool,
    calls: AtomicUsize,
}

impl FollowUpOnce {
    fn new(agent: &str) -> Self {
        Self {
            agent: agent.to_string(),
            fired: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl DecisionPolicy for FollowUpOnce {
    async fn decide_next_steps(
        &self,
        workflow: &Workflow,
        _results: &[ScanResult],
    ) -> Result<AgentDecision, PolicyError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fired.swap(true, Ordering::SeqCst) {
            return Ok(AgentDecision::none(&workflow.id, "done"));
        }
        Ok(AgentDecision {
            workflow_id: workflow.id.clone(),
            next_steps: vec![WorkflowStep::proposed(self.agent.as_str(), JsonMap::new())],
            reasoning: "web server found".to_string(),
        })
    }
}

struct BrokenPolicy;

#[async_trait]
impl DecisionPolicy for BrokenPolicy {
    async fn decide_next_steps(
        &self,
        _workflow: &Workflow,
        _results: &[ScanResult],
    ) -> Result<AgentDecision, PolicyError> {
        Err(PolicyError::InvalidResponse("garbage".to_string()))
    }
}

/// Cluster that accepts every job and remembers the manifests
#[derive(Default)]
struct AcceptingCluster {
    created: Mutex<Vec<Value>>,
}

#[async_trait]
impl ClusterApi for AcceptingCluster {
    async fn create_job(&self, _namespace: &str, manifest: &Value) -> Result<(), JobError> {
        self.created.lock().unwrap().push(manifest.clone());
        Ok(())
    }

    async fn read_job_counters(
        &self,
        _namespace: &str,
        _name: &str,
    ) -> Result<Option<JobCounters>, JobError> {
        Ok(None)
    }

    async fn list_pods(&self, _: &str, _: &str) -> Result<Vec<String>, JobError> {
        Ok(Vec::new())
    }

    async fn read_pod_log(&self, _: &str, _: &str, _: u32) -> Result<String, JobError> {
        Ok(String::new())
    }

    async fn delete_job(&self, _: &str, _: &str, _: &str) -> Result<(), JobError> {
        Ok(())
    }
}

/// Cluster that rejects every job creation
struct RejectingCluster;

#[async_trait]
impl ClusterApi for RejectingCluster {
    async fn create_job(&self, _namespace: &str, _manifest: &Value) -> Result<(), JobError> {
        Err(JobError::Api {
            status: 403,
            body: "forbidden".to_string(),
        })
    }

    async fn read_job_counters(
        &self,
        _namespace: &str,
        _name: &str,
    ) -> Result<Option<JobCounters>, JobError> {
        Ok(None)
    }

    async fn list_pods(&self, _: &str, _: &str) -> Result<Vec<String>, JobError> {
        Ok(Vec::new())
    }

    async fn read_pod_log(&self, _: &str, _: &str, _: u32) -> Result<String, JobError> {
        Ok(String::new())
    }

    async fn delete_job(&self, _: &str, _: &str, _: &str) -> Result<(), JobError> {
        Ok(())
    }
}

/// Store that cannot write remote job records
struct NoJobRecords {
    inner: SqliteStore,
}

#[async_trait]
impl ScanStore for NoJobRecords {
    async fn save_workflow(&self, workflow: &Workflow) -> Result<(), StoreError> {
        self.inner.save_workflow(workflow).await
    }

    async fn save_workflow_step(&self, step: &WorkflowStep) -> Result<(), StoreError> {
        self.inner.save_workflow_step(step).await
    }

    async fn get_workflow(&self, id: &str) -> Result<Option<Workflow>, StoreError> {
        self.inner.get_workflow(id).await
    }

    async fn update_workflow_state(&self, id: &str, state: WorkflowState) -> Result<(), StoreError> {
        self.inner.update_workflow_state(id, state).await
    }

    async fn save_scan_request(&self, request: &ScanRequest) -> Result<(), StoreError> {
        self.inner.save_scan_request(request).await
    }

    async fn list_scan_history(&self, limit: i64) -> Result<Vec<ScanRequest>, StoreError> {
        self.inner.list_scan_history(limit).await
    }

    async fn save_scan_result(&self, result: &ScanResult) -> Result<(), StoreError> {
        self.inner.save_scan_result(result).await
    }

    async fn get_scan_results(&self, request_id: &str) -> Result<Vec<ScanResult>, StoreError> {
        self.inner.get_scan_results(request_id).await
    }

    async fn get_scan_report(&self, result_id: &str) -> Result<Option<ScanResult>, StoreError> {
        self.inner.get_scan_report(result_id).await
    }

    async fn save_remote_job(&self, _record: &RemoteJobRecord) -> Result<(), StoreError> {
        Err(StoreError::Connection("disk full".to_string()))
    }

    async fn update_remote_job_status(
        &self,
        id: &str,
        update: RemoteJobUpdate,
    ) -> Result<(), StoreError> {
        self.inner.update_remote_job_status(id, update).await
    }

    async fn get_remote_job(&self, id: &str) -> Result<Option<RemoteJobRecord>, StoreError> {
        self.inner.get_remote_job(id).await
    }

    async fn list_active_remote_jobs(&self, limit: i64) -> Result<Vec<RemoteJobRecord>, StoreError> {
        self.inner.list_active_remote_jobs(limit).await
    }

    async fn list_remote_jobs(
        &self,
        filter: &RemoteJobFilter,
    ) -> Result<Vec<RemoteJobRecord>, StoreError> {
        self.inner.list_remote_jobs(filter).await
    }
}

struct Harness {
    orchestrator: Orchestrator,
    store: Arc<SqliteStore>,
}

async fn harness(
    agents: Vec<Arc<ScriptedAgent>>,
    jobs: JobManager,
    policy: Arc<dyn DecisionPolicy>,
    config: OrchestratorConfig,
) -> Harness {
    let mut registry = AgentRegistry::new();
    for agent in agents {
        registry.register(agent);
    }
    let store = Arc::new(SqliteStore::in_memory().await.unwrap());
    let orchestrator = Orchestrator::new(
        Arc::new(registry),
        store.clone() as Arc<dyn ScanStore>,
        Arc::new(jobs),
        policy,
        config,
    )
    .unwrap();
    Harness {
        orchestrator,
        store,
    }
}

fn remote_config(agents: &[&str], strict: bool) -> OrchestratorConfig {
    let mut config = OrchestratorConfig::default();
    config.remote.enabled = true;
    config.remote.strict = strict;
    config.remote.agents = agents.iter().map(|a| a.to_string()).collect();
    config
}

#[tokio::test]
async fn test_local_agents_complete() {
    let nmap = Arc::new(ScriptedAgent::ok("nmap"));
    let nikto = Arc::new(ScriptedAgent::ok("nikto"));
    let h = harness(
        vec![nmap.clone(), nikto.clone()],
        JobManager::disabled("default"),
        Arc::new(NoFollowUp),
        OrchestratorConfig::default(),
    )
    .await;

    let request = ScanRequest::new("r1", "example.com").with_agents(["nmap", "nikto"]);
    let results = h.orchestrator.run_scan(request).await.unwrap();

    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|r| r.status == ScanStatus::Completed));
    assert!(results.iter().all(|r| r.request_id == "r1"));
    let mut ids: Vec<_> = results.iter().map(|r| r.id.as_str()).collect();
    ids.sort_unstable();
    assert_eq!(ids, vec!["r1-nikto-1-result", "r1-nmap-0-result"]);

    let nmap_result = results.iter().find(|r| r.agent == "nmap").unwrap();
    assert_eq!(nmap_result.output["stdout"], "nmap scanned example.com");
    assert_eq!(nmap_result.metadata["exit_code"], 0);

    assert_eq!(nmap.calls(), 1);
    assert_eq!(nikto.calls(), 1);

    let stored = h.store.get_scan_results("r1").await.unwrap();
    assert_eq!(stored.len(), 2);
    let history = h.store.list_scan_history(10).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].requested_agents, vec!["nmap", "nikto"]);
}

#[tokio::test]
async fn test_workflow_marked_completed_with_step_statuses() {
    let h = harness(
        vec![
            Arc::new(ScriptedAgent::ok("nmap")),
            Arc::new(ScriptedAgent {
                exit_code: 2,
                ..ScriptedAgent::ok("nikto")
            }),
        ],
        JobManager::disabled("default"),
        Arc::new(NoFollowUp),
        OrchestratorConfig::default(),
    )
    .await;

    let request = ScanRequest::new("r1", "example.com").with_agents(["nmap", "nikto"]);
    let results = h.orchestrator.run_scan(request).await.unwrap();
    assert_eq!(results.len(), 2);

    let failed = results.iter().find(|r| r.agent == "nikto").unwrap();
    assert_eq!(failed.status, ScanStatus::Failed);
    assert_eq!(failed.metadata["exit_code"], 2);

    let workflow = h.store.get_workflow("r1").await.unwrap().unwrap();
    assert_eq!(workflow.state, WorkflowState::Completed);
    assert_eq!(workflow.steps.len(), 2);
    assert_eq!(workflow.steps[0].status, StepStatus::Completed);
    assert!(workflow.steps[0].output.is_some());
    assert_eq!(workflow.steps[1].status, StepStatus::Failed);
}

#[tokio::test]
async fn test_default_agents_used_when_none_requested() {
    let mut registry_agents = Vec::new();
    for name in ["nmap", "nikto", "sqlmap", "wpscan"] {
        registry_agents.push(Arc::new(ScriptedAgent::ok(name)));
    }
    let wpscan = registry_agents[3].clone();
    let h = harness(
        registry_agents,
        JobManager::disabled("default"),
        Arc::new(NoFollowUp),
        OrchestratorConfig::default(),
    )
    .await;

    // No explicit defaults: every registered agent runs
    let results = h
        .orchestrator
        .run_scan(ScanRequest::new("r1", "example.com"))
        .await
        .unwrap();
    assert_eq!(results.len(), 4);
    assert_eq!(wpscan.calls(), 1);
}

#[tokio::test]
async fn test_concurrency_is_bounded() {
    let gauge = Arc::new(Gauge::default());
    let agents: Vec<_> = (0..10)
        .map(|i| {
            Arc::new(ScriptedAgent {
                delay: Duration::from_millis(25),
                gauge: Some(gauge.clone()),
                ..ScriptedAgent::ok(&format!("tool{}", i))
            })
        })
        .collect();
    let names: Vec<String> = agents.iter().map(|a| a.name.clone()).collect();

    let h = harness(
        agents,
        JobManager::disabled("default"),
        Arc::new(NoFollowUp),
        OrchestratorConfig::default(),
    )
    .await;

    let results = h
        .orchestrator
        .run_scan(ScanRequest::new("r1", "example.com").with_agents(names))
        .await
        .unwrap();

    assert_eq!(results.len(), 10);
    let peak = gauge.peak.load(Ordering::SeqCst);
    assert!(peak <= 3, "peak concurrency was {}", peak);
    assert!(peak >= 2, "steps never overlapped (peak {})", peak);
}

#[tokio::test]
async fn test_retry_then_success() {
    let flaky = Arc::new(ScriptedAgent::failing("nmap", 2));
    let h = harness(
        vec![flaky.clone()],
        JobManager::disabled("default"),
        Arc::new(NoFollowUp),
        OrchestratorConfig::default(),
    )
    .await;

    let results = h
        .orchestrator
        .run_scan(ScanRequest::new("r1", "example.com").with_agents(["nmap"]))
        .await
        .unwrap();

    assert_eq!(flaky.calls(), 3);
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].status, ScanStatus::Completed);
}

#[tokio::test]
async fn test_retries_exhausted_publishes_failure() {
    let broken = Arc::new(ScriptedAgent::failing("nmap", usize::MAX));
    let h = harness(
        vec![broken.clone()],
        JobManager::disabled("default"),
        Arc::new(NoFollowUp),
        OrchestratorConfig::default(),
    )
    .await;
    let mut events = h.orchestrator.subscribe();

    let results = h
        .orchestrator
        .run_scan(ScanRequest::new("r1", "example.com").with_agents(["nmap"]))
        .await
        .unwrap();

    // One attempt plus two retries
    assert_eq!(broken.calls(), 3);
    assert!(results.is_empty());
    assert!(h.store.get_scan_results("r1").await.unwrap().is_empty());

    let mut kinds = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let EventPayload::Error { error, .. } = &event.payload {
            assert!(error.contains("attempt 3 failed"), "{}", error);
        }
        kinds.push(event.kind);
    }
    assert_eq!(kinds, vec![EventKind::ScanStarted, EventKind::ScanFailed]);

    let workflow = h.store.get_workflow("r1").await.unwrap().unwrap();
    assert_eq!(workflow.steps[0].status, StepStatus::Failed);
}

#[tokio::test]
async fn test_zero_retries_runs_once() {
    let broken = Arc::new(ScriptedAgent::failing("nmap", usize::MAX));
    let config = OrchestratorConfig {
        max_retries: 0,
        ..OrchestratorConfig::default()
    };
    let h = harness(
        vec![broken.clone()],
        JobManager::disabled("default"),
        Arc::new(NoFollowUp),
        config,
    )
    .await;

    h.orchestrator
        .run_scan(ScanRequest::new("r1", "example.com").with_agents(["nmap"]))
        .await
        .unwrap();
    assert_eq!(broken.calls(), 1);
}

#[tokio::test]
async fn test_unknown_agent_does_not_block_other_steps() {
    let nmap = Arc::new(ScriptedAgent::ok("nmap"));
    let h = harness(
        vec![nmap.clone()],
        JobManager::disabled("default"),
        Arc::new(NoFollowUp),
        OrchestratorConfig::default(),
    )
    .await;
    let mut events = h.orchestrator.subscribe();

    let results = h
        .orchestrator
        .run_scan(ScanRequest::new("r1", "example.com").with_agents(["ghost", "nmap"]))
        .await
        .unwrap();

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].agent, "nmap");
    assert_eq!(results[0].status, ScanStatus::Completed);
    assert_eq!(nmap.calls(), 1);

    // The ghost step gets no outcome event of its own
    let kinds: Vec<_> = std::iter::from_fn(|| events.try_recv().ok())
        .map(|e| e.kind)
        .collect();
    assert_eq!(
        kinds,
        vec![EventKind::ScanStarted, EventKind::ScanStarted, EventKind::ScanCompleted]
    );

    let workflow = h.store.get_workflow("r1").await.unwrap().unwrap();
    assert_eq!(workflow.state, WorkflowState::Completed);
    assert_eq!(workflow.steps[0].agent, "ghost");
    assert_eq!(workflow.steps[0].status, StepStatus::Pending);
    assert_eq!(workflow.steps[1].agent, "nmap");
    assert_eq!(workflow.steps[1].status, StepStatus::Completed);
}

#[tokio::test]
async fn test_retrying_step_keeps_its_slot() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let bad = Arc::new(ScriptedAgent {
        delay: Duration::from_millis(5),
        log: Some(log.clone()),
        ..ScriptedAgent::failing("bad", usize::MAX)
    });
    let good = Arc::new(ScriptedAgent {
        log: Some(log.clone()),
        ..ScriptedAgent::ok("good")
    });
    let config = OrchestratorConfig {
        max_concurrency: 1,
        ..OrchestratorConfig::default()
    };
    let h = harness(
        vec![bad.clone(), good.clone()],
        JobManager::disabled("default"),
        Arc::new(NoFollowUp),
        config,
    )
    .await;

    let results = h
        .orchestrator
        .run_scan(ScanRequest::new("r1", "example.com").with_agents(["bad", "good"]))
        .await
        .unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(bad.calls(), 3);

    // All attempts of the failing step run back to back
    let log = log.lock().unwrap().clone();
    assert_eq!(log.len(), 4);
    let first_bad = log.iter().position(|name| name == "bad").unwrap();
    assert!(
        log[first_bad..first_bad + 3].iter().all(|name| name == "bad"),
        "attempts interleaved: {:?}",
        log
    );
}

#[tokio::test]
async fn test_duplicate_request_id_leaves_workflow_intact() {
    let nmap = Arc::new(ScriptedAgent::ok("nmap"));
    let h = harness(
        vec![nmap.clone()],
        JobManager::disabled("default"),
        Arc::new(NoFollowUp),
        OrchestratorConfig::default(),
    )
    .await;

    let request = ScanRequest::new("r1", "example.com").with_agents(["nmap"]);
    h.orchestrator.run_scan(request.clone()).await.unwrap();
    let err = h.orchestrator.run_scan(request).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::DuplicateRequest(ref id) if id == "r1"));
    assert_eq!(nmap.calls(), 1);

    let workflow = h.store.get_workflow("r1").await.unwrap().unwrap();
    assert_eq!(workflow.state, WorkflowState::Completed);
    assert_eq!(workflow.steps.len(), 1);
    assert_eq!(workflow.steps[0].status, StepStatus::Completed);
    assert_eq!(h.store.get_scan_results("r1").await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_policy_feedback_loop_runs_one_extra_step() {
    let nmap = Arc::new(ScriptedAgent::ok("nmap"));
    let nikto = Arc::new(ScriptedAgent::ok("nikto"));
    let policy = Arc::new(FollowUpOnce::new("nikto"));
    let h = harness(
        vec![nmap.clone(), nikto.clone()],
        JobManager::disabled("default"),
        policy.clone(),
        OrchestratorConfig::default(),
    )
    .await;

    let results = h
        .orchestrator
        .run_scan(ScanRequest::new("r1", "example.com").with_agents(["nmap"]))
        .await
        .unwrap();

    assert_eq!(results.len(), 2);
    assert_eq!(results[0].agent, "nmap");
    assert_eq!(results[1].agent, "nikto");
    assert_eq!(nikto.calls(), 1);
    // Once per completion
    assert_eq!(policy.calls.load(Ordering::SeqCst), 2);

    let workflow = h.store.get_workflow("r1").await.unwrap().unwrap();
    assert_eq!(workflow.steps.len(), 2);
    let proposed = &workflow.steps[1];
    assert_eq!(proposed.id, "r1-nikto-1");
    assert_eq!(proposed.workflow_id, "r1");
    assert_eq!(proposed.target(), Some("example.com"));
    assert_eq!(proposed.status, StepStatus::Completed);
}

#[tokio::test]
async fn test_policy_error_does_not_fail_the_scan() {
    let h = harness(
        vec![Arc::new(ScriptedAgent::ok("nmap"))],
        JobManager::disabled("default"),
        Arc::new(BrokenPolicy),
        OrchestratorConfig::default(),
    )
    .await;

    let results = h
        .orchestrator
        .run_scan(ScanRequest::new("r1", "example.com").with_agents(["nmap"]))
        .await
        .unwrap();

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].status, ScanStatus::Completed);
}

#[tokio::test]
async fn test_workflow_reused_across_requests() {
    let h = harness(
        vec![Arc::new(ScriptedAgent::ok("nmap"))],
        JobManager::disabled("default"),
        Arc::new(NoFollowUp),
        OrchestratorConfig::default(),
    )
    .await;

    for id in ["r1", "r2"] {
        let mut request = ScanRequest::new(id, "example.com").with_agents(["nmap"]);
        request.workflow_id = Some("wf".to_string());
        h.orchestrator.run_scan(request).await.unwrap();
    }

    let workflow = h.store.get_workflow("wf").await.unwrap().unwrap();
    let ids: Vec<_> = workflow.steps.iter().map(|s| s.id.as_str()).collect();
    assert_eq!(ids, vec!["r1-nmap-0", "r2-nmap-1"]);
    assert_eq!(workflow.state, WorkflowState::Completed);
}

#[tokio::test]
async fn test_remote_agent_is_scheduled_as_job() {
    let nmap = Arc::new(ScriptedAgent::ok("nmap"));
    let nikto = Arc::new(ScriptedAgent::ok("nikto"));
    let cluster = Arc::new(AcceptingCluster::default());
    let h = harness(
        vec![nmap.clone(), nikto.clone()],
        JobManager::with_api("scans", cluster.clone()),
        Arc::new(NoFollowUp),
        remote_config(&["nmap"], false),
    )
    .await;

    let results = h
        .orchestrator
        .run_scan(ScanRequest::new("r1", "example.com").with_agents(["nmap", "nikto"]))
        .await
        .unwrap();

    assert_eq!(results.len(), 2);
    assert_eq!(nmap.calls(), 0);
    assert_eq!(nikto.calls(), 1);

    let scheduled = results.iter().find(|r| r.agent == "nmap").unwrap();
    assert_eq!(scheduled.status, ScanStatus::Scheduled);
    assert_eq!(scheduled.metadata["execution_mode"], "k8s");
    assert_eq!(scheduled.metadata["namespace"], "scans");
    let job_id = scheduled.metadata["job_id"].as_str().unwrap();

    let record = h.store.get_remote_job(job_id).await.unwrap().unwrap();
    assert_eq!(record.status, RemoteJobStatus::Pending);
    assert_eq!(record.request_id, "r1");
    assert!(record.job_name.starts_with("sa-nmap-r1-"));
    assert_eq!(scheduled.metadata["job_name"], record.job_name.as_str());

    let created = cluster.created.lock().unwrap();
    assert_eq!(created.len(), 1);
    assert_eq!(created[0]["metadata"]["name"], record.job_name.as_str());
    assert_eq!(created[0]["metadata"]["namespace"], "scans");
}

#[tokio::test]
async fn test_explicit_k8s_mode_routes_every_agent() {
    let cluster = Arc::new(AcceptingCluster::default());
    let h = harness(
        vec![Arc::new(ScriptedAgent::ok("nmap")), Arc::new(ScriptedAgent::ok("nikto"))],
        JobManager::with_api("default", cluster.clone()),
        Arc::new(NoFollowUp),
        remote_config(&[], false),
    )
    .await;

    let request = ScanRequest::new("r1", "example.com")
        .with_agents(["nmap", "nikto"])
        .with_execution_mode(ExecutionMode::K8s);
    let results = h.orchestrator.run_scan(request).await.unwrap();

    assert!(results.iter().all(|r| r.status == ScanStatus::Scheduled));
    assert_eq!(cluster.created.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn test_strict_unavailable_backend_yields_failed_result() {
    let h = harness(
        vec![Arc::new(ScriptedAgent::ok("nmap"))],
        JobManager::disabled("default"),
        Arc::new(NoFollowUp),
        remote_config(&["nmap"], true),
    )
    .await;
    let mut events = h.orchestrator.subscribe();

    let results = h
        .orchestrator
        .run_scan(ScanRequest::new("r1", "example.com").with_agents(["nmap"]))
        .await
        .unwrap();

    assert_eq!(results.len(), 1);
    let failed = &results[0];
    assert_eq!(failed.status, ScanStatus::Failed);
    assert!(failed.metadata["error"]
        .as_str()
        .unwrap()
        .contains("no Kubernetes client configured"));

    let job_id = failed.metadata["job_id"].as_str().unwrap();
    let record = h.store.get_remote_job(job_id).await.unwrap().unwrap();
    assert_eq!(record.status, RemoteJobStatus::Failed);
    assert!(record.error_message.is_some());
    assert!(record.completed_at.is_some());

    let kinds: Vec<_> = std::iter::from_fn(|| events.try_recv().ok())
        .map(|e| e.kind)
        .collect();
    assert_eq!(kinds, vec![EventKind::ScanStarted, EventKind::ScanFailed]);
}

#[tokio::test]
async fn test_lenient_unavailable_backend_drops_step() {
    let nmap = Arc::new(ScriptedAgent::ok("nmap"));
    let h = harness(
        vec![nmap.clone()],
        JobManager::disabled("default"),
        Arc::new(NoFollowUp),
        remote_config(&["nmap"], false),
    )
    .await;

    let results = h
        .orchestrator
        .run_scan(ScanRequest::new("r1", "example.com").with_agents(["nmap"]))
        .await
        .unwrap();

    // No local fallback and no result
    assert!(results.is_empty());
    assert_eq!(nmap.calls(), 0);

    let records = h
        .store
        .list_remote_jobs(&RemoteJobFilter {
            request_id: Some("r1".to_string()),
            ..RemoteJobFilter::default()
        })
        .await
        .unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, RemoteJobStatus::Failed);

    let workflow = h.store.get_workflow("r1").await.unwrap().unwrap();
    assert_eq!(workflow.steps[0].status, StepStatus::Failed);
}

#[tokio::test]
async fn test_invalid_config_rejected() {
    let config = OrchestratorConfig {
        max_concurrency: 0,
        ..OrchestratorConfig::default()
    };
    let store = Arc::new(SqliteStore::in_memory().await.unwrap());
    let err = Orchestrator::new(
        Arc::new(AgentRegistry::new()),
        store as Arc<dyn ScanStore>,
        Arc::new(JobManager::disabled("default")),
        Arc::new(NoFollowUp),
        config,
    )
    .unwrap_err();
    assert!(err.to_string().contains("max_concurrency"));
}

#[tokio::test]
async fn test_strict_rejected_submission_yields_failed_result() {
    let h = harness(
        vec![Arc::new(ScriptedAgent::ok("nmap"))],
        JobManager::with_api("default", Arc::new(RejectingCluster)),
        Arc::new(NoFollowUp),
        remote_config(&["nmap"], true),
    )
    .await;
    let mut events = h.orchestrator.subscribe();

    let results = h
        .orchestrator
        .run_scan(ScanRequest::new("r1", "example.com").with_agents(["nmap"]))
        .await
        .unwrap();

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].status, ScanStatus::Failed);
    let error = results[0].metadata["error"].as_str().unwrap();
    assert!(error.contains("403"), "{}", error);

    let job_id = results[0].metadata["job_id"].as_str().unwrap();
    let record = h.store.get_remote_job(job_id).await.unwrap().unwrap();
    assert_eq!(record.status, RemoteJobStatus::Failed);
    assert!(record.error_message.unwrap().contains("forbidden"));
    assert!(record.completed_at.is_some());

    let kinds: Vec<_> = std::iter::from_fn(|| events.try_recv().ok())
        .map(|e| e.kind)
        .collect();
    assert_eq!(kinds, vec![EventKind::ScanStarted, EventKind::ScanFailed]);
}

#[tokio::test]
async fn test_lenient_rejected_submission_has_no_result() {
    let nmap = Arc::new(ScriptedAgent::ok("nmap"));
    let h = harness(
        vec![nmap.clone()],
        JobManager::with_api("default", Arc::new(RejectingCluster)),
        Arc::new(NoFollowUp),
        remote_config(&["nmap"], false),
    )
    .await;

    let results = h
        .orchestrator
        .run_scan(ScanRequest::new("r1", "example.com").with_agents(["nmap"]))
        .await
        .unwrap();

    assert!(results.is_empty());
    assert_eq!(nmap.calls(), 0);
    assert!(h.store.get_scan_results("r1").await.unwrap().is_empty());

    let records = h
        .store
        .list_remote_jobs(&RemoteJobFilter::default())
        .await
        .unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, RemoteJobStatus::Failed);
}

#[tokio::test]
async fn test_unrecorded_job_is_not_submitted_in_strict_mode() {
    let mut registry = AgentRegistry::new();
    registry.register(Arc::new(ScriptedAgent::ok("nmap")));
    let store = Arc::new(NoJobRecords {
        inner: SqliteStore::in_memory().await.unwrap(),
    });
    let cluster = Arc::new(AcceptingCluster::default());
    let orchestrator = Orchestrator::new(
        Arc::new(registry),
        store.clone() as Arc<dyn ScanStore>,
        Arc::new(JobManager::with_api("default", cluster.clone())),
        Arc::new(NoFollowUp),
        remote_config(&["nmap"], true),
    )
    .unwrap();
    let mut events = orchestrator.subscribe();

    let results = orchestrator
        .run_scan(ScanRequest::new("r1", "example.com").with_agents(["nmap"]))
        .await
        .unwrap();

    assert!(cluster.created.lock().unwrap().is_empty());
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].status, ScanStatus::Failed);
    assert!(results[0].metadata["error"]
        .as_str()
        .unwrap()
        .contains("disk full"));

    let kinds: Vec<_> = std::iter::from_fn(|| events.try_recv().ok())
        .map(|e| e.kind)
        .collect();
    assert_eq!(kinds, vec![EventKind::ScanStarted, EventKind::ScanFailed]);

    let workflow = store.get_workflow("r1").await.unwrap().unwrap();
    assert_eq!(workflow.steps[0].status, StepStatus::Failed);
}
