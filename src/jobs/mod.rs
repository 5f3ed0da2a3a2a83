//! Job Lifecycle Manager
//!
//! Creates, inspects, tails and deletes Kubernetes batch Jobs. The manager is
//! an optional capability: when no cluster is reachable it still constructs,
//! reports `enabled() == false`, and every call fails with
//! [`JobError::Unavailable`].

pub mod client;
pub mod naming;

use crate::models::RemoteJobStatus;
pub use client::{ClusterApi, ClusterConfig, JobCounters, KubeRestClient};
pub use naming::{build_job_name, job_salt, sanitize_job_name};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Errors raised by the job manager
#[derive(Error, Debug)]
pub enum JobError {
    /// No cluster client is configured
    #[error("Kubernetes job execution is not available: {0}")]
    Unavailable(String),

    /// The API server rejected the call
    #[error("Kubernetes API returned status {status}: {body}")]
    Api {
        /// HTTP status
        status: u16,
        /// Response body
        body: String,
    },

    /// The API server could not be reached
    #[error("Kubernetes API request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// The API server answered with something unexpected
    #[error("Unexpected Kubernetes API response: {0}")]
    InvalidResponse(String),
}

impl JobError {
    /// Whether the error means the backend is not configured at all
    pub fn is_unavailable(&self) -> bool {
        matches!(self, JobError::Unavailable(_))
    }
}

/// Container resource requests and limits
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResourceSpec {
    /// CPU request, e.g. `250m`
    pub cpu_request: Option<String>,
    /// CPU limit
    pub cpu_limit: Option<String>,
    /// Memory request, e.g. `256Mi`
    pub memory_request: Option<String>,
    /// Memory limit
    pub memory_limit: Option<String>,
}

impl ResourceSpec {
    fn is_empty(&self) -> bool {
        self.cpu_request.is_none()
            && self.cpu_limit.is_none()
            && self.memory_request.is_none()
            && self.memory_limit.is_none()
    }

    fn to_json(&self) -> Value {
        fn pick(cpu: &Option<String>, memory: &Option<String>) -> Map<String, Value> {
            let mut map = Map::new();
            if let Some(cpu) = cpu {
                map.insert("cpu".to_string(), json!(cpu));
            }
            if let Some(memory) = memory {
                map.insert("memory".to_string(), json!(memory));
            }
            map
        }
        json!({
            "requests": pick(&self.cpu_request, &self.memory_request),
            "limits": pick(&self.cpu_limit, &self.memory_limit),
        })
    }
}

/// Everything needed to submit one single-container Job
#[derive(Debug, Clone, PartialEq)]
pub struct JobSpec {
    /// DNS-label job name
    pub name: String,
    /// Container image
    pub image: String,
    /// Entrypoint override
    pub command: Vec<String>,
    /// Container arguments
    pub args: Vec<String>,
    /// Environment variables
    pub env: BTreeMap<String, String>,
    /// Labels on the Job and its pod template
    pub labels: BTreeMap<String, String>,
    /// Annotations on the Job and its pod template
    pub annotations: BTreeMap<String, String>,
    /// Resource requests and limits
    pub resources: ResourceSpec,
    /// Pod retries before the Job is marked failed
    pub backoff_limit: i32,
    /// Seconds a finished Job is kept before garbage collection
    pub ttl_seconds_after_finished: i32,
    /// Wall-clock limit for the whole Job
    pub active_deadline_seconds: Option<i64>,
}

impl JobSpec {
    /// A spec with the default backoff (1) and TTL (3600s)
    pub fn new(name: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
            command: Vec::new(),
            args: Vec::new(),
            env: BTreeMap::new(),
            labels: BTreeMap::new(),
            annotations: BTreeMap::new(),
            resources: ResourceSpec::default(),
            backoff_limit: 1,
            ttl_seconds_after_finished: 3600,
            active_deadline_seconds: None,
        }
    }

    /// Render the batch/v1 Job manifest
    pub fn to_manifest(&self, namespace: &str) -> Value {
        let mut container = json!({
            "name": "scan",
            "image": self.image,
            "env": self
                .env
                .iter()
                .map(|(name, value)| json!({ "name": name, "value": value }))
                .collect::<Vec<_>>(),
        });
        if !self.command.is_empty() {
            container["command"] = json!(self.command);
        }
        if !self.args.is_empty() {
            container["args"] = json!(self.args);
        }
        if !self.resources.is_empty() {
            container["resources"] = self.resources.to_json();
        }

        let metadata = json!({
            "labels": self.labels,
            "annotations": self.annotations,
        });

        let mut spec = json!({
            "backoffLimit": self.backoff_limit,
            "ttlSecondsAfterFinished": self.ttl_seconds_after_finished,
            "template": {
                "metadata": metadata,
                "spec": {
                    "restartPolicy": "Never",
                    "containers": [container],
                },
            },
        });
        if let Some(deadline) = self.active_deadline_seconds {
            spec["activeDeadlineSeconds"] = json!(deadline);
        }

        json!({
            "apiVersion": "batch/v1",
            "kind": "Job",
            "metadata": {
                "name": self.name,
                "namespace": namespace,
                "labels": self.labels,
                "annotations": self.annotations,
            },
            "spec": spec,
        })
    }
}

/// Name and namespace of an accepted Job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobCreateResult {
    /// Accepted job name
    pub job_name: String,
    /// Namespace it was created in
    pub namespace: String,
}

/// Client-side view of Kubernetes Jobs in one namespace
#[derive(Clone)]
pub struct JobManager {
    namespace: String,
    api: Option<Arc<dyn ClusterApi>>,
}

impl std::fmt::Debug for JobManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobManager")
            .field("namespace", &self.namespace)
            .field("enabled", &self.enabled())
            .finish()
    }
}

impl JobManager {
    /// Connect using cluster configuration from the environment
    ///
    /// Never fails: a missing or broken configuration yields a disabled manager.
    pub fn from_env(namespace: impl Into<String>) -> Self {
        let namespace = namespace.into();
        match ClusterConfig::from_env().and_then(KubeRestClient::new) {
            Ok(client) => {
                info!(namespace = %namespace, "Kubernetes job execution enabled");
                Self::with_api(namespace, Arc::new(client))
            }
            Err(e) => {
                debug!(error = %e, "Kubernetes job execution disabled");
                Self::disabled(namespace)
            }
        }
    }

    /// Use an explicit cluster client
    pub fn with_api(namespace: impl Into<String>, api: Arc<dyn ClusterApi>) -> Self {
        Self {
            namespace: namespace.into(),
            api: Some(api),
        }
    }

    /// A manager with no cluster behind it
    pub fn disabled(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            api: None,
        }
    }

    /// Whether a cluster client is configured
    pub fn enabled(&self) -> bool {
        self.api.is_some()
    }

    /// Namespace every call targets
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn api(&self) -> Result<&Arc<dyn ClusterApi>, JobError> {
        self.api.as_ref().ok_or_else(|| {
            JobError::Unavailable(
                "no Kubernetes client configured; set K8S_API_SERVER or run in-cluster"
                    .to_string(),
            )
        })
    }

    /// Submit a Job
    pub async fn create_job(&self, spec: &JobSpec) -> Result<JobCreateResult, JobError> {
        let api = self.api()?;
        api.create_job(&self.namespace, &spec.to_manifest(&self.namespace))
            .await?;
        info!(job_name = %spec.name, namespace = %self.namespace, image = %spec.image, "Created Kubernetes job");
        Ok(JobCreateResult {
            job_name: spec.name.clone(),
            namespace: self.namespace.clone(),
        })
    }

    /// Current status of a Job
    ///
    /// Read failures and a missing status block both report `unknown`.
    pub async fn get_job_status(&self, name: &str) -> Result<RemoteJobStatus, JobError> {
        let api = self.api()?;
        let counters = match api.read_job_counters(&self.namespace, name).await {
            Ok(Some(counters)) => counters,
            Ok(None) => return Ok(RemoteJobStatus::Unknown),
            Err(e) => {
                debug!(job_name = %name, error = %e, "Failed to read job status");
                return Ok(RemoteJobStatus::Unknown);
            }
        };

        let status = if counters.active > 0 {
            RemoteJobStatus::Running
        } else if counters.succeeded > 0 {
            RemoteJobStatus::Succeeded
        } else if counters.failed > 0 {
            RemoteJobStatus::Failed
        } else {
            RemoteJobStatus::Pending
        };
        Ok(status)
    }

    /// Pods created for a Job, selected by the `job-name` label
    pub async fn find_job_pods(&self, name: &str) -> Result<Vec<String>, JobError> {
        let api = self.api()?;
        api.list_pods(&self.namespace, &format!("job-name={}", name))
            .await
    }

    /// Tail of the newest pod's log; empty when there is no pod or the read fails
    pub async fn get_job_logs(&self, name: &str, tail_lines: u32) -> Result<String, JobError> {
        let api = self.api()?;
        let pods = self.find_job_pods(name).await?;
        let Some(pod) = pods.last() else {
            return Ok(String::new());
        };
        match api.read_pod_log(&self.namespace, pod, tail_lines).await {
            Ok(log) => Ok(log),
            Err(e) => {
                debug!(job_name = %name, pod = %pod, error = %e, "Failed to read pod log");
                Ok(String::new())
            }
        }
    }

    /// Delete a Job; `cascade` also removes its pods
    ///
    /// API errors (including not-found) are swallowed.
    pub async fn delete_job(&self, name: &str, cascade: bool) -> Result<(), JobError> {
        let api = self.api()?;
        let policy = if cascade { "Foreground" } else { "Orphan" };
        if let Err(e) = api.delete_job(&self.namespace, name, policy).await {
            warn!(job_name = %name, error = %e, "Failed to delete job");
        }
        Ok(())
    }

    /// Poll until the Job is terminal or `timeout` elapses
    ///
    /// Returns the last status (`unknown` on timeout) and the elapsed time.
    pub async fn wait_for_completion(
        &self,
        name: &str,
        timeout: Duration,
        poll_interval: Duration,
    ) -> Result<(RemoteJobStatus, Duration), JobError> {
        self.api()?;
        let started = Instant::now();
        loop {
            let status = self.get_job_status(name).await?;
            if status.is_terminal() {
                return Ok((status, started.elapsed()));
            }
            if started.elapsed() >= timeout {
                return Ok((RemoteJobStatus::Unknown, started.elapsed()));
            }
            tokio::time::sleep(poll_interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeCluster {
        counters: Mutex<Vec<Option<JobCounters>>>,
        pods: Vec<String>,
        log_fails: bool,
        deleted: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl ClusterApi for FakeCluster {
        async fn create_job(&self, _namespace: &str, _manifest: &Value) -> Result<(), JobError> {
            Ok(())
        }

        async fn read_job_counters(
            &self,
            _namespace: &str,
            _name: &str,
        ) -> Result<Option<JobCounters>, JobError> {
            let mut counters = self.counters.lock().unwrap();
            if counters.is_empty() {
                return Err(JobError::Api {
                    status: 404,
                    body: "not found".to_string(),
                });
            }
            if counters.len() > 1 {
                Ok(counters.remove(0))
            } else {
                Ok(counters[0])
            }
        }

        async fn list_pods(
            &self,
            _namespace: &str,
            _label_selector: &str,
        ) -> Result<Vec<String>, JobError> {
            Ok(self.pods.clone())
        }

        async fn read_pod_log(
            &self,
            _namespace: &str,
            pod: &str,
            _tail_lines: u32,
        ) -> Result<String, JobError> {
            if self.log_fails {
                return Err(JobError::InvalidResponse("boom".to_string()));
            }
            Ok(format!("log of {}", pod))
        }

        async fn delete_job(
            &self,
            _namespace: &str,
            name: &str,
            propagation_policy: &str,
        ) -> Result<(), JobError> {
            self.deleted
                .lock()
                .unwrap()
                .push((name.to_string(), propagation_policy.to_string()));
            Err(JobError::Api {
                status: 404,
                body: "gone".to_string(),
            })
        }
    }

    fn counters(active: i64, succeeded: i64, failed: i64) -> Option<JobCounters> {
        Some(JobCounters {
            active,
            succeeded,
            failed,
        })
    }

    fn manager(cluster: FakeCluster) -> (JobManager, Arc<FakeCluster>) {
        let cluster = Arc::new(cluster);
        (JobManager::with_api("scans", cluster.clone()), cluster)
    }

    #[test]
    fn test_manifest_shape() {
        let mut spec = JobSpec::new("sa-nmap-r1-abc", "runner:latest");
        spec.args = vec!["--agent".to_string(), "nmap".to_string()];
        spec.labels.insert("app".to_string(), "scan-orchestrator".to_string());
        spec.resources.memory_limit = Some("512Mi".to_string());
        spec.active_deadline_seconds = Some(900);

        let manifest = spec.to_manifest("scans");
        assert_eq!(manifest["kind"], "Job");
        assert_eq!(manifest["metadata"]["name"], "sa-nmap-r1-abc");
        assert_eq!(manifest["metadata"]["labels"]["app"], "scan-orchestrator");
        assert_eq!(manifest["spec"]["backoffLimit"], 1);
        assert_eq!(manifest["spec"]["ttlSecondsAfterFinished"], 3600);
        assert_eq!(manifest["spec"]["activeDeadlineSeconds"], 900);

        let pod = &manifest["spec"]["template"]["spec"];
        assert_eq!(pod["restartPolicy"], "Never");
        assert_eq!(pod["containers"][0]["name"], "scan");
        assert_eq!(pod["containers"][0]["args"][1], "nmap");
        assert_eq!(pod["containers"][0]["resources"]["limits"]["memory"], "512Mi");
        assert!(pod["containers"][0].get("command").is_none());
    }

    #[tokio::test]
    async fn test_disabled_manager_reports_unavailable() {
        let manager = JobManager::disabled("default");
        assert!(!manager.enabled());
        let err = manager
            .create_job(&JobSpec::new("a", "img"))
            .await
            .unwrap_err();
        assert!(err.is_unavailable());
        assert!(manager.get_job_status("a").await.unwrap_err().is_unavailable());
        assert!(manager.delete_job("a", true).await.unwrap_err().is_unavailable());
    }

    #[tokio::test]
    async fn test_status_mapping() {
        let cases = [
            (counters(1, 0, 0), RemoteJobStatus::Running),
            (counters(0, 1, 0), RemoteJobStatus::Succeeded),
            (counters(0, 0, 1), RemoteJobStatus::Failed),
            (counters(0, 0, 0), RemoteJobStatus::Pending),
            (None, RemoteJobStatus::Unknown),
        ];
        for (counter, expected) in cases {
            let (manager, _) = manager(FakeCluster {
                counters: Mutex::new(vec![counter]),
                ..Default::default()
            });
            assert_eq!(manager.get_job_status("j").await.unwrap(), expected);
        }

        let (manager, _) = manager(FakeCluster::default());
        assert_eq!(
            manager.get_job_status("missing").await.unwrap(),
            RemoteJobStatus::Unknown
        );
    }

    #[tokio::test]
    async fn test_logs_use_newest_pod() {
        let (manager, _) = manager(FakeCluster {
            pods: vec!["p-old".to_string(), "p-new".to_string()],
            ..Default::default()
        });
        assert_eq!(manager.get_job_logs("j", 100).await.unwrap(), "log of p-new");
    }

    #[tokio::test]
    async fn test_logs_empty_without_pods_or_on_failure() {
        let (manager, _) = manager(FakeCluster::default());
        assert_eq!(manager.get_job_logs("j", 100).await.unwrap(), "");

        let (manager, _) = self::manager(FakeCluster {
            pods: vec!["p".to_string()],
            log_fails: true,
            ..Default::default()
        });
        assert_eq!(manager.get_job_logs("j", 100).await.unwrap(), "");
    }

    #[tokio::test]
    async fn test_delete_swallows_errors() {
        let (manager, cluster) = manager(FakeCluster::default());
        manager.delete_job("j", true).await.unwrap();
        manager.delete_job("k", false).await.unwrap();
        assert_eq!(
            *cluster.deleted.lock().unwrap(),
            vec![
                ("j".to_string(), "Foreground".to_string()),
                ("k".to_string(), "Orphan".to_string())
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_completion_reaches_terminal() {
        let (manager, _) = manager(FakeCluster {
            counters: Mutex::new(vec![counters(0, 0, 0), counters(1, 0, 0), counters(0, 1, 0)]),
            ..Default::default()
        });
        let (status, elapsed) = manager
            .wait_for_completion("j", Duration::from_secs(60), Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(status, RemoteJobStatus::Succeeded);
        assert_eq!(elapsed, Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_completion_times_out_as_unknown() {
        let (manager, _) = manager(FakeCluster {
            counters: Mutex::new(vec![counters(1, 0, 0)]),
            ..Default::default()
        });
        let (status, elapsed) = manager
            .wait_for_completion("j", Duration::from_secs(5), Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(status, RemoteJobStatus::Unknown);
        assert!(elapsed >= Duration::from_secs(5));
    }
}
