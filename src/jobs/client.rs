//! Kubernetes REST client
//!
//! A thin reqwest wrapper over the handful of batch/v1 and core/v1 endpoints
//! the job manager needs. [`ClusterApi`] is the seam tests replace.

use super::JobError;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::path::Path;

const SERVICE_ACCOUNT_DIR: &str = "/var/run/secrets/kubernetes.io/serviceaccount";

/// Pod counters from a job's status block
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct JobCounters {
    /// Pods currently running
    #[serde(default)]
    pub active: i64,
    /// Pods that completed successfully
    #[serde(default)]
    pub succeeded: i64,
    /// Pods that failed
    #[serde(default)]
    pub failed: i64,
}

/// Cluster operations used by the job manager
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// Submit a batch/v1 Job manifest
    async fn create_job(&self, namespace: &str, manifest: &Value) -> Result<(), JobError>;

    /// Read a job's counters; `None` when the job has no status block yet
    async fn read_job_counters(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<JobCounters>, JobError>;

    /// Names of pods matching a label selector
    async fn list_pods(&self, namespace: &str, label_selector: &str)
        -> Result<Vec<String>, JobError>;

    /// Last `tail_lines` lines of a pod's log
    async fn read_pod_log(
        &self,
        namespace: &str,
        pod: &str,
        tail_lines: u32,
    ) -> Result<String, JobError>;

    /// Delete a job with the given propagation policy (`Foreground` or `Orphan`)
    async fn delete_job(
        &self,
        namespace: &str,
        name: &str,
        propagation_policy: &str,
    ) -> Result<(), JobError>;
}

/// Where and how to reach the API server
#[derive(Clone)]
pub struct ClusterConfig {
    /// API server base URL, e.g. `https://10.0.0.1:443`
    pub server: String,
    /// Bearer token
    pub token: Option<String>,
    /// PEM bundle to trust in addition to the system roots
    pub ca_pem: Option<Vec<u8>>,
}

impl std::fmt::Debug for ClusterConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterConfig")
            .field("server", &self.server)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("ca_pem", &self.ca_pem.is_some())
            .finish()
    }
}

impl ClusterConfig {
    /// Resolve cluster access from the environment
    ///
    /// `K8S_API_SERVER` (+ optional `K8S_TOKEN`) wins; otherwise the
    /// in-cluster service account is used.
    pub fn from_env() -> Result<Self, JobError> {
        if let Ok(server) = std::env::var("K8S_API_SERVER") {
            return Ok(Self {
                server: server.trim_end_matches('/').to_string(),
                token: std::env::var("K8S_TOKEN").ok().filter(|t| !t.is_empty()),
                ca_pem: None,
            });
        }

        let host = std::env::var("KUBERNETES_SERVICE_HOST").map_err(|_| {
            JobError::Unavailable(
                "no cluster configuration: set K8S_API_SERVER or run in-cluster".to_string(),
            )
        })?;
        let port = std::env::var("KUBERNETES_SERVICE_PORT").unwrap_or_else(|_| "443".to_string());

        let dir = Path::new(SERVICE_ACCOUNT_DIR);
        let token = std::fs::read_to_string(dir.join("token"))
            .map_err(|e| JobError::Unavailable(format!("failed to read service account token: {}", e)))?;
        let ca_pem = std::fs::read(dir.join("ca.crt")).ok();

        Ok(Self {
            server: format!("https://{}:{}", host, port),
            token: Some(token.trim().to_string()),
            ca_pem,
        })
    }
}

/// [`ClusterApi`] over the Kubernetes REST API
#[derive(Debug, Clone)]
pub struct KubeRestClient {
    http: reqwest::Client,
    config: ClusterConfig,
}

impl KubeRestClient {
    /// Build a client for `config`
    pub fn new(config: ClusterConfig) -> Result<Self, JobError> {
        let mut builder = reqwest::Client::builder();
        if let Some(pem) = &config.ca_pem {
            let cert = reqwest::Certificate::from_pem(pem)
                .map_err(|e| JobError::Unavailable(format!("invalid cluster CA: {}", e)))?;
            builder = builder.add_root_certificate(cert);
        }
        let http = builder.build()?;
        Ok(Self { http, config })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.server, path)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response, JobError> {
        let response = self.authorize(request).send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unable to read error body".to_string());
        Err(JobError::Api {
            status: status.as_u16(),
            body,
        })
    }
}

#[derive(Deserialize)]
struct JobObject {
    #[serde(default)]
    status: Option<JobCounters>,
}

#[derive(Deserialize)]
struct PodList {
    #[serde(default)]
    items: Vec<PodObject>,
}

#[derive(Deserialize)]
struct PodObject {
    #[serde(default)]
    metadata: Option<PodMeta>,
}

#[derive(Deserialize)]
struct PodMeta {
    #[serde(default)]
    name: Option<String>,
}

#[async_trait]
impl ClusterApi for KubeRestClient {
    async fn create_job(&self, namespace: &str, manifest: &Value) -> Result<(), JobError> {
        let url = self.url(&format!("/apis/batch/v1/namespaces/{}/jobs", namespace));
        self.send(self.http.post(url).json(manifest)).await?;
        Ok(())
    }

    async fn read_job_counters(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<JobCounters>, JobError> {
        let url = self.url(&format!("/apis/batch/v1/namespaces/{}/jobs/{}", namespace, name));
        let job: JobObject = self
            .send(self.http.get(url))
            .await?
            .json()
            .await
            .map_err(|e| JobError::InvalidResponse(e.to_string()))?;
        Ok(job.status)
    }

    async fn list_pods(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<String>, JobError> {
        let url = self.url(&format!("/api/v1/namespaces/{}/pods", namespace));
        let pods: PodList = self
            .send(self.http.get(url).query(&[("labelSelector", label_selector)]))
            .await?
            .json()
            .await
            .map_err(|e| JobError::InvalidResponse(e.to_string()))?;
        Ok(pods
            .items
            .into_iter()
            .filter_map(|p| p.metadata.and_then(|m| m.name))
            .filter(|name| !name.is_empty())
            .collect())
    }

    async fn read_pod_log(
        &self,
        namespace: &str,
        pod: &str,
        tail_lines: u32,
    ) -> Result<String, JobError> {
        let url = self.url(&format!("/api/v1/namespaces/{}/pods/{}/log", namespace, pod));
        let text = self
            .send(self.http.get(url).query(&[("tailLines", tail_lines.to_string())]))
            .await?
            .text()
            .await?;
        Ok(text)
    }

    async fn delete_job(
        &self,
        namespace: &str,
        name: &str,
        propagation_policy: &str,
    ) -> Result<(), JobError> {
        let url = self.url(&format!("/apis/batch/v1/namespaces/{}/jobs/{}", namespace, name));
        self.send(
            self.http
                .delete(url)
                .query(&[("propagationPolicy", propagation_policy)]),
        )
        .await?;
        Ok(())
    }
}
