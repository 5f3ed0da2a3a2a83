//! Gemini-backed decision policy
//!
//! Sends the workflow context and a summary of results to the Gemini
//! `generateContent` endpoint in JSON mode and turns the answer into next steps.

use super::gemini_types::{GeminiApiRequest, GeminiApiResponse, PlannerDecision};
use super::recommend::{Recommendations, Recommender};
use super::{DecisionPolicy, PolicyError};
use crate::models::{AgentDecision, ScanResult, Workflow, WorkflowStep};
use async_trait::async_trait;
use serde_json::Value;

const GEMINI_API_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Default model
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.5-flash";

/// Stdout is cut to this many characters per result in the prompt
const STDOUT_PREVIEW_CHARS: usize = 500;

/// [`DecisionPolicy`] that asks Gemini for follow-up scans
#[derive(Clone)]
pub struct GeminiPolicy {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
    allowed_agents: Vec<String>,
}

impl std::fmt::Debug for GeminiPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiPolicy")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("allowed_agents", &self.allowed_agents)
            .finish()
    }
}

impl GeminiPolicy {
    /// Create a policy using the default model
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            model: DEFAULT_GEMINI_MODEL.to_string(),
            base_url: GEMINI_API_BASE_URL.to_string(),
            allowed_agents: Vec::new(),
        }
    }

    /// Use a different model
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Point at a different API root (used by tests)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Only accept proposals for these agents; empty accepts any
    pub fn with_allowed_agents<I, S>(mut self, agents: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_agents = agents.into_iter().map(Into::into).collect();
        self
    }

    /// Send one prompt and return the model's text
    pub async fn generate(&self, prompt: &str, force_json: bool) -> Result<String, PolicyError> {
        if self.api_key.is_empty() {
            return Err(PolicyError::MissingApiKey);
        }

        let url = format!("{}/models/{}:generateContent", self.base_url, self.model);

        tracing::debug!(
            model = %self.model,
            force_json = force_json,
            prompt_len = prompt.len(),
            "Calling Gemini API"
        );

        let response = self
            .client
            .post(&url)
            .query(&[("key", self.api_key.as_str())])
            .json(&GeminiApiRequest::prompt(prompt, force_json))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let status_code = status.as_u16();
            let error_body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read error body".to_string());

            tracing::error!(
                status_code = status_code,
                error_body = %error_body,
                "Gemini API returned error status"
            );

            if status_code == 429 {
                return Err(PolicyError::RateLimited(error_body));
            }
            return Err(PolicyError::Api {
                status: status_code,
                body: error_body,
            });
        }

        let response_body = response.text().await?;
        let parsed: GeminiApiResponse = serde_json::from_str(&response_body).map_err(|e| {
            PolicyError::InvalidResponse(format!(
                "Failed to parse JSON response: {} - Response body: {}",
                e, response_body
            ))
        })?;

        if let Some(reason) = parsed.prompt_feedback.and_then(|f| f.block_reason) {
            return Err(PolicyError::Blocked(reason));
        }

        let text = parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content.parts.into_iter().next())
            .map(|p| p.text)
            .ok_or_else(|| PolicyError::InvalidResponse("response contains no candidates".to_string()))?;

        if text.is_empty() {
            return Err(PolicyError::InvalidResponse("response text is empty".to_string()));
        }

        tracing::debug!(response_len = text.len(), "Received response from Gemini API");
        Ok(text)
    }

    fn build_prompt(&self, workflow: &Workflow, results: &[ScanResult]) -> String {
        let context = serde_json::to_string(&workflow.context).unwrap_or_default();
        let summary = results
            .iter()
            .map(|r| {
                let stdout = r
                    .output
                    .get("stdout")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default();
                let preview: String = stdout.chars().take(STDOUT_PREVIEW_CHARS).collect();
                format!("{}: {}, stdout={:?}", r.agent, r.status, preview)
            })
            .collect::<Vec<_>>()
            .join("\n");
        let agents = if self.allowed_agents.is_empty() {
            "any".to_string()
        } else {
            self.allowed_agents.join(", ")
        };

        format!(
            "You are an orchestration engine for a security scanning system.\n\
             Given the current workflow context and scan results, decide the next steps.\n\n\
             Workflow Context:\n{}\n\n\
             Scan Results:\n{}\n\n\
             Available agents: {}\n\n\
             Respond with JSON only: \
             {{\"next_steps\": [{{\"agent\": \"<name>\", \"input\": {{\"target\": \"<target>\"}}}}], \
             \"reasoning\": \"<why>\"}}. Return an empty next_steps list when no further scan is useful.",
            context, summary, agents
        )
    }

    fn build_recommendation_prompt(scan_results: &[Value]) -> String {
        let payload = serde_json::json!({
            "task": "Generate prioritized security remediation recommendations",
            "scan_results": scan_results,
        });
        format!(
            "You are a security analyst reviewing automated scan output.\n\n\
             Request:\n{}\n\n\
             Respond with JSON only: \
             {{\"recommendations\": [{{\"title\": \"<fix>\", \"severity\": \"<level>\", \"details\": \"<how>\"}}], \
             \"prioritized_vulnerabilities\": [{{\"name\": \"<finding>\", \"severity\": \"<level>\"}}]}}",
            payload
        )
    }

    /// Turn model text into a decision
    ///
    /// Anything that does not parse yields no steps with the raw text as reasoning.
    pub fn parse_decision(&self, workflow: &Workflow, text: &str) -> AgentDecision {
        let planned: PlannerDecision = match serde_json::from_str(strip_code_fence(text)) {
            Ok(planned) => planned,
            Err(e) => {
                tracing::warn!(workflow_id = %workflow.id, error = %e, "Unparseable decision response");
                return AgentDecision::none(&workflow.id, text);
            }
        };

        let next_steps = planned
            .next_steps
            .into_iter()
            .filter(|step| {
                let allowed = self.allowed_agents.is_empty() || self.allowed_agents.contains(&step.agent);
                if !allowed {
                    tracing::warn!(agent = %step.agent, "Dropping proposal for unavailable agent");
                }
                allowed
            })
            .map(|step| WorkflowStep::proposed(step.agent, step.input))
            .collect();

        AgentDecision {
            workflow_id: workflow.id.clone(),
            next_steps,
            reasoning: planned.reasoning,
        }
    }
}

fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

#[async_trait]
impl DecisionPolicy for GeminiPolicy {
    async fn decide_next_steps(
        &self,
        workflow: &Workflow,
        results: &[ScanResult],
    ) -> Result<AgentDecision, PolicyError> {
        let prompt = self.build_prompt(workflow, results);
        let text = self.generate(&prompt, true).await?;
        Ok(self.parse_decision(workflow, &text))
    }
}

#[async_trait]
impl Recommender for GeminiPolicy {
    async fn recommend(&self, scan_results: &[Value]) -> Result<Recommendations, PolicyError> {
        let prompt = Self::build_recommendation_prompt(scan_results);
        let text = self.generate(&prompt, true).await?;
        serde_json::from_str(strip_code_fence(&text)).map_err(|e| {
            PolicyError::InvalidResponse(format!("Unparseable recommendations: {} - {}", e, text))
        })
    }
}
