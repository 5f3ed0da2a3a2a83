//! Decision policies
//!
//! After every completed step the scheduler asks a [`DecisionPolicy`] which
//! follow-up steps, if any, to schedule. The scheduler treats the policy as
//! opaque and possibly slow; it gives no termination guarantee.

pub mod gemini;
pub mod gemini_types;
pub mod recommend;

use crate::models::{AgentDecision, ScanResult, Workflow};
use async_trait::async_trait;
pub use gemini::GeminiPolicy;
pub use recommend::{generate_recommendations, RecommendationReport, Recommendations, Recommender};
use thiserror::Error;

/// Errors raised while deciding next steps
#[derive(Error, Debug)]
pub enum PolicyError {
    /// No API key configured
    #[error("API key is empty")]
    MissingApiKey,

    /// HTTP request could not be sent or read
    #[error("Failed to reach decision backend: {0}")]
    Transport(#[from] reqwest::Error),

    /// Rate limited by the backend
    #[error("Decision backend rate limit exceeded (HTTP 429): {0}")]
    RateLimited(String),

    /// Backend returned a non-success status
    #[error("Decision backend returned error status {status}: {body}")]
    Api {
        /// HTTP status
        status: u16,
        /// Response body
        body: String,
    },

    /// The prompt was blocked
    #[error("Decision backend blocked the prompt: {0}")]
    Blocked(String),

    /// The response could not be understood
    #[error("Invalid decision backend response: {0}")]
    InvalidResponse(String),
}

/// Proposes follow-up steps from a workflow and the results so far
#[async_trait]
pub trait DecisionPolicy: Send + Sync {
    /// Decide which steps to schedule next; an empty list ends the feedback loop
    async fn decide_next_steps(
        &self,
        workflow: &Workflow,
        results: &[ScanResult],
    ) -> Result<AgentDecision, PolicyError>;
}

/// Policy that never proposes follow-up steps
#[derive(Debug, Clone, Copy, Default)]
pub struct NoFollowUp;

#[async_trait]
impl DecisionPolicy for NoFollowUp {
    async fn decide_next_steps(
        &self,
        workflow: &Workflow,
        _results: &[ScanResult],
    ) -> Result<AgentDecision, PolicyError> {
        Ok(AgentDecision::none(&workflow.id, "no follow-up policy configured"))
    }
}
