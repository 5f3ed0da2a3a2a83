//! Gemini API wire types
//!
//! Request and response shapes for `generateContent`, plus the JSON document
//! the planner prompt asks the model to return.

use crate::models::JsonMap;
use serde::{Deserialize, Serialize};

/// Top-level Gemini API response
#[derive(Deserialize, Debug)]
pub struct GeminiApiResponse {
    /// Candidate responses from the model
    #[serde(default)]
    pub candidates: Vec<Candidate>,
    /// Feedback about the prompt (e.g. if it was blocked)
    #[serde(default, alias = "promptFeedback")]
    pub prompt_feedback: Option<PromptFeedback>,
}

/// A single candidate response
#[derive(Deserialize, Debug)]
pub struct Candidate {
    /// Content of this candidate
    pub content: Content,
}

/// Content made of parts
#[derive(Deserialize, Debug)]
pub struct Content {
    /// Content parts (typically one text part)
    #[serde(default)]
    pub parts: Vec<Part>,
}

/// A single text part
#[derive(Deserialize, Debug)]
pub struct Part {
    /// Text content
    #[serde(default)]
    pub text: String,
}

/// Why a prompt was rejected
#[derive(Deserialize, Debug)]
pub struct PromptFeedback {
    /// Block reason, if blocked
    #[serde(default, alias = "blockReason")]
    pub block_reason: Option<String>,
}

/// `generateContent` request body
#[derive(Serialize, Debug)]
pub struct GeminiApiRequest {
    /// Content items to send
    pub contents: Vec<RequestContent>,
    /// Generation options
    #[serde(rename = "generationConfig", skip_serializing_if = "Option::is_none")]
    pub generation_config: Option<GenerationConfig>,
}

impl GeminiApiRequest {
    /// A single-prompt request, optionally forcing a JSON response
    pub fn prompt(text: impl Into<String>, force_json: bool) -> Self {
        Self {
            contents: vec![RequestContent {
                parts: vec![RequestPart { text: text.into() }],
            }],
            generation_config: force_json.then(|| GenerationConfig {
                response_mime_type: Some("application/json".to_string()),
            }),
        }
    }
}

/// Request content
#[derive(Serialize, Debug)]
pub struct RequestContent {
    /// Content parts
    pub parts: Vec<RequestPart>,
}

/// Request text part
#[derive(Serialize, Debug)]
pub struct RequestPart {
    /// Text content
    pub text: String,
}

/// Generation options
#[derive(Serialize, Debug)]
pub struct GenerationConfig {
    /// MIME type to force for the response
    #[serde(rename = "responseMimeType", skip_serializing_if = "Option::is_none")]
    pub response_mime_type: Option<String>,
}

/// Decision document the planner prompt asks for
#[derive(Deserialize, Debug, Default)]
pub struct PlannerDecision {
    /// Follow-up steps
    #[serde(default)]
    pub next_steps: Vec<PlannedStep>,
    /// Free-text reasoning
    #[serde(default)]
    pub reasoning: String,
}

/// One follow-up step proposed by the model
#[derive(Deserialize, Debug)]
pub struct PlannedStep {
    /// Agent to run
    pub agent: String,
    /// Step input; `target` may be omitted
    #[serde(default)]
    pub input: JsonMap,
}
