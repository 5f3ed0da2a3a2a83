//! Remediation recommendations
//!
//! Scan results go to a [`Recommender`], which returns prioritized
//! remediation advice. Failures are folded into the report rather than raised.

use super::{NoFollowUp, PolicyError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

/// Advice produced for a set of scan results
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Recommendations {
    /// Remediation items, most urgent first
    #[serde(default)]
    pub recommendations: Vec<Value>,
    /// Vulnerabilities ordered by priority
    #[serde(default)]
    pub prioritized_vulnerabilities: Vec<Value>,
}

/// Response body of a recommendation request
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum RecommendationReport {
    /// Advice was generated
    Success {
        /// Remediation items
        recommendations: Vec<Value>,
        /// Vulnerabilities ordered by priority
        prioritized_vulnerabilities: Vec<Value>,
    },
    /// Generation failed
    Error {
        /// What went wrong
        message: String,
    },
}

/// Turns scan results into remediation advice
#[async_trait]
pub trait Recommender: Send + Sync {
    /// Generate recommendations for the given results
    async fn recommend(&self, scan_results: &[Value]) -> Result<Recommendations, PolicyError>;
}

#[async_trait]
impl Recommender for NoFollowUp {
    async fn recommend(&self, _scan_results: &[Value]) -> Result<Recommendations, PolicyError> {
        Err(PolicyError::MissingApiKey)
    }
}

/// Run a recommender and wrap the outcome in a report
pub async fn generate_recommendations(
    recommender: &dyn Recommender,
    scan_results: &[Value],
) -> RecommendationReport {
    match recommender.recommend(scan_results).await {
        Ok(advice) => RecommendationReport::Success {
            recommendations: advice.recommendations,
            prioritized_vulnerabilities: advice.prioritized_vulnerabilities,
        },
        Err(e) => {
            warn!(results = scan_results.len(), error = %e, "Recommendation generation failed");
            RecommendationReport::Error {
                message: e.to_string(),
            }
        }
    }
}
