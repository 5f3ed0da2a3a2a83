//! Recommendation API handler

use super::AppState;
use crate::error::AppError;
use crate::policy::{generate_recommendations, RecommendationReport};
use axum::{extract::State, response::Json};
use serde_json::Value;
use std::sync::Arc;

/// POST /recommendations - Remediation advice for a set of scan results
///
/// Generation failures come back as a `{"status": "error"}` body with 200.
pub async fn recommend(
    State(state): State<Arc<AppState>>,
    Json(body): Json<Value>,
) -> Result<Json<RecommendationReport>, AppError> {
    let scan_results = body
        .get("scan_results")
        .and_then(Value::as_array)
        .ok_or_else(|| AppError::InvalidRequest("must include 'scan_results'".to_string()))?;

    let report = generate_recommendations(state.recommender.as_ref(), scan_results).await;
    Ok(Json(report))
}
