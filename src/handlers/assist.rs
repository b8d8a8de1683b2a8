use axum::Json;
use axum::extract::State;
use metrics::counter;
use serde_json::Value;

use crate::ai::feedback::{self, Subject};
use crate::errors::ApiError;
use crate::types::{AppState, GenerateProblemRequest, ReviewCodeRequest};

pub async fn generate_problem_endpoint(
    State(state): State<AppState>,
    Json(payload): Json<GenerateProblemRequest>,
) -> Result<Json<Value>, ApiError> {
    counter!("requests_total", "route" => "generate-problem").increment(1);

    if payload.topic.trim().is_empty() {
        return Err(ApiError::BadRequest("Topic is required".to_string()));
    }
    let problem = feedback::generate_problem(state.assistant.generator(), &payload.topic).await;
    Ok(Json(problem))
}

/// Reviews code without executing it.
pub async fn review_code_endpoint(
    State(state): State<AppState>,
    Json(payload): Json<ReviewCodeRequest>,
) -> Result<Json<Value>, ApiError> {
    counter!("requests_total", "route" => "review-code").increment(1);

    if payload.code.is_empty() {
        return Err(ApiError::BadRequest("Code is required".to_string()));
    }
    let review = feedback::review_code(
        state.assistant.generator(),
        &payload.code,
        &payload.language.to_lowercase(),
        Subject::Passed { output: None },
        payload.problem.as_ref(),
    )
    .await;
    Ok(Json(review))
}
