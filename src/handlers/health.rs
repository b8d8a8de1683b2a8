use axum::Json;
use axum::extract::State;
use axum::http::header::CONTENT_TYPE;
use axum::response::IntoResponse;
use serde_json::{Value, json};

use crate::types::{AppState, LanguageInfo};

pub async fn health_endpoint(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "message": "Code execution service is running",
        "ai_model": state.assistant.model(),
    }))
}

pub async fn languages_endpoint(State(state): State<AppState>) -> Json<Vec<LanguageInfo>> {
    let languages = state
        .engine
        .registry()
        .languages()
        .into_iter()
        .map(|spec| LanguageInfo {
            id: spec.id(),
            source_extension: spec.source_extension(),
            compiled: spec.is_compiled(),
            timeout_seconds: spec.timeout().as_secs(),
        })
        .collect();
    Json(languages)
}

/// Prometheus text exposition of everything recorded through `metrics`.
pub async fn metrics_endpoint(State(state): State<AppState>) -> impl IntoResponse {
    state.prometheus_handle.run_upkeep();
    (
        [(CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        state.prometheus_handle.render(),
    )
}
