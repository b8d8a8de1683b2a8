pub mod assist;
pub mod health;
pub mod run;

use axum::{
    Router,
    routing::{get, post},
};
use tower_http::cors::CorsLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};

use crate::types::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/execute-code", post(run::execute_code_endpoint))
        .route("/generate-problem", post(assist::generate_problem_endpoint))
        .route("/review-code", post(assist::review_code_endpoint))
        .route("/languages", get(health::languages_endpoint))
        .route("/health", get(health::health_endpoint))
        .route("/metrics", get(health::metrics_endpoint))
        .layer(CorsLayer::permissive())
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(tracing::Level::INFO))
                .on_response(DefaultOnResponse::new().level(tracing::Level::INFO)),
        )
        .with_state(state)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::ai::Assistant;
    use crate::engine::Engine;
    use crate::registry::Registry;
    use crate::sandbox::{Isolation, Launcher};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use metrics_exporter_prometheus::PrometheusBuilder;
    use serde_json::Value;
    use std::path::Path;
    use std::sync::Arc;
    use tokio::sync::Semaphore;
    use tower::ServiceExt;

    pub(crate) fn test_state(base: &Path) -> AppState {
        AppState {
            engine: Arc::new(Engine::new(
                Arc::new(Registry::default()),
                Launcher::new(Isolation::Process),
                base,
            )),
            assistant: Arc::new(Assistant::Unavailable),
            execution_slots: Arc::new(Semaphore::new(2)),
            prometheus_handle: PrometheusBuilder::new().build_recorder().handle(),
        }
    }

    pub(crate) async fn send(app: Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()));
        (status, value)
    }

    #[tokio::test]
    async fn unknown_routes_are_not_found() {
        let base = tempfile::tempdir().unwrap();
        let (status, _) = send(router(test_state(base.path())), "GET", "/nope", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
