use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use std::io;
use thiserror::Error;

use crate::registry::RegistryError;

/// Failures that abort an execution before a program outcome exists. The
/// engine turns every one of these into an `InternalError` result.
#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("unsupported language")]
    UnsupportedLanguage(#[from] RegistryError),
    #[error("failed to prepare workspace: {0}")]
    Workspace(#[source] io::Error),
    #[error("failed to write source file: {0}")]
    WriteSource(#[source] io::Error),
    #[error("failed to start `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("failed while waiting for `{program}`: {source}")]
    Wait {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("container error: {0}")]
    Container(String),
    #[error("launcher task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Unavailable(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
