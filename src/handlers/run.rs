use axum::Json;
use axum::extract::State;
use metrics::counter;

use crate::ai::feedback::{self, Subject};
use crate::errors::ApiError;
use crate::types::{AppState, ExecuteCodeRequest, ExecuteCodeResponse, ExecutionRequest};

pub async fn execute_code_endpoint(
    State(state): State<AppState>,
    Json(payload): Json<ExecuteCodeRequest>,
) -> Result<Json<ExecuteCodeResponse>, ApiError> {
    counter!("requests_total", "route" => "execute-code").increment(1);

    if payload.code.is_empty() {
        return Err(ApiError::BadRequest("Code is required".to_string()));
    }
    let language = payload.language.to_lowercase();

    let result = {
        let _permit = state
            .execution_slots
            .acquire()
            .await
            .map_err(|_| ApiError::Unavailable("execution service is shutting down".to_string()))?;

        state
            .engine
            .execute(ExecutionRequest {
                source_code: payload.code.clone(),
                language_id: language.clone(),
                stdin_text: payload.custom_input,
            })
            .await
    };

    let subject = match result.diagnostic() {
        Some(error) => Subject::Failed { error },
        None => Subject::Passed {
            output: result.stdout(),
        },
    };
    let ai_feedback = feedback::review_code(
        state.assistant.generator(),
        &payload.code,
        &language,
        subject,
        None,
    )
    .await;

    Ok(Json(ExecuteCodeResponse {
        success: result.is_success(),
        output: result.stdout().map(String::from),
        error: result.diagnostic().map(String::from),
        ai_feedback,
    }))
}

#[cfg(test)]
mod tests {
    use crate::handlers::router;
    use crate::handlers::tests::{send, test_state};
    use axum::http::StatusCode;
    use serde_json::{Value, json};

    fn python_available() -> bool {
        which::which("python3").is_ok()
    }

    #[tokio::test]
    async fn empty_code_is_rejected() {
        let base = tempfile::tempdir().unwrap();
        let (status, body) = send(
            router(test_state(base.path())),
            "POST",
            "/execute-code",
            Some(json!({ "code": "", "language": "python" })),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, json!({ "error": "Code is required" }));
    }

    #[tokio::test]
    async fn successful_run_maps_to_output() {
        if !python_available() {
            return;
        }
        let base = tempfile::tempdir().unwrap();
        let (status, body) = send(
            router(test_state(base.path())),
            "POST",
            "/execute-code",
            Some(json!({ "code": "print(input()[::-1])", "language": "Python", "custom_input": "abc" })),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["output"], "cba\n");
        assert_eq!(body["error"], Value::Null);
        assert_eq!(body["ai_feedback"]["quality_assessment"], "Code executed successfully");
    }

    #[tokio::test]
    async fn language_defaults_to_python() {
        if !python_available() {
            return;
        }
        let base = tempfile::tempdir().unwrap();
        let (_, body) = send(
            router(test_state(base.path())),
            "POST",
            "/execute-code",
            Some(json!({ "code": "print('default')" })),
        )
        .await;
        assert_eq!(body["output"], "default\n");
    }

    #[tokio::test]
    async fn failures_map_to_error() {
        let base = tempfile::tempdir().unwrap();
        let (status, body) = send(
            router(test_state(base.path())),
            "POST",
            "/execute-code",
            Some(json!({ "code": "puts 1", "language": "ruby" })),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            json!({
                "success": false,
                "output": null,
                "error": "unsupported language",
                "ai_feedback": {
                    "error_analysis": "Code execution failed",
                    "solution": "Check your code syntax and logic",
                    "best_practices": "Always test your code with simple examples first",
                    "suggested_code": "Unable to provide specific suggestions without AI model"
                }
            })
        );
    }
}
