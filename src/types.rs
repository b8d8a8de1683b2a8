use metrics_exporter_prometheus::PrometheusHandle;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Semaphore;

use crate::ai::Assistant;
use crate::engine::Engine;
use crate::sandbox::Isolation;

/// Input to one execution. Never persisted.
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub source_code: String,
    pub language_id: String,
    pub stdin_text: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Success,
    CompileError,
    RuntimeError,
    Timeout,
    InternalError,
}

impl ExecutionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionStatus::Success => "success",
            ExecutionStatus::CompileError => "compile_error",
            ExecutionStatus::RuntimeError => "runtime_error",
            ExecutionStatus::Timeout => "timeout",
            ExecutionStatus::InternalError => "internal_error",
        }
    }
}

/// Outcome of one execution. Successful results carry stdout only, every
/// other status carries a diagnostic only.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    status: ExecutionStatus,
    stdout: Option<String>,
    diagnostic: Option<String>,
}

impl ExecutionResult {
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            status: ExecutionStatus::Success,
            stdout: Some(stdout.into()),
            diagnostic: None,
        }
    }

    pub fn failure(status: ExecutionStatus, diagnostic: impl Into<String>) -> Self {
        debug_assert_ne!(status, ExecutionStatus::Success);
        Self {
            status,
            stdout: None,
            diagnostic: Some(diagnostic.into()),
        }
    }

    pub fn compile_error(diagnostic: impl Into<String>) -> Self {
        Self::failure(ExecutionStatus::CompileError, diagnostic)
    }

    pub fn runtime_error(diagnostic: impl Into<String>) -> Self {
        Self::failure(ExecutionStatus::RuntimeError, diagnostic)
    }

    pub fn timeout(diagnostic: impl Into<String>) -> Self {
        Self::failure(ExecutionStatus::Timeout, diagnostic)
    }

    pub fn internal_error(diagnostic: impl Into<String>) -> Self {
        Self::failure(ExecutionStatus::InternalError, diagnostic)
    }

    pub fn status(&self) -> ExecutionStatus {
        self.status
    }

    pub fn is_success(&self) -> bool {
        self.status == ExecutionStatus::Success
    }

    pub fn stdout(&self) -> Option<&str> {
        self.stdout.as_deref()
    }

    pub fn diagnostic(&self) -> Option<&str> {
        self.diagnostic.as_deref()
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    5000
}

fn default_base_code_path() -> PathBuf {
    std::env::temp_dir().join("codebox")
}

fn default_max_concurrent_executions() -> usize {
    4
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_gemini_models() -> Vec<String> {
    ["gemini-1.5-flash", "gemini-1.5-pro", "gemini-pro"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_gemini_base_url() -> String {
    "https://generativelanguage.googleapis.com/v1beta".to_string()
}

fn default_true() -> bool {
    true
}

#[derive(Deserialize, Debug, Clone)]
pub struct AppConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Parent directory of the per-execution workspaces.
    #[serde(default = "default_base_code_path")]
    pub base_code_path: PathBuf,
    #[serde(default)]
    pub isolation: Isolation,
    #[serde(default = "default_max_concurrent_executions")]
    pub max_concurrent_executions: usize,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Per-language timeout overrides in seconds, keyed by language id.
    #[serde(default)]
    pub timeouts: HashMap<String, u64>,
    #[serde(default)]
    pub gemini_api_key: Option<String>,
    /// Models to try, most preferred first.
    #[serde(default = "default_gemini_models")]
    pub gemini_models: Vec<String>,
    #[serde(default = "default_gemini_base_url")]
    pub gemini_base_url: String,
    /// Send a short prompt to each model at startup and keep the first that
    /// answers. When disabled the first model is used without checking.
    #[serde(default = "default_true")]
    pub gemini_probe: bool,
}

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
    pub assistant: Arc<Assistant>,
    pub execution_slots: Arc<Semaphore>,
    pub prometheus_handle: PrometheusHandle,
}

#[derive(Deserialize, Debug)]
pub struct ExecuteCodeRequest {
    #[serde(default)]
    pub code: String,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default)]
    pub custom_input: Option<String>,
}

fn default_language() -> String {
    "python".to_string()
}

#[derive(Serialize, Debug)]
pub struct ExecuteCodeResponse {
    pub success: bool,
    pub output: Option<String>,
    pub error: Option<String>,
    pub ai_feedback: Value,
}

#[derive(Deserialize, Debug)]
pub struct GenerateProblemRequest {
    #[serde(default)]
    pub topic: String,
}

#[derive(Deserialize, Debug)]
pub struct ReviewCodeRequest {
    #[serde(default)]
    pub code: String,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default)]
    pub problem: Option<Value>,
}

#[derive(Serialize, Debug)]
pub struct LanguageInfo {
    pub id: &'static str,
    pub source_extension: &'static str,
    pub compiled: bool,
    pub timeout_seconds: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn results_keep_stdout_and_diagnostic_exclusive() {
        let ok = ExecutionResult::success("4\n");
        assert!(ok.is_success());
        assert_eq!(ok.stdout(), Some("4\n"));
        assert_eq!(ok.diagnostic(), None);

        for failed in [
            ExecutionResult::compile_error("e"),
            ExecutionResult::runtime_error("e"),
            ExecutionResult::timeout("e"),
            ExecutionResult::internal_error("e"),
        ] {
            assert!(!failed.is_success());
            assert_eq!(failed.stdout(), None);
            assert_eq!(failed.diagnostic(), Some("e"));
        }
    }

    #[test]
    fn status_serializes_in_snake_case() {
        let json = serde_json::to_value(ExecutionResult::compile_error("x")).unwrap();
        assert_eq!(json["status"], "compile_error");
        assert_eq!(json["stdout"], Value::Null);
    }

    #[test]
    fn config_defaults_fill_missing_keys() {
        let config: AppConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.port, 5000);
        assert_eq!(config.isolation, Isolation::Process);
        assert_eq!(config.max_concurrent_executions, 4);
        assert_eq!(config.gemini_models[0], "gemini-1.5-flash");
        assert!(config.timeouts.is_empty());
    }

    #[test]
    fn execute_request_defaults_to_python() {
        let request: ExecuteCodeRequest = serde_json::from_str(r#"{"code":"print(1)"}"#).unwrap();
        assert_eq!(request.language, "python");
        assert_eq!(request.custom_input, None);
    }
}
