//! Runs one submission end to end.
//!
//! The order is always write, compile, run; each stage starts only after the
//! previous one finished. Every failure is turned into an [`ExecutionResult`]
//! so callers never see an error from [`Engine::execute`], and the workspace
//! is removed on every exit path when it goes out of scope.

use metrics::{counter, gauge, histogram};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use crate::errors::ExecutionError;
use crate::files::Workspace;
use crate::registry::{Placeholders, Registry};
use crate::sandbox::{Launcher, Step, StepOutput, Termination};
use crate::types::{ExecutionRequest, ExecutionResult};

const COMPILE_TIMED_OUT: &str = "compilation timed out";
const RUN_TIMED_OUT: &str = "execution timed out";

pub struct Engine {
    registry: Arc<Registry>,
    launcher: Launcher,
    base_path: PathBuf,
}

impl Engine {
    pub fn new(registry: Arc<Registry>, launcher: Launcher, base_path: impl Into<PathBuf>) -> Self {
        Self {
            registry,
            launcher,
            base_path: base_path.into(),
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    #[tracing::instrument(skip_all, fields(language = %request.language_id, launcher = self.launcher.kind()))]
    pub async fn execute(&self, request: ExecutionRequest) -> ExecutionResult {
        let started = Instant::now();
        let active = ActiveExecution::start();

        let result = match self.try_execute(&request).await {
            Ok(result) => result,
            Err(e) => {
                tracing::error!("execution failed internally: {}", e);
                ExecutionResult::internal_error(e.to_string())
            }
        };

        drop(active);
        counter!("executions_total", "outcome" => result.status().as_str()).increment(1);
        histogram!("execution_total_duration_ms").record(started.elapsed().as_millis() as f64);
        tracing::info!(
            status = result.status().as_str(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "execution finished"
        );

        result
    }

    async fn try_execute(&self, request: &ExecutionRequest) -> Result<ExecutionResult, ExecutionError> {
        let spec = self.registry.lookup(&request.language_id)?;

        let workspace = Workspace::create(&self.base_path).map_err(ExecutionError::Workspace)?;
        workspace
            .write_source(spec.source_extension(), &request.source_code)
            .map_err(ExecutionError::WriteSource)?;

        let placeholders = Placeholders::rooted_at(
            self.launcher.visible_root(workspace.path()),
            spec.source_extension(),
        );

        for template in spec.compile_steps() {
            let argv = template.resolve(&placeholders);
            tracing::debug!(?argv, "compiling");
            let output = self
                .launcher
                .launch(Step {
                    argv: &argv,
                    workdir: workspace.path(),
                    stdin: None,
                    timeout: spec.timeout(),
                })
                .await?;

            match output.termination {
                Termination::TimedOut => return Ok(ExecutionResult::timeout(COMPILE_TIMED_OUT)),
                Termination::Exited(0) => {}
                Termination::Exited(code) => {
                    return Ok(ExecutionResult::compile_error(diagnostic(&output, code)));
                }
            }
        }

        let argv = spec.run_step().resolve(&placeholders);
        tracing::debug!(?argv, "running");
        let output = self
            .launcher
            .launch(Step {
                argv: &argv,
                workdir: workspace.path(),
                stdin: request.stdin_text.as_deref(),
                timeout: spec.timeout(),
            })
            .await?;

        Ok(match output.termination {
            Termination::TimedOut => ExecutionResult::timeout(RUN_TIMED_OUT),
            Termination::Exited(0) => {
                ExecutionResult::success(String::from_utf8_lossy(&output.stdout).into_owned())
            }
            Termination::Exited(code) => ExecutionResult::runtime_error(diagnostic(&output, code)),
        })
    }
}

/// Holds one slot of the `active_executions` gauge, also when the execution
/// is cancelled halfway.
struct ActiveExecution;

impl ActiveExecution {
    fn start() -> Self {
        gauge!("active_executions").increment(1.0);
        ActiveExecution
    }
}

impl Drop for ActiveExecution {
    fn drop(&mut self) {
        gauge!("active_executions").decrement(1.0);
    }
}

/// Captured stderr, or the exit status when the program wrote nothing there.
fn diagnostic(output: &StepOutput, code: i32) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr);
    if stderr.trim().is_empty() {
        format!("process exited with status {code}")
    } else {
        stderr.into_owned()
    }
}
