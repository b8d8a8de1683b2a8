mod ai;
mod engine;
mod errors;
mod files;
mod handlers;
mod registry;
mod sandbox;
mod types;

use std::error::Error;
use std::str::FromStr;
use std::sync::Arc;

use config::Config;
use dotenvy::dotenv;
use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::sync::Semaphore;

use crate::{
    ai::Assistant,
    engine::Engine,
    registry::Registry,
    sandbox::Launcher,
    types::{AppConfig, AppState},
};

fn load_config() -> Result<AppConfig, config::ConfigError> {
    Config::builder()
        .add_source(config::File::with_name("Settings").required(false))
        .add_source(
            config::Environment::with_prefix("APP")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
        .build()?
        .try_deserialize()
}

fn describe_metrics() {
    describe_counter!("requests_total", "Total number of API requests by route");
    describe_counter!("executions_total", "Total number of executions by outcome");
    describe_histogram!(
        "execution_total_duration_ms",
        "Total execution duration including setup in milliseconds"
    );
    describe_gauge!("active_executions", "Number of executions currently running");
    describe_counter!("files_created_total", "Total number of source files written");
    describe_counter!("ai_requests_total", "Text generation requests by outcome");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    dotenv().ok();
    let app_config = load_config()?;

    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::from_str(&app_config.log_level).unwrap_or(tracing::Level::INFO))
        .init();

    let handle = PrometheusBuilder::new().install_recorder()?;
    describe_metrics();

    let registry = Registry::default().with_timeouts(&app_config.timeouts)?;
    for spec in registry.languages() {
        tracing::info!(language = spec.id(), timeout = ?spec.timeout(), "language registered");
    }

    let launcher = Launcher::new(app_config.isolation);
    tracing::info!(
        isolation = launcher.kind(),
        base_code_path = %app_config.base_code_path.display(),
        max_concurrent_executions = app_config.max_concurrent_executions,
        "execution engine ready"
    );
    let engine = Engine::new(Arc::new(registry), launcher, app_config.base_code_path.clone());

    let api_key = app_config
        .gemini_api_key
        .clone()
        .or_else(|| std::env::var("GEMINI_API_KEY").ok());
    let assistant = Assistant::connect(
        api_key,
        &app_config.gemini_base_url,
        &app_config.gemini_models,
        app_config.gemini_probe,
    )
    .await;

    let app = handlers::router(AppState {
        engine: Arc::new(engine),
        assistant: Arc::new(assistant),
        execution_slots: Arc::new(Semaphore::new(app_config.max_concurrent_executions.max(1))),
        prometheus_handle: handle,
    });

    let listener =
        tokio::net::TcpListener::bind(format!("{}:{}", app_config.host, app_config.port)).await?;

    tracing::info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}
