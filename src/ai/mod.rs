//! Text-generation collaborator used for problem generation and code review.
//!
//! The service never depends on it for executing code: when no model is
//! reachable the [`Assistant`] is [`Assistant::Unavailable`] and callers fall
//! back to static responses.

mod extract;
pub mod feedback;
mod gemini;

use std::future::Future;
use thiserror::Error;

pub use extract::extract_json_object;
pub use gemini::GeminiClient;

const PROBE_PROMPT: &str = "Hello";

#[derive(Error, Debug)]
pub enum AiError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("API error {status}: {body}")]
    Api { status: u16, body: String },
    #[error("response contained no text")]
    EmptyResponse,
    #[error("could not parse JSON from response: {0}")]
    Parse(String),
}

pub trait TextGenerator {
    fn generate(&self, prompt: &str) -> impl Future<Output = Result<String, AiError>> + Send;
}

/// Resolved once at startup and shared by reference with request handlers.
#[derive(Debug)]
pub enum Assistant {
    Available(GeminiClient),
    Unavailable,
}

impl Assistant {
    /// Picks the first model of `models` that answers a probe prompt. Without
    /// an API key, or when no model answers, the assistant is unavailable.
    pub async fn connect(
        api_key: Option<String>,
        base_url: &str,
        models: &[String],
        probe: bool,
    ) -> Self {
        let Some(api_key) = api_key.filter(|key| !key.trim().is_empty()) else {
            tracing::warn!("no Gemini API key configured; AI features will use fallback responses");
            return Assistant::Unavailable;
        };

        for model in models {
            let client = GeminiClient::new(api_key.clone(), model.clone(), base_url.to_string());
            if !probe {
                tracing::info!(model = %model, "using Gemini model without probing");
                return Assistant::Available(client);
            }
            match client.generate(PROBE_PROMPT).await {
                Ok(_) => {
                    tracing::info!(model = %model, "using Gemini model");
                    return Assistant::Available(client);
                }
                Err(e) => tracing::warn!(model = %model, "model unavailable: {}", e),
            }
        }

        tracing::warn!("no Gemini model available; AI features will use fallback responses");
        Assistant::Unavailable
    }

    pub fn generator(&self) -> Option<&GeminiClient> {
        match self {
            Assistant::Available(client) => Some(client),
            Assistant::Unavailable => None,
        }
    }

    pub fn model(&self) -> Option<&str> {
        self.generator().map(GeminiClient::model)
    }
}
