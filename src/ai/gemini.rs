//! Minimal client for the Gemini `generateContent` endpoint.

use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::fmt;
use std::time::Duration;

use super::{AiError, TextGenerator};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
const API_KEY_HEADER: &str = "x-goog-api-key";

#[derive(Clone)]
pub struct GeminiClient {
    api_key: String,
    model: String,
    client: Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiContent>,
}

#[derive(Debug, Deserialize)]
struct GeminiContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Deserialize)]
struct GeminiPart {
    text: Option<String>,
}

impl GeminiClient {
    pub fn new(api_key: String, model: String, base_url: String) -> Self {
        Self {
            api_key,
            model,
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

impl fmt::Debug for GeminiClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeminiClient")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl TextGenerator for GeminiClient {
    async fn generate(&self, prompt: &str) -> Result<String, AiError> {
        let url = format!("{}/models/{}:generateContent", self.base_url, self.model);
        let body = json!({
            "contents": [{ "role": "user", "parts": [{ "text": prompt }] }]
        });

        let response = self
            .client
            .post(&url)
            .header(API_KEY_HEADER, &self.api_key)
            .timeout(REQUEST_TIMEOUT)
            .json(&body)
            .send()
            .await
            .map_err(strip_url)?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(AiError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: GeminiResponse = response.json().await.map_err(strip_url)?;
        let text: String = parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|candidate| candidate.content)
            .map(|content| {
                content
                    .parts
                    .into_iter()
                    .filter_map(|part| part.text)
                    .collect()
            })
            .unwrap_or_default();

        if text.is_empty() {
            return Err(AiError::EmptyResponse);
        }
        Ok(text)
    }
}

/// Transport errors end up in responses and logs; keep them free of URLs.
fn strip_url(e: reqwest::Error) -> AiError {
    AiError::Request(e.without_url())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::tests::start_mock_gemini;

    const KEY: &str = "SECRET-KEY-123";

    #[tokio::test]
    async fn transport_errors_do_not_reveal_the_key() {
        let client = GeminiClient::new(KEY.into(), "m".into(), "http://127.0.0.1:9".into());
        let err = client.generate("hi").await.unwrap_err();

        assert!(matches!(err, AiError::Request(_)));
        assert!(!err.to_string().contains(KEY));
        assert!(!format!("{err:?}").contains(KEY));
        assert!(!format!("{client:?}").contains(KEY));
    }

    #[tokio::test]
    async fn key_is_sent_as_a_header() {
        let (base_url, _) = start_mock_gemini(Vec::new()).await;

        let client = GeminiClient::new("key".into(), "m".into(), base_url.clone());
        assert_eq!(client.generate("ping").await.unwrap(), "m says ping");

        let anonymous = GeminiClient::new(String::new(), "m".into(), base_url);
        assert!(matches!(
            anonymous.generate("ping").await,
            Err(AiError::Api { status: 401, .. })
        ));
    }
}
