//! Chat-completion client abstraction.
//!
//! The [`CompletionClient`] trait turns an ordered list of role/content
//! messages into generated text. Two failure classes are distinguished:
//!
//! - **Structured upstream errors** (an HTTP error response with a JSON
//!   body) are relayed to the caller with the upstream status and body
//!   unchanged. These bodies are already written for API consumers.
//! - **Everything else** (network errors, non-JSON error bodies, malformed
//!   success payloads) becomes a sanitized failure whose message never
//!   contains internal detail. The detail is logged instead.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::config::CompletionConfig;
use crate::error::PipelineError;
use crate::models::Message;

/// Wraps a chat-completion model.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Generate a reply for `messages` using `model_id`. The reply is trimmed.
    async fn complete(&self, model_id: &str, messages: &[Message])
        -> Result<String, PipelineError>;
}

/// A completion client that always fails; used when `completion.provider = "disabled"`.
pub struct DisabledCompletionClient;

#[async_trait]
impl CompletionClient for DisabledCompletionClient {
    async fn complete(
        &self,
        _model_id: &str,
        _messages: &[Message],
    ) -> Result<String, PipelineError> {
        tracing::error!("completion requested but completion.provider is disabled");
        Err(PipelineError::completion_sanitized(500))
    }
}

/// Completion client for the OpenAI chat API (or any compatible server).
///
/// Calls `POST {base_url}/v1/chat/completions`.
pub struct OpenAiCompletionClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl OpenAiCompletionClient {
    /// Create a client from configuration, reading the API key from the environment.
    pub fn new(config: &CompletionConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env)
            .map_err(|_| anyhow::anyhow!("{} environment variable not set", config.api_key_env))?;
        Self::with_api_key(config, api_key)
    }

    pub fn with_api_key(config: &CompletionConfig, api_key: impl Into<String>) -> Result<Self> {
        let base_url = config
            .url
            .clone()
            .unwrap_or_else(|| "https://api.openai.com".to_string());

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            http,
            endpoint: format!("{}/v1/chat/completions", base_url.trim_end_matches('/')),
            api_key: api_key.into(),
        })
    }
}

#[async_trait]
impl CompletionClient for OpenAiCompletionClient {
    async fn complete(
        &self,
        model_id: &str,
        messages: &[Message],
    ) -> Result<String, PipelineError> {
        let body = serde_json::json!({
            "model": model_id,
            "messages": messages,
        });

        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Error with completion API request");
                PipelineError::completion_sanitized(500)
            })?;

        let status = response.status();
        let text = response.text().await.map_err(|e| {
            tracing::error!(error = %e, "Failed to read completion response body");
            PipelineError::completion_sanitized(500)
        })?;

        if !status.is_success() {
            tracing::error!(status = status.as_u16(), body = %text, "completion API returned an error");
            return Err(classify_upstream_error(status.as_u16(), &text));
        }

        let json: serde_json::Value = serde_json::from_str(&text).map_err(|e| {
            tracing::error!(error = %e, "completion response was not valid JSON");
            PipelineError::completion_sanitized(500)
        })?;

        parse_completion_response(&json).ok_or_else(|| {
            tracing::error!("Invalid completion response: missing choices[0].message.content");
            PipelineError::completion_sanitized(500)
        })
    }
}

/// Relay JSON error bodies verbatim; anything else keeps only the status.
fn classify_upstream_error(status: u16, body: &str) -> PipelineError {
    match serde_json::from_str::<serde_json::Value>(body) {
        Ok(json) if json.is_object() => PipelineError::completion_upstream(status, json),
        _ => PipelineError::completion_sanitized(status),
    }
}

fn parse_completion_response(json: &serde_json::Value) -> Option<String> {
    json.get("choices")?
        .as_array()?
        .first()?
        .pointer("/message/content")?
        .as_str()
        .map(|s| s.trim().to_string())
}

/// Create the [`CompletionClient`] named by `completion.provider`.
pub fn create_completion_client(config: &CompletionConfig) -> Result<Arc<dyn CompletionClient>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledCompletionClient)),
        "openai" => Ok(Arc::new(OpenAiCompletionClient::new(config)?)),
        other => bail!("Unknown completion provider: {}", other),
    }
}
