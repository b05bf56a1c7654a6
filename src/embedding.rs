//! Embedding client abstraction and implementations.
//!
//! Defines the [`EmbeddingClient`] trait and concrete implementations:
//! - **[`DisabledEmbeddingClient`]**: returns errors; used when embeddings are not configured.
//! - **[`OpenAiEmbeddingClient`]**: calls an OpenAI-compatible `/v1/embeddings` endpoint.
//! - **[`OllamaEmbeddingClient`]**: calls a local Ollama instance's `/api/embed` endpoint.
//!
//! Also provides vector utilities for the SQLite store:
//! - [`cosine_similarity`]: compute similarity between two embedding vectors
//! - [`vec_to_blob`]: encode a `&[f32]` as little-endian bytes for SQLite BLOB storage
//! - [`blob_to_vec`]: decode a SQLite BLOB back into a `Vec<f32>`
//!
//! # Retry Strategy
//!
//! Retries are an adapter concern; the pipeline itself never retries. With
//! `embedding.max_retries > 0` the HTTP clients retry transient failures:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)
//!
//! The default is `max_retries = 0`: fail on the first upstream error.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::config::EmbeddingConfig;
use crate::error::PipelineError;
use crate::models::EmbeddingVector;

/// Wraps a text-embedding model.
///
/// Implementations hold only immutable configuration and a shared HTTP
/// client, so one instance serves every concurrent request.
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    /// Returns the model identifier (e.g. `"text-embedding-ada-002"`).
    fn model_name(&self) -> &str;

    /// Embed a single non-empty text.
    ///
    /// Fails with an `EmbeddingFailure` carrying the upstream status, or 500
    /// when the upstream could not be reached.
    async fn embed(&self, text: &str) -> Result<EmbeddingVector, PipelineError>;
}

// ============ Disabled Client ============

/// A no-op embedding client that always fails.
///
/// Used when `embedding.provider = "disabled"` in the configuration.
pub struct DisabledEmbeddingClient;

#[async_trait]
impl EmbeddingClient for DisabledEmbeddingClient {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn embed(&self, _text: &str) -> Result<EmbeddingVector, PipelineError> {
        tracing::error!("embedding requested but embedding.provider is disabled");
        Err(PipelineError::embedding(500))
    }
}

// ============ Shared HTTP plumbing ============

/// POST a JSON body, retrying 429/5xx/network failures up to `max_retries` times.
async fn post_with_retry(
    http: &reqwest::Client,
    url: &str,
    api_key: Option<&str>,
    body: &serde_json::Value,
    max_retries: u32,
) -> Result<serde_json::Value, PipelineError> {
    let mut last_status = 500;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            // Exponential backoff: 1s, 2s, 4s, 8s, ...
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            tokio::time::sleep(delay).await;
        }

        let mut request = http.post(url).json(body);
        if let Some(key) = api_key {
            request = request.bearer_auth(key);
        }

        match request.send().await {
            Ok(response) => {
                let status = response.status();

                if status.is_success() {
                    return response.json().await.map_err(|e| {
                        tracing::error!(error = %e, "embedding response was not valid JSON");
                        PipelineError::embedding(500)
                    });
                }

                let body_text = response.text().await.unwrap_or_default();
                tracing::warn!(
                    status = status.as_u16(),
                    attempt,
                    body = %body_text,
                    "Failed to create embedding"
                );
                last_status = status.as_u16();

                // Client error other than 429: no retry
                if status.as_u16() != 429 && !status.is_server_error() {
                    break;
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, attempt, url, "embedding request failed");
                last_status = 500;
            }
        }
    }

    Err(PipelineError::embedding(last_status))
}

fn check_dims(vector: Vec<f32>, expected: Option<usize>) -> Result<EmbeddingVector, PipelineError> {
    if vector.is_empty() {
        tracing::error!("embedding response contained an empty vector");
        return Err(PipelineError::embedding(500));
    }
    if let Some(dims) = expected {
        if vector.len() != dims {
            tracing::error!(
                expected = dims,
                actual = vector.len(),
                "embedding dimension mismatch"
            );
            return Err(PipelineError::embedding(500));
        }
    }
    Ok(EmbeddingVector::new(vector))
}

/// `None` if any element is not a number.
fn json_floats(values: &[serde_json::Value]) -> Option<Vec<f32>> {
    values
        .iter()
        .map(|v| v.as_f64().map(|f| f as f32))
        .collect()
}

fn reject_empty(text: &str) -> Result<(), PipelineError> {
    if text.trim().is_empty() {
        return Err(PipelineError::invalid_input("Cannot embed empty text"));
    }
    Ok(())
}

// ============ OpenAI Client ============

/// Embedding client for the OpenAI API (or any compatible server).
///
/// Calls `POST {base_url}/v1/embeddings`. The API key is read once from the
/// environment variable named by `embedding.api_key_env`.
pub struct OpenAiEmbeddingClient {
    http: reqwest::Client,
    endpoint: String,
    model: String,
    dims: Option<usize>,
    api_key: String,
    max_retries: u32,
}

impl OpenAiEmbeddingClient {
    /// Create a client from configuration, reading the API key from the environment.
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env)
            .map_err(|_| anyhow::anyhow!("{} environment variable not set", config.api_key_env))?;
        Self::with_api_key(config, api_key)
    }

    pub fn with_api_key(config: &EmbeddingConfig, api_key: impl Into<String>) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for OpenAI provider"))?;
        let base_url = config
            .url
            .clone()
            .unwrap_or_else(|| "https://api.openai.com".to_string());

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            http,
            endpoint: format!("{}/v1/embeddings", base_url.trim_end_matches('/')),
            model,
            dims: config.dims,
            api_key: api_key.into(),
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl EmbeddingClient for OpenAiEmbeddingClient {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed(&self, text: &str) -> Result<EmbeddingVector, PipelineError> {
        reject_empty(text)?;

        let body = serde_json::json!({
            "model": self.model,
            "input": text,
        });

        let json = post_with_retry(
            &self.http,
            &self.endpoint,
            Some(&self.api_key),
            &body,
            self.max_retries,
        )
        .await?;

        let vector = parse_openai_response(&json).ok_or_else(|| {
            tracing::error!("Invalid OpenAI response: missing or non-numeric data[0].embedding");
            PipelineError::embedding(500)
        })?;

        tracing::debug!(model = %self.model, dims = vector.len(), "embedding created");
        check_dims(vector, self.dims)
    }
}

/// Extract `data[0].embedding` from an OpenAI embeddings response.
fn parse_openai_response(json: &serde_json::Value) -> Option<Vec<f32>> {
    let embedding = json
        .get("data")?
        .as_array()?
        .first()?
        .get("embedding")?
        .as_array()?;
    json_floats(embedding)
}

// ============ Ollama Client ============

/// Embedding client using a local Ollama instance.
///
/// Calls `POST /api/embed` on the configured Ollama URL (default: `http://localhost:11434`).
pub struct OllamaEmbeddingClient {
    http: reqwest::Client,
    endpoint: String,
    model: String,
    dims: Option<usize>,
    max_retries: u32,
}

impl OllamaEmbeddingClient {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for Ollama provider"))?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "http://localhost:11434".to_string());

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            http,
            endpoint: format!("{}/api/embed", url.trim_end_matches('/')),
            model,
            dims: config.dims,
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl EmbeddingClient for OllamaEmbeddingClient {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed(&self, text: &str) -> Result<EmbeddingVector, PipelineError> {
        reject_empty(text)?;

        let body = serde_json::json!({
            "model": self.model,
            "input": [text],
        });

        let json =
            post_with_retry(&self.http, &self.endpoint, None, &body, self.max_retries).await?;

        let vector = parse_ollama_response(&json).ok_or_else(|| {
            tracing::error!("Invalid Ollama response: missing or non-numeric embeddings[0]");
            PipelineError::embedding(500)
        })?;

        check_dims(vector, self.dims)
    }
}

fn parse_ollama_response(json: &serde_json::Value) -> Option<Vec<f32>> {
    let embedding = json.get("embeddings")?.as_array()?.first()?.as_array()?;
    json_floats(embedding)
}

/// Create the appropriate [`EmbeddingClient`] based on configuration.
///
/// | Config Value | Client |
/// |-------------|----------|
/// | `"disabled"` | [`DisabledEmbeddingClient`] |
/// | `"openai"` | [`OpenAiEmbeddingClient`] |
/// | `"ollama"` | [`OllamaEmbeddingClient`] |
pub fn create_embedding_client(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingClient>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledEmbeddingClient)),
        "openai" => Ok(Arc::new(OpenAiEmbeddingClient::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaEmbeddingClient::new(config)?)),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
///
/// ```rust
/// use chat_harness::embedding::{vec_to_blob, blob_to_vec};
///
/// let v = vec![1.0f32, -2.5, 3.125];
/// let blob = vec_to_blob(&v);
/// assert_eq!(blob.len(), 12); // 3 × 4 bytes
/// assert_eq!(blob_to_vec(&blob), v);
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns a value in `[-1.0, 1.0]`, or `0.0` for empty vectors or vectors
/// of different lengths.
///
/// ```text
///            a · b
/// cos(θ) = ─────────
///          ‖a‖ × ‖b‖
/// ```
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}
