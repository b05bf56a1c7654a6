//! Unified error type for the chat pipeline.
//!
//! Every stage of the pipeline fails with a [`PipelineError`] carrying the
//! failure [`ErrorKind`], the HTTP status to surface, a user-safe message,
//! and (for relayed completion errors only) the upstream JSON body.
//!
//! # Error Contract
//!
//! Errors cross the HTTP boundary as:
//!
//! ```json
//! { "error": { "message": "Failed to match embeddings" } }
//! ```
//!
//! except structured upstream completion errors, whose body is relayed
//! verbatim with the upstream status.
//!
//! | Kind | Status |
//! |------|--------|
//! | `InvalidInput` | 400 |
//! | `AuthMissing` | 401 |
//! | `AuthInvalid` | 403 |
//! | `EmbeddingFailure` | upstream status or 500 |
//! | `RetrievalFailure` | 500 |
//! | `CompletionFailure` | upstream status + body, or 500 |
//! | `PersistenceFailure` | 500 |

use serde_json::{json, Value};
use thiserror::Error;

/// Message returned for failures whose detail must not leave the process.
pub const SANITIZED_MESSAGE: &str = "An error occurred during your request.";

/// The category of a pipeline failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidInput,
    AuthMissing,
    AuthInvalid,
    EmbeddingFailure,
    RetrievalFailure,
    CompletionFailure,
    PersistenceFailure,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::AuthMissing => "auth_missing",
            ErrorKind::AuthInvalid => "auth_invalid",
            ErrorKind::EmbeddingFailure => "embedding_failure",
            ErrorKind::RetrievalFailure => "retrieval_failure",
            ErrorKind::CompletionFailure => "completion_failure",
            ErrorKind::PersistenceFailure => "persistence_failure",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failure produced by any stage of the pipeline or its collaborators.
#[derive(Debug, Clone, Error)]
#[error("{kind} ({status}): {message}")]
pub struct PipelineError {
    pub kind: ErrorKind,
    pub status: u16,
    pub message: String,
    /// Upstream JSON error body, relayed verbatim when present.
    pub upstream_body: Option<Value>,
}

impl PipelineError {
    pub fn new(kind: ErrorKind, status: u16, message: impl Into<String>) -> Self {
        Self {
            kind,
            status,
            message: message.into(),
            upstream_body: None,
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidInput, 400, message)
    }

    pub fn auth_missing() -> Self {
        Self::new(ErrorKind::AuthMissing, 401, "Authorization header missing")
    }

    pub fn auth_invalid() -> Self {
        Self::new(ErrorKind::AuthInvalid, 403, "Invalid session")
    }

    /// Embedding failure with the upstream status (or 500 for transport errors).
    pub fn embedding(status: u16) -> Self {
        Self::new(
            ErrorKind::EmbeddingFailure,
            status,
            "Failed to create embedding",
        )
    }

    pub fn retrieval() -> Self {
        Self::new(ErrorKind::RetrievalFailure, 500, "Failed to match embeddings")
    }

    /// Structured upstream completion error: status and body pass through unchanged.
    pub fn completion_upstream(status: u16, body: Value) -> Self {
        let message = body
            .pointer("/error/message")
            .and_then(|m| m.as_str())
            .or_else(|| body.get("error").and_then(|e| e.as_str()))
            .unwrap_or(SANITIZED_MESSAGE)
            .to_string();
        Self {
            kind: ErrorKind::CompletionFailure,
            status,
            message,
            upstream_body: Some(body),
        }
    }

    /// Unstructured completion failure; the message never carries internal detail.
    pub fn completion_sanitized(status: u16) -> Self {
        Self::new(ErrorKind::CompletionFailure, status, SANITIZED_MESSAGE)
    }

    pub fn persistence() -> Self {
        Self::new(
            ErrorKind::PersistenceFailure,
            500,
            "Failed to insert into chat_history",
        )
    }

    /// The JSON body sent to the external caller.
    pub fn body(&self) -> Value {
        match &self.upstream_body {
            Some(body) => body.clone(),
            None => json!({ "error": { "message": self.message } }),
        }
    }
}
