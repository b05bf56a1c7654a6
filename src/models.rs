//! Core data models used throughout Chat Harness.
//!
//! These types represent the messages, vectors, retrieved records and
//! persisted exchanges that flow through the chat pipeline.

use serde::{Deserialize, Serialize};

/// Speaker of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// A single role/content message sent to the completion service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// A fixed-dimension embedding produced by an [`EmbeddingClient`](crate::embedding::EmbeddingClient).
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingVector(Vec<f32>);

impl EmbeddingVector {
    pub fn new(values: Vec<f32>) -> Self {
        Self(values)
    }

    pub fn dims(&self) -> usize {
        self.0.len()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }
}

impl From<Vec<f32>> for EmbeddingVector {
    fn from(values: Vec<f32>) -> Self {
        Self(values)
    }
}

/// A record returned by a vector store query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievedRecord {
    pub content: String,
    pub similarity: f32,
}

/// Deployment mode of a pipeline instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Retrieves the user's prior exchanges and persists each new one.
    Memory,
    /// Retrieves reference sections; nothing is persisted.
    Knowledge,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Memory => "memory",
            Mode::Knowledge => "knowledge",
        }
    }

    /// The stored collection this mode retrieves from.
    pub fn collection(&self) -> Collection {
        match self {
            Mode::Memory => Collection::ChatHistory,
            Mode::Knowledge => Collection::PageSections,
        }
    }
}

impl std::str::FromStr for Mode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s {
            "memory" => Ok(Mode::Memory),
            "knowledge" => Ok(Mode::Knowledge),
            other => anyhow::bail!("Unknown mode: '{}'. Must be memory or knowledge.", other),
        }
    }
}

/// A stored collection of embedded records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Collection {
    ChatHistory,
    PageSections,
}

/// Parameters for a similarity query against a [`VectorStore`](crate::store::VectorStore).
#[derive(Debug, Clone)]
pub struct RetrievalQuery {
    pub collection: Collection,
    pub embedding: EmbeddingVector,
    pub similarity_threshold: f32,
    pub max_results: usize,
    pub min_content_length: usize,
    /// Restricts chat-history retrieval to one owner.
    pub owner_id: Option<String>,
}

/// A completed user/assistant exchange persisted for future retrieval.
#[derive(Debug, Clone)]
pub struct ChatExchange {
    pub owner_id: String,
    pub content: String,
    pub embedding: EmbeddingVector,
    pub token_count: i64,
}

impl ChatExchange {
    /// Formats the persisted text of an exchange.
    pub fn format_content(message: &str, reply: &str) -> String {
        format!("user: {}\n\nassistant: {}", message, reply)
    }
}

/// A section of reference content produced by ingestion.
#[derive(Debug, Clone)]
pub struct PageSection {
    pub id: String,
    pub source_path: String,
    pub section_index: i64,
    pub heading: Option<String>,
    pub content: String,
    pub token_count: i64,
    pub hash: String,
}

/// The authenticated caller of a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subject {
    pub id: String,
}

/// Incoming chat request body.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default, rename = "chatHistory")]
    pub chat_history: Option<String>,
}

/// Successful chat response body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatResponse {
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exchange_format() {
        let text = ChatExchange::format_content("hi", "hello there");
        assert_eq!(text, "user: hi\n\nassistant: hello there");
    }

    #[test]
    fn test_request_accepts_camel_case_history() {
        let req: ChatRequest = serde_json::from_str(
            r#"{"message":"q","model":"gpt-4o-mini","chatHistory":"user: earlier"}"#,
        )
        .unwrap();
        assert_eq!(req.chat_history.as_deref(), Some("user: earlier"));
        assert_eq!(req.model.as_deref(), Some("gpt-4o-mini"));
    }

    #[test]
    fn test_request_optional_fields() {
        let req: ChatRequest = serde_json::from_str(r#"{"message":"q"}"#).unwrap();
        assert!(req.model.is_none());
        assert!(req.chat_history.is_none());
    }

    #[test]
    fn test_mode_parse() {
        assert_eq!("memory".parse::<Mode>().unwrap(), Mode::Memory);
        assert_eq!("knowledge".parse::<Mode>().unwrap(), Mode::Knowledge);
        assert!("other".parse::<Mode>().is_err());
    }

    #[test]
    fn test_role_serializes_lowercase() {
        let json = serde_json::to_value(Message::assistant("x")).unwrap();
        assert_eq!(json["role"], "assistant");
    }
}
