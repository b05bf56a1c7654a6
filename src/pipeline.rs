//! Retrieval-augmented chat pipeline.
//!
//! An [`Orchestrator`] runs one request through a fixed sequence of stages:
//!
//! ```text
//! ValidatingInput ─▶ EmbeddingQuery ─▶ Retrieving ─▶ AssemblingPrompt ─▶ Completing
//!                                                                          │
//!                     memory mode: EmbeddingResult ─▶ Persisting ◀─────────┤
//!                                                          │               │ knowledge mode
//!                                                          ▼               ▼
//!                                                         Done ◀───────────┘
//! ```
//!
//! Any stage may end the run with a [`PipelineError`]. No stage retries;
//! nothing is written unless a completion was produced, and in memory mode
//! the reply is only returned once its exchange has been stored.
//!
//! Orchestrators hold only `Arc`ed collaborators and immutable settings, so
//! one instance is built at startup and shared by every request task.

use std::sync::Arc;

use anyhow::{bail, Result};

use crate::completion::CompletionClient;
use crate::config::RetrievalProfile;
use crate::embedding::EmbeddingClient;
use crate::error::PipelineError;
use crate::models::{ChatExchange, ChatRequest, ChatResponse, Mode, RetrievalQuery, Subject};
use crate::prompt::{assemble_messages, PromptLayout};
use crate::store::{ExchangeStore, VectorStore};
use crate::tokens::TokenAccountant;

/// Pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    ValidatingInput,
    EmbeddingQuery,
    Retrieving,
    AssemblingPrompt,
    Completing,
    EmbeddingResult,
    Persisting,
    Done,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::ValidatingInput => "validating_input",
            Stage::EmbeddingQuery => "embedding_query",
            Stage::Retrieving => "retrieving",
            Stage::AssemblingPrompt => "assembling_prompt",
            Stage::Completing => "completing",
            Stage::EmbeddingResult => "embedding_result",
            Stage::Persisting => "persisting",
            Stage::Done => "done",
        }
    }
}

/// The collaborators an [`Orchestrator`] drives.
#[derive(Clone)]
pub struct Collaborators {
    pub embedder: Arc<dyn EmbeddingClient>,
    pub completer: Arc<dyn CompletionClient>,
    pub store: Arc<dyn VectorStore>,
    /// Required in memory mode; unused in knowledge mode.
    pub exchanges: Option<Arc<dyn ExchangeStore>>,
    pub accountant: Arc<dyn TokenAccountant>,
}

/// Per-deployment settings.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub mode: Mode,
    pub profile: RetrievalProfile,
    pub layout: PromptLayout,
    /// Model used when a request does not name one.
    pub default_model: String,
}

/// Runs the embed → retrieve → assemble → complete → persist sequence.
pub struct Orchestrator {
    settings: PipelineSettings,
    deps: Collaborators,
}

impl Orchestrator {
    pub fn new(settings: PipelineSettings, deps: Collaborators) -> Result<Self> {
        if settings.mode == Mode::Memory && deps.exchanges.is_none() {
            bail!("memory mode requires an exchange store");
        }
        Ok(Self { settings, deps })
    }

    pub fn mode(&self) -> Mode {
        self.settings.mode
    }

    /// Run one request to completion for `subject`.
    pub async fn handle(
        &self,
        request: &ChatRequest,
        subject: &Subject,
    ) -> Result<ChatResponse, PipelineError> {
        let mode = self.settings.mode;
        let message = request.message.as_str();

        // ValidatingInput
        if message.trim().is_empty() {
            return Err(self.fail(
                Stage::ValidatingInput,
                PipelineError::invalid_input("Please enter a message"),
            ));
        }

        // EmbeddingQuery
        let query_embedding = self
            .deps
            .embedder
            .embed(message)
            .await
            .map_err(|e| self.fail(Stage::EmbeddingQuery, e))?;
        tracing::debug!(
            mode = mode.as_str(),
            dims = query_embedding.dims(),
            "query embedded"
        );

        // Retrieving
        let query = RetrievalQuery {
            collection: mode.collection(),
            embedding: query_embedding,
            similarity_threshold: self.settings.profile.match_threshold,
            max_results: self.settings.profile.match_count,
            min_content_length: self.settings.profile.min_content_length,
            owner_id: match mode {
                Mode::Memory => Some(subject.id.clone()),
                Mode::Knowledge => None,
            },
        };
        let records = self.deps.store.query(&query).await.map_err(|e| {
            tracing::error!(
                stage = Stage::Retrieving.as_str(),
                error = %e,
                "vector store query failed"
            );
            self.fail(Stage::Retrieving, PipelineError::retrieval())
        })?;
        tracing::info!(
            mode = mode.as_str(),
            matches = records.len(),
            "vector store query successful"
        );

        // AssemblingPrompt
        let messages = assemble_messages(
            &records,
            message,
            mode,
            request.chat_history.as_deref(),
            self.settings.layout,
        );
        tracing::debug!(
            stage = Stage::AssemblingPrompt.as_str(),
            mode = mode.as_str(),
            records = records.len(),
            messages = messages.len(),
            "prompt assembled"
        );

        // Completing
        let model = request
            .model
            .as_deref()
            .filter(|m| !m.trim().is_empty())
            .unwrap_or(self.settings.default_model.as_str());
        let reply = self
            .deps
            .completer
            .complete(model, &messages)
            .await
            .map_err(|e| self.fail(Stage::Completing, e))?;
        tracing::info!(mode = mode.as_str(), model, "received completion");

        if mode == Mode::Knowledge {
            return Ok(self.done(reply));
        }

        // EmbeddingResult
        let content = ChatExchange::format_content(message, &reply);
        let exchange_embedding = self
            .deps
            .embedder
            .embed(&content)
            .await
            .map_err(|e| self.fail(Stage::EmbeddingResult, e))?;

        // Persisting
        let exchanges = self
            .deps
            .exchanges
            .as_ref()
            .ok_or_else(|| self.fail(Stage::Persisting, PipelineError::persistence()))?;
        let exchange = ChatExchange {
            owner_id: subject.id.clone(),
            token_count: self.deps.accountant.count(&content),
            content,
            embedding: exchange_embedding,
        };
        exchanges.insert(&exchange).await.map_err(|e| {
            tracing::error!(
                stage = Stage::Persisting.as_str(),
                owner_id = %subject.id,
                error = %e,
                "failed to persist exchange"
            );
            self.fail(Stage::Persisting, PipelineError::persistence())
        })?;
        tracing::info!(
            owner_id = %subject.id,
            tokens = exchange.token_count,
            "exchange persisted"
        );

        Ok(self.done(reply))
    }

    fn done(&self, reply: String) -> ChatResponse {
        tracing::debug!(
            stage = Stage::Done.as_str(),
            mode = self.settings.mode.as_str(),
            "pipeline done"
        );
        ChatResponse { message: reply }
    }

    /// Log a failure at `stage` and hand the error back.
    fn fail(&self, stage: Stage, err: PipelineError) -> PipelineError {
        if err.status < 500 {
            tracing::warn!(
                stage = stage.as_str(),
                mode = self.settings.mode.as_str(),
                kind = %err.kind,
                status = err.status,
                message = %err.message,
                "pipeline failed"
            );
        } else {
            tracing::error!(
                stage = stage.as_str(),
                mode = self.settings.mode.as_str(),
                kind = %err.kind,
                status = err.status,
                message = %err.message,
                "pipeline failed"
            );
        }
        err
    }
}
