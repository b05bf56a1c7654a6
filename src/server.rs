//! HTTP chat server.
//!
//! Exposes both pipelines as JSON endpoints behind bearer-token auth.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/api/chat/memory` | Conversational-memory pipeline |
//! | `POST` | `/api/chat/knowledge` | Knowledge-grounding pipeline |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! Failures carry the status of the stage that failed and a body of the form
//!
//! ```json
//! { "error": { "message": "An error occurred during your request." } }
//! ```
//!
//! except for structured upstream completion errors, whose body is relayed
//! unchanged. Authentication is checked before the body is parsed, so an
//! unauthenticated request with a malformed body still gets 401.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted to support browser-based
//! chat clients.

use std::sync::Arc;

use anyhow::Result;
use axum::{
    extract::{rejection::JsonRejection, State},
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};

use crate::auth::{authenticate, create_validator, AuthValidator};
use crate::completion::create_completion_client;
use crate::config::Config;
use crate::db;
use crate::embedding::create_embedding_client;
use crate::error::PipelineError;
use crate::migrate;
use crate::models::{ChatRequest, ChatResponse, Mode};
use crate::pipeline::{Collaborators, Orchestrator, PipelineSettings};
use crate::prompt::PromptLayout;
use crate::store::sqlite::SqliteStore;
use crate::tokens::create_accountant;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub memory: Arc<Orchestrator>,
    pub knowledge: Arc<Orchestrator>,
    pub auth: Arc<dyn AuthValidator>,
}

impl IntoResponse for PipelineError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self.body())).into_response()
    }
}

/// Build the router over `state`.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/chat/memory", post(handle_memory))
        .route("/api/chat/knowledge", post(handle_knowledge))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state)
}

/// Pipeline settings for `mode` from config.
pub fn settings_for(config: &Config, mode: Mode) -> PipelineSettings {
    PipelineSettings {
        mode,
        profile: config.retrieval.profile(mode).clone(),
        layout: PromptLayout::from_config(&config.prompt.layout),
        default_model: config.completion.default_model.clone(),
    }
}

/// Open the database and build the shared pipeline collaborators.
///
/// Migrations are applied on the way, so a fresh deployment works without a
/// separate `chx init`.
pub async fn build_collaborators(config: &Config) -> Result<Collaborators> {
    let pool = db::connect(config).await?;
    migrate::apply(&pool).await?;
    let store = Arc::new(SqliteStore::new(pool));

    Ok(Collaborators {
        embedder: create_embedding_client(&config.embedding)?,
        completer: create_completion_client(&config.completion)?,
        store: store.clone(),
        exchanges: Some(store),
        accountant: create_accountant(&config.tokens),
    })
}

/// Build both orchestrators and the auth validator from config.
pub async fn build_state(config: &Config) -> Result<AppState> {
    let auth = create_validator(&config.auth)?;
    let deps = build_collaborators(config).await?;

    let memory = Orchestrator::new(settings_for(config, Mode::Memory), deps.clone())?;
    let knowledge = Orchestrator::new(settings_for(config, Mode::Knowledge), deps)?;

    Ok(AppState {
        memory: Arc::new(memory),
        knowledge: Arc::new(knowledge),
        auth,
    })
}

/// Starts the chat server on `[server].bind` and runs until terminated.
pub async fn run_server(config: &Config) -> Result<()> {
    let state = build_state(config).await?;
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    tracing::info!(bind = %config.server.bind, "chat server listening");
    println!("Chat server listening on http://{}", config.server.bind);

    axum::serve(listener, app).await?;

    Ok(())
}

// ============ POST /api/chat/* ============

async fn handle_memory(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatResponse>, PipelineError> {
    run_chat(&state, &state.memory, &headers, body).await
}

async fn handle_knowledge(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatResponse>, PipelineError> {
    run_chat(&state, &state.knowledge, &headers, body).await
}

async fn run_chat(
    state: &AppState,
    orchestrator: &Orchestrator,
    headers: &HeaderMap,
    body: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatResponse>, PipelineError> {
    let header = headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok());
    let subject = authenticate(state.auth.as_ref(), header).await?;

    let Json(request) = body.map_err(|rejection| {
        tracing::warn!(
            mode = orchestrator.mode().as_str(),
            error = %rejection.body_text(),
            "rejected malformed request body"
        );
        PipelineError::invalid_input(rejection.body_text())
    })?;

    let response = orchestrator.handle(&request, &subject).await?;
    Ok(Json(response))
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
