//! In-process stand-in for the OpenAI HTTP API.
//!
//! Behaviour is keyed off the `model` field of each request:
//!
//! | Endpoint | Model | Response |
//! |----------|-------|----------|
//! | embeddings | `broken-embed` | 400 |
//! | embeddings | `flaky-embed` | 503 on the first call, then success |
//! | embeddings | `garbled-embed` | 200 with a string inside the vector |
//! | embeddings | anything else | `[1, 0]` if the input mentions "refund", else `[0, 1]` |
//! | chat | `rate-limited` | 429 `{"error":"rate limited"}` |
//! | chat | `bad-gateway` | 502 with an HTML body |
//! | chat | `garbled` | 200 with no choices |
//! | chat | anything else | 200, reply `"echo: <last message content>"` |
//!
//! Requests without `Authorization: Bearer test-key` get 401.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::{
    extract::State,
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use serde_json::{json, Value};

pub const API_KEY: &str = "test-key";

#[derive(Clone, Default)]
pub struct MockOpenAi {
    pub embed_calls: Arc<AtomicUsize>,
    pub chat_requests: Arc<Mutex<Vec<Value>>>,
}

impl MockOpenAi {
    pub fn last_chat_request(&self) -> Option<Value> {
        self.chat_requests.lock().unwrap().last().cloned()
    }
}

/// Bind the mock on an ephemeral port and return its base URL.
pub async fn spawn_mock_openai() -> (String, MockOpenAi) {
    let mock = MockOpenAi::default();
    let app = Router::new()
        .route("/v1/embeddings", post(embeddings))
        .route("/v1/chat/completions", post(chat_completions))
        .with_state(mock.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{}", addr), mock)
}

fn authorized(headers: &HeaderMap) -> bool {
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(|v| v == format!("Bearer {}", API_KEY))
        .unwrap_or(false)
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({ "error": { "message": "Incorrect API key provided" } })),
    )
        .into_response()
}

async fn embeddings(
    State(mock): State<MockOpenAi>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if !authorized(&headers) {
        return unauthorized();
    }
    let call = mock.embed_calls.fetch_add(1, Ordering::SeqCst);

    match body["model"].as_str().unwrap_or_default() {
        "broken-embed" => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": { "message": "invalid model" } })),
            )
                .into_response()
        }
        "flaky-embed" if call == 0 => {
            return (StatusCode::SERVICE_UNAVAILABLE, "overloaded").into_response()
        }
        "garbled-embed" => {
            return Json(json!({
                "object": "list",
                "data": [{ "object": "embedding", "index": 0, "embedding": [1.0, "NaN"] }],
            }))
            .into_response()
        }
        _ => {}
    }

    let input = body["input"].as_str().unwrap_or_default().to_lowercase();
    let vector = if input.contains("refund") {
        vec![1.0, 0.0]
    } else {
        vec![0.0, 1.0]
    };

    Json(json!({
        "object": "list",
        "data": [{ "object": "embedding", "index": 0, "embedding": vector }],
        "model": body["model"],
    }))
    .into_response()
}

async fn chat_completions(
    State(mock): State<MockOpenAi>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if !authorized(&headers) {
        return unauthorized();
    }
    mock.chat_requests.lock().unwrap().push(body.clone());

    match body["model"].as_str().unwrap_or_default() {
        "rate-limited" => (
            StatusCode::TOO_MANY_REQUESTS,
            Json(json!({ "error": "rate limited" })),
        )
            .into_response(),
        "bad-gateway" => (
            StatusCode::BAD_GATEWAY,
            "<html><body>upstream exploded at 10.0.0.3</body></html>",
        )
            .into_response(),
        "garbled" => Json(json!({ "choices": [] })).into_response(),
        _ => {
            let last = body["messages"]
                .as_array()
                .and_then(|m| m.last())
                .and_then(|m| m["content"].as_str())
                .unwrap_or_default()
                .to_string();
            Json(json!({
                "id": "chatcmpl-test",
                "object": "chat.completion",
                "choices": [{
                    "index": 0,
                    "message": { "role": "assistant", "content": format!("echo: {}", last) },
                    "finish_reason": "stop"
                }]
            }))
            .into_response()
        }
    }
}
