use std::sync::{Arc, Mutex};

use anyhow::bail;
use async_trait::async_trait;
use serde_json::json;

use chat_harness::completion::CompletionClient;
use chat_harness::config::RetrievalProfile;
use chat_harness::embedding::EmbeddingClient;
use chat_harness::error::{ErrorKind, PipelineError};
use chat_harness::models::{
    ChatExchange, ChatRequest, Collection, EmbeddingVector, Message, Mode, RetrievalQuery,
    RetrievedRecord, Role, Subject,
};
use chat_harness::pipeline::{Collaborators, Orchestrator, PipelineSettings};
use chat_harness::prompt::PromptLayout;
use chat_harness::store::memory::InMemoryStore;
use chat_harness::store::{ExchangeStore, VectorStore};
use chat_harness::tokens::FixedTokenAccountant;

type CallLog = Arc<Mutex<Vec<&'static str>>>;

struct MockEmbedder {
    log: CallLog,
    /// Zero-based call index that fails, if any.
    fail_on: Option<usize>,
    calls: Mutex<usize>,
}

#[async_trait]
impl EmbeddingClient for MockEmbedder {
    fn model_name(&self) -> &str {
        "mock-embed"
    }

    async fn embed(&self, _text: &str) -> Result<EmbeddingVector, PipelineError> {
        self.log.lock().unwrap().push("embed");
        let mut calls = self.calls.lock().unwrap();
        let n = *calls;
        *calls += 1;
        if self.fail_on == Some(n) {
            return Err(PipelineError::embedding(503));
        }
        Ok(EmbeddingVector::new(vec![1.0, 0.0, 0.0]))
    }
}

struct MockStore {
    log: CallLog,
    records: Vec<RetrievedRecord>,
    fail: bool,
    last_query: Mutex<Option<RetrievalQuery>>,
}

#[async_trait]
impl VectorStore for MockStore {
    async fn query(&self, query: &RetrievalQuery) -> anyhow::Result<Vec<RetrievedRecord>> {
        self.log.lock().unwrap().push("retrieve");
        *self.last_query.lock().unwrap() = Some(query.clone());
        if self.fail {
            bail!("connection reset by peer");
        }
        Ok(self.records.clone())
    }
}

struct MockCompleter {
    log: CallLog,
    result: Result<String, PipelineError>,
    seen: Mutex<Option<(String, Vec<Message>)>>,
}

#[async_trait]
impl CompletionClient for MockCompleter {
    async fn complete(&self, model_id: &str, messages: &[Message]) -> Result<String, PipelineError> {
        self.log.lock().unwrap().push("complete");
        *self.seen.lock().unwrap() = Some((model_id.to_string(), messages.to_vec()));
        self.result.clone()
    }
}

struct MockExchanges {
    log: CallLog,
    fail: bool,
    inserted: Mutex<Vec<ChatExchange>>,
}

#[async_trait]
impl ExchangeStore for MockExchanges {
    async fn insert(&self, exchange: &ChatExchange) -> anyhow::Result<()> {
        self.log.lock().unwrap().push("persist");
        if self.fail {
            bail!("disk I/O error");
        }
        self.inserted.lock().unwrap().push(exchange.clone());
        Ok(())
    }
}

struct Harness {
    log: CallLog,
    store: Arc<MockStore>,
    completer: Arc<MockCompleter>,
    exchanges: Arc<MockExchanges>,
    orchestrator: Orchestrator,
}

struct Script {
    mode: Mode,
    records: Vec<RetrievedRecord>,
    embed_fail_on: Option<usize>,
    retrieve_fails: bool,
    completion: Result<String, PipelineError>,
    persist_fails: bool,
}

impl Script {
    fn new(mode: Mode) -> Self {
        Self {
            mode,
            records: Vec::new(),
            embed_fail_on: None,
            retrieve_fails: false,
            completion: Ok("model output".to_string()),
            persist_fails: false,
        }
    }

    fn build(self) -> Harness {
        let log: CallLog = Arc::new(Mutex::new(Vec::new()));
        let embedder = Arc::new(MockEmbedder {
            log: log.clone(),
            fail_on: self.embed_fail_on,
            calls: Mutex::new(0),
        });
        let store = Arc::new(MockStore {
            log: log.clone(),
            records: self.records,
            fail: self.retrieve_fails,
            last_query: Mutex::new(None),
        });
        let completer = Arc::new(MockCompleter {
            log: log.clone(),
            result: self.completion,
            seen: Mutex::new(None),
        });
        let exchanges = Arc::new(MockExchanges {
            log: log.clone(),
            fail: self.persist_fails,
            inserted: Mutex::new(Vec::new()),
        });

        let profile = match self.mode {
            Mode::Memory => RetrievalProfile::memory(),
            Mode::Knowledge => RetrievalProfile::knowledge(),
        };
        let settings = PipelineSettings {
            mode: self.mode,
            profile,
            layout: PromptLayout::Combined,
            default_model: "gpt-3.5-turbo".to_string(),
        };
        let deps = Collaborators {
            embedder,
            completer: completer.clone(),
            store: store.clone(),
            exchanges: Some(exchanges.clone()),
            accountant: Arc::new(FixedTokenAccountant(123)),
        };

        Harness {
            log,
            store,
            completer,
            exchanges,
            orchestrator: Orchestrator::new(settings, deps).unwrap(),
        }
    }
}

impl Harness {
    fn calls(&self) -> Vec<&'static str> {
        self.log.lock().unwrap().clone()
    }
}

/// Shared buffer a fmt subscriber writes formatted log lines into.
#[derive(Clone, Default)]
struct LogBuffer(Arc<Mutex<Vec<u8>>>);

impl std::io::Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl LogBuffer {
    fn text(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

fn request(message: &str) -> ChatRequest {
    ChatRequest {
        message: message.to_string(),
        model: None,
        chat_history: None,
    }
}

fn alice() -> Subject {
    Subject {
        id: "alice".to_string(),
    }
}

#[tokio::test]
async fn test_whitespace_message_makes_no_calls() {
    for mode in [Mode::Memory, Mode::Knowledge] {
        for message in ["", "   ", "\n\t"] {
            let h = Script::new(mode).build();
            let err = h
                .orchestrator
                .handle(&request(message), &alice())
                .await
                .unwrap_err();
            assert_eq!(err.kind, ErrorKind::InvalidInput);
            assert_eq!(err.status, 400);
            assert_eq!(err.body(), json!({ "error": { "message": "Please enter a message" } }));
            assert!(h.calls().is_empty());
        }
    }
}

#[tokio::test]
async fn test_knowledge_success_call_sequence() {
    let h = Script::new(Mode::Knowledge).build();
    let resp = h
        .orchestrator
        .handle(&request("How do I reset my password?"), &alice())
        .await
        .unwrap();
    assert_eq!(resp.message, "model output");
    assert_eq!(h.calls(), vec!["embed", "retrieve", "complete"]);
    assert!(h.exchanges.inserted.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_memory_success_call_sequence() {
    let h = Script::new(Mode::Memory).build();
    let resp = h
        .orchestrator
        .handle(&request("Remember that my cat is Tom."), &alice())
        .await
        .unwrap();
    assert_eq!(resp.message, "model output");
    assert_eq!(
        h.calls(),
        vec!["embed", "retrieve", "complete", "embed", "persist"]
    );

    let inserted = h.exchanges.inserted.lock().unwrap();
    assert_eq!(inserted.len(), 1);
    assert_eq!(inserted[0].owner_id, "alice");
    assert_eq!(
        inserted[0].content,
        "user: Remember that my cat is Tom.\n\nassistant: model output"
    );
    assert_eq!(inserted[0].token_count, 123);
}

#[tokio::test]
async fn test_retrieval_query_uses_mode_profile() {
    let h = Script::new(Mode::Memory).build();
    h.orchestrator.handle(&request("hi"), &alice()).await.unwrap();
    let q = h.store.last_query.lock().unwrap().clone().unwrap();
    assert_eq!(q.collection, Collection::ChatHistory);
    assert_eq!(q.max_results, 10);
    assert!((q.similarity_threshold - 0.78).abs() < f32::EPSILON);
    assert_eq!(q.min_content_length, 100);
    assert_eq!(q.owner_id.as_deref(), Some("alice"));

    let h = Script::new(Mode::Knowledge).build();
    h.orchestrator.handle(&request("hi"), &alice()).await.unwrap();
    let q = h.store.last_query.lock().unwrap().clone().unwrap();
    assert_eq!(q.collection, Collection::PageSections);
    assert_eq!(q.max_results, 3);
    assert!(q.owner_id.is_none());
}

#[tokio::test]
async fn test_empty_retrieval_still_completes() {
    let h = Script::new(Mode::Knowledge).build();
    let resp = h
        .orchestrator
        .handle(&request("Anything new?"), &alice())
        .await
        .unwrap();
    assert_eq!(resp.message, "model output");

    let (_, messages) = h.completer.seen.lock().unwrap().clone().unwrap();
    assert_eq!(messages, vec![Message::user("Anything new?")]);
}

#[tokio::test]
async fn test_refund_policy_prompt() {
    let mut script = Script::new(Mode::Knowledge);
    script.records = vec![RetrievedRecord {
        content: "Refunds within 30 days.".to_string(),
        similarity: 0.91,
    }];
    script.completion = Ok("You can get a refund within 30 days.".to_string());
    let h = script.build();

    let req = ChatRequest {
        message: "What is the refund policy?".to_string(),
        model: Some("gpt-4".to_string()),
        chat_history: Some("user: hi\nassistant: hello".to_string()),
    };
    let resp = h.orchestrator.handle(&req, &alice()).await.unwrap();
    assert_eq!(resp.message, "You can get a refund within 30 days.");

    let (model, messages) = h.completer.seen.lock().unwrap().clone().unwrap();
    assert_eq!(model, "gpt-4");
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].role, Role::User);
    let prompt = &messages[0].content;
    assert!(prompt.contains("Refunds within 30 days."));
    assert!(prompt.contains("user: hi\nassistant: hello"));
    assert!(prompt.contains("What is the refund policy?"));
}

#[tokio::test]
async fn test_default_model_when_omitted_or_blank() {
    let h = Script::new(Mode::Knowledge).build();
    let mut req = request("q");
    req.model = Some("  ".to_string());
    h.orchestrator.handle(&req, &alice()).await.unwrap();
    let (model, _) = h.completer.seen.lock().unwrap().clone().unwrap();
    assert_eq!(model, "gpt-3.5-turbo");
}

#[tokio::test]
async fn test_rate_limit_surfaces_unchanged() {
    let upstream = json!({ "error": "rate limited" });
    let mut script = Script::new(Mode::Memory);
    script.completion = Err(PipelineError::completion_upstream(429, upstream.clone()));
    let h = script.build();

    let err = h
        .orchestrator
        .handle(&request("hello"), &alice())
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::CompletionFailure);
    assert_eq!(err.status, 429);
    assert_eq!(err.body(), upstream);
    // Nothing after the failing stage runs.
    assert_eq!(h.calls(), vec!["embed", "retrieve", "complete"]);
}

#[tokio::test]
async fn test_persistence_failure_hides_reply() {
    let mut script = Script::new(Mode::Memory);
    script.completion = Ok("secret bot reply".to_string());
    script.persist_fails = true;
    let h = script.build();

    let err = h
        .orchestrator
        .handle(&request("hello"), &alice())
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::PersistenceFailure);
    assert_eq!(err.status, 500);
    let body = err.body().to_string();
    assert!(!body.contains("secret bot reply"));
    assert!(!body.contains("disk I/O"));
}

#[tokio::test]
async fn test_retrieval_failure_is_sanitized() {
    let mut script = Script::new(Mode::Knowledge);
    script.retrieve_fails = true;
    let h = script.build();

    let err = h
        .orchestrator
        .handle(&request("hello"), &alice())
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::RetrievalFailure);
    assert_eq!(err.status, 500);
    assert!(!err.body().to_string().contains("connection reset"));
    assert_eq!(h.calls(), vec!["embed", "retrieve"]);
}

#[tokio::test]
async fn test_query_embedding_failure_stops_pipeline() {
    let mut script = Script::new(Mode::Memory);
    script.embed_fail_on = Some(0);
    let h = script.build();

    let err = h
        .orchestrator
        .handle(&request("hello"), &alice())
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::EmbeddingFailure);
    assert_eq!(err.status, 503);
    assert_eq!(h.calls(), vec!["embed"]);
}

#[tokio::test]
async fn test_result_embedding_failure_skips_persist() {
    let mut script = Script::new(Mode::Memory);
    script.embed_fail_on = Some(1);
    let h = script.build();

    let err = h
        .orchestrator
        .handle(&request("hello"), &alice())
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::EmbeddingFailure);
    assert_eq!(h.calls(), vec!["embed", "retrieve", "complete", "embed"]);
    assert!(h.exchanges.inserted.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_retrieval_is_deterministic() {
    let store = InMemoryStore::new();
    let long = |tag: &str| format!("{} {}", tag, "x".repeat(120));
    for (tag, v) in [
        ("a", vec![1.0, 0.0]),
        ("b", vec![0.9, 0.1]),
        ("c", vec![1.0, 0.0]),
        ("d", vec![0.0, 1.0]),
    ] {
        store
            .insert(&ChatExchange {
                owner_id: "alice".to_string(),
                content: long(tag),
                embedding: EmbeddingVector::new(v),
                token_count: 1,
            })
            .await
            .unwrap();
    }

    let query = RetrievalQuery {
        collection: Collection::ChatHistory,
        embedding: EmbeddingVector::new(vec![1.0, 0.0]),
        similarity_threshold: 0.78,
        max_results: 10,
        min_content_length: 100,
        owner_id: Some("alice".to_string()),
    };

    let first = store.query(&query).await.unwrap();
    for _ in 0..5 {
        assert_eq!(store.query(&query).await.unwrap(), first);
    }
    let order: Vec<&str> = first.iter().map(|r| &r.content[..1]).collect();
    // Ties keep insertion order; orthogonal "d" falls below the threshold.
    assert_eq!(order, vec!["a", "c", "b"]);
}

#[tokio::test]
async fn test_memory_round_trip_with_in_memory_store() {
    // The second exchange retrieves the first one as context.
    let store = Arc::new(InMemoryStore::new());
    let log: CallLog = Arc::new(Mutex::new(Vec::new()));
    let completer = Arc::new(MockCompleter {
        log: log.clone(),
        result: Ok("Noted, your cat is called Tom and he likes to sleep all day long.".to_string()),
        seen: Mutex::new(None),
    });
    let deps = Collaborators {
        embedder: Arc::new(MockEmbedder {
            log: log.clone(),
            fail_on: None,
            calls: Mutex::new(0),
        }),
        completer: completer.clone(),
        store: store.clone(),
        exchanges: Some(store.clone()),
        accountant: Arc::new(FixedTokenAccountant(123)),
    };
    let settings = PipelineSettings {
        mode: Mode::Memory,
        profile: RetrievalProfile::memory(),
        layout: PromptLayout::Combined,
        default_model: "gpt-3.5-turbo".to_string(),
    };
    let orch = Orchestrator::new(settings, deps).unwrap();

    orch.handle(&request("My cat is called Tom and he sleeps a lot."), &alice())
        .await
        .unwrap();
    assert_eq!(store.exchanges().len(), 1);

    orch.handle(&request("What is my cat called?"), &alice())
        .await
        .unwrap();
    let (_, messages) = completer.seen.lock().unwrap().clone().unwrap();
    assert!(messages[0].content.contains("My cat is called Tom"));
    assert!(messages[0].content.ends_with("\n\nWhat is my cat called?"));

    // Another owner sees none of alice's history.
    let bob = Subject {
        id: "bob".to_string(),
    };
    orch.handle(&request("What is my cat called?"), &bob)
        .await
        .unwrap();
    let (_, messages) = completer.seen.lock().unwrap().clone().unwrap();
    assert_eq!(messages[0].content, "What is my cat called?");
}

#[tokio::test]
async fn test_assembling_prompt_stage_is_logged() {
    use tracing::instrument::WithSubscriber;

    let logs = LogBuffer::default();
    let writer = logs.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_ansi(false)
        .with_writer(move || writer.clone())
        .finish();

    let mut script = Script::new(Mode::Knowledge);
    script.records = vec![RetrievedRecord {
        content: "Refunds are issued within 30 days.".to_string(),
        similarity: 0.9,
    }];
    let h = script.build();
    h.orchestrator
        .handle(&request("What is the refund policy?"), &alice())
        .with_subscriber(subscriber)
        .await
        .unwrap();

    let text = logs.text();
    let line = text
        .lines()
        .find(|l| l.contains("prompt assembled"))
        .expect("assembly stage logged");
    assert!(line.contains("assembling_prompt"));
    assert!(line.contains("records=1"));
    assert!(line.contains("messages=1"));
}
