//! Storage abstraction for Chat Harness.
//!
//! Three traits split the store along the pipeline's needs:
//!
//! | Trait | Used by | Purpose |
//! |-------|---------|---------|
//! | [`VectorStore`] | pipeline | Similarity query over a collection |
//! | [`ExchangeStore`] | pipeline (memory mode) | Insert a completed exchange |
//! | [`SectionStore`] | ingestion | Upsert reference sections |
//!
//! [`sqlite::SqliteStore`] is the production backend;
//! [`memory::InMemoryStore`] serves tests. Implementations must be
//! `Send + Sync` to be shared across request tasks.

pub mod memory;
pub mod sqlite;

use anyhow::Result;
use async_trait::async_trait;

use crate::embedding::cosine_similarity;
use crate::models::{ChatExchange, EmbeddingVector, PageSection, RetrievalQuery, RetrievedRecord};

/// Similarity search over stored, embedded records.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Return records with `similarity >= threshold` and content of at
    /// least `min_content_length` characters, most similar first, at most
    /// `max_results`. An empty result is not an error.
    async fn query(&self, query: &RetrievalQuery) -> Result<Vec<RetrievedRecord>>;
}

/// Durable storage for completed chat exchanges.
#[async_trait]
pub trait ExchangeStore: Send + Sync {
    /// Insert one exchange. Never updates an existing row.
    async fn insert(&self, exchange: &ChatExchange) -> Result<()>;
}

/// Storage for reference sections produced by ingestion.
#[async_trait]
pub trait SectionStore: Send + Sync {
    /// Hash of the stored section at `(source_path, section_index)`, if any.
    async fn section_hash(&self, source_path: &str, section_index: i64) -> Result<Option<String>>;

    /// Insert or replace the section at `(source_path, section_index)`.
    async fn upsert_section(&self, section: &PageSection, embedding: &EmbeddingVector)
        -> Result<()>;

    /// Remove sections of `source_path` with index `>= keep`.
    async fn truncate_sections(&self, source_path: &str, keep: i64) -> Result<u64>;

    /// Remove every section whose `source_path` is not in `keep_paths`.
    /// Returns the number of rows removed.
    async fn remove_missing(&self, keep_paths: &[String]) -> Result<u64>;
}

/// Score and rank candidate `(content, vector)` pairs for a query.
///
/// Candidates must arrive in the store's stable order; `sort_by` is stable,
/// so equal similarities keep that order.
pub(crate) fn rank_candidates<I>(query: &RetrievalQuery, candidates: I) -> Vec<RetrievedRecord>
where
    I: IntoIterator<Item = (String, Vec<f32>)>,
{
    let mut records: Vec<RetrievedRecord> = candidates
        .into_iter()
        .filter(|(content, _)| content.chars().count() >= query.min_content_length)
        .map(|(content, vector)| RetrievedRecord {
            similarity: cosine_similarity(query.embedding.as_slice(), &vector),
            content,
        })
        .filter(|r| r.similarity >= query.similarity_threshold)
        .collect();

    records.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    records.truncate(query.max_results);
    records
}
