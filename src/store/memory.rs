//! In-memory store for tests and ephemeral runs.
//!
//! Uses `Vec`s behind `std::sync::RwLock`. Vector search is brute-force
//! cosine similarity over every stored vector, in insertion order.

use std::sync::RwLock;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{
    ChatExchange, Collection, EmbeddingVector, PageSection, RetrievalQuery, RetrievedRecord,
};

use super::{rank_candidates, ExchangeStore, SectionStore, VectorStore};

struct StoredSection {
    section: PageSection,
    vector: Vec<f32>,
}

/// In-memory implementation of every store trait.
#[derive(Default)]
pub struct InMemoryStore {
    exchanges: RwLock<Vec<ChatExchange>>,
    sections: RwLock<Vec<StoredSection>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every stored exchange, oldest first.
    pub fn exchanges(&self) -> Vec<ChatExchange> {
        self.exchanges.read().unwrap().clone()
    }

    /// Snapshot of every stored section.
    pub fn sections(&self) -> Vec<PageSection> {
        self.sections
            .read()
            .unwrap()
            .iter()
            .map(|s| s.section.clone())
            .collect()
    }
}

#[async_trait]
impl VectorStore for InMemoryStore {
    async fn query(&self, query: &RetrievalQuery) -> Result<Vec<RetrievedRecord>> {
        let candidates: Vec<(String, Vec<f32>)> = match query.collection {
            Collection::ChatHistory => self
                .exchanges
                .read()
                .unwrap()
                .iter()
                .filter(|e| {
                    query
                        .owner_id
                        .as_deref()
                        .map_or(true, |owner| owner == e.owner_id)
                })
                .map(|e| (e.content.clone(), e.embedding.as_slice().to_vec()))
                .collect(),
            Collection::PageSections => self
                .sections
                .read()
                .unwrap()
                .iter()
                .map(|s| (s.section.content.clone(), s.vector.clone()))
                .collect(),
        };

        Ok(rank_candidates(query, candidates))
    }
}

#[async_trait]
impl ExchangeStore for InMemoryStore {
    async fn insert(&self, exchange: &ChatExchange) -> Result<()> {
        self.exchanges.write().unwrap().push(exchange.clone());
        Ok(())
    }
}

#[async_trait]
impl SectionStore for InMemoryStore {
    async fn section_hash(&self, source_path: &str, section_index: i64) -> Result<Option<String>> {
        Ok(self
            .sections
            .read()
            .unwrap()
            .iter()
            .find(|s| {
                s.section.source_path == source_path && s.section.section_index == section_index
            })
            .map(|s| s.section.hash.clone()))
    }

    async fn upsert_section(
        &self,
        section: &PageSection,
        embedding: &EmbeddingVector,
    ) -> Result<()> {
        let mut sections = self.sections.write().unwrap();
        let stored = StoredSection {
            section: section.clone(),
            vector: embedding.as_slice().to_vec(),
        };
        match sections.iter_mut().find(|s| {
            s.section.source_path == section.source_path
                && s.section.section_index == section.section_index
        }) {
            Some(existing) => *existing = stored,
            None => sections.push(stored),
        }
        Ok(())
    }

    async fn truncate_sections(&self, source_path: &str, keep: i64) -> Result<u64> {
        let mut sections = self.sections.write().unwrap();
        let before = sections.len();
        sections.retain(|s| {
            !(s.section.source_path == source_path && s.section.section_index >= keep)
        });
        Ok((before - sections.len()) as u64)
    }

    async fn remove_missing(&self, keep_paths: &[String]) -> Result<u64> {
        let mut sections = self.sections.write().unwrap();
        let before = sections.len();
        sections.retain(|s| keep_paths.contains(&s.section.source_path));
        Ok((before - sections.len()) as u64)
    }
}
