//! SQLite-backed store.
//!
//! Maps each store trait onto the `chat_history` and `page_sections`
//! tables created by [`crate::migrate`]. Vectors are stored as
//! little-endian f32 BLOBs and scored in Rust with cosine similarity;
//! rows are read in `rowid` order so ties rank deterministically.

use std::collections::HashSet;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use crate::embedding::{blob_to_vec, vec_to_blob};
use crate::models::{
    ChatExchange, Collection, EmbeddingVector, PageSection, RetrievalQuery, RetrievedRecord,
};

use super::{rank_candidates, ExchangeStore, SectionStore, VectorStore};

/// SQLite implementation of every store trait.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Number of persisted exchanges, optionally for one owner.
    pub async fn count_exchanges(&self, owner_id: Option<&str>) -> Result<i64> {
        let count: i64 = match owner_id {
            Some(owner) => {
                sqlx::query_scalar("SELECT COUNT(*) FROM chat_history WHERE owner_id = ?")
                    .bind(owner)
                    .fetch_one(&self.pool)
                    .await?
            }
            None => {
                sqlx::query_scalar("SELECT COUNT(*) FROM chat_history")
                    .fetch_one(&self.pool)
                    .await?
            }
        };
        Ok(count)
    }

    /// Error for an insert skipped by the dimension guard.
    ///
    /// A table holds vectors of one dimension. Switching embedding models
    /// means clearing the table (`DELETE FROM page_sections`, then
    /// `chx ingest`) before new rows are accepted.
    async fn dims_mismatch(&self, table: &str, embedding: &EmbeddingVector) -> anyhow::Error {
        let sql = format!("SELECT dims FROM {} WHERE dims != ? LIMIT 1", table);
        let stored: Option<i64> = sqlx::query_scalar(&sql)
            .bind(embedding.dims() as i64)
            .fetch_optional(&self.pool)
            .await
            .ok()
            .flatten();
        match stored {
            Some(dims) => anyhow!(
                "{} stores {}-dimensional vectors, got {}; clear {} before switching embedding models",
                table,
                dims,
                embedding.dims(),
                table
            ),
            None => anyhow!("{} rejected a {}-dimensional vector", table, embedding.dims()),
        }
    }
}

#[async_trait]
impl VectorStore for SqliteStore {
    async fn query(&self, query: &RetrievalQuery) -> Result<Vec<RetrievedRecord>> {
        let min_len = query.min_content_length as i64;

        let rows = match (query.collection, query.owner_id.as_deref()) {
            (Collection::ChatHistory, Some(owner)) => {
                sqlx::query(
                    r#"
                    SELECT content, embedding FROM chat_history
                    WHERE owner_id = ? AND length(content) >= ?
                    ORDER BY rowid
                    "#,
                )
                .bind(owner)
                .bind(min_len)
                .fetch_all(&self.pool)
                .await?
            }
            (Collection::ChatHistory, None) => {
                sqlx::query(
                    r#"
                    SELECT content, embedding FROM chat_history
                    WHERE length(content) >= ?
                    ORDER BY rowid
                    "#,
                )
                .bind(min_len)
                .fetch_all(&self.pool)
                .await?
            }
            (Collection::PageSections, _) => {
                sqlx::query(
                    r#"
                    SELECT content, embedding FROM page_sections
                    WHERE length(content) >= ?
                    ORDER BY rowid
                    "#,
                )
                .bind(min_len)
                .fetch_all(&self.pool)
                .await?
            }
        };

        let candidates = rows.iter().map(|row| {
            let blob: Vec<u8> = row.get("embedding");
            (row.get::<String, _>("content"), blob_to_vec(&blob))
        });

        Ok(rank_candidates(query, candidates))
    }
}

#[async_trait]
impl ExchangeStore for SqliteStore {
    async fn insert(&self, exchange: &ChatExchange) -> Result<()> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = chrono::Utc::now().timestamp();
        let dims = exchange.embedding.dims() as i64;

        // The dimension guard runs inside the insert statement itself.
        let result = sqlx::query(
            r#"
            INSERT INTO chat_history (id, owner_id, content, token_count, embedding, dims, created_at)
            SELECT ?, ?, ?, ?, ?, ?, ?
            WHERE NOT EXISTS (SELECT 1 FROM chat_history WHERE dims != ?)
            "#,
        )
        .bind(&id)
        .bind(&exchange.owner_id)
        .bind(&exchange.content)
        .bind(exchange.token_count)
        .bind(vec_to_blob(exchange.embedding.as_slice()))
        .bind(dims)
        .bind(now)
        .bind(dims)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(self.dims_mismatch("chat_history", &exchange.embedding).await);
        }
        Ok(())
    }
}

#[async_trait]
impl SectionStore for SqliteStore {
    async fn section_hash(&self, source_path: &str, section_index: i64) -> Result<Option<String>> {
        let hash: Option<String> = sqlx::query_scalar(
            "SELECT hash FROM page_sections WHERE source_path = ? AND section_index = ?",
        )
        .bind(source_path)
        .bind(section_index)
        .fetch_optional(&self.pool)
        .await?;
        Ok(hash)
    }

    async fn upsert_section(
        &self,
        section: &PageSection,
        embedding: &EmbeddingVector,
    ) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        let dims = embedding.dims() as i64;

        let result = sqlx::query(
            r#"
            INSERT INTO page_sections (id, source_path, section_index, heading, content,
                                       token_count, hash, embedding, dims, created_at)
            SELECT ?, ?, ?, ?, ?, ?, ?, ?, ?, ?
            WHERE NOT EXISTS (SELECT 1 FROM page_sections WHERE dims != ?)
            ON CONFLICT(source_path, section_index) DO UPDATE SET
                heading = excluded.heading,
                content = excluded.content,
                token_count = excluded.token_count,
                hash = excluded.hash,
                embedding = excluded.embedding,
                dims = excluded.dims,
                created_at = excluded.created_at
            "#,
        )
        .bind(&section.id)
        .bind(&section.source_path)
        .bind(section.section_index)
        .bind(&section.heading)
        .bind(&section.content)
        .bind(section.token_count)
        .bind(&section.hash)
        .bind(vec_to_blob(embedding.as_slice()))
        .bind(dims)
        .bind(now)
        .bind(dims)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(self.dims_mismatch("page_sections", embedding).await);
        }
        Ok(())
    }

    async fn truncate_sections(&self, source_path: &str, keep: i64) -> Result<u64> {
        let result =
            sqlx::query("DELETE FROM page_sections WHERE source_path = ? AND section_index >= ?")
                .bind(source_path)
                .bind(keep)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected())
    }

    async fn remove_missing(&self, keep_paths: &[String]) -> Result<u64> {
        let keep: HashSet<&str> = keep_paths.iter().map(String::as_str).collect();
        let mut tx = self.pool.begin().await?;

        let stored: Vec<(String,)> = sqlx::query_as("SELECT DISTINCT source_path FROM page_sections")
            .fetch_all(&mut *tx)
            .await?;

        let mut removed = 0;
        for (path,) in stored.iter().filter(|(p,)| !keep.contains(p.as_str())) {
            let result = sqlx::query("DELETE FROM page_sections WHERE source_path = ?")
                .bind(path)
                .execute(&mut *tx)
                .await?;
            removed += result.rows_affected();
        }

        tx.commit().await?;
        Ok(removed)
    }
}
