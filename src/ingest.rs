//! Knowledge ingestion.
//!
//! Coordinates the flow that fills `page_sections`: filesystem scan →
//! heading split → staleness check → embedding → upsert. Sections whose
//! SHA-256 hash matches the stored row are skipped. Sections left over
//! from a previously longer version of a file are removed, as are all
//! sections of files no longer present in the scan.

use anyhow::{bail, Context, Result};
use uuid::Uuid;

use crate::chunk::split_markdown;
use crate::config::Config;
use crate::connector_fs::{scan_markdown, SourceFile};
use crate::db;
use crate::embedding::{create_embedding_client, EmbeddingClient};
use crate::migrate;
use crate::models::PageSection;
use crate::store::sqlite::SqliteStore;
use crate::store::SectionStore;
use crate::tokens::{create_accountant, TokenAccountant};

/// Counters reported at the end of an ingest run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IngestStats {
    pub files: u64,
    pub sections: u64,
    pub embedded: u64,
    pub unchanged: u64,
    pub removed: u64,
}

/// Split, embed, and store every file in `files`.
///
/// `files` is the complete scan: stored sections of any other path are
/// deleted. With `dry_run` set, files are only split and counted; nothing
/// is embedded or written.
pub async fn ingest_files(
    files: &[SourceFile],
    embedder: &dyn EmbeddingClient,
    store: &dyn SectionStore,
    accountant: &dyn TokenAccountant,
    max_words: usize,
    dry_run: bool,
) -> Result<IngestStats> {
    let mut stats = IngestStats::default();

    for file in files {
        let drafts = split_markdown(&file.body, max_words);
        stats.files += 1;
        stats.sections += drafts.len() as u64;

        if dry_run {
            continue;
        }

        for draft in &drafts {
            let stored = store
                .section_hash(&file.relative_path, draft.index)
                .await?;
            if stored.as_deref() == Some(draft.hash.as_str()) {
                stats.unchanged += 1;
                continue;
            }

            let embedding = embedder.embed(&draft.text).await.with_context(|| {
                format!(
                    "Failed to embed section {} of {}",
                    draft.index, file.relative_path
                )
            })?;

            let section = PageSection {
                id: Uuid::new_v4().to_string(),
                source_path: file.relative_path.clone(),
                section_index: draft.index,
                heading: draft.heading.clone(),
                content: draft.text.clone(),
                token_count: accountant.count(&draft.text),
                hash: draft.hash.clone(),
            };
            store.upsert_section(&section, &embedding).await?;
            stats.embedded += 1;
        }

        stats.removed += store
            .truncate_sections(&file.relative_path, drafts.len() as i64)
            .await?;

        tracing::debug!(
            path = %file.relative_path,
            sections = drafts.len(),
            "file ingested"
        );
    }

    if !dry_run {
        let scanned: Vec<String> = files.iter().map(|f| f.relative_path.clone()).collect();
        let orphaned = store.remove_missing(&scanned).await?;
        if orphaned > 0 {
            tracing::info!(sections = orphaned, "removed sections of deleted files");
        }
        stats.removed += orphaned;
    }

    Ok(stats)
}

pub async fn run_ingest(config: &Config, dry_run: bool) -> Result<()> {
    let ingest = match &config.ingest {
        Some(ingest) => ingest,
        None => bail!("Ingest not configured. Add [ingest] with a root to your config."),
    };

    let files = scan_markdown(ingest)?;
    tracing::info!(root = %ingest.root.display(), files = files.len(), "scanned ingest root");

    let accountant = create_accountant(&config.tokens);
    let embedder = create_embedding_client(&config.embedding)?;

    if dry_run {
        let store = crate::store::memory::InMemoryStore::new();
        let stats = ingest_files(
            &files,
            embedder.as_ref(),
            &store,
            accountant.as_ref(),
            ingest.max_words,
            true,
        )
        .await?;
        println!("ingest (dry-run)");
        println!("  files found: {}", stats.files);
        println!("  sections: {}", stats.sections);
        return Ok(());
    }

    if !config.embedding.is_enabled() {
        bail!("Embeddings are disabled. Set [embedding] provider to ingest sections.");
    }

    let pool = db::connect(config).await?;
    migrate::apply(&pool).await?;
    let store = SqliteStore::new(pool);

    let stats = ingest_files(
        &files,
        embedder.as_ref(),
        &store,
        accountant.as_ref(),
        ingest.max_words,
        false,
    )
    .await?;

    tracing::info!(
        files = stats.files,
        sections = stats.sections,
        embedded = stats.embedded,
        "ingest finished"
    );

    println!("ingest");
    println!("  files: {}", stats.files);
    println!("  sections: {}", stats.sections);
    println!("  embedded: {}", stats.embedded);
    println!("  unchanged: {}", stats.unchanged);
    println!("  removed: {}", stats.removed);
    println!("ok");

    store.pool().close().await;
    Ok(())
}
