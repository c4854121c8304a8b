//! The indexing pipeline: scan → detect changes → index → save checksums.
//!
//! ```text
//! docs/**/*.md ──scan──▶ SourceDocuments
//!                            │
//!         checksums.json ──▶ detect_changes ──▶ changed?
//!                            │                     │ no (and index ready): done
//!                            ▼                     ▼ yes / forced / new index
//!                     IndexManager::index_documents (SQLite, one transaction)
//!                            │
//!                            ▼
//!                     save checksums.json
//! ```
//!
//! Checksums are written only after the index update succeeded, so an
//! interrupted pass is retried in full on the next run.

use anyhow::Result;
use serde::Serialize;
use std::sync::Arc;

use docs_qa_core::checksum::{detect_changes, ChangeSummary, ChecksumRecord};
use docs_qa_core::embedding::EmbeddingProvider;
use docs_qa_core::index::{
    IndexEvent, IndexManager, IndexProgress, IndexReport, IndexState, PreparedPass,
};
use docs_qa_core::models::SourceDocument;
use docs_qa_core::store::VectorStore;

use crate::checksum_store::{load_record, save_record};
use crate::config::Config;
use crate::connector_fs::scan_markdown;
use crate::sqlite_store::SqliteVectorStore;

/// The index manager as used by the CLI and server.
pub type DocsIndex = IndexManager<SqliteVectorStore>;

/// Corpus-level change detection result.
#[derive(Debug, Clone, Serialize)]
pub struct ChangeCheck {
    pub changed: bool,
    /// No usable checksum record existed.
    pub cold_start: bool,
    pub documents: usize,
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub modified: Vec<String>,
}

/// Outcome of one pipeline run.
#[derive(Debug, Clone, Serialize)]
pub struct PassReport {
    #[serde(flatten)]
    pub changes: ChangeCheck,
    /// `None` when the corpus was unchanged and no pass ran.
    pub index: Option<IndexReport>,
}

/// Open (or create) the configured index for `provider`.
///
/// With `force`, existing index files are discarded first, which also
/// recovers from an index built with another model.
pub async fn open_index(
    config: &Config,
    provider: Arc<dyn EmbeddingProvider>,
    force: bool,
) -> Result<DocsIndex> {
    if force {
        SqliteVectorStore::discard(&config.index.path)?;
    }
    let (store, created) = SqliteVectorStore::open_or_create(
        &config.index.path,
        provider.model_name(),
        provider.dims(),
    )
    .await?;
    let state = if created {
        IndexState::Created
    } else {
        IndexState::Ready
    };

    Ok(IndexManager::new(store, provider, state)
        .with_settings(config.chunking.settings())
        .with_batch_size(config.embedding.batch_size)
        .with_prune_removed(config.index.prune_removed))
}

/// Open the index and bring it up to date with the docs directory.
pub async fn build_or_update_index(
    config: &Config,
    provider: Arc<dyn EmbeddingProvider>,
    force: bool,
    progress: &dyn IndexProgress,
) -> Result<(DocsIndex, PassReport)> {
    let mut index = open_index(config, provider, force).await?;
    let report = update_index(&mut index, config, force, progress).await?;
    Ok((index, report))
}

/// Run one pass against an already-open index.
pub async fn update_index<S: VectorStore>(
    index: &mut IndexManager<S>,
    config: &Config,
    force: bool,
    progress: &dyn IndexProgress,
) -> Result<PassReport> {
    let pending = prepare_update(index, config, force, progress).await?;
    commit_update(index, pending, config, progress).await
}

/// Scan, detect changes, and embed whatever needs re-indexing, leaving the
/// index and the checksum record untouched.
pub struct PendingUpdate {
    changes: ChangeCheck,
    record: ChecksumRecord,
    pass: Option<PreparedPass>,
}

impl PendingUpdate {
    pub fn changes(&self) -> &ChangeCheck {
        &self.changes
    }

    /// Whether committing will touch the index.
    pub fn has_pass(&self) -> bool {
        self.pass.is_some()
    }
}

/// First half of [`update_index`]; needs only shared access to the index.
pub async fn prepare_update<S: VectorStore>(
    index: &IndexManager<S>,
    config: &Config,
    force: bool,
    progress: &dyn IndexProgress,
) -> Result<PendingUpdate> {
    let documents = scan_markdown(&config.docs)?;
    progress.report(IndexEvent::Discovered {
        documents: documents.len(),
    });

    let (changes, record) = compare_with_record(&documents, config);

    let needs_pass = changes.changed || force || index.state() == IndexState::Created;
    let pass = if needs_pass {
        Some(index.prepare_pass(&documents, force, progress).await?)
    } else {
        tracing::info!(documents = documents.len(), "docs unchanged, index up to date");
        None
    };

    Ok(PendingUpdate {
        changes,
        record,
        pass,
    })
}

/// Second half of [`update_index`]: apply the pass, then save checksums.
pub async fn commit_update<S: VectorStore>(
    index: &mut IndexManager<S>,
    pending: PendingUpdate,
    config: &Config,
    progress: &dyn IndexProgress,
) -> Result<PassReport> {
    let PendingUpdate {
        changes,
        record,
        pass,
    } = pending;
    let Some(pass) = pass else {
        return Ok(PassReport {
            changes,
            index: None,
        });
    };

    let report = index.commit_pass(pass, progress).await?;
    save_record(&record, &config.index.checksums_path)?;

    tracing::info!(
        reindexed = report.documents_reindexed,
        pruned = report.documents_pruned,
        chunks = report.chunks_written,
        "index updated"
    );

    Ok(PassReport {
        changes,
        index: Some(report),
    })
}

/// Report what changed since the last successful pass, without indexing
/// or saving anything.
pub fn check_changes(config: &Config) -> Result<ChangeCheck> {
    let documents = scan_markdown(&config.docs)?;
    Ok(compare_with_record(&documents, config).0)
}

fn compare_with_record(
    documents: &[SourceDocument],
    config: &Config,
) -> (ChangeCheck, ChecksumRecord) {
    let previous = load_record(&config.index.checksums_path);
    let (changed, current) = detect_changes(documents, previous.as_ref());
    let summary = match &previous {
        Some(previous) => current.diff(previous),
        None => ChangeSummary {
            added: current.names().map(str::to_string).collect(),
            ..ChangeSummary::default()
        },
    };

    let check = ChangeCheck {
        changed,
        cold_start: previous.is_none(),
        documents: documents.len(),
        added: summary.added,
        removed: summary.removed,
        modified: summary.modified,
    };
    (check, current)
}
