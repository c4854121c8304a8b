//! Index lifecycle: full and incremental indexing passes, and top-k query.
//!
//! [`IndexManager`] owns a [`VectorStore`] and an [`EmbeddingProvider`]. A
//! pass decides per document whether it must be re-chunked, embeds every new
//! chunk up front, then commits one atomic [`IndexUpdate`] and persists it.
//!
//! # Pass modes
//!
//! | Condition | Mode | Work |
//! |-----------|------|------|
//! | `force_refresh` | full | every stored chunk removed, every document indexed |
//! | store freshly created | full | every document indexed |
//! | otherwise | incremental | only modified documents, removed ones pruned |
//!
//! A document is *modified* when the store has no chunks for it, or any
//! stored chunk carries a different modification time or fingerprint.
//!
//! Embedding happens before any mutation, so a provider failure leaves the
//! store exactly as it was.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Serialize;

use crate::chunk::{build_chunks, ChunkSettings};
use crate::embedding::{validate_embeddings, EmbeddingProvider};
use crate::models::{Chunk, ScoredChunk, SourceDocument};
use crate::store::{IndexUpdate, IndexedChunk, VectorStore};

pub const DEFAULT_BATCH_SIZE: usize = 64;

/// Lifecycle state of an index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexState {
    /// Store exists but no pass has completed against it.
    Created,
    /// At least one pass completed; queries are allowed.
    Ready,
}

/// Whether a pass rebuilt everything or only touched modified documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexMode {
    Full,
    Incremental,
}

/// Outcome of one indexing pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexReport {
    pub mode: IndexMode,
    pub documents_seen: usize,
    pub documents_reindexed: usize,
    pub documents_unchanged: usize,
    pub documents_pruned: usize,
    pub chunks_written: usize,
    pub embedding_calls: usize,
}

/// Progress event emitted during a pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexEvent {
    /// Documents have been read; change detection is next.
    Discovered { documents: usize },
    /// Work for this pass is decided.
    Planned {
        mode: IndexMode,
        reindex: usize,
        unchanged: usize,
        prune: usize,
    },
    /// `n` of `total` chunks embedded.
    Embedding { n: usize, total: usize },
    /// The update is being committed and persisted.
    Committing { chunks: usize },
}

/// A planned and fully embedded pass that has not been applied yet.
#[derive(Debug)]
pub struct PreparedPass {
    update: IndexUpdate,
    report: IndexReport,
}

impl PreparedPass {
    /// The report the pass will produce once committed.
    pub fn report(&self) -> &IndexReport {
        &self.report
    }
}

/// Receives [`IndexEvent`]s. Implementations must not fail.
pub trait IndexProgress: Send + Sync {
    fn report(&self, event: IndexEvent);
}

/// Discards every event.
pub struct NoProgress;

impl IndexProgress for NoProgress {
    fn report(&self, _event: IndexEvent) {}
}

/// Owns the vector store for its whole lifetime.
pub struct IndexManager<S: VectorStore> {
    store: S,
    embedder: Arc<dyn EmbeddingProvider>,
    settings: ChunkSettings,
    batch_size: usize,
    prune_removed: bool,
    state: IndexState,
}

impl<S: VectorStore> IndexManager<S> {
    /// Wrap a store. Pass [`IndexState::Created`] for a store that was just
    /// created and [`IndexState::Ready`] for one loaded from disk.
    pub fn new(store: S, embedder: Arc<dyn EmbeddingProvider>, state: IndexState) -> Self {
        Self {
            store,
            embedder,
            settings: ChunkSettings::default(),
            batch_size: DEFAULT_BATCH_SIZE,
            prune_removed: true,
            state,
        }
    }

    pub fn with_settings(mut self, settings: ChunkSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_prune_removed(mut self, prune_removed: bool) -> Self {
        self.prune_removed = prune_removed;
        self
    }

    pub fn state(&self) -> IndexState {
        self.state
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn embedder(&self) -> &dyn EmbeddingProvider {
        self.embedder.as_ref()
    }

    pub fn settings(&self) -> &ChunkSettings {
        &self.settings
    }

    /// Run a pass without progress reporting.
    pub async fn index_documents(
        &mut self,
        documents: &[SourceDocument],
        force_refresh: bool,
    ) -> Result<IndexReport> {
        self.index_documents_with_progress(documents, force_refresh, &NoProgress)
            .await
    }

    /// Bring the store in line with `documents`.
    pub async fn index_documents_with_progress(
        &mut self,
        documents: &[SourceDocument],
        force_refresh: bool,
        progress: &dyn IndexProgress,
    ) -> Result<IndexReport> {
        let pass = self.prepare_pass(documents, force_refresh, progress).await?;
        self.commit_pass(pass, progress).await
    }

    /// Plan, chunk, and embed a pass without touching the store.
    ///
    /// Only shared access is needed, so queries can keep running while the
    /// provider is called. The store must not be mutated by anyone else
    /// before the result is handed to [`commit_pass`](Self::commit_pass).
    pub async fn prepare_pass(
        &self,
        documents: &[SourceDocument],
        force_refresh: bool,
        progress: &dyn IndexProgress,
    ) -> Result<PreparedPass> {
        let mut names = HashSet::with_capacity(documents.len());
        for doc in documents {
            if !names.insert(doc.name.as_str()) {
                anyhow::bail!("Duplicate document name in corpus: {}", doc.name);
            }
        }

        let mode = if force_refresh || self.state == IndexState::Created {
            IndexMode::Full
        } else {
            IndexMode::Incremental
        };

        // ---- plan ----
        let indexed = self.store.indexed_sources().await?;
        let (to_index, remove_sources, pruned) = match mode {
            IndexMode::Full => (documents.iter().collect::<Vec<_>>(), indexed, 0),
            IndexMode::Incremental => {
                let mut to_index = Vec::new();
                for doc in documents {
                    if self.is_modified(doc).await? {
                        to_index.push(doc);
                    }
                }
                let mut remove: Vec<String> = to_index.iter().map(|d| d.name.clone()).collect();
                let mut pruned = 0;
                if self.prune_removed {
                    for name in indexed {
                        if !names.contains(name.as_str()) {
                            tracing::info!(document = %name, "pruning removed document");
                            remove.push(name);
                            pruned += 1;
                        }
                    }
                }
                (to_index, remove, pruned)
            }
        };

        progress.report(IndexEvent::Planned {
            mode,
            reindex: to_index.len(),
            unchanged: documents.len() - to_index.len(),
            prune: pruned,
        });
        tracing::info!(
            ?mode,
            reindex = to_index.len(),
            unchanged = documents.len() - to_index.len(),
            pruned,
            "index pass planned"
        );

        // ---- chunk ----
        let mut chunks: Vec<Chunk> = Vec::new();
        for doc in &to_index {
            chunks.extend(build_chunks(doc, &self.settings)?);
        }

        // ---- embed (no mutation yet) ----
        let (insert, embedding_calls) = self.embed_chunks(chunks, progress).await?;
        let chunks_written = insert.len();

        Ok(PreparedPass {
            update: IndexUpdate {
                remove_sources,
                insert,
            },
            report: IndexReport {
                mode,
                documents_seen: documents.len(),
                documents_reindexed: to_index.len(),
                documents_unchanged: documents.len() - to_index.len(),
                documents_pruned: pruned,
                chunks_written,
                embedding_calls,
            },
        })
    }

    /// Apply a prepared pass atomically and persist it.
    pub async fn commit_pass(
        &mut self,
        pass: PreparedPass,
        progress: &dyn IndexProgress,
    ) -> Result<IndexReport> {
        let PreparedPass { update, report } = pass;
        if !update.is_empty() {
            progress.report(IndexEvent::Committing {
                chunks: report.chunks_written,
            });
            self.store
                .apply(update)
                .await
                .context("Failed to apply index update")?;
            self.store
                .persist()
                .await
                .context("Failed to persist index")?;
        }
        self.state = IndexState::Ready;
        Ok(report)
    }

    async fn is_modified(&self, doc: &SourceDocument) -> Result<bool> {
        let versions = self.store.source_versions(&doc.name).await?;
        if versions.is_empty() {
            return Ok(true);
        }
        let last_modified = doc.last_modified_millis();
        let fingerprint = doc.fingerprint();
        Ok(versions
            .iter()
            .any(|v| v.last_modified != last_modified || v.fingerprint != fingerprint))
    }

    async fn embed_chunks(
        &self,
        chunks: Vec<Chunk>,
        progress: &dyn IndexProgress,
    ) -> Result<(Vec<IndexedChunk>, usize)> {
        let total = chunks.len();
        let mut out = Vec::with_capacity(total);
        let mut calls = 0;
        let mut pending = chunks.into_iter().peekable();

        while pending.peek().is_some() {
            let batch: Vec<Chunk> = pending.by_ref().take(self.batch_size).collect();
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();

            let vectors = self
                .embedder
                .embed_batch(&texts)
                .await
                .with_context(|| format!("Embedding failed for batch of {} chunks", texts.len()))?;
            calls += 1;
            validate_embeddings(&vectors, batch.len(), self.embedder.dims())?;

            out.extend(
                batch
                    .into_iter()
                    .zip(vectors)
                    .map(|(chunk, vector)| IndexedChunk { chunk, vector }),
            );
            progress.report(IndexEvent::Embedding {
                n: out.len(),
                total,
            });
        }

        Ok((out, calls))
    }

    /// The `k` chunks most similar to `question`, best first.
    ///
    /// Blank questions return no results without calling the provider.
    pub async fn query(&self, question: &str, k: usize) -> Result<Vec<ScoredChunk>> {
        if self.state != IndexState::Ready {
            anyhow::bail!("Index is not ready; run an indexing pass first");
        }
        let question = question.trim();
        if question.is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        let query_vec = self
            .embedder
            .embed_query(question)
            .await
            .context("Failed to embed query")?;
        self.store.similarity_search(&query_vec, k).await
    }

    pub async fn chunk_count(&self) -> Result<usize> {
        self.store.chunk_count().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::InMemoryVectorStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    const DIMS: usize = 32;

    /// Bag-of-words embedder: each lowercase word bumps one hashed bucket.
    #[derive(Default)]
    struct WordEmbedder {
        calls: AtomicUsize,
        texts: AtomicUsize,
        fail: AtomicBool,
    }

    #[async_trait]
    impl EmbeddingProvider for WordEmbedder {
        fn model_name(&self) -> &str {
            "word-hash"
        }
        fn dims(&self) -> usize {
            DIMS
        }
        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            if self.fail.load(Ordering::SeqCst) {
                anyhow::bail!("provider unavailable");
            }
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.texts.fetch_add(texts.len(), Ordering::SeqCst);
            Ok(texts.iter().map(|t| word_vector(t)).collect())
        }
    }

    fn word_vector(text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; DIMS];
        for word in text.split(|c: char| !c.is_alphanumeric()).filter(|w| !w.is_empty()) {
            let h = word
                .to_lowercase()
                .bytes()
                .fold(2166136261u32, |h, b| (h ^ b as u32).wrapping_mul(16777619));
            v[h as usize % DIMS] += 1.0;
        }
        v
    }

    fn doc(name: &str, body: &str, ts: i64) -> SourceDocument {
        SourceDocument::new(name, body.as_bytes().to_vec(), chrono::DateTime::from_timestamp(ts, 0))
    }

    fn corpus() -> Vec<SourceDocument> {
        vec![
            doc("x.md", "# X\n\nRust ownership and borrowing rules.", 100),
            doc("y.md", "# Y\n\nPython packaging with pip.\n\n```sh\npip install y\n```", 100),
            doc("z.md", "# Z\n\nDeploying containers to the cloud.", 100),
        ]
    }

    fn manager(embedder: Arc<WordEmbedder>) -> IndexManager<InMemoryVectorStore> {
        IndexManager::new(InMemoryVectorStore::new(), embedder, IndexState::Created)
    }

    #[tokio::test]
    async fn first_pass_is_full_and_makes_index_ready() {
        let embedder = Arc::new(WordEmbedder::default());
        let mut mgr = manager(embedder.clone());

        let report = mgr.index_documents(&corpus(), false).await.unwrap();
        assert_eq!(report.mode, IndexMode::Full);
        assert_eq!(report.documents_reindexed, 3);
        assert_eq!(report.chunks_written, 4);
        assert_eq!(report.embedding_calls, 1);
        assert_eq!(mgr.state(), IndexState::Ready);
        assert_eq!(mgr.chunk_count().await.unwrap(), 4);
    }

    #[tokio::test]
    async fn prepared_pass_is_invisible_until_committed() {
        let embedder = Arc::new(WordEmbedder::default());
        let mut mgr = manager(embedder.clone());
        mgr.index_documents(&corpus(), false).await.unwrap();

        let mut docs = corpus();
        docs[0] = doc("x.md", "# X\n\nLifetimes and traits.", 200);
        let pass = mgr.prepare_pass(&docs, false, &NoProgress).await.unwrap();
        assert_eq!(pass.report().documents_reindexed, 1);
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 2);

        // queries still see the old contents
        let old = mgr.store().chunks_for_source("x.md").await.unwrap();
        assert!(old.iter().all(|c| c.text.contains("ownership")));
        assert!(!mgr.query("lifetimes traits", 1).await.unwrap().is_empty());

        let report = mgr.commit_pass(pass, &NoProgress).await.unwrap();
        assert_eq!(report.documents_reindexed, 1);
        let new = mgr.store().chunks_for_source("x.md").await.unwrap();
        assert!(new.iter().all(|c| c.text.contains("Lifetimes")));
    }

    #[tokio::test]
    async fn unchanged_corpus_does_no_work() {
        let embedder = Arc::new(WordEmbedder::default());
        let mut mgr = manager(embedder.clone());
        mgr.index_documents(&corpus(), false).await.unwrap();
        let calls = embedder.calls.load(Ordering::SeqCst);

        let report = mgr.index_documents(&corpus(), false).await.unwrap();
        assert_eq!(report.mode, IndexMode::Incremental);
        assert_eq!(report.documents_reindexed, 0);
        assert_eq!(report.documents_unchanged, 3);
        assert_eq!(report.embedding_calls, 0);
        assert_eq!(embedder.calls.load(Ordering::SeqCst), calls);
    }

    #[tokio::test]
    async fn only_modified_document_is_reembedded() {
        let embedder = Arc::new(WordEmbedder::default());
        let mut mgr = manager(embedder.clone());
        mgr.index_documents(&corpus(), false).await.unwrap();
        let y_before = mgr.store().chunks_for_source("y.md").await.unwrap();
        let texts_before = embedder.texts.load(Ordering::SeqCst);

        let mut docs = corpus();
        docs[0] = doc("x.md", "# X\n\nRust lifetimes, revised.", 200);
        let report = mgr.index_documents(&docs, false).await.unwrap();

        assert_eq!(report.documents_reindexed, 1);
        assert_eq!(report.chunks_written, 1);
        assert_eq!(embedder.texts.load(Ordering::SeqCst) - texts_before, 1);

        let x_after = mgr.store().chunks_for_source("x.md").await.unwrap();
        assert_eq!(x_after.len(), 1);
        assert!(x_after[0].text.contains("lifetimes"));
        assert_eq!(mgr.store().chunks_for_source("y.md").await.unwrap(), y_before);
    }

    #[tokio::test]
    async fn timestamp_change_alone_triggers_reindex() {
        let embedder = Arc::new(WordEmbedder::default());
        let mut mgr = manager(embedder);
        mgr.index_documents(&corpus(), false).await.unwrap();

        let mut docs = corpus();
        docs[2].last_modified = chrono::DateTime::from_timestamp(999, 0);
        let report = mgr.index_documents(&docs, false).await.unwrap();
        assert_eq!(report.documents_reindexed, 1);
    }

    #[tokio::test]
    async fn removed_documents_are_pruned() {
        let embedder = Arc::new(WordEmbedder::default());
        let mut mgr = manager(embedder);
        mgr.index_documents(&corpus(), false).await.unwrap();

        let docs: Vec<SourceDocument> = corpus().into_iter().filter(|d| d.name != "z.md").collect();
        let report = mgr.index_documents(&docs, false).await.unwrap();
        assert_eq!(report.documents_pruned, 1);
        assert!(mgr.store().chunks_for_source("z.md").await.unwrap().is_empty());
        assert_eq!(
            mgr.store().indexed_sources().await.unwrap(),
            vec!["x.md".to_string(), "y.md".to_string()]
        );
    }

    #[tokio::test]
    async fn pruning_can_be_disabled() {
        let embedder = Arc::new(WordEmbedder::default());
        let mut mgr = manager(embedder).with_prune_removed(false);
        mgr.index_documents(&corpus(), false).await.unwrap();

        let report = mgr.index_documents(&corpus()[..1], false).await.unwrap();
        assert_eq!(report.documents_pruned, 0);
        assert_eq!(mgr.store().indexed_sources().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn force_refresh_rebuilds_everything() {
        let embedder = Arc::new(WordEmbedder::default());
        let mut mgr = manager(embedder);
        mgr.index_documents(&corpus(), false).await.unwrap();

        let report = mgr.index_documents(&corpus()[..2], true).await.unwrap();
        assert_eq!(report.mode, IndexMode::Full);
        assert_eq!(report.documents_reindexed, 2);
        assert_eq!(mgr.chunk_count().await.unwrap(), 3);
        assert!(mgr.store().chunks_for_source("z.md").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn embedding_failure_leaves_store_untouched() {
        let embedder = Arc::new(WordEmbedder::default());
        let mut mgr = manager(embedder.clone());
        mgr.index_documents(&corpus(), false).await.unwrap();
        let before = mgr.store().chunks_for_source("x.md").await.unwrap();

        embedder.fail.store(true, Ordering::SeqCst);
        let mut docs = corpus();
        docs[0] = doc("x.md", "changed", 300);
        assert!(mgr.index_documents(&docs, true).await.is_err());

        assert_eq!(mgr.chunk_count().await.unwrap(), 4);
        assert_eq!(mgr.store().chunks_for_source("x.md").await.unwrap(), before);
    }

    #[tokio::test]
    async fn batches_follow_batch_size() {
        let embedder = Arc::new(WordEmbedder::default());
        let mut mgr = manager(embedder).with_batch_size(3);
        let report = mgr.index_documents(&corpus(), false).await.unwrap();
        assert_eq!(report.chunks_written, 4);
        assert_eq!(report.embedding_calls, 2);
    }

    #[tokio::test]
    async fn duplicate_names_are_rejected() {
        let mut mgr = manager(Arc::new(WordEmbedder::default()));
        let docs = vec![doc("a.md", "one", 1), doc("a.md", "two", 1)];
        assert!(mgr.index_documents(&docs, false).await.is_err());
    }

    #[tokio::test]
    async fn query_before_ready_is_an_error() {
        let mgr = manager(Arc::new(WordEmbedder::default()));
        assert!(mgr.query("anything", 3).await.is_err());
    }

    #[tokio::test]
    async fn query_returns_most_relevant_chunk() {
        let embedder = Arc::new(WordEmbedder::default());
        let mut mgr = manager(embedder);
        mgr.index_documents(&corpus(), false).await.unwrap();

        let hits = mgr.query("rust ownership borrowing", 3).await.unwrap();
        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].chunk.source_id, "x.md");
        assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));
    }

    #[tokio::test]
    async fn blank_query_returns_nothing() {
        let embedder = Arc::new(WordEmbedder::default());
        let mut mgr = manager(embedder.clone());
        mgr.index_documents(&corpus(), false).await.unwrap();
        let calls = embedder.calls.load(Ordering::SeqCst);

        assert!(mgr.query("   ", 3).await.unwrap().is_empty());
        assert_eq!(embedder.calls.load(Ordering::SeqCst), calls);
    }

    #[tokio::test]
    async fn progress_events_are_reported() {
        use std::sync::Mutex;

        #[derive(Default)]
        struct Recorder(Mutex<Vec<IndexEvent>>);
        impl IndexProgress for Recorder {
            fn report(&self, event: IndexEvent) {
                self.0.lock().unwrap().push(event);
            }
        }

        let recorder = Recorder::default();
        let mut mgr = manager(Arc::new(WordEmbedder::default()));
        mgr.index_documents_with_progress(&corpus(), false, &recorder)
            .await
            .unwrap();

        let events = recorder.0.lock().unwrap();
        assert!(matches!(events[0], IndexEvent::Planned { reindex: 3, .. }));
        assert!(events.contains(&IndexEvent::Embedding { n: 4, total: 4 }));
        assert!(matches!(events.last(), Some(IndexEvent::Committing { chunks: 4 })));
    }
}
