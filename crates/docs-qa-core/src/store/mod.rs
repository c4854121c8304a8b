//! Storage abstraction for the vector index.
//!
//! The [`VectorStore`] trait defines the operations the
//! [`IndexManager`](crate::index::IndexManager) needs: per-document version
//! lookups for change detection, an atomic replace-and-prune update, and
//! cosine similarity search. Backends are pluggable (SQLite in the app
//! crate, [`memory::InMemoryVectorStore`] for tests).
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{Chunk, ScoredChunk};

/// Document version recorded on stored chunks.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StoredVersion {
    pub last_modified: Option<i64>,
    pub fingerprint: String,
}

/// A chunk together with its embedding, ready to be stored.
#[derive(Debug, Clone)]
pub struct IndexedChunk {
    pub chunk: Chunk,
    pub vector: Vec<f32>,
}

/// One atomic change to the index.
///
/// All chunks of every document in `remove_sources` are deleted, then
/// `insert` is added. Replacing a document means listing it in
/// `remove_sources` and inserting its new chunks.
#[derive(Debug, Clone, Default)]
pub struct IndexUpdate {
    pub remove_sources: Vec<String>,
    pub insert: Vec<IndexedChunk>,
}

impl IndexUpdate {
    pub fn is_empty(&self) -> bool {
        self.remove_sources.is_empty() && self.insert.is_empty()
    }
}

/// Abstract vector index backend.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`source_versions`](VectorStore::source_versions) | Distinct versions stored for a document |
/// | [`indexed_sources`](VectorStore::indexed_sources) | Names of all documents with chunks |
/// | [`apply`](VectorStore::apply) | Atomically remove and insert chunks |
/// | [`persist`](VectorStore::persist) | Flush to durable storage |
/// | [`similarity_search`](VectorStore::similarity_search) | Top-k cosine search |
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Distinct `(last_modified, fingerprint)` pairs stored for `source_id`.
    /// Empty when the document has no chunks.
    async fn source_versions(&self, source_id: &str) -> Result<Vec<StoredVersion>>;

    /// Names of every document with at least one stored chunk, sorted.
    async fn indexed_sources(&self) -> Result<Vec<String>>;

    /// Apply an update atomically: either all of it is visible or none.
    async fn apply(&self, update: IndexUpdate) -> Result<()>;

    /// Make the current contents durable. A no-op for volatile stores.
    async fn persist(&self) -> Result<()> {
        Ok(())
    }

    /// The `k` chunks most similar to `query_vec`, best first.
    async fn similarity_search(&self, query_vec: &[f32], k: usize) -> Result<Vec<ScoredChunk>>;

    async fn chunk_count(&self) -> Result<usize>;

    /// Stored chunks of one document, by ordinal.
    async fn chunks_for_source(&self, source_id: &str) -> Result<Vec<Chunk>>;
}

/// Order search hits by descending score, breaking ties by document then
/// ordinal so results are deterministic.
pub fn rank_hits(hits: &mut Vec<ScoredChunk>, k: usize) {
    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.chunk.source_id.cmp(&b.chunk.source_id))
            .then_with(|| a.chunk.ordinal.cmp(&b.chunk.ordinal))
    });
    hits.truncate(k);
}
