//! In-memory [`VectorStore`] implementation for tests and ephemeral indexes.
//!
//! Chunks live in a `Vec` behind `std::sync::RwLock`. Vector search is
//! brute-force cosine similarity over all stored vectors.

use std::collections::BTreeSet;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::Result;
use async_trait::async_trait;

use crate::embedding::cosine_similarity;
use crate::models::{Chunk, ScoredChunk};

use super::{rank_hits, IndexUpdate, IndexedChunk, StoredVersion, VectorStore};

/// Volatile vector store.
#[derive(Default)]
pub struct InMemoryVectorStore {
    entries: RwLock<Vec<IndexedChunk>>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Vec<IndexedChunk>>> {
        self.entries
            .read()
            .map_err(|_| anyhow::anyhow!("in-memory store lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Vec<IndexedChunk>>> {
        self.entries
            .write()
            .map_err(|_| anyhow::anyhow!("in-memory store lock poisoned"))
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn source_versions(&self, source_id: &str) -> Result<Vec<StoredVersion>> {
        let entries = self.read()?;
        let mut versions: Vec<StoredVersion> = Vec::new();
        for entry in entries.iter().filter(|e| e.chunk.source_id == source_id) {
            let version = StoredVersion {
                last_modified: entry.chunk.last_modified,
                fingerprint: entry.chunk.fingerprint.clone(),
            };
            if !versions.contains(&version) {
                versions.push(version);
            }
        }
        Ok(versions)
    }

    async fn indexed_sources(&self) -> Result<Vec<String>> {
        let entries = self.read()?;
        let names: BTreeSet<String> = entries.iter().map(|e| e.chunk.source_id.clone()).collect();
        Ok(names.into_iter().collect())
    }

    async fn apply(&self, update: IndexUpdate) -> Result<()> {
        // single write guard, so readers never see a half-applied update
        let mut entries = self.write()?;
        if !update.remove_sources.is_empty() {
            entries.retain(|e| !update.remove_sources.contains(&e.chunk.source_id));
        }
        entries.extend(update.insert);
        Ok(())
    }

    async fn similarity_search(&self, query_vec: &[f32], k: usize) -> Result<Vec<ScoredChunk>> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let entries = self.read()?;
        let mut hits: Vec<ScoredChunk> = entries
            .iter()
            .map(|e| ScoredChunk {
                chunk: e.chunk.clone(),
                score: cosine_similarity(query_vec, &e.vector),
            })
            .collect();
        rank_hits(&mut hits, k);
        Ok(hits)
    }

    async fn chunk_count(&self) -> Result<usize> {
        Ok(self.read()?.len())
    }

    async fn chunks_for_source(&self, source_id: &str) -> Result<Vec<Chunk>> {
        let entries = self.read()?;
        let mut chunks: Vec<Chunk> = entries
            .iter()
            .filter(|e| e.chunk.source_id == source_id)
            .map(|e| e.chunk.clone())
            .collect();
        chunks.sort_by_key(|c| c.ordinal);
        Ok(chunks)
    }
}
