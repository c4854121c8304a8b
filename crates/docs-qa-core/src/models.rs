//! Core data models shared by the chunker, the store, and the index manager.
//!
//! These types represent the documents, chunks, and retrieval results that
//! flow through the indexing pipeline.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::checksum::compute_fingerprint;

/// A Markdown file read from storage, immutable for the duration of a pass.
#[derive(Debug, Clone)]
pub struct SourceDocument {
    /// Unique name, normally the path relative to the docs root.
    pub name: String,
    /// Raw file bytes.
    pub content: Vec<u8>,
    /// Modification time reported by storage, when available.
    pub last_modified: Option<DateTime<Utc>>,
}

impl SourceDocument {
    pub fn new(
        name: impl Into<String>,
        content: impl Into<Vec<u8>>,
        last_modified: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
            last_modified,
        }
    }

    /// Decode the content as UTF-8. Invalid sequences are an error.
    pub fn text(&self) -> Result<&str> {
        std::str::from_utf8(&self.content)
            .with_context(|| format!("Document is not valid UTF-8: {}", self.name))
    }

    /// Content fingerprint of the raw bytes.
    pub fn fingerprint(&self) -> String {
        compute_fingerprint(&self.content)
    }

    /// Modification time as unix milliseconds.
    pub fn last_modified_millis(&self) -> Option<i64> {
        self.last_modified.map(|ts| ts.timestamp_millis())
    }
}

/// Whether a chunk holds prose or an isolated fenced code block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkKind {
    Text,
    Code,
}

impl ChunkKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkKind::Text => "text",
            ChunkKind::Code => "code",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "text" => Some(ChunkKind::Text),
            "code" => Some(ChunkKind::Code),
            _ => None,
        }
    }
}

/// A retrieval unit: a slice of a document's prose or one code block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    /// Name of the document this chunk came from.
    pub source_id: String,
    /// Position within the document. Unique per document, not globally.
    pub ordinal: i64,
    pub kind: ChunkKind,
    pub text: String,
    /// 1-based inclusive line span in the original document (text chunks only).
    pub start_line: Option<usize>,
    pub end_line: Option<usize>,
    /// Index of the code block within the document (code chunks only).
    pub block_index: Option<usize>,
    /// Fence language tag (code chunks only).
    pub language: Option<String>,
    /// Nearest enclosing heading, `""` when none (text chunks only).
    pub header: Option<String>,
    /// Document modification time (unix millis) when the chunk was built.
    pub last_modified: Option<i64>,
    /// Document fingerprint when the chunk was built.
    pub fingerprint: String,
    /// SHA-256 of `text`.
    pub hash: String,
}

impl Chunk {
    /// Human-readable source reference, e.g. `guide/setup.md:12-40`.
    pub fn citation(&self) -> String {
        match (self.kind, self.start_line, self.end_line, self.block_index) {
            (ChunkKind::Text, Some(start), Some(end), _) => {
                format!("{}:{}-{}", self.source_id, start, end)
            }
            (ChunkKind::Code, _, _, Some(block)) => format!("{}#code-{}", self.source_id, block),
            _ => self.source_id.clone(),
        }
    }
}

/// A chunk returned from similarity search.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    /// Cosine similarity to the query, higher is more relevant.
    pub score: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text_chunk() -> Chunk {
        Chunk {
            id: "c1".to_string(),
            source_id: "guide/setup.md".to_string(),
            ordinal: 0,
            kind: ChunkKind::Text,
            text: "Install".to_string(),
            start_line: Some(3),
            end_line: Some(9),
            block_index: None,
            language: None,
            header: Some("Setup".to_string()),
            last_modified: None,
            fingerprint: String::new(),
            hash: String::new(),
        }
    }

    #[test]
    fn citation_for_text_chunk_uses_line_span() {
        assert_eq!(text_chunk().citation(), "guide/setup.md:3-9");
    }

    #[test]
    fn citation_for_code_chunk_uses_block_index() {
        let mut chunk = text_chunk();
        chunk.kind = ChunkKind::Code;
        chunk.start_line = None;
        chunk.end_line = None;
        chunk.block_index = Some(2);
        assert_eq!(chunk.citation(), "guide/setup.md#code-2");
    }

    #[test]
    fn invalid_utf8_is_rejected() {
        let doc = SourceDocument::new("bad.md", vec![0x66, 0xff, 0x6f], None);
        let err = doc.text().unwrap_err();
        assert!(err.to_string().contains("bad.md"));
    }

    #[test]
    fn chunk_kind_round_trips_through_str() {
        assert_eq!(ChunkKind::parse(ChunkKind::Code.as_str()), Some(ChunkKind::Code));
        assert_eq!(ChunkKind::parse("image"), None);
    }
}
