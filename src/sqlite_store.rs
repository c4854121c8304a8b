//! SQLite-backed [`VectorStore`] implementation.
//!
//! The index directory holds a single `index.sqlite` database with three
//! tables: `index_meta` (schema version, embedding model, dims), `chunks`,
//! and `chunk_vectors` (little-endian `f32` BLOBs). Every
//! [`apply`](VectorStore::apply) runs in one transaction, so a crash
//! mid-update leaves the previous contents intact.
//!
//! Vector search is brute-force cosine similarity over all stored vectors,
//! which is adequate for documentation-sized corpora.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use docs_qa_core::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use docs_qa_core::models::{Chunk, ChunkKind, ScoredChunk};
use docs_qa_core::store::{rank_hits, IndexUpdate, StoredVersion, VectorStore};

use crate::db;
use crate::migrate::{self, SCHEMA_VERSION};

/// Database file name inside the index directory.
pub const INDEX_FILE: &str = "index.sqlite";

/// Identity of an index: which layout and which embedding space it uses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexMeta {
    pub schema_version: i64,
    pub model: String,
    pub dims: usize,
}

/// SQLite implementation of the [`VectorStore`] trait.
pub struct SqliteVectorStore {
    pool: SqlitePool,
    path: PathBuf,
}

impl SqliteVectorStore {
    /// Open the index in `dir`, creating an empty one if absent.
    ///
    /// Returns the store and whether it still needs a full pass: true for a
    /// new index and for one left without chunks by a failed first pass.
    /// An existing index built with another schema version, model, or dimensionality is
    /// an error; callers rebuild it with [`discard`](Self::discard).
    pub async fn open_or_create(dir: &Path, model: &str, dims: usize) -> Result<(Self, bool)> {
        let path = dir.join(INDEX_FILE);
        let pool = db::connect(&path).await?;
        migrate::run_migrations(&pool).await?;

        let existing: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
            .fetch_one(&pool)
            .await?;

        // An index with no chunks never completed a pass and counts as new.
        let created = match read_meta(&pool).await? {
            Some(meta) => {
                check_compatible(&meta, model, dims).with_context(|| {
                    format!(
                        "Incompatible index at {} (rerun with --force to rebuild it)",
                        path.display()
                    )
                })?;
                existing == 0
            }
            None => {
                if existing > 0 {
                    bail!(
                        "Incompatible index at {}: chunks present but no index metadata \
                         (rerun with --force to rebuild it)",
                        path.display()
                    );
                }
                write_meta(&pool, model, dims).await?;
                true
            }
        };

        if created {
            tracing::info!(path = %path.display(), model, dims, "created new index");
        } else {
            tracing::info!(path = %path.display(), "loaded existing index");
        }

        Ok((Self { pool, path }, created))
    }

    /// Delete the index files in `dir`. Other files in the directory are
    /// left alone. Missing files are not an error.
    pub fn discard(dir: &Path) -> Result<()> {
        for suffix in ["", "-wal", "-shm"] {
            let file = dir.join(format!("{}{}", INDEX_FILE, suffix));
            match std::fs::remove_file(&file) {
                Ok(()) => tracing::info!(path = %file.display(), "discarded index file"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(e).with_context(|| format!("Failed to remove {}", file.display()))
                }
            }
        }
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn meta(&self) -> Result<Option<IndexMeta>> {
        read_meta(&self.pool).await
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

async fn read_meta(pool: &SqlitePool) -> Result<Option<IndexMeta>> {
    let rows = sqlx::query("SELECT key, value FROM index_meta")
        .fetch_all(pool)
        .await?;
    let values: HashMap<String, String> = rows
        .iter()
        .map(|r| -> Result<(String, String), sqlx::Error> {
            Ok((r.try_get("key")?, r.try_get("value")?))
        })
        .collect::<Result<_, _>>()?;

    let schema_version = match values.get("schema_version") {
        Some(v) => v
            .parse::<i64>()
            .with_context(|| format!("Invalid schema_version in index: {}", v))?,
        None => return Ok(None),
    };
    let model = values
        .get("model")
        .cloned()
        .ok_or_else(|| anyhow::anyhow!("Index metadata is missing the embedding model"))?;
    let dims = values
        .get("dims")
        .ok_or_else(|| anyhow::anyhow!("Index metadata is missing the embedding dims"))?
        .parse::<usize>()
        .context("Invalid dims in index metadata")?;

    Ok(Some(IndexMeta {
        schema_version,
        model,
        dims,
    }))
}

async fn write_meta(pool: &SqlitePool, model: &str, dims: usize) -> Result<()> {
    let mut tx = pool.begin().await?;
    for (key, value) in [
        ("schema_version", SCHEMA_VERSION.to_string()),
        ("model", model.to_string()),
        ("dims", dims.to_string()),
    ] {
        sqlx::query(
            "INSERT INTO index_meta (key, value) VALUES (?, ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        )
        .bind(key)
        .bind(value)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;
    Ok(())
}

fn check_compatible(meta: &IndexMeta, model: &str, dims: usize) -> Result<()> {
    if meta.schema_version != SCHEMA_VERSION {
        bail!(
            "schema version {} does not match expected {}",
            meta.schema_version,
            SCHEMA_VERSION
        );
    }
    if meta.model != model {
        bail!(
            "built with embedding model '{}', configured model is '{}'",
            meta.model,
            model
        );
    }
    if meta.dims != dims {
        bail!(
            "built with {} dimensions, configured provider produces {}",
            meta.dims,
            dims
        );
    }
    Ok(())
}

fn row_to_chunk(row: &SqliteRow) -> Result<Chunk> {
    let kind: String = row.try_get("kind")?;
    let kind = ChunkKind::parse(&kind)
        .ok_or_else(|| anyhow::anyhow!("Unknown chunk kind in index: {}", kind))?;
    let as_usize = |v: Option<i64>| v.map(|n| n as usize);

    Ok(Chunk {
        id: row.try_get("id")?,
        source_id: row.try_get("source_id")?,
        ordinal: row.try_get("ordinal")?,
        kind,
        text: row.try_get("text")?,
        start_line: as_usize(row.try_get("start_line")?),
        end_line: as_usize(row.try_get("end_line")?),
        block_index: as_usize(row.try_get("block_index")?),
        language: row.try_get("language")?,
        header: row.try_get("header")?,
        last_modified: row.try_get("last_modified")?,
        fingerprint: row.try_get("fingerprint")?,
        hash: row.try_get("hash")?,
    })
}

const CHUNK_COLUMNS: &str = "c.id, c.source_id, c.ordinal, c.kind, c.text, \
     c.start_line, c.end_line, c.block_index, c.language, c.header, c.last_modified, \
     c.fingerprint, c.hash";

#[async_trait]
impl VectorStore for SqliteVectorStore {
    async fn source_versions(&self, source_id: &str) -> Result<Vec<StoredVersion>> {
        let rows = sqlx::query(
            "SELECT DISTINCT last_modified, fingerprint FROM chunks WHERE source_id = ?",
        )
        .bind(source_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|r| -> Result<StoredVersion> {
                Ok(StoredVersion {
                    last_modified: r.try_get("last_modified")?,
                    fingerprint: r.try_get("fingerprint")?,
                })
            })
            .collect()
    }

    async fn indexed_sources(&self) -> Result<Vec<String>> {
        let names: Vec<String> =
            sqlx::query_scalar("SELECT DISTINCT source_id FROM chunks ORDER BY source_id")
                .fetch_all(&self.pool)
                .await?;
        Ok(names)
    }

    async fn apply(&self, update: IndexUpdate) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        for source_id in &update.remove_sources {
            sqlx::query(
                "DELETE FROM chunk_vectors \
                 WHERE chunk_id IN (SELECT id FROM chunks WHERE source_id = ?)",
            )
            .bind(source_id)
            .execute(&mut *tx)
            .await?;

            sqlx::query("DELETE FROM chunks WHERE source_id = ?")
                .bind(source_id)
                .execute(&mut *tx)
                .await?;
        }

        for entry in &update.insert {
            let chunk = &entry.chunk;
            sqlx::query(
                r#"
                INSERT INTO chunks (id, source_id, ordinal, kind, text, start_line, end_line,
                                    block_index, language, header, last_modified, fingerprint, hash)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&chunk.id)
            .bind(&chunk.source_id)
            .bind(chunk.ordinal)
            .bind(chunk.kind.as_str())
            .bind(&chunk.text)
            .bind(chunk.start_line.map(|v| v as i64))
            .bind(chunk.end_line.map(|v| v as i64))
            .bind(chunk.block_index.map(|v| v as i64))
            .bind(&chunk.language)
            .bind(&chunk.header)
            .bind(chunk.last_modified)
            .bind(&chunk.fingerprint)
            .bind(&chunk.hash)
            .execute(&mut *tx)
            .await
            .with_context(|| {
                format!("Failed to insert chunk {} of {}", chunk.ordinal, chunk.source_id)
            })?;

            sqlx::query("INSERT INTO chunk_vectors (chunk_id, dims, embedding) VALUES (?, ?, ?)")
                .bind(&chunk.id)
                .bind(entry.vector.len() as i64)
                .bind(vec_to_blob(&entry.vector))
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn persist(&self) -> Result<()> {
        // fold the WAL into the main database file
        sqlx::query("PRAGMA wal_checkpoint(TRUNCATE)")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn similarity_search(&self, query_vec: &[f32], k: usize) -> Result<Vec<ScoredChunk>> {
        if k == 0 {
            return Ok(Vec::new());
        }

        let sql = format!(
            "SELECT {}, v.embedding FROM chunks c JOIN chunk_vectors v ON v.chunk_id = c.id",
            CHUNK_COLUMNS
        );
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;

        let mut hits = Vec::with_capacity(rows.len());
        for row in &rows {
            let blob: Vec<u8> = row.try_get("embedding")?;
            let score = cosine_similarity(query_vec, &blob_to_vec(&blob));
            hits.push(ScoredChunk {
                chunk: row_to_chunk(row)?,
                score,
            });
        }

        rank_hits(&mut hits, k);
        Ok(hits)
    }

    async fn chunk_count(&self) -> Result<usize> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as usize)
    }

    async fn chunks_for_source(&self, source_id: &str) -> Result<Vec<Chunk>> {
        let sql = format!(
            "SELECT {} FROM chunks c WHERE c.source_id = ? ORDER BY c.ordinal",
            CHUNK_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(source_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_chunk).collect()
    }
}
