use anyhow::Result;
use sqlx::SqlitePool;

/// Version of the table layout below. Bumped on any incompatible change.
pub const SCHEMA_VERSION: i64 = 1;

/// Create the index tables if they do not exist. Idempotent.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    // Key/value metadata: schema_version, model, dims
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS index_meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunks (
            id TEXT PRIMARY KEY,
            source_id TEXT NOT NULL,
            ordinal INTEGER NOT NULL,
            kind TEXT NOT NULL,
            text TEXT NOT NULL,
            start_line INTEGER,
            end_line INTEGER,
            block_index INTEGER,
            language TEXT,
            header TEXT,
            last_modified INTEGER,
            fingerprint TEXT NOT NULL,
            hash TEXT NOT NULL,
            UNIQUE(source_id, ordinal)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunk_vectors (
            chunk_id TEXT PRIMARY KEY,
            dims INTEGER NOT NULL,
            embedding BLOB NOT NULL,
            FOREIGN KEY (chunk_id) REFERENCES chunks(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create indexes
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_source_id ON chunks(source_id)")
        .execute(pool)
        .await?;

    Ok(())
}
