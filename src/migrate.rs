use anyhow::Result;
use sqlx::SqlitePool;

/// Create the index schema. Idempotent; run every time a project opens.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    // One row per chunk; metadata is stored whole as JSON, with the two
    // searchable columns broken out for exact matching.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunks (
            id TEXT PRIMARY KEY,
            file_id TEXT NOT NULL,
            chunk_index INTEGER NOT NULL,
            searchable_text TEXT NOT NULL,
            holistic_summary TEXT,
            metadata_json TEXT NOT NULL,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunk_vectors (
            chunk_id TEXT PRIMARY KEY,
            file_id TEXT NOT NULL,
            embedding BLOB NOT NULL,
            model TEXT NOT NULL,
            dims INTEGER NOT NULL,
            FOREIGN KEY (chunk_id) REFERENCES chunks(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_file_id ON chunks(file_id, chunk_index)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunk_vectors_file_id ON chunk_vectors(file_id)")
        .execute(pool)
        .await?;

    Ok(())
}
