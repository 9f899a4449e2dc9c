//! SQLite-backed [`Store`] implementation.
//!
//! Chunks live in `chunks` (metadata as JSON) and their vectors in
//! `chunk_vectors` as little-endian f32 BLOBs. Similarity is computed in
//! process by brute-force cosine over every stored vector.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use m3_core::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use m3_core::models::{Chunk, ChunkMetadata};
use m3_core::store::{rank_candidates, ChunkCandidate, Store};

/// SQLite implementation of the [`Store`] trait.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn row_to_chunk(row: &SqliteRow) -> Result<Chunk> {
    let id: String = row.get("id");
    let metadata_json: String = row.get("metadata_json");
    let metadata: ChunkMetadata = serde_json::from_str(&metadata_json)
        .with_context(|| format!("corrupt metadata for chunk {}", id))?;
    Ok(Chunk {
        id,
        searchable_text: row.get("searchable_text"),
        metadata,
    })
}

#[async_trait]
impl Store for SqliteStore {
    async fn insert_chunks(
        &self,
        chunks: &[Chunk],
        vectors: &[Vec<f32>],
        model: &str,
    ) -> Result<()> {
        if chunks.len() != vectors.len() {
            bail!(
                "got {} vectors for {} chunks",
                vectors.len(),
                chunks.len()
            );
        }
        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;

        for (chunk, vector) in chunks.iter().zip(vectors.iter()) {
            let metadata_json = serde_json::to_string(&chunk.metadata)?;
            sqlx::query(
                r#"
                INSERT INTO chunks (id, file_id, chunk_index, searchable_text,
                                    holistic_summary, metadata_json, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(id) DO UPDATE SET
                    file_id = excluded.file_id,
                    chunk_index = excluded.chunk_index,
                    searchable_text = excluded.searchable_text,
                    holistic_summary = excluded.holistic_summary,
                    metadata_json = excluded.metadata_json
                "#,
            )
            .bind(&chunk.id)
            .bind(&chunk.metadata.file_id)
            .bind(chunk.metadata.chunk_index as i64)
            .bind(&chunk.searchable_text)
            .bind(&chunk.metadata.holistic_summary)
            .bind(&metadata_json)
            .bind(now)
            .execute(&mut *tx)
            .await?;

            let blob = vec_to_blob(vector);
            sqlx::query(
                r#"
                INSERT INTO chunk_vectors (chunk_id, file_id, embedding, model, dims)
                VALUES (?, ?, ?, ?, ?)
                ON CONFLICT(chunk_id) DO UPDATE SET
                    file_id = excluded.file_id,
                    embedding = excluded.embedding,
                    model = excluded.model,
                    dims = excluded.dims
                "#,
            )
            .bind(&chunk.id)
            .bind(&chunk.metadata.file_id)
            .bind(&blob)
            .bind(model)
            .bind(vector.len() as i64)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn delete_by_file(&self, file_id: &str) -> Result<u64> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM chunk_vectors WHERE file_id = ?")
            .bind(file_id)
            .execute(&mut *tx)
            .await?;

        let deleted = sqlx::query("DELETE FROM chunks WHERE file_id = ?")
            .bind(file_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        tx.commit().await?;
        Ok(deleted)
    }

    async fn reset(&self) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM chunk_vectors")
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM chunks").execute(&mut *tx).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn vector_search(&self, query_vec: &[f32], limit: usize) -> Result<Vec<ChunkCandidate>> {
        let rows = sqlx::query(
            r#"
            SELECT c.id, c.searchable_text, c.metadata_json, cv.embedding
            FROM chunk_vectors cv
            JOIN chunks c ON c.id = cv.chunk_id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut candidates = Vec::with_capacity(rows.len());
        for row in &rows {
            let blob: Vec<u8> = row.get("embedding");
            let similarity = cosine_similarity(query_vec, &blob_to_vec(&blob)) as f64;
            candidates.push(ChunkCandidate {
                chunk: row_to_chunk(row)?,
                raw_score: similarity,
            });
        }

        Ok(rank_candidates(candidates, limit))
    }

    async fn exact_search(&self, needle: &str, include_summary: bool) -> Result<Vec<Chunk>> {
        if needle.is_empty() {
            return Ok(Vec::new());
        }
        // instr() is case-sensitive, unlike LIKE.
        let sql = if include_summary {
            r#"
            SELECT id, searchable_text, metadata_json FROM chunks
            WHERE instr(searchable_text, ?1) > 0
               OR instr(COALESCE(holistic_summary, ''), ?1) > 0
            ORDER BY file_id, chunk_index
            "#
        } else {
            r#"
            SELECT id, searchable_text, metadata_json FROM chunks
            WHERE instr(searchable_text, ?1) > 0
            ORDER BY file_id, chunk_index
            "#
        };
        let rows = sqlx::query(sql).bind(needle).fetch_all(&self.pool).await?;
        rows.iter().map(row_to_chunk).collect()
    }

    async fn count_for_file(&self, file_id: &str) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks WHERE file_id = ?")
            .bind(file_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }

    async fn count_all(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }

    async fn list_chunks(&self, file_id: Option<&str>) -> Result<Vec<Chunk>> {
        let rows = match file_id {
            Some(id) => {
                sqlx::query(
                    "SELECT id, searchable_text, metadata_json FROM chunks WHERE file_id = ? ORDER BY chunk_index",
                )
                .bind(id)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    "SELECT id, searchable_text, metadata_json FROM chunks ORDER BY file_id, chunk_index",
                )
                .fetch_all(&self.pool)
                .await?
            }
        };
        rows.iter().map(row_to_chunk).collect()
    }

    async fn file_ids(&self) -> Result<Vec<String>> {
        let ids: Vec<String> =
            sqlx::query_scalar("SELECT DISTINCT file_id FROM chunks ORDER BY file_id")
                .fetch_all(&self.pool)
                .await?;
        Ok(ids)
    }

    async fn embedding_models(&self) -> Result<Vec<(String, u64)>> {
        let rows = sqlx::query(
            "SELECT model, COUNT(*) AS n FROM chunk_vectors GROUP BY model ORDER BY model",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .map(|r| {
                let n: i64 = r.get("n");
                (r.get::<String, _>("model"), n as u64)
            })
            .collect())
    }
}
