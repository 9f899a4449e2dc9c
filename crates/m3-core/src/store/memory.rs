//! In-memory [`Store`] implementation for tests and embedding in other tools.
//!
//! Chunks and vectors live in one `Vec` behind a `std::sync::RwLock`.
//! Vector search is brute-force cosine similarity over every stored vector.

use std::collections::BTreeMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;

use crate::embedding::cosine_similarity;
use crate::models::Chunk;

use super::{matches_exact, rank_candidates, ChunkCandidate, Store};

struct StoredChunk {
    chunk: Chunk,
    vector: Vec<f32>,
    model: String,
}

/// In-memory store.
pub struct InMemoryStore {
    rows: RwLock<Vec<StoredChunk>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            rows: RwLock::new(Vec::new()),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Vec<StoredChunk>>> {
        self.rows
            .read()
            .map_err(|_| anyhow!("in-memory store lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Vec<StoredChunk>>> {
        self.rows
            .write()
            .map_err(|_| anyhow!("in-memory store lock poisoned"))
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for InMemoryStore {
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
        let mut rows = self.write()?;
        for (chunk, vector) in chunks.iter().zip(vectors.iter()) {
            rows.retain(|r| r.chunk.id != chunk.id);
            rows.push(StoredChunk {
                chunk: chunk.clone(),
                vector: vector.clone(),
                model: model.to_string(),
            });
        }
        Ok(())
    }

    async fn delete_by_file(&self, file_id: &str) -> Result<u64> {
        let mut rows = self.write()?;
        let before = rows.len();
        rows.retain(|r| r.chunk.metadata.file_id != file_id);
        Ok((before - rows.len()) as u64)
    }

    async fn reset(&self) -> Result<()> {
        self.write()?.clear();
        Ok(())
    }

    async fn vector_search(&self, query_vec: &[f32], limit: usize) -> Result<Vec<ChunkCandidate>> {
        let rows = self.read()?;
        let candidates = rows
            .iter()
            .map(|r| ChunkCandidate {
                chunk: r.chunk.clone(),
                raw_score: cosine_similarity(query_vec, &r.vector) as f64,
            })
            .collect();
        Ok(rank_candidates(candidates, limit))
    }

    async fn exact_search(&self, needle: &str, include_summary: bool) -> Result<Vec<Chunk>> {
        if needle.is_empty() {
            return Ok(Vec::new());
        }
        let rows = self.read()?;
        Ok(rows
            .iter()
            .filter(|r| matches_exact(&r.chunk, needle, include_summary))
            .map(|r| r.chunk.clone())
            .collect())
    }

    async fn count_for_file(&self, file_id: &str) -> Result<u64> {
        let rows = self.read()?;
        Ok(rows
            .iter()
            .filter(|r| r.chunk.metadata.file_id == file_id)
            .count() as u64)
    }

    async fn count_all(&self) -> Result<u64> {
        Ok(self.read()?.len() as u64)
    }

    async fn list_chunks(&self, file_id: Option<&str>) -> Result<Vec<Chunk>> {
        let rows = self.read()?;
        let mut chunks: Vec<Chunk> = rows
            .iter()
            .filter(|r| file_id.map_or(true, |id| r.chunk.metadata.file_id == id))
            .map(|r| r.chunk.clone())
            .collect();
        chunks.sort_by(|a, b| {
            a.metadata
                .file_id
                .cmp(&b.metadata.file_id)
                .then(a.metadata.chunk_index.cmp(&b.metadata.chunk_index))
        });
        Ok(chunks)
    }

    async fn file_ids(&self) -> Result<Vec<String>> {
        let rows = self.read()?;
        let mut ids: Vec<String> = rows.iter().map(|r| r.chunk.metadata.file_id.clone()).collect();
        ids.sort();
        ids.dedup();
        Ok(ids)
    }

    async fn embedding_models(&self) -> Result<Vec<(String, u64)>> {
        let rows = self.read()?;
        let mut counts: BTreeMap<String, u64> = BTreeMap::new();
        for r in rows.iter() {
            *counts.entry(r.model.clone()).or_default() += 1;
        }
        Ok(counts.into_iter().collect())
    }
}
