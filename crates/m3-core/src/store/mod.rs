//! Storage abstraction for the vector index.
//!
//! The [`Store`] trait holds chunks together with their embedding vectors.
//! [`VectorIndex`](crate::index::VectorIndex) drives it; the SQLite
//! backend lives in the app crate and [`memory::InMemoryStore`] backs tests.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::Chunk;

/// A chunk returned from vector search together with its cosine score.
#[derive(Debug, Clone)]
pub struct ChunkCandidate {
    pub chunk: Chunk,
    pub raw_score: f64,
}

/// Abstract storage backend for the vector index.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`insert_chunks`](Store::insert_chunks) | Store chunks and their vectors in one step |
/// | [`delete_by_file`](Store::delete_by_file) | Drop every chunk tagged with a file id |
/// | [`reset`](Store::reset) | Drop everything |
/// | [`vector_search`](Store::vector_search) | Cosine similarity, best first |
/// | [`exact_search`](Store::exact_search) | Case-sensitive substring match |
#[async_trait]
pub trait Store: Send + Sync {
    /// Insert chunks with one vector each. All or nothing.
    async fn insert_chunks(&self, chunks: &[Chunk], vectors: &[Vec<f32>], model: &str)
        -> Result<()>;

    /// Delete every chunk whose `file_id` matches. Returns the number removed.
    async fn delete_by_file(&self, file_id: &str) -> Result<u64>;

    async fn reset(&self) -> Result<()>;

    /// The `limit` chunks most similar to `query_vec`, highest score first.
    async fn vector_search(&self, query_vec: &[f32], limit: usize) -> Result<Vec<ChunkCandidate>>;

    /// Chunks whose searchable text contains `needle`, or whose summary does
    /// when `include_summary` is set. Case-sensitive.
    async fn exact_search(&self, needle: &str, include_summary: bool) -> Result<Vec<Chunk>>;

    async fn count_for_file(&self, file_id: &str) -> Result<u64>;

    async fn count_all(&self) -> Result<u64>;

    /// Chunks ordered by file and chunk index, optionally for one file only.
    async fn list_chunks(&self, file_id: Option<&str>) -> Result<Vec<Chunk>>;

    /// Distinct file ids present in the store.
    async fn file_ids(&self) -> Result<Vec<String>>;

    /// Embedding model names with the number of vectors made by each.
    async fn embedding_models(&self) -> Result<Vec<(String, u64)>>;
}

/// Sort candidates by descending score and keep the first `limit`.
pub fn rank_candidates(mut candidates: Vec<ChunkCandidate>, limit: usize) -> Vec<ChunkCandidate> {
    candidates.sort_by(|a, b| {
        b.raw_score
            .partial_cmp(&a.raw_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    candidates.truncate(limit);
    candidates
}

/// Whether a chunk matches an exact query.
pub fn matches_exact(chunk: &Chunk, needle: &str, include_summary: bool) -> bool {
    if chunk.searchable_text.contains(needle) {
        return true;
    }
    include_summary
        && chunk
            .metadata
            .holistic_summary
            .as_deref()
            .is_some_and(|s| s.contains(needle))
}
