//! Similarity index kept in step with the manifest.
//!
//! [`VectorIndex`] owns a [`Store`] backend and a shared embedding
//! provider. It assigns chunk ids, embeds `searchable_text`, and answers
//! similarity and exact-match queries. It never decides *which* chunks
//! should exist; the corpus driver tells it, based on manifest state.

use std::sync::Arc;

use anyhow::Result;
use uuid::Uuid;

use crate::embedding::{embed_query, EmbeddingProvider};
use crate::error::M3Error;
use crate::models::{Chunk, NewChunk};
use crate::store::{ChunkCandidate, Store};

pub struct VectorIndex<S: Store> {
    store: S,
    embedder: Arc<dyn EmbeddingProvider>,
    batch_size: usize,
}

impl<S: Store> VectorIndex<S> {
    pub fn new(store: S, embedder: Arc<dyn EmbeddingProvider>, batch_size: usize) -> Self {
        Self {
            store,
            embedder,
            batch_size: batch_size.max(1),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn model_name(&self) -> &str {
        self.embedder.model_name()
    }

    /// Embed and store chunks, assigning each a fresh id.
    ///
    /// Nothing is stored unless every chunk was embedded.
    pub async fn upsert(&self, chunks: Vec<NewChunk>) -> Result<Vec<Chunk>> {
        if chunks.is_empty() {
            return Ok(Vec::new());
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.searchable_text.clone()).collect();
        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            let embedded = self
                .embedder
                .embed(batch)
                .await
                .map_err(|e| M3Error::Embedding(e.to_string()))?;
            if embedded.len() != batch.len() {
                return Err(M3Error::Embedding(format!(
                    "provider returned {} vectors for {} texts",
                    embedded.len(),
                    batch.len()
                ))
                .into());
            }
            vectors.extend(embedded);
        }

        let stored: Vec<Chunk> = chunks
            .into_iter()
            .map(|c| Chunk {
                id: Uuid::new_v4().to_string(),
                searchable_text: c.searchable_text,
                metadata: c.metadata,
            })
            .collect();

        self.store
            .insert_chunks(&stored, &vectors, self.embedder.model_name())
            .await?;
        tracing::debug!(chunks = stored.len(), "upserted chunks");
        Ok(stored)
    }

    pub async fn delete_by_file(&self, file_id: &str) -> Result<u64> {
        self.store.delete_by_file(file_id).await
    }

    pub async fn reset(&self) -> Result<()> {
        self.store.reset().await
    }

    /// The `top_k` chunks most similar to `text`, best first.
    pub async fn query_similarity(&self, text: &str, top_k: usize) -> Result<Vec<ChunkCandidate>> {
        if top_k == 0 {
            return Ok(Vec::new());
        }
        let query_vec = embed_query(self.embedder.as_ref(), text)
            .await
            .map_err(|e| M3Error::Embedding(e.to_string()))?;
        self.store.vector_search(&query_vec, top_k).await
    }

    /// Case-sensitive substring search. An empty needle matches nothing.
    pub async fn query_exact(&self, needle: &str, include_summary: bool) -> Result<Vec<Chunk>> {
        if needle.is_empty() {
            return Ok(Vec::new());
        }
        self.store.exact_search(needle, include_summary).await
    }

    pub async fn chunk_count_for(&self, file_id: &str) -> Result<u64> {
        self.store.count_for_file(file_id).await
    }

    pub async fn total_chunks(&self) -> Result<u64> {
        self.store.count_all().await
    }

    pub async fn list_chunks(&self, file_id: Option<&str>) -> Result<Vec<Chunk>> {
        self.store.list_chunks(file_id).await
    }

    pub async fn file_ids(&self) -> Result<Vec<String>> {
        self.store.file_ids().await
    }

    /// Models other than the current one that still own vectors.
    pub async fn stale_models(&self) -> Result<Vec<(String, u64)>> {
        let current = self.embedder.model_name();
        Ok(self
            .store
            .embedding_models()
            .await?
            .into_iter()
            .filter(|(model, _)| model != current)
            .collect())
    }
}
