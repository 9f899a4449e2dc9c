//! Retrieval over the vector index: top-K, threshold and exact.
//!
//! All three modes funnel through [`format_results`], which turns index
//! hits into [`SearchResultItem`]s: internal keys are hidden, the summary
//! is hidden unless asked for, and duplicate chunk ids are dropped.
//!
//! # Threshold semantics
//!
//! `threshold` asks the index for *every* chunk (`k = total_chunks`) and
//! keeps those scoring strictly above the minimum, so its results are
//! always a subset of a full top-K ranking.

use std::collections::HashSet;

use anyhow::Result;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::index::VectorIndex;
use crate::models::Chunk;
use crate::store::Store;

/// Metadata keys never shown to callers.
const HIDDEN_KEYS: [&str; 3] = ["file_id", "hash", "original_text"];
const SUMMARY_KEY: &str = "holistic_summary";

/// One retrieval hit.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResultItem {
    pub chunk_id: String,
    /// Cosine similarity; `None` for exact matches.
    pub score: Option<f64>,
    pub original_filename: String,
    /// The chunk's original text.
    pub text: String,
    /// Visible metadata (enrichment fields, version, doc type, ...).
    pub metadata: Map<String, Value>,
}

impl SearchResultItem {
    /// Score as displayed: four decimals, or `n/a` for exact matches.
    pub fn score_label(&self) -> String {
        match self.score {
            Some(s) => format!("{:.4}", s),
            None => "n/a".to_string(),
        }
    }
}

/// Format index hits for display.
pub fn format_results<I>(hits: I, include_summary: bool) -> Vec<SearchResultItem>
where
    I: IntoIterator<Item = (Chunk, Option<f64>)>,
{
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for (chunk, score) in hits {
        if !seen.insert(chunk.id.clone()) {
            continue;
        }
        let mut metadata = match serde_json::to_value(&chunk.metadata) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        };
        for key in HIDDEN_KEYS {
            metadata.remove(key);
        }
        if !include_summary {
            metadata.remove(SUMMARY_KEY);
        }
        out.push(SearchResultItem {
            chunk_id: chunk.id,
            score,
            original_filename: chunk.metadata.original_filename,
            text: chunk.metadata.original_text,
            metadata,
        });
    }
    out
}

/// Query front-end over a [`VectorIndex`].
pub struct RetrievalEngine<'a, S: Store> {
    index: &'a VectorIndex<S>,
}

impl<'a, S: Store> RetrievalEngine<'a, S> {
    pub fn new(index: &'a VectorIndex<S>) -> Self {
        Self { index }
    }

    pub async fn top_k(
        &self,
        query: &str,
        k: usize,
        include_summary: bool,
    ) -> Result<Vec<SearchResultItem>> {
        let hits = self.index.query_similarity(query, k).await?;
        Ok(format_results(
            hits.into_iter().map(|c| (c.chunk, Some(c.raw_score))),
            include_summary,
        ))
    }

    /// Every chunk scoring strictly above `min_score`, best first.
    pub async fn threshold(
        &self,
        query: &str,
        min_score: f64,
        include_summary: bool,
    ) -> Result<Vec<SearchResultItem>> {
        let total = self.index.total_chunks().await? as usize;
        let hits = self.index.query_similarity(query, total).await?;
        Ok(format_results(
            hits.into_iter()
                .filter(|c| c.raw_score > min_score)
                .map(|c| (c.chunk, Some(c.raw_score))),
            include_summary,
        ))
    }

    pub async fn exact(&self, query: &str, include_summary: bool) -> Result<Vec<SearchResultItem>> {
        let hits = self.index.query_exact(query, include_summary).await?;
        Ok(format_results(
            hits.into_iter().map(|c| (c, None)),
            include_summary,
        ))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::sync::Arc;

    use super::*;
    use crate::index::test_support::LetterEmbedder;
    use crate::models::{ChunkMetadata, NewChunk};
    use crate::store::memory::InMemoryStore;

    fn new_chunk(name: &str, text: &str, summary: &str) -> NewChunk {
        NewChunk {
            searchable_text: text.to_string(),
            metadata: ChunkMetadata {
                file_id: format!("id-{}", name),
                original_filename: name.to_string(),
                original_text: text.to_string(),
                hash: "h".to_string(),
                themes: Some("t".to_string()),
                holistic_summary: Some(summary.to_string()),
                ..Default::default()
            },
        }
    }

    async fn seeded() -> VectorIndex<InMemoryStore> {
        let index = VectorIndex::new(InMemoryStore::new(), Arc::new(LetterEmbedder), 16);
        index
            .upsert(vec![
                new_chunk("a.txt", "aaaa", "about foo"),
                new_chunk("b.txt", "aabb", "nothing"),
                new_chunk("c.txt", "cccc", "foo too"),
                new_chunk("d.txt", "foo and more", "x"),
            ])
            .await
            .unwrap();
        index
    }

    #[tokio::test]
    async fn threshold_matches_full_ranking_above_the_cutoff() {
        let index = seeded().await;
        let engine = RetrievalEngine::new(&index);

        let all = engine.top_k("a", 4, false).await.unwrap();
        assert_eq!(all.len(), 4);

        let exact_one = all[0].score.unwrap();
        let second = all[1].score.unwrap();
        for min in [-1.0, 0.0, second, exact_one] {
            let expected: BTreeSet<&str> = all
                .iter()
                .filter(|r| r.score.unwrap() > min)
                .map(|r| r.chunk_id.as_str())
                .collect();
            let above = engine.threshold("a", min, false).await.unwrap();
            let got: BTreeSet<&str> = above.iter().map(|r| r.chunk_id.as_str()).collect();
            assert_eq!(got, expected, "cutoff {}", min);
            assert_eq!(got.len(), above.len());
        }

        // cccc is orthogonal to "a": score exactly 0, excluded by strict >
        let above = engine.threshold("a", 0.0, false).await.unwrap();
        assert!(!above.iter().any(|r| r.original_filename == "c.txt"));
        assert_eq!(above[0].original_filename, "a.txt");

        let at_second = engine.threshold("a", second, false).await.unwrap();
        assert!(!at_second.iter().any(|r| r.chunk_id == all[1].chunk_id));
        assert!(engine.threshold("a", exact_one, false).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn exact_ignores_summary_unless_requested() {
        let index = seeded().await;
        let engine = RetrievalEngine::new(&index);

        let plain = engine.exact("foo", false).await.unwrap();
        assert_eq!(plain.len(), 1);
        assert_eq!(plain[0].original_filename, "d.txt");
        assert_eq!(plain[0].score_label(), "n/a");

        let with_summary = engine.exact("foo", true).await.unwrap();
        let names: Vec<&str> = with_summary
            .iter()
            .map(|r| r.original_filename.as_str())
            .collect();
        assert_eq!(names.len(), 3);
        assert!(names.contains(&"a.txt") && names.contains(&"c.txt"));
    }

    #[tokio::test]
    async fn internal_keys_are_hidden() {
        let index = seeded().await;
        let engine = RetrievalEngine::new(&index);

        let hits = engine.top_k("a", 1, false).await.unwrap();
        let meta = &hits[0].metadata;
        assert!(!meta.contains_key("file_id"));
        assert!(!meta.contains_key("hash"));
        assert!(!meta.contains_key("holistic_summary"));
        assert!(meta.contains_key("themes"));
        assert_eq!(hits[0].text, "aaaa");

        let hits = engine.top_k("a", 1, true).await.unwrap();
        assert!(hits[0].metadata.contains_key("holistic_summary"));
    }

    #[test]
    fn duplicate_ids_are_dropped() {
        let chunk = Chunk {
            id: "same".to_string(),
            searchable_text: "x".to_string(),
            metadata: ChunkMetadata::default(),
        };
        let out = format_results(vec![(chunk.clone(), None), (chunk, None)], false);
        assert_eq!(out.len(), 1);
    }
}
