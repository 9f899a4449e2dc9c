//! Corpus-level tests: real content store and decoder on a temp dir, an
//! in-memory index, a scripted chat model and a bag-of-letters embedder.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;
use tempfile::TempDir;

use m3::content_store::ContentStore;
use m3::extract::FileDecoder;
use m3::ingest::Corpus;
use m3_core::embedding::EmbeddingProvider;
use m3_core::error::M3Error;
use m3_core::index::VectorIndex;
use m3_core::llm::{ChatModel, StageRole};
use m3_core::models::{ChunkMetadata, NewChunk};
use m3_core::pipeline::{EnrichmentPipeline, PipelineConfig};
use m3_core::store::memory::InMemoryStore;

const SUMMARY: &str = "Participants talk about foo and shift work. Most describe long hours.";

struct ScriptedModel;

#[async_trait]
impl ChatModel for ScriptedModel {
    async fn chat(&self, role: StageRole, _system: &str, _user: &str) -> Result<String> {
        Ok(match role {
            StageRole::Stratify => "[]".to_string(),
            StageRole::Structure => r#"["shift work", "care duties"]"#.to_string(),
            StageRole::Enrich => "What does a typical working week look like?".to_string(),
            StageRole::Synthesize => SUMMARY.to_string(),
        })
    }
}

struct OfflineModel;

#[async_trait]
impl ChatModel for OfflineModel {
    async fn chat(&self, _role: StageRole, _system: &str, _user: &str) -> Result<String> {
        bail!("connection refused")
    }
}

struct LetterEmbedder;

#[async_trait]
impl EmbeddingProvider for LetterEmbedder {
    fn model_name(&self) -> &str {
        "letters"
    }
    fn dims(&self) -> usize {
        26
    }
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|t| {
                let mut v = vec![0.0f32; 26];
                for c in t.chars().filter(|c| c.is_ascii_alphabetic()) {
                    v[(c.to_ascii_lowercase() as u8 - b'a') as usize] += 1.0;
                }
                v
            })
            .collect())
    }
}

struct DownEmbedder;

#[async_trait]
impl EmbeddingProvider for DownEmbedder {
    fn model_name(&self) -> &str {
        "letters"
    }
    fn dims(&self) -> usize {
        26
    }
    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        bail!("embedding service unavailable")
    }
}

fn corpus_with(
    project: &Path,
    llm: Arc<dyn ChatModel>,
    embedder: Arc<dyn EmbeddingProvider>,
) -> Corpus<InMemoryStore> {
    let content = ContentStore::open(project).unwrap();
    let index = VectorIndex::new(InMemoryStore::new(), embedder, 8);
    let pipeline = EnrichmentPipeline::new(llm, PipelineConfig::default());
    Corpus::new(content, index, pipeline, Arc::new(FileDecoder))
}

fn corpus(tmp: &TempDir) -> Corpus<InMemoryStore> {
    corpus_with(
        &tmp.path().join("project"),
        Arc::new(ScriptedModel),
        Arc::new(LetterEmbedder),
    )
}

fn words(n: usize) -> String {
    (0..n)
        .map(|i| format!("hours{}", i))
        .collect::<Vec<_>>()
        .join(" ")
}

fn write(tmp: &TempDir, name: &str, body: &str) -> PathBuf {
    let path = tmp.path().join("inbox").join(name);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(&path, body).unwrap();
    path
}

fn arg(path: &Path) -> Vec<String> {
    vec![path.display().to_string()]
}

#[tokio::test]
async fn six_hundred_word_note_becomes_two_enriched_chunks() {
    let tmp = TempDir::new().unwrap();
    let file = write(&tmp, "notes.txt", &words(600));
    let mut corpus = corpus(&tmp);

    let report = corpus.add(&arg(&file), "document").await.unwrap();
    assert_eq!(report.added.len(), 1);
    assert_eq!(report.chunks_written, 2);
    assert!(report.warnings.is_empty(), "{:?}", report.warnings);

    let chunks = corpus.index().list_chunks(None).await.unwrap();
    assert_eq!(chunks.len(), 2);
    for chunk in &chunks {
        assert_eq!(chunk.metadata.original_filename, "notes.txt");
        assert_eq!(chunk.metadata.version, 1);
        assert_eq!(chunk.metadata.question, None);
        assert_eq!(chunk.metadata.themes.as_deref(), Some("shift work, care duties"));
        assert_eq!(chunk.metadata.holistic_summary.as_deref(), Some(SUMMARY));
        assert!(chunk.searchable_text.contains("Themes: shift work, care duties"));
    }
}

#[tokio::test]
async fn re_adding_unchanged_file_is_a_no_op() {
    let tmp = TempDir::new().unwrap();
    let file = write(&tmp, "a.txt", &words(80));
    let mut corpus = corpus(&tmp);

    corpus.add(&arg(&file), "document").await.unwrap();
    let before = corpus.index().list_chunks(None).await.unwrap();

    let again = corpus.add(&arg(&file), "document").await.unwrap();
    assert_eq!(again.unchanged.len(), 1);
    assert!(again.added.is_empty() && again.updated.is_empty() && again.repaired.is_empty());
    assert_eq!(again.chunks_written, 0);

    let after = corpus.index().list_chunks(None).await.unwrap();
    assert_eq!(before, after);
}

#[tokio::test]
async fn changed_file_gets_new_version_and_fresh_chunks() {
    let tmp = TempDir::new().unwrap();
    let file = write(&tmp, "a.txt", &words(80));
    let mut corpus = corpus(&tmp);
    corpus.add(&arg(&file), "document").await.unwrap();
    let old_ids: Vec<String> = corpus
        .index()
        .list_chunks(None)
        .await
        .unwrap()
        .into_iter()
        .map(|c| c.id)
        .collect();

    fs::write(&file, words(90)).unwrap();
    let report = corpus.add(&arg(&file), "document").await.unwrap();
    assert_eq!(report.updated.len(), 1);
    assert_eq!(report.updated[0].version, 2);

    let chunks = corpus.index().list_chunks(None).await.unwrap();
    assert!(!chunks.is_empty());
    assert!(chunks.iter().all(|c| c.metadata.version == 2));
    assert!(chunks.iter().all(|c| !old_ids.contains(&c.id)));
}

#[tokio::test]
async fn remove_deletes_chunks_and_readd_restarts_at_version_one() {
    let tmp = TempDir::new().unwrap();
    let file = write(&tmp, "a.txt", &words(80));
    let mut corpus = corpus(&tmp);
    corpus.add(&arg(&file), "document").await.unwrap();
    fs::write(&file, words(85)).unwrap();
    corpus.add(&arg(&file), "document").await.unwrap();

    let removed = corpus.remove("a.txt").await.unwrap();
    assert!(removed.chunks_deleted > 0);
    assert_eq!(
        corpus
            .index()
            .chunk_count_for(&removed.entry.internal_id)
            .await
            .unwrap(),
        0
    );
    assert!(corpus.list().is_empty());

    let report = corpus.add(&arg(&file), "document").await.unwrap();
    assert_eq!(report.added[0].version, 1);
    corpus.verify().await.unwrap();
}

#[tokio::test]
async fn removing_unknown_file_is_not_found() {
    let tmp = TempDir::new().unwrap();
    let mut corpus = corpus(&tmp);
    let err = corpus.remove("missing.txt").await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<M3Error>(),
        Some(M3Error::NotFound(_))
    ));
}

#[tokio::test]
async fn rebuild_converges_to_the_same_index_shape() {
    let tmp = TempDir::new().unwrap();
    write(&tmp, "a.txt", &words(600));
    write(&tmp, "b.md", &words(120));
    let mut corpus = corpus(&tmp);
    corpus
        .add(&arg(&tmp.path().join("inbox")), "document")
        .await
        .unwrap();

    let mut before: Vec<(String, u32, String)> = corpus
        .index()
        .list_chunks(None)
        .await
        .unwrap()
        .into_iter()
        .map(|c| (c.metadata.file_id, c.metadata.chunk_index, c.metadata.hash))
        .collect();
    before.sort();

    let report = corpus.rebuild().await.unwrap();
    assert_eq!(report.files, 2);
    assert!(!report.interrupted);

    let mut after: Vec<(String, u32, String)> = corpus
        .index()
        .list_chunks(None)
        .await
        .unwrap()
        .into_iter()
        .map(|c| (c.metadata.file_id, c.metadata.chunk_index, c.metadata.hash))
        .collect();
    after.sort();
    assert_eq!(before, after);
    corpus.verify().await.unwrap();
}

#[tokio::test]
async fn offline_model_still_indexes_every_file() {
    let tmp = TempDir::new().unwrap();
    let file = write(&tmp, "notes.txt", &words(600));
    let mut corpus = corpus_with(
        &tmp.path().join("project"),
        Arc::new(OfflineModel),
        Arc::new(LetterEmbedder),
    );

    let report = corpus.add(&arg(&file), "document").await.unwrap();
    assert!(report.chunks_written >= 1);
    assert!(!report.warnings.is_empty());
    assert!(report.warnings.iter().all(|w| w.file == "notes.txt"));

    let chunks = corpus.index().list_chunks(None).await.unwrap();
    assert!(chunks.iter().all(|c| c.metadata.themes.is_none()));
    assert!(chunks.iter().all(|c| c.metadata.holistic_summary.is_none()));
}

#[tokio::test]
async fn embedding_failure_is_repaired_by_the_next_add() {
    let tmp = TempDir::new().unwrap();
    let project = tmp.path().join("project");
    let file = write(&tmp, "a.txt", &words(80));

    let mut broken = corpus_with(&project, Arc::new(ScriptedModel), Arc::new(DownEmbedder));
    let report = broken.add(&arg(&file), "document").await.unwrap();
    assert_eq!(report.added.len(), 1);
    assert_eq!(report.chunks_written, 0);
    assert!(report.warnings.iter().any(|w| w.stage == "embed"));

    let consistency = broken.check_consistency().await.unwrap();
    assert_eq!(consistency.unindexed.len(), 1);
    let err = broken.verify().await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<M3Error>(),
        Some(M3Error::IndexInconsistency(_))
    ));
    drop(broken);

    let mut working = corpus_with(&project, Arc::new(ScriptedModel), Arc::new(LetterEmbedder));
    let report = working.add(&arg(&file), "document").await.unwrap();
    assert_eq!(report.repaired.len(), 1);
    assert!(report.chunks_written > 0);
    working.verify().await.unwrap();
}

#[tokio::test]
async fn undecodable_file_stays_in_manifest_without_chunks() {
    let tmp = TempDir::new().unwrap();
    let file = write(&tmp, "broken.docx", "this is not a zip archive");
    let mut corpus = corpus(&tmp);

    let report = corpus.add(&arg(&file), "document").await.unwrap();
    assert_eq!(report.added.len(), 1);
    assert_eq!(report.chunks_written, 0);
    assert!(report.warnings.iter().any(|w| w.stage == "decode"));
    assert_eq!(corpus.list().len(), 1);
}

#[tokio::test]
async fn threshold_equals_full_ranking_filtered_by_score() {
    let tmp = TempDir::new().unwrap();
    write(&tmp, "a.txt", &words(600));
    write(&tmp, "b.txt", "zebra quartz jukebox vex");
    let mut corpus = corpus(&tmp);
    corpus
        .add(&arg(&tmp.path().join("inbox")), "document")
        .await
        .unwrap();

    let total = corpus.index().total_chunks().await.unwrap() as usize;
    let engine = corpus.engine();
    let all = engine.top_k("working hours", total, false).await.unwrap();
    assert_eq!(all.len(), total);

    let boundary = all[1].score.unwrap();
    for min in [-1.0, 0.5, boundary, all[total - 1].score.unwrap()] {
        let expected: BTreeSet<String> = all
            .iter()
            .filter(|h| h.score.unwrap() > min)
            .map(|h| h.chunk_id.clone())
            .collect();
        let above = engine.threshold("working hours", min, false).await.unwrap();
        let got: BTreeSet<String> = above.iter().map(|h| h.chunk_id.clone()).collect();
        assert_eq!(got.len(), above.len());
        assert_eq!(got, expected, "threshold {}", min);
        for hit in &above {
            assert!(!hit.metadata.contains_key("holistic_summary"));
            assert!(!hit.metadata.contains_key("file_id"));
        }
    }

    // a hit scoring exactly the threshold is left out
    let at_boundary = engine.threshold("working hours", boundary, false).await.unwrap();
    assert!(!at_boundary.iter().any(|h| h.chunk_id == all[1].chunk_id));
    let everything = engine.threshold("working hours", -1.0, false).await.unwrap();
    assert_eq!(everything.len(), total);
}

#[tokio::test]
async fn blank_file_is_not_repaired_or_reported_unindexed() {
    let tmp = TempDir::new().unwrap();
    let blank = write(&tmp, "empty.txt", "   \n\t  \n");
    let mut corpus = corpus(&tmp);

    let first = corpus.add(&arg(&blank), "document").await.unwrap();
    assert_eq!(first.added.len(), 1);
    assert_eq!(first.chunks_written, 0);
    assert!(first.warnings.iter().any(|w| w.stage == "decode"));
    corpus.verify().await.unwrap();

    for _ in 0..2 {
        let again = corpus.add(&arg(&blank), "document").await.unwrap();
        assert_eq!(again.unchanged.len(), 1);
        assert!(again.repaired.is_empty());
        assert!(again.warnings.is_empty(), "{:?}", again.warnings);
    }

    let status = corpus.status().await.unwrap();
    assert!(status.consistency.is_consistent(), "{}", status.consistency.describe());

    let rebuilt = corpus.rebuild().await.unwrap();
    assert_eq!(rebuilt.files, 1);
    corpus.verify().await.unwrap();

    // once it has text, it is indexed like any other file
    fs::write(&blank, words(40)).unwrap();
    let filled = corpus.add(&arg(&blank), "document").await.unwrap();
    assert_eq!(filled.updated.len(), 1);
    assert!(filled.chunks_written > 0);
    fs::write(&blank, "").unwrap();
    corpus.add(&arg(&blank), "document").await.unwrap();
    assert_eq!(corpus.index().total_chunks().await.unwrap(), 0);
    corpus.verify().await.unwrap();
}

#[cfg(unix)]
#[tokio::test]
async fn badly_named_file_does_not_abort_the_batch() {
    use std::ffi::OsStr;
    use std::os::unix::ffi::OsStrExt;

    let tmp = TempDir::new().unwrap();
    write(&tmp, "b.txt", &words(30));
    let inbox = tmp.path().join("inbox");
    fs::write(inbox.join(OsStr::from_bytes(b"a\xff.txt")), words(30)).unwrap();
    let mut corpus = corpus(&tmp);

    let report = corpus.add(&arg(&inbox), "document").await.unwrap();
    assert_eq!(report.added.len(), 2);
    assert_eq!(corpus.list().len(), 2);
    assert!(corpus.list().iter().any(|e| e.original_filename == "b.txt"));
    corpus.verify().await.unwrap();
}

#[tokio::test]
async fn file_vanishing_after_expansion_becomes_a_warning() {
    let tmp = TempDir::new().unwrap();
    let gone = write(&tmp, "a.txt", &words(30));
    let good = write(&tmp, "b.txt", &words(30));
    let mut corpus = corpus(&tmp);

    let expansion = ContentStore::expand(&arg(&tmp.path().join("inbox")));
    assert_eq!(expansion.files, vec![gone.clone(), good.clone()]);
    fs::remove_file(&gone).unwrap();

    let report = corpus.add_expansion(expansion, "document").await.unwrap();
    assert_eq!(report.added.len(), 1);
    assert_eq!(report.added[0].original_filename, "b.txt");
    let warning = &report.warnings[0];
    assert!(warning.file.ends_with("a.txt"));
    assert_eq!(warning.stage, "input");
    assert_eq!(corpus.list().len(), 1);
    corpus.verify().await.unwrap();
}

#[tokio::test]
async fn unchanged_file_with_new_doc_type_warns() {
    let tmp = TempDir::new().unwrap();
    let file = write(&tmp, "a.txt", &words(40));
    let mut corpus = corpus(&tmp);
    corpus.add(&arg(&file), "document").await.unwrap();

    let again = corpus.add(&arg(&file), "interview").await.unwrap();
    assert_eq!(again.unchanged.len(), 1);
    assert_eq!(again.unchanged[0].doc_type, "document");
    assert_eq!(again.warnings.len(), 1);
    assert_eq!(again.warnings[0].file, "a.txt");
    assert!(again.warnings[0].reason.contains("'document'"));
    assert!(again.warnings[0].reason.contains("'interview'"));

    let same = corpus.add(&arg(&file), "document").await.unwrap();
    assert!(same.warnings.is_empty());
}

#[tokio::test]
async fn exact_search_is_case_sensitive_and_summary_opt_in() {
    let tmp = TempDir::new().unwrap();
    write(&tmp, "a.txt", "The Night Shift started at ten.");
    let mut corpus = corpus(&tmp);
    corpus
        .add(&arg(&tmp.path().join("inbox")), "document")
        .await
        .unwrap();
    let engine = corpus.engine();

    assert_eq!(engine.exact("Night Shift", false).await.unwrap().len(), 1);
    assert!(engine.exact("night shift", false).await.unwrap().is_empty());

    assert!(engine.exact("foo", false).await.unwrap().is_empty());
    let with_summary = engine.exact("foo", true).await.unwrap();
    assert_eq!(with_summary.len(), 1);
    assert_eq!(with_summary[0].score_label(), "n/a");
    assert!(with_summary[0].metadata.contains_key("holistic_summary"));
}

#[tokio::test]
async fn interrupt_stops_before_the_next_file() {
    let tmp = TempDir::new().unwrap();
    write(&tmp, "a.txt", &words(50));
    write(&tmp, "b.txt", &words(50));
    let flag = Arc::new(AtomicBool::new(false));
    let mut corpus = corpus(&tmp).with_interrupt(Arc::clone(&flag));

    flag.store(true, Ordering::SeqCst);
    let report = corpus
        .add(&arg(&tmp.path().join("inbox")), "document")
        .await
        .unwrap();
    assert!(report.interrupted);
    assert!(report.added.is_empty());
    assert!(corpus.list().is_empty());
}

#[tokio::test]
async fn orphaned_chunks_fail_verification() {
    let tmp = TempDir::new().unwrap();
    let corpus = corpus(&tmp);
    corpus
        .index()
        .upsert(vec![NewChunk {
            searchable_text: "left behind".to_string(),
            metadata: ChunkMetadata {
                file_id: "no-such-file".to_string(),
                original_text: "left behind".to_string(),
                ..Default::default()
            },
        }])
        .await
        .unwrap();

    let report = corpus.check_consistency().await.unwrap();
    assert_eq!(report.orphan_file_ids, vec!["no-such-file".to_string()]);
    assert!(corpus.verify().await.is_err());
}
