//! Corpus driver.
//!
//! [`Corpus`] ties one project's [`ContentStore`] to its [`VectorIndex`]
//! and runs the enrichment pipeline whenever the manifest says a file's
//! content is new. It is the only place that mutates either side, so the
//! index always follows the manifest:
//!
//! - `add`: manifest first, then delete + re-enrich the file's chunks.
//! - `remove`: index first, then manifest.
//! - `rebuild`: reset the index, then replay every manifest entry.
//!
//! Files are processed one at a time. The interrupt flag is only checked
//! between files, so a file is never left half-indexed by Ctrl-C.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;
use serde::Serialize;

use m3_core::chunk::word_count;
use m3_core::error::M3Error;
use m3_core::models::{ManifestEntry, SourceDocument};
use m3_core::pipeline::EnrichmentPipeline;
use m3_core::search::RetrievalEngine;
use m3_core::index::VectorIndex;
use m3_core::store::Store;

use crate::content_store::{AddDisposition, ContentStore, Expansion, SourceError};
use crate::extract::Decoder;
use crate::progress::{NoProgress, ProgressEvent, ProgressReporter};

/// A recoverable per-file problem.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileWarning {
    pub file: String,
    /// `input`, `decode`, `embed` or a pipeline stage name.
    pub stage: String,
    pub reason: String,
}

impl std::fmt::Display for FileWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.file.is_empty() {
            write!(f, "[{}]: {}", self.stage, self.reason)
        } else {
            write!(f, "{} [{}]: {}", self.file, self.stage, self.reason)
        }
    }
}

#[derive(Debug, Default)]
pub struct AddReport {
    pub added: Vec<ManifestEntry>,
    pub updated: Vec<ManifestEntry>,
    pub unchanged: Vec<ManifestEntry>,
    /// Unchanged files that had no chunks and were enriched again. Files
    /// known to hold no text are not repaired.
    pub repaired: Vec<ManifestEntry>,
    pub chunks_written: u64,
    pub warnings: Vec<FileWarning>,
    pub interrupted: bool,
}

#[derive(Debug)]
pub struct RemoveReport {
    pub entry: ManifestEntry,
    pub chunks_deleted: u64,
}

#[derive(Debug, Default)]
pub struct RebuildReport {
    pub files: u64,
    pub chunks_written: u64,
    pub warnings: Vec<FileWarning>,
    pub interrupted: bool,
}

/// Disagreements between the manifest and the index.
#[derive(Debug, Default, PartialEq)]
pub struct ConsistencyReport {
    /// File ids with chunks but no manifest entry.
    pub orphan_file_ids: Vec<String>,
    /// Manifest entries with no chunks, other than files with no text.
    pub unindexed: Vec<ManifestEntry>,
    /// Embedding models other than the current one, with vector counts.
    pub stale_models: Vec<(String, u64)>,
}

impl ConsistencyReport {
    pub fn is_consistent(&self) -> bool {
        self.orphan_file_ids.is_empty() && self.unindexed.is_empty() && self.stale_models.is_empty()
    }

    pub fn describe(&self) -> String {
        let mut parts = Vec::new();
        if !self.orphan_file_ids.is_empty() {
            parts.push(format!(
                "{} orphaned file id(s) in the index",
                self.orphan_file_ids.len()
            ));
        }
        if !self.unindexed.is_empty() {
            let names: Vec<&str> = self
                .unindexed
                .iter()
                .map(|e| e.original_filename.as_str())
                .collect();
            parts.push(format!("files with no chunks: {}", names.join(", ")));
        }
        for (model, count) in &self.stale_models {
            parts.push(format!("{} vector(s) from model '{}'", count, model));
        }
        if parts.is_empty() {
            "consistent".to_string()
        } else {
            format!("{}; run `m3 rebuild`", parts.join("; "))
        }
    }
}

#[derive(Debug)]
pub struct CorpusStatus {
    pub files: usize,
    pub chunks: u64,
    pub model: String,
    pub consistency: ConsistencyReport,
}

pub struct Corpus<S: Store> {
    content: ContentStore,
    index: VectorIndex<S>,
    pipeline: EnrichmentPipeline,
    decoder: Arc<dyn Decoder>,
    progress: Box<dyn ProgressReporter>,
    interrupt: Arc<AtomicBool>,
}

impl<S: Store> Corpus<S> {
    pub fn new(
        content: ContentStore,
        index: VectorIndex<S>,
        pipeline: EnrichmentPipeline,
        decoder: Arc<dyn Decoder>,
    ) -> Self {
        Self {
            content,
            index,
            pipeline,
            decoder,
            progress: Box::new(NoProgress),
            interrupt: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_progress(mut self, progress: Box<dyn ProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    /// Share an interrupt flag (set by the Ctrl-C handler).
    pub fn with_interrupt(mut self, flag: Arc<AtomicBool>) -> Self {
        self.interrupt = flag;
        self
    }

    pub fn content(&self) -> &ContentStore {
        &self.content
    }

    pub fn index(&self) -> &VectorIndex<S> {
        &self.index
    }

    pub fn engine(&self) -> RetrievalEngine<'_, S> {
        RetrievalEngine::new(&self.index)
    }

    fn interrupted(&self) -> bool {
        self.interrupt.load(Ordering::SeqCst)
    }

    /// Add files, directories or glob patterns under `doc_type`.
    pub async fn add(&mut self, inputs: &[String], doc_type: &str) -> Result<AddReport> {
        self.add_expansion(ContentStore::expand(inputs), doc_type).await
    }

    /// Add already expanded inputs. A file that cannot be read by the time
    /// it is reached is skipped with an `input` warning.
    pub async fn add_expansion(
        &mut self,
        expansion: Expansion,
        doc_type: &str,
    ) -> Result<AddReport> {
        let mut report = AddReport::default();
        report.warnings.extend(expansion.warnings.into_iter().map(|w| FileWarning {
            file: String::new(),
            stage: "input".to_string(),
            reason: w,
        }));

        let total = expansion.files.len() as u64;
        for (i, path) in expansion.files.iter().enumerate() {
            if self.interrupted() {
                report.interrupted = true;
                break;
            }
            self.progress.report(ProgressEvent::Adding {
                file: path.display().to_string(),
                n: i as u64 + 1,
                total,
            });

            let disposition = match self.content.add_file(path, doc_type) {
                Ok(disposition) => disposition,
                Err(e) => match e.downcast::<SourceError>() {
                    Ok(source) => {
                        tracing::warn!(
                            file = %source.path,
                            reason = %source.reason,
                            "skipping unreadable file"
                        );
                        report.warnings.push(FileWarning {
                            file: source.path,
                            stage: "input".to_string(),
                            reason: source.reason,
                        });
                        continue;
                    }
                    Err(e) => return Err(e),
                },
            };

            match disposition {
                AddDisposition::Added(entry) => {
                    report.chunks_written += self.index_entry(&entry, &mut report.warnings).await?;
                    report.added.push(entry);
                }
                AddDisposition::Updated(entry) => {
                    report.chunks_written += self.index_entry(&entry, &mut report.warnings).await?;
                    report.updated.push(entry);
                }
                AddDisposition::Unchanged(entry) => {
                    if entry.doc_type != doc_type {
                        report.warnings.push(FileWarning {
                            file: entry.original_filename.clone(),
                            stage: "input".to_string(),
                            reason: format!(
                                "content unchanged; keeping document type '{}' (requested '{}')",
                                entry.doc_type, doc_type
                            ),
                        });
                    }
                    if self.needs_repair(&entry).await? {
                        tracing::info!(file = %entry.original_filename, "re-enriching unindexed file");
                        report.chunks_written +=
                            self.index_entry(&entry, &mut report.warnings).await?;
                        report.repaired.push(entry);
                    } else {
                        report.unchanged.push(entry);
                    }
                }
            }
        }

        self.progress.report(ProgressEvent::Done {
            files: (report.added.len() + report.updated.len() + report.repaired.len()) as u64,
            chunks: report.chunks_written,
        });
        Ok(report)
    }

    /// Remove a file by original filename or internal id.
    pub async fn remove(&mut self, identifier: &str) -> Result<RemoveReport> {
        let entry = self.content.resolve(identifier)?;
        let chunks_deleted = self.index.delete_by_file(&entry.internal_id).await?;
        let entry = self.content.remove(&entry.internal_id)?;
        tracing::info!(file = %entry.original_filename, chunks = chunks_deleted, "removed file");
        Ok(RemoveReport {
            entry,
            chunks_deleted,
        })
    }

    pub fn list(&self) -> Vec<ManifestEntry> {
        self.content.list()
    }

    /// Manifest entries with their current chunk counts.
    pub async fn list_with_counts(&self) -> Result<Vec<(ManifestEntry, u64)>> {
        let mut out = Vec::new();
        for entry in self.content.list() {
            let n = self.index.chunk_count_for(&entry.internal_id).await?;
            out.push((entry, n));
        }
        Ok(out)
    }

    /// Clear the index and re-enrich every manifest entry.
    pub async fn rebuild(&mut self) -> Result<RebuildReport> {
        self.progress.report(ProgressEvent::Resetting);
        self.index.reset().await?;

        let entries = self.content.list();
        let total = entries.len() as u64;
        let mut report = RebuildReport::default();
        for (i, entry) in entries.iter().enumerate() {
            if self.interrupted() {
                report.interrupted = true;
                break;
            }
            self.progress.report(ProgressEvent::Replaying {
                file: entry.original_filename.clone(),
                n: i as u64 + 1,
                total,
            });
            report.chunks_written += self.index_entry(entry, &mut report.warnings).await?;
            report.files += 1;
        }

        self.progress.report(ProgressEvent::Done {
            files: report.files,
            chunks: report.chunks_written,
        });
        Ok(report)
    }

    pub async fn check_consistency(&self) -> Result<ConsistencyReport> {
        let manifest_ids: BTreeSet<String> = self
            .content
            .list()
            .into_iter()
            .map(|e| e.internal_id)
            .collect();
        let index_ids: BTreeSet<String> = self.index.file_ids().await?.into_iter().collect();

        Ok(ConsistencyReport {
            orphan_file_ids: index_ids.difference(&manifest_ids).cloned().collect(),
            unindexed: self
                .content
                .list()
                .into_iter()
                .filter(|e| {
                    !index_ids.contains(&e.internal_id)
                        && !self.content.has_no_text(&e.internal_id)
                })
                .collect(),
            stale_models: self.index.stale_models().await?,
        })
    }

    /// Fail with `IndexInconsistency` unless the index matches the manifest.
    pub async fn verify(&self) -> Result<()> {
        let report = self.check_consistency().await?;
        if !report.is_consistent() {
            return Err(M3Error::IndexInconsistency(report.describe()).into());
        }
        Ok(())
    }

    pub async fn status(&self) -> Result<CorpusStatus> {
        Ok(CorpusStatus {
            files: self.content.manifest().len(),
            chunks: self.index.total_chunks().await?,
            model: self.index.model_name().to_string(),
            consistency: self.check_consistency().await?,
        })
    }

    /// An unchanged file needs enriching again when it holds no chunks
    /// and is not known to be empty.
    async fn needs_repair(&self, entry: &ManifestEntry) -> Result<bool> {
        if self.content.has_no_text(&entry.internal_id) {
            return Ok(false);
        }
        Ok(self.index.chunk_count_for(&entry.internal_id).await? == 0)
    }

    /// Replace the chunks of one entry with a fresh enrichment of its
    /// stored copy. Decode and embedding failures become warnings and
    /// leave the file with zero chunks; storage errors abort. A file that
    /// decodes to no text is flagged in the manifest so later adds and
    /// consistency checks leave it alone.
    async fn index_entry(
        &mut self,
        entry: &ManifestEntry,
        warnings: &mut Vec<FileWarning>,
    ) -> Result<u64> {
        self.index.delete_by_file(&entry.internal_id).await?;

        let path = self.content.stored_path(entry);
        let Some(text) = self.decoder.decode(&path) else {
            self.content.set_no_text(&entry.internal_id, false)?;
            let failure = M3Error::DecodeFailure {
                file: entry.original_filename.clone(),
                reason: "no text could be extracted".to_string(),
            };
            warnings.push(FileWarning {
                file: entry.original_filename.clone(),
                stage: "decode".to_string(),
                reason: failure.to_string(),
            });
            return Ok(0);
        };

        let no_text = word_count(&text) == 0;
        self.content.set_no_text(&entry.internal_id, no_text)?;
        if no_text {
            tracing::info!(file = %entry.original_filename, "file has no text");
            warnings.push(FileWarning {
                file: entry.original_filename.clone(),
                stage: "decode".to_string(),
                reason: "file has no text; nothing to index".to_string(),
            });
            return Ok(0);
        }

        let doc = SourceDocument::from_entry(entry, text);
        let output = self.pipeline.run(&doc).await;
        warnings.extend(output.warnings.into_iter().map(|w| FileWarning {
            file: w.file,
            stage: w.stage.to_string(),
            reason: w.reason,
        }));

        match self.index.upsert(output.chunks).await {
            Ok(stored) => {
                tracing::debug!(
                    file = %entry.original_filename,
                    version = entry.version,
                    chunks = stored.len(),
                    "indexed file"
                );
                Ok(stored.len() as u64)
            }
            Err(e) if matches!(e.downcast_ref::<M3Error>(), Some(M3Error::Embedding(_))) => {
                tracing::warn!(file = %entry.original_filename, reason = %e, "embedding failed");
                warnings.push(FileWarning {
                    file: entry.original_filename.clone(),
                    stage: "embed".to_string(),
                    reason: e.to_string(),
                });
                Ok(0)
            }
            Err(e) => Err(e),
        }
    }
}
