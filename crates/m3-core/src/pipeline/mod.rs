//! Four-stage enrichment pipeline.
//!
//! Turns the decoded text of one file into finalized [`NewChunk`]s:
//!
//! ```text
//! SourceDocument
//!   └─ Stage 0 stratify   (interviews only)  → Stratified { units }
//!   └─ Stage 1 structure  (thematic labels)  → Structured { units }
//!   └─ Stage 2 enrich     (windows + fields) → Enriched { chunks }
//!   └─ Stage 3 synthesize (file summary)     → Synthesized { chunks, summary }
//!   └─ finalize                               → Vec<NewChunk>
//! ```
//!
//! Every stage is allowed to fail. A failure is recorded as a
//! [`StageWarning`], logged, and replaced by that stage's fallback:
//!
//! | Stage | Fallback |
//! |-------|----------|
//! | stratify | the whole document as one unit |
//! | structure | the unit is left untagged |
//! | enrich | naive word-window split of the raw document |
//! | synthesize | no summary |
//!
//! A document with any words in it therefore always yields at least one
//! chunk.

mod enrich;
mod finalize;
mod stratify;
mod structure;
mod synthesize;

use std::sync::Arc;

use serde::Serialize;

use crate::chunk::word_count;
use crate::error::M3Error;
use crate::llm::{ChatModel, StageRole};
use crate::models::{EmbedField, NewChunk, SourceDocument};

/// The document type that triggers Stage 0.
pub const INTERVIEW_DOC_TYPE: &str = "interview";

/// Pipeline tuning, decoupled from application config.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub window_words: usize,
    pub overlap_words: usize,
    /// Units shorter than this are not sent for thematic labelling.
    pub min_theme_words: usize,
    /// Enrichment fields appended to the embedded text, in order.
    pub embed_fields: Vec<EmbedField>,
    pub embed_summary: bool,
    /// Also ask Stage 2 for a primary emotion and sentiment score.
    pub affective_analysis: bool,
    /// Maximum characters of chunk text sent to Stage 3.
    pub synthesis_char_limit: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            window_words: 512,
            overlap_words: 100,
            min_theme_words: 25,
            embed_fields: vec![EmbedField::Themes],
            embed_summary: false,
            affective_analysis: false,
            synthesis_char_limit: 24_000,
        }
    }
}

/// A recovered stage failure.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageWarning {
    pub file: String,
    pub stage: StageRole,
    pub reason: String,
}

/// Result of running the pipeline over one document.
#[derive(Debug, Clone, Default)]
pub struct PipelineOutput {
    pub chunks: Vec<NewChunk>,
    pub warnings: Vec<StageWarning>,
}

/// A contiguous piece of a document before windowing.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct TextUnit {
    pub text: String,
    pub question: Option<String>,
    pub themes: Option<String>,
}

impl TextUnit {
    pub(crate) fn whole(text: &str) -> Self {
        Self {
            text: text.to_string(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Stratified {
    pub units: Vec<TextUnit>,
}

#[derive(Debug, Clone)]
pub(crate) struct Structured {
    pub units: Vec<TextUnit>,
}

/// A window of text plus whatever enrichment succeeded for it.
#[derive(Debug, Clone, Default)]
pub(crate) struct DraftChunk {
    pub text: String,
    pub question: Option<String>,
    pub themes: Option<String>,
    pub hypothetical_question: Option<String>,
    pub primary_emotion: Option<String>,
    pub sentiment_score: Option<f64>,
}

#[derive(Debug, Clone)]
pub(crate) struct Enriched {
    pub chunks: Vec<DraftChunk>,
}

#[derive(Debug, Clone)]
pub(crate) struct Synthesized {
    pub chunks: Vec<DraftChunk>,
    pub summary: Option<String>,
}

/// Collects warnings for one document and mirrors them to the log.
pub(crate) struct StageLog {
    file: String,
    warnings: Vec<StageWarning>,
}

impl StageLog {
    fn new(file: &str) -> Self {
        Self {
            file: file.to_string(),
            warnings: Vec::new(),
        }
    }

    pub(crate) fn warn(&mut self, stage: StageRole, reason: impl Into<String>) {
        let reason = reason.into();
        tracing::warn!(file = %self.file, stage = %stage, reason = %reason, "stage failed, using fallback");
        self.warnings.push(StageWarning {
            file: self.file.clone(),
            stage,
            reason,
        });
    }

    fn failure(&mut self, err: M3Error) {
        match err {
            M3Error::StageFailure { stage, reason } => self.warn(stage, reason),
            other => self.warn(StageRole::Enrich, other.to_string()),
        }
    }
}

pub(crate) fn stage_failure(stage: StageRole, reason: impl Into<String>) -> M3Error {
    M3Error::StageFailure {
        stage,
        reason: reason.into(),
    }
}

/// Runs the four stages for one document at a time.
pub struct EnrichmentPipeline {
    llm: Arc<dyn ChatModel>,
    config: PipelineConfig,
}

impl EnrichmentPipeline {
    pub fn new(llm: Arc<dyn ChatModel>, config: PipelineConfig) -> Self {
        Self { llm, config }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run every stage over `doc`. Never fails; see the module docs.
    pub async fn run(&self, doc: &SourceDocument) -> PipelineOutput {
        let mut log = StageLog::new(&doc.original_filename);

        if word_count(&doc.text) == 0 {
            log.warn(StageRole::Enrich, "document has no text; no chunks produced");
            return PipelineOutput {
                chunks: Vec::new(),
                warnings: log.warnings,
            };
        }

        let stratified = if doc.doc_type == INTERVIEW_DOC_TYPE {
            match stratify::run(self.llm.as_ref(), &doc.text).await {
                Ok(s) => s,
                Err(e) => {
                    log.failure(e);
                    Stratified {
                        units: vec![TextUnit::whole(&doc.text)],
                    }
                }
            }
        } else {
            Stratified {
                units: vec![TextUnit::whole(&doc.text)],
            }
        };

        let structured = structure::run(
            self.llm.as_ref(),
            stratified,
            self.config.min_theme_words,
            &mut log,
        )
        .await;

        let enriched = match enrich::run(self.llm.as_ref(), structured, &self.config, &mut log).await
        {
            Ok(e) => e,
            Err(e) => {
                log.failure(e);
                enrich::naive_split(&doc.text, &self.config)
            }
        };

        let synthesized = match synthesize::run(
            self.llm.as_ref(),
            &enriched,
            self.config.synthesis_char_limit,
        )
        .await
        {
            Ok(summary) => Synthesized {
                chunks: enriched.chunks,
                summary: Some(summary),
            },
            Err(e) => {
                log.failure(e);
                Synthesized {
                    chunks: enriched.chunks,
                    summary: None,
                }
            }
        };

        let chunks = finalize::run(doc, synthesized, &self.config);
        tracing::debug!(
            file = %doc.original_filename,
            chunks = chunks.len(),
            warnings = log.warnings.len(),
            "pipeline finished"
        );

        PipelineOutput {
            chunks,
            warnings: log.warnings,
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use anyhow::{bail, Result};
    use async_trait::async_trait;

    use crate::llm::{ChatModel, StageRole};

    /// Replies per role from a queue; an empty queue is an error.
    #[derive(Default)]
    pub struct ScriptedModel {
        replies: Mutex<Vec<(StageRole, VecDeque<String>)>>,
        pub calls: Mutex<Vec<StageRole>>,
    }

    impl ScriptedModel {
        pub fn reply(self, role: StageRole, text: &str) -> Self {
            {
                let mut replies = self.replies.lock().unwrap();
                match replies.iter_mut().find(|(r, _)| *r == role) {
                    Some((_, q)) => q.push_back(text.to_string()),
                    None => replies.push((role, VecDeque::from(vec![text.to_string()]))),
                }
            }
            self
        }

        pub fn calls_for(&self, role: StageRole) -> usize {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .filter(|r| **r == role)
                .count()
        }
    }

    #[async_trait]
    impl ChatModel for ScriptedModel {
        async fn chat(&self, role: StageRole, _system: &str, _user: &str) -> Result<String> {
            self.calls.lock().unwrap().push(role);
            let mut replies = self.replies.lock().unwrap();
            let queue = replies.iter_mut().find(|(r, _)| *r == role);
            match queue.and_then(|(_, q)| q.pop_front()) {
                Some(reply) => Ok(reply),
                None => bail!("no scripted reply for {}", role),
            }
        }
    }

    /// Echoes a fixed reply for every role.
    pub struct ConstantModel(pub &'static str);

    #[async_trait]
    impl ChatModel for ConstantModel {
        async fn chat(&self, _role: StageRole, _system: &str, _user: &str) -> Result<String> {
            Ok(self.0.to_string())
        }
    }

    pub struct FailingModel;

    #[async_trait]
    impl ChatModel for FailingModel {
        async fn chat(&self, role: StageRole, _system: &str, _user: &str) -> Result<String> {
            bail!("{} model unavailable", role)
        }
    }

    pub fn words(n: usize) -> String {
        (0..n)
            .map(|i| format!("word{}", i))
            .collect::<Vec<_>>()
            .join(" ")
    }
}
