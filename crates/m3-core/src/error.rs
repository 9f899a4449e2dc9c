//! Error taxonomy shared by the core and the application crate.

use thiserror::Error;

use crate::llm::StageRole;

#[derive(Error, Debug)]
pub enum M3Error {
    /// An identifier matched neither an original filename nor an internal id.
    #[error("not found: {0}")]
    NotFound(String),

    #[error("could not decode {file}: {reason}")]
    DecodeFailure { file: String, reason: String },

    /// Recovered inside the pipeline; only surfaces through warnings.
    #[error("stage {stage} failed: {reason}")]
    StageFailure { stage: StageRole, reason: String },

    #[error("index is inconsistent with the manifest: {0}")]
    IndexInconsistency(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("embedding failed: {0}")]
    Embedding(String),

    #[error("storage error: {0}")]
    Storage(#[from] std::io::Error),

    #[error("manifest error: {0}")]
    Manifest(#[from] serde_json::Error),
}
