//! TOML configuration.
//!
//! Every collaborator is configured here and validated once at startup, so
//! a bad setting fails the command before any project state is touched.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use m3_core::models::EmbedField;
use m3_core::pipeline::PipelineConfig;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub storage: StorageConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub pipeline: PipelineSection,
    pub llm: LlmConfig,
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    /// Directory holding all projects and the active-project marker.
    pub root: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_window_words")]
    pub window_words: usize,
    #[serde(default = "default_overlap_words")]
    pub overlap_words: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            window_words: default_window_words(),
            overlap_words: default_overlap_words(),
        }
    }
}

fn default_window_words() -> usize {
    512
}
fn default_overlap_words() -> usize {
    100
}

#[derive(Debug, Deserialize, Clone)]
pub struct PipelineSection {
    #[serde(default = "default_min_theme_words")]
    pub min_theme_words: usize,
    #[serde(default = "default_embed_fields")]
    pub embed_fields: Vec<EmbedField>,
    #[serde(default)]
    pub embed_summary: bool,
    #[serde(default)]
    pub affective_analysis: bool,
    #[serde(default = "default_synthesis_char_limit")]
    pub synthesis_char_limit: usize,
    #[serde(default = "default_doc_types")]
    pub doc_types: Vec<String>,
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            min_theme_words: default_min_theme_words(),
            embed_fields: default_embed_fields(),
            embed_summary: false,
            affective_analysis: false,
            synthesis_char_limit: default_synthesis_char_limit(),
            doc_types: default_doc_types(),
        }
    }
}

fn default_min_theme_words() -> usize {
    25
}
fn default_embed_fields() -> Vec<EmbedField> {
    vec![EmbedField::Themes]
}
fn default_synthesis_char_limit() -> usize {
    24_000
}
fn default_doc_types() -> Vec<String> {
    vec![
        "document".to_string(),
        "interview".to_string(),
        "fieldnotes".to_string(),
    ]
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    /// `ollama` or `openai`.
    #[serde(default = "default_llm_provider")]
    pub provider: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    pub roles: RoleModels,
}

/// Model used for each pipeline stage. All four are required.
#[derive(Debug, Deserialize, Clone)]
pub struct RoleModels {
    pub stratify: String,
    pub structure: String,
    pub enrich: String,
    pub synthesize: String,
}

fn default_llm_provider() -> String {
    "ollama".to_string()
}
fn default_llm_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// `openai`, `ollama` or `local`.
    pub provider: String,
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
        }
    }
}

fn default_top_k() -> usize {
    5
}

impl Config {
    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            window_words: self.chunking.window_words,
            overlap_words: self.chunking.overlap_words,
            min_theme_words: self.pipeline.min_theme_words,
            embed_fields: self.pipeline.embed_fields.clone(),
            embed_summary: self.pipeline.embed_summary,
            affective_analysis: self.pipeline.affective_analysis,
            synthesis_char_limit: self.pipeline.synthesis_char_limit,
        }
    }

    pub fn check_doc_type(&self, doc_type: &str) -> Result<()> {
        if !self.pipeline.doc_types.iter().any(|t| t == doc_type) {
            anyhow::bail!(
                "Unknown document type '{}'. Configured types: {}",
                doc_type,
                self.pipeline.doc_types.join(", ")
            );
        }
        Ok(())
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    // Validate chunking
    if config.chunking.window_words == 0 {
        anyhow::bail!("chunking.window_words must be > 0");
    }
    if config.chunking.overlap_words >= config.chunking.window_words {
        anyhow::bail!(
            "chunking.overlap_words ({}) must be smaller than chunking.window_words ({})",
            config.chunking.overlap_words,
            config.chunking.window_words
        );
    }

    // Validate pipeline
    if config.pipeline.doc_types.is_empty() {
        anyhow::bail!("pipeline.doc_types must list at least one document type");
    }
    if config.pipeline.synthesis_char_limit == 0 {
        anyhow::bail!("pipeline.synthesis_char_limit must be > 0");
    }

    // Validate retrieval
    if config.retrieval.top_k == 0 {
        anyhow::bail!("retrieval.top_k must be >= 1");
    }

    // Validate llm
    match config.llm.provider.as_str() {
        "ollama" | "openai" => {}
        other => anyhow::bail!(
            "Unknown llm provider: '{}'. Must be ollama or openai.",
            other
        ),
    }
    let roles = &config.llm.roles;
    for (role, model) in [
        ("stratify", &roles.stratify),
        ("structure", &roles.structure),
        ("enrich", &roles.enrich),
        ("synthesize", &roles.synthesize),
    ] {
        if model.trim().is_empty() {
            anyhow::bail!("llm.roles.{} must name a model", role);
        }
    }

    // Validate embedding
    match config.embedding.provider.as_str() {
        "openai" | "ollama" | "local" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be openai, ollama, or local.",
            other
        ),
    }
    if config
        .embedding
        .model
        .as_deref()
        .map_or(true, |m| m.trim().is_empty())
    {
        anyhow::bail!(
            "embedding.model must be specified when provider is '{}'",
            config.embedding.provider
        );
    }
    if config.embedding.provider == "openai" && config.embedding.dims.unwrap_or(0) == 0 {
        anyhow::bail!("embedding.dims must be > 0 when provider is 'openai'");
    }
    if config.embedding.batch_size == 0 {
        anyhow::bail!("embedding.batch_size must be > 0");
    }

    Ok(())
}
