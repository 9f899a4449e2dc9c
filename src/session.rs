//! Per-process wiring.
//!
//! A [`Session`] owns the loaded config and hands the same embedding
//! provider and chat gateway to every project it opens. Both are built on
//! first use, so commands that never embed or chat (`list`, `status`,
//! `remove`, `exact`) need neither a model download nor an API key.
//! Commands that do need them call [`Session::require_embedder`] or
//! [`Session::require_llm`] up front so a bad provider setup still fails
//! the whole command instead of each file.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::OnceCell;

use m3_core::embedding::EmbeddingProvider;
use m3_core::index::VectorIndex;
use m3_core::llm::{ChatModel, StageRole};
use m3_core::pipeline::EnrichmentPipeline;

use crate::config::{Config, EmbeddingConfig, LlmConfig};
use crate::content_store::ContentStore;
use crate::db;
use crate::embedding::create_provider;
use crate::extract::{Decoder, FileDecoder};
use crate::ingest::Corpus;
use crate::llm::ChatGateway;
use crate::migrate;
use crate::project::{ProjectPaths, ProjectRegistry};
use crate::sqlite_store::SqliteStore;

/// Embedding provider that is only constructed when first needed.
///
/// The model name comes straight from the config so the index can label
/// and check vectors without building the provider.
pub struct DeferredEmbedder {
    config: EmbeddingConfig,
    model_name: String,
    provider: OnceCell<Box<dyn EmbeddingProvider>>,
}

impl DeferredEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Self {
        Self {
            model_name: config.model.clone().unwrap_or_default(),
            config: config.clone(),
            provider: OnceCell::new(),
        }
    }

    /// Build the provider now if it has not been built yet.
    pub async fn get(&self) -> Result<&dyn EmbeddingProvider> {
        let provider = self
            .provider
            .get_or_try_init(|| async { create_provider(&self.config) })
            .await?;
        Ok(provider.as_ref())
    }

    pub fn is_built(&self) -> bool {
        self.provider.initialized()
    }
}

#[async_trait]
impl EmbeddingProvider for DeferredEmbedder {
    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn dims(&self) -> usize {
        match self.provider.get() {
            Some(provider) => provider.dims(),
            None => self.config.dims.unwrap_or(0),
        }
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.get().await?.embed(texts).await
    }
}

/// Chat gateway that is only constructed when first needed.
pub struct DeferredChat {
    config: LlmConfig,
    gateway: OnceCell<ChatGateway>,
}

impl DeferredChat {
    pub fn new(config: &LlmConfig) -> Self {
        Self {
            config: config.clone(),
            gateway: OnceCell::new(),
        }
    }

    pub async fn get(&self) -> Result<&ChatGateway> {
        self.gateway
            .get_or_try_init(|| async { ChatGateway::new(&self.config) })
            .await
    }

    pub fn is_built(&self) -> bool {
        self.gateway.initialized()
    }
}

#[async_trait]
impl ChatModel for DeferredChat {
    async fn chat(&self, role: StageRole, system_prompt: &str, user_prompt: &str) -> Result<String> {
        self.get().await?.chat(role, system_prompt, user_prompt).await
    }
}

enum Embedder {
    Deferred(Arc<DeferredEmbedder>),
    Given(Arc<dyn EmbeddingProvider>),
}

enum Chat {
    Deferred(Arc<DeferredChat>),
    Given(Arc<dyn ChatModel>),
}

pub struct Session {
    config: Config,
    registry: ProjectRegistry,
    embedder: Embedder,
    llm: Chat,
    decoder: Arc<dyn Decoder>,
}

impl Session {
    /// Build a session whose providers come from `config` on first use.
    pub fn new(config: Config) -> Self {
        Self {
            registry: ProjectRegistry::new(&config.storage.root),
            embedder: Embedder::Deferred(Arc::new(DeferredEmbedder::new(&config.embedding))),
            llm: Chat::Deferred(Arc::new(DeferredChat::new(&config.llm))),
            config,
            decoder: Arc::new(FileDecoder),
        }
    }

    /// Build a session around explicit collaborators.
    pub fn with_collaborators(
        config: Config,
        embedder: Arc<dyn EmbeddingProvider>,
        llm: Arc<dyn ChatModel>,
    ) -> Self {
        Self {
            registry: ProjectRegistry::new(&config.storage.root),
            config,
            embedder: Embedder::Given(embedder),
            llm: Chat::Given(llm),
            decoder: Arc::new(FileDecoder),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &ProjectRegistry {
        &self.registry
    }

    /// Make sure the embedding provider can be built.
    pub async fn require_embedder(&self) -> Result<()> {
        if let Embedder::Deferred(deferred) = &self.embedder {
            deferred.get().await?;
        }
        Ok(())
    }

    /// Make sure the chat gateway can be built.
    pub async fn require_llm(&self) -> Result<()> {
        if let Chat::Deferred(deferred) = &self.llm {
            deferred.get().await?;
        }
        Ok(())
    }

    /// Whether either provider has been constructed so far.
    pub fn providers_built(&self) -> bool {
        let embedder = matches!(&self.embedder, Embedder::Deferred(d) if d.is_built());
        let llm = matches!(&self.llm, Chat::Deferred(d) if d.is_built());
        embedder || llm
    }

    pub fn embedder(&self) -> Arc<dyn EmbeddingProvider> {
        match &self.embedder {
            Embedder::Deferred(deferred) => Arc::clone(deferred) as Arc<dyn EmbeddingProvider>,
            Embedder::Given(given) => Arc::clone(given),
        }
    }

    pub fn llm(&self) -> Arc<dyn ChatModel> {
        match &self.llm {
            Chat::Deferred(deferred) => Arc::clone(deferred) as Arc<dyn ChatModel>,
            Chat::Given(given) => Arc::clone(given),
        }
    }

    /// Open a project (the active one when `project` is `None`).
    pub async fn open(&self, project: Option<&str>) -> Result<(ProjectPaths, Corpus<SqliteStore>)> {
        let paths = self.registry.resolve(project)?;
        let store = open_store(&paths).await?;
        let content = ContentStore::open(&paths.dir)?;
        let index = VectorIndex::new(store, self.embedder(), self.config.embedding.batch_size);
        let pipeline = EnrichmentPipeline::new(self.llm(), self.config.pipeline_config());
        let corpus = Corpus::new(content, index, pipeline, Arc::clone(&self.decoder));
        tracing::debug!(project = %paths.name, "opened project");
        Ok((paths, corpus))
    }
}

/// Connect to a project's index and make sure the schema exists.
pub async fn open_store(paths: &ProjectPaths) -> Result<SqliteStore> {
    let pool = db::connect(&paths.index_db()).await?;
    migrate::run_migrations(&pool).await?;
    Ok(SqliteStore::new(pool))
}
