//! Chat gateway for the enrichment pipeline.
//!
//! [`ChatGateway`] implements [`ChatModel`] over either Ollama's
//! `/api/chat` or an OpenAI-compatible `/v1/chat/completions` endpoint.
//! The role → model table is fixed when the gateway is built.

use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;

use m3_core::llm::{ChatModel, StageRole};

use crate::config::{LlmConfig, RoleModels};
use crate::embedding::send_with_retry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Backend {
    Ollama,
    OpenAI,
}

pub struct ChatGateway {
    backend: Backend,
    endpoint: String,
    api_key: Option<String>,
    roles: RoleModels,
    max_retries: u32,
    client: reqwest::Client,
}

impl ChatGateway {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let (backend, default_url) = match config.provider.as_str() {
            "ollama" => (Backend::Ollama, "http://localhost:11434"),
            "openai" => (Backend::OpenAI, "https://api.openai.com"),
            other => bail!("Unknown llm provider: {}", other),
        };
        let base = config
            .url
            .as_deref()
            .unwrap_or(default_url)
            .trim_end_matches('/')
            .to_string();
        let endpoint = match backend {
            Backend::Ollama => format!("{}/api/chat", base),
            Backend::OpenAI => format!("{}/v1/chat/completions", base),
        };
        let api_key = match backend {
            Backend::OpenAI => Some(
                std::env::var("OPENAI_API_KEY")
                    .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?,
            ),
            Backend::Ollama => None,
        };
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            backend,
            endpoint,
            api_key,
            roles: config.roles.clone(),
            max_retries: config.max_retries,
            client,
        })
    }

    pub fn model_for(&self, role: StageRole) -> &str {
        match role {
            StageRole::Stratify => &self.roles.stratify,
            StageRole::Structure => &self.roles.structure,
            StageRole::Enrich => &self.roles.enrich,
            StageRole::Synthesize => &self.roles.synthesize,
        }
    }

    fn request_body(&self, role: StageRole, system: &str, user: &str) -> serde_json::Value {
        let messages = serde_json::json!([
            {"role": "system", "content": system},
            {"role": "user", "content": user},
        ]);
        match self.backend {
            Backend::Ollama => serde_json::json!({
                "model": self.model_for(role),
                "messages": messages,
                "stream": false,
            }),
            Backend::OpenAI => serde_json::json!({
                "model": self.model_for(role),
                "messages": messages,
            }),
        }
    }
}

fn parse_reply(backend: Backend, json: &serde_json::Value) -> Result<String> {
    let content = match backend {
        Backend::Ollama => json.pointer("/message/content"),
        Backend::OpenAI => json.pointer("/choices/0/message/content"),
    };
    content
        .and_then(|c| c.as_str())
        .map(str::to_string)
        .ok_or_else(|| anyhow::anyhow!("chat response has no message content"))
}

#[async_trait]
impl ChatModel for ChatGateway {
    async fn chat(&self, role: StageRole, system_prompt: &str, user_prompt: &str) -> Result<String> {
        let body = self.request_body(role, system_prompt, user_prompt);
        let label = match self.backend {
            Backend::Ollama => "Ollama",
            Backend::OpenAI => "OpenAI",
        };
        tracing::debug!(role = %role, model = self.model_for(role), "chat request");
        let json = send_with_retry(
            &self.client,
            &self.endpoint,
            self.api_key.as_deref(),
            &body,
            self.max_retries,
            label,
        )
        .await?;
        parse_reply(self.backend, &json)
    }
}
