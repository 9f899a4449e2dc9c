//! Language-model seam used by the enrichment pipeline.
//!
//! The pipeline never talks HTTP. It asks a [`ChatModel`] for a completion
//! under a [`StageRole`]; the application maps each role to a concrete
//! model at startup.

use std::fmt;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The role a chat request is made under. One role per pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageRole {
    Stratify,
    Structure,
    Enrich,
    Synthesize,
}

impl StageRole {
    pub const ALL: [StageRole; 4] = [
        StageRole::Stratify,
        StageRole::Structure,
        StageRole::Enrich,
        StageRole::Synthesize,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StageRole::Stratify => "stratify",
            StageRole::Structure => "structure",
            StageRole::Enrich => "enrich",
            StageRole::Synthesize => "synthesize",
        }
    }
}

impl fmt::Display for StageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Chat completion keyed by role.
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn chat(&self, role: StageRole, system_prompt: &str, user_prompt: &str)
        -> Result<String>;
}

/// First well-formed JSON array anywhere in `text`.
///
/// Model output often wraps JSON in prose or code fences; every `[` is
/// tried as a starting point until one parses.
pub fn extract_json_array(text: &str) -> Option<Vec<Value>> {
    first_json_value(text, '[').and_then(|v| match v {
        Value::Array(items) => Some(items),
        _ => None,
    })
}

/// First well-formed JSON object anywhere in `text`.
pub fn extract_json_object(text: &str) -> Option<serde_json::Map<String, Value>> {
    first_json_value(text, '{').and_then(|v| match v {
        Value::Object(map) => Some(map),
        _ => None,
    })
}

fn first_json_value(text: &str, open: char) -> Option<Value> {
    for (i, c) in text.char_indices() {
        if c != open {
            continue;
        }
        let mut stream = serde_json::Deserializer::from_str(&text[i..]).into_iter::<Value>();
        if let Some(Ok(value)) = stream.next() {
            return Some(value);
        }
    }
    None
}

/// Strip code fences, surrounding quotes and whitespace from a free-text reply.
pub fn clean_reply(text: &str) -> String {
    let trimmed = text.trim();
    let unfenced = trimmed
        .strip_prefix("```")
        .map(|rest| {
            let rest = rest.split_once('\n').map(|(_, body)| body).unwrap_or(rest);
            rest.strip_suffix("```").unwrap_or(rest)
        })
        .unwrap_or(trimmed);
    unfenced.trim().trim_matches('"').trim().to_string()
}
