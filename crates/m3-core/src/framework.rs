//! Corpus-wide thematic framework (axial coding).
//!
//! Stage 1 leaves a handful of labels on each chunk. This module collects
//! those labels across the whole index and asks the synthesize model to
//! cluster them into core themes and axial categories:
//!
//! ```json
//! { "Core Theme": { "Axial Category": ["code a", "code b"] } }
//! ```

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::M3Error;
use crate::llm::{extract_json_object, ChatModel, StageRole};
use crate::models::Chunk;

pub type ThemeTree = BTreeMap<String, BTreeMap<String, Vec<String>>>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThematicFramework {
    pub generated_at: DateTime<Utc>,
    /// Number of distinct codes the framework was built from.
    pub code_count: usize,
    pub themes: ThemeTree,
}

const SYSTEM_PROMPT: &str = "You are a senior qualitative researcher. You will be given the list \
of open codes generated from a corpus. Perform axial coding: cluster the codes into 5-7 \
high-level core themes and, under each core theme, group related codes into axial categories. \
Respond ONLY with a single JSON object of the form \
{\"Core Theme\": {\"Axial Category\": [\"code a\", \"code b\"]}}.";

/// Distinct theme labels found on `chunks`, sorted.
pub fn collect_codes(chunks: &[Chunk]) -> Vec<String> {
    let codes: BTreeSet<String> = chunks
        .iter()
        .filter_map(|c| c.metadata.themes.as_deref())
        .flat_map(|themes| themes.split(','))
        .map(|code| code.trim().to_string())
        .filter(|code| !code.is_empty())
        .collect();
    codes.into_iter().collect()
}

/// Parse a `{theme: {category: [codes]}}` reply. Non-string codes and
/// malformed branches are dropped; an empty tree is `None`.
pub fn parse_framework(reply: &str) -> Option<ThemeTree> {
    let obj = extract_json_object(reply)?;
    let mut tree = ThemeTree::new();
    for (theme, categories) in obj {
        let Value::Object(categories) = categories else {
            continue;
        };
        let mut branch = BTreeMap::new();
        for (category, codes) in categories {
            let codes: Vec<String> = match codes {
                Value::Array(items) => items
                    .iter()
                    .filter_map(|v| v.as_str())
                    .map(str::to_string)
                    .collect(),
                _ => continue,
            };
            branch.insert(category, codes);
        }
        if !branch.is_empty() {
            tree.insert(theme, branch);
        }
    }
    if tree.is_empty() {
        None
    } else {
        Some(tree)
    }
}

/// Ask the synthesize model to cluster `codes` into a framework.
pub async fn build_framework(
    llm: &dyn ChatModel,
    codes: &[String],
) -> Result<ThematicFramework, M3Error> {
    if codes.is_empty() {
        return Err(M3Error::NotFound(
            "no thematic labels in the index; add documents first".to_string(),
        ));
    }
    let listing = serde_json::to_string_pretty(codes)?;
    let user_prompt = format!("Here is the complete list of open codes to cluster:\n{}", listing);

    let reply = llm
        .chat(StageRole::Synthesize, SYSTEM_PROMPT, &user_prompt)
        .await
        .map_err(|e| M3Error::StageFailure {
            stage: StageRole::Synthesize,
            reason: e.to_string(),
        })?;

    let themes = parse_framework(&reply).ok_or_else(|| M3Error::StageFailure {
        stage: StageRole::Synthesize,
        reason: "response was not a theme hierarchy".to_string(),
    })?;

    Ok(ThematicFramework {
        generated_at: Utc::now(),
        code_count: codes.len(),
        themes,
    })
}
