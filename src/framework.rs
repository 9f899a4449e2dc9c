//! `framework build` / `framework show`.
//!
//! The framework is corpus-wide and stored once per project as
//! `framework.json`. It is only rebuilt on request.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

use m3_core::error::M3Error;
use m3_core::framework::{build_framework, collect_codes, ThematicFramework};
use m3_core::llm::ChatModel;
use m3_core::store::Store;

use crate::ingest::Corpus;

/// Collect codes from every chunk, cluster them and save the result.
pub async fn build_and_save<S: Store>(
    corpus: &Corpus<S>,
    llm: &dyn ChatModel,
    path: &Path,
) -> Result<ThematicFramework> {
    let chunks = corpus.index().list_chunks(None).await?;
    let codes = collect_codes(&chunks);
    tracing::info!(codes = codes.len(), "building thematic framework");
    let framework = build_framework(llm, &codes).await?;
    save(path, &framework)?;
    Ok(framework)
}

pub fn save(path: &Path, framework: &ThematicFramework) -> Result<()> {
    let tmp = path.with_extension("json.tmp");
    let json = serde_json::to_string_pretty(framework).map_err(M3Error::Manifest)?;
    fs::write(&tmp, json).map_err(M3Error::Storage)?;
    fs::rename(&tmp, path).map_err(M3Error::Storage)?;
    Ok(())
}

/// The saved framework, or `None` if none has been built yet.
pub fn load(path: &Path) -> Result<Option<ThematicFramework>> {
    if !path.exists() {
        return Ok(None);
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let framework = serde_json::from_str(&content)
        .with_context(|| format!("Corrupt framework file {}", path.display()))?;
    Ok(Some(framework))
}

pub fn print_framework(framework: &ThematicFramework) {
    println!(
        "framework ({} codes, generated {})",
        framework.code_count,
        framework.generated_at.format("%Y-%m-%d %H:%M")
    );
    for (theme, categories) in &framework.themes {
        println!("  {}", theme);
        for (category, codes) in categories {
            println!("    {}: {}", category, codes.join(", "));
        }
    }
}
