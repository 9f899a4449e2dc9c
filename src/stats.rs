//! `status` and `list` output.

use anyhow::Result;

use m3_core::store::Store;

use crate::ingest::Corpus;
use crate::project::ProjectPaths;

pub async fn run_status<S: Store>(paths: &ProjectPaths, corpus: &Corpus<S>) -> Result<()> {
    let status = corpus.status().await?;
    let db_size = std::fs::metadata(paths.index_db())
        .map(|m| m.len())
        .unwrap_or(0);

    println!("status {}", paths.name);
    println!("  directory: {}", paths.dir.display());
    println!("  index size: {}", format_bytes(db_size));
    println!("  files: {}", status.files);
    println!("  chunks: {}", status.chunks);
    println!("  embedding model: {}", status.model);
    if status.consistency.is_consistent() {
        println!("  consistency: ok");
    } else {
        println!("  consistency: {}", status.consistency.describe());
    }
    Ok(())
}

pub async fn run_list<S: Store>(corpus: &Corpus<S>) -> Result<()> {
    let entries = corpus.list_with_counts().await?;
    if entries.is_empty() {
        println!("No files.");
        return Ok(());
    }
    for (entry, chunks) in entries {
        println!("{}", entry.original_filename);
        println!("    id: {}", entry.internal_id);
        println!("    version: {}", entry.version);
        println!("    doc type: {}", entry.doc_type);
        println!("    chunks: {}", chunks);
        println!(
            "    added: {}",
            entry.added_at.format("%Y-%m-%d %H:%M")
        );
    }
    Ok(())
}

fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;
    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
