//! `topk`, `search` and `exact` commands.
//!
//! Results print as a numbered list in the same layout for all three
//! modes; exact matches show a score of `n/a`.

use anyhow::Result;
use serde_json::Value;

use m3_core::search::SearchResultItem;
use m3_core::store::Store;

use crate::ingest::Corpus;

const EXCERPT_CHARS: usize = 240;

pub async fn run_topk<S: Store>(
    corpus: &Corpus<S>,
    query: &str,
    k: usize,
    include_summary: bool,
) -> Result<()> {
    let results = corpus.engine().top_k(query, k, include_summary).await?;
    print_results(&results);
    Ok(())
}

pub async fn run_threshold<S: Store>(
    corpus: &Corpus<S>,
    query: &str,
    min_score: f64,
    include_summary: bool,
) -> Result<()> {
    let results = corpus
        .engine()
        .threshold(query, min_score, include_summary)
        .await?;
    print_results(&results);
    Ok(())
}

pub async fn run_exact<S: Store>(
    corpus: &Corpus<S>,
    query: &str,
    include_summary: bool,
) -> Result<()> {
    let results = corpus.engine().exact(query, include_summary).await?;
    print_results(&results);
    Ok(())
}

fn print_results(results: &[SearchResultItem]) {
    if results.is_empty() {
        println!("No results.");
        return;
    }
    for (i, result) in results.iter().enumerate() {
        println!(
            "{}. [{}] {}",
            i + 1,
            result.score_label(),
            result.original_filename
        );
        for (key, value) in &result.metadata {
            if let Some(shown) = display_value(value) {
                println!("    {}: {}", key, shown);
            }
        }
        println!("    excerpt: \"{}\"", excerpt(&result.text));
        println!("    id: {}", result.chunk_id);
        println!();
    }
}

fn display_value(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) if s.trim().is_empty() => None,
        Value::String(s) => Some(s.replace('\n', " ")),
        other => Some(other.to_string()),
    }
}

fn excerpt(text: &str) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= EXCERPT_CHARS {
        return flat;
    }
    let cut: String = flat.chars().take(EXCERPT_CHARS).collect();
    format!("{}...", cut.trim_end())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn excerpt_flattens_and_truncates() {
        assert_eq!(excerpt("a\n\n b\tc"), "a b c");
        let long = "word ".repeat(200);
        let short = excerpt(&long);
        assert!(short.ends_with("..."));
        assert!(short.chars().count() <= EXCERPT_CHARS + 3);
    }

    #[test]
    fn blank_values_are_hidden() {
        assert_eq!(display_value(&Value::Null), None);
        assert_eq!(display_value(&Value::String("  ".into())), None);
        assert_eq!(display_value(&serde_json::json!(2)), Some("2".to_string()));
        assert_eq!(
            display_value(&Value::String("a\nb".into())),
            Some("a b".to_string())
        );
    }
}
