//! Overlapping word-window chunker and searchable-text assembly.
//!
//! Text is split on whitespace into words, and windows of `window` words
//! advance by `window - overlap` words. Each window is returned as a slice
//! of the original text (from the first word's start to the last word's
//! end) so line breaks and spacing inside a window survive.
//!
//! For `n` words the number of windows is `1` when `n <= window`, otherwise
//! `ceil((n - overlap) / (window - overlap))`.
//!
//! # Example
//!
//! ```rust
//! use m3_core::chunk::split_windows;
//!
//! let text = "one two three four five";
//! let windows = split_windows(text, 3, 1);
//! assert_eq!(windows, vec!["one two three", "three four five"]);
//! ```

use sha2::{Digest, Sha256};

use crate::models::{ChunkMetadata, EmbedField};

/// Byte ranges of every whitespace-separated word in `text`.
fn word_spans(text: &str) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut start: Option<usize> = None;
    for (i, c) in text.char_indices() {
        if c.is_whitespace() {
            if let Some(s) = start.take() {
                spans.push((s, i));
            }
        } else if start.is_none() {
            start = Some(i);
        }
    }
    if let Some(s) = start {
        spans.push((s, text.len()));
    }
    spans
}

pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Split `text` into overlapping windows of `window` words.
///
/// Returns no windows for text without any words. `overlap` values that
/// are not smaller than `window` are clamped so the window always advances.
pub fn split_windows(text: &str, window: usize, overlap: usize) -> Vec<String> {
    let spans = word_spans(text);
    if spans.is_empty() {
        return Vec::new();
    }
    let window = window.max(1);
    let step = window.saturating_sub(overlap).max(1);

    let mut windows = Vec::new();
    let mut start = 0usize;
    loop {
        let end = (start + window).min(spans.len());
        let from = spans[start].0;
        let to = spans[end - 1].1;
        windows.push(text[from..to].to_string());
        if end == spans.len() {
            break;
        }
        start += step;
    }
    windows
}

/// SHA-256 of arbitrary bytes, lowercase hex.
pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Build the string that gets embedded for a chunk.
///
/// The raw text comes first, followed by `"\n\n<Label>: <value>"` for each
/// configured field that is set, in configured order, and finally
/// `"\n\nSummary: <summary>"` when `include_summary` is on and a summary
/// exists.
pub fn build_searchable_text(
    original_text: &str,
    metadata: &ChunkMetadata,
    fields: &[EmbedField],
    include_summary: bool,
) -> String {
    let mut out = String::from(original_text);
    for field in fields {
        if let Some(value) = metadata.field(*field) {
            out.push_str("\n\n");
            out.push_str(field.label());
            out.push_str(": ");
            out.push_str(value.trim());
        }
    }
    if include_summary {
        if let Some(summary) = metadata
            .holistic_summary
            .as_deref()
            .filter(|s| !s.trim().is_empty())
        {
            out.push_str("\n\nSummary: ");
            out.push_str(summary.trim());
        }
    }
    out
}
