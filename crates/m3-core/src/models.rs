//! Core data models shared by the content store, the pipeline and the index.
//!
//! A [`ManifestEntry`] is the authoritative record of one ingested file. A
//! [`Chunk`] is one annotated fragment of that file as held by the index;
//! its [`ChunkMetadata::file_id`] always refers back to the entry's
//! `internal_id`.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Current on-disk manifest layout.
pub const MANIFEST_SCHEMA_VERSION: u32 = 1;

/// One ingested file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub original_filename: String,
    /// UUID v4 assigned on first add; never changes afterwards.
    pub internal_id: String,
    /// SHA-256 (hex) of the file bytes.
    pub content_hash: String,
    pub version: u32,
    pub doc_type: String,
    pub original_path: String,
    /// File name of the stored copy inside the project's corpus directory.
    pub stored_name: String,
    pub added_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Manifest of a project: original filename → entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    #[serde(default)]
    pub files: BTreeMap<String, ManifestEntry>,
    /// Internal ids of files whose current content decodes to no text.
    /// They hold no chunks and that is not an inconsistency.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub no_text: BTreeSet<String>,
}

fn default_schema_version() -> u32 {
    MANIFEST_SCHEMA_VERSION
}

impl Default for Manifest {
    fn default() -> Self {
        Self {
            schema_version: MANIFEST_SCHEMA_VERSION,
            files: BTreeMap::new(),
            no_text: BTreeSet::new(),
        }
    }
}

impl Manifest {
    pub fn get(&self, original_filename: &str) -> Option<&ManifestEntry> {
        self.files.get(original_filename)
    }

    /// Look up by original filename first, then by internal id.
    pub fn find(&self, identifier: &str) -> Option<&ManifestEntry> {
        self.files.get(identifier).or_else(|| {
            self.files
                .values()
                .find(|entry| entry.internal_id == identifier)
        })
    }

    pub fn insert(&mut self, entry: ManifestEntry) {
        self.files.insert(entry.original_filename.clone(), entry);
    }

    pub fn remove(&mut self, original_filename: &str) -> Option<ManifestEntry> {
        let removed = self.files.remove(original_filename)?;
        self.no_text.remove(&removed.internal_id);
        Some(removed)
    }

    /// Record whether a file's content has no text. Returns `true` when
    /// the flag changed.
    pub fn set_no_text(&mut self, internal_id: &str, no_text: bool) -> bool {
        if no_text {
            self.contains_id(internal_id) && self.no_text.insert(internal_id.to_string())
        } else {
            self.no_text.remove(internal_id)
        }
    }

    pub fn has_no_text(&self, internal_id: &str) -> bool {
        self.no_text.contains(internal_id)
    }

    /// Entries ordered by original filename.
    pub fn entries(&self) -> impl Iterator<Item = &ManifestEntry> {
        self.files.values()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn contains_id(&self, internal_id: &str) -> bool {
        self.files.values().any(|e| e.internal_id == internal_id)
    }
}

/// Decoded text of one manifest entry, ready for the pipeline.
#[derive(Debug, Clone)]
pub struct SourceDocument {
    pub file_id: String,
    pub original_filename: String,
    pub doc_type: String,
    pub version: u32,
    pub text: String,
}

impl SourceDocument {
    pub fn from_entry(entry: &ManifestEntry, text: String) -> Self {
        Self {
            file_id: entry.internal_id.clone(),
            original_filename: entry.original_filename.clone(),
            doc_type: entry.doc_type.clone(),
            version: entry.version,
            text,
        }
    }
}

/// Metadata carried by every chunk.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub file_id: String,
    pub original_filename: String,
    pub original_text: String,
    pub doc_type: String,
    pub version: u32,
    pub chunk_index: u32,
    /// SHA-256 (hex) of `original_text`.
    pub hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub question: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub themes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hypothetical_question: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_emotion: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sentiment_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub holistic_summary: Option<String>,
}

impl ChunkMetadata {
    /// Value of an optional enrichment field, if set and non-blank.
    pub fn field(&self, field: EmbedField) -> Option<&str> {
        let value = match field {
            EmbedField::Themes => self.themes.as_deref(),
            EmbedField::HypotheticalQuestion => self.hypothetical_question.as_deref(),
            EmbedField::Question => self.question.as_deref(),
            EmbedField::PrimaryEmotion => self.primary_emotion.as_deref(),
        };
        value.filter(|v| !v.trim().is_empty())
    }
}

/// A finalized chunk that has not been given an id by the index yet.
#[derive(Debug, Clone, PartialEq)]
pub struct NewChunk {
    pub searchable_text: String,
    pub metadata: ChunkMetadata,
}

/// A chunk held by the index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub searchable_text: String,
    pub metadata: ChunkMetadata,
}

/// Enrichment fields that may be appended to the embedded text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbedField {
    Themes,
    HypotheticalQuestion,
    Question,
    PrimaryEmotion,
}

impl EmbedField {
    /// Label used when the field is appended to `searchable_text`.
    pub fn label(&self) -> &'static str {
        match self {
            EmbedField::Themes => "Themes",
            EmbedField::HypotheticalQuestion => "Hypothetical Question",
            EmbedField::Question => "Question",
            EmbedField::PrimaryEmotion => "Primary Emotion",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str, id: &str) -> ManifestEntry {
        ManifestEntry {
            original_filename: name.to_string(),
            internal_id: id.to_string(),
            content_hash: "abc".to_string(),
            version: 1,
            doc_type: "document".to_string(),
            original_path: format!("/tmp/{}", name),
            stored_name: format!("{}.txt", id),
            added_at: Utc::now(),
            updated_at: None,
        }
    }

    #[test]
    fn find_by_filename_or_internal_id() {
        let mut manifest = Manifest::default();
        manifest.insert(entry("notes.txt", "id-1"));
        manifest.insert(entry("memo.md", "id-2"));

        assert_eq!(manifest.find("notes.txt").unwrap().internal_id, "id-1");
        assert_eq!(manifest.find("id-2").unwrap().original_filename, "memo.md");
        assert!(manifest.find("missing").is_none());
    }

    #[test]
    fn insert_replaces_same_filename() {
        let mut manifest = Manifest::default();
        manifest.insert(entry("notes.txt", "id-1"));
        let mut updated = entry("notes.txt", "id-1");
        updated.version = 2;
        manifest.insert(updated);

        assert_eq!(manifest.len(), 1);
        assert_eq!(manifest.get("notes.txt").unwrap().version, 2);
    }

    #[test]
    fn manifest_loads_without_optional_fields() {
        let json = r#"{
            "files": {
                "a.txt": {
                    "original_filename": "a.txt",
                    "internal_id": "x",
                    "content_hash": "h",
                    "version": 3,
                    "doc_type": "document",
                    "original_path": "/a.txt",
                    "stored_name": "x.txt",
                    "added_at": "2024-01-01T00:00:00Z",
                    "future_field": true
                }
            }
        }"#;
        let manifest: Manifest = serde_json::from_str(json).unwrap();
        assert_eq!(manifest.schema_version, MANIFEST_SCHEMA_VERSION);
        assert_eq!(manifest.get("a.txt").unwrap().version, 3);
        assert!(manifest.get("a.txt").unwrap().updated_at.is_none());
        assert!(manifest.no_text.is_empty());
    }

    #[test]
    fn no_text_flag_follows_the_entry() {
        let mut manifest = Manifest::default();
        manifest.insert(entry("blank.txt", "id-1"));

        assert!(!manifest.set_no_text("unknown", true));
        assert!(manifest.set_no_text("id-1", true));
        assert!(!manifest.set_no_text("id-1", true));
        assert!(manifest.has_no_text("id-1"));

        let json = serde_json::to_string(&manifest).unwrap();
        let reloaded: Manifest = serde_json::from_str(&json).unwrap();
        assert!(reloaded.has_no_text("id-1"));

        manifest.remove("blank.txt");
        assert!(!manifest.has_no_text("id-1"));
    }

    #[test]
    fn blank_fields_are_treated_as_unset() {
        let meta = ChunkMetadata {
            themes: Some("  ".to_string()),
            question: Some("Why?".to_string()),
            ..Default::default()
        };
        assert_eq!(meta.field(EmbedField::Themes), None);
        assert_eq!(meta.field(EmbedField::Question), Some("Why?"));
    }
}
