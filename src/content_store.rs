//! Versioned, content-addressed file repository for one project.
//!
//! ```text
//! <project>/
//!   manifest.json            original filename → ManifestEntry
//!   corpus/<uuid>.<ext>      stored copy of each file
//! ```
//!
//! The stored copy is always written (temp file + rename) before the
//! manifest is, and the manifest itself is replaced atomically, so a
//! failed copy leaves the manifest as it was.

use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use globset::Glob;
use sha2::{Digest, Sha256};
use thiserror::Error;
use uuid::Uuid;
use walkdir::WalkDir;

use m3_core::error::M3Error;
use m3_core::models::{Manifest, ManifestEntry};

use crate::extract;

const MANIFEST_FILE: &str = "manifest.json";
const CORPUS_DIR: &str = "corpus";

/// What `add_file` did with one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddDisposition {
    Added(ManifestEntry),
    Updated(ManifestEntry),
    Unchanged(ManifestEntry),
}

impl AddDisposition {
    pub fn entry(&self) -> &ManifestEntry {
        match self {
            AddDisposition::Added(e) | AddDisposition::Updated(e) | AddDisposition::Unchanged(e) => {
                e
            }
        }
    }

    /// Whether the file's content is new to the project.
    pub fn is_changed(&self) -> bool {
        !matches!(self, AddDisposition::Unchanged(_))
    }
}

/// A source file could not be read. Nothing in the project was touched.
#[derive(Debug, Error)]
#[error("could not read {path}: {reason}")]
pub struct SourceError {
    pub path: String,
    pub reason: String,
}

impl SourceError {
    fn new(path: &Path, reason: impl ToString) -> Self {
        Self {
            path: path.display().to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Result of expanding the inputs of an `add`.
#[derive(Debug, Default)]
pub struct Expansion {
    pub files: Vec<PathBuf>,
    pub warnings: Vec<String>,
}

/// Summary of a whole `add` call.
#[derive(Debug, Default)]
pub struct AddOutcome {
    pub added: Vec<ManifestEntry>,
    pub updated: Vec<ManifestEntry>,
    pub unchanged: Vec<ManifestEntry>,
    pub warnings: Vec<String>,
}

pub struct ContentStore {
    root: PathBuf,
    manifest: Manifest,
}

impl ContentStore {
    /// Open the store in `project_dir`, creating the layout if missing.
    pub fn open(project_dir: &Path) -> Result<Self> {
        fs::create_dir_all(project_dir.join(CORPUS_DIR)).with_context(|| {
            format!("Failed to create corpus directory in {}", project_dir.display())
        })?;
        let manifest_path = project_dir.join(MANIFEST_FILE);
        let manifest = if manifest_path.exists() {
            let content = fs::read_to_string(&manifest_path)
                .with_context(|| format!("Failed to read {}", manifest_path.display()))?;
            serde_json::from_str(&content).map_err(M3Error::Manifest)?
        } else {
            Manifest::default()
        };
        Ok(Self {
            root: project_dir.to_path_buf(),
            manifest,
        })
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    /// Entries sorted by original filename.
    pub fn list(&self) -> Vec<ManifestEntry> {
        self.manifest.entries().cloned().collect()
    }

    pub fn stored_path(&self, entry: &ManifestEntry) -> PathBuf {
        self.root.join(CORPUS_DIR).join(&entry.stored_name)
    }

    /// Look up an entry by original filename or internal id.
    pub fn resolve(&self, identifier: &str) -> Result<ManifestEntry, M3Error> {
        self.manifest
            .find(identifier)
            .cloned()
            .ok_or_else(|| M3Error::NotFound(format!("no file '{}' in this project", identifier)))
    }

    /// Expand files, directories and glob patterns into concrete files.
    ///
    /// Directories and patterns only yield files of a supported type; a
    /// file named explicitly is always taken. Inputs matching nothing
    /// produce a warning.
    pub fn expand(inputs: &[String]) -> Expansion {
        let mut out = Expansion::default();
        for input in inputs {
            let path = Path::new(input);
            let before = out.files.len();
            if path.is_file() {
                out.files.push(path.to_path_buf());
            } else if path.is_dir() {
                for entry in WalkDir::new(path).follow_links(false).sort_by_file_name() {
                    match entry {
                        Ok(e) if e.file_type().is_file() && extract::is_supported(e.path()) => {
                            out.files.push(e.into_path());
                        }
                        Ok(_) => {}
                        Err(err) => out.warnings.push(format!("{}: {}", input, err)),
                    }
                }
            } else {
                match expand_glob(input) {
                    Ok(files) => out.files.extend(files),
                    Err(err) => out.warnings.push(format!("{}: {}", input, err)),
                }
            }
            if out.files.len() == before {
                out.warnings.push(format!("{}: no files matched", input));
            }
        }
        out.files.sort();
        out.files.dedup();
        out
    }

    /// Add or update one file.
    ///
    /// A source that cannot be read fails with [`SourceError`]; failures
    /// writing the stored copy or the manifest are storage errors.
    /// Names that are not valid UTF-8 are stored lossily.
    pub fn add_file(&mut self, path: &Path, doc_type: &str) -> Result<AddDisposition> {
        let original_filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| SourceError::new(path, "not a file name"))?;
        let content_hash = hash_file(path).map_err(|e| SourceError::new(path, e))?;
        let original_path = fs::canonicalize(path)
            .unwrap_or_else(|_| path.to_path_buf())
            .display()
            .to_string();

        let disposition = match self.manifest.get(&original_filename).cloned() {
            Some(existing) if existing.content_hash == content_hash => {
                return Ok(AddDisposition::Unchanged(existing));
            }
            Some(existing) => {
                let entry = ManifestEntry {
                    content_hash,
                    version: existing.version + 1,
                    doc_type: doc_type.to_string(),
                    original_path,
                    updated_at: Some(Utc::now()),
                    ..existing
                };
                AddDisposition::Updated(entry)
            }
            None => {
                let internal_id = Uuid::new_v4().to_string();
                let stored_name = match path.extension().and_then(|e| e.to_str()) {
                    Some(ext) => format!("{}.{}", internal_id, ext.to_ascii_lowercase()),
                    None => internal_id.clone(),
                };
                AddDisposition::Added(ManifestEntry {
                    original_filename,
                    internal_id,
                    content_hash,
                    version: 1,
                    doc_type: doc_type.to_string(),
                    original_path,
                    stored_name,
                    added_at: Utc::now(),
                    updated_at: None,
                })
            }
        };

        let entry = disposition.entry().clone();
        self.copy_in(path, &entry)?;
        self.manifest.insert(entry);
        self.save()?;
        Ok(disposition)
    }

    /// Expand `inputs` and add every file found.
    pub fn add(&mut self, inputs: &[String], doc_type: &str) -> Result<AddOutcome> {
        let expansion = Self::expand(inputs);
        let mut outcome = AddOutcome {
            warnings: expansion.warnings,
            ..Default::default()
        };
        for file in &expansion.files {
            match self.add_file(file, doc_type) {
                Ok(AddDisposition::Added(e)) => outcome.added.push(e),
                Ok(AddDisposition::Updated(e)) => outcome.updated.push(e),
                Ok(AddDisposition::Unchanged(e)) => outcome.unchanged.push(e),
                Err(e) => match e.downcast::<SourceError>() {
                    Ok(source) => outcome.warnings.push(source.to_string()),
                    Err(e) => return Err(e),
                },
            }
        }
        Ok(outcome)
    }

    /// Whether the entry's current content decodes to no text.
    pub fn has_no_text(&self, internal_id: &str) -> bool {
        self.manifest.has_no_text(internal_id)
    }

    /// Record whether the entry's current content decodes to no text.
    pub fn set_no_text(&mut self, internal_id: &str, no_text: bool) -> Result<()> {
        if self.manifest.set_no_text(internal_id, no_text) {
            self.save()?;
        }
        Ok(())
    }

    /// Delete an entry and its stored copy, returning the entry.
    pub fn remove(&mut self, identifier: &str) -> Result<ManifestEntry> {
        let entry = self.resolve(identifier)?;
        let stored = self.stored_path(&entry);
        self.manifest.remove(&entry.original_filename);
        self.save()?;
        if stored.exists() {
            fs::remove_file(&stored).map_err(M3Error::Storage)?;
        }
        Ok(entry)
    }

    fn copy_in(&self, source: &Path, entry: &ManifestEntry) -> Result<()> {
        let dest = self.stored_path(entry);
        let tmp = dest.with_extension("partial");
        fs::copy(source, &tmp).map_err(M3Error::Storage)?;
        fs::rename(&tmp, &dest).map_err(M3Error::Storage)?;
        Ok(())
    }

    fn save(&self) -> Result<()> {
        let path = self.root.join(MANIFEST_FILE);
        let tmp = self.root.join(format!("{}.tmp", MANIFEST_FILE));
        let json = serde_json::to_string_pretty(&self.manifest).map_err(M3Error::Manifest)?;
        fs::write(&tmp, json).map_err(M3Error::Storage)?;
        fs::rename(&tmp, &path).map_err(M3Error::Storage)?;
        Ok(())
    }
}

/// Match a glob pattern by walking its literal (wildcard-free) prefix.
fn expand_glob(pattern: &str) -> Result<Vec<PathBuf>> {
    let matcher = Glob::new(pattern)?.compile_matcher();
    let base = literal_prefix(pattern);
    if !base.is_dir() {
        return Ok(Vec::new());
    }
    let mut files = Vec::new();
    for entry in WalkDir::new(&base).follow_links(false) {
        let entry = entry?;
        if entry.file_type().is_file()
            && extract::is_supported(entry.path())
            && matcher.is_match(entry.path())
        {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}

fn literal_prefix(pattern: &str) -> PathBuf {
    let mut base = PathBuf::new();
    for component in Path::new(pattern).components() {
        let part = component.as_os_str().to_string_lossy();
        if part.contains(|c: char| matches!(c, '*' | '?' | '[' | '{')) {
            break;
        }
        base.push(component);
    }
    if base.as_os_str().is_empty() {
        PathBuf::from(".")
    } else {
        base
    }
}

fn hash_file(path: &Path) -> io::Result<String> {
    let mut file = fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}
