//! Project registry.
//!
//! Each project is a directory under `<storage.root>/projects/`; the name
//! of the selected project is kept in `<storage.root>/active_project`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};

use m3_core::error::M3Error;

const PROJECTS_DIR: &str = "projects";
const ACTIVE_FILE: &str = "active_project";

/// Well-known paths inside one project directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectPaths {
    pub name: String,
    pub dir: PathBuf,
}

impl ProjectPaths {
    pub fn index_db(&self) -> PathBuf {
        self.dir.join("index.sqlite")
    }

    pub fn framework_json(&self) -> PathBuf {
        self.dir.join("framework.json")
    }
}

pub struct ProjectRegistry {
    root: PathBuf,
}

impl ProjectRegistry {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    fn paths(&self, name: &str) -> ProjectPaths {
        ProjectPaths {
            name: name.to_string(),
            dir: self.root.join(PROJECTS_DIR).join(name),
        }
    }

    pub fn exists(&self, name: &str) -> bool {
        self.paths(name).dir.is_dir()
    }

    /// Create the project directory. The first project becomes active.
    pub fn create(&self, name: &str) -> Result<ProjectPaths> {
        validate_name(name)?;
        let paths = self.paths(name);
        if paths.dir.exists() {
            bail!("Project '{}' already exists", name);
        }
        fs::create_dir_all(&paths.dir)
            .with_context(|| format!("Failed to create {}", paths.dir.display()))?;
        if self.active()?.is_none() {
            self.select(name)?;
        }
        tracing::info!(project = name, "created project");
        Ok(paths)
    }

    /// Project names, sorted.
    pub fn list(&self) -> Result<Vec<String>> {
        let dir = self.root.join(PROJECTS_DIR);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    pub fn select(&self, name: &str) -> Result<()> {
        if !self.exists(name) {
            return Err(M3Error::NotFound(format!("project '{}'", name)).into());
        }
        fs::create_dir_all(&self.root)?;
        fs::write(self.root.join(ACTIVE_FILE), name).map_err(M3Error::Storage)?;
        Ok(())
    }

    /// Name of the active project, if one is selected and still exists.
    pub fn active(&self) -> Result<Option<String>> {
        let marker = self.root.join(ACTIVE_FILE);
        if !marker.exists() {
            return Ok(None);
        }
        let name = fs::read_to_string(&marker).map_err(M3Error::Storage)?;
        let name = name.trim();
        if name.is_empty() || !self.exists(name) {
            return Ok(None);
        }
        Ok(Some(name.to_string()))
    }

    /// Delete a project and everything in it.
    pub fn delete(&self, name: &str) -> Result<()> {
        let paths = self.paths(name);
        if !paths.dir.is_dir() {
            return Err(M3Error::NotFound(format!("project '{}'", name)).into());
        }
        let was_active = self.active()?.as_deref() == Some(name);
        fs::remove_dir_all(&paths.dir)
            .with_context(|| format!("Failed to delete {}", paths.dir.display()))?;
        if was_active {
            fs::remove_file(self.root.join(ACTIVE_FILE)).map_err(M3Error::Storage)?;
        }
        tracing::info!(project = name, "deleted project");
        Ok(())
    }

    /// The explicitly named project, or else the active one.
    pub fn resolve(&self, explicit: Option<&str>) -> Result<ProjectPaths> {
        let name = match explicit {
            Some(name) => name.to_string(),
            None => self.active()?.ok_or_else(|| {
                M3Error::Configuration(
                    "no active project; run `m3 project create <name>` or `m3 project use <name>`"
                        .to_string(),
                )
            })?,
        };
        if !self.exists(&name) {
            return Err(M3Error::NotFound(format!("project '{}'", name)).into());
        }
        Ok(self.paths(&name))
    }
}

fn validate_name(name: &str) -> Result<()> {
    let ok = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if !ok {
        bail!(
            "Invalid project name '{}': use letters, digits, '-' or '_'",
            name
        );
    }
    Ok(())
}
