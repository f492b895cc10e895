//! On-disk template store.
//!
//! One JSON file per enrolled template. The random file name is the
//! template's only identifier; there is no separate index.

use crate::types::Template;
use rand::Rng;
use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

pub const TEMPLATE_EXTENSION: &str = ".json";
const NAME_LENGTH: usize = 10;
const NAME_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
const MAX_CREATE_ATTEMPTS: usize = 8;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("template not found: {0}")]
    TemplateNotFound(String),
    #[error("corrupt template {path}: {reason}")]
    CorruptTemplate { path: String, reason: String },
    #[error("no free template name after {0} attempts")]
    NameCollision(usize),
    #[error("invalid template name: {0:?}")]
    InvalidName(String),
    #[error("template write abandoned by its caller")]
    Abandoned,
    #[error("io error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl StoreError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.display().to_string(),
            source,
        }
    }

    fn corrupt(path: &Path, reason: impl Into<String>) -> Self {
        StoreError::CorruptTemplate {
            path: path.display().to_string(),
            reason: reason.into(),
        }
    }
}

/// Draw a random base name (`[a-z0-9]{10}`) plus `extension`, re-drawing
/// while it collides with `existing`.
///
/// Only guarantees absence from `existing` at call time; use
/// [`TemplateStore::create`] when other writers may share the directory.
pub fn allocate_name(extension: &str, existing: &HashSet<String>) -> String {
    let mut rng = rand::thread_rng();
    loop {
        let mut name: String = (0..NAME_LENGTH)
            .map(|_| NAME_ALPHABET[rng.gen_range(0..NAME_ALPHABET.len())] as char)
            .collect();
        name.push_str(extension);
        if !existing.contains(&name) {
            return name;
        }
    }
}

/// Serialize a template to `location`, creating or truncating the file.
pub fn save(template: &Template, location: &Path) -> Result<(), StoreError> {
    let json = serde_json::to_vec(template).map_err(|e| StoreError::io(location, e.into()))?;
    fs::write(location, json).map_err(|e| StoreError::io(location, e))
}

/// Read and validate a template from `location`.
pub fn load(location: &Path) -> Result<Template, StoreError> {
    let raw = match fs::read(location) {
        Ok(raw) => raw,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Err(StoreError::TemplateNotFound(location.display().to_string()));
        }
        Err(e) => return Err(StoreError::io(location, e)),
    };

    let template: Template =
        serde_json::from_slice(&raw).map_err(|e| StoreError::corrupt(location, e.to_string()))?;

    if template.vector.is_empty() {
        return Err(StoreError::corrupt(location, "empty vector"));
    }
    if template.sample_count == 0 {
        return Err(StoreError::corrupt(location, "sample_count must be positive"));
    }

    Ok(template)
}

/// A directory of template files.
#[derive(Debug, Clone)]
pub struct TemplateStore {
    dir: PathBuf,
}

impl TemplateStore {
    /// Open (and create if missing) a template directory.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| StoreError::io(&dir, e))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Resolve a template identifier to its path, refusing anything that
    /// could escape the store directory.
    pub fn path_for(&self, name: &str) -> Result<PathBuf, StoreError> {
        let escapes = name.is_empty()
            || name == "."
            || name.contains("..")
            || name.contains('/')
            || name.contains('\\')
            || name.contains('\0');
        if escapes {
            return Err(StoreError::InvalidName(name.to_string()));
        }
        Ok(self.dir.join(name))
    }

    /// Names of the template files currently in the store, sorted.
    pub fn list(&self) -> Result<Vec<String>, StoreError> {
        let entries = fs::read_dir(&self.dir).map_err(|e| StoreError::io(&self.dir, e))?;
        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| StoreError::io(&self.dir, e))?;
            if let Some(name) = entry.file_name().to_str() {
                if name.ends_with(TEMPLATE_EXTENSION) {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    /// Persist a new template under a freshly allocated name and return it.
    ///
    /// The file is opened with `create_new`, so two concurrent callers that
    /// draw the same name cannot overwrite each other: the loser sees
    /// `AlreadyExists` and draws again.
    pub fn create(&self, template: &Template) -> Result<String, StoreError> {
        self.create_unless(template, &AtomicBool::new(false))
    }

    /// Like [`create`](Self::create), but gives up with
    /// [`StoreError::Abandoned`] once `abandoned` is set.
    ///
    /// The flag is checked right before each file is opened. A writer that
    /// already got past the check still finishes; whoever set the flag owns
    /// removing that file.
    pub fn create_unless(&self, template: &Template, abandoned: &AtomicBool) -> Result<String, StoreError> {
        self.create_with(template, abandoned, |existing| allocate_name(TEMPLATE_EXTENSION, existing))
    }

    fn create_with(
        &self,
        template: &Template,
        abandoned: &AtomicBool,
        mut next_name: impl FnMut(&HashSet<String>) -> String,
    ) -> Result<String, StoreError> {
        let json = serde_json::to_vec(template).map_err(|e| StoreError::io(&self.dir, e.into()))?;
        let mut existing: HashSet<String> = self.list()?.into_iter().collect();

        for attempt in 1..=MAX_CREATE_ATTEMPTS {
            let name = next_name(&existing);
            let path = self.dir.join(&name);

            if abandoned.load(Ordering::SeqCst) {
                return Err(StoreError::Abandoned);
            }
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    if let Err(e) = file.write_all(&json).and_then(|_| file.sync_all()) {
                        // No partial templates: drop what was written.
                        let _ = fs::remove_file(&path);
                        return Err(StoreError::io(&path, e));
                    }
                    tracing::debug!(name = %name, attempt, "template written");
                    return Ok(name);
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    tracing::warn!(name = %name, attempt, "template name taken concurrently; redrawing");
                    existing.insert(name);
                }
                Err(e) => return Err(StoreError::io(&path, e)),
            }
        }

        Err(StoreError::NameCollision(MAX_CREATE_ATTEMPTS))
    }

    /// Delete a template by identifier.
    pub fn remove(&self, name: &str) -> Result<(), StoreError> {
        let path = self.path_for(name)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(StoreError::TemplateNotFound(name.to_string())),
            Err(e) => Err(StoreError::io(&path, e)),
        }
    }

    /// Load a template by identifier.
    pub fn load(&self, name: &str) -> Result<Template, StoreError> {
        let path = self.path_for(name)?;
        load(&path).map_err(|e| match e {
            // Report the caller's identifier rather than our absolute path.
            StoreError::TemplateNotFound(_) => StoreError::TemplateNotFound(name.to_string()),
            other => other,
        })
    }
}
