//! Durable key-value storage and the keys the app persists.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use log::debug;
use thiserror::Error;

pub const ONBOARDING_COMPLETED_KEY: &str = "ONBOARDING_COMPLETED";
pub const ALARM_PROFILE_KEY: &str = "ALARM_PROFILE";
pub const CLUSTER_DRAFT_KEY: &str = "CLUSTER_DRAFT";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("unable to access store {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("store {path} is corrupt: {message}")]
    Corrupt { path: PathBuf, message: String },
    #[error("store rejected write to '{key}': {message}")]
    WriteRejected { key: String, message: String },
}

pub trait KeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    fn set(&mut self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Returns whether the key existed.
    fn remove(&mut self, key: &str) -> Result<bool, StorageError>;
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: BTreeMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.entries.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), StorageError> {
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<bool, StorageError> {
        Ok(self.entries.remove(key).is_some())
    }
}

/// All keys live in one JSON object file, rewritten through a temporary file and
/// a rename so a failed write leaves the previous contents intact.
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<BTreeMap<String, String>, StorageError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(BTreeMap::new());
            }
            Err(source) => {
                return Err(StorageError::Io {
                    path: self.path.clone(),
                    source,
                });
            }
        };
        if content.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        serde_json::from_str(&content).map_err(|err| StorageError::Corrupt {
            path: self.path.clone(),
            message: format!("invalid JSON at line {}, column {}: {err}", err.line(), err.column()),
        })
    }

    fn save(&self, entries: &BTreeMap<String, String>) -> Result<(), StorageError> {
        let text = serde_json::to_string_pretty(entries).map_err(|err| StorageError::Corrupt {
            path: self.path.clone(),
            message: err.to_string(),
        })?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| StorageError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let staging = self.path.with_extension("json.tmp");
        fs::write(&staging, format!("{text}\n")).map_err(|source| StorageError::Io {
            path: staging.clone(),
            source,
        })?;
        fs::rename(&staging, &self.path).map_err(|source| StorageError::Io {
            path: self.path.clone(),
            source,
        })?;
        debug!(
            "event=store_write module=store status=ok keys={} path={}",
            entries.len(),
            self.path.display()
        );
        Ok(())
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.load()?.remove(key))
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut entries = self.load()?;
        entries.insert(key.to_string(), value.to_string());
        self.save(&entries)
    }

    fn remove(&mut self, key: &str) -> Result<bool, StorageError> {
        let mut entries = self.load()?;
        if entries.remove(key).is_none() {
            return Ok(false);
        }
        self.save(&entries)?;
        Ok(true)
    }
}

/// Only the exact value `"true"` counts as completed.
pub fn onboarding_completed<S: KeyValueStore + ?Sized>(store: &S) -> Result<bool, StorageError> {
    Ok(store.get(ONBOARDING_COMPLETED_KEY)?.as_deref() == Some("true"))
}

pub fn mark_onboarding_completed<S: KeyValueStore + ?Sized>(
    store: &mut S,
) -> Result<(), StorageError> {
    store.set(ONBOARDING_COMPLETED_KEY, "true")
}
