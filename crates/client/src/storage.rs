//! Durable key-value storage for session credentials.
//!
//! - [`FileStore`]: one JSON file per key in the platform config directory:
//!   - Linux: `~/.config/taskboard/`
//!   - macOS: `~/Library/Application Support/taskboard/`
//!   - Windows: `%APPDATA%\taskboard\`
//! - [`MemoryStore`]: process-local, used by tests and ephemeral sessions.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("no config directory available")]
    NoConfigDir,
    #[error("storage io: {0}")]
    Io(#[from] std::io::Error),
    #[error("storage encoding: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// Raw string storage keyed by fixed names.
pub trait CredentialStore: Send + Sync {
    fn load_raw(&self, key: &str) -> Option<String>;
    fn save_raw(&self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove(&self, key: &str);
}

/// Save a serialisable value under `key`.
pub fn save<T: Serialize>(
    store: &dyn CredentialStore,
    key: &str,
    value: &T,
) -> Result<(), StorageError> {
    let json = serde_json::to_string(value)?;
    store.save_raw(key, &json)
}

/// Load a value from storage.
///
/// Returns `None` if the key doesn't exist or deserialization fails.
pub fn load<T: DeserializeOwned>(store: &dyn CredentialStore, key: &str) -> Option<T> {
    let json = store.load_raw(key)?;
    serde_json::from_str(&json).ok()
}

pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Store rooted at `dir`, created on demand.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Store rooted at `<config dir>/taskboard`.
    pub fn in_config_dir() -> Result<Self, StorageError> {
        let config_dir = dirs::config_dir().ok_or(StorageError::NoConfigDir)?;
        Ok(Self::new(config_dir.join("taskboard")))
    }

    fn file_path(&self, key: &str) -> PathBuf {
        // Sanitize key to be a valid filename
        let safe_key = key.replace(['/', '\\', ':', '*', '?', '"', '<', '>', '|'], "_");
        self.dir.join(format!("{safe_key}.json"))
    }
}

impl CredentialStore for FileStore {
    fn load_raw(&self, key: &str) -> Option<String> {
        std::fs::read_to_string(self.file_path(key)).ok()
    }

    fn save_raw(&self, key: &str, value: &str) -> Result<(), StorageError> {
        if !self.dir.exists() {
            std::fs::create_dir_all(&self.dir)?;
        }
        std::fs::write(self.file_path(key), value)?;
        Ok(())
    }

    fn remove(&self, key: &str) {
        let _ = std::fs::remove_file(self.file_path(key));
    }
}

#[derive(Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CredentialStore for MemoryStore {
    fn load_raw(&self, key: &str) -> Option<String> {
        self.values.lock().ok()?.get(key).cloned()
    }

    fn save_raw(&self, key: &str, value: &str) -> Result<(), StorageError> {
        if let Ok(mut values) = self.values.lock() {
            values.insert(key.to_string(), value.to_string());
        }
        Ok(())
    }

    fn remove(&self, key: &str) {
        if let Ok(mut values) = self.values.lock() {
            values.remove(key);
        }
    }
}
