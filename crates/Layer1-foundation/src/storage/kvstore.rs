//! Key/value stores for durable session state

use crate::{Error, Result};
use parking_lot::RwLock;
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Byte-oriented key/value store
pub trait KvStore: Send + Sync {
    /// Read a value; `Ok(None)` when the key does not exist
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Write a value, replacing any previous one
    fn set(&self, key: &str, value: &[u8]) -> Result<()>;
}

/// Read and decode a JSON value
pub fn get_json<T: DeserializeOwned>(store: &dyn KvStore, key: &str) -> Result<Option<T>> {
    match store.get(key)? {
        Some(data) => serde_json::from_slice(&data)
            .map(Some)
            .map_err(|e| Error::Storage(format!("Failed to parse {}: {}", key, e))),
        None => Ok(None),
    }
}

/// Encode and write a JSON value
pub fn set_json<T: Serialize>(store: &dyn KvStore, key: &str, value: &T) -> Result<()> {
    let data = serde_json::to_vec(value)
        .map_err(|e| Error::Storage(format!("Failed to serialize {}: {}", key, e)))?;
    store.set(key, &data)
}

// ============================================================================
// File system store
// ============================================================================

/// One file per key under a base directory
#[derive(Debug, Clone)]
pub struct FileSystemKvStore {
    base_dir: PathBuf,
}

impl FileSystemKvStore {
    /// Open a store, creating its directory
    pub fn new(base_dir: impl Into<PathBuf>) -> Result<Self> {
        let store = Self {
            base_dir: base_dir.into(),
        };
        store.ensure_dir()?;
        Ok(store)
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn file_path(&self, key: &str) -> Result<PathBuf> {
        if key.is_empty() || key.contains(['/', '\\']) || key == "." || key == ".." {
            return Err(Error::Storage(format!("invalid key: {:?}", key)));
        }
        Ok(self.base_dir.join(key))
    }

    fn ensure_dir(&self) -> Result<()> {
        if !self.base_dir.exists() {
            std::fs::create_dir_all(&self.base_dir).map_err(|e| {
                Error::Storage(format!(
                    "Failed to create directory {}: {}",
                    self.base_dir.display(),
                    e
                ))
            })?;
        }
        Ok(())
    }
}

impl KvStore for FileSystemKvStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.file_path(key)?;
        match std::fs::read(&path) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::Storage(format!(
                "Failed to read {}: {}",
                path.display(),
                e
            ))),
        }
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        self.ensure_dir()?;
        let path = self.file_path(key)?;
        std::fs::write(&path, value)
            .map_err(|e| Error::Storage(format!("Failed to write {}: {}", path.display(), e)))
    }
}

// ============================================================================
// Memory store
// ============================================================================

/// Volatile store, for tests and ephemeral sessions
#[derive(Debug, Default)]
pub struct MemoryKvStore {
    entries: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvStore for MemoryKvStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        self.entries.write().insert(key.to_string(), value.to_vec());
        Ok(())
    }
}
