//! Lightweight backend: a synchronous key/value store persisted as one JSON file.
//!
//! Always available and zero-setup, but bounded by a byte quota and with weaker
//! durability than the SQLite backend. Every mutation rewrites the file through
//! a temporary file in the same directory, then renames it into place.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use log::{debug, error, info, warn};
use tempfile::NamedTempFile;

use crate::error_handling::types::StorageError;
use crate::storage::backend::Backend;

pub struct LocalStore {
    path: Option<PathBuf>,
    entries: Mutex<BTreeMap<String, String>>,
    quota_bytes: usize,
}

impl LocalStore {
    /// Opens (or creates) the store file at `path`.
    ///
    /// An unreadable or corrupt file is logged and replaced by an empty store
    /// on the next write; only failing to create the parent directory is an error.
    pub fn open<P: AsRef<Path>>(path: P, quota_bytes: usize) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| {
                    error!("Failed to create local store dir {}: {}", parent.display(), e);
                    StorageError::WriteFailed(e.to_string())
                })?;
            }
        }
        let entries = Self::load(&path);
        info!(
            "LocalStore initialized at {} with {} key(s)",
            path.display(),
            entries.len()
        );
        Ok(Self {
            path: Some(path),
            entries: Mutex::new(entries),
            quota_bytes,
        })
    }

    /// A store that lives only in memory. Used as the last-resort fallback and in tests.
    pub fn in_memory(quota_bytes: usize) -> Self {
        Self {
            path: None,
            entries: Mutex::new(BTreeMap::new()),
            quota_bytes,
        }
    }

    fn load(path: &Path) -> BTreeMap<String, String> {
        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return BTreeMap::new(),
            Err(e) => {
                error!("Failed to read local store {}: {}", path.display(), e);
                return BTreeMap::new();
            }
        };
        serde_json::from_str(&contents).unwrap_or_else(|e| {
            error!("Corrupt local store {}, starting empty: {}", path.display(), e);
            BTreeMap::new()
        })
    }

    fn entries(&self) -> MutexGuard<'_, BTreeMap<String, String>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn persist(&self, entries: &BTreeMap<String, String>) -> Result<(), StorageError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let mut tmp = NamedTempFile::new_in(dir).map_err(|e| {
            error!("Failed to create temp file in {}: {}", dir.display(), e);
            StorageError::WriteFailed(e.to_string())
        })?;
        serde_json::to_writer(&mut tmp, entries)?;
        tmp.flush()
            .map_err(|e| StorageError::WriteFailed(e.to_string()))?;
        tmp.persist(path).map_err(|e| {
            error!("Failed to replace local store {}: {}", path.display(), e);
            StorageError::WriteFailed(e.to_string())
        })?;
        Ok(())
    }

    fn used_bytes_of(entries: &BTreeMap<String, String>) -> usize {
        entries.iter().map(|(k, v)| k.len() + v.len()).sum()
    }

    pub fn get_item(&self, key: &str) -> Option<String> {
        self.entries().get(key).cloned()
    }

    /// Stores `value` under `key`, enforcing the quota.
    ///
    /// If the file cannot be rewritten the in-memory state is rolled back.
    pub fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut entries = self.entries();
        let current = entries.get(key).map(|v| key.len() + v.len()).unwrap_or(0);
        let requested = Self::used_bytes_of(&entries) - current + key.len() + value.len();
        if requested > self.quota_bytes {
            warn!(
                "LocalStore quota exceeded writing {}: {} > {}",
                key, requested, self.quota_bytes
            );
            return Err(StorageError::QuotaExceeded {
                requested,
                quota: self.quota_bytes,
            });
        }
        let previous = entries.insert(key.to_string(), value.to_string());
        if let Err(e) = self.persist(&entries) {
            match previous {
                Some(previous) => entries.insert(key.to_string(), previous),
                None => entries.remove(key),
            };
            return Err(e);
        }
        debug!("LocalStore set {} ({} byte(s))", key, value.len());
        Ok(())
    }

    pub fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        let mut entries = self.entries();
        let Some(previous) = entries.remove(key) else {
            return Ok(());
        };
        if let Err(e) = self.persist(&entries) {
            entries.insert(key.to_string(), previous);
            return Err(e);
        }
        debug!("LocalStore removed {}", key);
        Ok(())
    }

    pub fn clear(&self) -> Result<(), StorageError> {
        self.clear_except(&[])
    }

    /// Removes every key except those listed in `keep`.
    pub fn clear_except(&self, keep: &[&str]) -> Result<(), StorageError> {
        let mut entries = self.entries();
        let retained: BTreeMap<String, String> = entries
            .iter()
            .filter(|(k, _)| keep.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        self.persist(&retained)?;
        let removed = entries.len() - retained.len();
        *entries = retained;
        info!("LocalStore cleared {} key(s)", removed);
        Ok(())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries().contains_key(key)
    }

    /// All keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        self.entries().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    pub fn used_bytes(&self) -> usize {
        Self::used_bytes_of(&self.entries())
    }

    pub fn quota_bytes(&self) -> usize {
        self.quota_bytes
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

#[async_trait]
impl Backend for LocalStore {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn put(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.set_item(key, value)
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.get_item(key))
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.remove_item(key)
    }

    async fn delete_all(&self) -> Result<(), StorageError> {
        self.clear()
    }
}
