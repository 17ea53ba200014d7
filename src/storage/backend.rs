//! Backend Trait
//!
//! This module defines the `Backend` trait, the capability set shared by the
//! durable SQLite backend and the lightweight local store.
//!
//! Implementors are responsible for:
//! - Upserting a serialized payload under a key
//! - Reading it back byte-for-byte
//! - Deleting one key or every key
//!
//! Payloads are opaque text; backends never interpret them.

use async_trait::async_trait;

use crate::error_handling::types::StorageError;

#[async_trait]
pub trait Backend: Send + Sync {
    /// Short name used in log lines.
    fn name(&self) -> &'static str;

    /// Inserts or replaces the payload stored under `key`.
    async fn put(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Returns the payload stored under `key`, or `None` when absent.
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Deletes `key`. Deleting an absent key is not an error.
    async fn delete(&self, key: &str) -> Result<(), StorageError>;

    /// Deletes every key.
    async fn delete_all(&self) -> Result<(), StorageError>;

    /// Releases the backend's resources. Later calls may fail with `Uninitialized`.
    async fn close(&self) {}
}
