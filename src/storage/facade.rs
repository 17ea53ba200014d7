//! The `Storage` facade: the single entry point for every caller.
//!
//! It owns backend selection and the initialization lifecycle. While `Ready`
//! the durable backend is authoritative and every write is mirrored into the
//! lightweight store; otherwise the lightweight store serves everything.
//! No public key/value operation returns an error: failures are logged and
//! reads degrade to "absent".
//!
//! Ordering is completion-order per key. Two concurrent `set_item` calls on
//! the same key leave whichever finished last; callers needing issuance order
//! must await each call before issuing the next.
//!
//! When a durable write or delete fails while the lightweight store accepts
//! it, the key is marked stale and reads of it skip the durable backend until
//! a later durable write of that key succeeds. The marks live in memory only.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::{debug, error, info, warn};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::configuration::StorageConfig;
use crate::error_handling::types::StorageError;
use crate::storage::backend::Backend;
use crate::storage::database_backend::DatabaseBackend;
use crate::storage::keys::MIGRATION_MARKER;
use crate::storage::local_store::LocalStore;
use crate::storage::migration::{self, MigrationCoordinator, MigrationReport};
use crate::storage::types::{NewProduct, ProductRecord, StorageState};

#[derive(Default)]
struct StaleSet {
    keys: HashSet<String>,
    all: bool,
}

/// Keys whose durable copy is older than the lightweight one.
#[derive(Default)]
pub(crate) struct StaleKeys {
    inner: Mutex<StaleSet>,
}

impl StaleKeys {
    fn lock(&self) -> MutexGuard<'_, StaleSet> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn mark(&self, key: &str) {
        self.lock().keys.insert(key.to_string());
    }

    /// A durable `delete_all` failed: every durable row may be stale.
    pub(crate) fn mark_all(&self) {
        self.lock().all = true;
    }

    pub(crate) fn settle(&self, key: &str) {
        self.lock().keys.remove(key);
    }

    pub(crate) fn settle_all(&self) {
        let mut set = self.lock();
        set.keys.clear();
        set.all = false;
    }

    pub(crate) fn is_stale(&self, key: &str) -> bool {
        let set = self.lock();
        set.all || set.keys.contains(key)
    }
}

pub struct Storage<D = DatabaseBackend> {
    config: StorageConfig,
    pub(crate) local: Arc<LocalStore>,
    pub(crate) durable: Option<Arc<D>>,
    pub(crate) stale: Arc<StaleKeys>,
    state: StorageState,
    last_migration: Option<MigrationReport>,
}

impl Storage<DatabaseBackend> {
    /// Builds an uninitialized facade from `config`.
    ///
    /// If the lightweight store file cannot be opened an in-memory store is used
    /// instead, so construction never fails.
    pub fn new(config: StorageConfig) -> Self {
        let path = config.local_store_path();
        let local = LocalStore::open(&path, config.local_quota_bytes).unwrap_or_else(|e| {
            error!(
                "Unable to open local store at {}, using memory only: {}",
                path.display(),
                e
            );
            LocalStore::in_memory(config.local_quota_bytes)
        });
        Self::with_local_store(config, Arc::new(local))
    }

    /// Opens the SQLite backend described by the configuration, then migrates.
    ///
    /// Calling this again while `Ready` only re-checks the migration marker.
    pub async fn initialize(&mut self) -> StorageState {
        if self.state == StorageState::Ready {
            debug!("Storage already initialized");
            self.run_migration().await;
            return self.state;
        }
        let backend = DatabaseBackend::new(self.config.database_path())
            .with_max_connections(self.config.max_connections);
        let opened = backend.open().await.map(|()| backend);
        self.initialize_with(opened).await
    }

    fn database(&self) -> Result<&DatabaseBackend, StorageError> {
        self.authoritative().ok_or(StorageError::Uninitialized)
    }

    // Products live only in the durable backend; there is no lightweight fallback.

    pub async fn insert_product(&self, product: &NewProduct) -> Result<ProductRecord, StorageError> {
        self.database()?.insert_product(product).await
    }

    pub async fn list_products(&self) -> Result<Vec<ProductRecord>, StorageError> {
        self.database()?.list_products().await
    }

    pub async fn get_product(&self, id: i64) -> Result<Option<ProductRecord>, StorageError> {
        self.database()?.get_product(id).await
    }

    pub async fn update_product(
        &self,
        id: i64,
        product: &NewProduct,
    ) -> Result<ProductRecord, StorageError> {
        self.database()?.update_product(id, product).await
    }

    pub async fn delete_product(&self, id: i64) -> Result<bool, StorageError> {
        self.database()?.delete_product(id).await
    }
}

impl<D: Backend> Storage<D> {
    pub fn with_local_store(config: StorageConfig, local: Arc<LocalStore>) -> Self {
        Self {
            config,
            local,
            durable: None,
            stale: Arc::new(StaleKeys::default()),
            state: StorageState::Uninitialized,
            last_migration: None,
        }
    }

    /// Attaches the outcome of opening a durable backend.
    ///
    /// `Ok` makes the facade `Ready` and runs the migration coordinator; `Err`
    /// is logged and leaves the facade `Degraded`.
    pub async fn initialize_with(&mut self, durable: Result<D, StorageError>) -> StorageState {
        if let Some(previous) = self.durable.take() {
            debug!("Replacing previously attached {} backend", previous.name());
            previous.close().await;
        }
        match durable {
            Ok(backend) => {
                info!("Storage ready on {} backend", backend.name());
                self.durable = Some(Arc::new(backend));
                self.state = StorageState::Ready;
                self.run_migration().await;
            }
            Err(e) => {
                warn!("Durable backend unavailable, running degraded: {}", e);
                self.state = StorageState::Degraded;
            }
        }
        self.state
    }

    async fn run_migration(&mut self) {
        if let Some(durable) = &self.durable {
            let report = MigrationCoordinator::new(&self.local, durable.as_ref())
                .run()
                .await;
            self.last_migration = Some(report);
        }
    }

    /// Closes the durable backend; afterwards only the lightweight store is used.
    pub async fn close(&mut self) {
        if let Some(durable) = self.durable.take() {
            durable.close().await;
        }
        self.state = StorageState::Uninitialized;
        info!("Storage closed");
    }

    pub fn state(&self) -> StorageState {
        self.state
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    pub fn local_store(&self) -> &LocalStore {
        &self.local
    }

    /// The durable backend, only while `Ready`.
    pub fn authoritative(&self) -> Option<&D> {
        match self.state {
            StorageState::Ready => self.durable.as_deref(),
            _ => None,
        }
    }

    /// Report of the most recent migration pass, if one ran.
    pub fn last_migration(&self) -> Option<&MigrationReport> {
        self.last_migration.as_ref()
    }

    /// Serializes `value` to JSON and stores it under `key`.
    pub async fn set_item<T: Serialize + ?Sized>(&self, key: &str, value: &T) {
        match serde_json::to_string(value) {
            Ok(payload) => self.set_raw(key, &payload).await,
            Err(e) => error!("Failed to serialize value for {}: {}", key, e),
        }
    }

    /// Stores an already-serialized payload under `key`.
    ///
    /// If the durable write fails but the lightweight store accepts the payload,
    /// the key is served from the lightweight store until a durable write succeeds.
    pub async fn set_raw(&self, key: &str, payload: &str) {
        let Some(durable) = self.authoritative() else {
            if let Err(e) = self.local.set_item(key, payload) {
                error!("Write of {} to local store failed: {}", key, e);
            }
            return;
        };
        let durable_result = durable.put(key, payload).await;
        let local_result = self.local.set_item(key, payload);
        match (durable_result, local_result) {
            (Ok(()), Ok(())) => self.stale.settle(key),
            (Ok(()), Err(e)) => {
                self.stale.settle(key);
                warn!("Mirror write of {} to local store failed: {}", key, e);
            }
            (Err(e), Ok(())) => {
                warn!(
                    "Write of {} to {} failed, keeping local copy only: {}",
                    key,
                    durable.name(),
                    e
                );
                self.stale.mark(key);
            }
            (Err(e), Err(local_err)) => error!(
                "Write of {} failed on both backends: {}; {}",
                key, e, local_err
            ),
        }
    }

    /// The durable backend, unless `key` is known to be stale there.
    fn readable_durable(&self, key: &str) -> Option<&D> {
        let durable = self.authoritative()?;
        if self.stale.is_stale(key) {
            debug!("{} is stale in {}, reading local store", key, durable.name());
            return None;
        }
        Some(durable)
    }

    /// Reads and deserializes the value under `key`.
    ///
    /// A durable miss, read failure or undecodable payload falls back to the
    /// lightweight store; if that also yields nothing usable the value is absent.
    pub async fn get_item<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        if let Some(durable) = self.readable_durable(key) {
            match durable.get(key).await {
                Ok(Some(raw)) => match serde_json::from_str(&raw) {
                    Ok(value) => return Some(value),
                    Err(e) => warn!("Undecodable {} in {}: {}", key, durable.name(), e),
                },
                Ok(None) => debug!("{} missing in {}, trying local store", key, durable.name()),
                Err(e) => warn!("Read of {} from {} failed: {}", key, durable.name(), e),
            }
        }
        let raw = self.local.get_item(key)?;
        serde_json::from_str(&raw)
            .map_err(|e| warn!("Undecodable {} in local store: {}", key, e))
            .ok()
    }

    /// Returns the stored payload under `key` without decoding it.
    pub async fn get_raw(&self, key: &str) -> Option<String> {
        if let Some(durable) = self.readable_durable(key) {
            match durable.get(key).await {
                Ok(Some(raw)) => return Some(raw),
                Ok(None) => {}
                Err(e) => warn!("Read of {} from {} failed: {}", key, durable.name(), e),
            }
        }
        self.local.get_item(key)
    }

    /// Deletes `key` from every attached backend so no stale copy can be read back.
    pub async fn remove_item(&self, key: &str) {
        if let Some(durable) = self.authoritative() {
            match durable.delete(key).await {
                Ok(()) => self.stale.settle(key),
                Err(e) => {
                    warn!("Delete of {} from {} failed: {}", key, durable.name(), e);
                    self.stale.mark(key);
                }
            }
        }
        if let Err(e) = self.local.remove_item(key) {
            warn!("Delete of {} from local store failed: {}", key, e);
        }
    }

    /// Wipes both backends. The migration marker is kept.
    pub async fn clear(&self) {
        if let Some(durable) = self.authoritative() {
            match durable.delete_all().await {
                Ok(()) => self.stale.settle_all(),
                Err(e) => {
                    warn!("Clearing {} failed: {}", durable.name(), e);
                    self.stale.mark_all();
                }
            }
        }
        let keep: &[&str] = if migration::is_completed(&self.local) {
            &[MIGRATION_MARKER]
        } else {
            &[]
        };
        if let Err(e) = self.local.clear_except(keep) {
            warn!("Clearing local store failed: {}", e);
        }
    }

    pub async fn has_item(&self, key: &str) -> bool {
        self.get_item::<serde_json::Value>(key).await.is_some()
    }
}
