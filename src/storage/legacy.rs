//! Synchronous compatibility wrapper for call sites that cannot await.
//!
//! Reads and writes hit the lightweight store directly and return at once.
//! When the facade is `Ready`, each write is also replayed against the durable
//! backend on a spawned task that is not awaited. Consequently:
//! - the durable copy lags the local copy until the spawned write completes;
//! - two quick writes to one key may reach the durable backend out of order,
//!   leaving the older value there (the local copy has the newer one).
//!
//! `flush` awaits every outstanding durable write. A failed background write
//! marks its key stale so the async facade reads the local copy instead.

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use log::{debug, error, warn};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use crate::error_handling::types::StorageError;
use crate::storage::backend::Backend;
use crate::storage::facade::{StaleKeys, Storage};
use crate::storage::keys::MIGRATION_MARKER;
use crate::storage::local_store::LocalStore;
use crate::storage::migration;

pub struct LegacyStorage<D> {
    local: Arc<LocalStore>,
    durable: Option<(Arc<D>, Handle)>,
    stale: Arc<StaleKeys>,
    pending: Mutex<Vec<JoinHandle<()>>>,
}

impl<D: Backend + 'static> Storage<D> {
    /// A synchronous view over this facade.
    ///
    /// Durable mirroring needs a Tokio runtime; outside one, or when the facade
    /// is not `Ready`, the wrapper touches the lightweight store only.
    pub fn legacy(&self) -> LegacyStorage<D> {
        let durable = match (self.authoritative(), &self.durable) {
            (Some(_), Some(durable)) => match Handle::try_current() {
                Ok(handle) => Some((Arc::clone(durable), handle)),
                Err(_) => {
                    warn!("No Tokio runtime, legacy storage will not mirror to the durable backend");
                    None
                }
            },
            _ => None,
        };
        LegacyStorage {
            local: Arc::clone(&self.local),
            durable,
            stale: Arc::clone(&self.stale),
            pending: Mutex::new(Vec::new()),
        }
    }
}

/// Which durable rows a background operation touches.
enum Scope {
    Key(String),
    All,
}

impl<D: Backend + 'static> LegacyStorage<D> {
    fn spawn_durable<F, Fut>(&self, scope: Scope, op: F)
    where
        F: FnOnce(Arc<D>) -> Fut,
        Fut: Future<Output = Result<(), StorageError>> + Send + 'static,
    {
        let Some((durable, handle)) = &self.durable else {
            return;
        };
        let fut = op(Arc::clone(durable));
        let stale = Arc::clone(&self.stale);
        let task = handle.spawn(async move {
            match (fut.await, scope) {
                (Ok(()), Scope::Key(key)) => stale.settle(&key),
                (Ok(()), Scope::All) => stale.settle_all(),
                (Err(e), Scope::Key(key)) => {
                    warn!("Background durable update of {} failed: {}", key, e);
                    stale.mark(&key);
                }
                (Err(e), Scope::All) => {
                    warn!("Background durable clear failed: {}", e);
                    stale.mark_all();
                }
            }
        });
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        pending.retain(|h| !h.is_finished());
        pending.push(task);
    }

    pub fn set_item<T: Serialize + ?Sized>(&self, key: &str, value: &T) {
        let payload = match serde_json::to_string(value) {
            Ok(payload) => payload,
            Err(e) => {
                error!("Failed to serialize value for {}: {}", key, e);
                return;
            }
        };
        if let Err(e) = self.local.set_item(key, &payload) {
            error!("Write of {} to local store failed: {}", key, e);
        }
        let owned_key = key.to_string();
        self.spawn_durable(Scope::Key(key.to_string()), move |durable| async move {
            durable.put(&owned_key, &payload).await
        });
    }

    pub fn get_item<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = self.local.get_item(key)?;
        serde_json::from_str(&raw)
            .map_err(|e| warn!("Undecodable {} in local store: {}", key, e))
            .ok()
    }

    pub fn remove_item(&self, key: &str) {
        if let Err(e) = self.local.remove_item(key) {
            warn!("Delete of {} from local store failed: {}", key, e);
        }
        let owned_key = key.to_string();
        self.spawn_durable(Scope::Key(key.to_string()), move |durable| async move {
            durable.delete(&owned_key).await
        });
    }

    /// Wipes both backends, keeping the migration marker.
    pub fn clear(&self) {
        let keep: &[&str] = if migration::is_completed(&self.local) {
            &[MIGRATION_MARKER]
        } else {
            &[]
        };
        if let Err(e) = self.local.clear_except(keep) {
            warn!("Clearing local store failed: {}", e);
        }
        self.spawn_durable(Scope::All, |durable| async move {
            durable.delete_all().await
        });
    }

    pub fn has_item(&self, key: &str) -> bool {
        self.get_item::<serde_json::Value>(key).is_some()
    }

    /// Number of durable writes that have not completed yet.
    pub fn pending_writes(&self) -> usize {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|h| !h.is_finished())
            .count()
    }

    /// Waits for every durable write issued so far.
    pub async fn flush(&self) {
        let tasks = std::mem::take(
            &mut *self.pending.lock().unwrap_or_else(PoisonError::into_inner),
        );
        debug!("Flushing {} background durable write(s)", tasks.len());
        for task in tasks {
            if let Err(e) = task.await {
                error!("Background durable write panicked or was cancelled: {}", e);
            }
        }
    }
}
