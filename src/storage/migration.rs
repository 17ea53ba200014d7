//! One-shot copy of lightweight-store content into the durable backend.
//!
//! The pass is gated by `sqlite_migration_completed` in the lightweight store.
//! Once a pass finishes, the marker is set even if some keys failed; those
//! keys are not retried on later runs.

use log::{debug, error, info, warn};

use crate::error_handling::types::StorageError;
use crate::storage::backend::Backend;
use crate::storage::keys::{self, MIGRATION_MARKER, WELL_KNOWN_KEYS};
use crate::storage::local_store::LocalStore;

/// What happened to one candidate key during a pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyOutcome {
    Migrated,
    /// The key was not present in the lightweight store.
    Absent,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyMigration {
    pub key: String,
    pub outcome: KeyOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationReport {
    /// The marker was already set; nothing was read or written.
    AlreadyCompleted,
    Completed { keys: Vec<KeyMigration> },
}

impl MigrationReport {
    fn count(&self, wanted: fn(&KeyOutcome) -> bool) -> usize {
        match self {
            MigrationReport::AlreadyCompleted => 0,
            MigrationReport::Completed { keys } => {
                keys.iter().filter(|k| wanted(&k.outcome)).count()
            }
        }
    }

    pub fn migrated(&self) -> usize {
        self.count(|o| matches!(o, KeyOutcome::Migrated))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, KeyOutcome::Failed(_)))
    }

    pub fn absent(&self) -> usize {
        self.count(|o| matches!(o, KeyOutcome::Absent))
    }
}

/// Whether the migration marker in `local` reads as `true`.
///
/// A missing or malformed marker counts as not completed.
pub fn is_completed(local: &LocalStore) -> bool {
    local
        .get_item(MIGRATION_MARKER)
        .and_then(|raw| serde_json::from_str::<bool>(&raw).ok())
        .unwrap_or(false)
}

pub fn mark_completed(local: &LocalStore) -> Result<(), StorageError> {
    local.set_item(MIGRATION_MARKER, "true")
}

pub struct MigrationCoordinator<'a, D: Backend + ?Sized> {
    source: &'a LocalStore,
    target: &'a D,
}

impl<'a, D: Backend + ?Sized> MigrationCoordinator<'a, D> {
    pub fn new(source: &'a LocalStore, target: &'a D) -> Self {
        Self { source, target }
    }

    /// Well-known keys first, then every namespaced key present in the source.
    pub fn candidate_keys(&self) -> Vec<String> {
        let mut candidates: Vec<String> = WELL_KNOWN_KEYS.iter().map(|k| k.to_string()).collect();
        candidates.extend(
            self.source
                .keys()
                .into_iter()
                .filter(|k| keys::is_namespaced(k)),
        );
        candidates
    }

    pub async fn run(&self) -> MigrationReport {
        if is_completed(self.source) {
            debug!("Migration marker set, skipping migration");
            return MigrationReport::AlreadyCompleted;
        }

        let candidates = self.candidate_keys();
        info!(
            "Migrating up to {} key(s) from local store into {}",
            candidates.len(),
            self.target.name()
        );
        let mut results = Vec::with_capacity(candidates.len());
        for key in candidates {
            let outcome = self.migrate_key(&key).await;
            if let KeyOutcome::Failed(ref reason) = outcome {
                error!("Failed to migrate {}: {}", key, reason);
            }
            results.push(KeyMigration { key, outcome });
        }

        if let Err(e) = mark_completed(self.source) {
            warn!("Could not set migration marker, next start will rescan: {}", e);
        }
        let report = MigrationReport::Completed { keys: results };
        info!(
            "Migration finished: {} migrated, {} absent, {} failed",
            report.migrated(),
            report.absent(),
            report.failed()
        );
        report
    }

    async fn migrate_key(&self, key: &str) -> KeyOutcome {
        let Some(raw) = self.source.get_item(key) else {
            return KeyOutcome::Absent;
        };
        if let Err(e) = serde_json::from_str::<serde_json::Value>(&raw) {
            return KeyOutcome::Failed(StorageError::from(e).to_string());
        }
        match self.target.put(key, &raw).await {
            Ok(()) => {
                debug!("Migrated {}", key);
                KeyOutcome::Migrated
            }
            Err(e) => KeyOutcome::Failed(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// In-memory target that counts writes and can refuse one key.
    #[derive(Default)]
    struct RecordingBackend {
        rows: Mutex<BTreeMap<String, String>>,
        writes: AtomicUsize,
        refuse: Option<&'static str>,
    }

    #[async_trait]
    impl Backend for RecordingBackend {
        fn name(&self) -> &'static str {
            "recording"
        }

        async fn put(&self, key: &str, value: &str) -> Result<(), StorageError> {
            if self.refuse == Some(key) {
                return Err(StorageError::WriteFailed("refused".into()));
            }
            self.writes.fetch_add(1, Ordering::SeqCst);
            self.rows.lock().unwrap().insert(key.into(), value.into());
            Ok(())
        }

        async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
            Ok(self.rows.lock().unwrap().get(key).cloned())
        }

        async fn delete(&self, key: &str) -> Result<(), StorageError> {
            self.rows.lock().unwrap().remove(key);
            Ok(())
        }

        async fn delete_all(&self) -> Result<(), StorageError> {
            self.rows.lock().unwrap().clear();
            Ok(())
        }
    }

    fn seeded_source() -> LocalStore {
        let local = LocalStore::in_memory(1 << 20);
        local.set_item("userData", "{\"id\":\"u1\"}").unwrap();
        local.set_item("inventory_u1", "[{\"id\":1,\"name\":\"Widget\"}]").unwrap();
        local.set_item("activities_u1", "[]").unwrap();
        local.set_item("scratch", "\"ignored\"").unwrap();
        local
    }

    #[tokio::test]
    async fn test_second_run_performs_no_writes() {
        let local = seeded_source();
        let target = RecordingBackend::default();
        let coordinator = MigrationCoordinator::new(&local, &target);

        let first = coordinator.run().await;
        assert_eq!(first.migrated(), 3);
        assert_eq!(first.absent(), 3);
        assert_eq!(first.failed(), 0);
        assert!(is_completed(&local));
        let writes_after_first = target.writes.load(Ordering::SeqCst);
        let rows_after_first = target.rows.lock().unwrap().clone();

        let second = coordinator.run().await;
        assert_eq!(second, MigrationReport::AlreadyCompleted);
        assert_eq!(target.writes.load(Ordering::SeqCst), writes_after_first);
        assert_eq!(*target.rows.lock().unwrap(), rows_after_first);
        assert!(!rows_after_first.contains_key("scratch"));
        assert!(!rows_after_first.contains_key(MIGRATION_MARKER));
    }

    #[tokio::test]
    async fn test_per_key_failures_do_not_abort_the_pass() {
        let local = seeded_source();
        local.set_item("movements_u1", "{broken").unwrap();
        let target = RecordingBackend {
            refuse: Some("inventory_u1"),
            ..Default::default()
        };

        let report = MigrationCoordinator::new(&local, &target).run().await;
        assert_eq!(report.failed(), 2);
        assert_eq!(report.migrated(), 2);
        assert!(is_completed(&local));

        let rows = target.rows.lock().unwrap();
        assert!(rows.contains_key("userData"));
        assert!(rows.contains_key("activities_u1"));
        assert!(!rows.contains_key("inventory_u1"));
        assert!(!rows.contains_key("movements_u1"));
    }

    #[tokio::test]
    async fn test_malformed_marker_counts_as_not_completed() {
        let local = seeded_source();
        local.set_item(MIGRATION_MARKER, "yes").unwrap();
        assert!(!is_completed(&local));
        let target = RecordingBackend::default();
        let report = MigrationCoordinator::new(&local, &target).run().await;
        assert_eq!(report.migrated(), 3);
        assert_eq!(local.get_item(MIGRATION_MARKER).as_deref(), Some("true"));
    }

    #[tokio::test]
    async fn test_user_ids_with_line_breaks_are_migrated() {
        let local = LocalStore::in_memory(1 << 20);
        local.set_item("inventory_u\n1", "[1]").unwrap();
        let target = RecordingBackend::default();

        let report = MigrationCoordinator::new(&local, &target).run().await;
        assert_eq!(report.migrated(), 1);
        assert_eq!(
            target.rows.lock().unwrap().get("inventory_u\n1").map(String::as_str),
            Some("[1]")
        );
    }

    #[test]
    fn test_candidate_keys_order() {
        let local = seeded_source();
        let target = RecordingBackend::default();
        let candidates = MigrationCoordinator::new(&local, &target).candidate_keys();
        assert_eq!(
            candidates,
            vec![
                "userData",
                "authToken",
                "appSettings",
                "registeredUsers",
                "activities_u1",
                "inventory_u1"
            ]
        );
    }
}
