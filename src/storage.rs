//! Storage subsystem
//!
//! A single key/value and structured-record interface over two backends:
//! a durable SQLite database and a lightweight JSON-file store that is always
//! available. Callers talk to the `Storage` facade only.
//!
//! Components:
//! - `backend`: the `Backend` trait shared by both stores.
//! - `database_backend`: SQLite implementation (sqlx pool, SeaORM products entity).
//! - `db_entities`: SeaORM entity model for the `products` table.
//! - `local_store`: quota-bounded JSON-file implementation.
//! - `keys`: reserved keys and user-scoped key composition.
//! - `migration`: one-shot copy from the local store into SQLite.
//! - `facade`: backend arbitration, mirroring and degraded mode.
//! - `user_data`: session, inventory and activity-log helpers.
//! - `legacy`: synchronous wrapper for call sites that cannot await.
//! - `types`: records and state shared by the above.
//!
//! # Example
//!
//! ```no_run
//! use stockmaster::configuration::StorageConfig;
//! use stockmaster::storage::Storage;
//!
//! # async fn run() {
//! let mut storage = Storage::new(StorageConfig::in_dir("/tmp/stockmaster"));
//! storage.initialize().await;
//! storage.set_item("userData", &serde_json::json!({"id": "admin"})).await;
//! storage.set_auth_token("tok123").await;
//! assert!(storage.is_logged_in().await);
//! storage.close().await;
//! # }
//! ```

pub mod backend;
pub mod database_backend;
pub mod db_entities;
pub mod facade;
pub mod keys;
pub mod legacy;
pub mod local_store;
pub mod migration;
pub mod types;
pub mod user_data;


pub use backend::Backend;
pub use database_backend::DatabaseBackend;
pub use facade::Storage;
pub use legacy::LegacyStorage;
pub use local_store::LocalStore;
pub use migration::{KeyMigration, KeyOutcome, MigrationCoordinator, MigrationReport};
pub use types::{AppSettings, NewProduct, ProductRecord, StorageRecord, StorageState};
pub use user_data::ACTIVITY_LOG_LIMIT;
