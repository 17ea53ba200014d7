use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::error_handling::types::StorageError;

/// One row of the durable key/value table.
///
/// `value` is the serialized payload exactly as the caller stored it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageRecord {
    pub key: String,
    pub value: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A row of the structured `products` table (durable backend only).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductRecord {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub price: f64,
    pub stock: i64,
    pub category: Option<String>,
    pub image_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Field values for creating or updating a product.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewProduct {
    pub name: String,
    pub description: Option<String>,
    pub price: f64,
    pub stock: i64,
    pub category: Option<String>,
    pub image_url: Option<String>,
}

/// Lifecycle state of the `Storage` facade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StorageState {
    /// `initialize` has not run yet, or `close` was called; the lightweight store serves everything.
    Uninitialized,
    /// The durable backend is open and authoritative; the lightweight store mirrors writes.
    Ready,
    /// The durable backend failed to open; the lightweight store serves everything.
    Degraded,
}

/// Application-wide settings stored under `appSettings`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppSettings {
    pub theme: String,
    pub notifications: bool,
    pub language: String,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            theme: String::from("light"),
            notifications: true,
            language: String::from("es"),
        }
    }
}

/// Timestamp format used for every `created_at`/`updated_at` column.
///
/// Fixed precision and a `Z` suffix keep the text sortable.
pub(crate) fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, StorageError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StorageError::ReadFailed(format!("invalid timestamp {:?}: {}", raw, e)))
}
