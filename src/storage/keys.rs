//! Reserved keys and the user-scoped keyspace convention.
//!
//! Logical per-user records are stored under `<prefix><user_id>` keys such as
//! `inventory_admin`. The storage layer treats them as ordinary keys; this
//! module only composes and recognizes them.

use regex::Regex;
use std::sync::OnceLock;

/// Current session's user record.
pub const USER_DATA: &str = "userData";
/// Current session token string.
pub const AUTH_TOKEN: &str = "authToken";
/// Sequence of self-registered user records.
pub const REGISTERED_USERS: &str = "registeredUsers";
/// `{ theme, notifications, language }`.
pub const APP_SETTINGS: &str = "appSettings";
/// Boolean marker gating the one-shot migration. Lives in the lightweight store only.
pub const MIGRATION_MARKER: &str = "sqlite_migration_completed";

/// Non-namespaced keys copied by the migration coordinator.
pub const WELL_KNOWN_KEYS: [&str; 4] = [USER_DATA, AUTH_TOKEN, APP_SETTINGS, REGISTERED_USERS];

/// Per-user record families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Namespace {
    Inventory,
    Activities,
    Categories,
    Movements,
}

impl Namespace {
    pub const ALL: [Namespace; 4] = [
        Namespace::Inventory,
        Namespace::Activities,
        Namespace::Categories,
        Namespace::Movements,
    ];

    pub fn prefix(self) -> &'static str {
        match self {
            Namespace::Inventory => "inventory_",
            Namespace::Activities => "activities_",
            Namespace::Categories => "categories_",
            Namespace::Movements => "movements_",
        }
    }

    /// Composes the key for `user_id` in this namespace.
    pub fn key(self, user_id: &str) -> String {
        format!("{}{}", self.prefix(), user_id)
    }

    fn from_prefix_name(name: &str) -> Option<Self> {
        match name {
            "inventory" => Some(Namespace::Inventory),
            "activities" => Some(Namespace::Activities),
            "categories" => Some(Namespace::Categories),
            "movements" => Some(Namespace::Movements),
            _ => None,
        }
    }
}

fn namespaced_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        // user ids are arbitrary text, line breaks included
        Regex::new(r"(?s)^(inventory|activities|categories|movements)_(.*)$")
            .unwrap_or_else(|e| panic!("namespaced key pattern is invalid: {}", e))
    })
}

/// Splits a namespaced key into its namespace and user id.
///
/// The user id may be empty (`inventory_` is still a namespaced key).
pub fn parse_namespaced(key: &str) -> Option<(Namespace, &str)> {
    let captures = namespaced_pattern().captures(key)?;
    let namespace = Namespace::from_prefix_name(captures.get(1)?.as_str())?;
    let user_id = captures.get(2).map(|m| m.as_str()).unwrap_or_default();
    Some((namespace, user_id))
}

pub fn is_namespaced(key: &str) -> bool {
    parse_namespaced(key).is_some()
}

/// Whether the migration coordinator copies `key` into the durable backend.
pub fn is_migratable(key: &str) -> bool {
    WELL_KNOWN_KEYS.contains(&key) || is_namespaced(key)
}
