//! Session and per-user helpers over the generic key/value API.
//!
//! These compose keys and apply the bounded activity-log rule; all persistence
//! goes through `Storage::set_item`/`get_item`.

use log::{debug, info};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::storage::backend::Backend;
use crate::storage::facade::Storage;
use crate::storage::keys::{Namespace, APP_SETTINGS, AUTH_TOKEN, REGISTERED_USERS, USER_DATA};
use crate::storage::types::AppSettings;

/// Maximum number of entries kept in a user's activity log.
pub const ACTIVITY_LOG_LIMIT: usize = 50;

/// Whether a user record carries a usable identifier.
///
/// Strings must be non-empty and numbers non-zero; `true` is accepted.
/// Object and array ids are rejected on purpose even though they would count
/// as present in a plain truthiness check.
fn has_identifier(user: &Value) -> bool {
    match user.get("id") {
        Some(Value::String(id)) => !id.is_empty(),
        Some(Value::Number(id)) => id.as_f64().map(|n| n != 0.0).unwrap_or(false),
        Some(Value::Bool(flag)) => *flag,
        _ => false,
    }
}

impl<D: Backend> Storage<D> {
    pub async fn set_user_data<T: Serialize + ?Sized>(&self, user: &T) {
        self.set_item(USER_DATA, user).await
    }

    pub async fn get_user_data<T: DeserializeOwned>(&self) -> Option<T> {
        self.get_item(USER_DATA).await
    }

    pub async fn set_auth_token(&self, token: &str) {
        self.set_item(AUTH_TOKEN, token).await
    }

    pub async fn get_auth_token(&self) -> Option<String> {
        self.get_item(AUTH_TOKEN).await
    }

    /// True iff a non-empty auth token and a user record with an identifier both exist.
    pub async fn is_logged_in(&self) -> bool {
        let has_token = self
            .get_auth_token()
            .await
            .map(|token| !token.is_empty())
            .unwrap_or(false);
        let has_user = self
            .get_user_data::<Value>()
            .await
            .map(|user| has_identifier(&user))
            .unwrap_or(false);
        debug!("is_logged_in: token={} user={}", has_token, has_user);
        has_token && has_user
    }

    /// Ends the session by removing `userData` and `authToken` only.
    pub async fn logout(&self) {
        self.remove_item(USER_DATA).await;
        self.remove_item(AUTH_TOKEN).await;
        info!("Session data removed");
    }

    async fn get_list<T: DeserializeOwned>(&self, key: &str) -> Vec<T> {
        self.get_item(key).await.unwrap_or_default()
    }

    pub async fn get_user_inventory<T: DeserializeOwned>(&self, user_id: &str) -> Vec<T> {
        self.get_list(&Namespace::Inventory.key(user_id)).await
    }

    pub async fn set_user_inventory<T: Serialize>(&self, user_id: &str, inventory: &[T]) {
        self.set_item(&Namespace::Inventory.key(user_id), inventory).await
    }

    pub async fn get_user_activities<T: DeserializeOwned>(&self, user_id: &str) -> Vec<T> {
        self.get_list(&Namespace::Activities.key(user_id)).await
    }

    /// Stores at most the first `ACTIVITY_LOG_LIMIT` entries (newest first).
    pub async fn set_user_activities<T: Serialize>(&self, user_id: &str, activities: &[T]) {
        let bounded = &activities[..activities.len().min(ACTIVITY_LOG_LIMIT)];
        self.set_item(&Namespace::Activities.key(user_id), bounded).await
    }

    /// Prepends `activity` to the user's log and truncates it to the limit.
    pub async fn add_user_activity<T: Serialize + DeserializeOwned>(&self, user_id: &str, activity: T) {
        let mut activities: Vec<T> = self.get_user_activities(user_id).await;
        activities.insert(0, activity);
        activities.truncate(ACTIVITY_LOG_LIMIT);
        self.set_user_activities(user_id, &activities).await
    }

    pub async fn get_user_categories<T: DeserializeOwned>(&self, user_id: &str) -> Vec<T> {
        self.get_list(&Namespace::Categories.key(user_id)).await
    }

    pub async fn set_user_categories<T: Serialize>(&self, user_id: &str, categories: &[T]) {
        self.set_item(&Namespace::Categories.key(user_id), categories).await
    }

    pub async fn get_user_movements<T: DeserializeOwned>(&self, user_id: &str) -> Vec<T> {
        self.get_list(&Namespace::Movements.key(user_id)).await
    }

    pub async fn set_user_movements<T: Serialize>(&self, user_id: &str, movements: &[T]) {
        self.set_item(&Namespace::Movements.key(user_id), movements).await
    }

    pub async fn get_registered_users<T: DeserializeOwned>(&self) -> Vec<T> {
        self.get_list(REGISTERED_USERS).await
    }

    pub async fn set_registered_users<T: Serialize>(&self, users: &[T]) {
        self.set_item(REGISTERED_USERS, users).await
    }

    /// Stored settings, or the defaults when absent or undecodable.
    pub async fn get_app_settings(&self) -> AppSettings {
        self.get_item(APP_SETTINGS).await.unwrap_or_default()
    }

    pub async fn set_app_settings(&self, settings: &AppSettings) {
        self.set_item(APP_SETTINGS, settings).await
    }
}
