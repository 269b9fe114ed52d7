//! Storage Abstractions
//!
//! Provides platform-agnostic traits for secure credential storage and
//! key-value settings storage. The settings store is the durable medium shared
//! between the foreground app and background execution contexts, so every
//! read must observe the latest committed write from any context.

use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use tokio::sync::RwLock;

use crate::error::{BridgeError, Result};

/// Secure credential storage trait
///
/// Abstracts secure storage mechanisms:
/// - macOS/iOS: Keychain
/// - Android: Keystore (hardware-backed when available)
/// - Windows: DPAPI
/// - Linux: Secret Service / libsecret
///
/// # Security Requirements
///
/// Implementations MUST:
/// - Encrypt data at rest
/// - Use platform-provided secure storage when available
/// - Never log or expose sensitive data
///
/// # Example
///
/// ```ignore
/// use bridge_traits::storage::SecureStore;
///
/// async fn store_key(store: &dyn SecureStore, key: &str) -> Result<()> {
///     store.set_secret("server_api_key", key.as_bytes()).await?;
///     Ok(())
/// }
/// ```
#[async_trait]
pub trait SecureStore: Send + Sync {
    /// Store a secret value, replacing any previous value
    async fn set_secret(&self, key: &str, value: &[u8]) -> Result<()>;

    /// Retrieve a secret value
    ///
    /// # Returns
    ///
    /// Returns `Ok(None)` if the key doesn't exist.
    async fn get_secret(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Delete a secret
    async fn delete_secret(&self, key: &str) -> Result<()>;

    /// Check if a secret exists without retrieving it
    async fn has_secret(&self, key: &str) -> Result<bool> {
        Ok(self.get_secret(key).await?.is_some())
    }

    /// List all secret keys (without values)
    async fn list_keys(&self) -> Result<Vec<String>>;

    /// Clear all secrets
    ///
    /// Use with caution! This will delete all stored secrets.
    async fn clear_all(&self) -> Result<()>;
}

/// Key-value settings storage trait
///
/// Abstracts platform-specific preferences/settings storage:
/// - iOS: UserDefaults (app group suite for extensions)
/// - Android: SharedPreferences / DataStore
/// - Desktop: SQLite file
///
/// # Example
///
/// ```ignore
/// use bridge_traits::storage::SettingsStore;
///
/// async fn save_preference(store: &dyn SettingsStore) -> Result<()> {
///     store.set_string("enabled_timestamp", "2024-01-01T00:00:00.000Z").await?;
///     store.set_bool("upload_on_wifi_only", true).await?;
///     Ok(())
/// }
/// ```
#[async_trait]
pub trait SettingsStore: Send + Sync {
    /// Store a string value
    async fn set_string(&self, key: &str, value: &str) -> Result<()>;

    /// Retrieve a string value
    async fn get_string(&self, key: &str) -> Result<Option<String>>;

    /// Store a boolean value
    async fn set_bool(&self, key: &str, value: bool) -> Result<()>;

    /// Retrieve a boolean value
    async fn get_bool(&self, key: &str) -> Result<Option<bool>>;

    /// Store an integer value
    async fn set_i64(&self, key: &str, value: i64) -> Result<()>;

    /// Retrieve an integer value
    async fn get_i64(&self, key: &str) -> Result<Option<i64>>;

    /// Delete a setting
    async fn delete(&self, key: &str) -> Result<()>;

    /// Check if a setting exists
    async fn has_key(&self, key: &str) -> Result<bool>;

    /// List all setting keys
    async fn list_keys(&self) -> Result<Vec<String>>;

    /// Clear all settings, including named sets
    async fn clear_all(&self) -> Result<()>;

    /// Add one member to a named set. Returns whether it was newly added.
    ///
    /// Each call must be atomic with respect to every other context sharing
    /// the store: concurrent additions of different members all survive.
    async fn add_to_set(&self, set: &str, member: &str) -> Result<bool>;

    /// Remove one member from a named set. Returns whether it was present.
    async fn remove_from_set(&self, set: &str, member: &str) -> Result<bool>;

    async fn set_contains(&self, set: &str, member: &str) -> Result<bool>;

    /// Members of a named set, sorted
    async fn set_members(&self, set: &str) -> Result<Vec<String>>;

    /// Remove every member of a named set
    async fn clear_set(&self, set: &str) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq)]
enum StoredValue {
    String(String),
    Bool(bool),
    I64(i64),
}

impl StoredValue {
    fn type_name(&self) -> &'static str {
        match self {
            StoredValue::String(_) => "string",
            StoredValue::Bool(_) => "bool",
            StoredValue::I64(_) => "i64",
        }
    }
}

/// Process-local settings store.
///
/// Useful for tests and for hosts that do not need persistence across
/// restarts. Values are typed; reading a key with the wrong accessor fails.
#[derive(Debug, Default)]
pub struct InMemorySettingsStore {
    values: RwLock<HashMap<String, StoredValue>>,
    sets: RwLock<HashMap<String, BTreeSet<String>>>,
}

impl InMemorySettingsStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn get_typed<T>(
        &self,
        key: &str,
        expected: &str,
        extract: impl FnOnce(&StoredValue) -> Option<T>,
    ) -> Result<Option<T>> {
        let values = self.values.read().await;
        match values.get(key) {
            None => Ok(None),
            Some(value) => extract(value).map(Some).ok_or_else(|| {
                BridgeError::Storage(format!(
                    "Type mismatch for key '{}': expected {}, found {}",
                    key,
                    expected,
                    value.type_name()
                ))
            }),
        }
    }
}

#[async_trait]
impl SettingsStore for InMemorySettingsStore {
    async fn set_string(&self, key: &str, value: &str) -> Result<()> {
        self.values
            .write()
            .await
            .insert(key.to_string(), StoredValue::String(value.to_string()));
        Ok(())
    }

    async fn get_string(&self, key: &str) -> Result<Option<String>> {
        self.get_typed(key, "string", |v| match v {
            StoredValue::String(s) => Some(s.clone()),
            _ => None,
        })
        .await
    }

    async fn set_bool(&self, key: &str, value: bool) -> Result<()> {
        self.values
            .write()
            .await
            .insert(key.to_string(), StoredValue::Bool(value));
        Ok(())
    }

    async fn get_bool(&self, key: &str) -> Result<Option<bool>> {
        self.get_typed(key, "bool", |v| match v {
            StoredValue::Bool(b) => Some(*b),
            _ => None,
        })
        .await
    }

    async fn set_i64(&self, key: &str, value: i64) -> Result<()> {
        self.values
            .write()
            .await
            .insert(key.to_string(), StoredValue::I64(value));
        Ok(())
    }

    async fn get_i64(&self, key: &str) -> Result<Option<i64>> {
        self.get_typed(key, "i64", |v| match v {
            StoredValue::I64(i) => Some(*i),
            _ => None,
        })
        .await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.values.write().await.remove(key);
        Ok(())
    }

    async fn has_key(&self, key: &str) -> Result<bool> {
        Ok(self.values.read().await.contains_key(key))
    }

    async fn list_keys(&self) -> Result<Vec<String>> {
        let mut keys: Vec<String> = self.values.read().await.keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }

    async fn clear_all(&self) -> Result<()> {
        self.values.write().await.clear();
        self.sets.write().await.clear();
        Ok(())
    }

    async fn add_to_set(&self, set: &str, member: &str) -> Result<bool> {
        Ok(self
            .sets
            .write()
            .await
            .entry(set.to_string())
            .or_default()
            .insert(member.to_string()))
    }

    async fn remove_from_set(&self, set: &str, member: &str) -> Result<bool> {
        Ok(self
            .sets
            .write()
            .await
            .get_mut(set)
            .is_some_and(|members| members.remove(member)))
    }

    async fn set_contains(&self, set: &str, member: &str) -> Result<bool> {
        Ok(self
            .sets
            .read()
            .await
            .get(set)
            .is_some_and(|members| members.contains(member)))
    }

    async fn set_members(&self, set: &str) -> Result<Vec<String>> {
        Ok(self
            .sets
            .read()
            .await
            .get(set)
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn clear_set(&self, set: &str) -> Result<()> {
        self.sets.write().await.remove(set);
        Ok(())
    }
}

/// Process-local secret store, for tests and headless hosts.
#[derive(Debug, Default)]
pub struct InMemorySecureStore {
    secrets: RwLock<HashMap<String, Vec<u8>>>,
}

impl InMemorySecureStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SecureStore for InMemorySecureStore {
    async fn set_secret(&self, key: &str, value: &[u8]) -> Result<()> {
        self.secrets
            .write()
            .await
            .insert(key.to_string(), value.to_vec());
        Ok(())
    }

    async fn get_secret(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.secrets.read().await.get(key).cloned())
    }

    async fn delete_secret(&self, key: &str) -> Result<()> {
        self.secrets.write().await.remove(key);
        Ok(())
    }

    async fn list_keys(&self) -> Result<Vec<String>> {
        Ok(self.secrets.read().await.keys().cloned().collect())
    }

    async fn clear_all(&self) -> Result<()> {
        self.secrets.write().await.clear();
        Ok(())
    }
}
