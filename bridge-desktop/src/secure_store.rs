//! Secure Credential Storage using OS Keychain

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use bridge_traits::{
    error::{BridgeError, Result},
    storage::SecureStore,
};
use keyring::Entry;
use std::collections::BTreeSet;
use tokio::sync::Mutex;
use tracing::{debug, error, warn};

/// Default keychain service the server API key lives under
pub const DEFAULT_SERVICE_NAME: &str = "asset-sync";

/// Keyring-based secure storage implementation
///
/// Uses platform-specific secure storage:
/// - macOS: Keychain
/// - Windows: Credential Manager (DPAPI)
/// - Linux: Secret Service (libsecret)
///
/// The keyring cannot enumerate entries, so `list_keys` and `clear_all` only
/// see keys touched through this handle.
pub struct KeyringSecureStore {
    service_name: String,
    known_keys: Mutex<BTreeSet<String>>,
}

impl KeyringSecureStore {
    /// Create a new secure store with default service name
    pub fn new() -> Self {
        Self::with_service_name(DEFAULT_SERVICE_NAME)
    }

    /// Create a new secure store with custom service name
    pub fn with_service_name(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            known_keys: Mutex::new(BTreeSet::new()),
        }
    }

    fn get_entry(&self, key: &str) -> Result<Entry> {
        Entry::new(&self.service_name, key).map_err(Self::map_keyring_error)
    }

    fn map_keyring_error(e: keyring::Error) -> BridgeError {
        BridgeError::OperationFailed(format!("Keyring error: {}", e))
    }
}

impl Default for KeyringSecureStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SecureStore for KeyringSecureStore {
    async fn set_secret(&self, key: &str, value: &[u8]) -> Result<()> {
        // Keyring only stores strings
        let encoded = STANDARD.encode(value);

        self.get_entry(key)?
            .set_password(&encoded)
            .map_err(Self::map_keyring_error)?;

        self.known_keys.lock().await.insert(key.to_string());
        debug!(key = key, "Stored secret in keyring");
        Ok(())
    }

    async fn get_secret(&self, key: &str) -> Result<Option<Vec<u8>>> {
        match self.get_entry(key)?.get_password() {
            Ok(encoded) => {
                let decoded = STANDARD.decode(&encoded).map_err(|e| {
                    error!(key = key, error = %e, "Failed to decode secret");
                    BridgeError::OperationFailed(format!("Failed to decode secret: {}", e))
                })?;

                self.known_keys.lock().await.insert(key.to_string());
                Ok(Some(decoded))
            }
            Err(keyring::Error::NoEntry) => {
                debug!(key = key, "Secret not found in keyring");
                Ok(None)
            }
            Err(e) => Err(Self::map_keyring_error(e)),
        }
    }

    async fn delete_secret(&self, key: &str) -> Result<()> {
        let result = match self.get_entry(key)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(Self::map_keyring_error(e)),
        };

        if result.is_ok() {
            self.known_keys.lock().await.remove(key);
            debug!(key = key, "Deleted secret from keyring");
        }
        result
    }

    async fn list_keys(&self) -> Result<Vec<String>> {
        Ok(self.known_keys.lock().await.iter().cloned().collect())
    }

    async fn clear_all(&self) -> Result<()> {
        let keys: Vec<String> = self.known_keys.lock().await.iter().cloned().collect();
        for key in keys {
            if let Err(e) = self.delete_secret(&key).await {
                warn!(key = %key, error = %e, "Failed to clear secret");
                return Err(e);
            }
        }
        Ok(())
    }
}
