//! Server endpoint and API key lookup

use crate::Result;
use async_trait::async_trait;
use bridge_traits::storage::{SecureStore, SettingsStore};
use std::fmt;
use std::sync::Arc;
use tracing::warn;

pub use core_runtime::config::{API_KEY_SECRET, SERVER_URL_SETTING};

/// Base URL and API key used for one run
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub server_url: String,
    pub api_key: String,
}

impl Credentials {
    pub fn new(server_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            api_key: api_key.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("server_url", &self.server_url)
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

/// Source of credentials, read at the start of every run.
///
/// Values may be empty; the upload client rejects them before any request.
#[async_trait]
pub trait CredentialSource: Send + Sync {
    async fn credentials(&self) -> Result<Credentials>;
}

/// Fixed credentials, for tests and single-shot tools
#[derive(Debug, Clone)]
pub struct StaticCredentials(pub Credentials);

#[async_trait]
impl CredentialSource for StaticCredentials {
    async fn credentials(&self) -> Result<Credentials> {
        Ok(self.0.clone())
    }
}

/// Credentials persisted by the host app.
///
/// The server URL comes from the settings store and the key from the secure
/// store. Configured values fill in whatever is missing.
pub struct StoredCredentials {
    settings: Arc<dyn SettingsStore>,
    secure_store: Arc<dyn SecureStore>,
    fallback: Credentials,
}

impl StoredCredentials {
    pub fn new(
        settings: Arc<dyn SettingsStore>,
        secure_store: Arc<dyn SecureStore>,
        fallback: Credentials,
    ) -> Self {
        Self {
            settings,
            secure_store,
            fallback,
        }
    }

    /// Persist a new endpoint and key.
    pub async fn store(&self, credentials: &Credentials) -> Result<()> {
        self.settings
            .set_string(SERVER_URL_SETTING, &credentials.server_url)
            .await?;
        self.secure_store
            .set_secret(API_KEY_SECRET, credentials.api_key.as_bytes())
            .await?;
        Ok(())
    }
}

#[async_trait]
impl CredentialSource for StoredCredentials {
    async fn credentials(&self) -> Result<Credentials> {
        let server_url = self
            .settings
            .get_string(SERVER_URL_SETTING)
            .await?
            .filter(|url| !url.is_empty())
            .unwrap_or_else(|| self.fallback.server_url.clone());

        let api_key = match self.secure_store.get_secret(API_KEY_SECRET).await? {
            Some(raw) => match String::from_utf8(raw) {
                Ok(key) if !key.is_empty() => key,
                Ok(_) => self.fallback.api_key.clone(),
                Err(_) => {
                    warn!("Stored API key is not valid UTF-8, ignoring it");
                    self.fallback.api_key.clone()
                }
            },
            None => self.fallback.api_key.clone(),
        };

        Ok(Credentials {
            server_url,
            api_key,
        })
    }
}
