//! # Core Configuration Module
//!
//! Provides configuration management for the asset sync core.
//!
//! ## Overview
//!
//! The configuration system uses a builder pattern to construct a `SyncConfig`
//! instance that holds all necessary dependencies and settings. It enforces
//! fail-fast validation so that every required bridge is present before the
//! service starts.
//!
//! ## Required Dependencies
//!
//! - `SettingsStore` - Durable tracker state shared with background runs
//! - `SecureStore` - API key persistence
//! - `HttpClient` - Uploads and connectivity probes
//! - `MediaLibrary` - Source of assets
//!
//! ## Optional Dependencies
//!
//! - `JobQueueHost` - Host transfer queue (required for background sync)
//! - `BackgroundExecutor` - Periodic cycle trigger (required for background sync)
//! - `UserNotifier` - Batched user notifications
//! - `Clock` - Time source (defaults to the system clock)
//!
//! When the `desktop-shims` feature is enabled, desktop-ready defaults are
//! injected for every missing bridge.
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::SyncConfig;
//!
//! let config = SyncConfig::builder()
//!     .server_url("https://photos.example.com/api")
//!     .api_key("abc123")
//!     .state_path("/var/lib/asset-sync/settings.db")
//!     .build()?;
//! ```
//!
//! ## Error Handling
//!
//! Missing capabilities produce [`Error::CapabilityMissing`] with a message
//! naming what to inject on each platform. Invalid values produce
//! [`Error::Config`].

use crate::error::{Error, Result};
use bridge_traits::{
    BackgroundExecutor, Clock, HttpClient, JobQueueHost, MediaLibrary, SecureStore,
    SettingsStore, SystemClock, UserNotifier,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Device identifier sent with every upload
pub const DEFAULT_DEVICE_ID: &str = "asset-sync-rs";

/// Secure store key holding the server API key
pub const API_KEY_SECRET: &str = "server_api_key";

/// Settings key holding a server URL set at runtime
pub const SERVER_URL_SETTING: &str = "server_url";

/// Default spacing between background cycles
pub const DEFAULT_BACKGROUND_INTERVAL: Duration = Duration::from_secs(15 * 60);

/// Attempts a background job gets before its asset is recorded as failed
pub const DEFAULT_MAX_JOB_ATTEMPTS: u32 = 3;

/// Feature flags control optional functionality.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureFlags {
    /// Run upload cycles through the host job queue (requires JobQueueHost
    /// and BackgroundExecutor)
    pub enable_background_sync: bool,

    /// Drop tracker entries for deleted assets when the service starts
    pub prune_on_start: bool,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            enable_background_sync: false,
            prune_on_start: true,
        }
    }
}

/// Core configuration for the asset sync service.
///
/// Use [`SyncConfigBuilder`] to construct instances.
#[derive(Clone)]
pub struct SyncConfig {
    /// Base URL of the asset server, e.g. `https://photos.example.com/api`
    pub server_url: Option<String>,

    /// Static API key. When absent the key is read from the secure store.
    pub api_key: Option<String>,

    /// Identifier of this client type, sent as `deviceId`
    pub device_id: String,

    /// Location of the durable settings database
    pub state_path: PathBuf,

    /// Spacing between background cycles
    pub background_interval: Duration,

    /// Transfer attempts before a background job's asset is marked failed
    pub max_job_attempts: u32,

    /// Capacity of the event bus buffer
    pub event_buffer_size: usize,

    pub http_client: Arc<dyn HttpClient>,
    pub settings_store: Arc<dyn SettingsStore>,
    pub secure_store: Arc<dyn SecureStore>,
    pub media_library: Arc<dyn MediaLibrary>,
    pub job_queue: Option<Arc<dyn JobQueueHost>>,
    pub background_executor: Option<Arc<dyn BackgroundExecutor>>,
    pub notifier: Option<Arc<dyn UserNotifier>>,
    pub clock: Arc<dyn Clock>,

    pub features: FeatureFlags,
}

impl std::fmt::Debug for SyncConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncConfig")
            .field("server_url", &self.server_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("device_id", &self.device_id)
            .field("state_path", &self.state_path)
            .field("background_interval", &self.background_interval)
            .field("max_job_attempts", &self.max_job_attempts)
            .field("event_buffer_size", &self.event_buffer_size)
            .field("http_client", &"HttpClient { ... }")
            .field("settings_store", &"SettingsStore { ... }")
            .field("secure_store", &"SecureStore { ... }")
            .field("media_library", &"MediaLibrary { ... }")
            .field(
                "job_queue",
                &self.job_queue.as_ref().map(|_| "JobQueueHost { ... }"),
            )
            .field(
                "background_executor",
                &self
                    .background_executor
                    .as_ref()
                    .map(|_| "BackgroundExecutor { ... }"),
            )
            .field(
                "notifier",
                &self.notifier.as_ref().map(|_| "UserNotifier { ... }"),
            )
            .field("features", &self.features)
            .finish()
    }
}

impl SyncConfig {
    pub fn builder() -> SyncConfigBuilder {
        SyncConfigBuilder::default()
    }

    /// Validates the configuration and returns an error if invalid.
    ///
    /// This checks:
    /// - The server URL, when given, is an absolute http(s) URL
    /// - Device id is not empty
    /// - Background interval and event buffer are non-zero
    /// - Background sync has the bridges it needs
    pub fn validate(&self) -> Result<()> {
        if let Some(server_url) = &self.server_url {
            validate_server_url(server_url)?;
        }

        if self.device_id.trim().is_empty() {
            return Err(Error::Config("Device id cannot be empty".to_string()));
        }

        if self.background_interval.is_zero() {
            return Err(Error::Config(
                "Background interval must be greater than zero".to_string(),
            ));
        }

        if self.max_job_attempts == 0 {
            return Err(Error::Config(
                "Max job attempts must be at least 1".to_string(),
            ));
        }

        if self.event_buffer_size == 0 {
            return Err(Error::Config(
                "Event buffer size must be greater than zero".to_string(),
            ));
        }

        if self.features.enable_background_sync {
            if self.job_queue.is_none() {
                return Err(Error::Config(
                    "Background sync enabled but no JobQueueHost provided. \
                     Disable the feature or inject a JobQueueHost implementation."
                        .to_string(),
                ));
            }
            if self.background_executor.is_none() {
                return Err(Error::Config(
                    "Background sync enabled but no BackgroundExecutor provided. \
                     Disable the feature or inject a BackgroundExecutor implementation."
                        .to_string(),
                ));
            }
        }

        Ok(())
    }
}

/// Check that a server URL parses and uses http or https.
pub fn validate_server_url(server_url: &str) -> Result<Url> {
    let url = Url::parse(server_url.trim())
        .map_err(|e| Error::Config(format!("Invalid server URL '{}': {}", server_url, e)))?;

    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(Error::Config(format!(
            "Server URL must use http or https, got '{}'",
            other
        ))),
    }
}

#[cfg(not(feature = "desktop-shims"))]
fn missing(capability: &str, purpose: &str, desktop_default: &str, mobile: &str) -> Error {
    Error::CapabilityMissing {
        capability: capability.to_string(),
        message: format!(
            "{} implementation is required for {}. \
             Desktop: enable the 'desktop-shims' feature to use {}. \
             Mobile: inject {}.",
            capability, purpose, desktop_default, mobile
        ),
    }
}

#[cfg(feature = "desktop-shims")]
fn provide_default_http_client() -> Result<Arc<dyn HttpClient>> {
    Ok(Arc::new(bridge_desktop::ReqwestHttpClient::new()))
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_http_client() -> Result<Arc<dyn HttpClient>> {
    Err(missing(
        "HttpClient",
        "uploads",
        "ReqwestHttpClient",
        "a URLSession/OkHttp adapter",
    ))
}

#[cfg(feature = "desktop-shims")]
fn provide_default_secure_store() -> Result<Arc<dyn SecureStore>> {
    Ok(Arc::new(bridge_desktop::KeyringSecureStore::new()))
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_secure_store() -> Result<Arc<dyn SecureStore>> {
    Err(missing(
        "SecureStore",
        "API key persistence",
        "KeyringSecureStore",
        "platform-native secure storage (Keychain/Keystore)",
    ))
}

#[cfg(feature = "desktop-shims")]
fn provide_default_media_library() -> Result<Arc<dyn MediaLibrary>> {
    bridge_desktop::DirectoryMediaLibrary::pictures()
        .map(|library| Arc::new(library) as Arc<dyn MediaLibrary>)
        .ok_or_else(|| Error::CapabilityMissing {
            capability: "MediaLibrary".to_string(),
            message: "No Pictures directory found on this system. \
                      Inject a DirectoryMediaLibrary pointing at your photo folder."
                .to_string(),
        })
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_media_library() -> Result<Arc<dyn MediaLibrary>> {
    Err(missing(
        "MediaLibrary",
        "asset discovery",
        "DirectoryMediaLibrary",
        "a Photos/MediaStore adapter",
    ))
}

#[cfg(feature = "desktop-shims")]
fn provide_default_settings_store(state_path: &std::path::Path) -> Result<Arc<dyn SettingsStore>> {
    use bridge_desktop::SqliteSettingsStore;
    use std::thread;
    use tokio::runtime::{Builder, Handle};

    let init_store = |path: PathBuf| -> Result<_> {
        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| {
                Error::Internal(format!(
                    "Failed to create Tokio runtime for default settings store: {}",
                    e
                ))
            })?;

        runtime
            .block_on(SqliteSettingsStore::new(path))
            .map_err(|e| {
                Error::Internal(format!("Failed to initialize default SettingsStore: {}", e))
            })
    };

    // block_on panics inside a runtime, so build on a plain thread there
    let store = match Handle::try_current() {
        Ok(_) => {
            let path = state_path.to_path_buf();
            thread::spawn(move || init_store(path))
                .join()
                .map_err(|_| {
                    Error::Internal(
                        "Worker thread panicked while creating default SettingsStore".to_string(),
                    )
                })??
        }
        Err(_) => init_store(state_path.to_path_buf())?,
    };

    Ok(Arc::new(store))
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_settings_store(_state_path: &std::path::Path) -> Result<Arc<dyn SettingsStore>> {
    Err(missing(
        "SettingsStore",
        "durable sync state",
        "SqliteSettingsStore",
        "an app-group UserDefaults/DataStore adapter",
    ))
}

#[cfg(feature = "desktop-shims")]
fn provide_default_job_queue(http_client: &Arc<dyn HttpClient>) -> Option<Arc<dyn JobQueueHost>> {
    Some(Arc::new(bridge_desktop::InProcessJobQueue::new(Arc::clone(
        http_client,
    ))))
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_job_queue(_http_client: &Arc<dyn HttpClient>) -> Option<Arc<dyn JobQueueHost>> {
    None
}

#[cfg(feature = "desktop-shims")]
fn provide_default_background_executor() -> Option<Arc<dyn BackgroundExecutor>> {
    Some(Arc::new(bridge_desktop::TokioBackgroundExecutor::new()))
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_background_executor() -> Option<Arc<dyn BackgroundExecutor>> {
    None
}

#[cfg(feature = "desktop-shims")]
fn provide_default_notifier() -> Option<Arc<dyn UserNotifier>> {
    Some(Arc::new(bridge_desktop::LogNotifier::new()))
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_notifier() -> Option<Arc<dyn UserNotifier>> {
    None
}

#[cfg(feature = "desktop-shims")]
fn default_state_path() -> PathBuf {
    bridge_desktop::SqliteSettingsStore::default_path()
}

#[cfg(not(feature = "desktop-shims"))]
fn default_state_path() -> PathBuf {
    PathBuf::from("asset-sync").join("settings.db")
}

/// Builder for constructing [`SyncConfig`] instances.
#[derive(Default)]
pub struct SyncConfigBuilder {
    server_url: Option<String>,
    api_key: Option<String>,
    device_id: Option<String>,
    state_path: Option<PathBuf>,
    background_interval: Option<Duration>,
    max_job_attempts: Option<u32>,
    event_buffer_size: Option<usize>,
    http_client: Option<Arc<dyn HttpClient>>,
    settings_store: Option<Arc<dyn SettingsStore>>,
    secure_store: Option<Arc<dyn SecureStore>>,
    media_library: Option<Arc<dyn MediaLibrary>>,
    job_queue: Option<Arc<dyn JobQueueHost>>,
    background_executor: Option<Arc<dyn BackgroundExecutor>>,
    notifier: Option<Arc<dyn UserNotifier>>,
    clock: Option<Arc<dyn Clock>>,
    features: FeatureFlags,
}

impl SyncConfigBuilder {
    /// Sets the server base URL.
    ///
    /// ```
    /// use core_runtime::config::SyncConfig;
    ///
    /// let builder = SyncConfig::builder()
    ///     .server_url("https://photos.example.com/api");
    /// ```
    pub fn server_url(mut self, url: impl Into<String>) -> Self {
        self.server_url = Some(url.into());
        self
    }

    /// Sets a static API key. Never logged.
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Overrides the `deviceId` sent with uploads.
    ///
    /// Default: `asset-sync-rs`
    pub fn device_id(mut self, device_id: impl Into<String>) -> Self {
        self.device_id = Some(device_id.into());
        self
    }

    /// Sets where the default SQLite settings store lives.
    ///
    /// Ignored when a settings store is injected.
    pub fn state_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.state_path = Some(path.into());
        self
    }

    /// Default: 15 minutes
    pub fn background_interval(mut self, interval: Duration) -> Self {
        self.background_interval = Some(interval);
        self
    }

    /// Default: 3
    pub fn max_job_attempts(mut self, attempts: u32) -> Self {
        self.max_job_attempts = Some(attempts);
        self
    }

    /// Default: 100 events
    pub fn event_buffer_size(mut self, size: usize) -> Self {
        self.event_buffer_size = Some(size);
        self
    }

    pub fn http_client(mut self, client: Arc<dyn HttpClient>) -> Self {
        self.http_client = Some(client);
        self
    }

    pub fn settings_store(mut self, store: Arc<dyn SettingsStore>) -> Self {
        self.settings_store = Some(store);
        self
    }

    pub fn secure_store(mut self, store: Arc<dyn SecureStore>) -> Self {
        self.secure_store = Some(store);
        self
    }

    pub fn media_library(mut self, library: Arc<dyn MediaLibrary>) -> Self {
        self.media_library = Some(library);
        self
    }

    pub fn job_queue(mut self, queue: Arc<dyn JobQueueHost>) -> Self {
        self.job_queue = Some(queue);
        self
    }

    pub fn background_executor(mut self, executor: Arc<dyn BackgroundExecutor>) -> Self {
        self.background_executor = Some(executor);
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn UserNotifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Enables or disables background sync.
    ///
    /// Requires a `JobQueueHost` and a `BackgroundExecutor`.
    ///
    /// Default: false
    pub fn enable_background_sync(mut self, enabled: bool) -> Self {
        self.features.enable_background_sync = enabled;
        self
    }

    /// Default: true
    pub fn prune_on_start(mut self, enabled: bool) -> Self {
        self.features.prune_on_start = enabled;
        self
    }

    pub fn features(mut self, features: FeatureFlags) -> Self {
        self.features = features;
        self
    }

    /// Builds the final `SyncConfig` instance.
    ///
    /// Returns an error if a required bridge is missing and no desktop default
    /// is available, or if any value is invalid.
    pub fn build(self) -> Result<SyncConfig> {
        let state_path = self.state_path.unwrap_or_else(default_state_path);

        let http_client = match self.http_client {
            Some(client) => client,
            None => provide_default_http_client()?,
        };

        let secure_store = match self.secure_store {
            Some(store) => store,
            None => provide_default_secure_store()?,
        };

        let media_library = match self.media_library {
            Some(library) => library,
            None => provide_default_media_library()?,
        };

        let settings_store = match self.settings_store {
            Some(store) => store,
            None => provide_default_settings_store(&state_path)?,
        };

        let background_sync = self.features.enable_background_sync;
        let job_queue = self.job_queue.or_else(|| {
            background_sync
                .then(|| provide_default_job_queue(&http_client))
                .flatten()
        });
        let background_executor = self.background_executor.or_else(|| {
            background_sync
                .then(provide_default_background_executor)
                .flatten()
        });

        let config = SyncConfig {
            server_url: self.server_url,
            api_key: self.api_key,
            device_id: self
                .device_id
                .unwrap_or_else(|| DEFAULT_DEVICE_ID.to_string()),
            state_path,
            background_interval: self
                .background_interval
                .unwrap_or(DEFAULT_BACKGROUND_INTERVAL),
            max_job_attempts: self.max_job_attempts.unwrap_or(DEFAULT_MAX_JOB_ATTEMPTS),
            event_buffer_size: self
                .event_buffer_size
                .unwrap_or(crate::events::DEFAULT_EVENT_BUFFER_SIZE),
            http_client,
            settings_store,
            secure_store,
            media_library,
            job_queue,
            background_executor,
            notifier: self.notifier.or_else(provide_default_notifier),
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            features: self.features,
        };

        config.validate()?;

        Ok(config)
    }
}
