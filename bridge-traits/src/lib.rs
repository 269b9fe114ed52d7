//! # Host Bridge Traits
//!
//! Platform abstraction traits that must be implemented by each host platform.
//!
//! ## Overview
//!
//! This crate defines the contract between the asset sync core and
//! platform-specific implementations. Each trait represents a capability that
//! the core requires but that must be implemented differently per platform
//! (desktop, iOS, Android).
//!
//! ## Traits
//!
//! ### Networking
//! - [`HttpClient`](http::HttpClient) - Single-attempt async HTTP
//!
//! ### Media & Jobs
//! - [`MediaLibrary`](library::MediaLibrary) - Device photo/video catalog and payload loading
//! - [`JobQueueHost`](jobs::JobQueueHost) - OS-managed upload job queue with an in-flight ceiling
//!
//! ### Security & Storage
//! - [`SecureStore`](storage::SecureStore) - Credential persistence (Keychain/Keystore)
//! - [`SettingsStore`](storage::SettingsStore) - Key-value storage shared by foreground and background
//!
//! ### Platform Integration
//! - [`BackgroundExecutor`](background::BackgroundExecutor) - Periodic task trigger with cancellation
//! - [`UserNotifier`](notification::UserNotifier) - User-facing notifications
//!
//! ### Utilities
//! - [`Clock`](time::Clock) - Time source for deterministic testing
//! - [`LoggerSink`](time::LoggerSink) - Forward structured logs to host logging
//!
//! ## Fail-Fast Strategy
//!
//! The core fails fast with descriptive errors when a required capability is missing:
//!
//! ```ignore
//! let http_client = builder.http_client
//!     .ok_or_else(|| Error::CapabilityMissing {
//!         capability: "HttpClient".to_string(),
//!         message: "No HTTP client implementation provided. \
//!                  Desktop: ensure default feature is enabled. \
//!                  Mobile: inject platform-native adapter.".to_string()
//!     })?;
//! ```
//!
//! ## Error Handling
//!
//! All bridge traits use the [`BridgeError`](error::BridgeError) type. Platform
//! implementations should convert platform-specific errors to `BridgeError`
//! and report a full job queue as [`BridgeError::LimitExceeded`], which the
//! core treats as backpressure rather than failure.
//!
//! ## Thread Safety
//!
//! All bridge traits require `Send + Sync` bounds to support safe concurrent usage
//! across async tasks.

pub mod background;
pub mod error;
pub mod http;
pub mod jobs;
pub mod library;
pub mod notification;
pub mod storage;
pub mod time;

pub use error::BridgeError;

// Re-export commonly used types
pub use background::{BackgroundExecutor, TaskId, TaskStatus};
pub use http::{HttpClient, HttpMethod, HttpRequest, HttpResponse};
pub use jobs::{JobId, JobQueueHost, JobRequest, JobState, UploadJob};
pub use library::{AssetPayload, AssetRef, MediaLibrary, ResourceType};
pub use notification::UserNotifier;
pub use storage::{InMemorySecureStore, InMemorySettingsStore, SecureStore, SettingsStore};
pub use time::{Clock, ConsoleLogger, LogEntry, LogLevel, LoggerSink, ManualClock, SystemClock};
