//! # Desktop Bridge Implementations
//!
//! Default implementations of bridge traits for desktop platforms
//! (macOS, Windows, Linux).
//!
//! ## Overview
//!
//! - `HttpClient` using `reqwest`
//! - `SettingsStore` using a SQLite-backed key-value store
//! - `SecureStore` using the `keyring` crate
//! - `MediaLibrary` over a directory of photos and videos
//! - `JobQueueHost` as an in-process transfer queue
//! - `BackgroundExecutor` using a Tokio interval loop
//! - `UserNotifier` writing to the log
//!
//! ## Feature Flags
//!
//! - `secure-store`: Enable OS keychain integration (default)
//!
//! ## Usage
//!
//! ```ignore
//! use bridge_desktop::{DirectoryMediaLibrary, ReqwestHttpClient, SqliteSettingsStore};
//!
//! #[tokio::main]
//! async fn main() -> bridge_traits::error::Result<()> {
//!     let http_client = ReqwestHttpClient::new();
//!     let settings = SqliteSettingsStore::new(SqliteSettingsStore::default_path()).await?;
//!     let library = DirectoryMediaLibrary::new("/home/me/Pictures");
//!     // Use in core configuration
//!     Ok(())
//! }
//! ```

mod background;
mod http;
mod jobs;
mod library;
mod notification;
mod settings;

#[cfg(feature = "secure-store")]
mod secure_store;

pub use background::TokioBackgroundExecutor;
pub use http::ReqwestHttpClient;
pub use jobs::{InProcessJobQueue, DEFAULT_MAX_IN_FLIGHT};
pub use library::DirectoryMediaLibrary;
pub use notification::LogNotifier;
pub use settings::SqliteSettingsStore;

#[cfg(feature = "secure-store")]
pub use secure_store::{KeyringSecureStore, DEFAULT_SERVICE_NAME};
