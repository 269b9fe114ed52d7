//! # Asset Upload Sync Engine
//!
//! Uploads local media assets to a remote asset server, at most once each,
//! and remembers which uploads failed.
//!
//! ## Components
//!
//! - **Sync Tracker** (`tracker`): Durable watermark plus uploaded and failed sets
//! - **Multipart Encoder** (`multipart`): Fixed-layout `multipart/form-data` bodies
//! - **Upload Client** (`upload`): Single-attempt `POST {base}/assets`
//! - **Connectivity Probe** (`probe`): `GET {base}/api-keys/me` with a self-clearing display slot
//! - **Background Controller** (`lifecycle`): Retry, acknowledge and enqueue passes against a host job queue
//! - **Manual Driver** (`manual`): Sequential, cancellable foreground run with live progress
//!
//! Both drivers share candidate discovery (`candidates`): assets created after
//! the watermark that are neither uploaded nor failed.

pub mod candidates;
pub mod credentials;
pub mod error;
pub mod lifecycle;
pub mod manual;
pub mod multipart;
pub mod probe;
pub mod tracker;
pub mod upload;

pub use candidates::candidates;
pub use credentials::{CredentialSource, Credentials, StaticCredentials, StoredCredentials};
pub use error::{Result, SyncError};
pub use lifecycle::{BackgroundSyncController, CycleOutcome};
pub use manual::{ManualSyncDriver, ManualSyncProgress, ManualSyncSummary};
pub use multipart::{MultipartBody, MultipartEncoder};
pub use probe::{ConnectivityProbe, ProbeBoard, ProbeResult, PROBE_DISPLAY_TTL};
pub use tracker::{AssetStatus, PruneStats, SyncCounts, SyncSnapshot, SyncTracker};
pub use upload::{PreparedUpload, ServerEndpoint, UploadClient, UploadOutcome};
