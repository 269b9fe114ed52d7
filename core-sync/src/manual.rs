//! # Manual Sync Driver
//!
//! Foreground, user-started upload run. Uploads candidates one at a time,
//! records each outcome in the tracker and publishes progress after every
//! item.
//!
//! Only one run may be active. Starting while a run is in progress is a
//! no-op. Cancellation is checked before each item; an upload already in
//! flight is allowed to finish.
//!
//! ```ignore
//! let driver = Arc::new(ManualSyncDriver::new(tracker, library, upload, creds, bus));
//! let mut progress = driver.subscribe();
//! tokio::spawn({
//!     let driver = Arc::clone(&driver);
//!     async move { driver.run().await }
//! });
//! while progress.changed().await.is_ok() {
//!     println!("{:?}", *progress.borrow());
//! }
//! ```

use crate::candidates::candidates;
use crate::credentials::{CredentialSource, Credentials};
use crate::tracker::SyncTracker;
use crate::upload::{validate_credentials, UploadClient, UploadOutcome};
use crate::Result;
use bridge_traits::library::{AssetRef, MediaLibrary};
use core_runtime::events::{CoreEvent, EventBus, SyncEvent, UploadEvent};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Totals for one manual run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManualSyncSummary {
    pub uploaded: u64,
    pub failed: u64,
    pub total: u64,
    pub cancelled: bool,
}

impl ManualSyncSummary {
    pub fn attempted(&self) -> u64 {
        self.uploaded + self.failed
    }

    /// Candidates left untouched
    pub fn remaining(&self) -> u64 {
        self.total.saturating_sub(self.attempted())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ManualSyncProgress {
    Idle,
    /// The last run found no candidates
    NothingToDo,
    Running { uploaded: u64, failed: u64, total: u64 },
    Finished(ManualSyncSummary),
}

pub struct ManualSyncDriver {
    tracker: Arc<SyncTracker>,
    library: Arc<dyn MediaLibrary>,
    upload_client: Arc<UploadClient>,
    credentials: Arc<dyn CredentialSource>,
    event_bus: EventBus,
    progress: watch::Sender<ManualSyncProgress>,
    active: Mutex<Option<CancellationToken>>,
}

/// Clears the active slot when a run ends, however it ends.
struct ActiveRun<'a>(&'a Mutex<Option<CancellationToken>>);

impl Drop for ActiveRun<'_> {
    fn drop(&mut self) {
        *self.0.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }
}

impl ManualSyncDriver {
    pub fn new(
        tracker: Arc<SyncTracker>,
        library: Arc<dyn MediaLibrary>,
        upload_client: Arc<UploadClient>,
        credentials: Arc<dyn CredentialSource>,
        event_bus: EventBus,
    ) -> Self {
        let (progress, _) = watch::channel(ManualSyncProgress::Idle);
        Self {
            tracker,
            library,
            upload_client,
            credentials,
            event_bus,
            progress,
            active: Mutex::new(None),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<ManualSyncProgress> {
        self.progress.subscribe()
    }

    pub fn progress(&self) -> ManualSyncProgress {
        *self.progress.borrow()
    }

    pub fn is_running(&self) -> bool {
        self.active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    /// Stop the active run before its next item. No-op when idle.
    pub fn cancel(&self) {
        if let Some(token) = self.active.lock().unwrap_or_else(|e| e.into_inner()).as_ref() {
            debug!("Manual sync cancellation requested");
            token.cancel();
        }
    }

    /// Run to completion. Returns `Ok(None)` when a run was already active.
    pub async fn run(&self) -> Result<Option<ManualSyncSummary>> {
        self.run_with_token(CancellationToken::new()).await
    }

    /// Like [`run`](Self::run), also stopping when `token` is cancelled.
    pub async fn run_with_token(
        &self,
        token: CancellationToken,
    ) -> Result<Option<ManualSyncSummary>> {
        {
            let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
            if active.is_some() {
                debug!("Manual sync already running");
                return Ok(None);
            }
            *active = Some(token.clone());
        }
        let _active = ActiveRun(&self.active);

        match self.execute(&token).await {
            Ok(summary) => Ok(Some(summary)),
            Err(e) => {
                error!(error = %e, "Manual sync aborted");
                self.progress.send_replace(ManualSyncProgress::Idle);
                Err(e)
            }
        }
    }

    #[instrument(skip_all)]
    async fn execute(&self, token: &CancellationToken) -> Result<ManualSyncSummary> {
        let snapshot = self.tracker.snapshot().await?;
        let found = candidates(self.library.as_ref(), &snapshot, &HashSet::new()).await?;

        if found.is_empty() {
            info!("Nothing to upload");
            self.progress.send_replace(ManualSyncProgress::NothingToDo);
            self.emit(CoreEvent::Sync(SyncEvent::NothingToDo));
            return Ok(ManualSyncSummary::default());
        }

        // Refuse to start rather than mark every asset failed
        let credentials = self.credentials.credentials().await?;
        validate_credentials(&credentials)?;

        let total = found.len() as u64;
        let mut summary = ManualSyncSummary {
            total,
            ..Default::default()
        };
        info!(total = total, "Manual sync started");
        self.publish_running(&summary);
        self.emit(CoreEvent::Sync(SyncEvent::ManualStarted { total }));

        for asset in &found {
            if token.is_cancelled() {
                info!(attempted = summary.attempted(), "Manual sync cancelled");
                summary.cancelled = true;
                break;
            }

            match self.attempt(asset, &credentials).await? {
                UploadOutcome::Success(status) => {
                    self.tracker.mark_uploaded(&asset.id).await?;
                    summary.uploaded += 1;
                    self.emit(CoreEvent::Upload(UploadEvent::AssetUploaded {
                        asset_id: asset.id.clone(),
                        status,
                    }));
                }
                UploadOutcome::Failure(reason) => {
                    self.tracker.mark_failed(&asset.id).await?;
                    summary.failed += 1;
                    self.emit(CoreEvent::Upload(UploadEvent::AssetFailed {
                        asset_id: asset.id.clone(),
                        reason,
                    }));
                }
            }

            self.publish_running(&summary);
            self.emit(CoreEvent::Sync(SyncEvent::ManualProgress {
                uploaded: summary.uploaded,
                failed: summary.failed,
                total,
            }));
        }

        info!(
            uploaded = summary.uploaded,
            failed = summary.failed,
            total = summary.total,
            cancelled = summary.cancelled,
            "Manual sync finished"
        );
        self.progress
            .send_replace(ManualSyncProgress::Finished(summary));
        self.emit(CoreEvent::Sync(SyncEvent::ManualCompleted {
            uploaded: summary.uploaded,
            failed: summary.failed,
            total: summary.total,
            cancelled: summary.cancelled,
        }));
        Ok(summary)
    }

    /// One upload attempt. Payload and encoding problems become failures for
    /// this asset; configuration problems abort the run.
    async fn attempt(
        &self,
        asset: &AssetRef,
        credentials: &Credentials,
    ) -> Result<UploadOutcome> {
        let payload = match self.library.load_payload(asset).await {
            Ok(payload) => payload,
            Err(e) => {
                warn!(asset_id = %asset.id, error = %e, "Asset payload unavailable");
                return Ok(UploadOutcome::Failure(e.to_string()));
            }
        };

        match self.upload_client.upload(asset, &payload, credentials).await {
            Ok(outcome) => Ok(outcome),
            Err(e) if e.is_config() => Err(e),
            Err(e) => {
                error!(asset_id = %asset.id, error = %e, "Could not encode asset");
                Ok(UploadOutcome::Failure(e.to_string()))
            }
        }
    }

    fn publish_running(&self, summary: &ManualSyncSummary) {
        self.progress.send_replace(ManualSyncProgress::Running {
            uploaded: summary.uploaded,
            failed: summary.failed,
            total: summary.total,
        });
    }

    fn emit(&self, event: CoreEvent) {
        self.event_bus.emit(event).ok();
    }
}
