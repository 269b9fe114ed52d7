//! Core service façade and bootstrap helpers.
//!
//! This crate wires host-provided bridge implementations (HTTP, media
//! library, settings, secure storage, job queue) into the sync core and
//! exposes one handle, [`SyncService`], to host applications. Desktop apps
//! typically enable the `desktop-shims` feature (which depends on
//! `bridge-desktop`) so missing bridges are filled in automatically.
//!
//! ```ignore
//! let config = SyncConfig::builder()
//!     .server_url("https://photos.example.com/api")
//!     .media_library(library)
//!     .build()?;
//! let service = bootstrap(config).await?;
//!
//! service.enable_tracking().await?;
//! let summary = service.run_manual_sync().await?;
//! ```

pub mod error;

pub use core_runtime::config::{SyncConfig, SyncConfigBuilder};
pub use core_runtime::events::{CoreEvent, EventStream};
pub use core_sync::{
    AssetStatus, Credentials, CycleOutcome, ManualSyncProgress, ManualSyncSummary, ProbeResult,
    PruneStats, SyncCounts, SyncSnapshot,
};
pub use error::{CoreError, Result};

use bridge_traits::{
    background::{BackgroundExecutor, TaskId},
    library::MediaLibrary,
};
use chrono::{DateTime, Utc};
use core_runtime::events::{ConnectivityEvent, EventBus, SyncEvent};
use core_sync::{
    upload::validate_credentials, BackgroundSyncController, ConnectivityProbe, CredentialSource,
    ManualSyncDriver, MultipartEncoder, ProbeBoard, StoredCredentials, SyncTracker, UploadClient,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[cfg(feature = "desktop-shims")]
use bridge_desktop::TokioBackgroundExecutor;
#[cfg(feature = "desktop-shims")]
use bridge_traits::error::BridgeError;

/// Task id used when registering the background cycle with an executor
pub const BACKGROUND_TASK_ID: &str = "asset-upload-sync";

/// Primary façade exposed to host applications.
///
/// Cheap to clone; clones share the same tracker, drivers and event bus.
#[derive(Clone)]
pub struct SyncService {
    tracker: Arc<SyncTracker>,
    library: Arc<dyn MediaLibrary>,
    credentials: Arc<StoredCredentials>,
    manual: Arc<ManualSyncDriver>,
    background: Option<Arc<BackgroundSyncController>>,
    executor: Option<Arc<dyn BackgroundExecutor>>,
    background_interval: Duration,
    probe: Arc<ConnectivityProbe>,
    board: Arc<ProbeBoard>,
    event_bus: EventBus,
}

/// Build a service and start its housekeeping.
///
/// Prunes tracking state for assets deleted from the library on a spawned
/// task when `prune_on_start` is set. Must be called inside a Tokio runtime.
pub async fn bootstrap(config: SyncConfig) -> Result<SyncService> {
    let prune = config.features.prune_on_start;
    let service = SyncService::new(config)?;
    if prune {
        service.spawn_prune();
    }
    Ok(service)
}

impl SyncService {
    /// Create a new service from a validated configuration.
    pub fn new(config: SyncConfig) -> Result<Self> {
        config.validate()?;
        debug!(config = ?config, "Creating sync service");

        let event_bus = EventBus::new(config.event_buffer_size);
        let tracker = Arc::new(SyncTracker::new(
            Arc::clone(&config.settings_store),
            Arc::clone(&config.clock),
        ));
        let credentials = Arc::new(StoredCredentials::new(
            Arc::clone(&config.settings_store),
            Arc::clone(&config.secure_store),
            Credentials::new(
                config.server_url.clone().unwrap_or_default(),
                config.api_key.clone().unwrap_or_default(),
            ),
        ));
        let upload_client = Arc::new(UploadClient::new(
            Arc::clone(&config.http_client),
            MultipartEncoder::new(config.device_id.clone()),
        ));

        let manual = Arc::new(ManualSyncDriver::new(
            Arc::clone(&tracker),
            Arc::clone(&config.media_library),
            Arc::clone(&upload_client),
            credentials.clone() as Arc<dyn CredentialSource>,
            event_bus.clone(),
        ));

        let background = config.job_queue.as_ref().map(|jobs| {
            Arc::new(BackgroundSyncController::new(
                Arc::clone(&tracker),
                Arc::clone(&config.media_library),
                Arc::clone(jobs),
                Arc::clone(&upload_client),
                credentials.clone() as Arc<dyn CredentialSource>,
                config.notifier.clone(),
                event_bus.clone(),
                config.max_job_attempts,
            ))
        });

        info!(
            device_id = %config.device_id,
            background = background.is_some(),
            "Sync service ready"
        );

        Ok(Self {
            tracker,
            library: Arc::clone(&config.media_library),
            credentials,
            manual,
            background,
            executor: config.background_executor.clone(),
            background_interval: config.background_interval,
            probe: Arc::new(ConnectivityProbe::new(Arc::clone(&config.http_client))),
            board: Arc::new(ProbeBoard::new(Arc::clone(&config.clock))),
            event_bus,
        })
    }

    pub fn subscribe_events(&self) -> EventStream {
        EventStream::new(self.event_bus.subscribe())
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    /// Start tracking from now. Clears the uploaded and failed sets.
    pub async fn enable_tracking(&self) -> Result<DateTime<Utc>> {
        let enabled_at = self.tracker.enable_tracking().await?;
        self.emit(CoreEvent::Sync(SyncEvent::TrackingEnabled { enabled_at }));
        Ok(enabled_at)
    }

    /// Stop tracking. Upload history is kept.
    pub async fn disable_tracking(&self) -> Result<()> {
        self.tracker.disable_tracking().await?;
        self.emit(CoreEvent::Sync(SyncEvent::TrackingDisabled));
        Ok(())
    }

    pub async fn is_tracking_enabled(&self) -> Result<bool> {
        Ok(self.tracker.is_enabled().await?)
    }

    pub async fn status(&self, asset_id: &str) -> Result<AssetStatus> {
        Ok(self.tracker.status(asset_id).await?)
    }

    pub async fn snapshot(&self) -> Result<SyncSnapshot> {
        Ok(self.tracker.snapshot().await?)
    }

    /// Pending, uploaded and failed totals over the assets currently in scope.
    pub async fn counts(&self) -> Result<SyncCounts> {
        let snapshot = self.tracker.snapshot().await?;
        let Some(enabled_at) = snapshot.enabled_at else {
            return Ok(SyncCounts::default());
        };
        let assets = self.library.assets_created_after(enabled_at).await?;
        Ok(snapshot.counts(&assets))
    }

    /// Make every failed asset a candidate again. Returns the ids released.
    pub async fn retry_all(&self) -> Result<Vec<String>> {
        Ok(self.tracker.retry_all().await?)
    }

    pub async fn retry_one(&self, asset_id: &str) -> Result<bool> {
        Ok(self.tracker.retry_one(asset_id).await?)
    }

    /// Drop tracking entries for assets no longer in the library.
    pub async fn prune_deleted(&self) -> Result<PruneStats> {
        let existing = self.library.existing_ids().await?;
        Ok(self.tracker.prune_deleted(&existing).await?)
    }

    fn spawn_prune(&self) {
        let service = self.clone();
        tokio::spawn(async move {
            match service.prune_deleted().await {
                Ok(stats) => debug!(
                    uploaded_removed = stats.uploaded_removed,
                    failed_removed = stats.failed_removed,
                    "Startup prune finished"
                ),
                Err(e) => warn!(error = %e, "Startup prune failed"),
            }
        });
    }

    pub async fn credentials(&self) -> Result<Credentials> {
        Ok(self.credentials.credentials().await?)
    }

    /// Persist a new server URL and API key after checking their shape.
    pub async fn set_server(&self, credentials: Credentials) -> Result<()> {
        validate_credentials(&credentials)?;
        self.credentials.store(&credentials).await?;
        self.board.clear();
        info!(server = %credentials.server_url, "Server settings updated");
        Ok(())
    }

    /// Run a manual sync to completion on the caller's task.
    ///
    /// Returns `Ok(None)` when a run is already active.
    pub async fn run_manual_sync(&self) -> Result<Option<ManualSyncSummary>> {
        Ok(self.manual.run().await?)
    }

    /// Start a manual sync on a spawned task. Follow it with
    /// [`manual_progress`](Self::manual_progress).
    pub fn start_manual_sync(&self) -> JoinHandle<Result<Option<ManualSyncSummary>>> {
        let manual = Arc::clone(&self.manual);
        tokio::spawn(async move { Ok(manual.run().await?) })
    }

    pub fn cancel_manual_sync(&self) {
        self.manual.cancel();
    }

    pub fn is_manual_sync_running(&self) -> bool {
        self.manual.is_running()
    }

    pub fn manual_progress(&self) -> watch::Receiver<ManualSyncProgress> {
        self.manual.subscribe()
    }

    fn controller(&self) -> Result<&Arc<BackgroundSyncController>> {
        self.background
            .as_ref()
            .ok_or_else(|| CoreError::CapabilityMissing {
                capability: "JobQueueHost".to_string(),
                message: "Background sync needs a job queue. \
                          Configure one with SyncConfigBuilder::job_queue."
                    .to_string(),
            })
    }

    /// One background cycle, as invoked by the host's periodic trigger.
    pub async fn run_background_cycle(&self) -> Result<CycleOutcome> {
        Ok(self.controller()?.run_cycle().await)
    }

    /// Like [`run_background_cycle`](Self::run_background_cycle) but stops
    /// when `token` is cancelled.
    pub async fn run_background_cycle_with_token(
        &self,
        token: CancellationToken,
    ) -> Result<CycleOutcome> {
        Ok(self.controller()?.run_cycle_with_token(token).await)
    }

    /// Forward the host's expiration signal to the running cycle.
    pub fn notify_background_cancel(&self) {
        if let Some(controller) = &self.background {
            controller.notify_cancel();
        }
    }

    /// Ask the configured executor to trigger [`BACKGROUND_TASK_ID`] every
    /// `background_interval`. The host routes each trigger to
    /// [`run_background_cycle`](Self::run_background_cycle).
    pub async fn schedule_background(&self) -> Result<TaskId> {
        self.controller()?;
        let executor = self
            .executor
            .as_ref()
            .ok_or_else(|| CoreError::CapabilityMissing {
                capability: "BackgroundExecutor".to_string(),
                message: "No background executor configured.".to_string(),
            })?;
        Ok(executor
            .schedule_task(BACKGROUND_TASK_ID, self.background_interval)
            .await?)
    }

    /// Register the cycle as the handler for [`BACKGROUND_TASK_ID`] on an
    /// in-process executor and schedule it.
    #[cfg(feature = "desktop-shims")]
    pub async fn schedule_background_with(
        &self,
        executor: &TokioBackgroundExecutor,
    ) -> Result<TaskId> {
        let controller = Arc::clone(self.controller()?);
        executor
            .register_task_handler(BACKGROUND_TASK_ID, move |token| {
                let controller = Arc::clone(&controller);
                async move { cycle_as_task(&controller, token).await }
            })
            .await?;
        Ok(executor
            .schedule_task(BACKGROUND_TASK_ID, self.background_interval)
            .await?)
    }

    /// Probe the server and show the result for a few seconds.
    pub async fn check_connectivity(&self) -> ProbeResult {
        let result = match self.credentials.credentials().await {
            Ok(credentials) => self.probe.check(&credentials).await,
            Err(e) => ProbeResult::NotConfigured(e.to_string()),
        };

        let generation = self.board.post(result.clone());
        self.emit(CoreEvent::Connectivity(ConnectivityEvent::ProbeFinished {
            result: result.status(),
            message: result.message(),
        }));

        let board = Arc::clone(&self.board);
        let event_bus = self.event_bus.clone();
        tokio::spawn(async move {
            tokio::time::sleep(board.ttl()).await;
            if board.clear_if_current(generation) {
                event_bus
                    .emit(CoreEvent::Connectivity(ConnectivityEvent::ProbeCleared))
                    .ok();
            }
        });

        result
    }

    /// The probe result on display, if it has not expired.
    pub fn connectivity_status(&self) -> Option<ProbeResult> {
        self.board.current()
    }

    fn emit(&self, event: CoreEvent) {
        self.event_bus.emit(event).ok();
    }
}

/// Adapt a cycle to the executor's task contract. Only a failed cycle is an
/// error; `Processing` waits for the next trigger.
#[cfg(feature = "desktop-shims")]
async fn cycle_as_task(
    controller: &BackgroundSyncController,
    token: CancellationToken,
) -> bridge_traits::error::Result<()> {
    match controller.run_cycle_with_token(token).await {
        CycleOutcome::Failed(reason) => {
            tracing::error!(reason = %reason, "Background task failed");
            Err(BridgeError::OperationFailed(reason))
        }
        outcome => {
            debug!(outcome = ?outcome, "Background task finished");
            Ok(())
        }
    }
}
