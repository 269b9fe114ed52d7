//! # Background Sync Controller
//!
//! Host-driven upload cycle that delegates transfers to the host job queue.
//!
//! ## Cycle
//!
//! Each [`run_cycle`](BackgroundSyncController::run_cycle) runs three passes in
//! order:
//!
//! 1. **Retry**: resubmit every retry-eligible job. Jobs that used up their
//!    attempts have their asset marked failed and are released instead.
//! 2. **Acknowledge**: mark each completed job's asset uploaded, then release
//!    the job. A failed release never undoes the mark.
//! 3. **Discover**: encode every candidate without a queued job and hand it to
//!    the queue.
//!
//! ## Outcomes
//!
//! - [`CycleOutcome::Completed`]: nothing left to do, or tracking is disabled
//! - [`CycleOutcome::Processing`]: the in-flight ceiling was hit or the host
//!   cancelled; the host should invoke again later
//! - [`CycleOutcome::Failed`]: an unexpected error aborted the cycle
//!
//! Cancellation is checked between items. Tracker writes made before a
//! cancellation stay; the matching acknowledge is retried next cycle.
//! [`notify_cancel`](BackgroundSyncController::notify_cancel) reaches every
//! cycle running at that moment, and only those.

use crate::candidates::candidates;
use crate::credentials::CredentialSource;
use crate::tracker::SyncTracker;
use crate::upload::UploadClient;
use crate::{Result, SyncError};
use bridge_traits::{
    jobs::{JobQueueHost, JobRequest, UploadJob},
    library::MediaLibrary,
    notification::UserNotifier,
};
use core_runtime::events::{CoreEvent, CycleOutcomeKind, EventBus, SyncEvent, UploadEvent};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// What a cycle reports back to the host
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    Completed,
    Processing,
    Failed(String),
}

impl CycleOutcome {
    pub fn kind(&self) -> CycleOutcomeKind {
        match self {
            CycleOutcome::Completed => CycleOutcomeKind::Completed,
            CycleOutcome::Processing => CycleOutcomeKind::Processing,
            CycleOutcome::Failed(_) => CycleOutcomeKind::Failed,
        }
    }
}

enum PassResult {
    Done,
    Interrupted,
}

/// Cancellation seen by one cycle: the controller's generation token or the
/// caller's own token, whichever fires first.
struct CycleCancel {
    generation: CancellationToken,
    external: CancellationToken,
}

impl CycleCancel {
    fn is_cancelled(&self) -> bool {
        self.generation.is_cancelled() || self.external.is_cancelled()
    }
}

pub struct BackgroundSyncController {
    tracker: Arc<SyncTracker>,
    library: Arc<dyn MediaLibrary>,
    jobs: Arc<dyn JobQueueHost>,
    upload_client: Arc<UploadClient>,
    credentials: Arc<dyn CredentialSource>,
    notifier: Option<Arc<dyn UserNotifier>>,
    event_bus: EventBus,
    max_job_attempts: u32,
    /// Parent of every running cycle's token. Replaced after each cancel so
    /// later cycles start clean.
    generation: Mutex<CancellationToken>,
}

impl BackgroundSyncController {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        tracker: Arc<SyncTracker>,
        library: Arc<dyn MediaLibrary>,
        jobs: Arc<dyn JobQueueHost>,
        upload_client: Arc<UploadClient>,
        credentials: Arc<dyn CredentialSource>,
        notifier: Option<Arc<dyn UserNotifier>>,
        event_bus: EventBus,
        max_job_attempts: u32,
    ) -> Self {
        Self {
            tracker,
            library,
            jobs,
            upload_client,
            credentials,
            notifier,
            event_bus,
            max_job_attempts: max_job_attempts.max(1),
            generation: Mutex::new(CancellationToken::new()),
        }
    }

    /// Ask every running cycle to stop at its next checkpoint.
    pub fn notify_cancel(&self) {
        debug!("Background cycle cancellation requested");
        let mut generation = self.generation.lock().unwrap_or_else(|e| e.into_inner());
        generation.cancel();
        *generation = CancellationToken::new();
    }

    /// Run one cycle with a fresh cancellation flag.
    pub async fn run_cycle(&self) -> CycleOutcome {
        self.run_cycle_with_token(CancellationToken::new()).await
    }

    /// Run one cycle observing an externally owned token.
    ///
    /// The cycle stops when either `token` is cancelled or
    /// [`notify_cancel`](Self::notify_cancel) is called. Neither cancels the
    /// other.
    #[instrument(skip_all)]
    pub async fn run_cycle_with_token(&self, token: CancellationToken) -> CycleOutcome {
        let cancel = CycleCancel {
            generation: self
                .generation
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .child_token(),
            external: token,
        };

        let outcome = match self.cycle(&cancel).await {
            Ok(outcome) => outcome,
            Err(e) if e.is_backpressure() => {
                debug!(reason = %e, "Job queue full");
                CycleOutcome::Processing
            }
            Err(e) => {
                error!(error = %e, "Background cycle failed");
                CycleOutcome::Failed(e.to_string())
            }
        };

        info!(outcome = ?outcome, "Background cycle finished");
        let message = match &outcome {
            CycleOutcome::Failed(reason) => Some(reason.clone()),
            _ => None,
        };
        self.emit(CoreEvent::Sync(SyncEvent::CycleFinished {
            outcome: outcome.kind(),
            message,
        }));
        outcome
    }

    async fn cycle(&self, token: &CycleCancel) -> Result<CycleOutcome> {
        if !self.tracker.is_enabled().await? {
            debug!("Tracking disabled, nothing to do");
            return Ok(CycleOutcome::Completed);
        }

        self.retry_pass(token).await?;
        if token.is_cancelled() {
            return Ok(CycleOutcome::Processing);
        }

        if let PassResult::Interrupted = self.acknowledge_pass(token).await? {
            return Ok(CycleOutcome::Processing);
        }
        if token.is_cancelled() {
            return Ok(CycleOutcome::Processing);
        }

        match self.discovery_pass(token).await? {
            PassResult::Done => Ok(CycleOutcome::Completed),
            PassResult::Interrupted => Ok(CycleOutcome::Processing),
        }
    }

    /// Resubmit retry-eligible jobs. Cancellation or a full queue ends the
    /// pass early but not the cycle.
    async fn retry_pass(&self, token: &CycleCancel) -> Result<()> {
        let jobs = self.jobs.retry_eligible_jobs().await?;
        let mut resubmitted = 0u64;

        for job in jobs {
            if token.is_cancelled() {
                debug!("Cancelled during retry pass");
                break;
            }

            let asset_id = job_asset_id(&job)?;
            if job.attempts >= self.max_job_attempts {
                warn!(
                    job_id = %job.id,
                    asset_id = asset_id,
                    attempts = job.attempts,
                    "Giving up on upload job"
                );
                self.tracker.mark_failed(asset_id).await?;
                self.emit(CoreEvent::Upload(UploadEvent::AssetFailed {
                    asset_id: asset_id.to_string(),
                    reason: format!("gave up after {} attempts", job.attempts),
                }));
                self.release(&job).await;
                continue;
            }

            match self.jobs.resubmit_job(&job).await.map_err(SyncError::from) {
                Ok(()) => resubmitted += 1,
                Err(e) if e.is_backpressure() => {
                    debug!("Job queue full, stopping retry pass");
                    break;
                }
                Err(e) => warn!(job_id = %job.id, error = %e, "Failed to resubmit job"),
            }
        }

        if resubmitted > 0 {
            info!(count = resubmitted, "Resubmitted upload jobs");
            self.emit(CoreEvent::Upload(UploadEvent::RetriesResubmitted {
                count: resubmitted,
            }));
        }
        Ok(())
    }

    async fn acknowledge_pass(&self, token: &CycleCancel) -> Result<PassResult> {
        let jobs = self.jobs.completed_jobs().await?;
        let mut acknowledged = 0u64;
        let mut result = PassResult::Done;

        for job in jobs {
            if token.is_cancelled() {
                debug!("Cancelled during acknowledge pass");
                result = PassResult::Interrupted;
                break;
            }

            let asset_id = job_asset_id(&job)?;
            self.tracker.mark_uploaded(asset_id).await?;
            self.release(&job).await;
            acknowledged += 1;
        }

        if acknowledged > 0 {
            info!(count = acknowledged, "Acknowledged completed upload jobs");
            self.emit(CoreEvent::Upload(UploadEvent::JobsAcknowledged {
                count: acknowledged,
            }));
            self.notify(
                "Upload complete",
                &format!("Uploaded {} {}", acknowledged, plural(acknowledged)),
            )
            .await;
        }
        Ok(result)
    }

    async fn discovery_pass(&self, token: &CycleCancel) -> Result<PassResult> {
        let snapshot = self.tracker.snapshot().await?;
        let queued: HashSet<String> = self
            .jobs
            .active_jobs()
            .await?
            .into_iter()
            .filter_map(|job| job.asset_id)
            .collect();

        let found = candidates(self.library.as_ref(), &snapshot, &queued).await?;
        if found.is_empty() {
            debug!("No new assets to enqueue");
            return Ok(PassResult::Done);
        }

        let credentials = self.credentials.credentials().await?;
        let mut enqueued = 0u64;
        let mut result = PassResult::Done;

        for asset in &found {
            if token.is_cancelled() {
                debug!("Cancelled during discovery pass");
                result = PassResult::Interrupted;
                break;
            }

            let payload = match self.library.load_payload(asset).await {
                Ok(payload) => payload,
                Err(e) => {
                    warn!(asset_id = %asset.id, error = %e, "Asset payload unavailable");
                    self.tracker.mark_failed(&asset.id).await?;
                    self.emit(CoreEvent::Upload(UploadEvent::AssetFailed {
                        asset_id: asset.id.clone(),
                        reason: e.to_string(),
                    }));
                    continue;
                }
            };

            let prepared = match self.upload_client.prepare(asset, &payload, &credentials) {
                Ok(prepared) => prepared,
                Err(e) => {
                    self.report_enqueued(enqueued).await;
                    return Err(e);
                }
            };
            let request = JobRequest {
                asset_id: asset.id.clone(),
                url: prepared.url,
                headers: prepared.headers,
                body: prepared.body,
            };

            match self.jobs.create_job(request).await.map_err(SyncError::from) {
                Ok(job_id) => {
                    debug!(asset_id = %asset.id, job_id = %job_id, "Enqueued upload job");
                    enqueued += 1;
                }
                Err(e) if e.is_backpressure() => {
                    debug!(enqueued = enqueued, "Job queue full, pausing discovery");
                    result = PassResult::Interrupted;
                    break;
                }
                Err(e) => {
                    self.report_enqueued(enqueued).await;
                    return Err(e);
                }
            }
        }

        self.report_enqueued(enqueued).await;
        Ok(result)
    }

    async fn report_enqueued(&self, enqueued: u64) {
        if enqueued == 0 {
            return;
        }
        info!(count = enqueued, "Enqueued upload jobs");
        self.emit(CoreEvent::Upload(UploadEvent::JobsEnqueued { count: enqueued }));
        self.notify(
            "Photo backup",
            &format!("Starting upload of {} {}", enqueued, plural(enqueued)),
        )
        .await;
    }

    /// Release a job's slot. Failure is logged; the tracker already holds the
    /// outcome.
    async fn release(&self, job: &UploadJob) {
        if let Err(e) = self.jobs.acknowledge_job(job).await {
            warn!(job_id = %job.id, error = %e, "Failed to acknowledge job");
        }
    }

    async fn notify(&self, title: &str, body: &str) {
        if let Some(notifier) = &self.notifier {
            if let Err(e) = notifier.notify(title, body).await {
                warn!(error = %e, "Failed to deliver notification");
            }
        }
    }

    fn emit(&self, event: CoreEvent) {
        self.event_bus.emit(event).ok();
    }
}

fn job_asset_id(job: &UploadJob) -> Result<&str> {
    job.asset_id
        .as_deref()
        .filter(|id| !id.is_empty())
        .ok_or_else(|| SyncError::MalformedJob(format!("job {} has no asset id", job.id)))
}

fn plural(count: u64) -> &'static str {
    if count == 1 {
        "asset"
    } else {
        "assets"
    }
}
