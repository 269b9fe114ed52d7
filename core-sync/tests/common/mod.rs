//! Fakes shared by the sync integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result as BridgeResult},
    http::{HttpClient, HttpRequest, HttpResponse},
    jobs::{JobId, JobQueueHost, JobRequest, JobState, UploadJob},
    library::{AssetPayload, AssetRef, MediaLibrary},
    notification::UserNotifier,
    storage::InMemorySettingsStore,
    time::ManualClock,
};
use bytes::Bytes;
use chrono::{DateTime, Duration, TimeZone, Utc};
use core_runtime::events::EventBus;
use core_sync::{
    BackgroundSyncController, Credentials, ManualSyncDriver, MultipartEncoder, StaticCredentials,
    SyncTracker, UploadClient,
};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

pub const SERVER: &str = "https://photos.example.com/api";

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
}

/// Asset created `secs` seconds after [`t0`]
pub fn asset(id: &str, secs: i64) -> AssetRef {
    AssetRef::new(id, t0() + Duration::seconds(secs)).with_filename(format!("{}.jpg", id))
}

pub fn credentials() -> Credentials {
    Credentials::new(SERVER, "key")
}

/// Library honoring the created-after contract
#[derive(Default)]
pub struct FakeLibrary {
    assets: Mutex<Vec<AssetRef>>,
    unreadable: Mutex<HashSet<String>>,
}

impl FakeLibrary {
    pub fn new(assets: Vec<AssetRef>) -> Self {
        Self {
            assets: Mutex::new(assets),
            unreadable: Mutex::new(HashSet::new()),
        }
    }

    pub fn make_unreadable(&self, id: &str) {
        self.unreadable.lock().unwrap().insert(id.to_string());
    }

    pub fn remove(&self, id: &str) {
        self.assets.lock().unwrap().retain(|a| a.id != id);
    }
}

#[async_trait]
impl MediaLibrary for FakeLibrary {
    async fn assets_created_after(&self, since: DateTime<Utc>) -> BridgeResult<Vec<AssetRef>> {
        Ok(self
            .assets
            .lock()
            .unwrap()
            .iter()
            .filter(|a| a.created_at > since)
            .cloned()
            .collect())
    }

    async fn existing_ids(&self) -> BridgeResult<HashSet<String>> {
        Ok(self.assets.lock().unwrap().iter().map(|a| a.id.clone()).collect())
    }

    async fn load_payload(&self, asset: &AssetRef) -> BridgeResult<AssetPayload> {
        if self.unreadable.lock().unwrap().contains(&asset.id) {
            return Err(BridgeError::NotFound(format!("{} not downloadable", asset.id)));
        }
        Ok(AssetPayload {
            data: Bytes::from(format!("bytes of {}", asset.id)),
            mime_type: None,
        })
    }
}

/// HTTP client answering with scripted statuses, 201 once the script runs out
#[derive(Default)]
pub struct ScriptedHttp {
    statuses: Mutex<VecDeque<u16>>,
    calls: AtomicUsize,
    cancel_after: Mutex<Option<(usize, CancellationToken)>>,
}

impl ScriptedHttp {
    pub fn new(statuses: impl IntoIterator<Item = u16>) -> Self {
        Self {
            statuses: Mutex::new(statuses.into_iter().collect()),
            ..Default::default()
        }
    }

    /// Cancel `token` while serving the `call`-th request (1-based).
    pub fn cancel_during(&self, call: usize, token: CancellationToken) {
        *self.cancel_after.lock().unwrap() = Some((call, token));
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HttpClient for ScriptedHttp {
    async fn execute(&self, _request: HttpRequest) -> BridgeResult<HttpResponse> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some((at, token)) = self.cancel_after.lock().unwrap().as_ref() {
            if *at == call {
                token.cancel();
            }
        }
        let status = self.statuses.lock().unwrap().pop_front().unwrap_or(201);
        Ok(HttpResponse {
            status,
            headers: HashMap::new(),
            body: Bytes::new(),
        })
    }
}

/// Job queue with an in-flight ceiling. Transfers only finish when a test
/// calls [`complete`](Self::complete) or [`fail`](Self::fail).
pub struct FakeJobQueue {
    ceiling: usize,
    jobs: Mutex<Vec<UploadJob>>,
    pub created: Mutex<Vec<JobRequest>>,
    pub resubmitted: Mutex<Vec<JobId>>,
    pub acknowledged: Mutex<Vec<JobId>>,
    calls: AtomicUsize,
    fail_acks: AtomicBool,
    cancel_on_create: Mutex<Option<(usize, CancellationToken)>>,
    cancel_on_resubmit: Mutex<Option<(usize, CancellationToken)>>,
    hold: Mutex<Option<CreateGate>>,
}

/// Parks `create_job` calls until the test releases them
#[derive(Clone)]
pub struct CreateGate {
    pub entered: Arc<Semaphore>,
    pub release: Arc<Semaphore>,
}

impl FakeJobQueue {
    pub fn new(ceiling: usize) -> Self {
        Self {
            ceiling,
            jobs: Mutex::new(Vec::new()),
            created: Mutex::new(Vec::new()),
            resubmitted: Mutex::new(Vec::new()),
            acknowledged: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
            fail_acks: AtomicBool::new(false),
            cancel_on_create: Mutex::new(None),
            cancel_on_resubmit: Mutex::new(None),
            hold: Mutex::new(None),
        }
    }

    /// Make every `acknowledge_job` call fail
    pub fn fail_acknowledgements(&self) {
        self.fail_acks.store(true, Ordering::SeqCst);
    }

    /// Cancel `token` once the `n`-th job has been created (1-based).
    pub fn cancel_after_create(&self, n: usize, token: CancellationToken) {
        *self.cancel_on_create.lock().unwrap() = Some((n, token));
    }

    /// Cancel `token` once the `n`-th job has been resubmitted (1-based).
    pub fn cancel_after_resubmit(&self, n: usize, token: CancellationToken) {
        *self.cancel_on_resubmit.lock().unwrap() = Some((n, token));
    }

    /// Park every `create_job` call until `release` has a permit for it.
    /// Each parked call adds one permit to `entered`.
    pub fn hold_creates(&self) -> CreateGate {
        let gate = CreateGate {
            entered: Arc::new(Semaphore::new(0)),
            release: Arc::new(Semaphore::new(0)),
        };
        *self.hold.lock().unwrap() = Some(gate.clone());
        gate
    }

    pub fn insert(&self, job: UploadJob) {
        self.jobs.lock().unwrap().push(job);
    }

    pub fn complete_all(&self) {
        for job in self.jobs.lock().unwrap().iter_mut() {
            if job.state == JobState::Queued {
                job.state = JobState::Acknowledge;
            }
        }
    }

    pub fn fail(&self, asset_id: &str) {
        for job in self.jobs.lock().unwrap().iter_mut() {
            if job.asset_id.as_deref() == Some(asset_id) {
                job.state = JobState::Retry;
            }
        }
    }

    pub fn jobs(&self) -> Vec<UploadJob> {
        self.jobs.lock().unwrap().clone()
    }

    pub fn created_assets(&self) -> Vec<String> {
        self.created
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.asset_id.clone())
            .collect()
    }

    /// Calls of any kind made against the queue
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn with_state(&self, state: JobState) -> Vec<UploadJob> {
        self.jobs
            .lock()
            .unwrap()
            .iter()
            .filter(|j| j.state == state)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl JobQueueHost for FakeJobQueue {
    async fn retry_eligible_jobs(&self) -> BridgeResult<Vec<UploadJob>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.with_state(JobState::Retry))
    }

    async fn completed_jobs(&self) -> BridgeResult<Vec<UploadJob>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.with_state(JobState::Acknowledge))
    }

    async fn active_jobs(&self) -> BridgeResult<Vec<UploadJob>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.jobs())
    }

    async fn create_job(&self, request: JobRequest) -> BridgeResult<JobId> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let gate = self.hold.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.entered.add_permits(1);
            gate.release.acquire().await.unwrap().forget();
        }

        let mut jobs = self.jobs.lock().unwrap();
        if jobs.len() >= self.ceiling {
            return Err(BridgeError::LimitExceeded(format!(
                "{} jobs in flight",
                jobs.len()
            )));
        }
        let id = JobId::new();
        jobs.push(UploadJob {
            id: id.clone(),
            asset_id: Some(request.asset_id.clone()),
            url: request.url.clone(),
            state: JobState::Queued,
            attempts: 1,
        });
        let mut created = self.created.lock().unwrap();
        created.push(request);
        cancel_at(&self.cancel_on_create, created.len());
        Ok(id)
    }

    async fn resubmit_job(&self, job: &UploadJob) -> BridgeResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut jobs = self.jobs.lock().unwrap();
        let stored = jobs
            .iter_mut()
            .find(|j| j.id == job.id)
            .ok_or_else(|| BridgeError::NotFound(job.id.to_string()))?;
        stored.state = JobState::Queued;
        stored.attempts += 1;
        let mut resubmitted = self.resubmitted.lock().unwrap();
        resubmitted.push(job.id.clone());
        cancel_at(&self.cancel_on_resubmit, resubmitted.len());
        Ok(())
    }

    async fn acknowledge_job(&self, job: &UploadJob) -> BridgeResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_acks.load(Ordering::SeqCst) {
            return Err(BridgeError::OperationFailed(format!(
                "cannot release job {}",
                job.id
            )));
        }
        self.jobs.lock().unwrap().retain(|j| j.id != job.id);
        self.acknowledged.lock().unwrap().push(job.id.clone());
        Ok(())
    }
}

fn cancel_at(hook: &Mutex<Option<(usize, CancellationToken)>>, count: usize) {
    if let Some((at, token)) = hook.lock().unwrap().as_ref() {
        if *at == count {
            token.cancel();
        }
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub messages: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl UserNotifier for RecordingNotifier {
    async fn notify(&self, title: &str, body: &str) -> BridgeResult<()> {
        self.messages
            .lock()
            .unwrap()
            .push((title.to_string(), body.to_string()));
        Ok(())
    }
}

/// Tracker over an in-memory store with tracking enabled at [`t0`]
pub async fn enabled_tracker() -> Arc<SyncTracker> {
    let clock = Arc::new(ManualClock::new(t0()));
    let tracker = Arc::new(SyncTracker::new(
        Arc::new(InMemorySettingsStore::new()),
        clock,
    ));
    tracker.enable_tracking().await.unwrap();
    tracker
}

pub fn upload_client(http: Arc<dyn HttpClient>) -> Arc<UploadClient> {
    Arc::new(UploadClient::new(http, MultipartEncoder::new("test-device")))
}

pub fn manual_driver(
    tracker: Arc<SyncTracker>,
    library: Arc<FakeLibrary>,
    http: Arc<dyn HttpClient>,
    credentials: Credentials,
    bus: EventBus,
) -> ManualSyncDriver {
    ManualSyncDriver::new(
        tracker,
        library,
        upload_client(http),
        Arc::new(StaticCredentials(credentials)),
        bus,
    )
}

pub fn controller(
    tracker: Arc<SyncTracker>,
    library: Arc<FakeLibrary>,
    jobs: Arc<FakeJobQueue>,
    notifier: Option<Arc<RecordingNotifier>>,
    max_job_attempts: u32,
) -> BackgroundSyncController {
    BackgroundSyncController::new(
        tracker,
        library,
        jobs,
        upload_client(Arc::new(ScriptedHttp::default())),
        Arc::new(StaticCredentials(credentials())),
        notifier.map(|n| n as Arc<dyn UserNotifier>),
        EventBus::new(64),
        max_job_attempts,
    )
}
