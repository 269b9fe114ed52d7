//! End-to-end tests for the service façade over in-memory bridges

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result as BridgeResult},
    http::{HttpClient, HttpRequest, HttpResponse},
    jobs::{JobId, JobQueueHost, JobRequest, UploadJob},
    library::{AssetPayload, AssetRef, MediaLibrary},
    storage::{InMemorySecureStore, InMemorySettingsStore},
    time::ManualClock,
};
use bytes::Bytes;
use chrono::{DateTime, Duration, TimeZone, Utc};
use core_runtime::events::{ConnectivityEvent, ProbeStatus};
use core_service::{
    bootstrap, AssetStatus, CoreError, CoreEvent, Credentials, CycleOutcome, ProbeResult,
    SyncConfig, SyncCounts, SyncService,
};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

const SERVER: &str = "https://photos.example.com/api";

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
}

struct FakeLibrary {
    assets: Mutex<Vec<AssetRef>>,
}

impl FakeLibrary {
    fn new(ids: &[&str]) -> Self {
        let assets = ids
            .iter()
            .enumerate()
            .map(|(i, id)| AssetRef::new(*id, t0() + Duration::seconds(i as i64 + 1)))
            .collect();
        Self {
            assets: Mutex::new(assets),
        }
    }

    fn remove(&self, id: &str) {
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
        Ok(AssetPayload {
            data: Bytes::from(asset.id.clone()),
            mime_type: Some("image/jpeg".to_string()),
        })
    }
}

/// Accepts every upload and answers the key probe with `probe_status`
struct FakeServer {
    probe_status: u16,
    urls: Mutex<Vec<String>>,
}

impl FakeServer {
    fn new(probe_status: u16) -> Self {
        Self {
            probe_status,
            urls: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl HttpClient for FakeServer {
    async fn execute(&self, request: HttpRequest) -> BridgeResult<HttpResponse> {
        let status = if request.url.ends_with("/api-keys/me") {
            self.probe_status
        } else {
            201
        };
        self.urls.lock().unwrap().push(request.url);
        Ok(HttpResponse {
            status,
            headers: HashMap::new(),
            body: Bytes::new(),
        })
    }
}

#[derive(Default)]
struct CountingQueue {
    created: Mutex<Vec<String>>,
}

#[async_trait]
impl JobQueueHost for CountingQueue {
    async fn retry_eligible_jobs(&self) -> BridgeResult<Vec<UploadJob>> {
        Ok(Vec::new())
    }

    async fn completed_jobs(&self) -> BridgeResult<Vec<UploadJob>> {
        Ok(Vec::new())
    }

    async fn active_jobs(&self) -> BridgeResult<Vec<UploadJob>> {
        Ok(Vec::new())
    }

    async fn create_job(&self, request: JobRequest) -> BridgeResult<JobId> {
        self.created.lock().unwrap().push(request.asset_id);
        Ok(JobId::new())
    }

    async fn resubmit_job(&self, _job: &UploadJob) -> BridgeResult<()> {
        Err(BridgeError::NotAvailable("resubmit".to_string()))
    }

    async fn acknowledge_job(&self, _job: &UploadJob) -> BridgeResult<()> {
        Ok(())
    }
}

struct Harness {
    service: SyncService,
    library: Arc<FakeLibrary>,
    server: Arc<FakeServer>,
}

fn harness(ids: &[&str], probe_status: u16, api_key: &str) -> Harness {
    let library = Arc::new(FakeLibrary::new(ids));
    let server = Arc::new(FakeServer::new(probe_status));
    let config = SyncConfig::builder()
        .server_url(SERVER)
        .api_key(api_key)
        .http_client(server.clone())
        .settings_store(Arc::new(InMemorySettingsStore::new()))
        .secure_store(Arc::new(InMemorySecureStore::new()))
        .media_library(library.clone())
        .clock(Arc::new(ManualClock::new(t0())))
        .prune_on_start(false)
        .build()
        .unwrap();

    Harness {
        service: SyncService::new(config).unwrap(),
        library,
        server,
    }
}

#[tokio::test]
async fn test_manual_sync_through_service() {
    let h = harness(&["B", "C"], 200, "key");
    let mut events = h.service.subscribe_events();

    h.service.enable_tracking().await.unwrap();
    assert!(matches!(
        events.recv().await.unwrap(),
        CoreEvent::Sync(core_runtime::events::SyncEvent::TrackingEnabled { .. })
    ));
    assert_eq!(
        h.service.counts().await.unwrap(),
        SyncCounts {
            pending: 2,
            uploaded: 0,
            failed: 0,
        }
    );

    let summary = h.service.run_manual_sync().await.unwrap().unwrap();
    assert_eq!(summary.uploaded, 2);
    assert_eq!(h.service.status("C").await.unwrap(), AssetStatus::Uploaded);
    assert_eq!(h.service.counts().await.unwrap().uploaded, 2);
    assert_eq!(
        h.server.urls.lock().unwrap().as_slice(),
        [format!("{}/assets", SERVER), format!("{}/assets", SERVER)]
    );
}

#[tokio::test]
async fn test_spawned_manual_sync_reports_summary() {
    let h = harness(&["B"], 200, "key");
    h.service.enable_tracking().await.unwrap();

    let summary = h.service.start_manual_sync().await.unwrap().unwrap().unwrap();
    assert_eq!(summary.uploaded, 1);
    assert!(!h.service.is_manual_sync_running());
}

#[tokio::test]
async fn test_disabled_tracking_has_no_counts() {
    let h = harness(&["B"], 200, "key");
    assert!(!h.service.is_tracking_enabled().await.unwrap());
    assert_eq!(h.service.counts().await.unwrap(), SyncCounts::default());
}

#[tokio::test]
async fn test_set_server_validates_and_persists() {
    let h = harness(&[], 200, "");

    let err = h
        .service
        .set_server(Credentials::new("ftp://nope", "key"))
        .await
        .unwrap_err();
    assert!(err.is_config());

    let updated = Credentials::new("https://other.example.com", "new-key");
    h.service.set_server(updated.clone()).await.unwrap();
    assert_eq!(h.service.credentials().await.unwrap(), updated);
}

#[tokio::test(start_paused = true)]
async fn test_probe_result_clears_after_display_window() {
    let h = harness(&[], 401, "key");
    let mut events = h.service.subscribe_events();

    let result = h.service.check_connectivity().await;
    assert_eq!(result, ProbeResult::InvalidKey);
    assert_eq!(h.service.connectivity_status(), Some(ProbeResult::InvalidKey));

    match events.recv().await.unwrap() {
        CoreEvent::Connectivity(ConnectivityEvent::ProbeFinished { result, .. }) => {
            assert_eq!(result, ProbeStatus::InvalidKey)
        }
        other => panic!("unexpected event {:?}", other),
    }
    assert!(matches!(
        events.recv().await.unwrap(),
        CoreEvent::Connectivity(ConnectivityEvent::ProbeCleared)
    ));
    assert_eq!(h.service.connectivity_status(), None);
}

#[tokio::test]
async fn test_probe_without_key_is_not_configured() {
    let h = harness(&[], 200, "");

    let result = h.service.check_connectivity().await;
    assert!(matches!(result, ProbeResult::NotConfigured(_)));
    assert!(h.server.urls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_prune_drops_deleted_assets() {
    let h = harness(&["B", "C"], 200, "key");
    h.service.enable_tracking().await.unwrap();
    h.service.run_manual_sync().await.unwrap();

    h.library.remove("B");
    let stats = h.service.prune_deleted().await.unwrap();

    assert_eq!(stats.uploaded_removed, 1);
    assert_eq!(h.service.status("B").await.unwrap(), AssetStatus::Pending);
    assert_eq!(h.service.status("C").await.unwrap(), AssetStatus::Uploaded);
}

#[tokio::test]
async fn test_bootstrap_builds_service() {
    let library = Arc::new(FakeLibrary::new(&[]));
    let config = SyncConfig::builder()
        .http_client(Arc::new(FakeServer::new(200)))
        .settings_store(Arc::new(InMemorySettingsStore::new()))
        .secure_store(Arc::new(InMemorySecureStore::new()))
        .media_library(library)
        .build()
        .unwrap();

    let service = bootstrap(config).await.unwrap();
    assert!(!service.is_tracking_enabled().await.unwrap());
}

#[tokio::test]
async fn test_background_requires_job_queue() {
    let h = harness(&["B"], 200, "key");

    let err = h.service.run_background_cycle().await.unwrap_err();
    assert!(matches!(err, CoreError::CapabilityMissing { .. }));
}

#[tokio::test]
async fn test_background_cycle_enqueues_candidates() {
    let library = Arc::new(FakeLibrary::new(&["B", "C"]));
    let queue = Arc::new(CountingQueue::default());
    let config = SyncConfig::builder()
        .server_url(SERVER)
        .api_key("key")
        .http_client(Arc::new(FakeServer::new(200)))
        .settings_store(Arc::new(InMemorySettingsStore::new()))
        .secure_store(Arc::new(InMemorySecureStore::new()))
        .media_library(library)
        .job_queue(queue.clone())
        .clock(Arc::new(ManualClock::new(t0())))
        .build()
        .unwrap();
    let service = SyncService::new(config).unwrap();
    service.enable_tracking().await.unwrap();

    assert_eq!(
        service.run_background_cycle().await.unwrap(),
        CycleOutcome::Completed
    );
    assert_eq!(queue.created.lock().unwrap().as_slice(), ["B", "C"]);
}

#[cfg(feature = "desktop-shims")]
#[tokio::test(start_paused = true)]
async fn test_executor_drives_background_cycle() {
    use bridge_desktop::TokioBackgroundExecutor;
    use bridge_traits::background::BackgroundExecutor;

    let library = Arc::new(FakeLibrary::new(&["B"]));
    let queue = Arc::new(CountingQueue::default());
    let config = SyncConfig::builder()
        .server_url(SERVER)
        .api_key("key")
        .http_client(Arc::new(FakeServer::new(200)))
        .settings_store(Arc::new(InMemorySettingsStore::new()))
        .secure_store(Arc::new(InMemorySecureStore::new()))
        .media_library(library)
        .job_queue(queue.clone())
        .clock(Arc::new(ManualClock::new(t0())))
        .build()
        .unwrap();
    let service = SyncService::new(config).unwrap();
    service.enable_tracking().await.unwrap();

    let executor = TokioBackgroundExecutor::new();
    let task = service.schedule_background_with(&executor).await.unwrap();

    // First tick fires immediately
    for _ in 0..50 {
        if !queue.created.lock().unwrap().is_empty() {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    assert_eq!(queue.created.lock().unwrap().as_slice(), ["B"]);

    executor.cancel_task(&task).await.unwrap();
}
