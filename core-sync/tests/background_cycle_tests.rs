//! Integration tests for the host-driven background cycle

mod common;

use bridge_traits::jobs::{JobId, JobState, UploadJob};
use common::*;
use core_sync::{AssetStatus, CycleOutcome};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

fn job(asset_id: Option<&str>, state: JobState, attempts: u32) -> UploadJob {
    UploadJob {
        id: JobId::new(),
        asset_id: asset_id.map(str::to_string),
        url: format!("{}/assets", SERVER),
        state,
        attempts,
    }
}

#[tokio::test]
async fn test_backpressure_then_completion_without_reenqueue() {
    let tracker = enabled_tracker().await;
    let library = Arc::new(FakeLibrary::new(vec![
        asset("B", 1),
        asset("C", 2),
        asset("D", 3),
    ]));
    let jobs = Arc::new(FakeJobQueue::new(2));
    let notifier = Arc::new(RecordingNotifier::default());
    let controller = controller(
        tracker.clone(),
        library,
        jobs.clone(),
        Some(notifier.clone()),
        3,
    );

    assert_eq!(controller.run_cycle().await, CycleOutcome::Processing);
    assert_eq!(jobs.created_assets(), vec!["B", "C"]);

    jobs.complete_all();
    assert_eq!(controller.run_cycle().await, CycleOutcome::Completed);

    assert_eq!(jobs.created_assets(), vec!["B", "C", "D"]);
    assert_eq!(tracker.status("B").await.unwrap(), AssetStatus::Uploaded);
    assert_eq!(tracker.status("C").await.unwrap(), AssetStatus::Uploaded);
    assert_eq!(tracker.status("D").await.unwrap(), AssetStatus::Pending);
    assert_eq!(jobs.acknowledged.lock().unwrap().len(), 2);

    let messages = notifier.messages.lock().unwrap();
    assert!(messages.iter().any(|(_, body)| body == "Uploaded 2 assets"));
    assert!(messages.iter().any(|(_, body)| body == "Starting upload of 1 asset"));
}

#[tokio::test]
async fn test_queued_assets_are_not_enqueued_twice() {
    let tracker = enabled_tracker().await;
    let library = Arc::new(FakeLibrary::new(vec![asset("B", 1)]));
    let jobs = Arc::new(FakeJobQueue::new(10));
    let controller = controller(tracker, library, jobs.clone(), None, 3);

    assert_eq!(controller.run_cycle().await, CycleOutcome::Completed);
    assert_eq!(controller.run_cycle().await, CycleOutcome::Completed);

    assert_eq!(jobs.created_assets(), vec!["B"]);
}

#[tokio::test]
async fn test_enqueued_request_is_fully_encoded() {
    let tracker = enabled_tracker().await;
    let library = Arc::new(FakeLibrary::new(vec![asset("B", 1)]));
    let jobs = Arc::new(FakeJobQueue::new(10));
    let controller = controller(tracker, library, jobs.clone(), None, 3);

    controller.run_cycle().await;

    let created = jobs.created.lock().unwrap();
    let request = &created[0];
    assert_eq!(request.url, format!("{}/assets", SERVER));
    assert_eq!(request.headers.get("x-api-key").map(String::as_str), Some("key"));
    assert!(request.headers["Content-Type"].starts_with("multipart/form-data; boundary="));
    let body = String::from_utf8_lossy(&request.body);
    assert!(body.contains("name=\"deviceAssetId\"\r\n\r\nB\r\n"));
    assert!(body.contains("bytes of B"));
}

#[tokio::test]
async fn test_failed_transfers_are_resubmitted() {
    let tracker = enabled_tracker().await;
    let library = Arc::new(FakeLibrary::new(vec![asset("B", 1)]));
    let jobs = Arc::new(FakeJobQueue::new(10));
    let controller = controller(tracker.clone(), library, jobs.clone(), None, 3);

    controller.run_cycle().await;
    jobs.fail("B");
    assert_eq!(controller.run_cycle().await, CycleOutcome::Completed);

    assert_eq!(jobs.resubmitted.lock().unwrap().len(), 1);
    let stored = jobs.jobs();
    assert_eq!(stored[0].state, JobState::Queued);
    assert_eq!(stored[0].attempts, 2);
    assert_eq!(tracker.status("B").await.unwrap(), AssetStatus::Pending);
}

#[tokio::test]
async fn test_exhausted_job_marks_asset_failed() {
    let tracker = enabled_tracker().await;
    let library = Arc::new(FakeLibrary::new(vec![asset("B", 1)]));
    let jobs = Arc::new(FakeJobQueue::new(10));
    jobs.insert(job(Some("B"), JobState::Retry, 3));
    let controller = controller(tracker.clone(), library, jobs.clone(), None, 3);

    assert_eq!(controller.run_cycle().await, CycleOutcome::Completed);

    assert_eq!(tracker.status("B").await.unwrap(), AssetStatus::Failed);
    assert!(jobs.resubmitted.lock().unwrap().is_empty());
    assert_eq!(jobs.acknowledged.lock().unwrap().len(), 1);
    // Failed assets are not candidates
    assert!(jobs.created_assets().is_empty());
}

#[tokio::test]
async fn test_malformed_completed_job_fails_cycle() {
    let tracker = enabled_tracker().await;
    let library = Arc::new(FakeLibrary::new(Vec::new()));
    let jobs = Arc::new(FakeJobQueue::new(10));
    jobs.insert(job(None, JobState::Acknowledge, 1));
    let controller = controller(tracker, library, jobs, None, 3);

    assert!(matches!(controller.run_cycle().await, CycleOutcome::Failed(_)));
}

#[tokio::test]
async fn test_disabled_tracking_completes_without_touching_jobs() {
    let tracker = enabled_tracker().await;
    tracker.disable_tracking().await.unwrap();
    let library = Arc::new(FakeLibrary::new(vec![asset("B", 1)]));
    let jobs = Arc::new(FakeJobQueue::new(10));
    let controller = controller(tracker, library, jobs.clone(), None, 3);

    assert_eq!(controller.run_cycle().await, CycleOutcome::Completed);
    assert_eq!(jobs.calls(), 0);
}

#[tokio::test]
async fn test_cancelled_cycle_reports_processing() {
    let tracker = enabled_tracker().await;
    let library = Arc::new(FakeLibrary::new(vec![asset("B", 1)]));
    let jobs = Arc::new(FakeJobQueue::new(10));
    let controller = controller(tracker, library, jobs.clone(), None, 3);

    let token = CancellationToken::new();
    token.cancel();
    assert_eq!(
        controller.run_cycle_with_token(token).await,
        CycleOutcome::Processing
    );
    assert!(jobs.created_assets().is_empty());
}

#[tokio::test]
async fn test_unreadable_asset_is_marked_failed_and_skipped() {
    let tracker = enabled_tracker().await;
    let library = Arc::new(FakeLibrary::new(vec![asset("B", 1), asset("C", 2)]));
    library.make_unreadable("B");
    let jobs = Arc::new(FakeJobQueue::new(10));
    let controller = controller(tracker.clone(), library, jobs.clone(), None, 3);

    assert_eq!(controller.run_cycle().await, CycleOutcome::Completed);
    assert_eq!(tracker.status("B").await.unwrap(), AssetStatus::Failed);
    assert_eq!(jobs.created_assets(), vec!["C"]);
}

#[tokio::test]
async fn test_failed_release_keeps_upload_and_completes() {
    let tracker = enabled_tracker().await;
    let library = Arc::new(FakeLibrary::new(vec![asset("B", 1)]));
    let jobs = Arc::new(FakeJobQueue::new(10));
    jobs.insert(job(Some("B"), JobState::Acknowledge, 1));
    jobs.fail_acknowledgements();
    let controller = controller(tracker.clone(), library, jobs.clone(), None, 3);

    assert_eq!(controller.run_cycle().await, CycleOutcome::Completed);

    assert_eq!(tracker.status("B").await.unwrap(), AssetStatus::Uploaded);
    assert!(jobs.acknowledged.lock().unwrap().is_empty());
    assert!(jobs.created_assets().is_empty());
}

#[tokio::test]
async fn test_cancel_after_first_enqueue_stops_discovery() {
    let tracker = enabled_tracker().await;
    let library = Arc::new(FakeLibrary::new(vec![
        asset("B", 1),
        asset("C", 2),
        asset("D", 3),
    ]));
    let jobs = Arc::new(FakeJobQueue::new(10));
    let token = CancellationToken::new();
    jobs.cancel_after_create(1, token.clone());
    let controller = controller(tracker.clone(), library, jobs.clone(), None, 3);

    assert_eq!(
        controller.run_cycle_with_token(token).await,
        CycleOutcome::Processing
    );
    assert_eq!(jobs.created_assets(), vec!["B"]);
    assert_eq!(tracker.status("C").await.unwrap(), AssetStatus::Pending);
}

#[tokio::test]
async fn test_cancel_after_first_resubmit_stops_retry_pass() {
    let tracker = enabled_tracker().await;
    let library = Arc::new(FakeLibrary::new(vec![asset("B", 1), asset("C", 2)]));
    let jobs = Arc::new(FakeJobQueue::new(10));
    jobs.insert(job(Some("B"), JobState::Retry, 1));
    jobs.insert(job(Some("C"), JobState::Retry, 1));
    let token = CancellationToken::new();
    jobs.cancel_after_resubmit(1, token.clone());
    let controller = controller(tracker, library, jobs.clone(), None, 3);

    assert_eq!(
        controller.run_cycle_with_token(token).await,
        CycleOutcome::Processing
    );
    assert_eq!(jobs.resubmitted.lock().unwrap().len(), 1);
    let states: Vec<JobState> = jobs.jobs().into_iter().map(|j| j.state).collect();
    assert_eq!(states, vec![JobState::Queued, JobState::Retry]);
    assert!(jobs.created_assets().is_empty());
}

#[tokio::test]
async fn test_cancel_reaches_every_overlapping_cycle() {
    let tracker = enabled_tracker().await;
    let library = Arc::new(FakeLibrary::new(vec![
        asset("B", 1),
        asset("C", 2),
        asset("D", 3),
    ]));
    let jobs = Arc::new(FakeJobQueue::new(10));
    let gate = jobs.hold_creates();
    let controller = Arc::new(controller(tracker, library, jobs.clone(), None, 3));

    let first = tokio::spawn({
        let controller = controller.clone();
        async move { controller.run_cycle().await }
    });
    let second = tokio::spawn({
        let controller = controller.clone();
        async move { controller.run_cycle_with_token(CancellationToken::new()).await }
    });

    // Both cycles are parked inside their first enqueue.
    gate.entered.acquire_many(2).await.unwrap().forget();
    controller.notify_cancel();
    gate.release.add_permits(100);

    assert_eq!(first.await.unwrap(), CycleOutcome::Processing);
    assert_eq!(second.await.unwrap(), CycleOutcome::Processing);
    assert_eq!(jobs.created_assets(), vec!["B", "B"]);

    // A cycle started after the cancel is not affected by it.
    assert_eq!(controller.run_cycle().await, CycleOutcome::Completed);
    assert_eq!(jobs.created_assets(), vec!["B", "B", "C", "D"]);
}
