//! In-process upload job queue

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    http::{HttpClient, HttpMethod, HttpRequest},
    jobs::{JobId, JobQueueHost, JobRequest, JobState, UploadJob},
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

/// Default number of jobs allowed to hold a slot at once
pub const DEFAULT_MAX_IN_FLIGHT: usize = 8;

struct JobEntry {
    job: UploadJob,
    request: JobRequest,
}

/// Desktop stand-in for an OS transfer service.
///
/// Each job is transferred on a spawned task with a single HTTP attempt.
/// A 200/201 response moves the job to [`JobState::Acknowledge`]; anything
/// else moves it to [`JobState::Retry`]. A job keeps its slot until it is
/// acknowledged.
pub struct InProcessJobQueue {
    http_client: Arc<dyn HttpClient>,
    jobs: Arc<RwLock<HashMap<JobId, JobEntry>>>,
    max_in_flight: usize,
    transfers: TaskTracker,
}

impl InProcessJobQueue {
    pub fn new(http_client: Arc<dyn HttpClient>) -> Self {
        Self::with_max_in_flight(http_client, DEFAULT_MAX_IN_FLIGHT)
    }

    pub fn with_max_in_flight(http_client: Arc<dyn HttpClient>, max_in_flight: usize) -> Self {
        Self {
            http_client,
            jobs: Arc::new(RwLock::new(HashMap::new())),
            max_in_flight,
            transfers: TaskTracker::new(),
        }
    }

    /// Wait until every transfer started so far has finished
    pub async fn wait_idle(&self) {
        self.transfers.close();
        self.transfers.wait().await;
        self.transfers.reopen();
    }

    async fn jobs_in_state(&self, state: JobState) -> Vec<UploadJob> {
        self.jobs
            .read()
            .await
            .values()
            .filter(|entry| entry.job.state == state)
            .map(|entry| entry.job.clone())
            .collect()
    }

    fn spawn_transfer(&self, id: JobId, request: JobRequest) {
        let client = Arc::clone(&self.http_client);
        let jobs = Arc::clone(&self.jobs);

        self.transfers.spawn(async move {
            let mut http_request = HttpRequest::new(HttpMethod::Post, request.url.clone())
                .body(request.body.clone());
            for (key, value) in &request.headers {
                http_request = http_request.header(key.clone(), value.clone());
            }

            let next_state = match client.execute(http_request).await {
                Ok(response) if matches!(response.status, 200 | 201) => {
                    debug!(job_id = %id, status = response.status, "Transfer completed");
                    JobState::Acknowledge
                }
                Ok(response) => {
                    warn!(job_id = %id, status = response.status, "Transfer rejected");
                    JobState::Retry
                }
                Err(e) => {
                    warn!(job_id = %id, error = %e, "Transfer failed");
                    JobState::Retry
                }
            };

            if let Some(entry) = jobs.write().await.get_mut(&id) {
                entry.job.state = next_state;
            }
        });
    }
}

#[async_trait]
impl JobQueueHost for InProcessJobQueue {
    async fn retry_eligible_jobs(&self) -> Result<Vec<UploadJob>> {
        Ok(self.jobs_in_state(JobState::Retry).await)
    }

    async fn completed_jobs(&self) -> Result<Vec<UploadJob>> {
        Ok(self.jobs_in_state(JobState::Acknowledge).await)
    }

    async fn active_jobs(&self) -> Result<Vec<UploadJob>> {
        Ok(self
            .jobs
            .read()
            .await
            .values()
            .map(|entry| entry.job.clone())
            .collect())
    }

    async fn create_job(&self, request: JobRequest) -> Result<JobId> {
        let id = JobId::new();
        {
            let mut jobs = self.jobs.write().await;
            if jobs.len() >= self.max_in_flight {
                return Err(BridgeError::LimitExceeded(format!(
                    "{} jobs already in flight",
                    jobs.len()
                )));
            }

            jobs.insert(
                id.clone(),
                JobEntry {
                    job: UploadJob {
                        id: id.clone(),
                        asset_id: Some(request.asset_id.clone()),
                        url: request.url.clone(),
                        state: JobState::Queued,
                        attempts: 1,
                    },
                    request: request.clone(),
                },
            );
        }

        info!(job_id = %id, asset_id = %request.asset_id, "Created upload job");
        self.spawn_transfer(id.clone(), request);
        Ok(id)
    }

    async fn resubmit_job(&self, job: &UploadJob) -> Result<()> {
        let request = {
            let mut jobs = self.jobs.write().await;
            let entry = jobs
                .get_mut(&job.id)
                .ok_or_else(|| BridgeError::NotFound(format!("Job not found: {}", job.id)))?;

            if entry.job.state != JobState::Retry {
                return Err(BridgeError::OperationFailed(format!(
                    "Job {} is {}, not retry-eligible",
                    job.id,
                    entry.job.state.as_str()
                )));
            }

            entry.job.state = JobState::Queued;
            entry.job.attempts += 1;
            entry.request.clone()
        };

        debug!(job_id = %job.id, "Resubmitted upload job");
        self.spawn_transfer(job.id.clone(), request);
        Ok(())
    }

    async fn acknowledge_job(&self, job: &UploadJob) -> Result<()> {
        self.jobs
            .write()
            .await
            .remove(&job.id)
            .map(|_| debug!(job_id = %job.id, "Acknowledged upload job"))
            .ok_or_else(|| BridgeError::NotFound(format!("Job not found: {}", job.id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_traits::http::HttpResponse;
    use bytes::Bytes;
    use std::sync::atomic::{AtomicU16, Ordering};

    struct StatusClient {
        status: AtomicU16,
    }

    impl StatusClient {
        fn new(status: u16) -> Arc<Self> {
            Arc::new(Self {
                status: AtomicU16::new(status),
            })
        }
    }

    #[async_trait]
    impl HttpClient for StatusClient {
        async fn execute(&self, _request: HttpRequest) -> Result<HttpResponse> {
            Ok(HttpResponse {
                status: self.status.load(Ordering::SeqCst),
                headers: HashMap::new(),
                body: Bytes::new(),
            })
        }
    }

    fn request(asset_id: &str) -> JobRequest {
        JobRequest {
            asset_id: asset_id.to_string(),
            url: "https://photos.example.com/api/assets".to_string(),
            headers: HashMap::new(),
            body: Bytes::from_static(b"body"),
        }
    }

    #[tokio::test]
    async fn test_successful_transfer_awaits_acknowledgement() {
        let queue = InProcessJobQueue::new(StatusClient::new(201));
        queue.create_job(request("A")).await.unwrap();
        queue.wait_idle().await;

        let completed = queue.completed_jobs().await.unwrap();
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].asset_id.as_deref(), Some("A"));
        assert_eq!(queue.active_jobs().await.unwrap().len(), 1);

        queue.acknowledge_job(&completed[0]).await.unwrap();
        assert!(queue.active_jobs().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_transfer_becomes_retry_eligible() {
        let client = StatusClient::new(500);
        let queue = InProcessJobQueue::new(client.clone());
        queue.create_job(request("B")).await.unwrap();
        queue.wait_idle().await;

        let retry = queue.retry_eligible_jobs().await.unwrap();
        assert_eq!(retry.len(), 1);
        assert_eq!(retry[0].attempts, 1);

        client.status.store(200, Ordering::SeqCst);
        queue.resubmit_job(&retry[0]).await.unwrap();
        queue.wait_idle().await;

        let completed = queue.completed_jobs().await.unwrap();
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].attempts, 2);
    }

    #[tokio::test]
    async fn test_ceiling_reports_limit_exceeded() {
        let queue = InProcessJobQueue::with_max_in_flight(StatusClient::new(201), 1);
        queue.create_job(request("A")).await.unwrap();

        let err = queue.create_job(request("B")).await.unwrap_err();
        assert!(matches!(err, BridgeError::LimitExceeded(_)));
    }

    #[tokio::test]
    async fn test_acknowledge_unknown_job() {
        let queue = InProcessJobQueue::new(StatusClient::new(201));
        let job = UploadJob {
            id: JobId::new(),
            asset_id: None,
            url: String::new(),
            state: JobState::Acknowledge,
            attempts: 1,
        };
        assert!(matches!(
            queue.acknowledge_job(&job).await,
            Err(BridgeError::NotFound(_))
        ));
    }
}
