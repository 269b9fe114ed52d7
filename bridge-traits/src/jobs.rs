//! Background Upload Job Queue
//!
//! On platforms with an OS-managed transfer service the actual upload happens
//! outside the core. The core hands a fully encoded request to the host's job
//! queue and learns about outcomes on later cycles by enumerating jobs.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

use crate::error::Result;

/// Host-assigned job identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(pub String);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Job state as reported by the host
///
/// `Unqueued -> Queued -> {Acknowledge, Retry}`; a retried job goes back to
/// `Queued` when resubmitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Unqueued,
    Queued,
    /// Transfer finished successfully; the slot is held until acknowledged
    Acknowledge,
    /// Transfer failed; eligible for resubmission
    Retry,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Unqueued => "unqueued",
            JobState::Queued => "queued",
            JobState::Acknowledge => "acknowledge",
            JobState::Retry => "retry",
        }
    }

    /// Whether the job still occupies an in-flight slot
    pub fn is_in_flight(&self) -> bool {
        !matches!(self, JobState::Unqueued)
    }
}

/// One upload job known to the host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadJob {
    pub id: JobId,
    /// Asset this job transfers. `None` indicates a malformed record.
    pub asset_id: Option<String>,
    /// Original destination
    pub url: String,
    pub state: JobState,
    /// Number of transfer attempts made so far
    pub attempts: u32,
}

/// Request handed to the host for transfer
#[derive(Debug, Clone)]
pub struct JobRequest {
    pub asset_id: String,
    pub url: String,
    pub headers: HashMap<String, String>,
    pub body: Bytes,
}

/// Host job queue trait
///
/// `create_job` and `resubmit_job` must fail with
/// [`BridgeError::LimitExceeded`](crate::error::BridgeError::LimitExceeded)
/// when the in-flight ceiling is reached so callers can tell backpressure
/// apart from a real failure.
#[async_trait]
pub trait JobQueueHost: Send + Sync {
    /// Jobs whose transfer failed and may be resubmitted
    async fn retry_eligible_jobs(&self) -> Result<Vec<UploadJob>>;

    /// Jobs whose transfer completed and await acknowledgement
    async fn completed_jobs(&self) -> Result<Vec<UploadJob>>;

    /// Every job currently holding a slot, regardless of state
    async fn active_jobs(&self) -> Result<Vec<UploadJob>>;

    /// Enqueue a new transfer
    async fn create_job(&self, request: JobRequest) -> Result<JobId>;

    /// Send a retry-eligible job again to its original destination
    async fn resubmit_job(&self, job: &UploadJob) -> Result<()>;

    /// Release a job's slot once its outcome has been recorded
    async fn acknowledge_job(&self, job: &UploadJob) -> Result<()>;
}
