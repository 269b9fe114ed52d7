//! Background Execution and Task Scheduling
//!
//! Provides the periodic "run a sync cycle" trigger supplied by the host.

use async_trait::async_trait;
use std::time::Duration;

use crate::error::Result;

/// Scheduled task identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TaskId(pub String);

impl TaskId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

/// Task execution status
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskStatus {
    /// Task is scheduled but not yet running
    Scheduled,
    /// Task is currently executing
    Running,
    /// Last run completed successfully
    Completed,
    /// Last run failed
    Failed,
    /// Task was cancelled
    Cancelled,
}

/// Background task executor trait
///
/// Abstracts platform-specific background task scheduling:
/// - **iOS**: BGTaskScheduler / background URL session wake-ups
/// - **Android**: WorkManager (respects Doze mode)
/// - **Desktop**: Tokio interval loop inside the running process
///
/// Handlers are registered on the concrete executor. Each run receives a
/// cancellation token that the executor cancels when the platform asks the
/// work to stop; handlers are expected to check it between items.
///
/// # Example
///
/// ```ignore
/// use bridge_traits::background::BackgroundExecutor;
/// use std::time::Duration;
///
/// async fn schedule_sync(executor: &dyn BackgroundExecutor) -> Result<()> {
///     executor
///         .schedule_task("asset_upload_cycle", Duration::from_secs(900))
///         .await?;
///     Ok(())
/// }
/// ```
#[async_trait]
pub trait BackgroundExecutor: Send + Sync {
    /// Schedule a recurring task whose handler was registered under `task_id`
    async fn schedule_task(&self, task_id: &str, interval: Duration) -> Result<TaskId>;

    /// Cancel a scheduled task, signalling any in-progress run to stop
    async fn cancel_task(&self, task_id: &TaskId) -> Result<()>;

    /// Get status of a task
    async fn get_task_status(&self, task_id: &TaskId) -> Result<TaskStatus>;

    /// List all scheduled tasks
    async fn list_tasks(&self) -> Result<Vec<TaskId>>;

    /// Check if background execution is available
    async fn is_available(&self) -> bool {
        true
    }

    /// Estimated time until the next run, if known
    async fn next_execution_time(&self, task_id: &TaskId) -> Result<Option<Duration>>;
}
