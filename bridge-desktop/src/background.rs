//! Background Task Execution Implementation

use async_trait::async_trait;
use bridge_traits::{
    background::{BackgroundExecutor, TaskId, TaskStatus},
    error::{BridgeError, Result},
    time::{Clock, SystemClock},
};
use futures::future::{BoxFuture, FutureExt};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

type TaskHandler = Arc<dyn Fn(CancellationToken) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Tokio-based background executor for desktop.
///
/// Runs each registered handler on a fixed interval inside the current
/// process. Cancelling a task cancels the token handed to the running
/// handler, then stops the loop.
pub struct TokioBackgroundExecutor {
    tasks: Arc<RwLock<HashMap<TaskId, TaskInfo>>>,
    handlers: Arc<RwLock<HashMap<String, TaskHandler>>>,
    clock: Arc<dyn Clock>,
}

struct TaskInfo {
    status: TaskStatus,
    handle: Option<JoinHandle<()>>,
    cancel: CancellationToken,
    last_run: Option<i64>,
    next_run: Option<i64>,
}

impl TokioBackgroundExecutor {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            tasks: Arc::new(RwLock::new(HashMap::new())),
            handlers: Arc::new(RwLock::new(HashMap::new())),
            clock,
        }
    }

    fn duration_to_millis(duration: Duration) -> i64 {
        duration.as_millis().min(i64::MAX as u128) as i64
    }

    fn millis_to_duration(millis: i64) -> Duration {
        if millis <= 0 {
            Duration::from_secs(0)
        } else {
            Duration::from_millis(millis as u64)
        }
    }

    /// Register a handler that will be invoked when the task executes.
    pub async fn register_task_handler<F, Fut>(&self, task_id: &str, handler: F) -> Result<()>
    where
        F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<()>> + Send + 'static,
    {
        let mut handlers = self.handlers.write().await;
        handlers.insert(
            task_id.to_string(),
            Arc::new(move |token| handler(token).boxed()),
        );
        Ok(())
    }

    async fn handler_for(&self, task_id: &str) -> Option<TaskHandler> {
        self.handlers.read().await.get(task_id).cloned()
    }

    async fn set_status(
        tasks: &RwLock<HashMap<TaskId, TaskInfo>>,
        id: &TaskId,
        update: impl FnOnce(&mut TaskInfo),
    ) {
        if let Some(info) = tasks.write().await.get_mut(id) {
            update(info);
        }
    }

    async fn run_recurring_task(
        tasks: Arc<RwLock<HashMap<TaskId, TaskInfo>>>,
        id: TaskId,
        handler: TaskHandler,
        period: Duration,
        cancel: CancellationToken,
        clock: Arc<dyn Clock>,
    ) {
        let mut ticker = tokio::time::interval(period);
        let period_millis = Self::duration_to_millis(period);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    Self::set_status(&tasks, &id, |info| info.status = TaskStatus::Running).await;

                    let result = handler(cancel.child_token()).await;

                    let now = clock.unix_timestamp_millis();
                    Self::set_status(&tasks, &id, |info| {
                        info.last_run = Some(now);
                        info.next_run = Some(now.saturating_add(period_millis));
                        info.status = match result {
                            Ok(()) => TaskStatus::Completed,
                            Err(err) => {
                                warn!(task_id = %id.0, error = %err, "Recurring task failed");
                                TaskStatus::Failed
                            }
                        };
                    })
                    .await;
                }
            }
        }
        debug!(task_id = %id.0, "Recurring task stopped");
    }
}

impl Default for TokioBackgroundExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BackgroundExecutor for TokioBackgroundExecutor {
    async fn schedule_task(&self, task_id: &str, interval: Duration) -> Result<TaskId> {
        let id = TaskId::new(task_id);

        debug!(
            task_id = task_id,
            interval_secs = interval.as_secs(),
            "Scheduling recurring task"
        );

        if interval.is_zero() {
            return Err(BridgeError::OperationFailed(
                "Task interval must be greater than zero".to_string(),
            ));
        }

        let handler = self.handler_for(task_id).await.ok_or_else(|| {
            BridgeError::OperationFailed(format!("No handler registered for task: {}", task_id))
        })?;

        if self.tasks.read().await.contains_key(&id) {
            return Err(BridgeError::OperationFailed(format!(
                "Task already scheduled: {}",
                task_id
            )));
        }

        let cancel = CancellationToken::new();
        self.tasks.write().await.insert(
            id.clone(),
            TaskInfo {
                status: TaskStatus::Scheduled,
                handle: None,
                cancel: cancel.clone(),
                last_run: None,
                next_run: Some(self.clock.unix_timestamp_millis()),
            },
        );

        let handle = tokio::spawn(Self::run_recurring_task(
            Arc::clone(&self.tasks),
            id.clone(),
            handler,
            interval,
            cancel,
            Arc::clone(&self.clock),
        ));

        Self::set_status(&self.tasks, &id, |info| info.handle = Some(handle)).await;

        Ok(id)
    }

    async fn cancel_task(&self, task_id: &TaskId) -> Result<()> {
        debug!(task_id = ?task_id, "Cancelling task");

        let mut info = self.tasks.write().await.remove(task_id).ok_or_else(|| {
            BridgeError::NotFound(format!("Task not found: {:?}", task_id))
        })?;

        info.status = TaskStatus::Cancelled;
        info.cancel.cancel();
        if let Some(handle) = info.handle.take() {
            // Let the current run observe the token and wind down on its own
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    warn!(task_id = %task_id.0, error = %e, "Background task panicked");
                }
            }
        }
        Ok(())
    }

    async fn get_task_status(&self, task_id: &TaskId) -> Result<TaskStatus> {
        self.tasks
            .read()
            .await
            .get(task_id)
            .map(|info| info.status.clone())
            .ok_or_else(|| BridgeError::NotFound(format!("Task not found: {:?}", task_id)))
    }

    async fn list_tasks(&self) -> Result<Vec<TaskId>> {
        Ok(self.tasks.read().await.keys().cloned().collect())
    }

    async fn next_execution_time(&self, task_id: &TaskId) -> Result<Option<Duration>> {
        let tasks = self.tasks.read().await;
        let info = tasks
            .get(task_id)
            .ok_or_else(|| BridgeError::NotFound(format!("Task not found: {:?}", task_id)))?;

        Ok(info.next_run.map(|next| {
            Self::millis_to_duration(next - self.clock.unix_timestamp_millis())
        }))
    }
}
