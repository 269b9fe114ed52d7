//! # Event Bus System
//!
//! Broadcasts sync, upload and connectivity events to host UIs using
//! `tokio::sync::broadcast`.
//!
//! ## Overview
//!
//! - **Event Types**: `CoreEvent` wraps one enum per domain
//! - **EventBus**: Central broadcast channel for publishing events
//! - **EventStream**: Receiver wrapper with optional filtering
//!
//! ```text
//! ┌──────────────┐    emit     ┌───────────┐
//! │ Manual Driver├────────────>│           │   subscribe   ┌────────────┐
//! └──────────────┘             │ EventBus  ├──────────────>│  Host UI   │
//! ┌──────────────┐    emit     │           │               └────────────┘
//! │ Bg Controller├────────────>│           │
//! └──────────────┘             └───────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use core_runtime::events::{CoreEvent, EventBus, UploadEvent};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let event_bus = EventBus::new(100);
//! let mut stream = event_bus.subscribe();
//!
//! event_bus
//!     .emit(CoreEvent::Upload(UploadEvent::AssetUploaded {
//!         asset_id: "IMG_0001.HEIC".to_string(),
//!         status: 201,
//!     }))
//!     .ok();
//!
//! let event = stream.recv().await.unwrap();
//! assert!(matches!(event, CoreEvent::Upload(_)));
//! # }
//! ```
//!
//! ## Error Handling
//!
//! - **`RecvError::Lagged(n)`**: Subscriber was too slow and missed `n` events.
//!   Non-fatal; the subscriber keeps receiving new events.
//! - **`RecvError::Closed`**: All senders have been dropped. Treat as shutdown.
//!
//! Emitting with no subscribers returns an error. Publishers ignore it with
//! `.ok()`, since a headless run has nobody listening.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;

pub use tokio::sync::broadcast::error::{RecvError, SendError};
pub use tokio::sync::broadcast::Receiver;

/// Default buffer size for the event bus channel.
///
/// Subscribers that can't keep up will receive `RecvError::Lagged`.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 100;

// ============================================================================
// Core Event Types
// ============================================================================

/// Top-level event enum published through the event bus.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    /// Tracking and run lifecycle
    Sync(SyncEvent),
    /// Per-asset and per-job outcomes
    Upload(UploadEvent),
    /// Server reachability checks
    Connectivity(ConnectivityEvent),
}

impl CoreEvent {
    /// Returns a human-readable description of the event.
    pub fn description(&self) -> &str {
        match self {
            CoreEvent::Sync(e) => e.description(),
            CoreEvent::Upload(e) => e.description(),
            CoreEvent::Connectivity(e) => e.description(),
        }
    }

    /// Returns the severity level of the event.
    pub fn severity(&self) -> EventSeverity {
        match self {
            CoreEvent::Sync(SyncEvent::CycleFinished {
                outcome: CycleOutcomeKind::Failed,
                ..
            }) => EventSeverity::Error,
            CoreEvent::Upload(UploadEvent::AssetFailed { .. }) => EventSeverity::Warning,
            CoreEvent::Connectivity(ConnectivityEvent::ProbeFinished { result, .. })
                if *result != ProbeStatus::Valid =>
            {
                EventSeverity::Warning
            }
            CoreEvent::Sync(SyncEvent::ManualCompleted { .. })
            | CoreEvent::Sync(SyncEvent::TrackingEnabled { .. })
            | CoreEvent::Sync(SyncEvent::TrackingDisabled)
            | CoreEvent::Connectivity(ConnectivityEvent::ProbeFinished { .. }) => {
                EventSeverity::Info
            }
            _ => EventSeverity::Debug,
        }
    }
}

/// Event severity levels for filtering and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
}

// ============================================================================
// Sync Events
// ============================================================================

/// How a background cycle ended, as reported to the host.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CycleOutcomeKind {
    Completed,
    Processing,
    Failed,
}

/// Events describing tracking state and sync runs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum SyncEvent {
    /// A fresh watermark was recorded and history cleared.
    TrackingEnabled { enabled_at: DateTime<Utc> },
    /// Tracking was switched off. History is kept.
    TrackingDisabled,
    /// A manual run found candidates and started.
    ManualStarted { total: u64 },
    /// Emitted after every manual item.
    ManualProgress { uploaded: u64, failed: u64, total: u64 },
    /// A manual run ended, either normally or by cancellation.
    ManualCompleted {
        uploaded: u64,
        failed: u64,
        total: u64,
        cancelled: bool,
    },
    /// A manual run found no candidates.
    NothingToDo,
    /// A background cycle returned to the host.
    CycleFinished {
        outcome: CycleOutcomeKind,
        message: Option<String>,
    },
}

impl SyncEvent {
    fn description(&self) -> &str {
        match self {
            SyncEvent::TrackingEnabled { .. } => "Sync tracking enabled",
            SyncEvent::TrackingDisabled => "Sync tracking disabled",
            SyncEvent::ManualStarted { .. } => "Manual sync started",
            SyncEvent::ManualProgress { .. } => "Manual sync in progress",
            SyncEvent::ManualCompleted { .. } => "Manual sync finished",
            SyncEvent::NothingToDo => "Nothing to upload",
            SyncEvent::CycleFinished { .. } => "Background cycle finished",
        }
    }
}

// ============================================================================
// Upload Events
// ============================================================================

/// Events describing individual uploads and host job bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum UploadEvent {
    AssetUploaded { asset_id: String, status: u16 },
    AssetFailed { asset_id: String, reason: String },
    /// Discovery handed new jobs to the host queue.
    JobsEnqueued { count: u64 },
    /// Completed jobs were recorded and released.
    JobsAcknowledged { count: u64 },
    /// Retry-eligible jobs were handed back for transfer.
    RetriesResubmitted { count: u64 },
}

impl UploadEvent {
    fn description(&self) -> &str {
        match self {
            UploadEvent::AssetUploaded { .. } => "Asset uploaded",
            UploadEvent::AssetFailed { .. } => "Asset upload failed",
            UploadEvent::JobsEnqueued { .. } => "Upload jobs enqueued",
            UploadEvent::JobsAcknowledged { .. } => "Upload jobs acknowledged",
            UploadEvent::RetriesResubmitted { .. } => "Upload jobs resubmitted",
        }
    }
}

// ============================================================================
// Connectivity Events
// ============================================================================

/// Classified result of a connectivity probe.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProbeStatus {
    /// 200
    Valid,
    /// 401
    InvalidKey,
    /// 403
    InsufficientScope,
    /// Anything else, including transport failures
    Error,
    /// Missing key or unusable URL; no request was sent
    NotConfigured,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum ConnectivityEvent {
    ProbeFinished { result: ProbeStatus, message: String },
    /// The displayed result expired.
    ProbeCleared,
}

impl ConnectivityEvent {
    fn description(&self) -> &str {
        match self {
            ConnectivityEvent::ProbeFinished { .. } => "Connectivity check finished",
            ConnectivityEvent::ProbeCleared => "Connectivity result cleared",
        }
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// Central event bus for publishing and subscribing to events.
///
/// Uses `tokio::sync::broadcast` internally, which provides:
/// - Multiple producers (clone the `EventBus`)
/// - Multiple consumers (each `subscribe()` creates a new receiver)
/// - Lagging detection (slow subscribers get `RecvError::Lagged`)
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    /// Creates a new event bus with the specified buffer size.
    ///
    /// # Arguments
    ///
    /// * `capacity` - Maximum number of events to buffer per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publishes an event to all subscribers.
    ///
    /// Returns the number of subscribers that received the event, or an error
    /// if there are no active subscribers.
    pub fn emit(&self, event: CoreEvent) -> Result<usize, SendError<CoreEvent>> {
        self.sender.send(event)
    }

    /// Creates a new subscriber. Past events are not replayed.
    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ============================================================================
// Event Stream Wrapper
// ============================================================================

type EventFilter = Box<dyn Fn(&CoreEvent) -> bool + Send + Sync>;

/// A wrapper around `broadcast::Receiver` with optional filtering.
///
/// # Example
///
/// ```rust
/// use core_runtime::events::{CoreEvent, EventBus, EventStream};
///
/// let event_bus = EventBus::new(100);
/// let uploads = EventStream::new(event_bus.subscribe())
///     .filter(|event| matches!(event, CoreEvent::Upload(_)));
/// ```
pub struct EventStream {
    receiver: Receiver<CoreEvent>,
    filter: Option<EventFilter>,
}

impl EventStream {
    pub fn new(receiver: Receiver<CoreEvent>) -> Self {
        Self {
            receiver,
            filter: None,
        }
    }

    /// Only events matching `predicate` will be returned.
    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&CoreEvent) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Box::new(predicate));
        self
    }

    fn accepts(&self, event: &CoreEvent) -> bool {
        self.filter.as_ref().map_or(true, |filter| filter(event))
    }

    /// Receives the next event that passes the filter.
    ///
    /// # Errors
    ///
    /// Returns `RecvError::Lagged(n)` if the subscriber fell behind by `n` events.
    /// Returns `RecvError::Closed` if all senders have been dropped.
    pub async fn recv(&mut self) -> Result<CoreEvent, RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if self.accepts(&event) {
                return Ok(event);
            }
        }
    }

    /// Attempts to receive an event without blocking.
    ///
    /// Returns `None` if no matching events are currently available.
    pub fn try_recv(&mut self) -> Option<Result<CoreEvent, RecvError>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    if self.accepts(&event) {
                        return Some(Ok(event));
                    }
                }
                Err(broadcast::error::TryRecvError::Empty) => return None,
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    return Some(Err(RecvError::Lagged(n)))
                }
                Err(broadcast::error::TryRecvError::Closed) => return Some(Err(RecvError::Closed)),
            }
        }
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("has_filter", &self.filter.is_some())
            .finish()
    }
}
