use bridge_traits::error::BridgeError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    /// Missing API key or unusable server URL. Never retried automatically.
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Encoding error: {0}")]
    Encoding(String),

    #[error("Transport error: {0}")]
    Transport(String),

    /// The host's in-flight ceiling was reached.
    #[error("Job limit exceeded: {0}")]
    LimitExceeded(String),

    #[error("Malformed job record: {0}")]
    MalformedJob(String),

    #[error("Sync state error: {0}")]
    State(String),

    #[error("Bridge error: {0}")]
    Bridge(BridgeError),

    #[error("Sync cancelled")]
    Cancelled,
}

impl SyncError {
    pub fn is_config(&self) -> bool {
        matches!(self, SyncError::Configuration(_))
    }

    /// Backpressure from the host, not a failure.
    pub fn is_backpressure(&self) -> bool {
        matches!(self, SyncError::LimitExceeded(_))
    }
}

impl From<BridgeError> for SyncError {
    fn from(err: BridgeError) -> Self {
        match err {
            BridgeError::LimitExceeded(msg) => SyncError::LimitExceeded(msg),
            other => SyncError::Bridge(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
