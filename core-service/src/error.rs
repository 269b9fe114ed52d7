use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Core initialization failed: {0}")]
    InitializationFailed(String),

    #[error("Capability missing: {capability} - {message}")]
    CapabilityMissing { capability: String, message: String },

    #[error("Runtime error: {0}")]
    Runtime(#[from] core_runtime::Error),

    #[error("Sync error: {0}")]
    Sync(#[from] core_sync::SyncError),

    #[error("Bridge error: {0}")]
    Bridge(#[from] bridge_traits::BridgeError),
}

impl CoreError {
    /// Whether the host should prompt for server settings
    pub fn is_config(&self) -> bool {
        match self {
            CoreError::Runtime(core_runtime::Error::Config(_)) => true,
            CoreError::Sync(e) => e.is_config(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
