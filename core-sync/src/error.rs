use bridge_traits::error::BridgeError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Row source error: {0}")]
    Source(BridgeError),

    #[error("Sink error: {0}")]
    Sink(BridgeError),

    #[error("{operation} timed out after {seconds} seconds")]
    Timeout { operation: String, seconds: u64 },

    #[error("Change feed error: {0}")]
    Listener(BridgeError),

    #[error("Undecodable change payload: {0}")]
    Decode(String),

    #[error("Task panicked: {0}")]
    Panicked(String),

    #[error("Sync pipeline is shut down")]
    Closed,

    #[error(transparent)]
    Config(#[from] core_runtime::Error),
}

impl SyncError {
    /// Connection drops and timeouts; worth another attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            SyncError::Source(e) | SyncError::Sink(e) | SyncError::Listener(e) => e.is_transient(),
            SyncError::Timeout { .. } => true,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
