use thiserror::Error;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Bridge capability not available: {0}")]
    NotAvailable(String),

    #[error("Bridge operation failed: {0}")]
    OperationFailed(String),

    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("Operation timed out: {0}")]
    Timeout(String),

    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    /// Whether retrying the same call later could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            BridgeError::Timeout(_) | BridgeError::ConnectionLost(_) | BridgeError::Io(_) => true,
            BridgeError::Http { status, .. } => *status == 429 || *status >= 500,
            BridgeError::OperationFailed(_) => true,
            BridgeError::NotAvailable(_) | BridgeError::Decode(_) => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;
