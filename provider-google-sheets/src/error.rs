//! Error types for the Google Sheets provider

use bridge_traits::error::BridgeError;
use thiserror::Error;

/// Google Sheets provider errors
#[derive(Error, Debug)]
pub enum SheetsError {
    /// Service-account file is missing or malformed
    #[error("Invalid service account credentials: {0}")]
    Credentials(String),

    /// JWT signing or token exchange failed
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// API request returned an error
    #[error("Google Sheets API error (status {status_code}): {message}")]
    ApiError { status_code: u16, message: String },

    /// Failed to parse API response
    #[error("Failed to parse API response: {0}")]
    ParseError(String),

    /// Bridge error
    #[error(transparent)]
    BridgeError(#[from] BridgeError),
}

/// Result type for Google Sheets operations
pub type Result<T> = std::result::Result<T, SheetsError>;

impl From<SheetsError> for BridgeError {
    fn from(error: SheetsError) -> Self {
        match error {
            SheetsError::Credentials(msg) => {
                BridgeError::NotAvailable(format!("Invalid service account credentials: {}", msg))
            }
            SheetsError::AuthenticationFailed(msg) => BridgeError::Http {
                status: 401,
                message: format!("Authentication failed: {}", msg),
            },
            SheetsError::ApiError {
                status_code,
                message,
            } => BridgeError::Http {
                status: status_code,
                message,
            },
            SheetsError::ParseError(msg) => BridgeError::Decode(msg),
            SheetsError::BridgeError(e) => e,
        }
    }
}
