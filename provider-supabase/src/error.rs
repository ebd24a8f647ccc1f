//! Error types for the Supabase provider

use bridge_traits::error::BridgeError;
use thiserror::Error;

/// Supabase provider errors
#[derive(Error, Debug)]
pub enum SupabaseError {
    /// The service key was rejected
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// PostgREST returned an error payload
    #[error("Supabase API error (status {status_code}): {message}")]
    ApiError { status_code: u16, message: String },

    /// Failed to parse API response
    #[error("Failed to parse API response: {0}")]
    ParseError(String),

    /// Bridge error
    #[error(transparent)]
    BridgeError(#[from] BridgeError),
}

/// Result type for Supabase operations
pub type Result<T> = std::result::Result<T, SupabaseError>;

impl From<SupabaseError> for BridgeError {
    fn from(error: SupabaseError) -> Self {
        match error {
            SupabaseError::AuthenticationFailed(msg) => BridgeError::Http {
                status: 401,
                message: format!("Authentication failed: {}", msg),
            },
            SupabaseError::ApiError {
                status_code,
                message,
            } => BridgeError::Http {
                status: status_code,
                message,
            },
            SupabaseError::ParseError(msg) => BridgeError::Decode(msg),
            SupabaseError::BridgeError(e) => e,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = SupabaseError::ApiError {
            status_code: 400,
            message: "column does not exist".to_string(),
        };

        assert_eq!(
            error.to_string(),
            "Supabase API error (status 400): column does not exist"
        );
    }

    #[test]
    fn test_error_conversion_keeps_status() {
        let error = SupabaseError::ApiError {
            status_code: 503,
            message: "upstream".to_string(),
        };
        let bridge_error: BridgeError = error.into();

        assert!(matches!(bridge_error, BridgeError::Http { status: 503, .. }));
        assert!(bridge_error.is_transient());
    }
}
