//! # Google Sheets Provider
//!
//! Implements the `SheetSink` trait for the Google Sheets API v4.
//!
//! ## Features
//!
//! - Service-account authentication (RS256 JWT exchanged for an access token)
//! - Access-token caching until shortly before expiry
//! - Automatic creation of missing tabs on first use
//! - Quoted A1 ranges so tab names with spaces and quotes are safe

pub mod auth;
pub mod error;
pub mod sink;

pub use auth::{AccessTokenProvider, ServiceAccountAuth, ServiceAccountCredentials, StaticToken};
pub use error::{Result, SheetsError};
pub use sink::GoogleSheetsSink;
