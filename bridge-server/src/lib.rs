//! # Server Bridge Implementations
//!
//! Default implementations of bridge traits for the long-running sync server.
//!
//! ## Overview
//!
//! This crate provides production-ready and development implementations of
//! the bridge traits:
//! - `HttpClient` using `reqwest`
//! - `ChangeFeed` using Postgres `LISTEN` through `sqlx::postgres::PgListener`
//! - `RowSource`, `SheetSink` and `ChangeFeed` held entirely in memory, for
//!   local development and tests
//!
//! ## Feature Flags
//!
//! - `postgres-notify`: Enable the Postgres `LISTEN` change feed (default)
//!
//! ## Usage
//!
//! ```ignore
//! use bridge_server::{InMemoryRowSource, InMemorySheetSink, ReqwestHttpClient};
//!
//! #[tokio::main]
//! async fn main() {
//!     let http_client = ReqwestHttpClient::new()?;
//!     let source = InMemoryRowSource::new();
//!     let sink = InMemorySheetSink::new();
//!
//!     // Use in runtime wiring
//! }
//! ```

mod http;
mod memory;

#[cfg(feature = "postgres-notify")]
mod postgres;

pub use http::ReqwestHttpClient;
pub use memory::{ChannelChangeFeed, InMemoryRowSource, InMemorySheetSink};

#[cfg(feature = "postgres-notify")]
pub use postgres::PgChangeFeed;
