//! # Host Bridge Traits
//!
//! Collaborator contracts the sync core consumes through narrow interfaces.
//!
//! ## Overview
//!
//! This crate defines the boundary between the sync core and the external
//! systems it talks to. Each trait represents a capability the core requires
//! but that is implemented elsewhere: the relational store lives behind
//! [`RowSource`](row_source::RowSource), the spreadsheet behind
//! [`SheetSink`](sink::SheetSink), and the store's change notifications behind
//! [`ChangeFeed`](notify::ChangeFeed).
//!
//! ## Traits
//!
//! ### Data
//! - [`RowSource`](row_source::RowSource) - Filtered select/delete over named tables
//! - [`SheetSink`](sink::SheetSink) - Tab-scoped read/write/clear of a spreadsheet
//! - [`ChangeFeed`](notify::ChangeFeed) - Subscription to a change-notification channel
//!
//! ### Networking
//! - [`HttpClient`](http::HttpClient) - Async HTTP operations with retry and TLS
//!
//! ### Utilities
//! - [`Clock`](time::Clock) - Time source for deterministic testing
//!
//! ## Implementations
//!
//! | Capability  | Implementation Crate       |
//! |-------------|----------------------------|
//! | RowSource   | `provider-supabase`, `bridge-server` (in-memory) |
//! | SheetSink   | `provider-google-sheets`, `bridge-server` (in-memory) |
//! | ChangeFeed  | `bridge-server` (Postgres `LISTEN`, broadcast channel) |
//! | HttpClient  | `bridge-server` (reqwest) |
//!
//! ## Error Handling
//!
//! All bridge traits use the [`BridgeError`](error::BridgeError) type. Adapters
//! convert their own error enums into it and keep the message actionable.
//!
//! ## Thread Safety
//!
//! All bridge traits require `Send + Sync` so a single adapter instance can be
//! shared across every scheduler and request handler through `Arc`.

pub mod error;
pub mod http;
pub mod notify;
pub mod row_source;
pub mod sink;
pub mod time;

pub use error::BridgeError;

// Re-export commonly used types
pub use http::{HttpClient, HttpMethod, HttpRequest, HttpResponse, RetryPolicy};
pub use notify::{ChangeFeed, ChangeStream};
pub use row_source::{Filter, Order, Query, Row, RowSource};
pub use sink::{SheetRow, SheetSink};
pub use time::{Clock, ManualClock, SystemClock};
