//! Change Notification Abstraction
//!
//! A dedicated subscription to the store's change channel (Postgres
//! `LISTEN`/`NOTIFY` in production). Payloads are delivered raw; decoding is
//! the listener's concern so a malformed payload never tears down the stream.

use async_trait::async_trait;

use crate::error::Result;

/// An open subscription.
#[async_trait]
pub trait ChangeStream: Send {
    /// Wait for the next payload.
    ///
    /// - `Some(Ok(payload))`: a notification arrived
    /// - `Some(Err(_))`: the connection failed; the caller should resubscribe
    /// - `None`: the feed was closed for good
    async fn next(&mut self) -> Option<Result<String>>;
}

/// Source of change subscriptions.
#[async_trait]
pub trait ChangeFeed: Send + Sync {
    /// Open a new subscription to `channel`.
    async fn subscribe(&self, channel: &str) -> Result<Box<dyn ChangeStream>>;
}
