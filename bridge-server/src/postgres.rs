//! Postgres `LISTEN` change feed

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    notify::{ChangeFeed, ChangeStream},
};
use sqlx::postgres::PgListener;
use tracing::{debug, info};

/// Change feed that holds one dedicated `LISTEN` connection per subscription.
///
/// Triggers in the database are expected to `pg_notify(channel, payload)`
/// with a JSON payload describing the changed row.
pub struct PgChangeFeed {
    database_url: String,
}

impl PgChangeFeed {
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
        }
    }
}

#[async_trait]
impl ChangeFeed for PgChangeFeed {
    async fn subscribe(&self, channel: &str) -> Result<Box<dyn ChangeStream>> {
        let mut listener = PgListener::connect(&self.database_url)
            .await
            .map_err(|e| BridgeError::ConnectionLost(format!("LISTEN connect failed: {}", e)))?;

        listener
            .listen(channel)
            .await
            .map_err(|e| BridgeError::ConnectionLost(format!("LISTEN {} failed: {}", channel, e)))?;

        info!(channel, "Subscribed to Postgres notifications");
        Ok(Box::new(PgChangeStream { listener }))
    }
}

struct PgChangeStream {
    listener: PgListener,
}

#[async_trait]
impl ChangeStream for PgChangeStream {
    async fn next(&mut self) -> Option<Result<String>> {
        // try_recv yields Ok(None) once when the connection drops
        match self.listener.try_recv().await {
            Ok(Some(notification)) => {
                debug!(channel = notification.channel(), "Received notification");
                Some(Ok(notification.payload().to_string()))
            }
            Ok(None) => Some(Err(BridgeError::ConnectionLost(
                "Postgres listener connection closed".to_string(),
            ))),
            Err(e) => Some(Err(BridgeError::ConnectionLost(e.to_string()))),
        }
    }
}
