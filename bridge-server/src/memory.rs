//! In-memory bridge implementations
//!
//! Used for local development without cloud credentials and as the default
//! fixtures in integration tests.

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    notify::{ChangeFeed, ChangeStream},
    row_source::{compare_values, Filter, Query, Row, RowSource},
    sink::{SheetRow, SheetSink},
};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::sync::{PoisonError, RwLock};
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Table store held in process memory.
#[derive(Default)]
pub struct InMemoryRowSource {
    tables: RwLock<HashMap<String, Vec<Row>>>,
}

impl InMemoryRowSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a row; non-object values are ignored.
    pub fn insert(&self, table: &str, row: Value) {
        let Value::Object(row) = row else {
            warn!(table, "Ignoring non-object row");
            return;
        };
        let mut tables = self.tables.write().unwrap_or_else(PoisonError::into_inner);
        tables.entry(table.to_string()).or_default().push(row);
    }

    /// Snapshot of a table's rows in insertion order.
    pub fn rows(&self, table: &str) -> Vec<Row> {
        let tables = self.tables.read().unwrap_or_else(PoisonError::into_inner);
        tables.get(table).cloned().unwrap_or_default()
    }

    pub fn row_count(&self, table: &str) -> usize {
        let tables = self.tables.read().unwrap_or_else(PoisonError::into_inner);
        tables.get(table).map_or(0, Vec::len)
    }
}

#[async_trait]
impl RowSource for InMemoryRowSource {
    async fn select(&self, table: &str, query: &Query) -> Result<Vec<Row>> {
        let mut rows: Vec<Row> = {
            let tables = self.tables.read().unwrap_or_else(PoisonError::into_inner);
            tables
                .get(table)
                .map(|rows| rows.iter().filter(|r| query.matches(r)).cloned().collect())
                .unwrap_or_default()
        };

        if let Some(order) = &query.order {
            rows.sort_by(|a, b| {
                let ordering = match (a.get(&order.column), b.get(&order.column)) {
                    (Some(x), Some(y)) => compare_values(x, y).unwrap_or(Ordering::Equal),
                    (Some(_), None) => Ordering::Less,
                    (None, Some(_)) => Ordering::Greater,
                    (None, None) => Ordering::Equal,
                };
                if order.descending {
                    ordering.reverse()
                } else {
                    ordering
                }
            });
        }

        if let Some(limit) = query.limit {
            rows.truncate(limit);
        }

        debug!(table, rows = rows.len(), "In-memory select");
        Ok(rows)
    }

    async fn delete(&self, table: &str, filters: &[Filter]) -> Result<u64> {
        let mut tables = self.tables.write().unwrap_or_else(PoisonError::into_inner);
        let Some(rows) = tables.get_mut(table) else {
            return Ok(0);
        };
        let before = rows.len();
        rows.retain(|row| !filters.iter().all(|f| f.matches(row)));
        Ok((before - rows.len()) as u64)
    }
}

/// Spreadsheet held in process memory, one vector of rows per tab.
///
/// Ranges passed to `read_range` select the whole tab.
#[derive(Default)]
pub struct InMemorySheetSink {
    tabs: RwLock<BTreeMap<String, Vec<SheetRow>>>,
    writes: AtomicUsize,
}

impl InMemorySheetSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tab(&self, name: &str) -> Option<Vec<SheetRow>> {
        let tabs = self.tabs.read().unwrap_or_else(PoisonError::into_inner);
        tabs.get(name).cloned()
    }

    pub fn tab_names(&self) -> Vec<String> {
        let tabs = self.tabs.read().unwrap_or_else(PoisonError::into_inner);
        tabs.keys().cloned().collect()
    }

    /// Number of successful `write_range` calls so far.
    pub fn write_count(&self) -> usize {
        self.writes.load(AtomicOrdering::SeqCst)
    }
}

#[async_trait]
impl SheetSink for InMemorySheetSink {
    async fn write_range(&self, tab: &str, rows: &[SheetRow]) -> Result<()> {
        let mut tabs = self.tabs.write().unwrap_or_else(PoisonError::into_inner);
        let existing = tabs.entry(tab.to_string()).or_default();
        for (index, row) in rows.iter().enumerate() {
            match existing.get_mut(index) {
                Some(slot) => *slot = row.clone(),
                None => existing.push(row.clone()),
            }
        }
        self.writes.fetch_add(1, AtomicOrdering::SeqCst);
        Ok(())
    }

    async fn read_range(&self, tab: &str, _range: &str) -> Result<Vec<SheetRow>> {
        Ok(self.tab(tab).unwrap_or_default())
    }

    async fn clear(&self, tab: &str) -> Result<()> {
        let mut tabs = self.tabs.write().unwrap_or_else(PoisonError::into_inner);
        tabs.insert(tab.to_string(), Vec::new());
        Ok(())
    }
}

#[derive(Debug, Clone)]
enum FeedMessage {
    Payload { channel: String, payload: String },
    Disconnect,
}

/// Change feed backed by a broadcast channel.
///
/// [`publish`](ChannelChangeFeed::publish) plays the role of `NOTIFY`;
/// [`disconnect_all`](ChannelChangeFeed::disconnect_all) simulates a dropped
/// database connection on every open subscription.
pub struct ChannelChangeFeed {
    sender: broadcast::Sender<FeedMessage>,
    subscriptions: AtomicUsize,
}

impl ChannelChangeFeed {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            subscriptions: AtomicUsize::new(0),
        }
    }

    /// Deliver `payload` to every subscriber of `channel`. Returns the receiver count.
    pub fn publish(&self, channel: &str, payload: impl Into<String>) -> usize {
        self.sender
            .send(FeedMessage::Payload {
                channel: channel.to_string(),
                payload: payload.into(),
            })
            .unwrap_or(0)
    }

    pub fn disconnect_all(&self) {
        let _ = self.sender.send(FeedMessage::Disconnect);
    }

    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Total number of subscriptions ever opened.
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.load(AtomicOrdering::SeqCst)
    }
}

impl Default for ChannelChangeFeed {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl ChangeFeed for ChannelChangeFeed {
    async fn subscribe(&self, channel: &str) -> Result<Box<dyn ChangeStream>> {
        self.subscriptions.fetch_add(1, AtomicOrdering::SeqCst);
        Ok(Box::new(ChannelChangeStream {
            channel: channel.to_string(),
            receiver: self.sender.subscribe(),
        }))
    }
}

struct ChannelChangeStream {
    channel: String,
    receiver: broadcast::Receiver<FeedMessage>,
}

#[async_trait]
impl ChangeStream for ChannelChangeStream {
    async fn next(&mut self) -> Option<Result<String>> {
        loop {
            match self.receiver.recv().await {
                Ok(FeedMessage::Payload { channel, payload }) if channel == self.channel => {
                    return Some(Ok(payload));
                }
                Ok(FeedMessage::Payload { .. }) => continue,
                Ok(FeedMessage::Disconnect) => {
                    return Some(Err(BridgeError::ConnectionLost(
                        "change feed disconnected".to_string(),
                    )));
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(channel = %self.channel, missed, "Change stream lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
