//! # Change Listener
//!
//! Detects source-table changes and invokes registered callbacks.
//!
//! Two strategies implement [`ChangeListener`]:
//!
//! - [`PushChangeListener`] holds a subscription to the store's notification
//!   channel and reconnects after a fixed delay when it drops.
//! - [`PollChangeListener`] queries for rows newer than a watermark on a fixed
//!   interval.
//!
//! The strategy is picked when the process is wired, never at runtime inside
//! a listener.

mod poll;
mod push;

pub use poll::{default_targets, PollChangeListener, PollTarget};
pub use push::{decode_payload, PushChangeListener};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use core_runtime::config::ListenerStrategy;
use core_runtime::events::{CoreEvent, EventBus, ListenerEvent};
use serde::Serialize;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, error, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeAction {
    Insert,
    Update,
    Delete,
}

impl ChangeAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeAction::Insert => "insert",
            ChangeAction::Update => "update",
            ChangeAction::Delete => "delete",
        }
    }
}

impl fmt::Display for ChangeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChangeAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "insert" => Ok(ChangeAction::Insert),
            "update" => Ok(ChangeAction::Update),
            "delete" => Ok(ChangeAction::Delete),
            other => Err(format!("unknown change action: {}", other)),
        }
    }
}

/// One observed change, as handed to callbacks.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChangeNotification {
    /// Primary key of the changed row, when the source reported one
    pub entity_id: Option<String>,
    pub action: ChangeAction,
    /// Table the change happened in
    pub action_type: String,
    pub timestamp: DateTime<Utc>,
}

pub type SyncCallback = Arc<dyn Fn(&ChangeNotification) -> anyhow::Result<()> + Send + Sync>;

/// Box a closure as a [`SyncCallback`].
pub fn sync_callback<F>(f: F) -> SyncCallback
where
    F: Fn(&ChangeNotification) -> anyhow::Result<()> + Send + Sync + 'static,
{
    Arc::new(f)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallbackId(Uuid);

impl fmt::Display for CallbackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Ordered callbacks; registering the same callback twice calls it twice.
#[derive(Default)]
pub struct CallbackRegistry {
    entries: Mutex<Vec<(CallbackId, SyncCallback)>>,
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, callback: SyncCallback) -> CallbackId {
        let id = CallbackId(Uuid::new_v4());
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, callback));
        id
    }

    pub fn remove(&self, id: CallbackId) -> bool {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|(entry_id, _)| *entry_id != id);
        entries.len() != before
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Invoke every callback in registration order. Returns how many succeeded.
    ///
    /// A callback that errors or panics is logged and does not stop the rest.
    pub fn dispatch(&self, notification: &ChangeNotification) -> usize {
        let callbacks: Vec<(CallbackId, SyncCallback)> = self
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        let mut delivered = 0;
        for (id, callback) in callbacks {
            match panic::catch_unwind(AssertUnwindSafe(|| callback(notification))) {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(e)) => {
                    warn!(
                        callback = %id,
                        table = %notification.action_type,
                        error = %e,
                        "Change callback failed"
                    )
                }
                Err(_) => {
                    error!(
                        callback = %id,
                        table = %notification.action_type,
                        "Change callback panicked"
                    )
                }
            }
        }
        delivered
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ListenerStatus {
    pub strategy: ListenerStrategy,
    pub listening: bool,
    pub callback_count: usize,
    pub connection_active: bool,
    pub notifications_received: u64,
    pub last_notification_at: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait ChangeListener: Send + Sync {
    fn strategy(&self) -> ListenerStrategy;

    /// Returns false when already listening.
    async fn start(&self) -> bool;

    /// Cancel and wait for the listen loop. Returns false when not listening.
    async fn stop(&self) -> bool;

    fn add_callback(&self, callback: SyncCallback) -> CallbackId;

    fn remove_callback(&self, id: CallbackId) -> bool;

    fn status(&self) -> ListenerStatus;
}

/// Row identifiers arrive as text or numbers depending on the column type.
pub(crate) fn id_string(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// State shared by both strategies and their loops.
pub(crate) struct ListenerCore {
    strategy: ListenerStrategy,
    callbacks: CallbackRegistry,
    pub(crate) events: Option<EventBus>,
    listening: AtomicBool,
    connection_active: AtomicBool,
    received: AtomicU64,
    last_notification_at: Mutex<Option<DateTime<Utc>>>,
}

impl ListenerCore {
    pub(crate) fn new(strategy: ListenerStrategy, events: Option<EventBus>) -> Self {
        Self {
            strategy,
            callbacks: CallbackRegistry::new(),
            events,
            listening: AtomicBool::new(false),
            connection_active: AtomicBool::new(false),
            received: AtomicU64::new(0),
            last_notification_at: Mutex::new(None),
        }
    }

    pub(crate) fn deliver(&self, notification: &ChangeNotification) {
        self.received.fetch_add(1, Ordering::SeqCst);
        *self
            .last_notification_at
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(notification.timestamp);

        debug!(
            table = %notification.action_type,
            action = %notification.action,
            entity_id = ?notification.entity_id,
            "Change detected"
        );
        self.emit(ListenerEvent::ChangeDetected {
            table: notification.action_type.clone(),
            action: notification.action.to_string(),
            entity_id: notification.entity_id.clone(),
        });
        self.callbacks.dispatch(notification);
    }

    pub(crate) fn add_callback(&self, callback: SyncCallback) -> CallbackId {
        self.callbacks.add(callback)
    }

    pub(crate) fn remove_callback(&self, id: CallbackId) -> bool {
        self.callbacks.remove(id)
    }

    pub(crate) fn emit(&self, event: ListenerEvent) {
        if let Some(events) = &self.events {
            let _ = events.emit(CoreEvent::Listener(event));
        }
    }

    pub(crate) fn set_listening(&self, listening: bool) {
        self.listening.store(listening, Ordering::SeqCst);
        let strategy = self.strategy.as_str().to_string();
        self.emit(if listening {
            ListenerEvent::Started { strategy }
        } else {
            ListenerEvent::Stopped { strategy }
        });
    }

    pub(crate) fn set_connection_active(&self, active: bool) {
        self.connection_active.store(active, Ordering::SeqCst);
    }

    pub(crate) fn status(&self) -> ListenerStatus {
        ListenerStatus {
            strategy: self.strategy,
            listening: self.listening.load(Ordering::SeqCst),
            callback_count: self.callbacks.len(),
            connection_active: self.connection_active.load(Ordering::SeqCst),
            notifications_received: self.received.load(Ordering::SeqCst),
            last_notification_at: *self
                .last_notification_at
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn notification() -> ChangeNotification {
        ChangeNotification {
            entity_id: Some("42".to_string()),
            action: ChangeAction::Insert,
            action_type: "quiz_responses".to_string(),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_dispatch_survives_error_and_panic() {
        let registry = CallbackRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));

        registry.add(sync_callback(|_| Err(anyhow::anyhow!("sheet offline"))));
        registry.add(sync_callback(|_| panic!("bad callback")));
        let counter = Arc::clone(&calls);
        registry.add(sync_callback(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }));

        assert_eq!(registry.dispatch(&notification()), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_duplicates_are_called_in_order() {
        let registry = CallbackRegistry::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let first = Arc::clone(&order);
        let callback = sync_callback(move |_| {
            first.lock().unwrap().push("a");
            Ok(())
        });
        registry.add(callback.clone());
        let second = Arc::clone(&order);
        let id = registry.add(sync_callback(move |_| {
            second.lock().unwrap().push("b");
            Ok(())
        }));
        registry.add(callback);

        registry.dispatch(&notification());
        assert_eq!(*order.lock().unwrap(), vec!["a", "b", "a"]);

        assert!(registry.remove(id));
        assert!(!registry.remove(id));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_action_parsing() {
        assert_eq!("INSERT".parse::<ChangeAction>().unwrap(), ChangeAction::Insert);
        assert_eq!(" delete ".parse::<ChangeAction>().unwrap(), ChangeAction::Delete);
        assert!("truncate".parse::<ChangeAction>().is_err());
    }
}
