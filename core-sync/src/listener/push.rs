//! Listener driven by the store's change-notification channel

use super::{
    id_string, CallbackId, ChangeAction, ChangeListener, ChangeNotification, ListenerCore,
    ListenerStatus, SyncCallback,
};
use crate::error::{Result, SyncError};
use crate::supervisor::{ScheduledLoop, TaskSupervisor};
use async_trait::async_trait;
use bridge_traits::notify::ChangeFeed;
use bridge_traits::time::Clock;
use chrono::{DateTime, Utc};
use core_runtime::config::{IntervalKind, ListenerStrategy, SyncSettings};
use core_runtime::events::{EventBus, ListenerEvent};
use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

struct PushInner {
    core: ListenerCore,
    feed: Arc<dyn ChangeFeed>,
    channel: String,
    settings: Arc<SyncSettings>,
    clock: Arc<dyn Clock>,
}

/// Keeps one subscription open and resubscribes after
/// `listener_reconnect_delay` whenever it drops.
pub struct PushChangeListener {
    inner: Arc<PushInner>,
    supervisor: TaskSupervisor,
    scheduled: tokio::sync::Mutex<Option<ScheduledLoop>>,
}

impl PushChangeListener {
    /// Create a stopped listener subscribing to `channel` on `feed`.
    pub fn new(
        feed: Arc<dyn ChangeFeed>,
        channel: impl Into<String>,
        settings: Arc<SyncSettings>,
        clock: Arc<dyn Clock>,
        supervisor: TaskSupervisor,
    ) -> Self {
        Self {
            inner: Arc::new(PushInner {
                core: ListenerCore::new(ListenerStrategy::Push, None),
                feed,
                channel: channel.into(),
                settings,
                clock,
            }),
            supervisor,
            scheduled: tokio::sync::Mutex::new(None),
        }
    }

    /// Publish listener events. Must be called before the listener is shared.
    pub fn with_event_bus(mut self, events: EventBus) -> Self {
        match Arc::get_mut(&mut self.inner) {
            Some(inner) => inner.core.events = Some(events),
            None => warn!("Listener already shared, event bus not attached"),
        }
        self
    }

    pub fn channel(&self) -> &str {
        &self.inner.channel
    }
}

#[async_trait]
impl ChangeListener for PushChangeListener {
    fn strategy(&self) -> ListenerStrategy {
        ListenerStrategy::Push
    }

    async fn start(&self) -> bool {
        let mut scheduled = self.scheduled.lock().await;
        if scheduled.is_some() {
            info!("Push listener already running");
            return false;
        }

        self.inner.core.set_listening(true);
        let inner = Arc::clone(&self.inner);
        *scheduled = Some(
            self.supervisor
                .spawn_loop("push-listener", move |cancel| listen_loop(inner, cancel)),
        );
        info!(channel = %self.inner.channel, "Push listener started");
        true
    }

    async fn stop(&self) -> bool {
        let Some(scheduled) = self.scheduled.lock().await.take() else {
            return false;
        };
        scheduled.stop().await;
        self.inner.core.set_connection_active(false);
        self.inner.core.set_listening(false);
        info!(channel = %self.inner.channel, "Push listener stopped");
        true
    }

    fn add_callback(&self, callback: SyncCallback) -> CallbackId {
        self.inner.core.add_callback(callback)
    }

    fn remove_callback(&self, id: CallbackId) -> bool {
        self.inner.core.remove_callback(id)
    }

    fn status(&self) -> ListenerStatus {
        self.inner.core.status()
    }
}

async fn listen_loop(inner: Arc<PushInner>, cancel: CancellationToken) {
    let channel = inner.channel.as_str();
    loop {
        let subscribed = tokio::select! {
            _ = cancel.cancelled() => break,
            subscribed = inner.feed.subscribe(channel) => subscribed,
        };

        let reason = match subscribed {
            Ok(mut stream) => {
                inner.core.set_connection_active(true);
                info!(channel, "Subscribed to change feed");
                let reason = loop {
                    let item = tokio::select! {
                        _ = cancel.cancelled() => {
                            inner.core.set_connection_active(false);
                            return;
                        }
                        item = stream.next() => item,
                    };
                    match item {
                        Some(Ok(payload)) => match decode_payload(&payload, inner.clock.now()) {
                            Ok(notification) => inner.core.deliver(&notification),
                            Err(e) => warn!(channel, error = %e, "Dropping change notification"),
                        },
                        Some(Err(e)) => break e.to_string(),
                        None => break "change stream ended".to_string(),
                    }
                };
                inner.core.set_connection_active(false);
                reason
            }
            Err(e) => e.to_string(),
        };

        let delay = inner.settings.interval(IntervalKind::ListenerReconnectDelay);
        warn!(
            channel,
            error = %reason,
            retry_in_secs = delay.as_secs(),
            "Change feed connection lost"
        );
        inner.core.emit(ListenerEvent::ConnectionLost {
            message: reason,
            retry_in_secs: delay.as_secs(),
        });

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
        debug!(channel, "Resubscribing to change feed");
    }
}

/// Decode a change payload.
///
/// Expected shape: `{"table": .., "action"|"type": .., "record": {..},
/// "old_record": {..}, "timestamp": ..}`. The entity id comes from
/// `record.id`, falling back to `old_record.id` for deletes. Without a
/// timestamp the notification is stamped with `received_at`.
pub fn decode_payload(payload: &str, received_at: DateTime<Utc>) -> Result<ChangeNotification> {
    let value: Value =
        serde_json::from_str(payload).map_err(|e| SyncError::Decode(e.to_string()))?;

    let table = value
        .get("table")
        .and_then(Value::as_str)
        .ok_or_else(|| SyncError::Decode("missing table".to_string()))?;
    let action = value
        .get("action")
        .or_else(|| value.get("type"))
        .and_then(Value::as_str)
        .ok_or_else(|| SyncError::Decode("missing action".to_string()))?
        .parse::<ChangeAction>()
        .map_err(SyncError::Decode)?;

    let entity_id = ["record", "old_record"]
        .iter()
        .filter_map(|key| value.get(*key))
        .find_map(|record| record.get("id").and_then(id_string));

    let timestamp = value
        .get("timestamp")
        .and_then(Value::as_str)
        .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
        .map(|ts| ts.with_timezone(&Utc))
        .unwrap_or(received_at);

    Ok(ChangeNotification {
        entity_id,
        action,
        action_type: table.to_string(),
        timestamp,
    })
}
