//! Listener that polls source tables for rows newer than a watermark

use super::{
    id_string, CallbackId, ChangeAction, ChangeListener, ChangeNotification, ListenerCore,
    ListenerStatus, SyncCallback,
};
use crate::error::{Result, SyncError};
use crate::family::FAMILY_SPECS;
use crate::retry::with_timeout;
use crate::supervisor::{catch_cycle, ScheduledLoop, TaskSupervisor};
use async_trait::async_trait;
use bridge_traits::row_source::{Filter, Query, RowSource};
use bridge_traits::time::Clock;
use chrono::{DateTime, Utc};
use core_runtime::config::{IntervalKind, ListenerStrategy, SyncSettings};
use core_runtime::events::EventBus;
use serde_json::Value;
use std::sync::{Arc, Mutex, PoisonError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// A table watched by the poller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollTarget {
    pub table: String,
    pub timestamp_column: String,
    pub id_column: String,
    /// Reported action for rows found on this table
    pub action: ChangeAction,
}

/// One target per exported family. Tables keyed by `created_at` only see
/// inserts; the others report updates.
pub fn default_targets() -> Vec<PollTarget> {
    FAMILY_SPECS
        .iter()
        .map(|spec| PollTarget {
            table: spec.table.to_string(),
            timestamp_column: spec.updated_column.to_string(),
            id_column: "id".to_string(),
            action: if spec.updated_column == "created_at" {
                ChangeAction::Insert
            } else {
                ChangeAction::Update
            },
        })
        .collect()
}

struct PollInner {
    core: ListenerCore,
    source: Arc<dyn RowSource>,
    targets: Vec<PollTarget>,
    settings: Arc<SyncSettings>,
    clock: Arc<dyn Clock>,
    watermark: Mutex<DateTime<Utc>>,
}

/// Listener that finds changes by querying each target for rows newer than
/// the last successful poll.
///
/// A failed or panicking poll keeps the watermark, so the rows are picked
/// up by the next successful one.
pub struct PollChangeListener {
    inner: Arc<PollInner>,
    supervisor: TaskSupervisor,
    scheduled: tokio::sync::Mutex<Option<ScheduledLoop>>,
}

impl PollChangeListener {
    /// Create a stopped poller over `targets`.
    ///
    /// The watermark starts at the current time and is reset on every start,
    /// so rows written while the poller was stopped are not reported.
    pub fn new(
        source: Arc<dyn RowSource>,
        targets: Vec<PollTarget>,
        settings: Arc<SyncSettings>,
        clock: Arc<dyn Clock>,
        supervisor: TaskSupervisor,
    ) -> Self {
        let now = clock.now();
        Self {
            inner: Arc::new(PollInner {
                core: ListenerCore::new(ListenerStrategy::Poll, None),
                source,
                targets,
                settings,
                clock,
                watermark: Mutex::new(now),
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

    /// Rows newer than this are reported by the next poll.
    pub fn watermark(&self) -> DateTime<Utc> {
        *self
            .inner
            .watermark
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Run one poll cycle now. Returns the number of changes dispatched.
    pub async fn poll_once(&self) -> Result<usize> {
        self.inner.poll_once().await
    }
}

impl PollInner {
    /// Collect from every target first; the watermark only moves when all
    /// selects succeeded, and it moves to the poll's start time.
    #[instrument(skip(self))]
    async fn poll_once(&self) -> Result<usize> {
        let poll_started = self.clock.now();
        let since = *self.watermark.lock().unwrap_or_else(PoisonError::into_inner);
        let source_timeout = self.settings.snapshot().source_timeout;

        let mut changes = Vec::new();
        for target in &self.targets {
            let query = Query::new()
                .filter(Filter::after(&target.timestamp_column, since))
                .order_by(&target.timestamp_column, false);
            let rows = match with_timeout(
                source_timeout,
                &format!("poll {}", target.table),
                SyncError::Source,
                self.source.select(&target.table, &query),
            )
            .await
            {
                Ok(rows) => rows,
                Err(e) => {
                    self.core.set_connection_active(false);
                    return Err(e);
                }
            };

            changes.extend(rows.iter().map(|row| ChangeNotification {
                entity_id: row.get(&target.id_column).and_then(id_string),
                action: target.action,
                action_type: target.table.clone(),
                timestamp: row
                    .get(&target.timestamp_column)
                    .and_then(Value::as_str)
                    .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
                    .map(|ts| ts.with_timezone(&Utc))
                    .unwrap_or(poll_started),
            }));
        }

        *self.watermark.lock().unwrap_or_else(PoisonError::into_inner) = poll_started;
        self.core.set_connection_active(true);

        if !changes.is_empty() {
            debug!(changes = changes.len(), "Poll found changes");
        }
        for notification in &changes {
            self.core.deliver(notification);
        }
        Ok(changes.len())
    }
}

#[async_trait]
impl ChangeListener for PollChangeListener {
    fn strategy(&self) -> ListenerStrategy {
        ListenerStrategy::Poll
    }

    async fn start(&self) -> bool {
        let mut scheduled = self.scheduled.lock().await;
        if scheduled.is_some() {
            info!("Poll listener already running");
            return false;
        }

        *self
            .inner
            .watermark
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = self.inner.clock.now();
        self.inner.core.set_listening(true);

        let inner = Arc::clone(&self.inner);
        *scheduled = Some(
            self.supervisor
                .spawn_loop("poll-listener", move |cancel| poll_loop(inner, cancel)),
        );
        info!(targets = self.inner.targets.len(), "Poll listener started");
        true
    }

    async fn stop(&self) -> bool {
        let Some(scheduled) = self.scheduled.lock().await.take() else {
            return false;
        };
        scheduled.stop().await;
        self.inner.core.set_connection_active(false);
        self.inner.core.set_listening(false);
        info!("Poll listener stopped");
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

async fn poll_loop(inner: Arc<PollInner>, cancel: CancellationToken) {
    loop {
        let interval = inner.settings.interval(IntervalKind::ListenerPollInterval);
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            polled = catch_cycle("poll-listener", inner.poll_once()) => match polled {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => warn!(error = %e, "Poll failed, watermark kept"),
                Err(_) => inner.core.set_connection_active(false),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_targets_cover_every_family() {
        let targets = default_targets();

        assert_eq!(targets.len(), FAMILY_SPECS.len());
        let profiles = targets.iter().find(|t| t.table == "user_profiles").unwrap();
        assert_eq!(profiles.timestamp_column, "updated_at");
        assert_eq!(profiles.action, ChangeAction::Update);
        let quizzes = targets.iter().find(|t| t.table == "quiz_responses").unwrap();
        assert_eq!(quizzes.action, ChangeAction::Insert);
    }
}
