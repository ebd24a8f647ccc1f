//! Periodic deletion of chat sessions that never received a message

use crate::error::{Result, SyncError};
use crate::retry::with_timeout;
use crate::supervisor::{catch_cycle, ScheduledLoop, TaskSupervisor};
use bridge_traits::row_source::{Filter, RowSource};
use bridge_traits::time::Clock;
use chrono::{DateTime, Utc};
use core_runtime::config::SyncSettings;
use core_runtime::events::{CleanupEvent, CoreEvent, EventBus};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument};

pub const SESSIONS_TABLE: &str = "chat_sessions";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CleanupReport {
    pub success: bool,
    pub deleted_count: u64,
    /// Sessions created before this instant were eligible
    pub cutoff_date: DateTime<Utc>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CleanupStatus {
    pub running: bool,
    pub interval_hours: u64,
    pub days_old: i64,
    pub total_deleted: u64,
    pub last_run: Option<CleanupReport>,
}

struct CleanupInner {
    source: Arc<dyn RowSource>,
    settings: Arc<SyncSettings>,
    clock: Arc<dyn Clock>,
    events: Option<EventBus>,
    running: AtomicBool,
    total_deleted: AtomicU64,
    last_run: Mutex<Option<CleanupReport>>,
}

/// Deletes chat sessions that have no messages and are older than the
/// configured age, on a fixed schedule and on demand.
///
/// After a failed cycle the loop waits `cleanup_error_retry` instead of the
/// regular interval.
pub struct SessionCleanupService {
    inner: Arc<CleanupInner>,
    supervisor: TaskSupervisor,
    scheduled: tokio::sync::Mutex<Option<ScheduledLoop>>,
}

impl SessionCleanupService {
    /// Create a stopped service deleting from [`SESSIONS_TABLE`] in `source`.
    ///
    /// The interval and the age are read from `settings` every cycle; the
    /// cutoff is computed from `clock`.
    pub fn new(
        source: Arc<dyn RowSource>,
        settings: Arc<SyncSettings>,
        clock: Arc<dyn Clock>,
        supervisor: TaskSupervisor,
    ) -> Self {
        Self {
            inner: Arc::new(CleanupInner {
                source,
                settings,
                clock,
                events: None,
                running: AtomicBool::new(false),
                total_deleted: AtomicU64::new(0),
                last_run: Mutex::new(None),
            }),
            supervisor,
            scheduled: tokio::sync::Mutex::new(None),
        }
    }

    /// Must be called before the service is shared.
    pub fn with_event_bus(mut self, events: EventBus) -> Self {
        if let Some(inner) = Arc::get_mut(&mut self.inner) {
            inner.events = Some(events);
        }
        self
    }

    /// Start the cleanup loop. Returns false when it was already running.
    ///
    /// The first cleanup runs one interval after start.
    pub async fn start(&self) -> bool {
        let mut scheduled = self.scheduled.lock().await;
        if scheduled.is_some() {
            info!("Session cleanup already running");
            return false;
        }

        self.inner.running.store(true, Ordering::SeqCst);
        let inner = Arc::clone(&self.inner);
        *scheduled = Some(
            self.supervisor
                .spawn_loop("session-cleanup", move |cancel| cleanup_loop(inner, cancel)),
        );
        info!(
            interval_hours = self.inner.settings.snapshot().cleanup_interval_hours,
            "Session cleanup started"
        );
        true
    }

    /// Cancel the loop and wait for it. Returns false when it was not running.
    pub async fn stop(&self) -> bool {
        let Some(scheduled) = self.scheduled.lock().await.take() else {
            return false;
        };
        scheduled.stop().await;
        self.inner.running.store(false, Ordering::SeqCst);
        info!("Session cleanup stopped");
        true
    }

    /// Run one cleanup now. Failures, including an out-of-range age and a
    /// panicking row source, are reported in the result, never raised.
    pub async fn force_cleanup_now(&self) -> CleanupReport {
        self.inner.run_cleanup().await
    }

    pub fn status(&self) -> CleanupStatus {
        let config = self.inner.settings.snapshot();
        CleanupStatus {
            running: self.inner.running.load(Ordering::SeqCst),
            interval_hours: config.cleanup_interval_hours,
            days_old: config.cleanup_days_old,
            total_deleted: self.inner.total_deleted.load(Ordering::SeqCst),
            last_run: self
                .inner
                .last_run
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
        }
    }
}

impl CleanupInner {
    #[instrument(skip(self))]
    async fn run_cleanup(&self) -> CleanupReport {
        let config = self.settings.snapshot();
        let now = self.clock.now();

        let report = match stale_cutoff(now, config.cleanup_days_old) {
            Some(cutoff) => {
                let deleted = catch_cycle("session-cleanup", self.delete_stale(cutoff, &config))
                    .await
                    .unwrap_or_else(|panic| Err(SyncError::Panicked(panic)));
                match deleted {
                    Ok(deleted_count) => {
                        self.total_deleted.fetch_add(deleted_count, Ordering::SeqCst);
                        info!(
                            deleted_count,
                            cutoff = %cutoff.to_rfc3339(),
                            "Stale sessions deleted"
                        );
                        self.emit(CleanupEvent::Completed {
                            deleted_count,
                            cutoff_date: cutoff.to_rfc3339(),
                        });
                        CleanupReport {
                            success: true,
                            deleted_count,
                            cutoff_date: cutoff,
                            error: None,
                        }
                    }
                    Err(e) => self.failed(cutoff, e.to_string()),
                }
            }
            None => self.failed(
                now,
                format!(
                    "Session cleanup age of {} days is out of range",
                    config.cleanup_days_old
                ),
            ),
        };

        *self.last_run.lock().unwrap_or_else(PoisonError::into_inner) = Some(report.clone());
        report
    }

    fn failed(&self, cutoff: DateTime<Utc>, message: String) -> CleanupReport {
        error!(error = %message, "Session cleanup failed");
        self.emit(CleanupEvent::Failed {
            message: message.clone(),
        });
        CleanupReport {
            success: false,
            deleted_count: 0,
            cutoff_date: cutoff,
            error: Some(message),
        }
    }

    async fn delete_stale(
        &self,
        cutoff: DateTime<Utc>,
        config: &core_runtime::config::SyncConfig,
    ) -> Result<u64> {
        let filters = [
            Filter::empty("chat_history"),
            Filter::before("created_at", cutoff),
        ];
        with_timeout(
            config.source_timeout,
            "delete stale sessions",
            SyncError::Source,
            self.source.delete(SESSIONS_TABLE, &filters),
        )
        .await
    }

    fn emit(&self, event: CleanupEvent) {
        if let Some(events) = &self.events {
            let _ = events.emit(CoreEvent::Cleanup(event));
        }
    }
}

/// `None` when the age does not fit a timestamp offset from `now`.
fn stale_cutoff(now: DateTime<Utc>, days_old: i64) -> Option<DateTime<Utc>> {
    chrono::Duration::try_days(days_old).and_then(|age| now.checked_sub_signed(age))
}

async fn cleanup_loop(inner: Arc<CleanupInner>, cancel: CancellationToken) {
    let mut last_failed = false;
    loop {
        let config = inner.settings.snapshot();
        let wait = if last_failed {
            config.cleanup_error_retry
        } else {
            config.cleanup_interval()
        };
        debug!(wait_secs = wait.as_secs(), "Next session cleanup scheduled");

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(wait) => {}
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            report = inner.run_cleanup() => last_failed = !report.success,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_stale_cutoff_rejects_out_of_range_age() {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();

        assert_eq!(
            stale_cutoff(now, 1),
            Some(Utc.with_ymd_and_hms(2024, 5, 31, 0, 0, 0).unwrap())
        );
        assert_eq!(stale_cutoff(now, i64::MAX / 2), None);
        assert_eq!(stale_cutoff(now, 200_000_000), None);
    }
}
