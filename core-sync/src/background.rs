//! # Background Sync
//!
//! Unattended periodic full export with retry and health reporting.
//!
//! ## Lifecycle
//!
//! `Stopped -> Running -> (Paused <-> Running) -> Stopped`
//!
//! The loop sleeps for the configured interval (re-read every cycle so admin
//! changes apply without a restart), skips the cycle while interactive
//! requests are in flight, and otherwise runs a forced export under the retry
//! policy. Every attempt is folded into [`SyncStatistics`]; a panicking
//! attempt counts as a failure and the loop carries on.
//!
//! `stop()` cancels the loop and waits for it to exit, so a `start()` right
//! after cannot overlap a loop that is still winding down.

use crate::manual::FullSync;
use crate::priority::SyncPauseControl;
use crate::result::SyncResult;
use crate::retry::retry_with_backoff;
use crate::supervisor::{catch_cycle, ScheduledLoop, TaskSupervisor};
use bridge_traits::time::Clock;
use chrono::{DateTime, Utc};
use core_runtime::config::{IntervalKind, SyncSettings};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Consecutive failures at which the service reports itself unhealthy.
const UNHEALTHY_AFTER: u32 = 3;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SyncStatistics {
    /// Sync cycles run, each possibly retried
    pub total_attempts: u64,
    pub successful_syncs: u64,
    pub failed_syncs: u64,
    pub total_retries: u64,
    pub consecutive_failures: u32,
    pub total_duration_ms: u64,
    pub last_duration_ms: Option<u64>,
    pub started_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl SyncStatistics {
    pub fn success_rate(&self) -> Option<f64> {
        if self.total_attempts == 0 {
            None
        } else {
            Some(self.successful_syncs as f64 / self.total_attempts as f64)
        }
    }

    pub fn average_duration_ms(&self) -> Option<u64> {
        self.total_duration_ms.checked_div(self.total_attempts)
    }

    pub fn health(&self) -> SyncHealth {
        match self.consecutive_failures {
            _ if self.total_attempts == 0 => SyncHealth::Unknown,
            0 => SyncHealth::Healthy,
            n if n < UNHEALTHY_AFTER => SyncHealth::Degraded,
            _ => SyncHealth::Unhealthy,
        }
    }

    /// Fold one attempt in; `error` is `None` for a successful attempt.
    fn record(&mut self, error: Option<String>, retries: u32, duration_ms: u64, at: DateTime<Utc>) {
        self.total_attempts += 1;
        self.total_retries += u64::from(retries);
        self.total_duration_ms += duration_ms;
        self.last_duration_ms = Some(duration_ms);

        match error {
            None => {
                self.successful_syncs += 1;
                self.consecutive_failures = 0;
                self.last_success_at = Some(at);
            }
            Some(message) => {
                self.failed_syncs += 1;
                self.consecutive_failures += 1;
                self.last_failure_at = Some(at);
                self.last_error = Some(message);
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncHealth {
    /// No attempt yet
    Unknown,
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize)]
pub struct BackgroundSyncStatus {
    pub running: bool,
    pub paused: bool,
    pub in_progress: bool,
    pub interval_seconds: u64,
    pub statistics: SyncStatistics,
    pub health: SyncHealth,
}

struct Inner {
    sync: Arc<dyn FullSync>,
    settings: Arc<SyncSettings>,
    clock: Arc<dyn Clock>,
    paused: AtomicBool,
    in_progress: AtomicBool,
    running: AtomicBool,
    stats: Mutex<SyncStatistics>,
}

/// Periodic forced export with retry, pause and health reporting.
///
/// Owns at most one scheduler loop at a time. Each cycle and each
/// [`BackgroundSyncService::force_sync_now`] call is one attempt; attempts
/// never overlap.
pub struct BackgroundSyncService {
    inner: Arc<Inner>,
    supervisor: TaskSupervisor,
    scheduled: tokio::sync::Mutex<Option<ScheduledLoop>>,
}

impl BackgroundSyncService {
    /// Create a stopped service.
    ///
    /// The interval and retry policy are read from `settings` at the start of
    /// every cycle. Loops are spawned on `supervisor` and timestamps in the
    /// statistics come from `clock`.
    pub fn new(
        sync: Arc<dyn FullSync>,
        settings: Arc<SyncSettings>,
        clock: Arc<dyn Clock>,
        supervisor: TaskSupervisor,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                sync,
                settings,
                clock,
                paused: AtomicBool::new(false),
                in_progress: AtomicBool::new(false),
                running: AtomicBool::new(false),
                stats: Mutex::new(SyncStatistics::default()),
            }),
            supervisor,
            scheduled: tokio::sync::Mutex::new(None),
        }
    }

    /// Start the periodic loop. Returns false when it was already running.
    ///
    /// The first cycle runs one full interval after this call, not immediately.
    pub async fn start(&self) -> bool {
        let mut scheduled = self.scheduled.lock().await;
        if scheduled.is_some() {
            info!("Background sync already running");
            return false;
        }

        self.inner
            .stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .started_at = Some(self.inner.clock.now());
        self.inner.running.store(true, Ordering::SeqCst);

        let inner = Arc::clone(&self.inner);
        *scheduled = Some(
            self.supervisor
                .spawn_loop("background-sync", move |cancel| run_loop(inner, cancel)),
        );
        info!(
            interval_secs = self
                .inner
                .settings
                .interval(IntervalKind::BackgroundSyncInterval)
                .as_secs(),
            "Background sync started"
        );
        true
    }

    /// Cancel the loop and wait for it. Returns false when it was not running.
    ///
    /// An attempt interrupted by the stop is not recorded in the statistics.
    pub async fn stop(&self) -> bool {
        let Some(scheduled) = self.scheduled.lock().await.take() else {
            debug!("Background sync not running");
            return false;
        };
        scheduled.stop().await;
        self.inner.running.store(false, Ordering::SeqCst);
        info!("Background sync stopped");
        true
    }

    /// Run one attempt now, outside the schedule.
    ///
    /// Returns false when the attempt failed or another attempt was in flight.
    #[instrument(skip(self))]
    pub async fn force_sync_now(&self) -> bool {
        match self.inner.run_attempt().await {
            Some(success) => success,
            None => {
                warn!("Background sync already in progress, force request dropped");
                false
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    pub fn is_paused(&self) -> bool {
        self.inner.paused.load(Ordering::SeqCst)
    }

    /// Lifecycle flags, the current interval and a copy of the statistics.
    pub fn get_status(&self) -> BackgroundSyncStatus {
        let statistics = self
            .inner
            .stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        BackgroundSyncStatus {
            running: self.is_running(),
            paused: self.is_paused(),
            in_progress: self.inner.in_progress.load(Ordering::SeqCst),
            interval_seconds: self
                .inner
                .settings
                .interval(IntervalKind::BackgroundSyncInterval)
                .as_secs(),
            health: statistics.health(),
            statistics,
        }
    }
}

impl SyncPauseControl for BackgroundSyncService {
    fn pause_for_requests(&self) {
        if !self.inner.paused.swap(true, Ordering::SeqCst) {
            debug!("Background sync paused for requests");
        }
    }

    fn resume_after_requests(&self) {
        if self.inner.paused.swap(false, Ordering::SeqCst) {
            debug!("Background sync resumed");
        }
    }
}

impl Inner {
    /// `None` when another attempt holds the in-progress flag.
    async fn run_attempt(&self) -> Option<bool> {
        if self
            .in_progress
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return None;
        }
        let _in_progress = InProgressGuard(&self.in_progress);

        let policy = self.settings.snapshot().retry;
        let sync = &self.sync;
        let started = tokio::time::Instant::now();
        let caught = catch_cycle(
            "background-sync",
            retry_with_backoff(
                &policy,
                "background sync",
                |_| sync.sync_all(true),
                |result: &SyncResult| result.success,
            ),
        )
        .await;
        let duration_ms = started.elapsed().as_millis() as u64;

        let (error, retries) = match caught {
            Ok(outcome) => {
                let result = &outcome.value;
                if result.success {
                    info!(
                        run_id = %result.run_id,
                        attempts = outcome.attempts,
                        duration_ms,
                        "Background sync succeeded"
                    );
                    (None, outcome.retries())
                } else {
                    error!(
                        run_id = %result.run_id,
                        attempts = outcome.attempts,
                        message = %result.message,
                        "Background sync failed after retries"
                    );
                    (Some(result.message.clone()), outcome.retries())
                }
            }
            Err(panic) => (Some(format!("Background sync panicked: {panic}")), 0),
        };

        let success = error.is_none();
        self.stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .record(error, retries, duration_ms, self.clock.now());
        Some(success)
    }
}

struct InProgressGuard<'a>(&'a AtomicBool);

impl Drop for InProgressGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

async fn run_loop(inner: Arc<Inner>, cancel: CancellationToken) {
    loop {
        let interval = inner.settings.interval(IntervalKind::BackgroundSyncInterval);
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }

        if inner.paused.load(Ordering::SeqCst) {
            debug!("Requests in flight, skipping background cycle");
            continue;
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            attempted = inner.run_attempt() => {
                if attempted.is_none() {
                    debug!("Forced sync in flight, skipping background cycle");
                }
            }
        }
    }
    debug!("Background sync loop exited");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_thresholds() {
        let mut stats = SyncStatistics::default();
        assert_eq!(stats.health(), SyncHealth::Unknown);

        stats.total_attempts = 4;
        assert_eq!(stats.health(), SyncHealth::Healthy);

        stats.consecutive_failures = 2;
        assert_eq!(stats.health(), SyncHealth::Degraded);

        stats.consecutive_failures = 3;
        assert_eq!(stats.health(), SyncHealth::Unhealthy);
    }

    #[test]
    fn test_average_duration() {
        let stats = SyncStatistics {
            total_attempts: 4,
            successful_syncs: 3,
            total_duration_ms: 1000,
            ..Default::default()
        };

        assert_eq!(stats.average_duration_ms(), Some(250));
        assert_eq!(stats.success_rate(), Some(0.75));
        assert_eq!(SyncStatistics::default().average_duration_ms(), None);
    }
}
