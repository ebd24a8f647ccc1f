//! Cooldown-gated, fire-and-forget sync triggered by user actions

use crate::manual::FullSync;
use crate::supervisor::TaskSupervisor;
use bridge_traits::time::Clock;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Admission state of the gate.
#[derive(Debug, Clone)]
pub struct SyncState {
    pub last_sync_time: Option<DateTime<Utc>>,
    /// True for exactly the lifetime of one admitted body
    pub pending: bool,
    pub enabled: bool,
    pub cooldown: Duration,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TriggeredSyncStatus {
    pub enabled: bool,
    pub pending: bool,
    pub last_sync_time: Option<DateTime<Utc>>,
    pub cooldown_seconds: u64,
    pub seconds_since_last_sync: Option<i64>,
}

/// Admission control for syncs requested after state-changing user actions.
///
/// A trigger is admitted only when the gate is enabled, no body is in flight
/// and the cooldown since the last successful sync has elapsed. Rejected
/// triggers are dropped, never queued.
pub struct TriggeredSyncService {
    sync: Arc<dyn FullSync>,
    clock: Arc<dyn Clock>,
    supervisor: TaskSupervisor,
    state: Arc<Mutex<SyncState>>,
}

impl TriggeredSyncService {
    /// Create a gate over `sync`.
    ///
    /// Admitted bodies are spawned on `supervisor` and run a forced export.
    /// `cooldown` is measured from the last successful body, read from
    /// `clock`. A disabled gate rejects every trigger until
    /// [`TriggeredSyncService::set_enabled`] turns it on.
    pub fn new(
        sync: Arc<dyn FullSync>,
        clock: Arc<dyn Clock>,
        supervisor: TaskSupervisor,
        cooldown: Duration,
        enabled: bool,
    ) -> Self {
        Self {
            sync,
            clock,
            supervisor,
            state: Arc::new(Mutex::new(SyncState {
                last_sync_time: None,
                pending: false,
                enabled,
                cooldown,
            })),
        }
    }

    /// Returns true iff a sync body was newly started. Never waits for it.
    #[instrument(skip(self))]
    pub fn trigger_sync(&self, reason: &str) -> bool {
        {
            let mut state = lock(&self.state);
            if !state.enabled {
                debug!(reason, "Triggered sync disabled");
                return false;
            }
            if state.pending {
                debug!(reason, "Sync already pending");
                return false;
            }
            if let Some(last) = state.last_sync_time {
                let elapsed = (self.clock.now() - last).to_std().unwrap_or(Duration::ZERO);
                if elapsed < state.cooldown {
                    debug!(
                        reason,
                        remaining_secs = (state.cooldown - elapsed).as_secs(),
                        "Sync in cooldown"
                    );
                    return false;
                }
            }
            state.pending = true;
        }

        let guard = PendingGuard {
            state: Arc::clone(&self.state),
        };
        let sync = Arc::clone(&self.sync);
        let clock = Arc::clone(&self.clock);
        let state = Arc::clone(&self.state);
        let reason = reason.to_string();

        info!(reason = %reason, "Triggered sync admitted");
        self.supervisor.spawn("triggered-sync", async move {
            let _guard = guard;
            let result = sync.sync_all(true).await;
            if result.success {
                lock(&state).last_sync_time = Some(clock.now());
                info!(reason = %reason, run_id = %result.run_id, "Triggered sync succeeded");
            } else {
                warn!(
                    reason = %reason,
                    run_id = %result.run_id,
                    message = %result.message,
                    "Triggered sync failed, cooldown not applied"
                );
            }
        });
        true
    }

    /// Takes effect on the next admission check.
    pub fn set_cooldown(&self, cooldown: Duration) {
        lock(&self.state).cooldown = cooldown;
        info!(cooldown_secs = cooldown.as_secs(), "Triggered sync cooldown updated");
    }

    /// Enable or disable admission. A body already in flight is unaffected.
    pub fn set_enabled(&self, enabled: bool) {
        lock(&self.state).enabled = enabled;
    }

    pub fn is_pending(&self) -> bool {
        lock(&self.state).pending
    }

    /// Snapshot of the gate for the admin surface.
    pub fn get_sync_status(&self) -> TriggeredSyncStatus {
        let state = lock(&self.state).clone();
        TriggeredSyncStatus {
            enabled: state.enabled,
            pending: state.pending,
            last_sync_time: state.last_sync_time,
            cooldown_seconds: state.cooldown.as_secs(),
            seconds_since_last_sync: state
                .last_sync_time
                .map(|last| (self.clock.now() - last).num_seconds()),
        }
    }
}

/// Clears `pending` however the body ends, including panic and cancellation.
struct PendingGuard {
    state: Arc<Mutex<SyncState>>,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        lock(&self.state).pending = false;
    }
}

fn lock(state: &Mutex<SyncState>) -> MutexGuard<'_, SyncState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::{SyncResult, SyncScope};
    use async_trait::async_trait;
    use bridge_traits::time::ManualClock;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use uuid::Uuid;

    struct CountingSync {
        calls: AtomicUsize,
        succeed: bool,
    }

    #[async_trait]
    impl FullSync for CountingSync {
        async fn sync_all(&self, _force: bool) -> SyncResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut result =
                SyncResult::aborted(Uuid::new_v4(), SyncScope::All, "done", Utc::now());
            result.success = self.succeed;
            result
        }
    }

    fn service(succeed: bool) -> (TriggeredSyncService, Arc<CountingSync>, TaskSupervisor) {
        let sync = Arc::new(CountingSync {
            calls: AtomicUsize::new(0),
            succeed,
        });
        let supervisor = TaskSupervisor::new();
        let service = TriggeredSyncService::new(
            sync.clone(),
            Arc::new(ManualClock::starting_now()),
            supervisor.clone(),
            Duration::from_secs(30),
            true,
        );
        (service, sync, supervisor)
    }

    #[tokio::test]
    async fn test_disabled_gate_rejects() {
        let (service, sync, supervisor) = service(true);
        service.set_enabled(false);

        assert!(!service.trigger_sync("quiz_completed"));
        supervisor.wait_idle().await;
        assert_eq!(sync.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_failed_sync_does_not_start_cooldown() {
        let (service, sync, supervisor) = service(false);

        assert!(service.trigger_sync("a"));
        supervisor.wait_idle().await;
        assert!(service.get_sync_status().last_sync_time.is_none());

        assert!(service.trigger_sync("b"));
        supervisor.wait_idle().await;
        assert_eq!(sync.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_status_reports_cooldown_seconds() {
        let (service, _, _) = service(true);
        service.set_cooldown(Duration::from_secs(60));

        let status = service.get_sync_status();
        assert_eq!(status.cooldown_seconds, 60);
        assert!(!status.pending);
        assert_eq!(status.seconds_since_last_sync, None);
    }
}
