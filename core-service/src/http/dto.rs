//! Request and response bodies of the admin surface.

use std::collections::BTreeMap;

use core_runtime::config::{IntervalKind, ListenerStrategy, SyncConfig};
use core_sync::{
    BackgroundSyncStatus, CleanupStatus, ListenerStatus, SyncHealth, TriggeredSyncStatus,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub(crate) fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct IntervalQuery {
    pub seconds: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct TriggerQuery {
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Serialize)]
pub struct SyncConfigResponse {
    /// Current value of every runtime-adjustable interval, in seconds
    pub intervals: BTreeMap<&'static str, u64>,
    pub listener_strategy: ListenerStrategy,
    pub config: SyncConfig,
    pub triggered: Option<TriggeredSyncStatus>,
    pub background: Option<BackgroundSyncStatus>,
}

impl SyncConfigResponse {
    pub(crate) fn new(config: SyncConfig, listener_strategy: ListenerStrategy) -> Self {
        let intervals = IntervalKind::ALL
            .into_iter()
            .map(|kind| (kind.as_str(), config.interval(kind).as_secs()))
            .collect();
        Self {
            intervals,
            listener_strategy,
            config,
            triggered: None,
            background: None,
        }
    }

    pub(crate) fn with_status(
        mut self,
        triggered: TriggeredSyncStatus,
        background: BackgroundSyncStatus,
    ) -> Self {
        self.triggered = Some(triggered);
        self.background = Some(background);
        self
    }
}

#[derive(Debug, Serialize)]
pub struct IntervalUpdatedResponse {
    pub interval_type: &'static str,
    pub seconds: u64,
}

#[derive(Debug, Serialize)]
pub struct TriggerResponse {
    /// False when the gate was disabled, busy or cooling down
    pub admitted: bool,
    pub status: TriggeredSyncStatus,
}

#[derive(Debug, Serialize)]
pub struct SyncStatsResponse {
    pub triggered: TriggeredSyncStatus,
    pub background: BackgroundSyncStatus,
    pub cleanup: CleanupStatus,
    pub listener: Option<ListenerStatus>,
    pub config: SyncConfig,
    pub active_requests: usize,
    pub active_tasks: usize,
    pub panicked_tasks: usize,
}

#[derive(Debug, Serialize)]
pub struct BackgroundForceResponse {
    pub success: bool,
    pub status: BackgroundSyncStatus,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub background: SyncHealth,
    pub listener_connected: Option<bool>,
}
