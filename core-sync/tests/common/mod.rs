//! Shared test doubles for the gate and scheduler tests

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use core_sync::{FullSync, SyncResult, SyncScope};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio::sync::Semaphore;
use uuid::Uuid;

/// Full-sync double with scripted outcomes.
///
/// Outcomes are consumed in order; once exhausted every pass succeeds. When
/// built with [`ScriptedSync::held`], each pass waits for [`ScriptedSync::release`].
pub struct ScriptedSync {
    outcomes: Mutex<VecDeque<bool>>,
    calls: AtomicUsize,
    hold: Option<Semaphore>,
    panic_next: AtomicBool,
}

impl ScriptedSync {
    pub fn succeeding() -> Self {
        Self::scripted(Vec::new())
    }

    pub fn scripted(outcomes: Vec<bool>) -> Self {
        Self {
            outcomes: Mutex::new(outcomes.into()),
            calls: AtomicUsize::new(0),
            hold: None,
            panic_next: AtomicBool::new(false),
        }
    }

    pub fn held() -> Self {
        Self {
            hold: Some(Semaphore::new(0)),
            ..Self::succeeding()
        }
    }

    pub fn release(&self) {
        if let Some(hold) = &self.hold {
            hold.add_permits(1);
        }
    }

    pub fn panic_next(&self) {
        self.panic_next.store(true, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FullSync for ScriptedSync {
    async fn sync_all(&self, _force: bool) -> SyncResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(hold) = &self.hold {
            hold.acquire().await.unwrap().forget();
        }
        if self.panic_next.swap(false, Ordering::SeqCst) {
            panic!("sink client panicked");
        }
        let success = self.outcomes.lock().unwrap().pop_front().unwrap_or(true);
        sync_result(success)
    }
}

pub fn sync_result(success: bool) -> SyncResult {
    let message = if success { "ok" } else { "sheet unavailable" };
    let mut result = SyncResult::aborted(Uuid::new_v4(), SyncScope::All, message, Utc::now());
    result.success = success;
    result
}
