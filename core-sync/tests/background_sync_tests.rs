//! Integration tests for the background scheduler
//!
//! All tests run on paused tokio time, so intervals and backoff delays
//! elapse instantly and deterministically.

mod common;

use bridge_traits::time::SystemClock;
use common::ScriptedSync;
use core_runtime::config::{IntervalKind, SyncSettings};
use core_sync::{BackgroundSyncService, SyncHealth, SyncPauseControl, TaskSupervisor};
use std::sync::Arc;
use std::time::Duration;

fn background(sync: Arc<ScriptedSync>) -> (Arc<BackgroundSyncService>, Arc<SyncSettings>) {
    let settings = Arc::new(SyncSettings::default());
    let service = BackgroundSyncService::new(
        sync,
        settings.clone(),
        Arc::new(SystemClock),
        TaskSupervisor::new(),
    );
    (Arc::new(service), settings)
}

async fn advance(seconds: u64) {
    tokio::time::sleep(Duration::from_secs(seconds)).await;
}

#[tokio::test(start_paused = true)]
async fn test_runs_once_per_interval() {
    let sync = Arc::new(ScriptedSync::succeeding());
    let (service, _) = background(sync.clone());

    assert!(service.start().await);
    assert!(!service.start().await);

    advance(299).await;
    assert_eq!(sync.calls(), 0);
    advance(2).await;
    assert_eq!(sync.calls(), 1);

    let status = service.get_status();
    assert!(status.running);
    assert_eq!(status.interval_seconds, 300);
    assert_eq!(status.statistics.successful_syncs, 1);
    assert_eq!(status.health, SyncHealth::Healthy);

    assert!(service.stop().await);
    assert!(!service.stop().await);
    advance(600).await;
    assert_eq!(sync.calls(), 1);
    assert!(!service.get_status().running);
}

#[tokio::test(start_paused = true)]
async fn test_restart_after_stop() {
    let sync = Arc::new(ScriptedSync::succeeding());
    let (service, _) = background(sync.clone());

    assert!(service.start().await);
    assert!(service.stop().await);
    assert!(service.start().await);

    advance(301).await;
    assert_eq!(sync.calls(), 1);
    service.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_interval_change_applies_next_cycle() {
    let sync = Arc::new(ScriptedSync::succeeding());
    let (service, settings) = background(sync.clone());
    service.start().await;

    advance(301).await;
    settings
        .set_interval(IntervalKind::BackgroundSyncInterval, 60)
        .unwrap();

    // The cycle already sleeping keeps its 300 s; the one after uses 60 s
    advance(300).await;
    assert_eq!(sync.calls(), 2);
    advance(61).await;
    assert_eq!(sync.calls(), 3);
    service.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_paused_cycles_are_skipped() {
    let sync = Arc::new(ScriptedSync::succeeding());
    let (service, _) = background(sync.clone());

    service.pause_for_requests();
    service.pause_for_requests();
    service.start().await;

    advance(301).await;
    assert_eq!(sync.calls(), 0);
    assert!(service.get_status().paused);

    service.resume_after_requests();
    advance(300).await;
    assert_eq!(sync.calls(), 1);
    assert_eq!(service.get_status().statistics.total_attempts, 1);
    service.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_force_sync_retries_with_backoff() {
    let sync = Arc::new(ScriptedSync::scripted(vec![false, false, true]));
    let (service, _) = background(sync.clone());
    let started = tokio::time::Instant::now();

    assert!(service.force_sync_now().await);

    // Delays of 1 s and 2 s between the three attempts
    assert_eq!(started.elapsed(), Duration::from_secs(3));
    assert_eq!(sync.calls(), 3);
    let stats = service.get_status().statistics;
    assert_eq!(stats.total_attempts, 1);
    assert_eq!(stats.total_retries, 2);
    assert_eq!(stats.successful_syncs, 1);
    assert_eq!(stats.last_duration_ms, Some(3000));
}

#[tokio::test(start_paused = true)]
async fn test_health_degrades_with_consecutive_failures() {
    let sync = Arc::new(ScriptedSync::scripted(vec![false; 9]));
    let (service, _) = background(sync.clone());

    assert!(!service.force_sync_now().await);
    let status = service.get_status();
    assert_eq!(sync.calls(), 3);
    assert_eq!(status.statistics.failed_syncs, 1);
    assert_eq!(status.statistics.last_error.as_deref(), Some("sheet unavailable"));
    assert_eq!(status.health, SyncHealth::Degraded);

    service.force_sync_now().await;
    service.force_sync_now().await;
    assert_eq!(service.get_status().health, SyncHealth::Unhealthy);

    assert!(service.force_sync_now().await);
    let status = service.get_status();
    assert_eq!(status.health, SyncHealth::Healthy);
    assert_eq!(status.statistics.consecutive_failures, 0);
}

#[tokio::test(start_paused = true)]
async fn test_force_while_in_flight_returns_false() {
    let sync = Arc::new(ScriptedSync::held());
    let (service, _) = background(sync.clone());

    let first = tokio::spawn({
        let service = Arc::clone(&service);
        async move { service.force_sync_now().await }
    });
    while sync.calls() == 0 {
        tokio::task::yield_now().await;
    }

    assert!(service.get_status().in_progress);
    assert!(!service.force_sync_now().await);

    sync.release();
    assert!(first.await.unwrap());
    assert!(!service.get_status().in_progress);
    assert_eq!(service.get_status().statistics.total_attempts, 1);
}

#[tokio::test(start_paused = true)]
async fn test_loop_survives_panicking_cycle() {
    let sync = Arc::new(ScriptedSync::succeeding());
    let (service, _) = background(sync.clone());

    assert!(service.start().await);
    sync.panic_next();

    advance(301).await;
    assert_eq!(sync.calls(), 1);
    let status = service.get_status();
    assert!(!status.in_progress);
    assert_eq!(status.statistics.failed_syncs, 1);
    assert!(status
        .statistics
        .last_error
        .as_deref()
        .is_some_and(|error| error.contains("sink client panicked")));

    advance(300).await;
    assert_eq!(sync.calls(), 2);
    let status = service.get_status();
    assert!(status.running);
    assert_eq!(status.statistics.successful_syncs, 1);
    assert_eq!(status.health, SyncHealth::Healthy);

    assert!(service.stop().await);
}

#[tokio::test(start_paused = true)]
async fn test_panicking_force_sync_reports_failure() {
    let sync = Arc::new(ScriptedSync::succeeding());
    let (service, _) = background(sync.clone());

    sync.panic_next();
    assert!(!service.force_sync_now().await);
    assert_eq!(service.get_status().statistics.consecutive_failures, 1);

    assert!(service.force_sync_now().await);
}
