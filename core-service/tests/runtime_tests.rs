//! Integration tests for runtime assembly, start-up and shutdown

mod common;

use bridge_server::{ChannelChangeFeed, InMemorySheetSink};
use common::{fixture, quiet_config, seeded_source};
use core_runtime::config::{IntervalKind, ListenerStrategy, SyncConfig, SyncSettings};
use core_service::{CoreError, SyncDependencies, SyncRuntime};
use std::sync::Arc;
use std::time::Duration;

const QUIZ_INSERT: &str =
    r#"{"table":"quiz_responses","action":"INSERT","record":{"id":42,"user_id":"u1"}}"#;

async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

#[test]
fn test_push_strategy_requires_a_feed() {
    let deps = SyncDependencies::new(seeded_source(), Arc::new(InMemorySheetSink::new()));
    let result = SyncRuntime::new(
        deps,
        Arc::new(SyncSettings::default()),
        ListenerStrategy::Push,
    );
    assert!(matches!(result, Err(CoreError::InitializationFailed(_))));
}

#[tokio::test]
async fn test_change_notification_triggers_export() {
    let feed = Arc::new(ChannelChangeFeed::new(16));
    let sink = Arc::new(InMemorySheetSink::new());
    let deps = SyncDependencies::new(seeded_source(), sink.clone()).with_change_feed(feed.clone());
    let runtime = SyncRuntime::new(
        deps,
        Arc::new(SyncSettings::new(quiet_config())),
        ListenerStrategy::Push,
    )
    .unwrap();

    runtime.start().await;
    while feed.receiver_count() == 0 {
        settle().await;
    }

    feed.publish("table_changes", QUIZ_INSERT);
    while runtime.triggered().get_sync_status().last_sync_time.is_none() {
        settle().await;
    }

    assert_eq!(sink.tab("Quiz Responses").unwrap().len(), 2);
    let listener = runtime.listener_status().unwrap();
    assert!(listener.listening);
    assert_eq!(listener.notifications_received, 1);

    assert!(runtime.shutdown(Duration::from_secs(5)).await);
    assert!(!runtime.listener_status().unwrap().listening);
}

#[tokio::test]
async fn test_restart_registers_callback_once() {
    let feed = Arc::new(ChannelChangeFeed::new(16));
    let deps = SyncDependencies::new(seeded_source(), Arc::new(InMemorySheetSink::new()))
        .with_change_feed(feed);
    let runtime = SyncRuntime::new(
        deps,
        Arc::new(SyncSettings::new(quiet_config())),
        ListenerStrategy::Push,
    )
    .unwrap();

    runtime.start().await;
    runtime.stop().await;
    runtime.start().await;

    assert_eq!(runtime.listener_status().unwrap().callback_count, 1);
    runtime.shutdown(Duration::from_secs(5)).await;
}

#[tokio::test]
async fn test_toggles_decide_what_starts() {
    let fx = fixture(quiet_config());
    fx.runtime.start().await;
    assert!(!fx.runtime.background().is_running());
    assert!(!fx.runtime.cleanup().status().running);
    assert!(fx.runtime.listener().is_none());

    let fx = fixture(SyncConfig::default());
    fx.runtime.start().await;
    assert!(fx.runtime.background().is_running());
    assert!(fx.runtime.cleanup().status().running);

    assert!(fx.runtime.shutdown(Duration::from_secs(5)).await);
    assert!(!fx.runtime.background().is_running());
    assert!(!fx.runtime.cleanup().status().running);
}

#[tokio::test]
async fn test_shutdown_refuses_new_passes() {
    let fx = fixture(quiet_config());
    assert!(fx.runtime.shutdown(Duration::from_secs(1)).await);

    let result = fx.runtime.manual().sync_all(true).await;
    assert!(!result.success);
    assert!(fx.sink.tab_names().is_empty());
}

#[tokio::test]
async fn test_poll_strategy_builds_poll_listener() {
    let deps = SyncDependencies::new(seeded_source(), Arc::new(InMemorySheetSink::new()));
    let runtime = SyncRuntime::new(
        deps,
        Arc::new(SyncSettings::new(quiet_config())),
        ListenerStrategy::Poll,
    )
    .unwrap();

    assert_eq!(runtime.listener_strategy(), ListenerStrategy::Poll);
    assert_eq!(
        runtime.listener().unwrap().strategy(),
        ListenerStrategy::Poll
    );
    assert!(!runtime.listener_status().unwrap().listening);
}

#[tokio::test]
async fn test_set_interval_updates_settings_and_gate() {
    let fx = fixture(quiet_config());

    let value = fx
        .runtime
        .set_interval(IntervalKind::BackgroundSyncInterval, 120)
        .unwrap();
    assert_eq!(value, Duration::from_secs(120));
    assert_eq!(fx.runtime.background().get_status().interval_seconds, 120);
    assert_eq!(fx.runtime.triggered().get_sync_status().cooldown_seconds, 30);

    fx.runtime
        .set_interval(IntervalKind::TriggeredSyncCooldown, 45)
        .unwrap();
    assert_eq!(fx.runtime.triggered().get_sync_status().cooldown_seconds, 45);

    assert!(fx
        .runtime
        .set_interval(IntervalKind::ListenerPollInterval, 9)
        .is_err());
    assert_eq!(
        fx.runtime.settings().interval(IntervalKind::ListenerPollInterval),
        Duration::from_secs(30)
    );
}
