//! Integration tests for stale session cleanup

use async_trait::async_trait;
use bridge_server::InMemoryRowSource;
use bridge_traits::error::{BridgeError, Result as BridgeResult};
use bridge_traits::row_source::{Filter, Query, Row, RowSource};
use bridge_traits::time::ManualClock;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use core_runtime::config::{SyncConfig, SyncSettings};
use core_runtime::events::{CleanupEvent, CoreEvent, EventBus};
use core_sync::{SessionCleanupService, TaskSupervisor, SESSIONS_TABLE};
use mockall::mock;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 3, 0, 0).unwrap()
}

fn days_ago(days: i64) -> String {
    (now() - ChronoDuration::days(days)).to_rfc3339()
}

mock! {
    RowSource {}

    #[async_trait]
    impl RowSource for RowSource {
        async fn select(&self, table: &str, query: &Query) -> BridgeResult<Vec<Row>>;
        async fn delete(&self, table: &str, filters: &[Filter]) -> BridgeResult<u64>;
    }
}

/// Source whose first delete panics; later deletes remove `deleted` rows.
struct PanicOnceSource {
    calls: AtomicUsize,
    deleted: u64,
}

#[async_trait]
impl RowSource for PanicOnceSource {
    async fn select(&self, _table: &str, _query: &Query) -> BridgeResult<Vec<Row>> {
        Ok(Vec::new())
    }

    async fn delete(&self, _table: &str, _filters: &[Filter]) -> BridgeResult<u64> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            panic!("connection pool panicked");
        }
        Ok(self.deleted)
    }
}

#[tokio::test]
async fn test_cleanup_cutoff() {
    let source = Arc::new(InMemoryRowSource::new());
    source.insert(
        SESSIONS_TABLE,
        json!({"id": "old-empty", "chat_history": [], "created_at": days_ago(31)}),
    );
    source.insert(
        SESSIONS_TABLE,
        json!({"id": "recent-empty", "chat_history": [], "created_at": days_ago(29)}),
    );
    source.insert(
        SESSIONS_TABLE,
        json!({"id": "ancient-busy", "chat_history": [{"role": "user", "content": "hi"}], "created_at": days_ago(400)}),
    );
    source.insert(
        SESSIONS_TABLE,
        json!({"id": "old-null", "chat_history": null, "created_at": days_ago(45)}),
    );

    let bus = EventBus::new(8);
    let mut events = bus.subscribe();
    let service = SessionCleanupService::new(
        source.clone(),
        Arc::new(SyncSettings::default()),
        Arc::new(ManualClock::new(now())),
        TaskSupervisor::new(),
    )
    .with_event_bus(bus);

    let report = service.force_cleanup_now().await;

    assert!(report.success);
    assert_eq!(report.deleted_count, 2);
    assert_eq!(report.cutoff_date, now() - ChronoDuration::days(30));
    assert!(report.error.is_none());

    let remaining: Vec<_> = source
        .rows(SESSIONS_TABLE)
        .iter()
        .map(|row| row["id"].clone())
        .collect();
    assert_eq!(remaining, vec![json!("recent-empty"), json!("ancient-busy")]);

    let status = service.status();
    assert_eq!(status.total_deleted, 2);
    assert_eq!(status.last_run, Some(report));

    match events.recv().await.unwrap() {
        CoreEvent::Cleanup(CleanupEvent::Completed { deleted_count, .. }) => {
            assert_eq!(deleted_count, 2)
        }
        other => panic!("unexpected event: {:?}", other),
    }
}

#[tokio::test]
async fn test_force_cleanup_reports_failure() {
    let mut source = MockRowSource::new();
    source
        .expect_delete()
        .returning(|_, _| Err(BridgeError::ConnectionLost("pool closed".to_string())));
    let service = SessionCleanupService::new(
        Arc::new(source),
        Arc::new(SyncSettings::default()),
        Arc::new(ManualClock::new(now())),
        TaskSupervisor::new(),
    );

    let report = service.force_cleanup_now().await;

    assert!(!report.success);
    assert_eq!(report.deleted_count, 0);
    assert!(report.error.unwrap().contains("pool closed"));
    assert_eq!(service.status().total_deleted, 0);
}

#[tokio::test(start_paused = true)]
async fn test_failed_cycle_retries_after_an_hour() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let mut source = MockRowSource::new();
    source.expect_delete().returning(move |table, filters| {
        assert_eq!(table, SESSIONS_TABLE);
        assert_eq!(filters.len(), 2);
        match counter.fetch_add(1, Ordering::SeqCst) {
            0 => Err(BridgeError::Timeout("delete".to_string())),
            _ => Ok(3),
        }
    });
    let service = SessionCleanupService::new(
        Arc::new(source),
        Arc::new(SyncSettings::default()),
        Arc::new(ManualClock::new(now())),
        TaskSupervisor::new(),
    );

    assert!(service.start().await);
    assert!(!service.start().await);

    tokio::time::sleep(Duration::from_secs(24 * 3600 + 1)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(!service.status().last_run.unwrap().success);

    tokio::time::sleep(Duration::from_secs(3600)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(service.status().total_deleted, 3);

    assert!(service.stop().await);
    assert!(!service.status().running);
}

#[tokio::test]
async fn test_out_of_range_age_is_reported_not_raised() {
    let mut source = MockRowSource::new();
    source.expect_delete().never();
    let settings = SyncSettings::new(SyncConfig {
        cleanup_days_old: i64::MAX / 2,
        ..SyncConfig::default()
    });
    let service = SessionCleanupService::new(
        Arc::new(source),
        Arc::new(settings),
        Arc::new(ManualClock::new(now())),
        TaskSupervisor::new(),
    );

    let report = service.force_cleanup_now().await;

    assert!(!report.success);
    assert_eq!(report.deleted_count, 0);
    assert_eq!(report.cutoff_date, now());
    assert!(report.error.unwrap().contains("out of range"));
}

#[tokio::test]
async fn test_panicking_source_is_reported_not_raised() {
    let service = SessionCleanupService::new(
        Arc::new(PanicOnceSource {
            calls: AtomicUsize::new(0),
            deleted: 4,
        }),
        Arc::new(SyncSettings::default()),
        Arc::new(ManualClock::new(now())),
        TaskSupervisor::new(),
    );

    let report = service.force_cleanup_now().await;
    assert!(!report.success);
    assert!(report.error.unwrap().contains("connection pool panicked"));

    let report = service.force_cleanup_now().await;
    assert!(report.success);
    assert_eq!(report.deleted_count, 4);
}

#[tokio::test(start_paused = true)]
async fn test_loop_survives_panicking_cycle() {
    let source = Arc::new(PanicOnceSource {
        calls: AtomicUsize::new(0),
        deleted: 2,
    });
    let supervisor = TaskSupervisor::new();
    let service = SessionCleanupService::new(
        source.clone(),
        Arc::new(SyncSettings::default()),
        Arc::new(ManualClock::new(now())),
        supervisor.clone(),
    );

    assert!(service.start().await);

    tokio::time::sleep(Duration::from_secs(24 * 3600 + 1)).await;
    assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    assert!(!service.status().last_run.unwrap().success);

    tokio::time::sleep(Duration::from_secs(3600)).await;
    assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    assert_eq!(service.status().total_deleted, 2);
    assert!(service.status().running);
    assert_eq!(supervisor.panic_count(), 0);

    assert!(service.stop().await);
}
