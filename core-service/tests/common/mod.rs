//! Shared fixtures for the runtime and admin API tests

#![allow(dead_code)]

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use bridge_server::{InMemoryRowSource, InMemorySheetSink};
use core_runtime::config::{FeatureToggles, ListenerStrategy, SyncConfig, SyncSettings};
use core_service::{SyncDependencies, SyncRuntime};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

pub struct Fixture {
    pub runtime: Arc<SyncRuntime>,
    pub source: Arc<InMemoryRowSource>,
    pub sink: Arc<InMemorySheetSink>,
}

/// Settings with the periodic services switched off.
pub fn quiet_config() -> SyncConfig {
    SyncConfig {
        toggles: FeatureToggles {
            background_sync: false,
            session_cleanup: false,
            ..FeatureToggles::default()
        },
        ..SyncConfig::default()
    }
}

pub fn seeded_source() -> Arc<InMemoryRowSource> {
    let source = Arc::new(InMemoryRowSource::new());
    source.insert(
        "user_profiles",
        json!({"id": "u1", "email": "ana@example.com", "full_name": "Ana", "updated_at": "2024-05-01T10:00:00+00:00"}),
    );
    source.insert(
        "user_profiles",
        json!({"id": "u2", "email": "ben@example.com", "full_name": "Ben", "updated_at": "2024-05-02T10:00:00+00:00"}),
    );
    source.insert(
        "quiz_responses",
        json!({"id": 1, "user_id": "u1", "quiz_id": "q1", "score": 80, "created_at": "2024-05-01T11:00:00+00:00"}),
    );
    source
}

pub fn fixture(config: SyncConfig) -> Fixture {
    let source = seeded_source();
    let sink = Arc::new(InMemorySheetSink::new());
    let deps = SyncDependencies::new(source.clone(), sink.clone());
    let runtime = SyncRuntime::new(
        deps,
        Arc::new(SyncSettings::new(config)),
        ListenerStrategy::Disabled,
    )
    .unwrap();
    Fixture {
        runtime: Arc::new(runtime),
        source,
        sink,
    }
}

/// Send one request and decode the body: JSON when it parses, text otherwise.
pub async fn send(router: Router, method: Method, uri: &str) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    let response = router.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
    };
    (status, body)
}
