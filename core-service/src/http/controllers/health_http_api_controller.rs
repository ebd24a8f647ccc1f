use std::sync::Arc;

use axum::{extract::State, http::StatusCode, Json};
use core_sync::SyncHealth;

use crate::http::dto::HealthResponse;
use crate::SyncRuntime;

pub struct HealthHttpApiController;

impl HealthHttpApiController {
    pub async fn handle_request(
        State(runtime): State<Arc<SyncRuntime>>,
    ) -> (StatusCode, Json<HealthResponse>) {
        let background = runtime.background().get_status().health;
        let listener_connected = runtime
            .listener_status()
            .filter(|status| status.listening)
            .map(|status| status.connection_active);

        let (status, label) = match background {
            SyncHealth::Unhealthy => (StatusCode::SERVICE_UNAVAILABLE, "unhealthy"),
            SyncHealth::Degraded => (StatusCode::OK, "degraded"),
            SyncHealth::Healthy | SyncHealth::Unknown => (StatusCode::OK, "ok"),
        };

        (
            status,
            Json(HealthResponse {
                status: label,
                background,
                listener_connected,
            }),
        )
    }
}
