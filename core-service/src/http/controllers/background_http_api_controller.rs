use std::sync::Arc;

use axum::{extract::State, http::StatusCode, Json};

use crate::http::dto::BackgroundForceResponse;
use crate::SyncRuntime;

pub struct BackgroundHttpApiController;

impl BackgroundHttpApiController {
    /// Run one background cycle now, with retries.
    pub async fn handle_force(
        State(runtime): State<Arc<SyncRuntime>>,
    ) -> (StatusCode, Json<BackgroundForceResponse>) {
        let success = runtime.background().force_sync_now().await;
        let status = if success {
            StatusCode::OK
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };
        (
            status,
            Json(BackgroundForceResponse {
                success,
                status: runtime.background().get_status(),
            }),
        )
    }
}
