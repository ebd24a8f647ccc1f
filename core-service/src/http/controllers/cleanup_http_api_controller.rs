use std::sync::Arc;

use axum::{extract::State, http::StatusCode, Json};
use core_sync::CleanupReport;

use crate::SyncRuntime;

pub struct CleanupHttpApiController;

impl CleanupHttpApiController {
    pub async fn handle_force(
        State(runtime): State<Arc<SyncRuntime>>,
    ) -> (StatusCode, Json<CleanupReport>) {
        let report = runtime.cleanup().force_cleanup_now().await;
        let status = if report.success {
            StatusCode::OK
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };
        (status, Json(report))
    }
}
