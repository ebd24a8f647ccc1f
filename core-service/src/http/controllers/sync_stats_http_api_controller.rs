use std::sync::Arc;

use axum::{extract::State, Json};

use crate::http::dto::SyncStatsResponse;
use crate::SyncRuntime;

pub struct SyncStatsHttpApiController;

impl SyncStatsHttpApiController {
    pub async fn handle_request(
        State(runtime): State<Arc<SyncRuntime>>,
    ) -> Json<SyncStatsResponse> {
        Json(SyncStatsResponse {
            triggered: runtime.triggered().get_sync_status(),
            background: runtime.background().get_status(),
            cleanup: runtime.cleanup().status(),
            listener: runtime.listener_status(),
            config: runtime.settings().snapshot(),
            active_requests: runtime.priority().active_requests(),
            active_tasks: runtime.supervisor().active_tasks(),
            panicked_tasks: runtime.supervisor().panic_count(),
        })
    }
}
