use std::sync::Arc;

use axum::{
    extract::{rejection::QueryRejection, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

use crate::http::{
    dto::{TriggerQuery, TriggerResponse},
    error::ApiError,
};
use crate::SyncRuntime;

pub struct SyncTriggerHttpApiController;

impl SyncTriggerHttpApiController {
    /// `force=true` runs a full export inline, bypassing the cooldown;
    /// otherwise the request goes through the triggered gate.
    pub async fn handle_request(
        State(runtime): State<Arc<SyncRuntime>>,
        query: Result<Query<TriggerQuery>, QueryRejection>,
    ) -> Result<Response, ApiError> {
        let Query(query) = query.map_err(|e| ApiError::BadRequest(e.body_text()))?;

        if query.force {
            let result = runtime.manual().sync_all(true).await;
            let status = if result.success {
                StatusCode::OK
            } else {
                StatusCode::INTERNAL_SERVER_ERROR
            };
            return Ok((status, Json(result)).into_response());
        }

        let admitted = runtime.triggered().trigger_sync("admin request");
        let status = if admitted {
            StatusCode::ACCEPTED
        } else {
            StatusCode::OK
        };
        let body = TriggerResponse {
            admitted,
            status: runtime.triggered().get_sync_status(),
        };
        Ok((status, Json(body)).into_response())
    }
}
