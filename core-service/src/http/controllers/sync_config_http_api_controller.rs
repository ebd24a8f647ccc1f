use std::sync::Arc;

use axum::{
    extract::{rejection::QueryRejection, Path, Query, State},
    Json,
};
use core_runtime::config::IntervalKind;

use crate::http::{
    dto::{IntervalQuery, IntervalUpdatedResponse, SyncConfigResponse},
    error::ApiError,
};
use crate::SyncRuntime;

pub struct SyncConfigHttpApiController;

impl SyncConfigHttpApiController {
    pub async fn handle_get(State(runtime): State<Arc<SyncRuntime>>) -> Json<SyncConfigResponse> {
        Json(
            SyncConfigResponse::new(runtime.settings().snapshot(), runtime.listener_strategy())
                .with_status(
                    runtime.triggered().get_sync_status(),
                    runtime.background().get_status(),
                ),
        )
    }

    pub async fn handle_set_interval(
        State(runtime): State<Arc<SyncRuntime>>,
        Path(interval_type): Path<String>,
        query: Result<Query<IntervalQuery>, QueryRejection>,
    ) -> Result<Json<IntervalUpdatedResponse>, ApiError> {
        let kind: IntervalKind = interval_type.parse()?;
        let Query(query) = query.map_err(|e| ApiError::BadRequest(e.body_text()))?;
        let seconds = query
            .seconds
            .ok_or_else(|| {
                ApiError::BadRequest("seconds query parameter is required".to_string())
            })?;

        let value = runtime.set_interval(kind, seconds)?;
        Ok(Json(IntervalUpdatedResponse {
            interval_type: kind.as_str(),
            seconds: value.as_secs(),
        }))
    }
}
