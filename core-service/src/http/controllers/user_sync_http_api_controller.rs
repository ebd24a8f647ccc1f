use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

use crate::http::error::ApiError;
use crate::SyncRuntime;

pub struct UserSyncHttpApiController;

impl UserSyncHttpApiController {
    pub async fn handle_request(
        State(runtime): State<Arc<SyncRuntime>>,
        Path(user_id): Path<String>,
    ) -> Result<Response, ApiError> {
        let user_id = user_id.trim();
        if user_id.is_empty() {
            return Err(ApiError::BadRequest("user_id must not be empty".to_string()));
        }

        let result = runtime.manual().sync_one_user(user_id).await;
        let status = if result.success {
            StatusCode::OK
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };
        Ok((status, Json(result)).into_response())
    }
}
