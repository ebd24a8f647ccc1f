mod background_http_api_controller;
mod cleanup_http_api_controller;
mod health_http_api_controller;
mod sync_config_http_api_controller;
mod sync_stats_http_api_controller;
mod sync_trigger_http_api_controller;
mod user_sync_http_api_controller;

pub(crate) use background_http_api_controller::BackgroundHttpApiController;
pub(crate) use cleanup_http_api_controller::CleanupHttpApiController;
pub(crate) use health_http_api_controller::HealthHttpApiController;
pub(crate) use sync_config_http_api_controller::SyncConfigHttpApiController;
pub(crate) use sync_stats_http_api_controller::SyncStatsHttpApiController;
pub(crate) use sync_trigger_http_api_controller::SyncTriggerHttpApiController;
pub(crate) use user_sync_http_api_controller::UserSyncHttpApiController;
