use std::{
    future::Future,
    net::{Ipv4Addr, SocketAddr},
    sync::Arc,
};

use axum::{
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use super::{
    controllers::{
        BackgroundHttpApiController, CleanupHttpApiController, HealthHttpApiController,
        SyncConfigHttpApiController, SyncStatsHttpApiController, SyncTriggerHttpApiController,
        UserSyncHttpApiController,
    },
    middleware::RequestPriorityLayer,
};
use crate::{error::Result, SyncRuntime};

/// Build the admin router over a shared runtime.
pub fn build_router(runtime: Arc<SyncRuntime>) -> Router {
    let priority = RequestPriorityLayer::new(Arc::clone(runtime.priority()));

    Router::new()
        .route("/health", get(HealthHttpApiController::handle_request))
        .route("/sync/config", get(SyncConfigHttpApiController::handle_get))
        .route(
            "/sync/config/interval/{interval_type}",
            post(SyncConfigHttpApiController::handle_set_interval),
        )
        .route(
            "/sync/trigger",
            post(SyncTriggerHttpApiController::handle_request),
        )
        .route("/sync/stats", get(SyncStatsHttpApiController::handle_request))
        .route(
            "/sync/user/{user_id}",
            post(UserSyncHttpApiController::handle_request),
        )
        .route(
            "/sync/background/force",
            post(BackgroundHttpApiController::handle_force),
        )
        .route("/sync/cleanup", post(CleanupHttpApiController::handle_force))
        .with_state(runtime)
        // Last added runs first: CORS, tracing, then request priority
        .layer(priority)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Serve `router` on all interfaces until `shutdown` resolves.
pub async fn serve<F>(router: Router, port: u16, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "Admin API listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await?;

    tracing::info!("Admin API stopped");
    Ok(())
}
