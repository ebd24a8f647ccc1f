//! Production adapters from start-up configuration.

use std::sync::Arc;

use bridge_server::{PgChangeFeed, ReqwestHttpClient};
use bridge_traits::{ChangeFeed, Clock, HttpClient, SystemClock};
use core_runtime::config::{GoogleCredentialsSource, ListenerStrategy, ServiceConfig};
use core_runtime::logging::redact_if_sensitive;
use provider_google_sheets::{GoogleSheetsSink, ServiceAccountAuth, ServiceAccountCredentials};
use provider_supabase::SupabaseRowSource;
use tracing::info;

use crate::error::{CoreError, Result};
use crate::runtime::SyncDependencies;

/// Build the Supabase source, the Sheets sink and, for the push strategy,
/// the Postgres change feed.
pub fn build_dependencies(config: &ServiceConfig) -> Result<SyncDependencies> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let http: Arc<dyn HttpClient> = Arc::new(ReqwestHttpClient::new()?);

    let row_source = SupabaseRowSource::new(
        Arc::clone(&http),
        &config.supabase_url,
        config.supabase_service_key.clone(),
    );

    let credentials = match &config.google_credentials {
        GoogleCredentialsSource::File(path) => ServiceAccountCredentials::from_file(path),
        GoogleCredentialsSource::Inline(json) => ServiceAccountCredentials::from_json(json),
    }
    .map_err(|e| CoreError::InitializationFailed(e.to_string()))?;
    info!(
        service_account = %redact_if_sensitive("client_email", &credentials.client_email),
        "Google credentials loaded"
    );
    let auth = ServiceAccountAuth::new(Arc::clone(&http), credentials, Arc::clone(&clock));
    let sink = GoogleSheetsSink::new(Arc::clone(&http), Arc::new(auth), &config.spreadsheet_id)
        .with_request_timeout(config.sync.sink_timeout);

    let mut deps = SyncDependencies::new(Arc::new(row_source), Arc::new(sink)).with_clock(clock);

    if config.listener_strategy == ListenerStrategy::Push {
        let database_url = config.database_url.as_deref().ok_or_else(|| {
            CoreError::InitializationFailed(
                "DATABASE_URL is required for the push listener".to_string(),
            )
        })?;
        let feed: Arc<dyn ChangeFeed> = Arc::new(PgChangeFeed::new(database_url));
        deps = deps.with_change_feed(feed);
    }

    info!(
        spreadsheet_id = %config.spreadsheet_id,
        listener = config.listener_strategy.as_str(),
        "Production adapters ready"
    );
    Ok(deps)
}
