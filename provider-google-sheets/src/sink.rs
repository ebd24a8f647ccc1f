//! Google Sheets API connector
//!
//! Implements the `SheetSink` trait for Google Sheets API v4.

use async_trait::async_trait;
use bridge_traits::error::Result;
use bridge_traits::http::{HttpClient, HttpMethod, HttpRequest, HttpResponse};
use bridge_traits::sink::{SheetRow, SheetSink};
use serde::Deserialize;
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::auth::AccessTokenProvider;
use crate::error::SheetsError;

/// Google Sheets API base URL
pub const SHEETS_API_BASE: &str = "https://sheets.googleapis.com/v4/spreadsheets";

#[derive(Debug, Deserialize)]
struct SpreadsheetMeta {
    #[serde(default)]
    sheets: Vec<SheetEntry>,
}

#[derive(Debug, Deserialize)]
struct SheetEntry {
    properties: SheetProperties,
}

#[derive(Debug, Deserialize)]
struct SheetProperties {
    title: String,
}

#[derive(Debug, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<SheetRow>,
}

/// Quote a tab name and optional cell range into A1 notation.
///
/// Single quotes inside the tab name are doubled, as the API requires.
pub fn a1_range(tab: &str, range: Option<&str>) -> String {
    let quoted = format!("'{}'", tab.replace('\'', "''"));
    match range {
        Some(range) => format!("{}!{}", quoted, range),
        None => quoted,
    }
}

/// Google Sheets sink
///
/// # Example
///
/// ```ignore
/// use provider_google_sheets::{GoogleSheetsSink, ServiceAccountAuth};
///
/// let sink = GoogleSheetsSink::new(http_client, Arc::new(auth), "1AbC...spreadsheet-id");
/// sink.write_range("User Profiles", &rows).await?;
/// ```
pub struct GoogleSheetsSink {
    http_client: Arc<dyn HttpClient>,
    auth: Arc<dyn AccessTokenProvider>,
    spreadsheet_url: String,
    request_timeout: Duration,
    known_tabs: Mutex<HashSet<String>>,
}

impl GoogleSheetsSink {
    /// Create a new Sheets connector
    ///
    /// # Arguments
    ///
    /// * `http_client` - HTTP client implementation
    /// * `auth` - Bearer token source with the `spreadsheets` scope
    /// * `spreadsheet_id` - Target spreadsheet identifier
    pub fn new(
        http_client: Arc<dyn HttpClient>,
        auth: Arc<dyn AccessTokenProvider>,
        spreadsheet_id: impl AsRef<str>,
    ) -> Self {
        Self {
            http_client,
            auth,
            spreadsheet_url: format!("{}/{}", SHEETS_API_BASE, spreadsheet_id.as_ref()),
            request_timeout: Duration::from_secs(30),
            known_tabs: Mutex::new(HashSet::new()),
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    fn values_url(&self, range: &str) -> String {
        format!(
            "{}/values/{}",
            self.spreadsheet_url,
            urlencoding::encode(range)
        )
    }

    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        let token = self.auth.access_token().await?;
        let request = request
            .bearer_token(token)
            .header("Accept", "application/json")
            .timeout(self.request_timeout);

        let response = self.http_client.execute(request).await?;
        if response.is_success() {
            return Ok(response);
        }

        let message = String::from_utf8_lossy(&response.body).to_string();
        warn!(status = response.status, "Sheets request failed");
        let error = match response.status {
            401 | 403 => SheetsError::AuthenticationFailed(message),
            status_code => SheetsError::ApiError {
                status_code,
                message,
            },
        };
        Err(error.into())
    }

    fn parse<T: for<'de> Deserialize<'de>>(response: &HttpResponse, what: &str) -> Result<T> {
        serde_json::from_slice(&response.body).map_err(|e| {
            SheetsError::ParseError(format!("Failed to parse {}: {}", what, e)).into()
        })
    }

    /// Create `tab` if the spreadsheet does not have it yet.
    #[instrument(skip(self))]
    async fn ensure_tab(&self, tab: &str) -> Result<()> {
        let mut known = self.known_tabs.lock().await;
        if known.contains(tab) {
            return Ok(());
        }

        let url = format!("{}?fields=sheets.properties.title", self.spreadsheet_url);
        let response = self.send(HttpRequest::new(HttpMethod::Get, url)).await?;
        let meta: SpreadsheetMeta = Self::parse(&response, "spreadsheet metadata")?;
        known.extend(meta.sheets.into_iter().map(|s| s.properties.title));

        if known.contains(tab) {
            return Ok(());
        }

        info!("Creating missing tab: {}", tab);
        let body = json!({
            "requests": [{ "addSheet": { "properties": { "title": tab } } }]
        });
        let request = HttpRequest::new(
            HttpMethod::Post,
            format!("{}:batchUpdate", self.spreadsheet_url),
        )
        .json(&body)?;
        self.send(request).await?;
        known.insert(tab.to_string());
        Ok(())
    }

    /// Forget cached tab names, e.g. after a tab was deleted by hand.
    pub async fn reset_tab_cache(&self) {
        self.known_tabs.lock().await.clear();
    }
}

#[async_trait]
impl SheetSink for GoogleSheetsSink {
    #[instrument(skip(self, rows), fields(rows = rows.len()))]
    async fn write_range(&self, tab: &str, rows: &[SheetRow]) -> Result<()> {
        self.ensure_tab(tab).await?;
        if rows.is_empty() {
            debug!("Nothing to write");
            return Ok(());
        }

        let range = a1_range(tab, Some("A1"));
        let body = json!({
            "range": range,
            "majorDimension": "ROWS",
            "values": rows,
        });
        let url = format!("{}?valueInputOption=RAW", self.values_url(&range));
        self.send(HttpRequest::new(HttpMethod::Put, url).json(&body)?)
            .await?;

        debug!("Wrote {} rows to {}", rows.len(), tab);
        Ok(())
    }

    #[instrument(skip(self))]
    async fn read_range(&self, tab: &str, range: &str) -> Result<Vec<SheetRow>> {
        self.ensure_tab(tab).await?;

        let url = self.values_url(&a1_range(tab, Some(range)));
        let response = self.send(HttpRequest::new(HttpMethod::Get, url)).await?;
        let value_range: ValueRange = Self::parse(&response, "value range")?;
        Ok(value_range.values)
    }

    #[instrument(skip(self))]
    async fn clear(&self, tab: &str) -> Result<()> {
        self.ensure_tab(tab).await?;

        let url = format!("{}:clear", self.values_url(&a1_range(tab, None)));
        self.send(HttpRequest::new(HttpMethod::Post, url).json(&json!({}))?)
            .await?;
        Ok(())
    }
}
