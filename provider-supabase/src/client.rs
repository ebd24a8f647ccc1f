//! Supabase PostgREST connector
//!
//! Implements the `RowSource` trait against `{project}/rest/v1/{table}`.

use async_trait::async_trait;
use bridge_traits::error::Result;
use bridge_traits::http::{HttpClient, HttpMethod, HttpRequest, HttpResponse};
use bridge_traits::row_source::{Filter, Query, Row, RowSource};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use crate::error::SupabaseError;
use crate::query::{filter_query_string, select_query_string};

/// Rows fetched per request when a select is not bounded by a limit
pub const DEFAULT_PAGE_SIZE: usize = 1000;

/// Per-request timeout
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Supabase row source
///
/// # Example
///
/// ```ignore
/// use provider_supabase::SupabaseRowSource;
/// use bridge_traits::row_source::{Query, RowSource};
///
/// let source = SupabaseRowSource::new(http_client, "https://xyz.supabase.co", service_key);
/// let rows = source.select("user_profiles", &Query::new()).await?;
/// ```
pub struct SupabaseRowSource {
    http_client: Arc<dyn HttpClient>,
    rest_url: String,
    service_key: String,
    page_size: usize,
}

impl SupabaseRowSource {
    /// Create a new connector
    ///
    /// # Arguments
    ///
    /// * `http_client` - HTTP client implementation
    /// * `project_url` - Project URL, e.g. `https://xyz.supabase.co`
    /// * `service_key` - Service-role key; bypasses row-level security
    pub fn new(
        http_client: Arc<dyn HttpClient>,
        project_url: impl AsRef<str>,
        service_key: impl Into<String>,
    ) -> Self {
        Self {
            http_client,
            rest_url: format!("{}/rest/v1", project_url.as_ref().trim_end_matches('/')),
            service_key: service_key.into(),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    fn request(&self, method: HttpMethod, table: &str, query_string: &str) -> HttpRequest {
        let url = if query_string.is_empty() {
            format!("{}/{}", self.rest_url, table)
        } else {
            format!("{}/{}?{}", self.rest_url, table, query_string)
        };

        HttpRequest::new(method, url)
            .header("apikey", self.service_key.clone())
            .bearer_token(self.service_key.clone())
            .header("Accept", "application/json")
            .timeout(REQUEST_TIMEOUT)
    }

    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        let response = self.http_client.execute(request).await?;

        if response.is_success() {
            return Ok(response);
        }

        let message = String::from_utf8_lossy(&response.body).to_string();
        warn!(status = response.status, "Supabase request failed");
        let error = match response.status {
            401 | 403 => SupabaseError::AuthenticationFailed(message),
            status_code => SupabaseError::ApiError {
                status_code,
                message,
            },
        };
        Err(error.into())
    }

    fn parse_rows(response: &HttpResponse) -> Result<Vec<Row>> {
        serde_json::from_slice(&response.body).map_err(|e| {
            SupabaseError::ParseError(format!("Failed to parse rows: {}", e)).into()
        })
    }

    async fn fetch_page(
        &self,
        table: &str,
        query: &Query,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Row>> {
        let qs = select_query_string(query, Some(limit), offset);
        let response = self.send(self.request(HttpMethod::Get, table, &qs)).await?;
        Self::parse_rows(&response)
    }
}

#[async_trait]
impl RowSource for SupabaseRowSource {
    #[instrument(skip(self, query), fields(table = %table))]
    async fn select(&self, table: &str, query: &Query) -> Result<Vec<Row>> {
        let mut rows = Vec::new();
        let mut offset = 0;

        loop {
            let remaining = query.limit.map(|limit| limit.saturating_sub(rows.len()));
            let page_limit = match remaining {
                Some(0) => break,
                Some(remaining) => remaining.min(self.page_size),
                None => self.page_size,
            };

            let page = self.fetch_page(table, query, page_limit, offset).await?;
            let fetched = page.len();
            debug!(offset, fetched, "Fetched page");
            rows.extend(page);

            if fetched < page_limit {
                break;
            }
            offset += fetched;
        }

        info!("Selected {} rows from {}", rows.len(), table);
        Ok(rows)
    }

    #[instrument(skip(self, filters), fields(table = %table))]
    async fn delete(&self, table: &str, filters: &[Filter]) -> Result<u64> {
        let qs = filter_query_string(filters);
        let request = self
            .request(HttpMethod::Delete, table, &qs)
            .header("Prefer", "return=representation");

        let response = self.send(request).await?;
        let deleted = if response.body.is_empty() {
            0
        } else {
            Self::parse_rows(&response)?.len() as u64
        };

        info!("Deleted {} rows from {}", deleted, table);
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_traits::error::BridgeError;
    use bytes::Bytes;
    use mockall::{mock, Sequence};
    use std::collections::HashMap;

    mock! {
        HttpClient {}

        #[async_trait]
        impl HttpClient for HttpClient {
            async fn execute(&self, request: HttpRequest) -> Result<HttpResponse>;
        }
    }

    fn json_response(status: u16, body: &str) -> HttpResponse {
        HttpResponse {
            status,
            headers: HashMap::new(),
            body: Bytes::from(body.to_string()),
        }
    }

    fn rows_body(count: usize, start: usize) -> String {
        let rows: Vec<String> = (start..start + count)
            .map(|i| format!("{{\"id\":{}}}", i))
            .collect();
        format!("[{}]", rows.join(","))
    }

    #[tokio::test]
    async fn test_select_sends_auth_headers_and_filters() {
        let mut mock_http = MockHttpClient::new();
        mock_http
            .expect_execute()
            .times(1)
            .withf(|req| {
                req.method == HttpMethod::Get
                    && req.url.starts_with("https://xyz.supabase.co/rest/v1/quiz_responses?")
                    && req.url.contains("user_id=eq.u1")
                    && req.url.contains("limit=1")
                    && req.headers.get("apikey") == Some(&"svc".to_string())
                    && req.headers.get("Authorization") == Some(&"Bearer svc".to_string())
            })
            .returning(|_| Ok(json_response(200, r#"[{"id":1,"user_id":"u1"}]"#)));

        let source = SupabaseRowSource::new(Arc::new(mock_http), "https://xyz.supabase.co/", "svc");
        let rows = source
            .select(
                "quiz_responses",
                &Query::new().filter(Filter::eq("user_id", "u1")).limit(1),
            )
            .await
            .unwrap();

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["user_id"], "u1");
    }

    #[tokio::test]
    async fn test_select_pages_until_short_page() {
        let mut mock_http = MockHttpClient::new();
        let mut seq = Sequence::new();

        mock_http
            .expect_execute()
            .times(1)
            .in_sequence(&mut seq)
            .withf(|req| req.url.contains("limit=2") && !req.url.contains("offset="))
            .returning(|_| Ok(json_response(200, &rows_body(2, 0))));
        mock_http
            .expect_execute()
            .times(1)
            .in_sequence(&mut seq)
            .withf(|req| req.url.contains("limit=2") && req.url.contains("offset=2"))
            .returning(|_| Ok(json_response(200, &rows_body(1, 2))));

        let source = SupabaseRowSource::new(Arc::new(mock_http), "https://xyz.supabase.co", "svc")
            .with_page_size(2);
        let rows = source.select("user_profiles", &Query::new()).await.unwrap();

        assert_eq!(rows.len(), 3);
    }

    #[tokio::test]
    async fn test_delete_counts_returned_rows() {
        let mut mock_http = MockHttpClient::new();
        mock_http
            .expect_execute()
            .times(1)
            .withf(|req| {
                req.method == HttpMethod::Delete
                    && req.headers.get("Prefer") == Some(&"return=representation".to_string())
                    && req.url.contains("or=")
            })
            .returning(|_| Ok(json_response(200, &rows_body(3, 0))));

        let source = SupabaseRowSource::new(Arc::new(mock_http), "https://xyz.supabase.co", "svc");
        let deleted = source
            .delete("chat_sessions", &[Filter::empty("chat_history")])
            .await
            .unwrap();

        assert_eq!(deleted, 3);
    }

    #[tokio::test]
    async fn test_api_error_maps_to_bridge_http_error() {
        let mut mock_http = MockHttpClient::new();
        mock_http
            .expect_execute()
            .returning(|_| Ok(json_response(400, r#"{"message":"column missing"}"#)));

        let source = SupabaseRowSource::new(Arc::new(mock_http), "https://xyz.supabase.co", "svc");
        let err = source
            .select("user_profiles", &Query::new())
            .await
            .unwrap_err();

        match err {
            BridgeError::Http { status, message } => {
                assert_eq!(status, 400);
                assert!(message.contains("column missing"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_malformed_body_is_decode_error() {
        let mut mock_http = MockHttpClient::new();
        mock_http
            .expect_execute()
            .returning(|_| Ok(json_response(200, "not json")));

        let source = SupabaseRowSource::new(Arc::new(mock_http), "https://xyz.supabase.co", "svc");
        let err = source
            .select("user_profiles", &Query::new())
            .await
            .unwrap_err();

        assert!(matches!(err, BridgeError::Decode(_)));
    }
}
