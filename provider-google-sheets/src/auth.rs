//! Service-account authentication for Google APIs

use async_trait::async_trait;
use bridge_traits::http::{HttpClient, HttpMethod, HttpRequest};
use bridge_traits::time::Clock;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::error::{Result, SheetsError};

/// OAuth scope required to read and write spreadsheet values
pub const SPREADSHEETS_SCOPE: &str = "https://www.googleapis.com/auth/spreadsheets";

const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

/// Tokens are refreshed this long before they actually expire
const EXPIRY_MARGIN_SECS: i64 = 60;

/// Google Cloud service-account key, as downloaded from the console.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServiceAccountCredentials {
    #[serde(rename = "type")]
    pub account_type: Option<String>,
    pub project_id: Option<String>,
    pub private_key_id: Option<String>,
    pub private_key: String,
    pub client_email: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

impl ServiceAccountCredentials {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| SheetsError::Credentials(format!("Failed to parse key JSON: {}", e)))
    }

    /// Read the key file once at startup.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            SheetsError::Credentials(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_json(&json)
    }
}

/// Source of bearer tokens for Sheets requests.
#[async_trait]
pub trait AccessTokenProvider: Send + Sync {
    async fn access_token(&self) -> Result<String>;
}

/// Fixed token, for tests and short-lived tooling.
pub struct StaticToken(pub String);

#[async_trait]
impl AccessTokenProvider for StaticToken {
    async fn access_token(&self) -> Result<String> {
        Ok(self.0.clone())
    }
}

/// JWT claims for the OAuth2 JWT-bearer grant.
#[derive(Debug, Serialize)]
struct JwtClaims {
    iss: String,
    scope: String,
    aud: String,
    iat: i64,
    exp: i64,
}

/// Cached access token with expiration.
#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    expires_at: DateTime<Utc>,
}

/// Response from the OAuth2 token endpoint.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

/// Exchanges a signed service-account JWT for access tokens and caches them.
pub struct ServiceAccountAuth {
    http_client: Arc<dyn HttpClient>,
    credentials: ServiceAccountCredentials,
    scope: String,
    clock: Arc<dyn Clock>,
    cached: Mutex<Option<CachedToken>>,
}

impl ServiceAccountAuth {
    pub fn new(
        http_client: Arc<dyn HttpClient>,
        credentials: ServiceAccountCredentials,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            http_client,
            credentials,
            scope: SPREADSHEETS_SCOPE.to_string(),
            clock,
            cached: Mutex::new(None),
        }
    }

    pub fn client_email(&self) -> &str {
        &self.credentials.client_email
    }

    fn signed_assertion(&self, now: DateTime<Utc>) -> Result<String> {
        let claims = JwtClaims {
            iss: self.credentials.client_email.clone(),
            scope: self.scope.clone(),
            aud: self.credentials.token_uri.clone(),
            iat: now.timestamp(),
            exp: (now + Duration::hours(1)).timestamp(),
        };

        let key = EncodingKey::from_rsa_pem(self.credentials.private_key.as_bytes()).map_err(
            |e| SheetsError::Credentials(format!("Invalid private key format: {}", e)),
        )?;

        encode(&Header::new(Algorithm::RS256), &claims, &key)
            .map_err(|e| SheetsError::AuthenticationFailed(format!("Failed to sign JWT: {}", e)))
    }

    #[instrument(skip(self))]
    async fn fetch_token(&self) -> Result<CachedToken> {
        let now = self.clock.now();
        let assertion = self.signed_assertion(now)?;

        debug!(token_uri = %self.credentials.token_uri, "Exchanging JWT for access token");

        let form = format!(
            "grant_type={}&assertion={}",
            urlencoding::encode("urn:ietf:params:oauth:grant-type:jwt-bearer"),
            urlencoding::encode(&assertion)
        );
        let request = HttpRequest::new(HttpMethod::Post, self.credentials.token_uri.clone())
            .form_encoded(form)
            .timeout(std::time::Duration::from_secs(30));

        let response = self.http_client.execute(request).await?;
        if !response.is_success() {
            let body = String::from_utf8_lossy(&response.body).to_string();
            warn!(status = response.status, "Token exchange failed");
            return Err(SheetsError::AuthenticationFailed(format!(
                "OAuth token exchange failed (HTTP {}): {}",
                response.status, body
            )));
        }

        let token: TokenResponse = serde_json::from_slice(&response.body).map_err(|e| {
            SheetsError::ParseError(format!("Failed to parse token response: {}", e))
        })?;

        info!(
            "Obtained access token (expires in {} seconds)",
            token.expires_in
        );

        Ok(CachedToken {
            access_token: token.access_token,
            expires_at: now + Duration::seconds(token.expires_in),
        })
    }
}

#[async_trait]
impl AccessTokenProvider for ServiceAccountAuth {
    async fn access_token(&self) -> Result<String> {
        let mut cached = self.cached.lock().await;
        let now = self.clock.now();

        if let Some(token) = cached.as_ref() {
            if token.expires_at - Duration::seconds(EXPIRY_MARGIN_SECS) > now {
                return Ok(token.access_token.clone());
            }
        }

        let fresh = self.fetch_token().await?;
        let access_token = fresh.access_token.clone();
        *cached = Some(fresh);
        Ok(access_token)
    }
}
