//! OAuth2 access tokens for the GCS JSON API.
//!
//! Tokens come from the service-account JWT-bearer flow: an RS256-signed
//! assertion is exchanged at the key's `token_uri`.  The token is cached
//! until 60 seconds before it expires.  A statically configured token
//! short-circuits the exchange entirely, which is what storage emulators
//! expect.

use jsonwebtoken::{Algorithm, Header};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;

use crate::credentials::ServiceAccountKey;
use crate::errors::{Result, StorageError};

/// OAuth scope granting full control over buckets and objects.
pub const STORAGE_SCOPE: &str = "https://www.googleapis.com/auth/devstorage.full_control";

const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

/// Assertion lifetime; Google caps this at one hour.
const ASSERTION_LIFETIME_SECS: i64 = 3600;

/// Refresh this long before the reported expiry.
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

#[derive(Debug, Serialize)]
struct Claims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

fn default_expires_in() -> u64 {
    3600
}

/// Cached access token with expiry.
struct CachedToken {
    access_token: String,
    expiry: Instant,
}

/// Hands out bearer tokens, refreshing them as needed.
pub struct TokenProvider {
    http: reqwest::Client,
    key: Arc<ServiceAccountKey>,
    static_token: Option<String>,
    cache: Mutex<Option<CachedToken>>,
}

impl TokenProvider {
    pub fn new(
        http: reqwest::Client,
        key: Arc<ServiceAccountKey>,
        static_token: Option<String>,
    ) -> Self {
        Self {
            http,
            key,
            static_token,
            cache: Mutex::new(None),
        }
    }

    /// Return a valid bearer token.
    pub async fn access_token(&self) -> Result<String> {
        if let Some(ref token) = self.static_token {
            return Ok(token.clone());
        }

        // Held across the exchange so concurrent callers share one refresh.
        let mut cache = self.cache.lock().await;
        if let Some(ref cached) = *cache {
            if cached.expiry > Instant::now() {
                return Ok(cached.access_token.clone());
            }
        }

        let (token, expires_in) = self.exchange_jwt().await?;
        let expiry = Instant::now() + Duration::from_secs(expires_in).saturating_sub(EXPIRY_MARGIN);
        *cache = Some(CachedToken {
            access_token: token.clone(),
            expiry,
        });

        Ok(token)
    }

    /// Build the signed JWT assertion for `now` (seconds since epoch).
    pub fn assertion(&self, now: i64) -> Result<String> {
        let mut header = Header::new(Algorithm::RS256);
        if !self.key.private_key_id.is_empty() {
            header.kid = Some(self.key.private_key_id.clone());
        }
        let claims = Claims {
            iss: &self.key.client_email,
            scope: STORAGE_SCOPE,
            aud: &self.key.token_uri,
            iat: now,
            exp: now + ASSERTION_LIFETIME_SECS,
        };
        jsonwebtoken::encode(&header, &claims, &self.key.encoding_key()?)
            .map_err(|e| StorageError::Signing(format!("JWT assertion: {e}")))
    }

    async fn exchange_jwt(&self) -> Result<(String, u64)> {
        let assertion = self.assertion(chrono::Utc::now().timestamp())?;

        debug!(
            "Exchanging JWT assertion for {} at {}",
            self.key.client_email, self.key.token_uri
        );

        let resp = self
            .http
            .post(&self.key.token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await
            .map_err(|e| StorageError::Token(format!("token request failed: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(StorageError::Token(format!(
                "token endpoint returned {status}: {body}"
            )));
        }

        let token: TokenResponse = resp
            .json()
            .await
            .map_err(|e| StorageError::Token(format!("malformed token response: {e}")))?;

        Ok((token.access_token, token.expires_in))
    }
}
