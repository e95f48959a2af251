use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, instrument};

use super::credentials::ServiceAccountKey;
use super::truncate_detail;

pub const DATASTORE_SCOPE: &str = "https://www.googleapis.com/auth/datastore";
pub const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

/// Tokens within this many seconds of expiry are treated as stale so a token
/// can never expire in the middle of a store request.
const REFRESH_MARGIN_SECS: i64 = 300;
const ASSERTION_TTL_SECS: i64 = 3600;
const DEFAULT_EXPIRES_IN_SECS: i64 = 3600;

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("credential unusable for signing: {0}")]
    Credential(String),
    #[error("token exchange rejected ({status}): {detail}")]
    Exchange { status: u16, detail: String },
    #[error("token endpoint unreachable: {0}")]
    Transport(#[from] reqwest::Error),
}

/// Clock seam so tests can drive the refresh margin without sleeping.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Clone)]
struct CachedToken {
    token: String,
    expires_at: DateTime<Utc>,
}

#[derive(Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: Option<i64>,
}

/// Exchanges the long-lived service-account key for short-lived bearer
/// tokens, caching the result process-wide.
///
/// The cache mutex is held across the mint, so N concurrent cold callers
/// collapse into exactly one outbound exchange; everyone else parks on the
/// lock and then reads the fresh cache. A failed mint releases the lock with
/// the cache untouched, leaving the next caller free to retry.
pub struct TokenBroker {
    key: ServiceAccountKey,
    http: reqwest::Client,
    token_url: String,
    clock: Arc<dyn Clock>,
    cache: Mutex<Option<CachedToken>>,
}

impl TokenBroker {
    pub fn new(key: ServiceAccountKey, http: reqwest::Client) -> Self {
        Self::with_endpoints(key, http, TOKEN_URL.to_string(), Arc::new(SystemClock))
    }

    pub fn with_endpoints(
        key: ServiceAccountKey,
        http: reqwest::Client,
        token_url: String,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            key,
            http,
            token_url,
            clock,
            cache: Mutex::new(None),
        }
    }

    /// Returns a bearer token with at least `REFRESH_MARGIN_SECS` of life
    /// left, minting a fresh one when the cached token is absent or stale.
    #[instrument(skip(self))]
    pub async fn bearer_token(&self) -> Result<String, TokenError> {
        let mut cache = self.cache.lock().await;
        let now = self.clock.now();

        if let Some(cached) = cache.as_ref() {
            if cached.expires_at - now > Duration::seconds(REFRESH_MARGIN_SECS) {
                return Ok(cached.token.clone());
            }
        }

        let minted = self.mint(now).await?;
        let token = minted.token.clone();
        *cache = Some(minted);
        Ok(token)
    }

    async fn mint(&self, now: DateTime<Utc>) -> Result<CachedToken, TokenError> {
        let assertion = self.signed_assertion(now)?;

        let response = self
            .http
            .post(&self.token_url)
            .form(&[
                ("grant_type", JWT_BEARER_GRANT),
                ("assertion", assertion.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let detail = truncate_detail(&response.text().await.unwrap_or_default());
            return Err(TokenError::Exchange {
                status: status.as_u16(),
                detail,
            });
        }

        let body: TokenResponse = response.json().await?;
        let expires_in = body.expires_in.unwrap_or(DEFAULT_EXPIRES_IN_SECS);
        debug!(expires_in, "minted document store access token");

        Ok(CachedToken {
            token: body.access_token,
            expires_at: now + Duration::seconds(expires_in),
        })
    }

    /// Builds the signed RS256 assertion for the JWT-bearer grant.
    pub(crate) fn signed_assertion(&self, now: DateTime<Utc>) -> Result<String, TokenError> {
        let pem = self.key.private_key.as_str();
        if !pem.contains("-----BEGIN") || !pem.contains("-----END") {
            return Err(TokenError::Credential(
                "private key PEM is missing BEGIN/END markers".into(),
            ));
        }

        let encoding_key = EncodingKey::from_rsa_pem(pem.as_bytes())
            .map_err(|err| TokenError::Credential(err.to_string()))?;

        let issued_at = now.timestamp();
        let claims = AssertionClaims {
            iss: &self.key.client_email,
            scope: DATASTORE_SCOPE,
            aud: &self.token_url,
            iat: issued_at,
            exp: issued_at + ASSERTION_TTL_SECS,
        };

        jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &encoding_key)
            .map_err(|err| TokenError::Credential(err.to_string()))
    }
}
