//! Signing key sets
//!
//! A [`KeySet`] hands out the [`DecodingKey`] matching a token's `kid`.
//!
//! - [`StaticKeySet`]: keys supplied up front, never refreshed
//! - [`RemoteKeySet`]: keys fetched from a `jwks_uri`, cached, and re-fetched
//!   when a token names a key id the cache does not know (issuer key rotation).
//!   Refreshes are rate limited.

use async_trait::async_trait;
use jsonwebtoken::DecodingKey;
use jsonwebtoken::jwk::{Jwk, JwkSet};
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use super::verifier::VerifyError;

/// Source of verification keys for one issuer
#[async_trait]
pub trait KeySet: Send + Sync + std::fmt::Debug {
    /// Decoding key for the header key id `kid`
    ///
    /// A token without `kid` is matched only when the set holds exactly one key.
    async fn decoding_key(&self, kid: Option<&str>) -> Result<DecodingKey, VerifyError>;
}

fn select_key<'a>(jwks: &'a JwkSet, kid: Option<&str>) -> Option<&'a Jwk> {
    match kid {
        Some(kid) => jwks.find(kid),
        None if jwks.keys.len() == 1 => jwks.keys.first(),
        None => None,
    }
}

fn to_decoding_key(jwk: &Jwk) -> Result<DecodingKey, VerifyError> {
    DecodingKey::from_jwk(jwk).map_err(|source| {
        error!(key_id = ?jwk.common.key_id, error = %source, "Failed to create decoding key from JWK");
        VerifyError::InvalidKey {
            kid: jwk.common.key_id.clone(),
            source,
        }
    })
}

/// Fixed key set supplied by the caller
#[derive(Debug, Clone)]
pub struct StaticKeySet {
    jwks: JwkSet,
}

impl StaticKeySet {
    /// Wrap a JWK set
    pub fn new(jwks: JwkSet) -> Self {
        Self { jwks }
    }

    /// Parse a JWK set document (`{"keys": [...]}`)
    ///
    /// # Errors
    ///
    /// Returns an error if `json` is not a valid JWK set.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        Ok(Self::new(serde_json::from_str(json)?))
    }

    /// Number of keys
    pub fn len(&self) -> usize {
        self.jwks.keys.len()
    }

    /// Whether the set is empty
    pub fn is_empty(&self) -> bool {
        self.jwks.keys.is_empty()
    }
}

#[async_trait]
impl KeySet for StaticKeySet {
    async fn decoding_key(&self, kid: Option<&str>) -> Result<DecodingKey, VerifyError> {
        let jwk = select_key(&self.jwks, kid).ok_or_else(|| {
            warn!(key_id = ?kid, "Key ID not found in static key set");
            VerifyError::NoMatchingKey {
                kid: kid.map(str::to_string),
            }
        })?;
        to_decoding_key(jwk)
    }
}

/// Key set published at a JWKS endpoint
#[derive(Debug)]
pub struct RemoteKeySet {
    /// JWKS endpoint URL
    jwks_uri: String,
    /// HTTP client (carries the configured timeout and root certificates)
    http_client: reqwest::Client,
    /// Last fetched key set
    cache: RwLock<Option<JwkSet>>,
    /// Last refresh attempt; the lock also serializes refreshes
    last_refresh: Mutex<Option<Instant>>,
    /// Minimum refresh interval (rate limiting)
    min_refresh_interval: Duration,
}

impl RemoteKeySet {
    /// Default minimum interval between two fetches of the key set
    pub const DEFAULT_MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(5);

    /// Create a key set for `jwks_uri`; nothing is fetched until first use
    pub fn new(jwks_uri: impl Into<String>, http_client: reqwest::Client) -> Self {
        Self {
            jwks_uri: jwks_uri.into(),
            http_client,
            cache: RwLock::new(None),
            last_refresh: Mutex::new(None),
            min_refresh_interval: Self::DEFAULT_MIN_REFRESH_INTERVAL,
        }
    }

    /// Set the minimum interval between fetches
    pub fn with_min_refresh_interval(mut self, interval: Duration) -> Self {
        self.min_refresh_interval = interval;
        self
    }

    /// The JWKS endpoint URL
    pub fn jwks_uri(&self) -> &str {
        &self.jwks_uri
    }

    /// Fetch the key set unless it was fetched within the minimum refresh interval
    ///
    /// # Errors
    ///
    /// Returns an error if the endpoint is unreachable, answers with a
    /// non-success status, or the body is not a JWK set.
    pub async fn refresh(&self) -> Result<JwkSet, VerifyError> {
        let mut last_refresh = self.last_refresh.lock().await;

        if let Some(last) = *last_refresh
            && last.elapsed() < self.min_refresh_interval
            && let Some(jwks) = self.cache.read().await.clone()
        {
            debug!(jwks_uri = %self.jwks_uri, "JWKS refresh rate limited, using cache");
            return Ok(jwks);
        }

        *last_refresh = Some(Instant::now());
        let jwks = self.fetch().await?;
        *self.cache.write().await = Some(jwks.clone());
        Ok(jwks)
    }

    async fn fetch(&self) -> Result<JwkSet, VerifyError> {
        info!(jwks_uri = %self.jwks_uri, "Fetching JWKS from endpoint");

        let response = self
            .http_client
            .get(&self.jwks_uri)
            .send()
            .await
            .map_err(|source| {
                error!(jwks_uri = %self.jwks_uri, error = %source, "Failed to fetch JWKS");
                VerifyError::KeySetFetch {
                    jwks_uri: self.jwks_uri.clone(),
                    source,
                }
            })?;

        if !response.status().is_success() {
            error!(
                jwks_uri = %self.jwks_uri,
                status = %response.status(),
                "JWKS endpoint returned error status"
            );
            return Err(VerifyError::KeySetStatus {
                jwks_uri: self.jwks_uri.clone(),
                status: response.status(),
            });
        }

        let jwks: JwkSet = response.json().await.map_err(|source| {
            error!(jwks_uri = %self.jwks_uri, error = %source, "Failed to parse JWKS JSON");
            VerifyError::KeySetFetch {
                jwks_uri: self.jwks_uri.clone(),
                source,
            }
        })?;

        info!(
            jwks_uri = %self.jwks_uri,
            key_count = jwks.keys.len(),
            "Successfully fetched JWKS"
        );
        Ok(jwks)
    }
}

#[async_trait]
impl KeySet for RemoteKeySet {
    async fn decoding_key(&self, kid: Option<&str>) -> Result<DecodingKey, VerifyError> {
        {
            let cache = self.cache.read().await;
            if let Some(jwks) = cache.as_ref()
                && let Some(jwk) = select_key(jwks, kid)
            {
                return to_decoding_key(jwk);
            }
        }

        // Unknown kid or empty cache: the issuer may have rotated its keys
        let jwks = self.refresh().await?;
        let jwk = select_key(&jwks, kid).ok_or_else(|| {
            warn!(jwks_uri = %self.jwks_uri, key_id = ?kid, "Key ID not found in JWKS");
            VerifyError::NoMatchingKey {
                kid: kid.map(str::to_string),
            }
        })?;
        to_decoding_key(jwk)
    }
}
