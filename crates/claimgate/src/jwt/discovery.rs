//! OpenID Connect Discovery
//!
//! Builds an issuer's verifier from `{issuer}/.well-known/openid-configuration`:
//!
//! 1. Fetch the discovery document
//! 2. Check that its `issuer` matches the requested issuer exactly
//! 3. Bind a [`RemoteKeySet`] to its `jwks_uri`
//!
//! No fallback URL is guessed when discovery fails; the caller retries.

use async_trait::async_trait;
use jsonwebtoken::Algorithm;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use super::keys::RemoteKeySet;
use super::verifier::{IdTokenVerifier, VerifierConfig};
use crate::config::is_secure_or_loopback;

/// Discovery errors
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// A URL in the exchange is not a valid URL
    #[error("invalid URL {url}: {source}")]
    InvalidUrl {
        /// Offending URL
        url: String,
        /// Parse error
        #[source]
        source: url::ParseError,
    },

    /// HTTP request failed
    #[error("discovery request to {url} failed: {source}")]
    Request {
        /// Discovery URL
        url: String,
        /// Underlying error
        #[source]
        source: reqwest::Error,
    },

    /// The discovery endpoint returned a non-success status
    #[error("discovery endpoint {url} returned status {status}")]
    Status {
        /// Discovery URL
        url: String,
        /// HTTP status
        status: reqwest::StatusCode,
    },

    /// The discovery document is not valid JSON or lacks required fields
    #[error("invalid discovery document from {url}: {source}")]
    InvalidDocument {
        /// Discovery URL
        url: String,
        /// Underlying error
        #[source]
        source: reqwest::Error,
    },

    /// Issuer mismatch between request and document
    #[error("issuer in document ({document}) does not match expected issuer ({expected})")]
    IssuerMismatch {
        /// Issuer advertised by the document
        document: String,
        /// Issuer that was requested
        expected: String,
    },

    /// The advertised JWKS URI does not use https
    #[error("jwks_uri must use https: {0}")]
    InsecureJwksUri(String),
}

/// OpenID Provider metadata (the fields this crate reads)
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderMetadata {
    /// Issuer identifier
    pub issuer: String,

    /// JWK Set document URL
    pub jwks_uri: String,

    /// Algorithms the provider signs ID tokens with
    #[serde(default)]
    pub id_token_signing_alg_values_supported: Vec<String>,

    /// All other fields
    #[serde(flatten)]
    pub additional: HashMap<String, serde_json::Value>,
}

impl ProviderMetadata {
    /// Whether the provider advertises at least one of `algorithms`
    ///
    /// Providers that leave `id_token_signing_alg_values_supported` out are
    /// assumed to support anything.
    pub fn signs_with_any(&self, algorithms: &[Algorithm]) -> bool {
        self.id_token_signing_alg_values_supported.is_empty()
            || self
                .id_token_signing_alg_values_supported
                .iter()
                .filter_map(|name| name.parse::<Algorithm>().ok())
                .any(|alg| algorithms.contains(&alg))
    }
}

/// Discovery URL for an issuer (trailing slash on the issuer is ignored)
pub fn discovery_url(issuer: &str) -> String {
    format!(
        "{}/.well-known/openid-configuration",
        issuer.trim_end_matches('/')
    )
}

/// Something that can build a verifier for an issuer
///
/// [`Discoverer`] is the network implementation; tests substitute their own.
#[async_trait]
pub trait ProviderDiscovery: Send + Sync + std::fmt::Debug {
    /// Build a verifier for `issuer`
    async fn discover(&self, issuer: &str) -> Result<IdTokenVerifier, DiscoveryError>;
}

/// Network discovery of provider metadata and keys
#[derive(Debug, Clone)]
pub struct Discoverer {
    /// HTTP client
    http_client: reqwest::Client,
    /// Settings for the verifiers this discoverer builds
    config: VerifierConfig,
    /// Minimum interval between two JWKS fetches of one issuer
    min_key_refresh_interval: Duration,
}

impl Discoverer {
    /// Create a discoverer
    pub fn new(http_client: reqwest::Client, config: VerifierConfig) -> Self {
        Self {
            http_client,
            config,
            min_key_refresh_interval: RemoteKeySet::DEFAULT_MIN_REFRESH_INTERVAL,
        }
    }

    /// Set the JWKS refresh rate limit for discovered key sets
    pub fn with_min_key_refresh_interval(mut self, interval: Duration) -> Self {
        self.min_key_refresh_interval = interval;
        self
    }

    /// Fetch and validate the discovery document of `issuer`
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError`] if the document cannot be fetched or parsed,
    /// names a different issuer, or advertises a non-https `jwks_uri`.
    pub async fn fetch_metadata(&self, issuer: &str) -> Result<ProviderMetadata, DiscoveryError> {
        let url = discovery_url(issuer);
        debug!(issuer, discovery_url = %url, "Fetching OIDC discovery document");

        let response = self
            .http_client
            .get(&url)
            .send()
            .await
            .map_err(|source| DiscoveryError::Request {
                url: url.clone(),
                source,
            })?;

        if !response.status().is_success() {
            return Err(DiscoveryError::Status {
                url,
                status: response.status(),
            });
        }

        let metadata: ProviderMetadata =
            response
                .json()
                .await
                .map_err(|source| DiscoveryError::InvalidDocument {
                    url: url.clone(),
                    source,
                })?;

        if metadata.issuer != issuer {
            return Err(DiscoveryError::IssuerMismatch {
                document: metadata.issuer,
                expected: issuer.to_string(),
            });
        }

        let jwks_uri = Url::parse(&metadata.jwks_uri).map_err(|source| {
            DiscoveryError::InvalidUrl {
                url: metadata.jwks_uri.clone(),
                source,
            }
        })?;
        if !is_secure_or_loopback(&jwks_uri) {
            return Err(DiscoveryError::InsecureJwksUri(metadata.jwks_uri));
        }

        Ok(metadata)
    }
}

#[async_trait]
impl ProviderDiscovery for Discoverer {
    async fn discover(&self, issuer: &str) -> Result<IdTokenVerifier, DiscoveryError> {
        let metadata = self.fetch_metadata(issuer).await?;

        info!(
            issuer,
            jwks_uri = %metadata.jwks_uri,
            "Discovered OIDC provider"
        );
        if !metadata.signs_with_any(&self.config.algorithms) {
            warn!(
                issuer,
                advertised = ?metadata.id_token_signing_alg_values_supported,
                accepted = ?self.config.algorithms,
                "Provider advertises no accepted signing algorithm; its tokens will be rejected"
            );
        }

        let key_set = RemoteKeySet::new(metadata.jwks_uri, self.http_client.clone())
            .with_min_refresh_interval(self.min_key_refresh_interval);

        Ok(IdTokenVerifier::new(
            issuer,
            Arc::new(key_set),
            self.config.clone(),
        ))
    }
}
