//! Authenticator configuration
//!
//! [`AuthenticatorConfig`] is plain data: build it in code or deserialize it
//! from any serde format, then hand it to
//! [`OidcAuthenticator`](crate::OidcAuthenticator), which validates it.

use std::collections::HashMap;
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::{Host, Url};

use crate::jwt::verifier::signing_algorithms;

/// Configuration errors, reported when an authenticator is constructed
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The issuer URL does not parse
    #[error("invalid issuer URL {url:?}: {source}")]
    InvalidIssuerUrl {
        /// Configured issuer
        url: String,
        /// Parse error
        #[source]
        source: url::ParseError,
    },

    /// The issuer URL is not https (plain http is accepted for loopback hosts only)
    #[error("issuer URL {url} must use https, not {scheme}")]
    InsecureIssuer {
        /// Configured issuer
        url: String,
        /// Scheme found
        scheme: String,
    },

    /// No username claim configured
    #[error("no username claim provided")]
    MissingUsernameClaim,

    /// No client id configured
    #[error("no client id provided")]
    MissingClientId,

    /// A configured signing algorithm cannot be used
    #[error("unsupported signing algorithm {alg:?}: {reason}")]
    UnsupportedAlgorithm {
        /// Algorithm name
        alg: String,
        /// Why it was rejected
        reason: &'static str,
    },

    /// The CA bundle could not be read
    #[error("failed to read CA file {}: {source}", path.display())]
    CaBundle {
        /// Configured path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// The CA bundle is not valid PEM
    #[error("invalid CA bundle: {0}")]
    InvalidCaBundle(#[source] reqwest::Error),

    /// The HTTP client could not be built
    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[source] reqwest::Error),

    /// The static key set is not a JWK set
    #[error("invalid JWK set: {0}")]
    InvalidKeySet(#[source] serde_json::Error),
}

/// Settings of one [`OidcAuthenticator`](crate::OidcAuthenticator)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthenticatorConfig {
    /// Issuer URL; only tokens whose `iss` equals it exactly are accepted
    pub issuer_url: String,

    /// OAuth client id; must appear in the token audience
    pub client_id: String,

    /// Claim holding the user name
    #[serde(default = "default_username_claim")]
    pub username_claim: String,

    /// Prepended to every user name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username_prefix: Option<String>,

    /// Claim holding the user's groups (string or list of strings)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub groups_claim: Option<String>,

    /// Prepended to every group
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub groups_prefix: Option<String>,

    /// PEM bundle of root certificates trusted for provider connections
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_file: Option<PathBuf>,

    /// Claims that must be present with exactly these string values
    #[serde(default)]
    pub required_claims: HashMap<String, String>,

    /// Accepted signing algorithms; empty means RS256
    #[serde(default)]
    pub supported_signing_algs: Vec<String>,

    /// Wait for the first discovery attempt during construction
    #[serde(default)]
    pub synchronous: bool,

    /// Delay between failed discovery attempts
    #[serde(default = "default_retry_interval")]
    pub retry_interval: Duration,

    /// Timeout of every outbound HTTP request
    #[serde(default = "default_request_timeout")]
    pub request_timeout: Duration,

    /// Tolerance applied to exp and nbf
    #[serde(default = "default_clock_skew")]
    pub clock_skew: Duration,
}

fn default_username_claim() -> String {
    "sub".to_string()
}

fn default_retry_interval() -> Duration {
    Duration::from_secs(10)
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_clock_skew() -> Duration {
    Duration::from_secs(60)
}

impl AuthenticatorConfig {
    /// Configuration with defaults for everything but issuer and client id
    pub fn new(issuer_url: impl Into<String>, client_id: impl Into<String>) -> Self {
        Self {
            issuer_url: issuer_url.into(),
            client_id: client_id.into(),
            username_claim: default_username_claim(),
            username_prefix: None,
            groups_claim: None,
            groups_prefix: None,
            ca_file: None,
            required_claims: HashMap::new(),
            supported_signing_algs: Vec::new(),
            synchronous: false,
            retry_interval: default_retry_interval(),
            request_timeout: default_request_timeout(),
            clock_skew: default_clock_skew(),
        }
    }

    /// Check the configuration without touching the network
    ///
    /// # Errors
    ///
    /// Returns the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = Url::parse(&self.issuer_url).map_err(|source| ConfigError::InvalidIssuerUrl {
            url: self.issuer_url.clone(),
            source,
        })?;
        if !is_secure_or_loopback(&url) {
            return Err(ConfigError::InsecureIssuer {
                url: self.issuer_url.clone(),
                scheme: url.scheme().to_string(),
            });
        }
        if self.client_id.is_empty() {
            return Err(ConfigError::MissingClientId);
        }
        if self.username_claim.is_empty() {
            return Err(ConfigError::MissingUsernameClaim);
        }
        signing_algorithms(&self.supported_signing_algs)?;
        Ok(())
    }

    /// HTTP client for discovery, key set and claim requests
    ///
    /// # Errors
    ///
    /// Fails if the CA bundle cannot be read or parsed, or the client cannot
    /// be built.
    pub fn http_client(&self) -> Result<reqwest::Client, ConfigError> {
        let mut builder = reqwest::Client::builder().timeout(self.request_timeout);

        if let Some(path) = &self.ca_file {
            let pem = std::fs::read(path).map_err(|source| ConfigError::CaBundle {
                path: path.clone(),
                source,
            })?;
            let certificates =
                reqwest::Certificate::from_pem_bundle(&pem).map_err(ConfigError::InvalidCaBundle)?;
            for certificate in certificates {
                builder = builder.add_root_certificate(certificate);
            }
        }

        builder.build().map_err(ConfigError::HttpClient)
    }
}

/// Whether `url` is https, or http to a loopback host
pub fn is_secure_or_loopback(url: &Url) -> bool {
    match url.scheme() {
        "https" => true,
        "http" => match url.host() {
            Some(Host::Domain(domain)) => domain == "localhost",
            Some(Host::Ipv4(ip)) => IpAddr::V4(ip).is_loopback(),
            Some(Host::Ipv6(ip)) => IpAddr::V6(ip).is_loopback(),
            None => false,
        },
        _ => false,
    }
}
