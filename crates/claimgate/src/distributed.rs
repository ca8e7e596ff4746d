//! Distributed claim resolution (OIDC Core 5.6.2)
//!
//! A provider may leave a large claim out of the ID token and point at a
//! claims endpoint instead:
//!
//! ```json
//! {
//!   "_claim_names": { "groups": "src1" },
//!   "_claim_sources": {
//!     "src1": { "endpoint": "https://claims.example.com/groups", "access_token": "f005ba11" }
//!   }
//! }
//! ```
//!
//! [`ClaimResolver::expand`] fetches the endpoint, verifies the returned token
//! with the verifier of whichever issuer signed it, and copies the claim into
//! the original claim set. Aggregated claims (a `JWT` member instead of an
//! endpoint) are left alone.

use serde::Deserialize;
use std::collections::HashMap;
use thiserror::Error;
use tracing::{debug, error, warn};
use url::Url;

use crate::claims::ClaimSet;
use crate::config::is_secure_or_loopback;
use crate::jwt::cache::VerifierCache;
use crate::jwt::verifier::VerifyError;
use crate::token::{self, CLAIM_NAMES, CLAIM_SOURCES, TokenFormatError};

/// One entry of `_claim_sources`
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ClaimSource {
    /// Distributed claims endpoint
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Bearer token for the endpoint
    #[serde(default)]
    pub access_token: Option<String>,

    /// Aggregated claims token (not resolved)
    #[serde(default, rename = "JWT")]
    pub jwt: Option<String>,
}

/// Distributed claim resolution errors
#[derive(Debug, Error)]
pub enum ResolveError {
    /// `_claim_names` is not an object of strings
    #[error("error parsing distributed claim names: {0}")]
    MalformedClaimNames(#[source] serde_json::Error),

    /// `_claim_names` references a claim but there is no `_claim_sources`
    #[error("no claim sources")]
    NoClaimSources,

    /// `_claim_sources` is not an object of source definitions
    #[error("could not parse claim sources: {0}")]
    MalformedClaimSources(#[source] serde_json::Error),

    /// `_claim_names` names a source missing from `_claim_sources`
    #[error("_claim_names contains source {source_name:?} for claim {claim:?}, missing in _claim_sources")]
    UnknownSource {
        /// Claim being resolved
        claim: String,
        /// Source name from `_claim_names`
        source_name: String,
    },

    /// The claims endpoint could not be reached
    #[error("while getting distributed claim {claim:?} from {endpoint}: {source}")]
    Fetch {
        /// Claim being resolved
        claim: String,
        /// Claims endpoint
        endpoint: String,
        /// Underlying error
        #[source]
        source: reqwest::Error,
    },

    /// The claims endpoint returned a non-success status
    #[error("error getting distributed claim token from {endpoint}: status {status}")]
    Status {
        /// Claims endpoint
        endpoint: String,
        /// HTTP status
        status: reqwest::StatusCode,
    },

    /// The claims endpoint returned more than the response size limit
    #[error("response from distributed claim endpoint {endpoint} exceeds {limit} bytes")]
    ResponseTooLarge {
        /// Claims endpoint
        endpoint: String,
        /// Configured limit in bytes
        limit: usize,
    },

    /// The endpoint response is not a compact token with a readable issuer
    #[error("getting untrusted issuer from {endpoint} failed for claim {claim:?}: {source}")]
    UntrustedIssuer {
        /// Claim being resolved
        claim: String,
        /// Claims endpoint
        endpoint: String,
        /// Format error
        #[source]
        source: TokenFormatError,
    },

    /// The claims token names an issuer that is not an https (or loopback) URL
    #[error("distributed claim {claim:?} is signed by untrusted issuer {issuer:?}")]
    InsecureIssuer {
        /// Claim being resolved
        claim: String,
        /// Issuer of the claims token
        issuer: String,
    },

    /// The verifier for the claims token issuer is not initialized yet
    #[error("verifier not initialized for issuer {issuer:?}")]
    VerifierNotReady {
        /// Issuer of the claims token
        issuer: String,
    },

    /// The claims token did not verify
    #[error("verify distributed claim token from {issuer}: {source}")]
    Verification {
        /// Issuer of the claims token
        issuer: String,
        /// Verification failure
        #[source]
        source: VerifyError,
    },

    /// The claims token does not carry the claim it was fetched for
    #[error("token returned by distributed claim endpoint {endpoint} did not contain claim {claim:?}")]
    SourceDidNotProvideClaim {
        /// Claim being resolved
        claim: String,
        /// Claims endpoint
        endpoint: String,
    },
}

/// Resolves one distributed claim
#[derive(Debug)]
pub struct ClaimResolver {
    claim: String,
    http_client: reqwest::Client,
    verifiers: VerifierCache,
    max_response_size: usize,
}

impl ClaimResolver {
    /// Largest claims endpoint response read by default (1 MiB)
    pub const DEFAULT_MAX_RESPONSE_SIZE: usize = 1024 * 1024;

    /// Resolver for `claim`, verifying claims tokens with `verifiers`
    pub fn new(claim: impl Into<String>, http_client: reqwest::Client, verifiers: VerifierCache) -> Self {
        Self {
            claim: claim.into(),
            http_client,
            verifiers,
            max_response_size: Self::DEFAULT_MAX_RESPONSE_SIZE,
        }
    }

    /// Limit the size of claims endpoint responses
    pub fn with_max_response_size(mut self, limit: usize) -> Self {
        self.max_response_size = limit;
        self
    }

    /// Claim this resolver resolves
    pub fn claim(&self) -> &str {
        &self.claim
    }

    /// Verifiers of claims token issuers
    pub fn verifiers(&self) -> &VerifierCache {
        &self.verifiers
    }

    /// Pull the distributed claim into `claims`
    ///
    /// Leaves `claims` untouched when the claim is present already, is not
    /// distributed, or is an aggregated claim.
    ///
    /// # Errors
    ///
    /// Returns a [`ResolveError`] if the claim references are malformed or
    /// the claim cannot be fetched and verified.
    pub async fn expand(&self, claims: &mut ClaimSet) -> Result<(), ResolveError> {
        if claims.has_claim(&self.claim) {
            return Ok(());
        }
        let Some(names) = claims.raw(CLAIM_NAMES) else {
            return Ok(());
        };
        let names: HashMap<String, String> =
            serde_json::from_str(names.get()).map_err(ResolveError::MalformedClaimNames)?;
        let Some(source_name) = names.get(&self.claim) else {
            return Ok(());
        };

        let sources = claims.raw(CLAIM_SOURCES).ok_or(ResolveError::NoClaimSources)?;
        let mut sources: HashMap<String, ClaimSource> =
            serde_json::from_str(sources.get()).map_err(ResolveError::MalformedClaimSources)?;
        let source = sources
            .remove(source_name)
            .ok_or_else(|| ResolveError::UnknownSource {
                claim: self.claim.clone(),
                source_name: source_name.clone(),
            })?;

        let Some(endpoint) = source.endpoint.filter(|e| !e.is_empty()) else {
            debug!(claim = %self.claim, source = %source_name, "Aggregated claim source, not resolving");
            return Ok(());
        };

        let value = self.resolve(&endpoint, source.access_token.as_deref()).await?;
        claims.insert_raw(self.claim.clone(), value);
        Ok(())
    }

    async fn resolve(
        &self,
        endpoint: &str,
        access_token: Option<&str>,
    ) -> Result<Box<serde_json::value::RawValue>, ResolveError> {
        let claim_token = self.fetch(endpoint, access_token).await?;
        let claim_token = claim_token.trim();

        let issuer = token::decode_untrusted_issuer(claim_token).map_err(|source| {
            ResolveError::UntrustedIssuer {
                claim: self.claim.clone(),
                endpoint: endpoint.to_string(),
                source,
            }
        })?;
        debug!(claim = %self.claim, issuer = %issuer, "Distributed claim token fetched");

        // Discovery runs against whatever the token names, so hold it to the
        // same transport rule as the configured issuer.
        if Url::parse(&issuer).ok().filter(is_secure_or_loopback).is_none() {
            warn!(claim = %self.claim, issuer = %issuer, "Distributed claim token from insecure issuer");
            return Err(ResolveError::InsecureIssuer {
                claim: self.claim.clone(),
                issuer,
            });
        }

        let verifier = self
            .verifiers
            .verifier(&issuer)
            .await
            .ok_or_else(|| ResolveError::VerifierNotReady {
                issuer: issuer.clone(),
            })?;

        let mut verified = verifier.verify(claim_token).await.map_err(|source| {
            warn!(issuer = %issuer, error = %source, "Distributed claim token rejected");
            ResolveError::Verification {
                issuer: issuer.clone(),
                source,
            }
        })?;

        let value = verified.claims.remove(&self.claim).ok_or_else(|| {
            error!(claim = %self.claim, endpoint, "Claim source did not provide claim");
            ResolveError::SourceDidNotProvideClaim {
                claim: self.claim.clone(),
                endpoint: endpoint.to_string(),
            }
        })?;
        debug!(claim = %self.claim, "Distributed claim resolved");
        Ok(value)
    }

    async fn fetch(&self, endpoint: &str, access_token: Option<&str>) -> Result<String, ResolveError> {
        debug!(claim = %self.claim, endpoint, "Fetching distributed claim");

        let mut request = self.http_client.get(endpoint);
        if let Some(access_token) = access_token.filter(|t| !t.is_empty()) {
            request = request.bearer_auth(access_token);
        }

        let fetch_error = |source| ResolveError::Fetch {
            claim: self.claim.clone(),
            endpoint: endpoint.to_string(),
            source,
        };

        let mut response = request.send().await.map_err(fetch_error)?;
        if !response.status().is_success() {
            warn!(endpoint, status = %response.status(), "Claims endpoint returned error status");
            return Err(ResolveError::Status {
                endpoint: endpoint.to_string(),
                status: response.status(),
            });
        }

        let limit = self.max_response_size;
        let too_large = || {
            warn!(endpoint, limit, "Claims endpoint response too large");
            ResolveError::ResponseTooLarge {
                endpoint: endpoint.to_string(),
                limit,
            }
        };
        if let Some(length) = response.content_length()
            && length > limit as u64
        {
            return Err(too_large());
        }

        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await.map_err(fetch_error)? {
            if body.len() + chunk.len() > limit {
                return Err(too_large());
            }
            body.extend_from_slice(&chunk);
        }
        Ok(String::from_utf8_lossy(&body).into_owned())
    }
}
