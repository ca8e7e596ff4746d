//! ID token verification
//!
//! An [`IdTokenVerifier`] validates tokens for exactly one issuer:
//! - Algorithm allowlist (asymmetric algorithms only)
//! - Signature against the issuer's key set
//! - Issuer (iss) and audience (aud contains the client id)
//! - Expiry (exp, required) and not-before (nbf) against an injected [`Clock`]
//!
//! Time checks are done here rather than by `jsonwebtoken` so tests can pin
//! the clock.

use jsonwebtoken::{Algorithm, TokenData, Validation, decode, decode_header};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use super::StandardClaims;
use super::keys::KeySet;
use crate::claims::ClaimSet;
use crate::clock::Clock;
use crate::config::ConfigError;
use crate::token::{self, TokenFormatError};

/// Signing algorithms that may appear in an authenticator's allowlist
///
/// ES512 is listed for completeness but the signature backend does not
/// implement it, so configuring it fails.
pub const ALLOWED_SIGNING_ALGORITHMS: &[&str] = &[
    "RS256", "RS384", "RS512", "ES256", "ES384", "ES512", "PS256", "PS384", "PS512",
];

/// Map configured algorithm names to verification algorithms
///
/// An empty list defaults to `RS256`, the algorithm every OpenID provider must
/// implement.
///
/// # Errors
///
/// [`ConfigError::UnsupportedAlgorithm`] for symmetric algorithms, `none`,
/// ES512 and unknown names.
pub fn signing_algorithms(names: &[String]) -> Result<Vec<Algorithm>, ConfigError> {
    if names.is_empty() {
        return Ok(vec![Algorithm::RS256]);
    }

    names
        .iter()
        .map(|name| {
            let alg = match name.as_str() {
                "RS256" => Algorithm::RS256,
                "RS384" => Algorithm::RS384,
                "RS512" => Algorithm::RS512,
                "ES256" => Algorithm::ES256,
                "ES384" => Algorithm::ES384,
                "PS256" => Algorithm::PS256,
                "PS384" => Algorithm::PS384,
                "PS512" => Algorithm::PS512,
                "ES512" => {
                    return Err(ConfigError::UnsupportedAlgorithm {
                        alg: name.clone(),
                        reason: "not implemented by the signature backend",
                    });
                }
                _ => {
                    return Err(ConfigError::UnsupportedAlgorithm {
                        alg: name.clone(),
                        reason: "only asymmetric JOSE signing algorithms are accepted",
                    });
                }
            };
            Ok(alg)
        })
        .collect()
}

/// Token verification errors
#[derive(Debug, Error)]
pub enum VerifyError {
    /// The token is not a three-segment compact token
    #[error(transparent)]
    Format(#[from] TokenFormatError),

    /// The JOSE header could not be decoded
    #[error("invalid token header: {0}")]
    Header(#[source] jsonwebtoken::errors::Error),

    /// The header algorithm is not in the verifier's allowlist
    #[error("signing algorithm {0:?} not allowed")]
    AlgorithmNotAllowed(Algorithm),

    /// No key in the key set matches the header key id
    #[error("no key in key set matches key id {kid:?}")]
    NoMatchingKey {
        /// Key id from the token header
        kid: Option<String>,
    },

    /// A JWK could not be turned into a verification key
    #[error("invalid key {kid:?} in key set: {source}")]
    InvalidKey {
        /// Key id of the offending JWK
        kid: Option<String>,
        /// Underlying error
        #[source]
        source: jsonwebtoken::errors::Error,
    },

    /// The key set endpoint could not be reached or returned garbage
    #[error("fetching key set from {jwks_uri} failed: {source}")]
    KeySetFetch {
        /// Key set URL
        jwks_uri: String,
        /// Underlying HTTP error
        #[source]
        source: reqwest::Error,
    },

    /// The key set endpoint returned a non-success status
    #[error("key set endpoint {jwks_uri} returned status {status}")]
    KeySetStatus {
        /// Key set URL
        jwks_uri: String,
        /// HTTP status
        status: reqwest::StatusCode,
    },

    /// Signature, issuer, audience or required claims are invalid
    #[error("token validation failed: {0}")]
    Invalid(#[source] jsonwebtoken::errors::Error),

    /// The token has no exp claim
    #[error("token has no expiry")]
    MissingExpiry,

    /// The token is expired
    #[error("token expired at {exp} (now {now})")]
    Expired {
        /// exp claim
        exp: u64,
        /// Current time
        now: u64,
    },

    /// The token is not valid yet
    #[error("token not valid before {nbf} (now {now})")]
    NotYetValid {
        /// nbf claim
        nbf: u64,
        /// Current time
        now: u64,
    },
}

/// Settings shared by every verifier an authenticator creates
#[derive(Clone)]
pub struct VerifierConfig {
    /// Expected audience (the OAuth client id)
    pub client_id: String,
    /// Accepted header algorithms
    pub algorithms: Vec<Algorithm>,
    /// Time source for exp/nbf
    pub clock: Arc<dyn Clock>,
    /// Tolerance applied to exp and nbf
    pub leeway: Duration,
}

impl fmt::Debug for VerifierConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VerifierConfig")
            .field("client_id", &self.client_id)
            .field("algorithms", &self.algorithms)
            .field("leeway", &self.leeway)
            .finish_non_exhaustive()
    }
}

/// A token whose signature and standard claims have been verified
#[derive(Debug, Clone)]
pub struct VerifiedToken {
    /// Verified issuer
    pub issuer: String,
    /// Subject, if present
    pub subject: Option<String>,
    /// Audience values
    pub audience: Vec<String>,
    /// exp claim
    pub expiry: u64,
    /// iat claim, if present
    pub issued_at: Option<u64>,
    /// Algorithm the token was signed with
    pub algorithm: Algorithm,
    /// Key id from the header
    pub key_id: Option<String>,
    /// All payload claims
    pub claims: ClaimSet,
}

/// Verifier for the ID tokens of a single issuer
#[derive(Debug)]
pub struct IdTokenVerifier {
    issuer: String,
    key_set: Arc<dyn KeySet>,
    config: VerifierConfig,
}

impl IdTokenVerifier {
    /// Create a verifier for `issuer` backed by `key_set`
    pub fn new(issuer: impl Into<String>, key_set: Arc<dyn KeySet>, config: VerifierConfig) -> Self {
        Self {
            issuer: issuer.into(),
            key_set,
            config,
        }
    }

    /// The issuer this verifier accepts
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// The expected audience
    pub fn client_id(&self) -> &str {
        &self.config.client_id
    }

    /// Verify a compact token
    ///
    /// # Errors
    ///
    /// Returns a [`VerifyError`] describing the first check that failed.
    pub async fn verify(&self, token: &str) -> Result<VerifiedToken, VerifyError> {
        token::split(token)?;

        let header = decode_header(token).map_err(|e| {
            debug!(error = %e, "Failed to decode JWT header");
            VerifyError::Header(e)
        })?;

        if !self.config.algorithms.contains(&header.alg) {
            warn!(
                issuer = %self.issuer,
                algorithm = ?header.alg,
                allowed = ?self.config.algorithms,
                "JWT algorithm not allowed"
            );
            return Err(VerifyError::AlgorithmNotAllowed(header.alg));
        }

        let decoding_key = self.key_set.decoding_key(header.kid.as_deref()).await?;

        let mut validation = Validation::new(header.alg);
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.set_required_spec_claims(&["exp", "iss", "aud"]);
        validation.set_issuer(&[&self.issuer]);
        validation.set_audience(&[&self.config.client_id]);

        let token_data: TokenData<StandardClaims> = decode(token, &decoding_key, &validation)
            .map_err(|e| {
                warn!(
                    error = %e,
                    issuer = %self.issuer,
                    audience = %self.config.client_id,
                    "JWT validation failed"
                );
                VerifyError::Invalid(e)
            })?;
        let standard = token_data.claims;

        let now = self.config.clock.now_secs();
        let leeway = self.config.leeway.as_secs();

        let exp = standard.exp.ok_or(VerifyError::MissingExpiry)?;
        if now >= exp.saturating_add(leeway) {
            debug!(issuer = %self.issuer, exp, now, "JWT expired");
            return Err(VerifyError::Expired { exp, now });
        }
        if let Some(nbf) = standard.nbf
            && nbf > now.saturating_add(leeway)
        {
            debug!(issuer = %self.issuer, nbf, now, "JWT not yet valid");
            return Err(VerifyError::NotYetValid { nbf, now });
        }

        let claims = token::decode_untrusted_claims(token)?;

        debug!(
            issuer = %self.issuer,
            subject = ?standard.sub,
            algorithm = ?header.alg,
            "JWT verification successful"
        );

        Ok(VerifiedToken {
            issuer: standard.iss,
            subject: standard.sub,
            audience: standard.aud.into_inner(),
            expiry: exp,
            issued_at: standard.iat,
            algorithm: header.alg,
            key_id: header.kid,
            claims,
        })
    }
}
