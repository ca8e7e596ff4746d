//! OpenID Connect token authenticator
//!
//! [`OidcAuthenticator`] answers one question: does this token authenticate a
//! user of the configured issuer, and if so who?
//!
//! ```text
//! token ─▶ untrusted iss ──mismatch──▶ Ok(None)
//!              │
//!              ▼
//!        issuer verifier ─▶ verified claims ─▶ distributed groups ─▶ policy ─▶ UserInfo
//! ```
//!
//! The verifier is created by OIDC discovery in the background (or from a
//! static key set). Until discovery succeeds every token is rejected with
//! [`AuthError::VerifierNotReady`], which callers may retry.

use jsonwebtoken::jwk::JwkSet;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::claims::{ClaimError, ClaimSet, StringOrList};
use crate::clock::{Clock, SystemClock};
use crate::config::{AuthenticatorConfig, ConfigError};
use crate::distributed::{ClaimResolver, ResolveError};
use crate::jwt::async_verifier::{AsyncVerifier, VerifierState};
use crate::jwt::cache::VerifierCache;
use crate::jwt::discovery::Discoverer;
use crate::jwt::keys::StaticKeySet;
use crate::jwt::verifier::{IdTokenVerifier, VerifierConfig, VerifyError, signing_algorithms};
use crate::token::{self, TokenFormatError};

/// Claim whose value must be `true` when the user name is taken from `email`
const EMAIL_VERIFIED: &str = "email_verified";

/// Authentication errors
#[derive(Debug, Error)]
pub enum AuthError {
    /// The authenticator was closed
    #[error("oidc: authenticator closed")]
    Closed,

    /// The token is not a well-formed compact token
    #[error("oidc: {0}")]
    Format(#[source] TokenFormatError),

    /// The issuer verifier is not initialized yet
    #[error("oidc: authenticator for issuer {issuer:?} is not initialized")]
    VerifierNotReady {
        /// Configured issuer
        issuer: String,
    },

    /// Signature or standard claims are invalid
    #[error("oidc: verify token: {0}")]
    TokenVerification(#[source] VerifyError),

    /// The distributed groups claim could not be resolved
    #[error("oidc: could not expand distributed claims: {0}")]
    ClaimExpansion(#[source] ResolveError),

    /// The username claim is absent
    #[error("oidc: username claim {claim:?} not present in token")]
    MissingUsernameClaim {
        /// Configured username claim
        claim: String,
    },

    /// A claim has the wrong JSON type
    #[error("oidc: parse claim {claim:?}: {source}")]
    InvalidClaim {
        /// Claim name
        claim: String,
        /// Decode error
        #[source]
        source: ClaimError,
    },

    /// `email_verified` is present but not `true`
    #[error("oidc: email not verified")]
    EmailNotVerified,

    /// A required claim is absent
    #[error("oidc: required claim {claim} not present in token")]
    RequiredClaimMissing {
        /// Claim name
        claim: String,
    },

    /// A required claim has a different value
    #[error("oidc: required claim {claim} value does not match, got {actual:?}, want {expected:?}")]
    RequiredClaimMismatch {
        /// Claim name
        claim: String,
        /// Configured value
        expected: String,
        /// Value in the token
        actual: String,
    },

    /// The token does not reference its groups claim through a claim source
    #[error("oidc: no distributed {claim:?} claim in token")]
    NoDistributedClaim {
        /// Groups claim name
        claim: String,
    },

    /// The token was not issued by the authenticator's issuer
    #[error("oidc: token was not authenticated")]
    NotAuthenticated,

    /// The authenticator could not be built
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl AuthError {
    /// Whether the same token may succeed when retried later
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AuthError::VerifierNotReady { .. }
                | AuthError::ClaimExpansion(
                    ResolveError::VerifierNotReady { .. } | ResolveError::Fetch { .. }
                )
        )
    }
}

/// An authenticated user
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UserInfo {
    /// User name, prefixed
    pub name: String,
    /// Groups in token order, prefixed
    pub groups: Vec<String>,
}

/// An authenticated user together with the claims that authenticated them
#[derive(Debug, Clone)]
pub struct Authenticated {
    /// The user
    pub user: UserInfo,
    /// Verified claims, distributed claims included
    pub claims: ClaimSet,
}

/// Authenticates ID tokens of one issuer
#[derive(Debug)]
pub struct OidcAuthenticator {
    config: AuthenticatorConfig,
    verifier: AsyncVerifier,
    resolver: Option<ClaimResolver>,
    cancel: CancellationToken,
}

impl OidcAuthenticator {
    /// Authenticator whose keys are found by OIDC discovery
    ///
    /// Discovery runs in the background and is retried every
    /// `config.retry_interval` until it succeeds. With `config.synchronous`
    /// this waits for the first attempt.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] for an invalid configuration.
    pub async fn new(config: AuthenticatorConfig) -> Result<Self, ConfigError> {
        Self::with_clock(config, Arc::new(SystemClock)).await
    }

    /// Like [`new`](Self::new) with a custom time source
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] for an invalid configuration.
    pub async fn with_clock(
        config: AuthenticatorConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ConfigError> {
        let parts = Parts::new(&config, clock)?;
        let cancel = CancellationToken::new();

        let verifier = AsyncVerifier::spawn(
            config.issuer_url.clone(),
            Arc::new(parts.discoverer.clone()),
            config.retry_interval,
            cancel.child_token(),
        );
        if config.synchronous {
            verifier.wait_first_attempt().await;
        }

        Ok(Self::assemble(config, parts, verifier, cancel))
    }

    /// Authenticator verifying with a fixed key set
    ///
    /// Ready immediately; the key set is never refreshed.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] for an invalid configuration.
    pub fn with_key_set(config: AuthenticatorConfig, jwks: JwkSet) -> Result<Self, ConfigError> {
        Self::with_key_set_and_clock(config, jwks, Arc::new(SystemClock))
    }

    /// Like [`with_key_set`](Self::with_key_set) with a custom time source
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] for an invalid configuration.
    pub fn with_key_set_and_clock(
        config: AuthenticatorConfig,
        jwks: JwkSet,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ConfigError> {
        let parts = Parts::new(&config, clock)?;
        let verifier = AsyncVerifier::ready(IdTokenVerifier::new(
            config.issuer_url.clone(),
            Arc::new(StaticKeySet::new(jwks)),
            parts.verifier_config.clone(),
        ));
        Ok(Self::assemble(config, parts, verifier, CancellationToken::new()))
    }

    /// Like [`with_key_set`](Self::with_key_set) with the key set as JSON
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] for an invalid configuration or key set.
    pub fn with_key_set_json(config: AuthenticatorConfig, jwks: &str) -> Result<Self, ConfigError> {
        let jwks = serde_json::from_str(jwks).map_err(ConfigError::InvalidKeySet)?;
        Self::with_key_set(config, jwks)
    }

    fn assemble(
        config: AuthenticatorConfig,
        parts: Parts,
        verifier: AsyncVerifier,
        cancel: CancellationToken,
    ) -> Self {
        let resolver = config.groups_claim.as_ref().map(|claim| {
            let verifiers = VerifierCache::new(
                Arc::new(parts.discoverer),
                config.retry_interval,
                config.synchronous,
                cancel.child_token(),
            );
            ClaimResolver::new(claim.clone(), parts.http_client, verifiers)
        });

        info!(
            issuer = %config.issuer_url,
            client_id = %config.client_id,
            groups_claim = ?config.groups_claim,
            "OIDC authenticator created"
        );

        Self {
            config,
            verifier,
            resolver,
            cancel,
        }
    }

    /// Issuer this authenticator accepts
    pub fn issuer(&self) -> &str {
        &self.config.issuer_url
    }

    /// Lifecycle state of the issuer verifier
    pub fn verifier_state(&self) -> VerifierState {
        self.verifier.state()
    }

    /// Authenticate `token`
    ///
    /// `Ok(None)` means the token belongs to a different issuer and another
    /// authenticator may accept it.
    ///
    /// # Errors
    ///
    /// Returns an [`AuthError`] if the token is for this issuer but is rejected.
    pub async fn authenticate(&self, token: &str) -> Result<Option<UserInfo>, AuthError> {
        Ok(self.authenticate_token(token).await?.map(|a| a.user))
    }

    /// Authenticate `token`, returning the verified claims as well
    ///
    /// # Errors
    ///
    /// Returns an [`AuthError`] if the token is for this issuer but is rejected.
    pub async fn authenticate_token(&self, token: &str) -> Result<Option<Authenticated>, AuthError> {
        if self.cancel.is_cancelled() {
            return Err(AuthError::Closed);
        }

        let issuer = token::decode_untrusted_issuer(token).map_err(AuthError::Format)?;
        if issuer != self.config.issuer_url {
            debug!(issuer = %issuer, expected = %self.config.issuer_url, "Token for another issuer");
            return Ok(None);
        }

        let verifier = self
            .verifier
            .verifier()
            .ok_or_else(|| AuthError::VerifierNotReady {
                issuer: self.config.issuer_url.clone(),
            })?;

        let verified = verifier
            .verify(token)
            .await
            .map_err(AuthError::TokenVerification)?;
        let mut claims = verified.claims;

        if let Some(resolver) = &self.resolver {
            resolver.expand(&mut claims).await.map_err(|e| {
                warn!(issuer = %issuer, error = %e, "Distributed claim expansion failed");
                AuthError::ClaimExpansion(e)
            })?;
        }

        let user = self.user_info(&claims)?;
        self.check_required_claims(&claims)?;

        debug!(issuer = %issuer, user = %user.name, groups = user.groups.len(), "Token authenticated");
        Ok(Some(Authenticated { user, claims }))
    }

    fn user_info(&self, claims: &ClaimSet) -> Result<UserInfo, AuthError> {
        let username_claim = &self.config.username_claim;
        let username: String = claims.unmarshal_claim(username_claim).map_err(|e| match e {
            ClaimError::Missing(_) => AuthError::MissingUsernameClaim {
                claim: username_claim.clone(),
            },
            source => AuthError::InvalidClaim {
                claim: username_claim.clone(),
                source,
            },
        })?;

        // Anything but a literal `true` counts as unverified.
        if username_claim == "email"
            && claims.has_claim(EMAIL_VERIFIED)
            && !matches!(claims.unmarshal_claim::<bool>(EMAIL_VERIFIED), Ok(true))
        {
            return Err(AuthError::EmailNotVerified);
        }

        let name = match &self.config.username_prefix {
            Some(prefix) => format!("{prefix}{username}"),
            None => username,
        };

        let mut groups = Vec::new();
        if let Some(groups_claim) = &self.config.groups_claim
            && claims.has_claim(groups_claim)
        {
            let list: StringOrList =
                claims
                    .unmarshal_claim(groups_claim)
                    .map_err(|source| AuthError::InvalidClaim {
                        claim: groups_claim.clone(),
                        source,
                    })?;
            groups = list.into_inner();
            if let Some(prefix) = &self.config.groups_prefix {
                for group in &mut groups {
                    group.insert_str(0, prefix);
                }
            }
        }

        Ok(UserInfo { name, groups })
    }

    fn check_required_claims(&self, claims: &ClaimSet) -> Result<(), AuthError> {
        for (claim, expected) in &self.config.required_claims {
            if !claims.has_claim(claim) {
                return Err(AuthError::RequiredClaimMissing {
                    claim: claim.clone(),
                });
            }
            let actual: String =
                claims
                    .unmarshal_claim(claim)
                    .map_err(|source| AuthError::InvalidClaim {
                        claim: claim.clone(),
                        source,
                    })?;
            if &actual != expected {
                return Err(AuthError::RequiredClaimMismatch {
                    claim: claim.clone(),
                    expected: expected.clone(),
                    actual,
                });
            }
        }
        Ok(())
    }

    /// Stop all background discovery
    ///
    /// Later calls to [`authenticate`](Self::authenticate) fail with
    /// [`AuthError::Closed`].
    pub fn close(&self) {
        // Issuer and claim-source verifiers hold child tokens.
        self.cancel.cancel();
        info!(issuer = %self.config.issuer_url, "OIDC authenticator closed");
    }
}

impl Drop for OidcAuthenticator {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Pieces shared by the issuer verifier and the claim resolver
struct Parts {
    http_client: reqwest::Client,
    verifier_config: VerifierConfig,
    discoverer: Discoverer,
}

impl Parts {
    fn new(config: &AuthenticatorConfig, clock: Arc<dyn Clock>) -> Result<Self, ConfigError> {
        config.validate()?;
        let http_client = config.http_client()?;
        let verifier_config = VerifierConfig {
            client_id: config.client_id.clone(),
            algorithms: signing_algorithms(&config.supported_signing_algs)?,
            clock,
            leeway: config.clock_skew,
        };
        let discoverer = Discoverer::new(http_client.clone(), verifier_config.clone());
        Ok(Self {
            http_client,
            verifier_config,
            discoverer,
        })
    }
}

/// Authenticate a token that carries a distributed groups claim
///
/// The authenticator is built for the token's own (unverified) issuer from
/// `config`, waits for discovery, authenticates once and is closed again.
/// `config.issuer_url` is ignored.
///
/// # Errors
///
/// [`AuthError::NoDistributedClaim`] if the token does not distribute its
/// groups claim, otherwise any error of [`OidcAuthenticator::authenticate_token`].
pub async fn resolve_distributed_token(
    config: &AuthenticatorConfig,
    token: &str,
) -> Result<Authenticated, AuthError> {
    let groups_claim = config.groups_claim.as_deref().unwrap_or("groups");

    if !token::contains_distributed_claim(token, groups_claim).map_err(AuthError::Format)? {
        return Err(AuthError::NoDistributedClaim {
            claim: groups_claim.to_string(),
        });
    }

    let issuer = token::decode_untrusted_issuer(token).map_err(AuthError::Format)?;
    let config = AuthenticatorConfig {
        issuer_url: issuer,
        groups_claim: Some(groups_claim.to_string()),
        synchronous: true,
        ..config.clone()
    };

    let authenticator = OidcAuthenticator::new(config).await?;
    let result = authenticator.authenticate_token(token).await;
    authenticator.close();

    result?.ok_or(AuthError::NotAuthenticated)
}
