//! JWT Infrastructure - per-issuer signature verification
//!
//! This module turns an issuer URL into something that can verify that
//! issuer's ID tokens:
//!
//! ```text
//! ┌──────────────┐  discovery   ┌──────────────────┐  JWKS   ┌──────────────┐
//! │ VerifierCache├─────────────▶│  AsyncVerifier   ├────────▶│ IdTokenVerifier
//! │ (per issuer) │  + retries   │ (Initializing →  │         │ (sig/iss/aud/ │
//! └──────────────┘              │  Ready)          │         │  exp/nbf)     │
//!                               └──────────────────┘         └──────────────┘
//! ```
//!
//! # Modules
//!
//! - `keys` - static and remote (JWKS) key sets
//! - `verifier` - signature and standard-claim validation
//! - `discovery` - OpenID Connect discovery of `jwks_uri`
//! - `async_verifier` - background initialization with retries
//! - `cache` - lazily created verifiers keyed by issuer
//! - `signer` - compact token signing

pub mod async_verifier;
pub mod cache;
pub mod discovery;
pub mod keys;
pub mod signer;
pub mod verifier;

// Re-export commonly used types
pub use async_verifier::{AsyncVerifier, VerifierState};
pub use cache::VerifierCache;
pub use discovery::{Discoverer, DiscoveryError, ProviderDiscovery, ProviderMetadata};
pub use keys::{KeySet, RemoteKeySet, StaticKeySet};
pub use signer::{SignError, TokenSigner};
pub use verifier::{
    ALLOWED_SIGNING_ALGORITHMS, IdTokenVerifier, VerifiedToken, VerifierConfig, VerifyError,
    signing_algorithms,
};

use serde::{Deserialize, Serialize};

use crate::claims::StringOrList;

/// Registered JWT claims per RFC 7519 used during verification
///
/// Everything else stays in the token's [`ClaimSet`](crate::claims::ClaimSet).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StandardClaims {
    /// Issuer (iss) - identifies who issued the token
    #[serde(default)]
    pub iss: String,

    /// Subject (sub) - identifies the principal
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,

    /// Audience (aud) - a single string or a list
    #[serde(default)]
    pub aud: StringOrList,

    /// Expiration Time (exp) - Unix timestamp
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exp: Option<u64>,

    /// Not Before (nbf) - Unix timestamp
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nbf: Option<u64>,

    /// Issued At (iat) - Unix timestamp
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iat: Option<u64>,
}
