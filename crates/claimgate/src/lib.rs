//! # claimgate - OpenID Connect token authentication
//!
//! Authenticates OIDC ID tokens and resolves distributed claims
//! (OpenID Connect Core 1.0, section 5.6.2).
//!
//! ## Architecture
//!
//! - [`token`] / [`claims`] - compact token decoding and raw claim sets
//! - [`jwt`] - per-issuer verifiers: key sets, discovery, background
//!   initialization, the issuer cache and token signing
//! - [`distributed`] - fetching and verifying distributed claims
//! - [`authenticator`] - the [`OidcAuthenticator`] tying it all together
//! - [`config`] - [`AuthenticatorConfig`] and its validation
//! - [`clock`] - time source for expiry checks
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use claimgate::{AuthenticatorConfig, OidcAuthenticator};
//!
//! # async fn run(token: &str) -> Result<(), Box<dyn std::error::Error>> {
//! let config = AuthenticatorConfig {
//!     username_claim: "email".to_string(),
//!     groups_claim: Some("groups".to_string()),
//!     ..AuthenticatorConfig::new("https://accounts.example.com", "my-client")
//! };
//! let authenticator = OidcAuthenticator::new(config).await?;
//!
//! match authenticator.authenticate(token).await {
//!     Ok(Some(user)) => println!("{} in {:?}", user.name, user.groups),
//!     Ok(None) => println!("token for another issuer"),
//!     Err(e) if e.is_retryable() => println!("try again later: {e}"),
//!     Err(e) => println!("rejected: {e}"),
//! }
//! authenticator.close();
//! # Ok(())
//! # }
//! ```
//!
//! ## Standards Compliance
//!
//! - **RFC 7519** - JSON Web Token (JWT)
//! - **RFC 7517** - JSON Web Key (JWK)
//! - **OpenID Connect Core 1.0** - ID tokens, distributed claims
//! - **OpenID Connect Discovery 1.0** - provider metadata

pub mod authenticator;
pub mod claims;
pub mod clock;
pub mod config;
pub mod distributed;
pub mod jwt;
pub mod token;

#[doc(inline)]
pub use authenticator::{
    AuthError, Authenticated, OidcAuthenticator, UserInfo, resolve_distributed_token,
};
#[doc(inline)]
pub use claims::{ClaimError, ClaimSet, StringOrList};
#[doc(inline)]
pub use clock::{Clock, FixedClock, SystemClock};
#[doc(inline)]
pub use config::{AuthenticatorConfig, ConfigError};
#[doc(inline)]
pub use distributed::{ClaimResolver, ClaimSource, ResolveError};
#[doc(inline)]
pub use token::TokenFormatError;
