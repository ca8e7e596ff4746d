//! Compact token decoding
//!
//! Everything in this module reads token payloads **without** verifying the
//! signature. The results must only be used to pick a verifier (for example by
//! issuer), never to make an authorization decision.

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use serde::Deserialize;
use std::collections::HashMap;
use thiserror::Error;

use crate::claims::ClaimSet;

/// Reserved claim mapping claim names to claim source names (OIDC Core 5.6.2)
pub const CLAIM_NAMES: &str = "_claim_names";

/// Reserved claim holding claim source definitions (OIDC Core 5.6.2)
pub const CLAIM_SOURCES: &str = "_claim_sources";

/// Malformed compact token
#[derive(Debug, Error)]
pub enum TokenFormatError {
    /// The token does not have exactly three segments
    #[error("malformed token: expected 3 segments, found {0}")]
    SegmentCount(usize),

    /// The payload segment is empty
    #[error("malformed token: empty payload segment")]
    EmptyPayload,

    /// The payload is not valid unpadded base64url
    #[error("error decoding token payload: {0}")]
    Base64(#[from] base64::DecodeError),

    /// The payload is not a JSON object
    #[error("error parsing token payload: {0}")]
    Json(#[from] serde_json::Error),
}

/// The three segments of a compact token, still encoded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segments<'a> {
    /// Encoded JOSE header
    pub header: &'a str,
    /// Encoded payload
    pub payload: &'a str,
    /// Encoded signature
    pub signature: &'a str,
}

/// Split a token into its three segments
///
/// # Errors
///
/// Returns an error unless the token has exactly three segments and a
/// non-empty payload.
pub fn split(token: &str) -> Result<Segments<'_>, TokenFormatError> {
    let parts: Vec<&str> = token.split('.').collect();
    let &[header, payload, signature] = parts.as_slice() else {
        return Err(TokenFormatError::SegmentCount(parts.len()));
    };
    if payload.is_empty() {
        return Err(TokenFormatError::EmptyPayload);
    }
    Ok(Segments {
        header,
        payload,
        signature,
    })
}

/// Decode the payload segment to raw JSON bytes
///
/// # Errors
///
/// Returns an error if the token shape or the base64url encoding is invalid.
pub fn decode_payload(token: &str) -> Result<Vec<u8>, TokenFormatError> {
    let segments = split(token)?;
    Ok(URL_SAFE_NO_PAD.decode(segments.payload)?)
}

/// Decode all payload claims without verifying the signature
///
/// # Errors
///
/// Returns an error if the token is malformed or the payload is not a JSON object.
pub fn decode_untrusted_claims(token: &str) -> Result<ClaimSet, TokenFormatError> {
    let payload = decode_payload(token)?;
    Ok(ClaimSet::from_json(&payload)?)
}

/// Extract the `iss` claim without verifying the signature
///
/// A payload without `iss` yields an empty string, which never matches a
/// configured issuer.
///
/// # Errors
///
/// Returns an error if the token is malformed or the payload is not a JSON object.
pub fn decode_untrusted_issuer(token: &str) -> Result<String, TokenFormatError> {
    #[derive(Deserialize)]
    struct UntrustedIssuer {
        // WARNING: not verified.
        #[serde(default)]
        iss: String,
    }

    let payload = decode_payload(token)?;
    let claims: UntrustedIssuer = serde_json::from_slice(&payload)?;
    Ok(claims.iss)
}

/// Whether the (unverified) payload declares `claim` as a distributed claim
///
/// # Errors
///
/// Returns an error if the token is malformed or `_claim_names` is not an object.
pub fn contains_distributed_claim(token: &str, claim: &str) -> Result<bool, TokenFormatError> {
    let claims = decode_untrusted_claims(token)?;
    let Some(names) = claims.raw(CLAIM_NAMES) else {
        return Ok(false);
    };
    let names: HashMap<String, serde_json::Value> = serde_json::from_str(names.get())?;
    Ok(names.contains_key(claim))
}
