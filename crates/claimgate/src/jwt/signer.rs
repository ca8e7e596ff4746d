//! Compact token signing
//!
//! Claim providers sign the tokens they serve from distributed claim
//! endpoints; the test suites use the same signer for their fixtures.

use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use serde::Serialize;
use thiserror::Error;

/// Signing errors
#[derive(Debug, Error)]
pub enum SignError {
    /// The algorithm does not match the key type or is symmetric
    #[error("algorithm {0:?} cannot be used with this key")]
    UnsupportedAlgorithm(Algorithm),

    /// The PEM key could not be parsed
    #[error("invalid signing key: {0}")]
    Key(#[source] jsonwebtoken::errors::Error),

    /// The claims could not be serialized or signed
    #[error("signing failed: {0}")]
    Encode(#[source] jsonwebtoken::errors::Error),
}

/// Signs claim objects into compact tokens with one key
#[derive(Clone)]
pub struct TokenSigner {
    key: EncodingKey,
    header: Header,
}

impl std::fmt::Debug for TokenSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenSigner")
            .field("alg", &self.header.alg)
            .field("kid", &self.header.kid)
            .finish_non_exhaustive()
    }
}

impl TokenSigner {
    /// Signer for an RSA private key in PEM form (RS* and PS* algorithms)
    ///
    /// # Errors
    ///
    /// Fails for non-RSA algorithms or an unparsable key.
    pub fn from_rsa_pem(
        alg: Algorithm,
        kid: Option<&str>,
        pem: &[u8],
    ) -> Result<Self, SignError> {
        match alg {
            Algorithm::RS256
            | Algorithm::RS384
            | Algorithm::RS512
            | Algorithm::PS256
            | Algorithm::PS384
            | Algorithm::PS512 => {}
            other => return Err(SignError::UnsupportedAlgorithm(other)),
        }
        let key = EncodingKey::from_rsa_pem(pem).map_err(SignError::Key)?;
        Ok(Self::with_key(alg, kid, key))
    }

    /// Signer for an EC private key in PKCS#8 PEM form (ES256 and ES384)
    ///
    /// # Errors
    ///
    /// Fails for non-EC algorithms or an unparsable key.
    pub fn from_ec_pem(alg: Algorithm, kid: Option<&str>, pem: &[u8]) -> Result<Self, SignError> {
        if !matches!(alg, Algorithm::ES256 | Algorithm::ES384) {
            return Err(SignError::UnsupportedAlgorithm(alg));
        }
        let key = EncodingKey::from_ec_pem(pem).map_err(SignError::Key)?;
        Ok(Self::with_key(alg, kid, key))
    }

    fn with_key(alg: Algorithm, kid: Option<&str>, key: EncodingKey) -> Self {
        let mut header = Header::new(alg);
        header.kid = kid.map(str::to_string);
        Self { key, header }
    }

    /// Key id written into every token header
    pub fn key_id(&self) -> Option<&str> {
        self.header.kid.as_deref()
    }

    /// Signing algorithm
    pub fn algorithm(&self) -> Algorithm {
        self.header.alg
    }

    /// Sign `claims` into a compact token
    ///
    /// # Errors
    ///
    /// Fails if `claims` does not serialize to a JSON object.
    pub fn sign<T: Serialize>(&self, claims: &T) -> Result<String, SignError> {
        encode(&self.header, claims, &self.key).map_err(SignError::Encode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token;
    use serde_json::json;

    const RSA_PEM: &[u8] = include_bytes!("../../tests/fixtures/issuer_rsa.pem");
    const EC_PEM: &[u8] = include_bytes!("../../tests/fixtures/issuer_ec.pem");

    #[test]
    fn test_rsa_signer_writes_header() {
        let signer = TokenSigner::from_rsa_pem(Algorithm::RS256, Some("k1"), RSA_PEM).unwrap();
        assert_eq!(signer.key_id(), Some("k1"));

        let token = signer
            .sign(&json!({"iss": "https://issuer.example.com", "sub": "alice"}))
            .unwrap();
        let header = jsonwebtoken::decode_header(&token).unwrap();
        assert_eq!(header.alg, Algorithm::RS256);
        assert_eq!(header.kid.as_deref(), Some("k1"));
        assert_eq!(
            token::decode_untrusted_issuer(&token).unwrap(),
            "https://issuer.example.com"
        );
    }

    #[test]
    fn test_ec_signer() {
        let signer = TokenSigner::from_ec_pem(Algorithm::ES256, None, EC_PEM).unwrap();
        let token = signer.sign(&json!({"iss": "x"})).unwrap();
        assert_eq!(token.split('.').count(), 3);
        assert_eq!(signer.algorithm(), Algorithm::ES256);
    }

    #[test]
    fn test_key_type_mismatch() {
        assert!(matches!(
            TokenSigner::from_rsa_pem(Algorithm::ES256, None, RSA_PEM),
            Err(SignError::UnsupportedAlgorithm(Algorithm::ES256))
        ));
        assert!(matches!(
            TokenSigner::from_ec_pem(Algorithm::HS256, None, EC_PEM),
            Err(SignError::UnsupportedAlgorithm(Algorithm::HS256))
        ));
    }

    #[test]
    fn test_invalid_pem() {
        assert!(matches!(
            TokenSigner::from_rsa_pem(Algorithm::RS256, None, b"not a key"),
            Err(SignError::Key(_))
        ));
    }
}
