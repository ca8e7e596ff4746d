//! Common test utilities for integration tests
//!
//! A wiremock-backed OpenID provider (discovery document, JWKS and a
//! distributed claims endpoint) plus signers for the PEM fixtures.

#![allow(dead_code)]

use claimgate::jwt::TokenSigner;
use jsonwebtoken::Algorithm;
use serde_json::{Value, json};
use std::time::{SystemTime, UNIX_EPOCH};
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{header, method, path},
};

pub const CLIENT_ID: &str = "kubernetes";
pub const ISSUER_KID: &str = "issuer-rsa";
pub const CLAIMS_KID: &str = "claims-rsa";
pub const EC_KID: &str = "issuer-ec";

const ISSUER_RSA_PEM: &[u8] = include_bytes!("../fixtures/issuer_rsa.pem");
const CLAIMS_RSA_PEM: &[u8] = include_bytes!("../fixtures/claims_rsa.pem");
const ISSUER_EC_PEM: &[u8] = include_bytes!("../fixtures/issuer_ec.pem");

const ISSUER_RSA_N: &str = "44q5JFtzmiWLDeiREAD1WcL8FrxQEm_pbrNK_6e8QUxgVfYctTUwUSvZcaWX9PSANtSjfYJN8HcapjcBfUTmeNj2983BgvfPGgQ4etEYnFGwzkX7m-ILHXW7Wd5a70pNTnkb6DxZnGamUoMMnryUvxFGqVU4PAXArQyXHlVV-6cIaTZgkC-REICeDNrj9ENOWZpPhj_T3e2YCWAv9ftwJUXIzLy4v1QpVx_6NqtJL-bacXOtSsY2qWh-yjODxQ1qwNHIYC9u-Zn0yftvHyHpOlcQPO07XeQgyrckEbUglXg4wJWLyLKP7q0rylrg_bBi5Ut2yK8OYZSQov7F1LUhEw";
const CLAIMS_RSA_N: &str = "3btKhadbZxeAJL5MF3dCMx92l4LmBROd7eLSBIruVmZ7P_5_e6SHAwLmXh4lMfMg2hAzGCLrtXEi1kyaNTp9kACXEPWlQHjPZxcXvweb344ODvrO8MMIRvjvP6MoXzK9Jf90nc-_K1kS2ey_UB0iUz2LC4s_YH8K2NfTeGXq7AgBgSuUloVKZ6hrj0vUdJHCL8pdXv2TSY9lhqQ76yOgWTFFWyNZ3jECl2UqtrMRjL3RxOIoxjTRgNirWLP9NgNUrdHc6zIkttwMXMJDzpsThTVhNtxwdGvg642FoWIzFK5hO-iNRPnde46HFtPA6TafvKrt5Ba_dnTNs0sY5t12tw";

/// Seconds since the Unix epoch
pub fn now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs()
}

/// Public JWK of `tests/fixtures/issuer_rsa.pem`
pub fn issuer_rsa_jwk(kid: &str) -> Value {
    rsa_jwk(kid, ISSUER_RSA_N)
}

/// Public JWK of `tests/fixtures/claims_rsa.pem`
pub fn claims_rsa_jwk(kid: &str) -> Value {
    rsa_jwk(kid, CLAIMS_RSA_N)
}

fn rsa_jwk(kid: &str, n: &str) -> Value {
    json!({"kty": "RSA", "kid": kid, "use": "sig", "alg": "RS256", "n": n, "e": "AQAB"})
}

/// Public JWK of `tests/fixtures/issuer_ec.pem`
pub fn issuer_ec_jwk(kid: &str) -> Value {
    json!({
        "kty": "EC",
        "kid": kid,
        "use": "sig",
        "alg": "ES256",
        "crv": "P-256",
        "x": "DhJUnGggz4vXu9ftb3kWzDRPlN_vMZzScRP2tT5tvzw",
        "y": "TiP1Ertnshn2Rdreug_JXiZw2ZQk3VXK3LOuK_83_U4"
    })
}

/// JWK set JSON for `keys`
pub fn jwks(keys: Vec<Value>) -> String {
    json!({ "keys": keys }).to_string()
}

pub fn issuer_signer() -> TokenSigner {
    TokenSigner::from_rsa_pem(Algorithm::RS256, Some(ISSUER_KID), ISSUER_RSA_PEM).unwrap()
}

pub fn claims_signer() -> TokenSigner {
    TokenSigner::from_rsa_pem(Algorithm::RS256, Some(CLAIMS_KID), CLAIMS_RSA_PEM).unwrap()
}

pub fn ec_signer() -> TokenSigner {
    TokenSigner::from_ec_pem(Algorithm::ES256, Some(EC_KID), ISSUER_EC_PEM).unwrap()
}

/// Signer for the issuer key with an arbitrary key id
pub fn issuer_signer_with_kid(kid: &str) -> TokenSigner {
    TokenSigner::from_rsa_pem(Algorithm::RS256, Some(kid), ISSUER_RSA_PEM).unwrap()
}

/// ID token claims valid for an hour, merged with `extra`
pub fn id_token_claims(issuer: &str, extra: Value) -> Value {
    let now = now();
    let mut claims = json!({
        "iss": issuer,
        "aud": CLIENT_ID,
        "sub": "alice-id",
        "iat": now,
        "exp": now + 3600,
    });
    if let (Some(claims), Some(extra)) = (claims.as_object_mut(), extra.as_object()) {
        for (name, value) in extra {
            claims.insert(name.clone(), value.clone());
        }
    }
    claims
}

/// Mock OpenID provider
pub struct MockOidcProvider {
    pub server: MockServer,
    pub issuer: String,
}

impl MockOidcProvider {
    /// Start a provider whose issuer is the mock server URI
    pub async fn start() -> Self {
        let server = MockServer::start().await;
        let issuer = server.uri();
        Self { server, issuer }
    }

    pub fn jwks_uri(&self) -> String {
        format!("{}/jwks", self.issuer)
    }

    pub fn endpoint(&self, claim_path: &str) -> String {
        format!("{}{}", self.issuer, claim_path)
    }

    /// Serve the discovery document and `keys` at `/jwks`
    pub async fn mount_provider(&self, keys: Vec<Value>) {
        self.mount_discovery().await;
        self.mount_jwks(keys).await;
    }

    pub async fn mount_discovery(&self) {
        Mock::given(method("GET"))
            .and(path("/.well-known/openid-configuration"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "issuer": self.issuer,
                "jwks_uri": self.jwks_uri(),
                "id_token_signing_alg_values_supported": ["RS256", "ES256"],
                "response_types_supported": ["id_token"],
                "subject_types_supported": ["public"]
            })))
            .mount(&self.server)
            .await;
    }

    /// Fail discovery with `status` for the first `times` requests
    pub async fn fail_discovery(&self, status: u16, times: u64) {
        Mock::given(method("GET"))
            .and(path("/.well-known/openid-configuration"))
            .respond_with(ResponseTemplate::new(status))
            .up_to_n_times(times)
            .mount(&self.server)
            .await;
    }

    pub async fn mount_jwks(&self, keys: Vec<Value>) {
        Mock::given(method("GET"))
            .and(path("/jwks"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "keys": keys })))
            .mount(&self.server)
            .await;
    }

    /// Serve `token` at `claim_path` to requests bearing `access_token`
    pub async fn mount_claims(&self, claim_path: &str, access_token: &str, token: &str) {
        Mock::given(method("GET"))
            .and(path(claim_path))
            .and(header("Authorization", format!("Bearer {access_token}").as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_string(token))
            .mount(&self.server)
            .await;
    }

    /// Answer `claim_path` with `status`
    pub async fn mount_claims_status(&self, claim_path: &str, status: u16) {
        Mock::given(method("GET"))
            .and(path(claim_path))
            .respond_with(ResponseTemplate::new(status))
            .mount(&self.server)
            .await;
    }

    /// Number of requests received for `request_path`
    pub async fn requests_to(&self, request_path: &str) -> usize {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .filter(|request| request.url.path() == request_path)
            .count()
    }
}

/// `_claim_names` / `_claim_sources` referencing `endpoint` for the groups claim
pub fn distributed_groups(endpoint: &str, access_token: &str) -> Value {
    json!({
        "_claim_names": { "groups": "src1" },
        "_claim_sources": {
            "src1": { "endpoint": endpoint, "access_token": access_token }
        }
    })
}
