//! Distributed claim resolution against mock claim providers

mod common;

use claimgate::jwt::VerifyError;
use claimgate::{
    AuthError, AuthenticatorConfig, OidcAuthenticator, ResolveError, resolve_distributed_token,
};
use common::*;
use pretty_assertions::assert_eq;
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, ResponseTemplate};

const ISSUER: &str = "https://issuer.example.com";

fn config() -> AuthenticatorConfig {
    AuthenticatorConfig {
        groups_claim: Some("groups".to_string()),
        synchronous: true,
        ..AuthenticatorConfig::new(ISSUER, CLIENT_ID)
    }
}

fn authenticator() -> OidcAuthenticator {
    OidcAuthenticator::with_key_set_json(config(), &jwks(vec![issuer_rsa_jwk(ISSUER_KID)])).unwrap()
}

fn id_token(extra: serde_json::Value) -> String {
    issuer_signer().sign(&id_token_claims(ISSUER, extra)).unwrap()
}

/// Claims provider with its own issuer and signing key
async fn claims_provider(groups_token_claims: serde_json::Value) -> MockOidcProvider {
    let provider = MockOidcProvider::start().await;
    provider.mount_provider(vec![claims_rsa_jwk(CLAIMS_KID)]).await;
    let token = claims_signer()
        .sign(&id_token_claims(&provider.issuer, groups_token_claims))
        .unwrap();
    provider.mount_claims("/groups", "T", &token).await;
    provider
}

#[tokio::test]
async fn test_claims_from_separate_issuer() {
    // GIVEN: groups served and signed by a different issuer than the ID token
    let provider = claims_provider(json!({"groups": ["team-a", "team-b"]})).await;

    // WHEN
    let token = id_token(distributed_groups(&provider.endpoint("/groups"), "T"));
    let user = authenticator().authenticate(&token).await.unwrap().unwrap();

    // THEN
    assert_eq!(user.groups, vec!["team-a", "team-b"]);
}

#[tokio::test]
async fn test_resolution_is_repeatable() {
    let provider = claims_provider(json!({"groups": ["team-a"]})).await;
    let authenticator = authenticator();
    let token = id_token(distributed_groups(&provider.endpoint("/groups"), "T"));

    let first = authenticator.authenticate(&token).await.unwrap();
    let second = authenticator.authenticate(&token).await.unwrap();

    assert_eq!(first, second);
    // Claims are fetched every time; the issuer verifier is discovered once.
    assert_eq!(provider.requests_to("/groups").await, 2);
    assert_eq!(
        provider
            .requests_to("/.well-known/openid-configuration")
            .await,
        1
    );
}

#[tokio::test]
async fn test_unknown_claim_source() {
    let token = id_token(json!({
        "_claim_names": {"groups": "src1"},
        "_claim_sources": {"src2": {"endpoint": "https://claims.example.com/groups"}}
    }));

    let err = authenticator().authenticate(&token).await.unwrap_err();
    assert!(matches!(
        err,
        AuthError::ClaimExpansion(ResolveError::UnknownSource { ref source_name, .. }) if source_name == "src1"
    ));
}

#[tokio::test]
async fn test_missing_claim_sources() {
    let token = id_token(json!({"_claim_names": {"groups": "src1"}}));

    assert!(matches!(
        authenticator().authenticate(&token).await,
        Err(AuthError::ClaimExpansion(ResolveError::NoClaimSources))
    ));
}

#[tokio::test]
async fn test_aggregated_claim_not_resolved() {
    let token = id_token(json!({
        "_claim_names": {"groups": "src1"},
        "_claim_sources": {"src1": {"JWT": "aaa.bbb.ccc"}}
    }));

    let user = authenticator().authenticate(&token).await.unwrap().unwrap();
    assert!(user.groups.is_empty());
}

#[tokio::test]
async fn test_source_without_claim() {
    let provider = claims_provider(json!({"roles": ["admin"]})).await;
    let token = id_token(distributed_groups(&provider.endpoint("/groups"), "T"));

    assert!(matches!(
        authenticator().authenticate(&token).await,
        Err(AuthError::ClaimExpansion(ResolveError::SourceDidNotProvideClaim { ref claim, .. }))
            if claim == "groups"
    ));
}

#[tokio::test]
async fn test_claims_token_with_wrong_audience() {
    let provider = claims_provider(json!({"groups": ["team-a"], "aud": "another-client"})).await;
    let token = id_token(distributed_groups(&provider.endpoint("/groups"), "T"));

    assert!(matches!(
        authenticator().authenticate(&token).await,
        Err(AuthError::ClaimExpansion(ResolveError::Verification {
            source: VerifyError::Invalid(_),
            ..
        }))
    ));
}

#[tokio::test]
async fn test_claims_endpoint_returns_garbage() {
    let provider = MockOidcProvider::start().await;
    Mock::given(method("GET"))
        .and(path("/groups"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not a token"))
        .mount(&provider.server)
        .await;
    let token = id_token(distributed_groups(&provider.endpoint("/groups"), "T"));

    assert!(matches!(
        authenticator().authenticate(&token).await,
        Err(AuthError::ClaimExpansion(ResolveError::UntrustedIssuer { .. }))
    ));
}

#[tokio::test]
async fn test_claims_issuer_not_ready() {
    // GIVEN: a claims provider whose discovery endpoint is down
    let provider = MockOidcProvider::start().await;
    provider.fail_discovery(503, u64::MAX).await;
    let token = claims_signer()
        .sign(&id_token_claims(&provider.issuer, json!({"groups": ["team-a"]})))
        .unwrap();
    provider.mount_claims("/groups", "T", &token).await;

    let authenticator = authenticator();
    let token = id_token(distributed_groups(&provider.endpoint("/groups"), "T"));

    // THEN: the failure is reported as retryable
    let err = authenticator.authenticate(&token).await.unwrap_err();
    assert!(matches!(
        err,
        AuthError::ClaimExpansion(ResolveError::VerifierNotReady { ref issuer }) if issuer == &provider.issuer
    ));
    assert!(err.is_retryable());
    authenticator.close();
}

#[tokio::test]
async fn test_resolve_distributed_token() {
    // GIVEN: the ID token issuer also serves the groups
    let provider = MockOidcProvider::start().await;
    provider.mount_provider(vec![issuer_rsa_jwk(ISSUER_KID)]).await;
    let groups_token = issuer_signer()
        .sign(&id_token_claims(&provider.issuer, json!({"groups": ["g1", "g2"]})))
        .unwrap();
    provider.mount_claims("/groups", "T", &groups_token).await;

    let token = issuer_signer()
        .sign(&id_token_claims(
            &provider.issuer,
            distributed_groups(&provider.endpoint("/groups"), "T"),
        ))
        .unwrap();

    // WHEN: resolved without a pre-built authenticator
    let template = AuthenticatorConfig {
        groups_prefix: Some("oidc:".to_string()),
        ..AuthenticatorConfig::new("https://ignored.example.com", CLIENT_ID)
    };
    let authenticated = resolve_distributed_token(&template, &token).await.unwrap();

    // THEN
    assert_eq!(authenticated.user.groups, vec!["oidc:g1", "oidc:g2"]);
    assert!(authenticated.claims.has_claim("_claim_sources"));
}

#[tokio::test]
async fn test_resolve_requires_distributed_claim() {
    let template = AuthenticatorConfig::new(ISSUER, CLIENT_ID);
    let token = id_token(json!({"groups": ["g1"]}));

    assert!(matches!(
        resolve_distributed_token(&template, &token).await,
        Err(AuthError::NoDistributedClaim { ref claim }) if claim == "groups"
    ));
}
