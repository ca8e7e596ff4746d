//! Per-issuer verifier cache
//!
//! Verifiers are created on first use of an issuer and kept for the lifetime
//! of the cache. Creation happens under the map entry lock, so concurrent
//! first use of an issuer starts exactly one discovery task.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::async_verifier::AsyncVerifier;
use super::discovery::ProviderDiscovery;
use super::verifier::IdTokenVerifier;

/// Lazily populated map from issuer to [`AsyncVerifier`]
#[derive(Debug)]
pub struct VerifierCache {
    verifiers: DashMap<String, Arc<AsyncVerifier>>,
    discovery: Arc<dyn ProviderDiscovery>,
    retry_interval: Duration,
    synchronous: bool,
    cancel: CancellationToken,
}

impl VerifierCache {
    /// Create an empty cache
    ///
    /// Background discovery of every verifier is cancelled with `cancel`
    /// (each verifier gets a child token).
    pub fn new(
        discovery: Arc<dyn ProviderDiscovery>,
        retry_interval: Duration,
        synchronous: bool,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            verifiers: DashMap::new(),
            discovery,
            retry_interval,
            synchronous,
            cancel,
        }
    }

    /// The verifier for `issuer`, if it is ready
    ///
    /// The first call for an issuer starts its discovery. In synchronous mode
    /// every caller waits until the first attempt has finished, including
    /// callers that arrive while another one is already waiting.
    pub async fn verifier(&self, issuer: &str) -> Option<Arc<IdTokenVerifier>> {
        let entry = self.get_or_create(issuer);
        if self.synchronous {
            entry.wait_first_attempt().await;
        }
        entry.verifier()
    }

    fn get_or_create(&self, issuer: &str) -> Arc<AsyncVerifier> {
        if let Some(existing) = self.verifiers.get(issuer) {
            return Arc::clone(existing.value());
        }

        let entry = self
            .verifiers
            .entry(issuer.to_string())
            .or_insert_with(|| {
                debug!(issuer, "Creating verifier for new issuer");
                Arc::new(AsyncVerifier::spawn(
                    issuer,
                    Arc::clone(&self.discovery),
                    self.retry_interval,
                    self.cancel.child_token(),
                ))
            });
        Arc::clone(entry.value())
    }

    /// Number of issuers seen so far
    pub fn len(&self) -> usize {
        self.verifiers.len()
    }

    /// Whether no issuer has been seen yet
    pub fn is_empty(&self) -> bool {
        self.verifiers.is_empty()
    }

    /// Whether a verifier entry exists for `issuer` (ready or not)
    pub fn contains(&self, issuer: &str) -> bool {
        self.verifiers.contains_key(issuer)
    }

    /// Cancel background discovery of every verifier in the cache
    pub fn close(&self) {
        self.cancel.cancel();
    }
}
