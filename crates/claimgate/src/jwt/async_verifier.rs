//! Verifiers that become available asynchronously
//!
//! Providers may be unreachable when an authenticator starts (for example a
//! provider running on the same cluster that is still booting). An
//! [`AsyncVerifier`] is handed out immediately and initialized by a
//! background task:
//!
//! ```text
//!  Initializing ──discover ok──▶ Ready
//!       │  ▲
//!       │  └── discover failed, sleep retry_interval
//!       └──── cancelled ──▶ Abandoned
//! ```
//!
//! Failures are never terminal; only cancellation stops the retries.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info, warn};

use super::discovery::ProviderDiscovery;
use super::verifier::IdTokenVerifier;

/// Lifecycle of an [`AsyncVerifier`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifierState {
    /// Discovery has not succeeded yet
    Initializing,
    /// A verifier is available
    Ready,
    /// Cancelled before discovery succeeded; will never become ready
    Abandoned,
}

#[derive(Debug, Clone)]
enum Slot {
    Pending { attempts: u32 },
    Ready(Arc<IdTokenVerifier>),
}

/// A verifier for one issuer that may still be initializing
#[derive(Debug)]
pub struct AsyncVerifier {
    issuer: String,
    slot: watch::Receiver<Slot>,
    cancel: CancellationToken,
    // Stops the background task when the last handle goes away.
    _guard: DropGuard,
}

impl AsyncVerifier {
    /// Wrap an already constructed verifier
    pub fn ready(verifier: IdTokenVerifier) -> Self {
        let issuer = verifier.issuer().to_string();
        let (_tx, slot) = watch::channel(Slot::Ready(Arc::new(verifier)));
        let cancel = CancellationToken::new();
        Self {
            issuer,
            slot,
            _guard: cancel.clone().drop_guard(),
            cancel,
        }
    }

    /// Start discovering `issuer` in the background
    ///
    /// The first attempt runs immediately; failed attempts are retried every
    /// `retry_interval` until one succeeds or `cancel` fires. Must be called
    /// from within a tokio runtime.
    pub fn spawn(
        issuer: impl Into<String>,
        discovery: Arc<dyn ProviderDiscovery>,
        retry_interval: Duration,
        cancel: CancellationToken,
    ) -> Self {
        let issuer = issuer.into();
        let (tx, slot) = watch::channel(Slot::Pending { attempts: 0 });

        let task_issuer = issuer.clone();
        let task_cancel = cancel.clone();
        tokio::spawn(async move {
            let issuer = task_issuer;
            loop {
                debug!(issuer = %issuer, "oidc: attempting verifier init");

                let result = tokio::select! {
                    biased;
                    _ = task_cancel.cancelled() => {
                        debug!(issuer = %issuer, "oidc: verifier init cancelled");
                        return;
                    }
                    result = discovery.discover(&issuer) => result,
                };

                match result {
                    Ok(verifier) => {
                        info!(issuer = %issuer, "oidc: verifier ready");
                        tx.send_replace(Slot::Ready(Arc::new(verifier)));
                        return;
                    }
                    Err(e) => {
                        warn!(
                            issuer = %issuer,
                            error = %e,
                            retry_interval = ?retry_interval,
                            "oidc: async token verifier init failed"
                        );
                        tx.send_modify(|slot| {
                            if let Slot::Pending { attempts } = slot {
                                *attempts += 1;
                            }
                        });
                    }
                }

                tokio::select! {
                    biased;
                    _ = task_cancel.cancelled() => {
                        debug!(issuer = %issuer, "oidc: verifier init cancelled");
                        return;
                    }
                    _ = tokio::time::sleep(retry_interval) => {}
                }
            }
        });

        Self {
            issuer,
            slot,
            _guard: cancel.clone().drop_guard(),
            cancel,
        }
    }

    /// Issuer this verifier is for
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// The verifier, if initialization has succeeded
    pub fn verifier(&self) -> Option<Arc<IdTokenVerifier>> {
        match &*self.slot.borrow() {
            Slot::Ready(verifier) => Some(Arc::clone(verifier)),
            Slot::Pending { .. } => None,
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> VerifierState {
        match &*self.slot.borrow() {
            Slot::Ready(_) => VerifierState::Ready,
            Slot::Pending { .. } if self.cancel.is_cancelled() => VerifierState::Abandoned,
            Slot::Pending { .. } => VerifierState::Initializing,
        }
    }

    /// Number of failed discovery attempts so far
    pub fn failed_attempts(&self) -> u32 {
        match &*self.slot.borrow() {
            Slot::Pending { attempts } => *attempts,
            Slot::Ready(_) => 0,
        }
    }

    /// Wait until the first discovery attempt finished, successfully or not
    pub async fn wait_first_attempt(&self) {
        let mut slot = self.slot.clone();
        // An error means the task ended (cancelled) without another update.
        let _ = slot
            .wait_for(|s| !matches!(s, Slot::Pending { attempts: 0 }))
            .await;
    }

    /// Wait until the verifier is ready; `None` if it was abandoned first
    pub async fn wait_ready(&self) -> Option<Arc<IdTokenVerifier>> {
        let mut slot = self.slot.clone();
        let ready = slot.wait_for(|s| matches!(s, Slot::Ready(_))).await.ok()?;
        match &*ready {
            Slot::Ready(verifier) => Some(Arc::clone(verifier)),
            Slot::Pending { .. } => None,
        }
    }

    /// Stop background initialization
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}
