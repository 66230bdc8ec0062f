//! The credential gate
//!
//! Tries each resolver tier in order under its own timeout, honoring the
//! caller deadline and cancellation signal throughout.

use std::sync::Arc;
use std::time::Duration;

use ace_types::{CancelSignal, Credential, CredentialSource};
use tokio::time::Instant;

use crate::resolver::{
    AdcResolver, CredentialProvider, CredentialResolver, EnvKeyResolver, InteractiveResolver,
    SessionCache, SessionResolver,
};

/// Gate-level failures
#[derive(Debug, Clone, thiserror::Error)]
pub enum GateError {
    /// Every tier failed or had nothing to offer
    #[error("all credential tiers failed")]
    AllTiersFailed {
        /// Per-tier failure detail, in resolution order
        attempts: Vec<(CredentialSource, String)>,
    },
    /// The caller deadline expired before any tier succeeded
    #[error("credential resolution deadline exceeded")]
    DeadlineExceeded,
    /// The operation was cancelled while resolving
    #[error("credential resolution cancelled")]
    Cancelled,
}

impl GateError {
    /// Flatten per-tier detail for the correlated log.
    #[must_use]
    pub fn detail(&self) -> String {
        match self {
            Self::AllTiersFailed { attempts } => attempts
                .iter()
                .map(|(source, reason)| format!("{source}: {reason}"))
                .collect::<Vec<_>>()
                .join("; "),
            Self::DeadlineExceeded => "deadline exceeded".to_string(),
            Self::Cancelled => "cancelled".to_string(),
        }
    }
}

/// Ordered credential resolution hierarchy
pub struct CredentialGate {
    resolvers: Vec<Box<dyn CredentialResolver>>,
    session: Arc<SessionCache>,
    tier_timeout: Duration,
}

impl CredentialGate {
    /// The standard four-tier hierarchy: session, environment key, ambient
    /// platform credentials, then the host's interactive flow (when a
    /// provider is supplied).
    #[must_use]
    pub fn standard(
        tier_timeout: Duration,
        provider: Option<Arc<dyn CredentialProvider>>,
    ) -> Self {
        let session = Arc::new(SessionCache::new());
        let mut resolvers: Vec<Box<dyn CredentialResolver>> = vec![
            Box::new(SessionResolver::new(Arc::clone(&session))),
            Box::new(EnvKeyResolver::new()),
            Box::new(AdcResolver::new()),
        ];
        if let Some(provider) = provider {
            resolvers.push(Box::new(InteractiveResolver::new(provider)));
        }
        Self {
            resolvers,
            session,
            tier_timeout,
        }
    }

    /// A gate over an explicit resolver list, for hosts that need a custom
    /// hierarchy.
    #[must_use]
    pub fn with_resolvers(
        tier_timeout: Duration,
        resolvers: Vec<Box<dyn CredentialResolver>>,
    ) -> Self {
        Self {
            resolvers,
            session: Arc::new(SessionCache::new()),
            tier_timeout,
        }
    }

    /// The session cache backing tier 1
    #[must_use]
    pub fn session_cache(&self) -> Arc<SessionCache> {
        Arc::clone(&self.session)
    }

    /// Resolve a credential through the hierarchy.
    ///
    /// # Errors
    /// - [`GateError::AllTiersFailed`] when no tier produced a usable
    ///   credential
    /// - [`GateError::DeadlineExceeded`] when the caller deadline expired
    /// - [`GateError::Cancelled`] when the operation was cancelled
    pub async fn resolve(
        &self,
        scopes: &[String],
        deadline: Instant,
        cancel: &CancelSignal,
    ) -> Result<Credential, GateError> {
        let mut attempts: Vec<(CredentialSource, String)> = Vec::new();

        for resolver in &self.resolvers {
            if cancel.is_cancelled() {
                return Err(GateError::Cancelled);
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(GateError::DeadlineExceeded);
            }
            let budget = self.tier_timeout.min(deadline - now);
            let source = resolver.source();

            let outcome = tokio::select! {
                () = cancel.cancelled() => return Err(GateError::Cancelled),
                result = tokio::time::timeout(budget, resolver.resolve(scopes)) => result,
            };

            match outcome {
                Ok(Ok(Some(credential))) => {
                    if credential.is_expired() {
                        attempts.push((source, "credential already expired".to_string()));
                        continue;
                    }
                    tracing::debug!(%source, "credential resolved");
                    return Ok(credential);
                }
                Ok(Ok(None)) => {
                    attempts.push((source, "tier unavailable".to_string()));
                }
                Ok(Err(err)) => {
                    tracing::debug!(%source, error = %err, "credential tier failed");
                    attempts.push((source, err.to_string()));
                }
                Err(_elapsed) => {
                    attempts.push((source, format!("tier timeout after {budget:?}")));
                }
            }
        }

        Err(GateError::AllTiersFailed { attempts })
    }

    /// Resolve, forcing the session tier to start cold.
    ///
    /// Used for the single forced re-resolution the recovery policy grants
    /// after an authentication failure.
    ///
    /// # Errors
    /// Same as [`CredentialGate::resolve`].
    pub async fn resolve_fresh(
        &self,
        scopes: &[String],
        deadline: Instant,
        cancel: &CancelSignal,
    ) -> Result<Credential, GateError> {
        self.session.clear();
        self.resolve(scopes, deadline, cancel).await
    }
}
