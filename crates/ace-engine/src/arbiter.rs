//! The confirmation arbiter
//!
//! Dangerous actions suspend their operation until a human answers. The gate
//! fails closed: no response within the approval window, a dropped handler,
//! or cancellation all count as denial.

use std::sync::Arc;
use std::time::Duration;

use ace_types::{CancelSignal, ConfirmationDecision, CorrelationId};
use async_trait::async_trait;
use tokio::time::Instant;

/// A human's answer to one approval request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalResponse {
    Approved,
    Denied,
}

/// Host-provided channel to a human approver.
///
/// Implementations may take as long as they like; the arbiter bounds every
/// round trip with the approval window.
#[async_trait]
pub trait ApprovalHandler: Send + Sync {
    /// Present the literal action text and wait for a verdict.
    async fn request_approval(
        &self,
        correlation_id: CorrelationId,
        action: &str,
    ) -> ApprovalResponse;
}

/// The arbiter's verdict on one dangerous action
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmationOutcome {
    /// Explicitly approved
    Approved(ConfirmationDecision),
    /// Explicitly denied
    Denied(ConfirmationDecision),
    /// No response within the approval window; treated as denial
    TimedOut,
    /// The operation was cancelled while waiting
    Cancelled,
}

impl ConfirmationOutcome {
    /// Only an explicit approval lets the action proceed.
    #[inline]
    #[must_use]
    pub fn is_approved(&self) -> bool {
        matches!(self, Self::Approved(_))
    }
}

/// Serializes dangerous actions through the human approval gate
pub struct ConfirmationArbiter {
    handler: Arc<dyn ApprovalHandler>,
    approval_timeout: Duration,
}

impl ConfirmationArbiter {
    #[must_use]
    pub fn new(handler: Arc<dyn ApprovalHandler>, approval_timeout: Duration) -> Self {
        Self {
            handler,
            approval_timeout,
        }
    }

    /// Ask the handler about one action, bounded by the approval window and
    /// the operation deadline, whichever is tighter.
    pub async fn arbitrate(
        &self,
        correlation_id: CorrelationId,
        action: &str,
        deadline: Instant,
        cancel: &CancelSignal,
    ) -> ConfirmationOutcome {
        let now = Instant::now();
        if now >= deadline {
            return ConfirmationOutcome::TimedOut;
        }
        let window = self.approval_timeout.min(deadline - now);

        let verdict = tokio::select! {
            () = cancel.cancelled() => return ConfirmationOutcome::Cancelled,
            verdict = tokio::time::timeout(
                window,
                self.handler.request_approval(correlation_id, action),
            ) => verdict,
        };

        match verdict {
            Ok(ApprovalResponse::Approved) => {
                ConfirmationOutcome::Approved(ConfirmationDecision::approved("approved by user"))
            }
            Ok(ApprovalResponse::Denied) => {
                ConfirmationOutcome::Denied(ConfirmationDecision::denied("denied by user"))
            }
            Err(_elapsed) => {
                tracing::warn!(
                    %correlation_id,
                    "no approval response within {window:?}; failing closed"
                );
                ConfirmationOutcome::TimedOut
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ace_types::cancel_pair;

    struct FixedHandler(ApprovalResponse);

    #[async_trait]
    impl ApprovalHandler for FixedHandler {
        async fn request_approval(&self, _id: CorrelationId, _action: &str) -> ApprovalResponse {
            self.0
        }
    }

    struct SilentHandler;

    #[async_trait]
    impl ApprovalHandler for SilentHandler {
        async fn request_approval(&self, _id: CorrelationId, _action: &str) -> ApprovalResponse {
            std::future::pending().await
        }
    }

    fn far_deadline() -> Instant {
        Instant::now() + Duration::from_secs(30)
    }

    #[tokio::test]
    async fn explicit_approval_proceeds() {
        let arbiter = ConfirmationArbiter::new(
            Arc::new(FixedHandler(ApprovalResponse::Approved)),
            Duration::from_secs(1),
        );
        let (_handle, signal) = cancel_pair();

        let outcome = arbiter
            .arbitrate(CorrelationId::new(), "rm -rf ./drafts", far_deadline(), &signal)
            .await;
        assert!(outcome.is_approved());
    }

    #[tokio::test]
    async fn explicit_denial_fails_closed() {
        let arbiter = ConfirmationArbiter::new(
            Arc::new(FixedHandler(ApprovalResponse::Denied)),
            Duration::from_secs(1),
        );
        let (_handle, signal) = cancel_pair();

        let outcome = arbiter
            .arbitrate(CorrelationId::new(), "drop table users", far_deadline(), &signal)
            .await;
        assert!(matches!(outcome, ConfirmationOutcome::Denied(_)));
        assert!(!outcome.is_approved());
    }

    #[tokio::test]
    async fn silence_within_the_window_is_denial() {
        let arbiter =
            ConfirmationArbiter::new(Arc::new(SilentHandler), Duration::from_millis(20));
        let (_handle, signal) = cancel_pair();

        let outcome = arbiter
            .arbitrate(CorrelationId::new(), "sudo reboot", far_deadline(), &signal)
            .await;
        assert_eq!(outcome, ConfirmationOutcome::TimedOut);
        assert!(!outcome.is_approved());
    }

    #[tokio::test]
    async fn cancellation_interrupts_the_wait() {
        let arbiter =
            ConfirmationArbiter::new(Arc::new(SilentHandler), Duration::from_secs(30));
        let (handle, signal) = cancel_pair();
        handle.cancel();

        let outcome = arbiter
            .arbitrate(CorrelationId::new(), "rm -rf /", far_deadline(), &signal)
            .await;
        assert_eq!(outcome, ConfirmationOutcome::Cancelled);
    }

    #[tokio::test]
    async fn expired_deadline_denies_without_asking() {
        let arbiter = ConfirmationArbiter::new(
            Arc::new(FixedHandler(ApprovalResponse::Approved)),
            Duration::from_secs(1),
        );
        let (_handle, signal) = cancel_pair();

        let outcome = arbiter
            .arbitrate(
                CorrelationId::new(),
                "rm -rf ./drafts",
                Instant::now() - Duration::from_millis(1),
                &signal,
            )
            .await;
        assert_eq!(outcome, ConfirmationOutcome::TimedOut);
    }
}
