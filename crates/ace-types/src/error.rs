//! The error taxonomy
//!
//! Every failure raised anywhere in the pipeline is mapped into a
//! [`ClassifiedError`] before a caller can observe it. The user-facing
//! message is non-technical; technical detail lives only in the correlated
//! log.

use serde::{Deserialize, Serialize};

use crate::id::CorrelationId;

/// Failure categories with defined recovery policies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCategory {
    /// All credential tiers failed
    Authentication,
    /// The agent executable could not be found
    ProcessNotFound,
    /// Hard wall-clock timeout
    Timeout,
    /// Output ended mid-structure
    MalformedOutput,
    /// A human denied a dangerous action
    UserDenied,
    /// The caller cancelled the operation
    Cancelled,
    /// The agent's upstream service failed
    UpstreamService,
    /// The agent's upstream service rate-limited the request
    RateLimited,
    /// Invariant violation inside the engine
    Internal,
}

impl ErrorCategory {
    /// Whether this category has a local recovery policy
    #[inline]
    #[must_use]
    pub fn recoverable(&self) -> bool {
        matches!(
            self,
            Self::Timeout | Self::MalformedOutput | Self::UpstreamService | Self::RateLimited
        )
    }
}

/// How severe a classified failure is
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ErrorSeverity {
    /// Degraded but completed
    Warning,
    /// The operation failed
    Error,
    /// The engine cannot proceed without operator action
    Fatal,
}

/// A fully classified failure
#[derive(Debug, Clone, PartialEq, thiserror::Error, Serialize, Deserialize)]
#[error("{user_message} (correlation id: {correlation_id})")]
pub struct ClassifiedError {
    pub category: ErrorCategory,
    pub severity: ErrorSeverity,
    pub recoverable: bool,
    pub correlation_id: CorrelationId,
    /// One actionable, non-technical sentence shown to the user
    pub user_message: String,
    /// Preserved for the correlated log; never shown directly
    pub technical_detail: String,
}

impl ClassifiedError {
    /// Build an error for a category with its default severity and
    /// recoverability.
    #[must_use]
    pub fn new(
        category: ErrorCategory,
        correlation_id: CorrelationId,
        user_message: impl Into<String>,
        technical_detail: impl Into<String>,
    ) -> Self {
        let severity = match category {
            ErrorCategory::MalformedOutput => ErrorSeverity::Warning,
            ErrorCategory::ProcessNotFound | ErrorCategory::Internal => ErrorSeverity::Fatal,
            _ => ErrorSeverity::Error,
        };
        Self {
            category,
            severity,
            recoverable: category.recoverable(),
            correlation_id,
            user_message: user_message.into(),
            technical_detail: technical_detail.into(),
        }
    }

    #[must_use]
    pub fn authentication(correlation_id: CorrelationId, detail: impl Into<String>) -> Self {
        Self::new(
            ErrorCategory::Authentication,
            correlation_id,
            "Could not sign you in; check your agent credentials and try again.",
            detail,
        )
    }

    #[must_use]
    pub fn process_not_found(correlation_id: CorrelationId, detail: impl Into<String>) -> Self {
        Self::new(
            ErrorCategory::ProcessNotFound,
            correlation_id,
            "The agent program is not installed or not on your PATH; install it and retry.",
            detail,
        )
    }

    #[must_use]
    pub fn timeout(correlation_id: CorrelationId, detail: impl Into<String>) -> Self {
        Self::new(
            ErrorCategory::Timeout,
            correlation_id,
            "The agent took too long to respond; try again.",
            detail,
        )
    }

    #[must_use]
    pub fn malformed_output(correlation_id: CorrelationId, detail: impl Into<String>) -> Self {
        Self::new(
            ErrorCategory::MalformedOutput,
            correlation_id,
            "The agent's reply ended unexpectedly; partial output was kept.",
            detail,
        )
    }

    #[must_use]
    pub fn user_denied(correlation_id: CorrelationId, detail: impl Into<String>) -> Self {
        Self::new(
            ErrorCategory::UserDenied,
            correlation_id,
            "The action was not approved, so the agent was stopped.",
            detail,
        )
    }

    #[must_use]
    pub fn cancelled(correlation_id: CorrelationId, detail: impl Into<String>) -> Self {
        Self::new(
            ErrorCategory::Cancelled,
            correlation_id,
            "The operation was cancelled.",
            detail,
        )
    }

    #[must_use]
    pub fn upstream(correlation_id: CorrelationId, detail: impl Into<String>) -> Self {
        Self::new(
            ErrorCategory::UpstreamService,
            correlation_id,
            "The agent's service had a temporary problem; try again shortly.",
            detail,
        )
    }

    #[must_use]
    pub fn rate_limited(correlation_id: CorrelationId, detail: impl Into<String>) -> Self {
        Self::new(
            ErrorCategory::RateLimited,
            correlation_id,
            "The agent's service is busy right now; wait a moment and try again.",
            detail,
        )
    }

    #[must_use]
    pub fn internal(correlation_id: CorrelationId, detail: impl Into<String>) -> Self {
        Self::new(
            ErrorCategory::Internal,
            correlation_id,
            "Something went wrong inside the agent engine; this has been logged.",
            detail,
        )
    }
}
