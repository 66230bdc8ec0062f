//! Error classification and recovery
//!
//! Raw failures (spawn errors, exit statuses, gate failures) are mapped into
//! the classified taxonomy here; [`RecoveryPolicy`] then decides whether a
//! failed attempt earns a local retry or surfaces to the caller.

use std::path::Path;
use std::time::Duration;

use ace_auth::GateError;
use ace_types::{ClassifiedError, CorrelationId, ErrorCategory};

/// Maps raw failures into the classified taxonomy
pub struct ErrorClassifier;

impl ErrorClassifier {
    /// A spawn-time I/O failure.
    ///
    /// A missing executable is the one fatal, unambiguous case; everything
    /// else at spawn time is internal.
    #[must_use]
    pub fn spawn_failure(
        correlation_id: CorrelationId,
        executable: &Path,
        err: &std::io::Error,
    ) -> ClassifiedError {
        if err.kind() == std::io::ErrorKind::NotFound {
            ClassifiedError::process_not_found(
                correlation_id,
                format!("spawn {}: {err}", executable.display()),
            )
        } else {
            ClassifiedError::internal(
                correlation_id,
                format!("spawn {}: {err}", executable.display()),
            )
        }
    }

    /// A nonzero or signalled process exit.
    ///
    /// The stderr tail is the only evidence available; rate-limit and
    /// upstream-outage phrasings get their own categories, anything else is
    /// treated as an upstream failure so the recovery policy can retry it.
    #[must_use]
    pub fn exit_failure(
        correlation_id: CorrelationId,
        code: Option<i32>,
        stderr_tail: &str,
    ) -> ClassifiedError {
        let detail = match code {
            Some(code) => format!("agent exited with status {code}; stderr: {stderr_tail}"),
            None => format!("agent killed by signal; stderr: {stderr_tail}"),
        };
        let lowered = stderr_tail.to_lowercase();

        if lowered.contains("429")
            || lowered.contains("rate limit")
            || lowered.contains("rate-limit")
            || lowered.contains("too many requests")
        {
            ClassifiedError::rate_limited(correlation_id, detail)
        } else {
            ClassifiedError::upstream(correlation_id, detail)
        }
    }

    /// A credential gate failure.
    #[must_use]
    pub fn gate_failure(correlation_id: CorrelationId, err: &GateError) -> ClassifiedError {
        match err {
            GateError::Cancelled => {
                ClassifiedError::cancelled(correlation_id, "cancelled during credential resolution")
            }
            GateError::DeadlineExceeded => ClassifiedError::timeout(
                correlation_id,
                "operation deadline expired during credential resolution",
            ),
            GateError::AllTiersFailed { .. } => {
                ClassifiedError::authentication(correlation_id, err.detail())
            }
        }
    }
}

/// What the policy decided about a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryStep {
    /// Retry locally after the given delay
    Retry { delay: Duration },
    /// Surface the classified error to the caller
    Surface,
}

/// Per-category retry budgets and backoff
#[derive(Debug, Clone)]
pub struct RecoveryPolicy {
    /// Base backoff for upstream service failures
    pub upstream_backoff: Duration,
    /// Base backoff for rate-limit failures; longer than upstream
    pub rate_limit_backoff: Duration,
}

impl Default for RecoveryPolicy {
    fn default() -> Self {
        Self {
            upstream_backoff: Duration::from_millis(250),
            rate_limit_backoff: Duration::from_secs(1),
        }
    }
}

impl RecoveryPolicy {
    /// Decide the next step after a failed attempt.
    ///
    /// `attempt` counts prior retries for this category within the operation:
    /// - Timeout: one immediate retry, same correlation id
    /// - Authentication: one retry with a forced fresh resolution
    /// - Upstream service: up to two retries with exponential backoff
    /// - Rate limited: up to two retries with longer backoff
    /// - everything else surfaces immediately
    #[must_use]
    pub fn next_step(&self, category: ErrorCategory, attempt: u32) -> RecoveryStep {
        match category {
            ErrorCategory::Timeout | ErrorCategory::Authentication if attempt == 0 => {
                RecoveryStep::Retry {
                    delay: Duration::ZERO,
                }
            }
            ErrorCategory::UpstreamService if attempt < 2 => RecoveryStep::Retry {
                delay: self.upstream_backoff * 2u32.pow(attempt),
            },
            ErrorCategory::RateLimited if attempt < 2 => RecoveryStep::Retry {
                delay: self.rate_limit_backoff * 2u32.pow(attempt),
            },
            _ => RecoveryStep::Surface,
        }
    }
}
