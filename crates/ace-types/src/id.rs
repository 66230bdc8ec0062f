//! Correlation identifiers
//!
//! One cryptographically random id per caller-initiated operation. Every log
//! record, output event, and classified error produced for that operation
//! carries it, so a single filter reconstructs the full trace.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique correlation identifier for one logical operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CorrelationId(pub Uuid);

impl CorrelationId {
    /// Generate a new random correlation id
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse a correlation id from its string form
    ///
    /// # Errors
    /// Returns the underlying parse error when `s` is not a valid UUID.
    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
