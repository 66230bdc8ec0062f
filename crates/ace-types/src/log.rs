//! Structured log records
//!
//! The append-only sink stores these; filtering by correlation id yields a
//! complete, causally ordered trace for one operation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::CorrelationId;

/// Severity of a log record
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogSeverity {
    Debug,
    Info,
    Warn,
    Error,
}

/// One append-only structured log record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    pub correlation_id: CorrelationId,
    pub timestamp: DateTime<Utc>,
    pub severity: LogSeverity,
    /// The pipeline component that produced this record
    pub component: String,
    pub message: String,
    /// Technical detail preserved for diagnosis; never shown to users
    pub technical_detail: Option<String>,
}

impl LogRecord {
    #[must_use]
    pub fn new(
        correlation_id: CorrelationId,
        severity: LogSeverity,
        component: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            correlation_id,
            timestamp: Utc::now(),
            severity,
            component: component.into(),
            message: message.into(),
            technical_detail: None,
        }
    }

    /// With technical detail attached
    #[must_use]
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.technical_detail = Some(detail.into());
        self
    }
}
