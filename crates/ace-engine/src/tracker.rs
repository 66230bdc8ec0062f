//! Correlation tracking
//!
//! Assigns correlation ids and keeps an append-only in-process log sink.
//! Filtering the sink by id yields the complete, causally ordered trace for
//! one operation. Every record is mirrored to `tracing` for hosts that wire
//! up a subscriber.

use std::sync::Arc;

use ace_types::{CorrelationId, LogRecord, LogSeverity};
use parking_lot::Mutex;

/// Append-only log sink
#[derive(Debug, Default)]
pub struct LogSink {
    records: Mutex<Vec<LogRecord>>,
}

impl LogSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one record. Records are never mutated or removed.
    pub fn append(&self, record: LogRecord) {
        self.records.lock().push(record);
    }

    /// A snapshot of every record, in append order
    #[must_use]
    pub fn records(&self) -> Vec<LogRecord> {
        self.records.lock().clone()
    }

    /// The trace for one correlation id, in append order
    #[must_use]
    pub fn trace(&self, correlation_id: CorrelationId) -> Vec<LogRecord> {
        self.records
            .lock()
            .iter()
            .filter(|record| record.correlation_id == correlation_id)
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

/// Assigns correlation ids and records correlated log entries
#[derive(Debug, Clone, Default)]
pub struct CorrelationTracker {
    sink: Arc<LogSink>,
}

impl CorrelationTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The shared sink behind this tracker
    #[must_use]
    pub fn sink(&self) -> Arc<LogSink> {
        Arc::clone(&self.sink)
    }

    /// Honor a caller-supplied id, or mint a fresh one.
    #[must_use]
    pub fn assign(&self, requested: Option<CorrelationId>) -> CorrelationId {
        requested.unwrap_or_else(CorrelationId::new)
    }

    /// Record one correlated entry, mirroring it to `tracing`.
    pub fn record(
        &self,
        correlation_id: CorrelationId,
        severity: LogSeverity,
        component: &str,
        message: impl Into<String>,
        detail: Option<String>,
    ) {
        let message = message.into();
        match severity {
            LogSeverity::Debug => {
                tracing::debug!(%correlation_id, component, "{message}");
            }
            LogSeverity::Info => {
                tracing::info!(%correlation_id, component, "{message}");
            }
            LogSeverity::Warn => {
                tracing::warn!(%correlation_id, component, "{message}");
            }
            LogSeverity::Error => {
                tracing::error!(%correlation_id, component, "{message}");
            }
        }

        let mut record = LogRecord::new(correlation_id, severity, component, message);
        if let Some(detail) = detail {
            record = record.with_detail(detail);
        }
        self.sink.append(record);
    }

    /// The complete trace for one operation
    #[must_use]
    pub fn trace(&self, correlation_id: CorrelationId) -> Vec<LogRecord> {
        self.sink.trace(correlation_id)
    }
}
