//! Classified output events and terminal results
//!
//! [`OutputEvent`] is the closed tagged union produced by classification.
//! Downstream components switch over the tag; nothing re-parses raw text.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ClassifiedError;
use crate::id::CorrelationId;

/// One classified piece of agent output.
///
/// Every variant carries the originating correlation id and the raw source
/// text it was classified from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OutputEvent {
    /// Internal reasoning surfaced by the agent
    Reasoning {
        correlation_id: CorrelationId,
        text: String,
        raw: String,
    },
    /// A proposed action
    ToolCall {
        correlation_id: CorrelationId,
        /// The literal action text (payload after the marker)
        action: String,
        /// Matched the dangerous-action deny-list
        dangerous: bool,
        raw: String,
    },
    /// The agent is asking for confirmation
    ConfirmationRequest {
        correlation_id: CorrelationId,
        prompt: String,
        raw: String,
    },
    /// One complete JSON object
    Structured {
        correlation_id: CorrelationId,
        value: Value,
        raw: String,
    },
    /// Plain text (default classification)
    Text {
        correlation_id: CorrelationId,
        /// True when this is the degraded form of unterminated JSON
        degraded: bool,
        raw: String,
    },
}

impl OutputEvent {
    /// The correlation id this event belongs to
    #[must_use]
    pub fn correlation_id(&self) -> CorrelationId {
        match self {
            Self::Reasoning { correlation_id, .. }
            | Self::ToolCall { correlation_id, .. }
            | Self::ConfirmationRequest { correlation_id, .. }
            | Self::Structured { correlation_id, .. }
            | Self::Text { correlation_id, .. } => *correlation_id,
        }
    }

    /// The raw source text this event was classified from
    #[must_use]
    pub fn raw(&self) -> &str {
        match self {
            Self::Reasoning { raw, .. }
            | Self::ToolCall { raw, .. }
            | Self::ConfirmationRequest { raw, .. }
            | Self::Structured { raw, .. }
            | Self::Text { raw, .. } => raw,
        }
    }

    /// Whether this is a dangerous tool call requiring approval
    #[must_use]
    pub fn is_dangerous(&self) -> bool {
        matches!(self, Self::ToolCall { dangerous: true, .. })
    }
}

/// Token accounting reported by the agent, when present
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageStats {
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
}

impl UsageStats {
    /// Extracts usage counts from a structured `usage` object, if present.
    #[must_use]
    pub fn from_value(value: &Value) -> Option<Self> {
        let usage = value.get("usage")?;
        Some(Self {
            input_tokens: usage.get("input_tokens").and_then(Value::as_u64),
            output_tokens: usage.get("output_tokens").and_then(Value::as_u64),
        })
    }
}

/// Terminal success payload for one operation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    /// Concatenated plain-text output
    pub text: String,
    /// Token accounting, when the agent reported it
    pub usage: UsageStats,
}

/// The human decision recorded for one dangerous action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmationDecision {
    pub approved: bool,
    pub rationale: String,
}

impl ConfirmationDecision {
    #[must_use]
    pub fn approved(rationale: impl Into<String>) -> Self {
        Self {
            approved: true,
            rationale: rationale.into(),
        }
    }

    #[must_use]
    pub fn denied(rationale: impl Into<String>) -> Self {
        Self {
            approved: false,
            rationale: rationale.into(),
        }
    }
}

/// What the submit stream yields: events, then exactly one terminal item.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineUpdate {
    /// A classified output event
    Event(OutputEvent),
    /// Terminal: the operation completed
    Done(RunResult),
    /// Terminal: the operation failed with a classified error
    Failed(ClassifiedError),
}

impl EngineUpdate {
    /// Whether this update terminates the stream
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done(_) | Self::Failed(_))
    }
}
