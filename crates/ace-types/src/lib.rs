//! ACE Types - shared vocabulary for the Agent CLI Engine
//!
//! Defines the fundamental types flowing through the pipeline:
//! - Correlation identifiers and cancellation signals
//! - Operation and session state machines
//! - Classified output events and terminal results
//! - The error taxonomy every failure is mapped into
//! - Credentials, engine configuration, and structured log records

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod cancel;
pub mod config;
pub mod conversation;
pub mod credential;
pub mod error;
pub mod event;
pub mod id;
pub mod log;
pub mod state;

// Re-exports for convenience
pub use cancel::{cancel_pair, CancelHandle, CancelSignal};
pub use config::{EngineConfig, OutputMode};
pub use conversation::{ChatMessage, Conversation, Role};
pub use credential::{Credential, CredentialSource, SecretToken};
pub use error::{ClassifiedError, ErrorCategory, ErrorSeverity};
pub use event::{ConfirmationDecision, EngineUpdate, OutputEvent, RunResult, UsageStats};
pub use id::CorrelationId;
pub use log::{LogRecord, LogSeverity};
pub use state::{
    operation_transitions, session_transitions, validate_operation_transition,
    validate_session_transition, OperationState, SessionState, StateError,
};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for working with ACE types
    pub use crate::{
        CancelSignal, ClassifiedError, Conversation, CorrelationId, Credential, EngineConfig,
        EngineUpdate, ErrorCategory, OutputEvent, RunResult,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
