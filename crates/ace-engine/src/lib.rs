//! ACE Engine - stateful CLI agent interaction
//!
//! Orchestrates the full operation pipeline:
//! - Credential resolution through the ordered gate
//! - Agent process spawning and supervision with hard deadlines
//! - Incremental classification of streamed output
//! - Fail-closed human approval for dangerous actions
//! - Correlated tracing and classified error recovery

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod arbiter;
pub mod engine;
pub mod recovery;
pub mod supervisor;
pub mod tracker;

pub use arbiter::{ApprovalHandler, ApprovalResponse, ConfirmationArbiter, ConfirmationOutcome};
pub use engine::{Engine, EngineStats, OperationHandle};
pub use recovery::{ErrorClassifier, RecoveryPolicy, RecoveryStep};
pub use supervisor::{
    OutputChannel, ProcessSupervisor, Session, SessionItem, SpawnError, CORRELATION_ENV, TOKEN_ENV,
};
pub use tracker::{CorrelationTracker, LogSink};
