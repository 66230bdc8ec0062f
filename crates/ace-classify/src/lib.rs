//! ACE Classify - incremental classification of streaming agent output
//!
//! Consumes raw output in arrival order and produces typed
//! [`OutputEvent`](ace_types::OutputEvent)s without ever waiting for process
//! exit. Classification is deterministic: marker lines first, then complete
//! JSON objects, then plain text.

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod classifier;
pub mod denylist;

pub use classifier::Classifier;
pub use denylist::{DenyList, DEFAULT_DENY_PATTERNS};
