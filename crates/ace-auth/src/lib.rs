//! ACE Auth - the credential resolution hierarchy
//!
//! Resolves an authentication token through an ordered fallback chain:
//! - An existing active session token
//! - An environment-supplied key
//! - Ambient platform default credentials
//! - An interactive consent flow delegated to the host
//!
//! Each tier has its own timeout; the whole chain respects a caller-supplied
//! deadline and a cancellation signal.

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod gate;
pub mod resolver;

pub use gate::{CredentialGate, GateError};
pub use resolver::{
    AdcResolver, CredentialProvider, CredentialResolver, EnvKeyResolver, InteractiveResolver,
    ResolverError, SessionCache, SessionResolver,
};
