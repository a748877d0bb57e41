//! Shared vocabulary for the Bastion enforcement core.
//!
//! - [`RequestContext`]: the immutable, server-derived scope of one call
//! - [`ScopeConfig`]: which optional scope fields a store keys on
//! - [`ErrorEnvelope`]: the transport-neutral failure shape every component
//!   renders into through [`ToEnvelope`]

#![deny(unsafe_code)]
#![warn(rust_2018_idioms)]

pub mod context;
pub mod error;
pub mod scope;

pub use context::{
    ClientClaims, ContextError, Mode, RequestContext, RequestContextBuilder, TenantId,
};
pub use error::{ErrorEnvelope, ErrorKind, ToEnvelope};
pub use scope::{ScopeConfig, ScopeError};
