//! Routing registry.
//!
//! Maps `(resource_kind, tenant_id, env, project_id?)` to a backend
//! descriptor and turns descriptors into live [`KvBackend`] handles.
//!
//! - Lookup is most-specific-first: a project route beats the tenant-wide one.
//! - A required kind with no route is `<resource_kind>.missing_route` (503),
//!   never a generic not-found.
//! - Reads go against an immutable snapshot; a writer publishes a whole new
//!   snapshot, so readers observe either the old or the new route.
//! - Changing `backend_type` goes through [`RoutingRegistry::switch_backend`]
//!   and a [`SwitchAuthorizer`].

#![deny(unsafe_code)]
#![warn(rust_2018_idioms)]

mod error;
mod registry;
mod resolver;
mod route;

pub use bastion_kv::{BackendType, KvBackend};
pub use error::RoutingError;
pub use registry::{RoutingRegistry, SwitchAuthorizer, SWITCH_BACKEND_ACTION};
pub use resolver::{BackendOpener, BackendResolver, DefaultOpener};
pub use route::{HealthStatus, ResourceRoute, RouteFilter, RouteKey, RouteSpec, Tier};
