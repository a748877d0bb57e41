//! Process wiring for the Bastion enforcement core.
//!
//! [`BastionConfig::load`] reads layered configuration, [`telemetry::init`]
//! installs logging, and [`Runtime::build`] constructs every service once.
//! Route handlers hold the [`Runtime`] and call
//! [`bastion_gate::GateChain::run`] before their own mutation.

#![deny(unsafe_code)]
#![warn(rust_2018_idioms)]

pub mod canvas;
pub mod config;
pub mod config_store;
mod error;
mod runtime;
pub mod telemetry;

pub use canvas::{AppendOutcome, CanvasCollaboration};
pub use config::{
    BastionConfig, BudgetConfig, GateConfig, RateLimitConfig, RoutingConfig, StorageConfig, TelemetryConfig,
    TenantOverride,
};
pub use config_store::{ConfigEntry, ConfigStoreRepository, CONFIG_STORE_KIND};
pub use error::RuntimeError;
pub use runtime::Runtime;
