//! Policy services consulted by the gate chain.
//!
//! Each service owns one kind of policy fact, persists it through a
//! [`bastion_store::VersionedStore`] or a routed KV table, and exposes an
//! `evaluate` operation that either passes or fails with a typed
//! [`PolicyError`]. Services are plain structs constructed once and shared
//! by `Arc`; none of them keeps process-global state.

#![deny(unsafe_code)]
#![warn(rust_2018_idioms)]

pub mod approval;
pub mod audit;
pub mod budget;
pub mod catalog;
mod error;
mod facts;
pub mod kill_switch;
pub mod kpi;
pub mod license;
pub mod rate_limit;
pub mod resolver;
mod series;
pub mod temperature;

#[cfg(test)]
pub(crate) mod testing;

pub use approval::{ApprovalPolicy, ApprovalService, LockStatus, StrategyLock};
pub use audit::{AuditEntry, AuditLog, AuditOutcome, AuditRecord};
pub use budget::{BudgetCheck, BudgetLimit, BudgetService, BudgetThreshold, UsageEvent};
pub use catalog::{ActionCatalog, ActionSpec};
pub use error::{KpiBreach, PolicyError};
pub use facts::MissingThresholdPolicy;
pub use kill_switch::{KillSwitchConfig, KillSwitchService};
pub use kpi::{KpiCorridor, KpiObservation, KpiService};
pub use license::{FirearmBinding, GranteeKind, LicenseGrant, LicenseService};
pub use rate_limit::{RateLimitEntry, RateLimitPolicy, RateLimiter};
pub use resolver::{Resolver, ResolverChain, StaticResolver};
pub use temperature::{MetricBand, TemperatureSample, TemperatureService, TemperatureSnapshot, TemperatureThresholds};

/// Resource kinds the policy facts are routed under.
pub mod kinds {
    pub const KILL_SWITCH: &str = "kill_switch";
    pub const FIREARMS: &str = "firearms";
    pub const APPROVAL: &str = "approval_locks";
    pub const BUDGET: &str = "budget";
    pub const KPI: &str = "kpi";
    pub const TEMPERATURE: &str = "temperature";
    pub const RATE_LIMITS: &str = "rate_limits";
    pub const AUDIT: &str = "audit_log";
}

/// Gate names as they appear on rejection envelopes.
pub mod gate_names {
    pub const KILL_SWITCH: &str = "kill_switch";
    pub const LICENSE: &str = "license";
    pub const APPROVAL_LOCK: &str = "approval_lock";
    pub const BUDGET: &str = "budget";
    pub const KPI: &str = "kpi";
    pub const TEMPERATURE: &str = "temperature";
    pub const RATE_LIMIT: &str = "rate_limit";
    pub const AUDIT: &str = "audit";
}
