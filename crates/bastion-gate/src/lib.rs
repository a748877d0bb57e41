//! Gate chain run before every guarded mutation.
//!
//! ## Canonical order
//!
//! 1. **Kill switch**: emergency disable list
//! 2. **License**: firearm grants for bound actions
//! 3. **Approval lock**: approved strategy lock for lock-requiring actions
//! 4. **Budget**: surface spend cap (metric)
//! 5. **KPI**: KPI corridors (metric)
//! 6. **Temperature**: windowed anomaly bands (metric)
//! 7. **Rate limit**: optional fixed-window admission
//! 8. **Audit**: one hash-chained record per run, pass or fail
//!
//! The first failing gate ends the run. Metric gates are skipped when the
//! caller asks for `skip_metrics`. A chain whose gates are missing,
//! duplicated or out of order refuses to build.
//!
//! The chain never touches the guarded resource; callers mutate only after
//! [`GateChain::run`] returns `Ok`.

#![deny(unsafe_code)]
#![warn(rust_2018_idioms)]

pub mod chain;
pub mod context;
pub mod error;
pub mod mocks;
pub mod stages;
pub mod traits;

pub use chain::{GateChain, GateServices};
pub use context::{GateReport, GateRequest};
pub use error::GateError;
pub use mocks::MockGate;
pub use stages::{
    ApprovalLockGate, BudgetGate, KillSwitchGate, KpiGate, LicenseGate, RateLimitGate,
    TemperatureGate,
};
pub use traits::{Gate, GateKind};
