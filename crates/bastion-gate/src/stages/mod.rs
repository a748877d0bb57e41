pub mod approval;
pub mod budget;
pub mod kill_switch;
pub mod kpi;
pub mod license;
pub mod rate_limit;
pub mod temperature;

pub use approval::ApprovalLockGate;
pub use budget::BudgetGate;
pub use kill_switch::KillSwitchGate;
pub use kpi::KpiGate;
pub use license::LicenseGate;
pub use rate_limit::RateLimitGate;
pub use temperature::TemperatureGate;
