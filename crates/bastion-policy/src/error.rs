use bastion_kv::KvError;
use bastion_routing::RoutingError;
use bastion_store::StoreError;
use bastion_types::{ErrorEnvelope, ErrorKind, ToEnvelope};
use serde::Serialize;
use thiserror::Error;

use crate::gate_names;

/// One KPI outside its corridor.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct KpiBreach {
    pub kpi_name: String,
    pub value: f64,
    pub floor: Option<f64>,
    pub ceiling: Option<f64>,
}

/// Errors from the policy services.
///
/// Rejections carry the gate that produced them and the minimum detail a
/// caller needs to remediate. Missing-configuration variants name the
/// surface, never a backend value.
#[derive(Error, Debug)]
pub enum PolicyError {
    #[error("action `{action}` is disabled by the kill switch: {reason}")]
    KillSwitchBlocked {
        action: String,
        reason: String,
        provider: Option<String>,
    },

    #[error("action `{action}` requires licenses: {}", .required_licenses.join(", "))]
    LicenseRequired {
        action: String,
        required_licenses: Vec<String>,
    },

    #[error("action `{action}` on surface `{surface}` requires an approved strategy lock")]
    StrategyLockRequired {
        action: String,
        surface: String,
        reason: String,
    },

    #[error("no budget threshold configured for surface `{surface}`")]
    BudgetThresholdMissing { surface: String },

    #[error("budget for surface `{surface}` would be exceeded ({projected} > {threshold})")]
    BudgetThresholdExceeded {
        surface: String,
        threshold: f64,
        usage: f64,
        projected: f64,
    },

    #[error("hard limit for {provider}/{metric} would be exceeded ({projected} > {hard_limit})")]
    BudgetLimitExceeded {
        provider: String,
        metric: String,
        hard_limit: f64,
        projected: f64,
    },

    #[error("no KPI corridor configured for surface `{surface}`")]
    KpiThresholdMissing { surface: String },

    #[error("KPIs outside their corridor on surface `{surface}`")]
    KpiBreached { surface: String, kpis: Vec<KpiBreach> },

    #[error("temperature breach on surface `{surface}`: {}", .metrics.join(", "))]
    TemperatureBreach { surface: String, metrics: Vec<String> },

    #[error("rate limit of {limit} per {window_secs}s reached for `{action}`")]
    RateLimited {
        action: String,
        limit: u32,
        window_secs: u64,
        retry_after_secs: u64,
    },

    #[error("{what} `{id}` not found")]
    NotFound { what: &'static str, id: String },

    #[error("invalid policy input: {0}")]
    InvalidInput(String),

    /// Another writer took the slot this write was about to fill.
    #[error("{0}")]
    Conflict(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Routing(#[from] RoutingError),

    #[error(transparent)]
    Backend(#[from] KvError),
}

impl ToEnvelope for PolicyError {
    fn to_envelope(&self) -> ErrorEnvelope {
        let message = self.to_string();
        match self {
            PolicyError::KillSwitchBlocked {
                action,
                reason,
                provider,
            } => {
                let envelope =
                    ErrorEnvelope::new(ErrorKind::PolicyRejection, "kill_switch_blocked", message)
                        .with_gate(gate_names::KILL_SWITCH)
                        .with_action(action.clone())
                        .with_detail("reason", reason.clone());
                match provider {
                    Some(provider) => envelope.with_detail("provider", provider.clone()),
                    None => envelope,
                }
            }
            PolicyError::LicenseRequired {
                action,
                required_licenses,
            } => ErrorEnvelope::new(
                ErrorKind::PolicyRejection,
                "firearms.license_required",
                message,
            )
            .with_gate(gate_names::LICENSE)
            .with_action(action.clone())
            .with_detail("required_licenses", required_licenses.clone()),
            PolicyError::StrategyLockRequired {
                action,
                surface,
                reason,
            } => ErrorEnvelope::new(ErrorKind::PolicyRejection, "strategy_lock_required", message)
                .with_gate(gate_names::APPROVAL_LOCK)
                .with_action(action.clone())
                .with_detail("surface", surface.clone())
                .with_detail("reason", reason.clone()),
            PolicyError::BudgetThresholdMissing { surface } => ErrorEnvelope::new(
                ErrorKind::MissingConfiguration,
                "budget_threshold_missing",
                message,
            )
            .with_gate(gate_names::BUDGET)
            .with_detail("surface", surface.clone()),
            PolicyError::BudgetThresholdExceeded {
                surface,
                threshold,
                usage,
                projected,
            } => ErrorEnvelope::new(
                ErrorKind::PolicyRejection,
                "budget_threshold_exceeded",
                message,
            )
            .with_gate(gate_names::BUDGET)
            .with_detail("surface", surface.clone())
            .with_detail("threshold", *threshold)
            .with_detail("usage", *usage)
            .with_detail("projected", *projected),
            PolicyError::BudgetLimitExceeded {
                provider,
                metric,
                hard_limit,
                projected,
            } => ErrorEnvelope::new(ErrorKind::PolicyRejection, "budget_limit_exceeded", message)
                .with_gate(gate_names::BUDGET)
                .with_detail("provider", provider.clone())
                .with_detail("metric", metric.clone())
                .with_detail("hard_limit", *hard_limit)
                .with_detail("projected", *projected),
            PolicyError::KpiThresholdMissing { surface } => ErrorEnvelope::new(
                ErrorKind::MissingConfiguration,
                "kpi_threshold_missing",
                message,
            )
            .with_gate(gate_names::KPI)
            .with_detail("surface", surface.clone()),
            PolicyError::KpiBreached { surface, kpis } => {
                ErrorEnvelope::new(ErrorKind::PolicyRejection, "temperature_breach", message)
                    .with_gate(gate_names::KPI)
                    .with_detail("surface", surface.clone())
                    .with_detail(
                        "kpis",
                        serde_json::to_value(kpis).unwrap_or(serde_json::Value::Null),
                    )
            }
            PolicyError::TemperatureBreach { surface, metrics } => {
                ErrorEnvelope::new(ErrorKind::PolicyRejection, "temperature_breach", message)
                    .with_gate(gate_names::TEMPERATURE)
                    .with_detail("surface", surface.clone())
                    .with_detail("metrics", metrics.clone())
            }
            PolicyError::RateLimited {
                action,
                limit,
                window_secs,
                retry_after_secs,
            } => ErrorEnvelope::new(ErrorKind::RateLimited, "rate_limited", message)
                .with_gate(gate_names::RATE_LIMIT)
                .with_action(action.clone())
                .with_detail("limit", *limit)
                .with_detail("window_secs", *window_secs)
                .with_detail("retry_after_secs", *retry_after_secs),
            PolicyError::NotFound { what, id } => {
                ErrorEnvelope::new(ErrorKind::NotFound, "policy.not_found", message)
                    .with_detail("what", *what)
                    .with_detail("id", id.clone())
            }
            PolicyError::InvalidInput(_) => {
                ErrorEnvelope::new(ErrorKind::InvalidInput, "policy.invalid_input", message)
            }
            PolicyError::Conflict(_) => ErrorEnvelope::new(ErrorKind::Conflict, "policy.conflict", message),
            PolicyError::Store(err) => err.to_envelope(),
            PolicyError::Routing(err) => err.to_envelope(),
            PolicyError::Backend(err) => err.to_envelope(),
        }
    }
}
