//! Runtime configuration.
//!
//! Layers, later wins: built-in defaults, an optional TOML file, then
//! `BASTION__<SECTION>__<FIELD>` environment variables.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use bastion_kv::BackendType;
use bastion_policy::{ApprovalPolicy, KillSwitchConfig, MissingThresholdPolicy, RateLimitPolicy};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BastionConfig {
    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub routing: RoutingConfig,

    #[serde(default)]
    pub gate: GateConfig,

    #[serde(default)]
    pub budget: BudgetConfig,

    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    #[serde(default)]
    pub telemetry: TelemetryConfig,

    /// Per-tenant settings keyed by tenant id.
    #[serde(default)]
    pub tenant_overrides: BTreeMap<String, TenantOverride>,
}

/// Default backend: holds the route table and every unrouted resource kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_backend")]
    pub backend: BackendType,

    /// Directory for the filesystem backend.
    #[serde(default)]
    pub root: Option<PathBuf>,

    /// Connection URL for the postgres backend.
    #[serde(default)]
    pub url: Option<String>,

    #[serde(default = "default_pool_size")]
    pub max_connections: u32,

    /// Deadline for every backend call; 0 disables it.
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            root: None,
            url: None,
            max_connections: default_pool_size(),
            call_timeout_ms: default_call_timeout_ms(),
        }
    }
}

impl StorageConfig {
    /// Parameters in the shape routes carry them.
    pub fn backend_config(&self) -> Value {
        match self.backend {
            BackendType::Memory => json!({}),
            BackendType::Filesystem => json!({ "root": self.root }),
            BackendType::Postgres => json!({
                "url": self.url,
                "max_connections": self.max_connections,
            }),
        }
    }

    pub fn call_timeout(&self) -> Option<Duration> {
        (self.call_timeout_ms > 0).then(|| Duration::from_millis(self.call_timeout_ms))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingConfig {
    /// Kinds that fail with `{kind}.missing_route` instead of falling back
    /// to the default backend.
    #[serde(default = "default_required_kinds")]
    pub required_kinds: Vec<String>,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            required_kinds: default_required_kinds(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateConfig {
    /// Process-wide kill switch layer, applied on top of tenant records.
    #[serde(default)]
    pub kill_switch: KillSwitchConfig,

    /// Approval policy for tenants without their own.
    #[serde(default)]
    pub approval: ApprovalPolicy,

    /// Let tenants without budget or KPI thresholds pass those gates.
    #[serde(default)]
    pub allow_missing_thresholds: bool,

    #[serde(default = "default_temperature_window_secs")]
    pub temperature_window_secs: u64,

    /// Run canvas appends without the metric gates.
    #[serde(default)]
    pub canvas_skip_metrics: bool,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            kill_switch: KillSwitchConfig::default(),
            approval: ApprovalPolicy::default(),
            allow_missing_thresholds: false,
            temperature_window_secs: default_temperature_window_secs(),
            canvas_skip_metrics: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetConfig {
    /// Threshold for surfaces without their own.
    #[serde(default)]
    pub default_threshold: Option<f64>,

    #[serde(default = "default_budget_window_secs")]
    pub window_secs: u64,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            default_threshold: None,
            window_secs: default_budget_window_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(flatten)]
    pub policy: RateLimitPolicy,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            policy: RateLimitPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Filter used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub json: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TenantOverride {
    #[serde(default)]
    pub allow_missing_thresholds: Option<bool>,
}

fn default_backend() -> BackendType {
    BackendType::Memory
}

fn default_pool_size() -> u32 {
    10
}

fn default_call_timeout_ms() -> u64 {
    5_000
}

fn default_required_kinds() -> Vec<String> {
    vec!["config_store".to_string()]
}

fn default_temperature_window_secs() -> u64 {
    15 * 60
}

fn default_budget_window_secs() -> u64 {
    24 * 60 * 60
}

fn default_log_level() -> String {
    "info".to_string()
}

impl BastionConfig {
    pub fn load(path: Option<&str>) -> anyhow::Result<Self> {
        let mut builder = config::Config::builder()
            .add_source(config::Config::try_from(&BastionConfig::default())?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("BASTION")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        builder
            .build()
            .context("failed to assemble configuration")?
            .try_deserialize()
            .context("configuration does not match the expected shape")
    }

    /// Global flag plus per-tenant overrides; the tenant value wins.
    pub fn missing_threshold_policy(&self) -> MissingThresholdPolicy {
        let base = if self.gate.allow_missing_thresholds {
            MissingThresholdPolicy::allow_all()
        } else {
            MissingThresholdPolicy::strict()
        };
        self.tenant_overrides
            .iter()
            .filter_map(|(tenant, o)| o.allow_missing_thresholds.map(|allow| (tenant, allow)))
            .fold(base, |policy, (tenant, allow)| policy.with_tenant(tenant.clone(), allow))
    }

    pub fn budget_window(&self) -> chrono::Duration {
        secs(self.budget.window_secs)
    }

    pub fn temperature_window(&self) -> chrono::Duration {
        secs(self.gate.temperature_window_secs)
    }
}

fn secs(value: u64) -> chrono::Duration {
    chrono::Duration::seconds(value.min(u64::from(u32::MAX)) as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_strict_and_in_memory() {
        let config = BastionConfig::default();
        assert_eq!(config.storage.backend, BackendType::Memory);
        assert_eq!(config.storage.call_timeout(), Some(Duration::from_secs(5)));
        assert_eq!(config.routing.required_kinds, vec!["config_store"]);
        assert!(!config.gate.allow_missing_thresholds);
        assert!(!config.rate_limit.enabled);
        assert!(!config.missing_threshold_policy().allows("t_demo"));
    }

    #[test]
    fn tenant_override_beats_global_flag() {
        let mut config = BastionConfig::default();
        config.gate.allow_missing_thresholds = true;
        config.tenant_overrides.insert(
            "t_strict".into(),
            TenantOverride {
                allow_missing_thresholds: Some(false),
            },
        );
        let policy = config.missing_threshold_policy();
        assert!(policy.allows("t_demo"));
        assert!(!policy.allows("t_strict"));
    }

    #[test]
    fn file_layer_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[storage]
backend = "filesystem"
root = "/var/lib/bastion"
call_timeout_ms = 0

[budget]
default_threshold = 25.0

[rate_limit]
enabled = true
max_requests = 10

[tenant_overrides.t_demo]
allow_missing_thresholds = true
"#
        )
        .unwrap();

        let config = BastionConfig::load(file.path().to_str()).unwrap();
        assert_eq!(config.storage.backend, BackendType::Filesystem);
        assert_eq!(config.storage.backend_config()["root"], "/var/lib/bastion");
        assert_eq!(config.storage.call_timeout(), None);
        assert_eq!(config.budget.default_threshold, Some(25.0));
        assert!(config.rate_limit.enabled);
        assert_eq!(config.rate_limit.policy.max_requests, 10);
        assert_eq!(config.rate_limit.policy.window_secs, 60);
        assert!(config.missing_threshold_policy().allows("t_demo"));
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config = BastionConfig::load(Some("/nonexistent/bastion")).unwrap();
        assert_eq!(config.telemetry.level, "info");
    }
}
