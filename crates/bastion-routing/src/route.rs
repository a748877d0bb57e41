use bastion_kv::BackendType;
use bastion_types::TenantId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::RoutingError;

/// Service tier a route was provisioned for.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    #[default]
    Standard,
    Premium,
    Isolated,
}

/// Last observed health of the backend behind a route.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    #[default]
    Unknown,
    Healthy,
    Degraded,
    Unavailable,
}

/// Identity of a route. Only one active route exists per key.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RouteKey {
    pub resource_kind: String,
    pub tenant_id: String,
    pub env: String,
    pub project_id: Option<String>,
}

impl RouteKey {
    pub fn new(
        resource_kind: impl Into<String>,
        tenant_id: impl Into<String>,
        env: impl Into<String>,
        project_id: Option<&str>,
    ) -> Self {
        Self {
            resource_kind: resource_kind.into(),
            tenant_id: tenant_id.into(),
            env: env.into(),
            project_id: project_id.map(str::to_string),
        }
    }

    /// The same key without a project, i.e. the tenant-wide fallback.
    pub fn tenant_wide(&self) -> Self {
        Self {
            project_id: None,
            ..self.clone()
        }
    }

    /// Persisted key: `{kind}#{tenant}#{env}#{project|_}`.
    pub(crate) fn storage_key(&self) -> String {
        format!(
            "{}#{}#{}#{}",
            self.resource_kind,
            self.tenant_id,
            self.env,
            self.project_id.as_deref().unwrap_or("_")
        )
    }
}

/// Resolved mapping from a resource kind + scope to a backend.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResourceRoute {
    pub id: String,
    pub resource_kind: String,
    pub tenant_id: String,
    pub env: String,
    pub project_id: Option<String>,
    pub surface_id: Option<String>,
    pub backend_type: BackendType,
    /// Backend parameters. May hold credentials; never rendered in errors.
    pub config: Value,
    pub required: bool,
    pub tier: Tier,
    pub health_status: HealthStatus,
    pub previous_backend_type: Option<BackendType>,
    pub switch_rationale: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ResourceRoute {
    pub fn key(&self) -> RouteKey {
        RouteKey {
            resource_kind: self.resource_kind.clone(),
            tenant_id: self.tenant_id.clone(),
            env: self.env.clone(),
            project_id: self.project_id.clone(),
        }
    }
}

/// Operator input for creating or updating a route.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RouteSpec {
    pub resource_kind: String,
    pub tenant_id: String,
    pub env: String,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub surface_id: Option<String>,
    pub backend_type: BackendType,
    #[serde(default)]
    pub config: Value,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub tier: Tier,
    #[serde(default)]
    pub health_status: HealthStatus,
}

impl RouteSpec {
    pub fn new(
        resource_kind: impl Into<String>,
        tenant_id: impl Into<String>,
        env: impl Into<String>,
        backend_type: BackendType,
    ) -> Self {
        Self {
            resource_kind: resource_kind.into(),
            tenant_id: tenant_id.into(),
            env: env.into(),
            project_id: None,
            surface_id: None,
            backend_type,
            config: Value::Null,
            required: false,
            tier: Tier::Standard,
            health_status: HealthStatus::Unknown,
        }
    }

    pub fn project(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }

    pub fn config(mut self, config: Value) -> Self {
        self.config = config;
        self
    }

    pub fn required(mut self, required: bool) -> Self {
        self.required = required;
        self
    }

    pub fn key(&self) -> RouteKey {
        RouteKey {
            resource_kind: self.resource_kind.clone(),
            tenant_id: self.tenant_id.clone(),
            env: self.env.clone(),
            project_id: self.project_id.clone(),
        }
    }

    pub(crate) fn validate(&self) -> Result<(), RoutingError> {
        let token = |s: &str| {
            !s.is_empty()
                && s
                    .chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
        };
        if !token(&self.resource_kind) {
            return Err(RoutingError::InvalidRoute(format!(
                "resource kind `{}` must be a lowercase token",
                self.resource_kind
            )));
        }
        TenantId::parse(self.tenant_id.as_str())
            .map_err(|e| RoutingError::InvalidRoute(e.to_string()))?;
        if !token(&self.env) {
            return Err(RoutingError::InvalidRoute("env must be a lowercase token".into()));
        }
        if matches!(self.project_id.as_deref(), Some(p) if p.is_empty() || p.contains('#')) {
            return Err(RoutingError::InvalidRoute("project id is malformed".into()));
        }
        if !(self.config.is_null() || self.config.is_object()) {
            return Err(RoutingError::InvalidRoute("config must be an object".into()));
        }
        Ok(())
    }
}

/// Filter for [`crate::RoutingRegistry::list_routes`]. Empty fields match all.
#[derive(Clone, Debug, Default)]
pub struct RouteFilter {
    pub resource_kind: Option<String>,
    pub tenant_id: Option<String>,
    pub env: Option<String>,
    pub backend_type: Option<BackendType>,
}

impl RouteFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_resource_kind(mut self, kind: impl Into<String>) -> Self {
        self.resource_kind = Some(kind.into());
        self
    }

    pub fn with_tenant(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }

    pub fn with_env(mut self, env: impl Into<String>) -> Self {
        self.env = Some(env.into());
        self
    }

    pub fn with_backend_type(mut self, backend_type: BackendType) -> Self {
        self.backend_type = Some(backend_type);
        self
    }

    pub fn matches(&self, route: &ResourceRoute) -> bool {
        self.resource_kind
            .as_deref()
            .map_or(true, |k| k == route.resource_kind)
            && self.tenant_id.as_deref().map_or(true, |t| t == route.tenant_id)
            && self.env.as_deref().map_or(true, |e| e == route.env)
            && self.backend_type.map_or(true, |b| b == route.backend_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_rejects_bad_input() {
        let ok = RouteSpec::new("pages", "t_demo", "dev", BackendType::Memory);
        assert!(ok.validate().is_ok());

        let bad_tenant = RouteSpec::new("pages", "demo", "dev", BackendType::Memory);
        assert!(bad_tenant.validate().is_err());

        let bad_config = RouteSpec::new("pages", "t_demo", "dev", BackendType::Memory)
            .config(serde_json::json!("root"));
        assert!(bad_config.validate().is_err());
    }

    #[test]
    fn storage_key_marks_missing_project() {
        let key = RouteKey::new("pages", "t_demo", "dev", None);
        assert_eq!(key.storage_key(), "pages#t_demo#dev#_");
        let scoped = RouteKey::new("pages", "t_demo", "dev", Some("p1"));
        assert_eq!(scoped.tenant_wide(), key);
    }
}
