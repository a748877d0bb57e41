use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

use crate::error::{ErrorEnvelope, ErrorKind, ToEnvelope};

/// Mode aliases accepted by older clients. They are rejected rather than
/// silently mapped so that stale callers surface instead of writing under
/// a different key prefix.
const LEGACY_MODE_ALIASES: &[&str] = &["prod", "production", "sandbox", "demo", "enterprise_lab", "sme"];

/// Errors raised while building a [`RequestContext`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ContextError {
    #[error("invalid tenant id: {0}")]
    InvalidTenant(String),

    #[error("unknown mode: {0}")]
    InvalidMode(String),

    #[error("legacy mode alias is no longer accepted: {0}")]
    LegacyMode(String),

    #[error("invalid env: {0}")]
    InvalidEnv(String),

    #[error("missing required field: {0}")]
    MissingField(&'static str),
}

impl ToEnvelope for ContextError {
    fn to_envelope(&self) -> ErrorEnvelope {
        let code = match self {
            ContextError::InvalidTenant(_) => "context.invalid_tenant",
            ContextError::InvalidMode(_) => "context.invalid_mode",
            ContextError::LegacyMode(_) => "context.legacy_mode",
            ContextError::InvalidEnv(_) => "context.invalid_env",
            ContextError::MissingField(_) => "context.missing_field",
        };
        let envelope = ErrorEnvelope::new(ErrorKind::InvalidInput, code, self.to_string());
        match self {
            ContextError::MissingField(field) => envelope.with_detail("field", *field),
            _ => envelope,
        }
    }
}

/// Tenant identifier, `t_[a-z0-9_-]+`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TenantId(String);

impl TenantId {
    pub fn parse(raw: impl Into<String>) -> Result<Self, ContextError> {
        let raw = raw.into();
        let valid = raw
            .strip_prefix("t_")
            .map(|rest| {
                !rest.is_empty()
                    && rest
                        .chars()
                        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
            })
            .unwrap_or(false);
        if valid {
            Ok(Self(raw))
        } else {
            Err(ContextError::InvalidTenant(raw))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for TenantId {
    type Error = ContextError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        TenantId::parse(value)
    }
}

impl From<TenantId> for String {
    fn from(value: TenantId) -> Self {
        value.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Deployment mode of the tenant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Saas,
    Enterprise,
    Lab,
}

impl Mode {
    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Saas => "saas",
            Mode::Enterprise => "enterprise",
            Mode::Lab => "lab",
        }
    }
}

impl FromStr for Mode {
    type Err = ContextError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "saas" => Ok(Mode::Saas),
            "enterprise" => Ok(Mode::Enterprise),
            "lab" => Ok(Mode::Lab),
            other if LEGACY_MODE_ALIASES.contains(&other) => {
                Err(ContextError::LegacyMode(other.to_string()))
            }
            other => Err(ContextError::InvalidMode(other.to_string())),
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity and scope fields as asserted by a client.
///
/// Only the non-identity selectors (`surface_id`, `app_id`) are ever adopted.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ClientClaims {
    pub tenant_id: Option<String>,
    pub user_id: Option<String>,
    pub membership_role: Option<String>,
    pub surface_id: Option<String>,
    pub app_id: Option<String>,
}

/// Per-call scope. Immutable once built.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestContext {
    tenant_id: TenantId,
    mode: Mode,
    env: String,
    project_id: String,
    surface_id: Option<String>,
    app_id: Option<String>,
    user_id: Option<String>,
    membership_role: Option<String>,
    agent_id: Option<String>,
    autonomous: bool,
    trace_id: String,
}

impl RequestContext {
    pub fn builder(
        tenant_id: impl Into<String>,
        mode: impl AsRef<str>,
        env: impl Into<String>,
        project_id: impl Into<String>,
    ) -> RequestContextBuilder {
        RequestContextBuilder {
            tenant_id: tenant_id.into(),
            mode: mode.as_ref().to_string(),
            env: env.into(),
            project_id: project_id.into(),
            surface_id: None,
            app_id: None,
            user_id: None,
            membership_role: None,
            agent_id: None,
            autonomous: false,
            trace_id: None,
        }
    }

    pub fn tenant_id(&self) -> &TenantId {
        &self.tenant_id
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn env(&self) -> &str {
        &self.env
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn surface_id(&self) -> Option<&str> {
        self.surface_id.as_deref()
    }

    pub fn app_id(&self) -> Option<&str> {
        self.app_id.as_deref()
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    pub fn membership_role(&self) -> Option<&str> {
        self.membership_role.as_deref()
    }

    pub fn agent_id(&self) -> Option<&str> {
        self.agent_id.as_deref()
    }

    /// True when an agent is acting without a human in the loop.
    pub fn is_autonomous(&self) -> bool {
        self.autonomous
    }

    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    /// Actor identifiers a license grant may be issued to, agent first.
    pub fn caller_ids(&self) -> Vec<&str> {
        self.agent_id
            .as_deref()
            .into_iter()
            .chain(self.user_id.as_deref())
            .collect()
    }

    /// `{tenant}#{mode}#{env}`: the prefix shared by every persisted key.
    pub fn tenant_prefix(&self) -> String {
        format!("{}#{}#{}", self.tenant_id, self.mode, self.env)
    }

    /// Merge client-asserted claims into a copy of this context.
    ///
    /// Identity fields always come from the server; a disagreeing claim is
    /// logged and dropped.
    pub fn with_client_claims(&self, claims: &ClientClaims) -> RequestContext {
        let mut merged = self.clone();

        if let Some(claimed) = claims.tenant_id.as_deref() {
            if claimed != self.tenant_id.as_str() {
                warn!(
                    trace_id = %self.trace_id,
                    server = %self.tenant_id,
                    claimed,
                    "Ignoring client-supplied tenant id"
                );
            }
        }
        if let Some(claimed) = claims.user_id.as_deref() {
            if Some(claimed) != self.user_id.as_deref() {
                warn!(trace_id = %self.trace_id, claimed, "Ignoring client-supplied user id");
            }
        }
        if let Some(claimed) = claims.membership_role.as_deref() {
            if Some(claimed) != self.membership_role.as_deref() {
                warn!(trace_id = %self.trace_id, claimed, "Ignoring client-supplied membership role");
            }
        }

        if merged.surface_id.is_none() {
            merged.surface_id = claims.surface_id.clone().filter(|s| !s.is_empty());
        }
        if merged.app_id.is_none() {
            merged.app_id = claims.app_id.clone().filter(|s| !s.is_empty());
        }
        merged
    }
}

/// Validating builder for [`RequestContext`].
#[derive(Clone, Debug)]
pub struct RequestContextBuilder {
    tenant_id: String,
    mode: String,
    env: String,
    project_id: String,
    surface_id: Option<String>,
    app_id: Option<String>,
    user_id: Option<String>,
    membership_role: Option<String>,
    agent_id: Option<String>,
    autonomous: bool,
    trace_id: Option<String>,
}

impl RequestContextBuilder {
    pub fn surface(mut self, surface_id: impl Into<String>) -> Self {
        self.surface_id = Some(surface_id.into());
        self
    }

    pub fn app(mut self, app_id: impl Into<String>) -> Self {
        self.app_id = Some(app_id.into());
        self
    }

    pub fn user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn role(mut self, role: impl Into<String>) -> Self {
        self.membership_role = Some(role.into());
        self
    }

    pub fn agent(mut self, agent_id: impl Into<String>, autonomous: bool) -> Self {
        self.agent_id = Some(agent_id.into());
        self.autonomous = autonomous;
        self
    }

    pub fn trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into());
        self
    }

    pub fn build(self) -> Result<RequestContext, ContextError> {
        let tenant_id = TenantId::parse(self.tenant_id)?;
        let mode: Mode = self.mode.parse()?;

        if self.env.is_empty()
            || !self
                .env
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
        {
            return Err(ContextError::InvalidEnv(self.env));
        }
        if self.project_id.trim().is_empty() {
            return Err(ContextError::MissingField("project_id"));
        }

        Ok(RequestContext {
            tenant_id,
            mode,
            env: self.env,
            project_id: self.project_id,
            surface_id: non_empty(self.surface_id),
            app_id: non_empty(self.app_id),
            user_id: non_empty(self.user_id),
            membership_role: non_empty(self.membership_role),
            agent_id: non_empty(self.agent_id),
            autonomous: self.autonomous,
            trace_id: self
                .trace_id
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}
