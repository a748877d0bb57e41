use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::context::RequestContext;
use crate::error::{ErrorEnvelope, ErrorKind, ToEnvelope};

/// Separator between key segments. Segments themselves may never contain it.
pub const KEY_SEPARATOR: char = '#';

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScopeError {
    #[error("scope field `{field}` is required by this store but absent from the request")]
    MissingField { field: &'static str },

    #[error("key segment `{field}` contains the reserved separator")]
    ReservedSeparator { field: &'static str },
}

impl ToEnvelope for ScopeError {
    fn to_envelope(&self) -> ErrorEnvelope {
        match self {
            ScopeError::MissingField { field } => {
                ErrorEnvelope::new(ErrorKind::InvalidInput, "scope.missing_field", self.to_string())
                    .with_detail("field", *field)
            }
            ScopeError::ReservedSeparator { field } => ErrorEnvelope::new(
                ErrorKind::InvalidInput,
                "scope.reserved_separator",
                self.to_string(),
            )
            .with_detail("field", *field),
        }
    }
}

/// Which optional scope fields participate in a store's keys.
///
/// Tenant, mode, env and project are always part of the prefix.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeConfig {
    #[serde(default)]
    pub surface: bool,
    #[serde(default)]
    pub app: bool,
    #[serde(default)]
    pub user: bool,
}

impl ScopeConfig {
    /// Tenant/mode/env/project only.
    pub const PROJECT: ScopeConfig = ScopeConfig {
        surface: false,
        app: false,
        user: false,
    };

    pub fn with_surface(mut self) -> Self {
        self.surface = true;
        self
    }

    pub fn with_app(mut self) -> Self {
        self.app = true;
        self
    }

    pub fn with_user(mut self) -> Self {
        self.user = true;
        self
    }

    /// `{tenant}#{mode}#{env}#{project}[#{surface}][#{app}][#{user}]`.
    ///
    /// Fails fast when a configured field is absent instead of defaulting.
    pub fn prefix(&self, ctx: &RequestContext) -> Result<String, ScopeError> {
        let mut prefix = ctx.tenant_prefix();
        push_segment(&mut prefix, "project_id", ctx.project_id())?;

        if self.surface {
            let surface = ctx
                .surface_id()
                .ok_or(ScopeError::MissingField { field: "surface_id" })?;
            push_segment(&mut prefix, "surface_id", surface)?;
        }
        if self.app {
            let app = ctx
                .app_id()
                .ok_or(ScopeError::MissingField { field: "app_id" })?;
            push_segment(&mut prefix, "app_id", app)?;
        }
        if self.user {
            let user = ctx
                .user_id()
                .ok_or(ScopeError::MissingField { field: "user_id" })?;
            push_segment(&mut prefix, "user_id", user)?;
        }
        Ok(prefix)
    }
}

/// Reject values that would corrupt the `#`-delimited key layout.
pub fn check_segment(field: &'static str, value: &str) -> Result<(), ScopeError> {
    if value.contains(KEY_SEPARATOR) {
        Err(ScopeError::ReservedSeparator { field })
    } else {
        Ok(())
    }
}

fn push_segment(prefix: &mut String, field: &'static str, value: &str) -> Result<(), ScopeError> {
    check_segment(field, value)?;
    prefix.push(KEY_SEPARATOR);
    prefix.push_str(value);
    Ok(())
}
