//! Firearm licenses: capabilities that must be explicitly granted to an
//! actor before a bound action may run.

use std::sync::Arc;

use bastion_routing::BackendResolver;
use bastion_store::{VersionedRecord, VersionedStore};
use bastion_types::{RequestContext, ScopeConfig};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::catalog::ActionCatalog;
use crate::error::PolicyError;
use crate::facts;
use crate::kinds;

/// `action_name` may only run with a live grant of `firearm_id`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirearmBinding {
    pub action_name: String,
    pub firearm_id: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GranteeKind {
    User,
    Agent,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LicenseGrant {
    pub grant_id: String,
    pub firearm_id: String,
    pub grantee: String,
    pub grantee_kind: GranteeKind,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub revoked: bool,
}

impl LicenseGrant {
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        !self.revoked && self.expires_at.map_or(true, |exp| exp > now)
    }
}

pub struct LicenseService {
    bindings: VersionedStore<FirearmBinding>,
    grants: VersionedStore<LicenseGrant>,
    catalog: Arc<ActionCatalog>,
}

impl LicenseService {
    pub fn new(resolver: Arc<BackendResolver>, catalog: Arc<ActionCatalog>) -> Self {
        Self {
            bindings: VersionedStore::new(
                kinds::FIREARMS,
                "firearm_bindings",
                ScopeConfig::PROJECT,
                Arc::clone(&resolver),
            ),
            grants: VersionedStore::new(kinds::FIREARMS, "license_grants", ScopeConfig::PROJECT, resolver),
            catalog,
        }
    }

    pub async fn bind(
        &self,
        ctx: &RequestContext,
        binding: FirearmBinding,
    ) -> Result<VersionedRecord<FirearmBinding>, PolicyError> {
        let id = binding_id(&binding.action_name, &binding.firearm_id);
        info!(action = %binding.action_name, firearm_id = %binding.firearm_id, "Firearm bound to action");
        Ok(facts::upsert(&self.bindings, ctx, &id, binding).await?)
    }

    pub async fn unbind(&self, ctx: &RequestContext, action_name: &str, firearm_id: &str) -> Result<(), PolicyError> {
        self.bindings
            .delete(ctx, &binding_id(action_name, firearm_id))
            .await?;
        Ok(())
    }

    /// Firearm ids bound to `action`, sorted.
    pub async fn required_firearms(&self, ctx: &RequestContext, action: &str) -> Result<Vec<String>, PolicyError> {
        let mut firearms: Vec<String> = self
            .bindings
            .list_latest(ctx, false)
            .await?
            .into_iter()
            .filter(|r| r.payload.action_name == action)
            .map(|r| r.payload.firearm_id)
            .collect();
        firearms.sort();
        firearms.dedup();
        Ok(firearms)
    }

    pub async fn grant(
        &self,
        ctx: &RequestContext,
        grant: LicenseGrant,
    ) -> Result<VersionedRecord<LicenseGrant>, PolicyError> {
        if grant.grantee.trim().is_empty() {
            return Err(PolicyError::InvalidInput("grantee is required".into()));
        }
        let id = grant.grant_id.clone();
        info!(
            grant_id = %id,
            firearm_id = %grant.firearm_id,
            grantee = %grant.grantee,
            "License granted"
        );
        Ok(self.grants.save_new(ctx, &id, grant).await?)
    }

    pub async fn revoke(&self, ctx: &RequestContext, grant_id: &str) -> Result<VersionedRecord<LicenseGrant>, PolicyError> {
        let mut grant = facts::live(&self.grants, ctx, grant_id)
            .await?
            .ok_or_else(|| PolicyError::NotFound {
                what: "license grant",
                id: grant_id.to_string(),
            })?;
        grant.revoked = true;
        info!(grant_id, "License revoked");
        Ok(self.grants.bump_version(ctx, grant_id, grant, false).await?)
    }

    /// Grants of `firearm_id` usable by the caller right now.
    pub async fn active_grants(
        &self,
        ctx: &RequestContext,
        firearm_id: &str,
    ) -> Result<Vec<LicenseGrant>, PolicyError> {
        let callers = ctx.caller_ids();
        let now = Utc::now();
        Ok(self
            .grants
            .list_latest(ctx, false)
            .await?
            .into_iter()
            .map(|r| r.payload)
            .filter(|g| g.firearm_id == firearm_id && g.is_active_at(now))
            .filter(|g| callers.contains(&g.grantee.as_str()))
            .collect())
    }

    /// Pass when every firearm bound to `action` has an active grant for the
    /// caller. Unbound actions pass, dangerous or not.
    pub async fn evaluate(&self, ctx: &RequestContext, action: &str) -> Result<(), PolicyError> {
        let required = self.required_firearms(ctx, action).await?;
        if required.is_empty() {
            if self.catalog.is_dangerous(action) {
                debug!(action, "Dangerous action has no firearm binding");
            }
            return Ok(());
        }

        let callers = ctx.caller_ids();
        let now = Utc::now();
        let grants: Vec<LicenseGrant> = self
            .grants
            .list_latest(ctx, false)
            .await?
            .into_iter()
            .map(|r| r.payload)
            .filter(|g| g.is_active_at(now) && callers.contains(&g.grantee.as_str()))
            .collect();

        let missing: Vec<String> = required
            .into_iter()
            .filter(|firearm| !grants.iter().any(|g| &g.firearm_id == firearm))
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            debug!(action, missing = ?missing, "License check failed");
            Err(PolicyError::LicenseRequired {
                action: action.to_string(),
                required_licenses: missing,
            })
        }
    }
}

fn binding_id(action_name: &str, firearm_id: &str) -> String {
    format!("{action_name}@{firearm_id}")
}
