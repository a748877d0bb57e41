//! Emergency per-tenant disable list.
//!
//! Blocks come from three layers, all of which apply: the surface record,
//! the tenant record and the process-wide default. A block in any layer
//! blocks the action.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use bastion_routing::BackendResolver;
use bastion_store::{VersionedRecord, VersionedStore};
use bastion_types::{RequestContext, ScopeConfig};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::catalog::ActionCatalog;
use crate::error::PolicyError;
use crate::facts;
use crate::kinds;
use crate::resolver::{Resolver, ResolverChain, StaticResolver};

const TENANT_RECORD: &str = "tenant";

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KillSwitchConfig {
    #[serde(default)]
    pub disabled_actions: BTreeSet<String>,
    #[serde(default)]
    pub disable_providers: BTreeSet<String>,
    #[serde(default)]
    pub disable_autonomy: bool,
}

impl KillSwitchConfig {
    fn merge(&mut self, other: KillSwitchConfig) {
        self.disabled_actions.extend(other.disabled_actions);
        self.disable_providers.extend(other.disable_providers);
        self.disable_autonomy |= other.disable_autonomy;
    }
}

struct RecordResolver {
    name: &'static str,
    store: Arc<VersionedStore<KillSwitchConfig>>,
    per_surface: bool,
}

#[async_trait]
impl Resolver<KillSwitchConfig> for RecordResolver {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn resolve(&self, ctx: &RequestContext, surface: &str) -> Result<Option<KillSwitchConfig>, PolicyError> {
        let id = if self.per_surface {
            surface_record(surface)
        } else {
            TENANT_RECORD.to_string()
        };
        Ok(facts::live(&self.store, ctx, &id).await?)
    }
}

fn surface_record(surface: &str) -> String {
    format!("surface.{surface}")
}

pub struct KillSwitchService {
    store: Arc<VersionedStore<KillSwitchConfig>>,
    layers: ResolverChain<KillSwitchConfig>,
    catalog: Arc<ActionCatalog>,
}

impl KillSwitchService {
    pub fn new(resolver: Arc<BackendResolver>, catalog: Arc<ActionCatalog>, default: KillSwitchConfig) -> Self {
        let store = Arc::new(VersionedStore::new(
            kinds::KILL_SWITCH,
            kinds::KILL_SWITCH,
            ScopeConfig::PROJECT,
            resolver,
        ));
        let layers = ResolverChain::new()
            .then(RecordResolver {
                name: "surface",
                store: Arc::clone(&store),
                per_surface: true,
            })
            .then(RecordResolver {
                name: "tenant",
                store: Arc::clone(&store),
                per_surface: false,
            })
            .then(StaticResolver::new("global", Some(default)));
        Self {
            store,
            layers,
            catalog,
        }
    }

    /// Replace the tenant-wide list, or the list of one surface.
    pub async fn configure(
        &self,
        ctx: &RequestContext,
        surface: Option<&str>,
        config: KillSwitchConfig,
    ) -> Result<VersionedRecord<KillSwitchConfig>, PolicyError> {
        let id = surface.map_or_else(|| TENANT_RECORD.to_string(), surface_record);
        warn!(
            tenant_id = %ctx.tenant_id(),
            record = %id,
            disabled_actions = config.disabled_actions.len(),
            disable_autonomy = config.disable_autonomy,
            "Kill switch updated"
        );
        Ok(facts::upsert(&self.store, ctx, &id, config).await?)
    }

    /// Union of every layer that applies to `surface`.
    pub async fn effective(&self, ctx: &RequestContext, surface: &str) -> Result<KillSwitchConfig, PolicyError> {
        let mut merged = KillSwitchConfig::default();
        for (layer, _) in self.layers.resolve_all(ctx, surface).await? {
            merged.merge(layer);
        }
        Ok(merged)
    }

    pub async fn evaluate(&self, ctx: &RequestContext, action: &str, surface: &str) -> Result<(), PolicyError> {
        let config = self.effective(ctx, surface).await?;
        let provider = self.catalog.provider_of(action).map(str::to_string);

        let reason = if config.disabled_actions.contains(action) {
            Some("action disabled")
        } else if provider
            .as_deref()
            .is_some_and(|p| config.disable_providers.contains(p))
        {
            Some("provider disabled")
        } else if config.disable_autonomy && (ctx.is_autonomous() || self.catalog.is_autonomous(action)) {
            Some("autonomous actions disabled")
        } else {
            None
        };

        match reason {
            Some(reason) => {
                debug!(action, surface, reason, "Kill switch blocked action");
                Err(PolicyError::KillSwitchBlocked {
                    action: action.to_string(),
                    reason: reason.to_string(),
                    provider,
                })
            }
            None => Ok(()),
        }
    }
}
