use std::collections::HashMap;

use bastion_store::{StoreError, VersionedRecord, VersionedStore};
use bastion_types::RequestContext;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Create the record or write its next version.
pub(crate) async fn upsert<T>(
    store: &VersionedStore<T>,
    ctx: &RequestContext,
    id: &str,
    payload: T,
) -> Result<VersionedRecord<T>, StoreError>
where
    T: Serialize + DeserializeOwned + Clone + Send + Sync,
{
    match store.get_latest(ctx, id).await? {
        Some(latest) if latest.is_live() => {
            store
                .bump_version_if(ctx, id, latest.version, payload, false)
                .await
        }
        _ => store.save_new(ctx, id, payload).await,
    }
}

/// Live payload of `id`, ignoring tombstones.
pub(crate) async fn live<T>(
    store: &VersionedStore<T>,
    ctx: &RequestContext,
    id: &str,
) -> Result<Option<T>, StoreError>
where
    T: Serialize + DeserializeOwned + Clone + Send + Sync,
{
    Ok(store
        .get_latest(ctx, id)
        .await?
        .filter(VersionedRecord::is_live)
        .map(|r| r.payload))
}

/// Whether an unconfigured budget or KPI threshold is tolerated.
///
/// The global flag applies to every tenant; a per-tenant entry overrides it
/// in either direction.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissingThresholdPolicy {
    #[serde(default)]
    pub allow_globally: bool,
    #[serde(default)]
    pub tenants: HashMap<String, bool>,
}

impl MissingThresholdPolicy {
    pub fn strict() -> Self {
        Self::default()
    }

    pub fn allow_all() -> Self {
        Self {
            allow_globally: true,
            tenants: HashMap::new(),
        }
    }

    pub fn with_tenant(mut self, tenant_id: impl Into<String>, allow: bool) -> Self {
        self.tenants.insert(tenant_id.into(), allow);
        self
    }

    pub fn allows(&self, tenant_id: &str) -> bool {
        self.tenants
            .get(tenant_id)
            .copied()
            .unwrap_or(self.allow_globally)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tenant_override_beats_global_flag() {
        let policy = MissingThresholdPolicy::allow_all().with_tenant("t_strict", false);
        assert!(policy.allows("t_demo"));
        assert!(!policy.allows("t_strict"));

        let policy = MissingThresholdPolicy::strict().with_tenant("t_lab", true);
        assert!(policy.allows("t_lab"));
        assert!(!policy.allows("t_demo"));
    }
}
