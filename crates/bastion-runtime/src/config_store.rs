//! Project configuration entries stored under the `config_store` route.
//!
//! The kind is required by default, so a tenant without a route gets
//! `config_store.missing_route` (503) from every call instead of silently
//! writing to the default backend.

use std::sync::Arc;

use bastion_routing::BackendResolver;
use bastion_store::{StoreError, VersionedRecord, VersionedStore};
use bastion_types::{RequestContext, ScopeConfig};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const CONFIG_STORE_KIND: &str = "config_store";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConfigEntry {
    pub key: String,
    pub value: Value,
}

pub struct ConfigStoreRepository {
    store: VersionedStore<ConfigEntry>,
}

impl ConfigStoreRepository {
    pub fn new(resolver: Arc<BackendResolver>) -> Self {
        Self {
            store: VersionedStore::new(CONFIG_STORE_KIND, "config_entries", ScopeConfig::PROJECT, resolver),
        }
    }

    /// Live entry for `key`.
    pub async fn get(&self, ctx: &RequestContext, key: &str) -> Result<Option<VersionedRecord<ConfigEntry>>, StoreError> {
        Ok(self.store.get_latest(ctx, key).await?.filter(VersionedRecord::is_live))
    }

    /// Create `key` or write its next version.
    pub async fn put(&self, ctx: &RequestContext, key: &str, value: Value) -> Result<VersionedRecord<ConfigEntry>, StoreError> {
        let entry = ConfigEntry {
            key: key.to_string(),
            value,
        };
        match self.store.get_latest(ctx, key).await? {
            Some(latest) if latest.is_live() => self.store.bump_version_if(ctx, key, latest.version, entry, false).await,
            _ => self.store.save_new(ctx, key, entry).await,
        }
    }

    /// Write only if the caller saw `expected` as the latest version.
    pub async fn put_if_version(
        &self,
        ctx: &RequestContext,
        key: &str,
        expected: u64,
        value: Value,
    ) -> Result<VersionedRecord<ConfigEntry>, StoreError> {
        let entry = ConfigEntry {
            key: key.to_string(),
            value,
        };
        self.store.bump_version_if(ctx, key, expected, entry, false).await
    }

    pub async fn delete(&self, ctx: &RequestContext, key: &str) -> Result<VersionedRecord<ConfigEntry>, StoreError> {
        self.store.delete(ctx, key).await
    }

    pub async fn list(&self, ctx: &RequestContext) -> Result<Vec<ConfigEntry>, StoreError> {
        Ok(self
            .store
            .list_latest(ctx, false)
            .await?
            .into_iter()
            .map(|r| r.payload)
            .collect())
    }

    pub async fn history(&self, ctx: &RequestContext, key: &str) -> Result<Vec<VersionedRecord<ConfigEntry>>, StoreError> {
        self.store.list_versions(ctx, key).await
    }
}
