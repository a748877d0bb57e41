use std::marker::PhantomData;
use std::sync::Arc;

use bastion_kv::{decode, encode};
use bastion_routing::BackendResolver;
use bastion_types::scope::check_segment;
use bastion_types::{RequestContext, ScopeConfig};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use uuid::Uuid;

use crate::error::PolicyError;

/// Append-only, time-keyed event table (usage events, temperature samples).
///
/// Keys are `{scope}#{kind}#{series}#{micros:020}#{uuid}` so a prefix scan of
/// one series comes back in time order.
pub(crate) struct TimeSeries<T> {
    resolver: Arc<BackendResolver>,
    resource_kind: &'static str,
    _event: PhantomData<fn() -> T>,
}

impl<T> TimeSeries<T>
where
    T: Serialize + DeserializeOwned + Send,
{
    pub(crate) fn new(resolver: Arc<BackendResolver>, resource_kind: &'static str) -> Self {
        Self {
            resolver,
            resource_kind,
            _event: PhantomData,
        }
    }

    fn series_prefix(&self, ctx: &RequestContext, series: &str) -> Result<String, PolicyError> {
        check_segment("series", series).map_err(bastion_store::StoreError::from)?;
        let scope = ScopeConfig::PROJECT
            .prefix(ctx)
            .map_err(bastion_store::StoreError::from)?;
        Ok(format!("{scope}#{}#{series}#", self.resource_kind))
    }

    pub(crate) async fn append(
        &self,
        ctx: &RequestContext,
        series: &str,
        at: DateTime<Utc>,
        event: &T,
    ) -> Result<(), PolicyError> {
        let key = format!(
            "{}{:020}#{}",
            self.series_prefix(ctx, series)?,
            at.timestamp_micros().max(0),
            Uuid::new_v4()
        );
        let backend = self.resolver.resolve(self.resource_kind, ctx).await?;
        backend.put(self.resource_kind, &key, encode(event)?).await?;
        Ok(())
    }

    /// Events of `series` recorded at or after `since`, oldest first.
    pub(crate) async fn since(
        &self,
        ctx: &RequestContext,
        series: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<T>, PolicyError> {
        let prefix = self.series_prefix(ctx, series)?;
        let cutoff = format!("{prefix}{:020}", since.timestamp_micros().max(0));
        let backend = self.resolver.resolve(self.resource_kind, ctx).await?;

        backend
            .scan_prefix(self.resource_kind, &prefix)
            .await?
            .into_iter()
            .filter(|(key, _)| key.as_str() >= cutoff.as_str())
            .map(|(_, value)| decode(value).map_err(PolicyError::from))
            .collect()
    }
}
