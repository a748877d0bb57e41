use std::marker::PhantomData;
use std::sync::Arc;

use bastion_kv::{decode, encode, KeyedLocks, KvBackend};
use bastion_routing::BackendResolver;
use bastion_types::scope::KEY_SEPARATOR;
use bastion_types::{RequestContext, ScopeConfig};
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::StoreError;
use crate::record::VersionedRecord;

const LATEST_SUFFIX: &str = "#latest";

/// Versioned CRUD for one resource kind.
///
/// The backend is resolved through the routing registry on every call, so a
/// route switch takes effect without rebuilding the store.
pub struct VersionedStore<T> {
    resource_kind: String,
    table: String,
    scope: ScopeConfig,
    resolver: Arc<BackendResolver>,
    locks: KeyedLocks,
    _payload: PhantomData<fn() -> T>,
}

impl<T> VersionedStore<T>
where
    T: Serialize + DeserializeOwned + Clone + Send + Sync,
{
    pub fn new(
        resource_kind: impl Into<String>,
        table: impl Into<String>,
        scope: ScopeConfig,
        resolver: Arc<BackendResolver>,
    ) -> Self {
        Self {
            resource_kind: resource_kind.into(),
            table: table.into(),
            scope,
            resolver,
            locks: KeyedLocks::new(),
            _payload: PhantomData,
        }
    }

    pub fn resource_kind(&self) -> &str {
        &self.resource_kind
    }

    /// Create a record at version 1.
    ///
    /// Saving over a tombstone resurrects the record at `latest + 1` and keeps
    /// its history and `created_at`.
    pub async fn save_new(
        &self,
        ctx: &RequestContext,
        id: &str,
        payload: T,
    ) -> Result<VersionedRecord<T>, StoreError> {
        let base = self.record_base(ctx, id)?;
        let backend = self.backend(ctx).await?;
        let _guard = self.locks.lock(&base).await;

        let now = Utc::now();
        let (version, created_at) = match self.read_latest(&*backend, &base, true).await? {
            Some(existing) if existing.is_live() => {
                return Err(StoreError::RecordExists {
                    resource_kind: self.resource_kind.clone(),
                    id: id.to_string(),
                });
            }
            Some(tombstone) => {
                debug!(
                    resource_kind = %self.resource_kind,
                    id,
                    version = tombstone.version + 1,
                    "Resurrecting tombstoned record"
                );
                (tombstone.version + 1, tombstone.created_at)
            }
            None => (1, now),
        };

        let record = VersionedRecord {
            id: id.to_string(),
            version,
            created_at,
            updated_at: now,
            deleted: false,
            payload,
        };
        self.commit(&*backend, &base, &record).await?;
        Ok(record)
    }

    /// Write the next version of an existing record.
    pub async fn bump_version(
        &self,
        ctx: &RequestContext,
        id: &str,
        payload: T,
        deleted: bool,
    ) -> Result<VersionedRecord<T>, StoreError> {
        self.bump(ctx, id, None, payload, deleted).await
    }

    /// Like [`Self::bump_version`], but only if the latest version is still
    /// `expected`. A stale caller gets `version_conflict`.
    pub async fn bump_version_if(
        &self,
        ctx: &RequestContext,
        id: &str,
        expected: u64,
        payload: T,
        deleted: bool,
    ) -> Result<VersionedRecord<T>, StoreError> {
        self.bump(ctx, id, Some(expected), payload, deleted).await
    }

    /// Tombstone the record, carrying its last payload forward.
    pub async fn delete(&self, ctx: &RequestContext, id: &str) -> Result<VersionedRecord<T>, StoreError> {
        let base = self.record_base(ctx, id)?;
        let backend = self.backend(ctx).await?;
        let _guard = self.locks.lock(&base).await;

        let latest = self
            .read_latest(&*backend, &base, true)
            .await?
            .ok_or_else(|| self.not_found(id))?;
        let record = self.next_version(latest.clone(), latest.payload, true);
        self.commit(&*backend, &base, &record).await?;
        Ok(record)
    }

    pub async fn get_latest(
        &self,
        ctx: &RequestContext,
        id: &str,
    ) -> Result<Option<VersionedRecord<T>>, StoreError> {
        let base = self.record_base(ctx, id)?;
        let backend = self.backend(ctx).await?;
        self.read_latest(&*backend, &base, false).await
    }

    pub async fn get_version(
        &self,
        ctx: &RequestContext,
        id: &str,
        version: u64,
    ) -> Result<Option<VersionedRecord<T>>, StoreError> {
        let base = self.record_base(ctx, id)?;
        let backend = self.backend(ctx).await?;
        match backend.get(&self.table, &version_key(&base, version)).await? {
            Some(value) => Ok(Some(decode(value)?)),
            None => Ok(None),
        }
    }

    /// Latest version of every record in scope, ordered by id.
    pub async fn list_latest(
        &self,
        ctx: &RequestContext,
        include_deleted: bool,
    ) -> Result<Vec<VersionedRecord<T>>, StoreError> {
        let mut prefix = self.scope.prefix(ctx)?;
        prefix.push(KEY_SEPARATOR);
        let backend = self.backend(ctx).await?;

        let mut records = Vec::new();
        for (key, value) in backend.scan_prefix(&self.table, &prefix).await? {
            let is_pointer = key[prefix.len()..]
                .strip_suffix(LATEST_SUFFIX)
                .is_some_and(|id| !id.is_empty() && !id.contains(KEY_SEPARATOR));
            if !is_pointer {
                continue;
            }
            let record: VersionedRecord<T> = decode(value)?;
            if include_deleted || record.is_live() {
                records.push(record);
            }
        }
        records.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(records)
    }

    /// Every version of `id`, ascending.
    pub async fn list_versions(
        &self,
        ctx: &RequestContext,
        id: &str,
    ) -> Result<Vec<VersionedRecord<T>>, StoreError> {
        let base = self.record_base(ctx, id)?;
        let backend = self.backend(ctx).await?;
        let prefix = format!("{base}#v");

        let mut versions = backend
            .scan_prefix(&self.table, &prefix)
            .await?
            .into_iter()
            .map(|(_, value)| decode::<VersionedRecord<T>>(value))
            .collect::<Result<Vec<_>, _>>()?;
        versions.sort_by_key(|r| r.version);
        Ok(versions)
    }

    async fn bump(
        &self,
        ctx: &RequestContext,
        id: &str,
        expected: Option<u64>,
        payload: T,
        deleted: bool,
    ) -> Result<VersionedRecord<T>, StoreError> {
        let base = self.record_base(ctx, id)?;
        let backend = self.backend(ctx).await?;
        let _guard = self.locks.lock(&base).await;

        let latest = self
            .read_latest(&*backend, &base, true)
            .await?
            .ok_or_else(|| self.not_found(id))?;
        if let Some(expected) = expected {
            if latest.version != expected {
                return Err(self.conflict(id, expected, latest.version));
            }
        }
        let record = self.next_version(latest, payload, deleted);
        self.commit(&*backend, &base, &record).await?;
        Ok(record)
    }

    fn next_version(&self, latest: VersionedRecord<T>, payload: T, deleted: bool) -> VersionedRecord<T> {
        VersionedRecord {
            id: latest.id,
            version: latest.version + 1,
            created_at: latest.created_at,
            updated_at: Utc::now(),
            deleted,
            payload,
        }
    }

    /// Create the immutable version entry, then move the pointer. Losing the
    /// create means another process already wrote this version.
    async fn commit(
        &self,
        backend: &dyn KvBackend,
        base: &str,
        record: &VersionedRecord<T>,
    ) -> Result<(), StoreError> {
        let value = encode(record)?;
        let created = backend
            .put_if_absent(&self.table, &version_key(base, record.version), value.clone())
            .await?;
        if !created {
            warn!(
                resource_kind = %self.resource_kind,
                id = %record.id,
                version = record.version,
                "Version entry already exists; concurrent writer won"
            );
            return Err(self.conflict(&record.id, record.version - 1, record.version));
        }
        backend
            .put(&self.table, &format!("{base}{LATEST_SUFFIX}"), value)
            .await?;

        info!(
            resource_kind = %self.resource_kind,
            id = %record.id,
            version = record.version,
            deleted = record.deleted,
            "Record version committed"
        );
        Ok(())
    }

    /// Latest record, rolled forward past version entries the pointer has
    /// not caught up with (a commit interrupted between its two writes).
    /// With `repair` set the pointer is rewritten; callers must hold the key
    /// lock to ask for that.
    async fn read_latest(
        &self,
        backend: &dyn KvBackend,
        base: &str,
        repair: bool,
    ) -> Result<Option<VersionedRecord<T>>, StoreError> {
        let pointer_key = format!("{base}{LATEST_SUFFIX}");
        let pointer: Option<VersionedRecord<T>> = match backend.get(&self.table, &pointer_key).await? {
            Some(value) => Some(decode(value)?),
            None => None,
        };

        let mut latest = pointer.clone();
        let mut next = pointer.as_ref().map_or(1, |r| r.version + 1);
        while let Some(value) = backend.get(&self.table, &version_key(base, next)).await? {
            latest = Some(decode(value)?);
            next += 1;
        }

        let pointer_version = pointer.as_ref().map(|r| r.version);
        if let Some(record) = latest.as_ref().filter(|r| Some(r.version) != pointer_version) {
            warn!(
                resource_kind = %self.resource_kind,
                id = %record.id,
                pointer = ?pointer_version,
                version = record.version,
                repair,
                "Latest pointer behind committed version"
            );
            if repair {
                backend.put(&self.table, &pointer_key, encode(record)?).await?;
            }
        }
        Ok(latest)
    }

    /// `{scope prefix}#{id}`.
    fn record_base(&self, ctx: &RequestContext, id: &str) -> Result<String, StoreError> {
        if id.is_empty() || id.contains(KEY_SEPARATOR) {
            return Err(StoreError::InvalidId);
        }
        let prefix = self.scope.prefix(ctx)?;
        Ok(format!("{prefix}{KEY_SEPARATOR}{id}"))
    }

    async fn backend(&self, ctx: &RequestContext) -> Result<Arc<dyn KvBackend>, StoreError> {
        Ok(self.resolver.resolve(&self.resource_kind, ctx).await?)
    }

    fn not_found(&self, id: &str) -> StoreError {
        StoreError::RecordNotFound {
            resource_kind: self.resource_kind.clone(),
            id: id.to_string(),
        }
    }

    fn conflict(&self, id: &str, expected: u64, actual: u64) -> StoreError {
        StoreError::VersionConflict {
            resource_kind: self.resource_kind.clone(),
            id: id.to_string(),
            expected,
            actual,
        }
    }
}

fn version_key(base: &str, version: u64) -> String {
    format!("{base}#v{version}")
}
