//! Hash-chained audit log of gate evaluations.
//!
//! Each record commits to its predecessor through `previous_hash`, so a
//! rewritten or removed record breaks [`AuditLog::verify_chain`]. One chain
//! per `{tenant}#{mode}#{env}`.

use std::sync::Arc;

use bastion_kv::{decode, encode, KeyedLocks, KvBackend};
use bastion_routing::BackendResolver;
use bastion_types::RequestContext;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::PolicyError;
use crate::kinds;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Allowed,
    Denied,
}

/// What the caller knows about an evaluation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub action: String,
    pub surface: String,
    pub subject_type: String,
    pub subject_id: Option<String>,
    /// False when metric gates were skipped for this evaluation.
    pub persist: bool,
    pub outcome: AuditOutcome,
    pub code: Option<String>,
    pub gate: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub sequence: u64,
    pub project_id: String,
    pub user_id: Option<String>,
    #[serde(flatten)]
    pub entry: AuditEntry,
    pub trace_id: String,
    pub timestamp: DateTime<Utc>,
    pub previous_hash: Option<String>,
    pub hash: String,
}

impl AuditRecord {
    fn compute_hash(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"bastion-audit-v1:");
        hasher.update(&self.sequence.to_le_bytes());
        for field in [
            self.project_id.as_str(),
            self.user_id.as_deref().unwrap_or(""),
            self.entry.action.as_str(),
            self.entry.surface.as_str(),
            self.entry.subject_type.as_str(),
            self.entry.subject_id.as_deref().unwrap_or(""),
            self.entry.code.as_deref().unwrap_or(""),
            self.entry.gate.as_deref().unwrap_or(""),
            self.trace_id.as_str(),
            self.previous_hash.as_deref().unwrap_or(""),
        ] {
            hasher.update(&(field.len() as u64).to_le_bytes());
            hasher.update(field.as_bytes());
        }
        hasher.update(&[u8::from(self.entry.persist)]);
        hasher.update(match self.entry.outcome {
            AuditOutcome::Allowed => b"allowed",
            AuditOutcome::Denied => b"denied_",
        });
        hasher.update(self.timestamp.to_rfc3339().as_bytes());
        hasher.finalize().to_hex().to_string()
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct ChainHead {
    sequence: u64,
    hash: String,
}

pub struct AuditLog {
    resolver: Arc<BackendResolver>,
    locks: KeyedLocks,
}

impl AuditLog {
    pub fn new(resolver: Arc<BackendResolver>) -> Self {
        Self {
            resolver,
            locks: KeyedLocks::new(),
        }
    }

    pub async fn append(&self, ctx: &RequestContext, entry: AuditEntry) -> Result<AuditRecord, PolicyError> {
        let prefix = ctx.tenant_prefix();
        let head_key = format!("{prefix}#audit_head");
        let backend = self.backend(ctx).await?;
        let _guard = self.locks.lock(&head_key).await;

        let head = current_head(&*backend, &prefix, &head_key).await?;

        let mut record = AuditRecord {
            sequence: head.as_ref().map_or(1, |h| h.sequence + 1),
            project_id: ctx.project_id().to_string(),
            user_id: ctx.user_id().map(str::to_string),
            entry,
            trace_id: ctx.trace_id().to_string(),
            timestamp: Utc::now(),
            previous_hash: head.map(|h| h.hash),
            hash: String::new(),
        };
        record.hash = record.compute_hash();

        let created = backend
            .put_if_absent(kinds::AUDIT, &record_key(&prefix, record.sequence), encode(&record)?)
            .await?;
        if !created {
            warn!(sequence = record.sequence, "Audit sequence already taken");
            return Err(PolicyError::Conflict(format!(
                "audit sequence {} already written",
                record.sequence
            )));
        }
        let head = ChainHead {
            sequence: record.sequence,
            hash: record.hash.clone(),
        };
        backend.put(kinds::AUDIT, &head_key, encode(&head)?).await?;

        debug!(
            sequence = record.sequence,
            action = %record.entry.action,
            outcome = ?record.entry.outcome,
            "Audit record appended"
        );
        Ok(record)
    }

    /// Up to `limit` records, newest first.
    pub async fn list_recent(&self, ctx: &RequestContext, limit: usize) -> Result<Vec<AuditRecord>, PolicyError> {
        let prefix = format!("{}#audit#", ctx.tenant_prefix());
        let backend = self.backend(ctx).await?;
        backend
            .scan_prefix(kinds::AUDIT, &prefix)
            .await?
            .into_iter()
            .rev()
            .take(limit)
            .map(|(_, value)| decode(value).map_err(PolicyError::from))
            .collect()
    }

    /// Check hashes and links of records given oldest first.
    ///
    /// Returns the index of the first bad record.
    pub fn verify_chain(records: &[AuditRecord]) -> Result<(), usize> {
        for (i, record) in records.iter().enumerate() {
            if record.compute_hash() != record.hash {
                return Err(i);
            }
            if i > 0 && record.previous_hash.as_ref() != Some(&records[i - 1].hash) {
                return Err(i);
            }
        }
        Ok(())
    }

    async fn backend(&self, ctx: &RequestContext) -> Result<Arc<dyn KvBackend>, PolicyError> {
        Ok(self.resolver.resolve(kinds::AUDIT, ctx).await?)
    }
}

/// Chain head, advanced past records whose head update never landed.
async fn current_head(
    backend: &dyn KvBackend,
    prefix: &str,
    head_key: &str,
) -> Result<Option<ChainHead>, PolicyError> {
    let mut head = match backend.get(kinds::AUDIT, head_key).await? {
        Some(value) => Some(decode::<ChainHead>(value)?),
        None => None,
    };
    loop {
        let next = head.as_ref().map_or(1, |h| h.sequence + 1);
        let Some(value) = backend.get(kinds::AUDIT, &record_key(prefix, next)).await? else {
            return Ok(head);
        };
        let record: AuditRecord = decode(value)?;
        debug!(sequence = record.sequence, "Audit head rolled forward");
        head = Some(ChainHead {
            sequence: record.sequence,
            hash: record.hash,
        });
    }
}

fn record_key(prefix: &str, sequence: u64) -> String {
    format!("{prefix}#audit#{sequence:020}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;

    fn entry(action: &str, outcome: AuditOutcome) -> AuditEntry {
        AuditEntry {
            action: action.into(),
            surface: "nexus".into(),
            subject_type: "page".into(),
            subject_id: Some("home".into()),
            persist: true,
            outcome,
            code: None,
            gate: None,
        }
    }

    #[tokio::test]
    async fn records_chain_and_list_newest_first() {
        let log = AuditLog::new(testing::resolver());
        let ctx = testing::ctx();
        let first = log.append(&ctx, entry("a", AuditOutcome::Allowed)).await.unwrap();
        let second = log.append(&ctx, entry("b", AuditOutcome::Denied)).await.unwrap();
        assert_eq!(first.sequence, 1);
        assert!(first.previous_hash.is_none());
        assert_eq!(second.previous_hash.as_deref(), Some(first.hash.as_str()));
        assert_eq!(second.trace_id, ctx.trace_id());

        let recent = log.list_recent(&ctx, 10).await.unwrap();
        assert_eq!(recent.iter().map(|r| r.sequence).collect::<Vec<_>>(), vec![2, 1]);

        let mut oldest_first = recent;
        oldest_first.reverse();
        assert_eq!(AuditLog::verify_chain(&oldest_first), Ok(()));
    }

    #[tokio::test]
    async fn tampering_is_detected() {
        let log = AuditLog::new(testing::resolver());
        let ctx = testing::ctx();
        for action in ["a", "b", "c"] {
            log.append(&ctx, entry(action, AuditOutcome::Allowed)).await.unwrap();
        }
        let mut records = log.list_recent(&ctx, 10).await.unwrap();
        records.reverse();
        records[1].entry.outcome = AuditOutcome::Denied;
        assert_eq!(AuditLog::verify_chain(&records), Err(1));
    }

    #[tokio::test]
    async fn head_catches_up_with_orphaned_record() {
        let resolver = testing::resolver();
        let log = AuditLog::new(Arc::clone(&resolver));
        let ctx = testing::ctx();
        let first = log.append(&ctx, entry("a", AuditOutcome::Allowed)).await.unwrap();

        // Record 2 landed; its head update did not.
        let mut orphan = AuditRecord {
            sequence: 2,
            entry: entry("b", AuditOutcome::Denied),
            previous_hash: Some(first.hash.clone()),
            hash: String::new(),
            ..first.clone()
        };
        orphan.hash = orphan.compute_hash();
        let backend = resolver.resolve(kinds::AUDIT, &ctx).await.unwrap();
        backend
            .put_if_absent(
                kinds::AUDIT,
                &record_key(&ctx.tenant_prefix(), 2),
                encode(&orphan).unwrap(),
            )
            .await
            .unwrap();

        let third = log.append(&ctx, entry("c", AuditOutcome::Allowed)).await.unwrap();
        assert_eq!(third.sequence, 3);
        assert_eq!(third.previous_hash.as_deref(), Some(orphan.hash.as_str()));
        let fourth = log.append(&ctx, entry("d", AuditOutcome::Allowed)).await.unwrap();
        assert_eq!(fourth.sequence, 4);

        let mut records = log.list_recent(&ctx, 10).await.unwrap();
        records.reverse();
        assert_eq!(records.len(), 4);
        assert_eq!(AuditLog::verify_chain(&records), Ok(()));
    }

    #[tokio::test]
    async fn concurrent_appends_keep_one_chain() {
        let log = Arc::new(AuditLog::new(testing::resolver()));
        let ctx = testing::ctx();
        let appends = (0..10).map(|i| {
            let log = Arc::clone(&log);
            let ctx = ctx.clone();
            tokio::spawn(async move { log.append(&ctx, entry(&format!("a{i}"), AuditOutcome::Allowed)).await })
        });
        for result in futures::future::join_all(appends).await {
            result.unwrap().unwrap();
        }
        let mut records = log.list_recent(&ctx, 100).await.unwrap();
        records.reverse();
        assert_eq!(records.len(), 10);
        assert_eq!(AuditLog::verify_chain(&records), Ok(()));
    }
}
