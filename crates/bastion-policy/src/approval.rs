//! Strategy (approval) locks.
//!
//! Some actions may only run once a human has approved a lock covering
//! them. Whether a lock is required comes from the tenant's
//! [`ApprovalPolicy`]: a per-subject override if present, otherwise the
//! action-prefix list.

use std::collections::BTreeMap;
use std::sync::Arc;

use bastion_routing::{BackendResolver, SWITCH_BACKEND_ACTION};
use bastion_store::{VersionedRecord, VersionedStore};
use bastion_types::{RequestContext, ScopeConfig};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::PolicyError;
use crate::facts;
use crate::kinds;

const POLICY_RECORD: &str = "policy";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockStatus {
    Pending,
    Approved,
    Revoked,
    Expired,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StrategyLock {
    pub lock_id: String,
    /// Surface the lock applies to; `*` for every surface.
    pub surface: String,
    /// Exact action names, or prefixes ending in `*`.
    pub actions: Vec<String>,
    /// Narrows the lock to one operation, e.g. `routing:switch_backend`.
    #[serde(default)]
    pub scope: Option<String>,
    pub status: LockStatus,
    #[serde(default)]
    pub approved_by: Option<String>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl StrategyLock {
    pub fn new(surface: impl Into<String>, actions: Vec<String>) -> Self {
        Self {
            lock_id: Uuid::new_v4().to_string(),
            surface: surface.into(),
            actions,
            scope: None,
            status: LockStatus::Pending,
            approved_by: None,
            expires_at: None,
        }
    }

    pub fn covers_action(&self, action: &str) -> bool {
        self.actions.iter().any(|pattern| match pattern.strip_suffix('*') {
            Some(prefix) => action.starts_with(prefix),
            None => pattern == action,
        })
    }

    fn covers_surface(&self, surface: &str) -> bool {
        self.surface == "*" || self.surface == surface
    }

    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.status == LockStatus::Approved && self.expires_at.map_or(true, |exp| exp > now)
    }
}

/// When an approved lock is required.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalPolicy {
    /// Actions starting with any of these require a lock.
    pub required_prefixes: Vec<String>,
    /// `{subject_type}/{subject_id}` → required. Beats the prefix list.
    #[serde(default)]
    pub subject_overrides: BTreeMap<String, bool>,
}

impl Default for ApprovalPolicy {
    fn default() -> Self {
        Self {
            required_prefixes: vec!["tool".to_string(), "canvas".to_string()],
            subject_overrides: BTreeMap::new(),
        }
    }
}

impl ApprovalPolicy {
    pub fn requires_lock(&self, action: &str, subject_type: &str, subject_id: Option<&str>) -> bool {
        if let Some(subject_id) = subject_id {
            if let Some(required) = self.subject_overrides.get(&subject_key(subject_type, subject_id)) {
                return *required;
            }
        }
        self.required_prefixes.iter().any(|p| action.starts_with(p.as_str()))
    }

    pub fn with_override(mut self, subject_type: &str, subject_id: &str, required: bool) -> Self {
        self.subject_overrides
            .insert(subject_key(subject_type, subject_id), required);
        self
    }
}

fn subject_key(subject_type: &str, subject_id: &str) -> String {
    format!("{subject_type}/{subject_id}")
}

pub struct ApprovalService {
    locks: VersionedStore<StrategyLock>,
    policies: VersionedStore<ApprovalPolicy>,
    default_policy: ApprovalPolicy,
}

impl ApprovalService {
    pub fn new(resolver: Arc<BackendResolver>, default_policy: ApprovalPolicy) -> Self {
        Self {
            locks: VersionedStore::new(
                kinds::APPROVAL,
                "strategy_locks",
                ScopeConfig::PROJECT,
                Arc::clone(&resolver),
            ),
            policies: VersionedStore::new(kinds::APPROVAL, "approval_policies", ScopeConfig::PROJECT, resolver),
            default_policy,
        }
    }

    pub async fn set_policy(
        &self,
        ctx: &RequestContext,
        policy: ApprovalPolicy,
    ) -> Result<VersionedRecord<ApprovalPolicy>, PolicyError> {
        Ok(facts::upsert(&self.policies, ctx, POLICY_RECORD, policy).await?)
    }

    /// Tenant policy, or the configured default.
    pub async fn policy(&self, ctx: &RequestContext) -> Result<ApprovalPolicy, PolicyError> {
        Ok(facts::live(&self.policies, ctx, POLICY_RECORD)
            .await?
            .unwrap_or_else(|| self.default_policy.clone()))
    }

    pub async fn request_lock(
        &self,
        ctx: &RequestContext,
        lock: StrategyLock,
    ) -> Result<VersionedRecord<StrategyLock>, PolicyError> {
        if lock.actions.is_empty() {
            return Err(PolicyError::InvalidInput("a lock must name at least one action".into()));
        }
        let id = lock.lock_id.clone();
        Ok(self.locks.save_new(ctx, &id, lock).await?)
    }

    pub async fn approve(
        &self,
        ctx: &RequestContext,
        lock_id: &str,
        approver: &str,
    ) -> Result<VersionedRecord<StrategyLock>, PolicyError> {
        let read = self.load(ctx, lock_id).await?;
        self.approve_read(ctx, read, approver).await
    }

    pub async fn revoke(&self, ctx: &RequestContext, lock_id: &str) -> Result<VersionedRecord<StrategyLock>, PolicyError> {
        let read = self.load(ctx, lock_id).await?;
        let mut lock = read.payload;
        lock.status = LockStatus::Revoked;
        info!(lock_id, "Strategy lock revoked");
        Ok(self.locks.bump_version_if(ctx, lock_id, read.version, lock, false).await?)
    }

    /// Approve the lock as it was read. A change since the read, such as a
    /// revoke, fails with `version_conflict`.
    async fn approve_read(
        &self,
        ctx: &RequestContext,
        read: VersionedRecord<StrategyLock>,
        approver: &str,
    ) -> Result<VersionedRecord<StrategyLock>, PolicyError> {
        let lock_id = read.id.as_str();
        let mut lock = read.payload.clone();
        if lock.status != LockStatus::Pending {
            return Err(PolicyError::InvalidInput(format!(
                "lock `{lock_id}` is not pending"
            )));
        }
        lock.status = LockStatus::Approved;
        lock.approved_by = Some(approver.to_string());
        info!(lock_id, approver, surface = %lock.surface, "Strategy lock approved");
        Ok(self.locks.bump_version_if(ctx, lock_id, read.version, lock, false).await?)
    }

    async fn load(&self, ctx: &RequestContext, lock_id: &str) -> Result<VersionedRecord<StrategyLock>, PolicyError> {
        self.locks
            .get_latest(ctx, lock_id)
            .await?
            .filter(VersionedRecord::is_live)
            .ok_or_else(|| PolicyError::NotFound {
                what: "strategy lock",
                id: lock_id.to_string(),
            })
    }

    /// All locks in scope with expired approvals reported as `Expired`.
    pub async fn list_locks(&self, ctx: &RequestContext) -> Result<Vec<StrategyLock>, PolicyError> {
        let now = Utc::now();
        Ok(self
            .locks
            .list_latest(ctx, false)
            .await?
            .into_iter()
            .map(|r| {
                let mut lock = r.payload;
                if lock.status == LockStatus::Approved && !lock.is_active_at(now) {
                    lock.status = LockStatus::Expired;
                }
                lock
            })
            .collect())
    }

    pub async fn find_active_lock(
        &self,
        ctx: &RequestContext,
        surface: &str,
        action: &str,
    ) -> Result<Option<StrategyLock>, PolicyError> {
        Ok(self.list_locks(ctx).await?.into_iter().find(|lock| {
            lock.status == LockStatus::Approved && lock.covers_surface(surface) && lock.covers_action(action)
        }))
    }

    pub async fn evaluate(
        &self,
        ctx: &RequestContext,
        surface: &str,
        action: &str,
        subject_type: &str,
        subject_id: Option<&str>,
    ) -> Result<(), PolicyError> {
        let policy = self.policy(ctx).await?;
        if !policy.requires_lock(action, subject_type, subject_id) {
            return Ok(());
        }
        match self.find_active_lock(ctx, surface, action).await? {
            Some(lock) => {
                debug!(action, surface, lock_id = %lock.lock_id, "Approved lock covers action");
                Ok(())
            }
            None => Err(PolicyError::StrategyLockRequired {
                action: action.to_string(),
                surface: surface.to_string(),
                reason: "no approved lock covers the action".into(),
            }),
        }
    }

    /// Backend switches: when any pending or live lock names the switch
    /// action, one of them must be approved and scoped to exactly that action.
    pub async fn evaluate_switch(&self, ctx: &RequestContext, surface: &str) -> Result<(), PolicyError> {
        let covering: Vec<StrategyLock> = self
            .list_locks(ctx)
            .await?
            .into_iter()
            .filter(|lock| matches!(lock.status, LockStatus::Pending | LockStatus::Approved))
            .filter(|lock| lock.covers_action(SWITCH_BACKEND_ACTION))
            .collect();
        if covering.is_empty() {
            return Ok(());
        }
        let scoped = covering.iter().any(|lock| {
            lock.status == LockStatus::Approved && lock.scope.as_deref() == Some(SWITCH_BACKEND_ACTION)
        });
        if scoped {
            Ok(())
        } else {
            Err(PolicyError::StrategyLockRequired {
                action: SWITCH_BACKEND_ACTION.to_string(),
                surface: surface.to_string(),
                reason: format!("lock must be approved and scoped to `{SWITCH_BACKEND_ACTION}`"),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;
    use bastion_types::ToEnvelope;
    use chrono::Duration;

    fn service() -> ApprovalService {
        ApprovalService::new(testing::resolver(), ApprovalPolicy::default())
    }

    async fn approved_lock(svc: &ApprovalService, surface: &str, actions: &[&str]) -> StrategyLock {
        let ctx = testing::ctx();
        let lock = StrategyLock::new(surface, actions.iter().map(|a| a.to_string()).collect());
        let id = lock.lock_id.clone();
        svc.request_lock(&ctx, lock).await.unwrap();
        svc.approve(&ctx, &id, "lead").await.unwrap().payload
    }

    #[test]
    fn default_policy_requires_tool_and_canvas() {
        let policy = ApprovalPolicy::default();
        assert!(policy.requires_lock("tool:search", "page", None));
        assert!(policy.requires_lock("canvas:move_node", "canvas", Some("c1")));
        assert!(!policy.requires_lock("pages:publish", "page", None));

        let policy = policy
            .with_override("canvas", "c1", false)
            .with_override("page", "home", true);
        assert!(!policy.requires_lock("canvas:move_node", "canvas", Some("c1")));
        assert!(policy.requires_lock("pages:publish", "page", Some("home")));
    }

    #[test]
    fn patterns_match_exact_or_prefix() {
        let lock = StrategyLock::new("nexus", vec!["tool:*".into(), "canvas:commit".into()]);
        assert!(lock.covers_action("tool:search"));
        assert!(lock.covers_action("canvas:commit"));
        assert!(!lock.covers_action("canvas:move_node"));
    }

    #[tokio::test]
    async fn required_without_lock_is_rejected() {
        let err = service()
            .evaluate(&testing::ctx(), "nexus", "tool:search", "page", None)
            .await
            .unwrap_err();
        let envelope = err.to_envelope();
        assert_eq!(envelope.code, "strategy_lock_required");
        assert_eq!(envelope.gate.as_deref(), Some("approval_lock"));
    }

    #[tokio::test]
    async fn pending_lock_does_not_count() {
        let svc = service();
        let ctx = testing::ctx();
        svc.request_lock(&ctx, StrategyLock::new("nexus", vec!["tool:*".into()]))
            .await
            .unwrap();
        assert!(svc.evaluate(&ctx, "nexus", "tool:search", "page", None).await.is_err());
    }

    #[tokio::test]
    async fn approved_lock_covers_its_surface_only() {
        let svc = service();
        let ctx = testing::ctx();
        approved_lock(&svc, "nexus", &["tool:*"]).await;
        svc.evaluate(&ctx, "nexus", "tool:search", "page", None).await.unwrap();
        assert!(svc.evaluate(&ctx, "studio", "tool:search", "page", None).await.is_err());
    }

    #[tokio::test]
    async fn expired_and_revoked_locks_do_not_count() {
        let svc = service();
        let ctx = testing::ctx();
        let mut lock = StrategyLock::new("*", vec!["tool:*".into()]);
        lock.expires_at = Some(Utc::now() - Duration::minutes(5));
        let id = lock.lock_id.clone();
        svc.request_lock(&ctx, lock).await.unwrap();
        svc.approve(&ctx, &id, "lead").await.unwrap();
        assert!(svc.evaluate(&ctx, "nexus", "tool:search", "page", None).await.is_err());
        assert_eq!(svc.list_locks(&ctx).await.unwrap()[0].status, LockStatus::Expired);

        let revoked = approved_lock(&svc, "*", &["canvas:*"]).await;
        svc.revoke(&ctx, &revoked.lock_id).await.unwrap();
        assert!(svc.evaluate(&ctx, "nexus", "canvas:move_node", "canvas", None).await.is_err());
    }

    #[tokio::test]
    async fn tenant_policy_replaces_default() {
        let svc = service();
        let ctx = testing::ctx();
        svc.set_policy(
            &ctx,
            ApprovalPolicy {
                required_prefixes: vec!["pages".into()],
                subject_overrides: BTreeMap::new(),
            },
        )
        .await
        .unwrap();
        svc.evaluate(&ctx, "nexus", "tool:search", "page", None).await.unwrap();
        assert!(svc.evaluate(&ctx, "nexus", "pages:publish", "page", None).await.is_err());
    }

    #[tokio::test]
    async fn switch_requires_exact_scope_when_locked() {
        let svc = service();
        let ctx = testing::ctx();
        svc.evaluate_switch(&ctx, "routing").await.unwrap();

        approved_lock(&svc, "*", &["routing:*"]).await;
        let err = svc.evaluate_switch(&ctx, "routing").await.unwrap_err();
        assert_eq!(err.to_envelope().code, "strategy_lock_required");

        let mut scoped = StrategyLock::new("*", vec![SWITCH_BACKEND_ACTION.into()]);
        scoped.scope = Some(SWITCH_BACKEND_ACTION.into());
        let id = scoped.lock_id.clone();
        svc.request_lock(&ctx, scoped).await.unwrap();
        svc.approve(&ctx, &id, "lead").await.unwrap();
        svc.evaluate_switch(&ctx, "routing").await.unwrap();
    }

    #[tokio::test]
    async fn revoke_between_read_and_approve_wins() {
        let svc = service();
        let ctx = testing::ctx();
        let lock = StrategyLock::new("nexus", vec!["tool:*".into()]);
        let id = lock.lock_id.clone();
        svc.request_lock(&ctx, lock).await.unwrap();

        let read = svc.load(&ctx, &id).await.unwrap();
        assert_eq!(read.payload.status, LockStatus::Pending);
        svc.revoke(&ctx, &id).await.unwrap();

        let err = svc.approve_read(&ctx, read, "lead").await.unwrap_err();
        assert_eq!(err.to_envelope().code, "version_conflict");
        assert_eq!(svc.load(&ctx, &id).await.unwrap().payload.status, LockStatus::Revoked);
        assert!(svc.evaluate(&ctx, "nexus", "tool:search", "page", None).await.is_err());
    }

    #[tokio::test]
    async fn retired_switch_locks_do_not_gate_switches() {
        let svc = service();
        let ctx = testing::ctx();
        let revoked = approved_lock(&svc, "*", &[SWITCH_BACKEND_ACTION]).await;
        svc.revoke(&ctx, &revoked.lock_id).await.unwrap();

        let mut stale = StrategyLock::new("*", vec!["routing:*".into()]);
        stale.expires_at = Some(Utc::now() - Duration::minutes(5));
        let id = stale.lock_id.clone();
        svc.request_lock(&ctx, stale).await.unwrap();
        svc.approve(&ctx, &id, "lead").await.unwrap();

        svc.evaluate_switch(&ctx, "routing").await.unwrap();

        svc.request_lock(&ctx, StrategyLock::new("*", vec!["routing:*".into()]))
            .await
            .unwrap();
        assert!(svc.evaluate_switch(&ctx, "routing").await.is_err());
    }
}
