//! Fixed-window rate limiting per `(tenant, action)`.
//!
//! Counters are persisted in a routed KV table so every process sharing the
//! backend sees the same window. `check` never writes; `record` commits one
//! hit and is called on the success path of the guarded operation.

use std::collections::HashMap;
use std::sync::Arc;

use bastion_kv::{decode, encode, KeyedLocks, KvBackend};
use bastion_routing::BackendResolver;
use bastion_types::scope::check_segment;
use bastion_types::RequestContext;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::PolicyError;
use crate::kinds;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitEntry {
    pub last_reset: DateTime<Utc>,
    pub count: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitPolicy {
    pub window_secs: u64,
    pub max_requests: u32,
    /// Per-action `max_requests` overrides.
    #[serde(default)]
    pub per_action: HashMap<String, u32>,
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self {
            window_secs: 60,
            max_requests: 120,
            per_action: HashMap::new(),
        }
    }
}

impl RateLimitPolicy {
    pub fn limit_for(&self, action: &str) -> u32 {
        self.per_action.get(action).copied().unwrap_or(self.max_requests)
    }

    fn window(&self) -> Duration {
        Duration::seconds(self.window_secs.min(u64::from(u32::MAX)) as i64)
    }
}

pub struct RateLimiter {
    resolver: Arc<BackendResolver>,
    policy: RateLimitPolicy,
    locks: KeyedLocks,
}

impl RateLimiter {
    pub fn new(resolver: Arc<BackendResolver>, policy: RateLimitPolicy) -> Self {
        Self {
            resolver,
            policy,
            locks: KeyedLocks::new(),
        }
    }

    pub fn policy(&self) -> &RateLimitPolicy {
        &self.policy
    }

    /// Fail with `rate_limited` when the current window is full. Read-only.
    pub async fn check(&self, ctx: &RequestContext, action: &str) -> Result<RateLimitEntry, PolicyError> {
        let key = entry_key(ctx, action)?;
        let backend = self.backend(ctx).await?;
        let entry = self.current(&*backend, &key).await?;
        self.ensure_capacity(action, &entry)?;
        Ok(entry)
    }

    /// Count one hit in the current window, resetting a stale window first.
    pub async fn record(&self, ctx: &RequestContext, action: &str) -> Result<RateLimitEntry, PolicyError> {
        let key = entry_key(ctx, action)?;
        let backend = self.backend(ctx).await?;
        let _guard = self.locks.lock(&key).await;
        let entry = self.current(&*backend, &key).await?;
        self.commit(&*backend, &key, entry).await
    }

    /// Check and record under one lock.
    pub async fn try_acquire(&self, ctx: &RequestContext, action: &str) -> Result<RateLimitEntry, PolicyError> {
        let key = entry_key(ctx, action)?;
        let backend = self.backend(ctx).await?;
        let _guard = self.locks.lock(&key).await;
        let entry = self.current(&*backend, &key).await?;
        self.ensure_capacity(action, &entry)?;
        self.commit(&*backend, &key, entry).await
    }

    fn ensure_capacity(&self, action: &str, entry: &RateLimitEntry) -> Result<(), PolicyError> {
        let limit = self.policy.limit_for(action);
        if entry.count < limit {
            return Ok(());
        }
        let reset_at = entry.last_reset + self.policy.window();
        let retry_after_secs = (reset_at - Utc::now()).num_seconds().max(0) as u64;
        debug!(action, count = entry.count, limit, retry_after_secs, "Rate limit reached");
        Err(PolicyError::RateLimited {
            action: action.to_string(),
            limit,
            window_secs: self.policy.window_secs,
            retry_after_secs,
        })
    }

    /// Stored entry, or a fresh one when absent or older than the window.
    async fn current(&self, backend: &dyn KvBackend, key: &str) -> Result<RateLimitEntry, PolicyError> {
        let now = Utc::now();
        let stored = match backend.get(kinds::RATE_LIMITS, key).await? {
            Some(value) => Some(decode::<RateLimitEntry>(value)?),
            None => None,
        };
        Ok(match stored {
            Some(entry) if now - entry.last_reset < self.policy.window() => entry,
            _ => RateLimitEntry {
                last_reset: now,
                count: 0,
            },
        })
    }

    async fn commit(
        &self,
        backend: &dyn KvBackend,
        key: &str,
        mut entry: RateLimitEntry,
    ) -> Result<RateLimitEntry, PolicyError> {
        entry.count = entry.count.saturating_add(1);
        backend.put(kinds::RATE_LIMITS, key, encode(&entry)?).await?;
        Ok(entry)
    }

    async fn backend(&self, ctx: &RequestContext) -> Result<Arc<dyn KvBackend>, PolicyError> {
        Ok(self.resolver.resolve(kinds::RATE_LIMITS, ctx).await?)
    }
}

/// `{tenant}#{mode}#{env}#ratelimit#{action}`.
fn entry_key(ctx: &RequestContext, action: &str) -> Result<String, PolicyError> {
    if action.is_empty() {
        return Err(PolicyError::InvalidInput("action is required".into()));
    }
    check_segment("action", action).map_err(|e| PolicyError::InvalidInput(e.to_string()))?;
    Ok(format!("{}#ratelimit#{action}", ctx.tenant_prefix()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;
    use bastion_types::ToEnvelope;

    fn limiter(max: u32, window_secs: u64) -> RateLimiter {
        RateLimiter::new(
            testing::resolver(),
            RateLimitPolicy {
                window_secs,
                max_requests: max,
                per_action: HashMap::new(),
            },
        )
    }

    #[tokio::test]
    async fn check_does_not_consume() {
        let limiter = limiter(1, 60);
        let ctx = testing::ctx();
        for _ in 0..3 {
            assert_eq!(limiter.check(&ctx, "pages:publish").await.unwrap().count, 0);
        }
        limiter.record(&ctx, "pages:publish").await.unwrap();
        let err = limiter.check(&ctx, "pages:publish").await.unwrap_err();
        let envelope = err.to_envelope();
        assert_eq!(envelope.code, "rate_limited");
        assert_eq!(envelope.http_status, 429);
    }

    #[tokio::test]
    async fn try_acquire_admits_exactly_the_limit() {
        let limiter = Arc::new(limiter(5, 60));
        let attempts = (0..12).map(|_| {
            let limiter = Arc::clone(&limiter);
            tokio::spawn(async move { limiter.try_acquire(&testing::ctx(), "tool:search").await })
        });
        let admitted = futures::future::join_all(attempts)
            .await
            .into_iter()
            .filter(|r| matches!(r, Ok(Ok(_))))
            .count();
        assert_eq!(admitted, 5);
    }

    #[tokio::test]
    async fn actions_and_tenants_are_counted_separately() {
        let limiter = limiter(1, 60);
        let ctx = testing::ctx();
        limiter.try_acquire(&ctx, "a").await.unwrap();
        limiter.try_acquire(&ctx, "b").await.unwrap();

        let other = RequestContext::builder("t_other", "saas", "dev", "p1")
            .build()
            .unwrap();
        limiter.try_acquire(&other, "a").await.unwrap();
        assert!(limiter.try_acquire(&ctx, "a").await.is_err());
    }

    #[tokio::test]
    async fn stale_window_resets() {
        let limiter = limiter(1, 1);
        let ctx = testing::ctx();
        limiter.try_acquire(&ctx, "a").await.unwrap();
        assert!(limiter.try_acquire(&ctx, "a").await.is_err());

        tokio::time::sleep(std::time::Duration::from_millis(1100)).await;
        let entry = limiter.try_acquire(&ctx, "a").await.unwrap();
        assert_eq!(entry.count, 1);
    }

    #[tokio::test]
    async fn per_action_override_applies() {
        let mut policy = RateLimitPolicy::default();
        policy.max_requests = 1;
        policy.per_action.insert("bulk".into(), 3);
        let limiter = RateLimiter::new(testing::resolver(), policy);
        let ctx = testing::ctx();
        for _ in 0..3 {
            limiter.try_acquire(&ctx, "bulk").await.unwrap();
        }
        assert!(limiter.try_acquire(&ctx, "bulk").await.is_err());
    }
}
