//! Budget cap per surface, plus soft/hard limits per provider metric.
//!
//! Threshold precedence: surface record, then the configured global
//! default. With neither, the gate fails `budget_threshold_missing` unless
//! the tenant is allowed to run without one.

use std::sync::Arc;

use async_trait::async_trait;
use bastion_routing::BackendResolver;
use bastion_store::{VersionedRecord, VersionedStore};
use bastion_types::{RequestContext, ScopeConfig};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::PolicyError;
use crate::facts::{self, MissingThresholdPolicy};
use crate::kinds;
use crate::resolver::{Resolver, ResolverChain, StaticResolver};
use crate::series::TimeSeries;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BudgetThreshold {
    pub surface: String,
    pub limit: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UsageEvent {
    pub provider: String,
    pub metric: String,
    pub surface: String,
    pub amount: f64,
    pub at: DateTime<Utc>,
}

impl UsageEvent {
    pub fn now(provider: impl Into<String>, metric: impl Into<String>, surface: impl Into<String>, amount: f64) -> Self {
        Self {
            provider: provider.into(),
            metric: metric.into(),
            surface: surface.into(),
            amount,
            at: Utc::now(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BudgetLimit {
    pub provider: String,
    pub metric: String,
    pub soft_limit: Option<f64>,
    pub hard_limit: Option<f64>,
}

/// Outcome of a passing budget evaluation.
#[derive(Clone, Debug, PartialEq)]
pub enum BudgetCheck {
    /// No threshold configured and the tenant may run without one.
    Unconfigured,
    Within {
        threshold: f64,
        usage: f64,
        projected: f64,
        source: &'static str,
    },
}

struct SurfaceThresholds {
    store: Arc<VersionedStore<BudgetThreshold>>,
}

#[async_trait]
impl Resolver<f64> for SurfaceThresholds {
    fn name(&self) -> &'static str {
        "surface"
    }

    async fn resolve(&self, ctx: &RequestContext, surface: &str) -> Result<Option<f64>, PolicyError> {
        Ok(facts::live(&self.store, ctx, surface).await?.map(|t| t.limit))
    }
}

pub struct BudgetService {
    thresholds: Arc<VersionedStore<BudgetThreshold>>,
    limits: VersionedStore<BudgetLimit>,
    threshold_chain: ResolverChain<f64>,
    usage: TimeSeries<UsageEvent>,
    window: Duration,
    missing: MissingThresholdPolicy,
}

impl BudgetService {
    pub fn new(
        resolver: Arc<BackendResolver>,
        default_threshold: Option<f64>,
        window: Duration,
        missing: MissingThresholdPolicy,
    ) -> Self {
        let thresholds = Arc::new(VersionedStore::new(
            kinds::BUDGET,
            "budget_thresholds",
            ScopeConfig::PROJECT,
            Arc::clone(&resolver),
        ));
        let threshold_chain = ResolverChain::new()
            .then(SurfaceThresholds {
                store: Arc::clone(&thresholds),
            })
            .then(StaticResolver::new("global", default_threshold));
        Self {
            thresholds,
            limits: VersionedStore::new(kinds::BUDGET, "budget_limits", ScopeConfig::PROJECT, Arc::clone(&resolver)),
            threshold_chain,
            usage: TimeSeries::new(resolver, kinds::BUDGET),
            window,
            missing,
        }
    }

    pub async fn set_threshold(
        &self,
        ctx: &RequestContext,
        threshold: BudgetThreshold,
    ) -> Result<VersionedRecord<BudgetThreshold>, PolicyError> {
        if !threshold.limit.is_finite() || threshold.limit < 0.0 {
            return Err(PolicyError::InvalidInput("budget limit must be a non-negative number".into()));
        }
        let surface = threshold.surface.clone();
        Ok(facts::upsert(&self.thresholds, ctx, &surface, threshold).await?)
    }

    pub async fn set_limit(&self, ctx: &RequestContext, limit: BudgetLimit) -> Result<VersionedRecord<BudgetLimit>, PolicyError> {
        let id = limit_id(&limit.provider, &limit.metric);
        Ok(facts::upsert(&self.limits, ctx, &id, limit).await?)
    }

    /// Threshold for `surface` and the resolver that supplied it.
    pub async fn resolve_threshold(
        &self,
        ctx: &RequestContext,
        surface: &str,
    ) -> Result<Option<(f64, &'static str)>, PolicyError> {
        self.threshold_chain.resolve(ctx, surface).await
    }

    /// Usage recorded for `surface` within the window.
    pub async fn recent_usage(&self, ctx: &RequestContext, surface: &str) -> Result<f64, PolicyError> {
        let since = Utc::now() - self.window;
        Ok(self
            .usage
            .since(ctx, surface, since)
            .await?
            .iter()
            .map(|e| e.amount)
            .sum())
    }

    /// Fail when `recent usage + estimated_cost` exceeds the threshold.
    pub async fn evaluate(
        &self,
        ctx: &RequestContext,
        surface: &str,
        estimated_cost: f64,
    ) -> Result<BudgetCheck, PolicyError> {
        let Some((threshold, source)) = self.resolve_threshold(ctx, surface).await? else {
            if self.missing.allows(ctx.tenant_id().as_str()) {
                debug!(surface, "No budget threshold; tenant allowed to proceed");
                return Ok(BudgetCheck::Unconfigured);
            }
            return Err(PolicyError::BudgetThresholdMissing {
                surface: surface.to_string(),
            });
        };

        let usage = self.recent_usage(ctx, surface).await?;
        let projected = usage + estimated_cost.max(0.0);
        if projected > threshold {
            debug!(surface, threshold, usage, projected, "Budget threshold exceeded");
            return Err(PolicyError::BudgetThresholdExceeded {
                surface: surface.to_string(),
                threshold,
                usage,
                projected,
            });
        }
        Ok(BudgetCheck::Within {
            threshold,
            usage,
            projected,
            source,
        })
    }

    /// Commit usage after the guarded operation succeeded.
    ///
    /// A configured hard limit for the provider metric is enforced before
    /// anything is written; crossing the soft limit only logs.
    pub async fn record_usage(&self, ctx: &RequestContext, event: UsageEvent) -> Result<(), PolicyError> {
        if !event.amount.is_finite() || event.amount < 0.0 {
            return Err(PolicyError::InvalidInput("usage amount must be a non-negative number".into()));
        }

        if let Some(limit) = facts::live(&self.limits, ctx, &limit_id(&event.provider, &event.metric)).await? {
            let since = Utc::now() - self.window;
            let used: f64 = self
                .usage
                .since(ctx, &event.surface, since)
                .await?
                .iter()
                .filter(|e| e.provider == event.provider && e.metric == event.metric)
                .map(|e| e.amount)
                .sum();
            let projected = used + event.amount;

            if let Some(hard_limit) = limit.hard_limit {
                if projected > hard_limit {
                    return Err(PolicyError::BudgetLimitExceeded {
                        provider: event.provider,
                        metric: event.metric,
                        hard_limit,
                        projected,
                    });
                }
            }
            if let Some(soft_limit) = limit.soft_limit {
                if projected > soft_limit {
                    warn!(
                        provider = %event.provider,
                        metric = %event.metric,
                        soft_limit,
                        projected,
                        "Soft budget limit crossed"
                    );
                }
            }
        }

        let surface = event.surface.clone();
        self.usage.append(ctx, &surface, event.at, &event).await?;
        info!(
            surface = %surface,
            provider = %event.provider,
            metric = %event.metric,
            amount = event.amount,
            "Usage recorded"
        );
        Ok(())
    }
}

fn limit_id(provider: &str, metric: &str) -> String {
    format!("{provider}.{metric}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;
    use bastion_types::ToEnvelope;

    fn service(default: Option<f64>, missing: MissingThresholdPolicy) -> BudgetService {
        BudgetService::new(testing::resolver(), default, Duration::hours(1), missing)
    }

    #[tokio::test]
    async fn surface_threshold_beats_global_default() {
        let svc = service(Some(100.0), MissingThresholdPolicy::strict());
        let ctx = testing::ctx();
        assert_eq!(svc.resolve_threshold(&ctx, "nexus").await.unwrap(), Some((100.0, "global")));

        svc.set_threshold(&ctx, BudgetThreshold { surface: "nexus".into(), limit: 5.0 })
            .await
            .unwrap();
        assert_eq!(svc.resolve_threshold(&ctx, "nexus").await.unwrap(), Some((5.0, "surface")));
        assert_eq!(svc.resolve_threshold(&ctx, "studio").await.unwrap(), Some((100.0, "global")));
    }

    #[tokio::test]
    async fn missing_threshold_is_503_unless_allowed() {
        let ctx = testing::ctx();
        let err = service(None, MissingThresholdPolicy::strict())
            .evaluate(&ctx, "nexus", 0.0)
            .await
            .unwrap_err();
        assert_eq!(err.to_envelope().code, "budget_threshold_missing");
        assert_eq!(err.to_envelope().http_status, 503);

        let allowed = service(None, MissingThresholdPolicy::strict().with_tenant("t_demo", true));
        assert_eq!(allowed.evaluate(&ctx, "nexus", 0.0).await.unwrap(), BudgetCheck::Unconfigured);
    }

    #[tokio::test]
    async fn projected_usage_is_compared_to_threshold() {
        let svc = service(None, MissingThresholdPolicy::strict());
        let ctx = testing::ctx();
        svc.set_threshold(&ctx, BudgetThreshold { surface: "nexus".into(), limit: 5.0 })
            .await
            .unwrap();
        svc.record_usage(&ctx, UsageEvent::now("openai", "tokens", "nexus", 4.0))
            .await
            .unwrap();

        match svc.evaluate(&ctx, "nexus", 0.5).await.unwrap() {
            BudgetCheck::Within { usage, projected, .. } => {
                assert_eq!(usage, 4.0);
                assert_eq!(projected, 4.5);
            }
            other => panic!("unexpected: {other:?}"),
        }

        let err = svc.evaluate(&ctx, "nexus", 2.0).await.unwrap_err();
        let envelope = err.to_envelope();
        assert_eq!(envelope.code, "budget_threshold_exceeded");
        assert_eq!(envelope.details["usage"], 4.0);
        assert_eq!(envelope.details["projected"], 6.0);
    }

    #[tokio::test]
    async fn usage_outside_window_is_ignored() {
        let svc = service(Some(5.0), MissingThresholdPolicy::strict());
        let ctx = testing::ctx();
        let mut old = UsageEvent::now("openai", "tokens", "nexus", 50.0);
        old.at = Utc::now() - Duration::hours(3);
        svc.record_usage(&ctx, old).await.unwrap();
        assert_eq!(svc.recent_usage(&ctx, "nexus").await.unwrap(), 0.0);
        svc.evaluate(&ctx, "nexus", 1.0).await.unwrap();
    }

    #[tokio::test]
    async fn hard_limit_refuses_usage_without_recording() {
        let svc = service(Some(100.0), MissingThresholdPolicy::strict());
        let ctx = testing::ctx();
        svc.set_limit(
            &ctx,
            BudgetLimit {
                provider: "openai".into(),
                metric: "tokens".into(),
                soft_limit: Some(2.0),
                hard_limit: Some(3.0),
            },
        )
        .await
        .unwrap();

        svc.record_usage(&ctx, UsageEvent::now("openai", "tokens", "nexus", 2.5))
            .await
            .unwrap();
        let err = svc
            .record_usage(&ctx, UsageEvent::now("openai", "tokens", "nexus", 1.0))
            .await
            .unwrap_err();
        assert_eq!(err.to_envelope().code, "budget_limit_exceeded");
        assert_eq!(svc.recent_usage(&ctx, "nexus").await.unwrap(), 2.5);
    }
}
