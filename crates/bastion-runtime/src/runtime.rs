use std::sync::Arc;

use anyhow::Context;
use bastion_canvas::CanvasCommandStore;
use bastion_gate::{GateChain, GateServices};
use bastion_kv::{open_backend, BackendType, KvBackend, TimeoutBackend};
use bastion_policy::{
    ActionCatalog, ApprovalService, AuditLog, BudgetService, KillSwitchService, KpiService, LicenseService,
    RateLimiter, TemperatureService,
};
use bastion_routing::{
    BackendResolver, ResourceRoute, RouteFilter, RouteKey, RoutingError, RoutingRegistry,
    SWITCH_BACKEND_ACTION,
};
use bastion_types::RequestContext;
use serde_json::Value;
use tracing::info;

use crate::canvas::CanvasCollaboration;
use crate::config::BastionConfig;
use crate::config_store::ConfigStoreRepository;

/// Every service of one process, built once and shared by `Arc`.
pub struct Runtime {
    config: BastionConfig,
    registry: Arc<RoutingRegistry>,
    resolver: Arc<BackendResolver>,
    kill_switch: Arc<KillSwitchService>,
    licenses: Arc<LicenseService>,
    approvals: Arc<ApprovalService>,
    budget: Arc<BudgetService>,
    kpi: Arc<KpiService>,
    temperature: Arc<TemperatureService>,
    rate_limiter: Arc<RateLimiter>,
    audit: Arc<AuditLog>,
    gate: Arc<GateChain>,
    canvas: Arc<CanvasCollaboration>,
    config_store: Arc<ConfigStoreRepository>,
}

impl Runtime {
    pub async fn build(config: BastionConfig) -> anyhow::Result<Self> {
        Self::build_with_catalog(config, ActionCatalog::new()).await
    }

    pub async fn build_with_catalog(config: BastionConfig, catalog: ActionCatalog) -> anyhow::Result<Self> {
        let storage = &config.storage;
        let backend_config = storage.backend_config();
        // Only the backend type goes into the error; its config may hold credentials.
        let opened = open_backend(storage.backend, &backend_config)
            .await
            .with_context(|| format!("failed to open the {} storage backend", storage.backend))?;
        let default_backend: Arc<dyn KvBackend> = match storage.call_timeout() {
            Some(deadline) => Arc::new(TimeoutBackend::new(Arc::clone(&opened), deadline)),
            None => Arc::clone(&opened),
        };

        let registry = RoutingRegistry::load(Arc::clone(&default_backend))
            .await
            .context("failed to load resource routes")?
            .with_required_kinds(config.routing.required_kinds.iter().cloned());
        let registry = Arc::new(registry);

        let mut resolver = BackendResolver::new(Arc::clone(&registry), Arc::clone(&default_backend));
        if let Some(deadline) = storage.call_timeout() {
            resolver = resolver.with_call_timeout(deadline);
        }
        // Routes naming the default backend share its instance.
        resolver.register_backend(storage.backend, &backend_config, opened);
        let resolver = Arc::new(resolver);

        let catalog = Arc::new(catalog);
        let missing = config.missing_threshold_policy();

        let kill_switch = Arc::new(KillSwitchService::new(
            Arc::clone(&resolver),
            Arc::clone(&catalog),
            config.gate.kill_switch.clone(),
        ));
        let licenses = Arc::new(LicenseService::new(Arc::clone(&resolver), catalog));
        let approvals = Arc::new(ApprovalService::new(Arc::clone(&resolver), config.gate.approval.clone()));
        let budget = Arc::new(BudgetService::new(
            Arc::clone(&resolver),
            config.budget.default_threshold,
            config.budget_window(),
            missing.clone(),
        ));
        let kpi = Arc::new(KpiService::new(Arc::clone(&resolver), missing));
        let temperature = Arc::new(TemperatureService::new(Arc::clone(&resolver), config.temperature_window()));
        let rate_limiter = Arc::new(RateLimiter::new(Arc::clone(&resolver), config.rate_limit.policy.clone()));
        let audit = Arc::new(AuditLog::new(Arc::clone(&resolver)));

        let gate = Arc::new(
            GateChain::standard(GateServices {
                kill_switch: Arc::clone(&kill_switch),
                licenses: Arc::clone(&licenses),
                approvals: Arc::clone(&approvals),
                budget: Arc::clone(&budget),
                kpi: Arc::clone(&kpi),
                temperature: Arc::clone(&temperature),
                rate_limiter: config.rate_limit.enabled.then(|| Arc::clone(&rate_limiter)),
                audit: Arc::clone(&audit),
            })
            .context("gate chain is misconfigured")?,
        );

        let canvas = Arc::new(CanvasCollaboration::new(
            Arc::clone(&gate),
            Arc::new(CanvasCommandStore::new(Arc::clone(&resolver))),
            config.gate.canvas_skip_metrics,
        ));
        let config_store = Arc::new(ConfigStoreRepository::new(Arc::clone(&resolver)));

        info!(
            backend = %storage.backend,
            routes = registry.list_routes(&RouteFilter::new()).len(),
            gates = ?gate.gate_names(),
            "Bastion runtime ready"
        );

        Ok(Self {
            config,
            registry,
            resolver,
            kill_switch,
            licenses,
            approvals,
            budget,
            kpi,
            temperature,
            rate_limiter,
            audit,
            gate,
            canvas,
            config_store,
        })
    }

    /// Switch a route's backend after the gate chain authorizes it.
    pub async fn switch_backend(
        &self,
        ctx: &RequestContext,
        key: &RouteKey,
        to: BackendType,
        config: Option<Value>,
        rationale: &str,
    ) -> Result<ResourceRoute, RoutingError> {
        let route = self
            .registry
            .switch_backend(ctx, key, to, config, rationale, self.gate.as_ref())
            .await?;
        self.gate.record_hit(ctx, SWITCH_BACKEND_ACTION).await;
        Ok(route)
    }

    pub fn config(&self) -> &BastionConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<RoutingRegistry> {
        &self.registry
    }

    pub fn resolver(&self) -> &Arc<BackendResolver> {
        &self.resolver
    }

    pub fn kill_switch(&self) -> &Arc<KillSwitchService> {
        &self.kill_switch
    }

    pub fn licenses(&self) -> &Arc<LicenseService> {
        &self.licenses
    }

    pub fn approvals(&self) -> &Arc<ApprovalService> {
        &self.approvals
    }

    pub fn budget(&self) -> &Arc<BudgetService> {
        &self.budget
    }

    pub fn kpi(&self) -> &Arc<KpiService> {
        &self.kpi
    }

    pub fn temperature(&self) -> &Arc<TemperatureService> {
        &self.temperature
    }

    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.rate_limiter
    }

    pub fn audit(&self) -> &Arc<AuditLog> {
        &self.audit
    }

    pub fn gate(&self) -> &Arc<GateChain> {
        &self.gate
    }

    pub fn canvas(&self) -> &Arc<CanvasCollaboration> {
        &self.canvas
    }

    pub fn config_store(&self) -> &Arc<ConfigStoreRepository> {
        &self.config_store
    }
}
