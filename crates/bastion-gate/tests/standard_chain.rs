//! Standard chain wired to real policy services over in-memory storage.

use std::sync::Arc;

use bastion_gate::{GateChain, GateError, GateRequest, GateServices};
use bastion_kv::{BackendType, MemoryKv};
use bastion_policy::{
    ActionCatalog, ActionSpec, ApprovalPolicy, ApprovalService, AuditLog, AuditOutcome, BudgetCheck,
    BudgetService, BudgetThreshold, FirearmBinding, GranteeKind, KillSwitchConfig, KillSwitchService,
    KpiService, LicenseGrant, LicenseService, MissingThresholdPolicy, StrategyLock, TemperatureService,
    UsageEvent,
};
use bastion_routing::{BackendResolver, RouteSpec, RoutingRegistry, SWITCH_BACKEND_ACTION};
use bastion_types::{RequestContext, ToEnvelope};
use chrono::Duration;

struct Harness {
    chain: GateChain,
    registry: Arc<RoutingRegistry>,
    kill_switch: Arc<KillSwitchService>,
    licenses: Arc<LicenseService>,
    approvals: Arc<ApprovalService>,
    budget: Arc<BudgetService>,
    audit: Arc<AuditLog>,
}

fn harness(budget_default: Option<f64>) -> Harness {
    let registry = Arc::new(RoutingRegistry::in_memory());
    let resolver = Arc::new(BackendResolver::new(Arc::clone(&registry), Arc::new(MemoryKv::new())));
    let catalog = Arc::new(ActionCatalog::from_specs([
        ActionSpec::new("tool:trade").provider("broker").dangerous(),
        ActionSpec::new("tool:search").provider("openai"),
    ]));
    let lenient = MissingThresholdPolicy::allow_all();

    let kill_switch = Arc::new(KillSwitchService::new(
        Arc::clone(&resolver),
        Arc::clone(&catalog),
        KillSwitchConfig::default(),
    ));
    let licenses = Arc::new(LicenseService::new(Arc::clone(&resolver), catalog));
    let approvals = Arc::new(ApprovalService::new(Arc::clone(&resolver), ApprovalPolicy::default()));
    let budget = Arc::new(BudgetService::new(
        Arc::clone(&resolver),
        budget_default,
        Duration::hours(1),
        MissingThresholdPolicy::strict(),
    ));
    let kpi = Arc::new(KpiService::new(Arc::clone(&resolver), lenient));
    let temperature = Arc::new(TemperatureService::new(Arc::clone(&resolver), Duration::minutes(15)));
    let audit = Arc::new(AuditLog::new(resolver));

    let chain = GateChain::standard(GateServices {
        kill_switch: Arc::clone(&kill_switch),
        licenses: Arc::clone(&licenses),
        approvals: Arc::clone(&approvals),
        budget: Arc::clone(&budget),
        kpi,
        temperature,
        rate_limiter: None,
        audit: Arc::clone(&audit),
    })
    .unwrap();

    Harness {
        chain,
        registry,
        kill_switch,
        licenses,
        approvals,
        budget,
        audit,
    }
}

fn ctx() -> RequestContext {
    RequestContext::builder("t_demo", "saas", "dev", "p1")
        .surface("nexus")
        .user("u1")
        .build()
        .unwrap()
}

async fn approve(approvals: &ApprovalService, lock: StrategyLock) {
    let ctx = ctx();
    let id = lock.lock_id.clone();
    approvals.request_lock(&ctx, lock).await.unwrap();
    approvals.approve(&ctx, &id, "lead").await.unwrap();
}

#[tokio::test]
async fn kill_switch_rejects_before_later_gates() {
    let h = harness(Some(100.0));
    let ctx = ctx();
    h.kill_switch
        .configure(
            &ctx,
            None,
            KillSwitchConfig {
                disable_providers: ["broker".to_string()].into(),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let err = h
        .chain
        .run(&ctx, "tool:trade", "nexus", "page", None, false)
        .await
        .unwrap_err();
    let envelope = err.to_envelope();
    assert_eq!(envelope.code, "kill_switch_blocked");
    assert_eq!(envelope.details["provider"], "broker");

    let records = h.audit.list_recent(&ctx, 1).await.unwrap();
    assert_eq!(records[0].entry.outcome, AuditOutcome::Denied);
    assert_eq!(records[0].entry.gate.as_deref(), Some("kill_switch"));
}

#[tokio::test]
async fn bound_action_needs_license_then_lock() {
    let h = harness(Some(100.0));
    let ctx = ctx();
    h.licenses
        .bind(
            &ctx,
            FirearmBinding {
                action_name: "tool:trade".into(),
                firearm_id: "fa_trading".into(),
            },
        )
        .await
        .unwrap();

    let err = h
        .chain
        .run(&ctx, "tool:trade", "nexus", "page", None, false)
        .await
        .unwrap_err();
    let envelope = err.to_envelope();
    assert_eq!(envelope.code, "firearms.license_required");
    assert_eq!(envelope.details["required_licenses"], serde_json::json!(["fa_trading"]));

    h.licenses
        .grant(
            &ctx,
            LicenseGrant {
                grant_id: "g1".into(),
                firearm_id: "fa_trading".into(),
                grantee: "u1".into(),
                grantee_kind: GranteeKind::User,
                expires_at: None,
                revoked: false,
            },
        )
        .await
        .unwrap();

    let err = h
        .chain
        .run(&ctx, "tool:trade", "nexus", "page", None, false)
        .await
        .unwrap_err();
    assert_eq!(err.gate(), Some("approval_lock"));

    approve(&h.approvals, StrategyLock::new("nexus", vec!["tool:*".into()])).await;
    let report = h
        .chain
        .run(&ctx, "tool:trade", "nexus", "page", None, false)
        .await
        .unwrap();
    assert_eq!(
        report.passed,
        vec!["kill_switch", "license", "approval_lock", "budget", "kpi", "temperature"]
    );
}

#[tokio::test]
async fn budget_gate_counts_estimated_cost() {
    let h = harness(None);
    let ctx = ctx();
    h.budget
        .set_threshold(&ctx, BudgetThreshold { surface: "nexus".into(), limit: 5.0 })
        .await
        .unwrap();
    h.budget
        .record_usage(&ctx, UsageEvent::now("openai", "tokens", "nexus", 4.0))
        .await
        .unwrap();

    let ok = GateRequest::new("pages:publish", "nexus", "page").estimated_cost(0.5);
    let report = h.chain.run_request(&ctx, &ok).await.unwrap();
    assert!(matches!(report.budget, Some(BudgetCheck::Within { projected, .. }) if projected == 4.5));

    let over = GateRequest::new("pages:publish", "nexus", "page").estimated_cost(2.0);
    let err = h.chain.run_request(&ctx, &over).await.unwrap_err();
    let envelope = err.to_envelope();
    assert_eq!(envelope.code, "budget_threshold_exceeded");
    assert_eq!(envelope.details["projected"], 6.0);

    let skipped = over.clone().skip_metrics(true);
    let report = h.chain.run_request(&ctx, &skipped).await.unwrap();
    assert!(report.budget.is_none());
}

#[tokio::test]
async fn missing_budget_threshold_is_503() {
    let h = harness(None);
    let err = h
        .chain
        .run(&ctx(), "pages:publish", "studio", "page", None, false)
        .await
        .unwrap_err();
    assert!(matches!(err, GateError::Stage { gate: "budget", .. }));
    let envelope = err.to_envelope();
    assert_eq!(envelope.code, "budget_threshold_missing");
    assert_eq!(envelope.http_status, 503);
}

#[tokio::test]
async fn backend_switch_needs_a_scoped_lock_when_one_is_named() {
    let h = harness(Some(100.0));
    let ctx = ctx();
    let route = h
        .registry
        .upsert_route(RouteSpec::new("pages", "t_demo", "dev", BackendType::Memory).project("p1"))
        .await
        .unwrap();

    // No lock names the switch action: the chain alone decides.
    let switched = h
        .registry
        .switch_backend(
            &ctx,
            &route.key(),
            BackendType::Filesystem,
            Some(serde_json::json!({"root": "/var/lib/bastion"})),
            "move to disk",
            &h.chain,
        )
        .await
        .unwrap();
    assert_eq!(switched.previous_backend_type, Some(BackendType::Memory));

    // An approved lock covering the action but without the exact scope.
    approve(&h.approvals, StrategyLock::new("*", vec![SWITCH_BACKEND_ACTION.into()])).await;
    let err = h
        .registry
        .switch_backend(&ctx, &route.key(), BackendType::Memory, None, "roll back", &h.chain)
        .await
        .unwrap_err();
    assert_eq!(err.to_envelope().code, "strategy_lock_required");

    let mut scoped = StrategyLock::new("*", vec![SWITCH_BACKEND_ACTION.into()]);
    scoped.scope = Some(SWITCH_BACKEND_ACTION.into());
    approve(&h.approvals, scoped).await;
    let rolled_back = h
        .registry
        .switch_backend(&ctx, &route.key(), BackendType::Memory, None, "roll back", &h.chain)
        .await
        .unwrap();
    assert_eq!(rolled_back.backend_type, BackendType::Memory);
    assert_eq!(rolled_back.switch_rationale.as_deref(), Some("roll back"));
}
