use std::sync::Arc;

use async_trait::async_trait;
use bastion_kv::BackendType;
use bastion_policy::{
    gate_names, ApprovalService, AuditEntry, AuditLog, AuditOutcome, BudgetService,
    KillSwitchService, KpiService, LicenseService, RateLimiter, TemperatureService,
};
use bastion_routing::{ResourceRoute, SwitchAuthorizer, SWITCH_BACKEND_ACTION};
use bastion_types::{ErrorEnvelope, RequestContext, ToEnvelope};
use tracing::{debug, info, warn};

use crate::context::{GateReport, GateRequest};
use crate::error::GateError;
use crate::stages::{
    ApprovalLockGate, BudgetGate, KillSwitchGate, KpiGate, LicenseGate, RateLimitGate,
    TemperatureGate,
};
use crate::traits::{Gate, GateKind};

/// Surface used for backend switches when neither route nor caller names one.
const SWITCH_SURFACE: &str = "routing";
const ROUTE_SUBJECT: &str = "resource_route";

/// Policy services the standard chain is built from.
pub struct GateServices {
    pub kill_switch: Arc<KillSwitchService>,
    pub licenses: Arc<LicenseService>,
    pub approvals: Arc<ApprovalService>,
    pub budget: Arc<BudgetService>,
    pub kpi: Arc<KpiService>,
    pub temperature: Arc<TemperatureService>,
    pub rate_limiter: Option<Arc<RateLimiter>>,
    pub audit: Arc<AuditLog>,
}

/// Ordered, short-circuiting gate chain with a closing audit record.
pub struct GateChain {
    gates: Vec<Arc<dyn Gate>>,
    audit: Arc<AuditLog>,
    switch_approvals: Option<Arc<ApprovalService>>,
    rate_limiter: Option<Arc<RateLimiter>>,
}

impl GateChain {
    /// Build a chain from explicit gates. Fails unless every required gate
    /// is present exactly once and all gates are in canonical order.
    pub fn new(gates: Vec<Arc<dyn Gate>>, audit: Arc<AuditLog>) -> Result<Self, GateError> {
        validate(&gates)?;
        Ok(Self {
            gates,
            audit,
            switch_approvals: None,
            rate_limiter: None,
        })
    }

    pub fn standard(services: GateServices) -> Result<Self, GateError> {
        let mut gates: Vec<Arc<dyn Gate>> = vec![
            Arc::new(KillSwitchGate::new(services.kill_switch)),
            Arc::new(LicenseGate::new(services.licenses)),
            Arc::new(ApprovalLockGate::new(Arc::clone(&services.approvals))),
            Arc::new(BudgetGate::new(services.budget)),
            Arc::new(KpiGate::new(services.kpi)),
            Arc::new(TemperatureGate::new(services.temperature)),
        ];
        if let Some(limiter) = &services.rate_limiter {
            gates.push(Arc::new(RateLimitGate::new(Arc::clone(limiter))));
        }
        let chain = Self::new(gates, services.audit)?.with_switch_approvals(services.approvals);
        Ok(match services.rate_limiter {
            Some(limiter) => chain.with_rate_limiter(limiter),
            None => chain,
        })
    }

    /// Approval service consulted for switch-scoped locks on backend switches.
    pub fn with_switch_approvals(mut self, approvals: Arc<ApprovalService>) -> Self {
        self.switch_approvals = Some(approvals);
        self
    }

    /// Limiter whose pending hits [`Self::commit`] records.
    pub fn with_rate_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.rate_limiter = Some(limiter);
        self
    }

    /// Count the rate-limit hit a passing run left pending. Call once the
    /// guarded operation has succeeded; a run whose operation then fails
    /// costs nothing.
    pub async fn commit(&self, ctx: &RequestContext, report: &GateReport) {
        if let Some(action) = report.pending_rate_limit.as_deref() {
            self.record_hit(ctx, action).await;
        }
    }

    /// Count one hit for `action` when the chain rate-limits. Failures are
    /// logged; the guarded operation has already happened.
    pub async fn record_hit(&self, ctx: &RequestContext, action: &str) {
        let Some(limiter) = &self.rate_limiter else {
            return;
        };
        if let Err(err) = limiter.record(ctx, action).await {
            warn!(
                gate = gate_names::RATE_LIMIT,
                action,
                trace_id = %ctx.trace_id(),
                error = %err,
                "Rate-limit hit could not be recorded"
            );
        }
    }

    pub fn gate_names(&self) -> Vec<&'static str> {
        self.gates.iter().map(|g| g.kind().name()).collect()
    }

    pub async fn run(
        &self,
        ctx: &RequestContext,
        action: &str,
        surface: &str,
        subject_type: &str,
        subject_id: Option<&str>,
        skip_metrics: bool,
    ) -> Result<GateReport, GateError> {
        let mut request = GateRequest::new(action, surface, subject_type).skip_metrics(skip_metrics);
        request.subject_id = subject_id.map(str::to_string);
        self.run_request(ctx, &request).await
    }

    pub async fn run_request(&self, ctx: &RequestContext, request: &GateRequest) -> Result<GateReport, GateError> {
        if request.action.trim().is_empty() {
            return Err(GateError::InvalidRequest("action is required".into()));
        }
        if request.surface.trim().is_empty() {
            return Err(GateError::InvalidRequest("surface is required".into()));
        }

        let mut report = GateReport::new(ctx.trace_id());
        let mut failure = None;

        for gate in &self.gates {
            let kind = gate.kind();
            if request.skip_metrics && kind.is_metric() {
                report.skipped.push(kind.name());
                continue;
            }

            debug!(gate = kind.name(), order = kind.order(), action = %request.action, "Evaluating gate");
            match gate.evaluate(ctx, request, &mut report).await {
                Ok(()) => report.passed.push(kind.name()),
                Err(source) => {
                    warn!(
                        gate = kind.name(),
                        action = %request.action,
                        surface = %request.surface,
                        tenant_id = %ctx.tenant_id(),
                        trace_id = %ctx.trace_id(),
                        error = %source,
                        "Gate rejected request"
                    );
                    failure = Some(GateError::Stage {
                        gate: kind.name(),
                        action: request.action.clone(),
                        source,
                    });
                    break;
                }
            }
        }

        report.audit_sequence = self.emit_audit(ctx, request, failure.as_ref()).await;

        match failure {
            Some(err) => Err(err),
            None => {
                info!(
                    action = %request.action,
                    surface = %request.surface,
                    passed = report.passed.len(),
                    skipped = report.skipped.len(),
                    "Gate chain passed"
                );
                Ok(report)
            }
        }
    }

    /// Audit write failures are logged and swallowed.
    async fn emit_audit(
        &self,
        ctx: &RequestContext,
        request: &GateRequest,
        failure: Option<&GateError>,
    ) -> Option<u64> {
        let envelope = failure.map(ToEnvelope::to_envelope);
        let entry = AuditEntry {
            action: request.action.clone(),
            surface: request.surface.clone(),
            subject_type: request.subject_type.clone(),
            subject_id: request.subject_id.clone(),
            persist: !request.skip_metrics,
            outcome: if failure.is_some() {
                AuditOutcome::Denied
            } else {
                AuditOutcome::Allowed
            },
            code: envelope.as_ref().map(|e| e.code.clone()),
            gate: envelope.and_then(|e| e.gate),
        };
        match self.audit.append(ctx, entry).await {
            Ok(record) => Some(record.sequence),
            Err(err) => {
                warn!(
                    gate = gate_names::AUDIT,
                    action = %request.action,
                    trace_id = %ctx.trace_id(),
                    error = %err,
                    "Audit record could not be written"
                );
                None
            }
        }
    }
}

#[async_trait]
impl SwitchAuthorizer for GateChain {
    async fn authorize_switch(
        &self,
        ctx: &RequestContext,
        route: &ResourceRoute,
        to: BackendType,
    ) -> Result<(), ErrorEnvelope> {
        let surface = route
            .surface_id
            .as_deref()
            .or(ctx.surface_id())
            .unwrap_or(SWITCH_SURFACE);
        let request = GateRequest::new(SWITCH_BACKEND_ACTION, surface, ROUTE_SUBJECT)
            .subject_id(route.id.clone())
            .skip_metrics(true);

        if let Some(approvals) = &self.switch_approvals {
            if let Err(source) = approvals.evaluate_switch(ctx, surface).await {
                let err = GateError::Stage {
                    gate: gate_names::APPROVAL_LOCK,
                    action: SWITCH_BACKEND_ACTION.to_string(),
                    source,
                };
                warn!(
                    resource_kind = %route.resource_kind,
                    from = %route.backend_type,
                    to = %to,
                    error = %err,
                    "Backend switch lacks a scoped approval"
                );
                self.emit_audit(ctx, &request, Some(&err)).await;
                return Err(err.to_envelope());
            }
        }

        self.run_request(ctx, &request)
            .await
            .map_err(|err| err.to_envelope())?;
        info!(
            resource_kind = %route.resource_kind,
            from = %route.backend_type,
            to = %to,
            "Backend switch authorized"
        );
        Ok(())
    }
}

fn validate(gates: &[Arc<dyn Gate>]) -> Result<(), GateError> {
    let kinds: Vec<GateKind> = gates.iter().map(|g| g.kind()).collect();
    for pair in kinds.windows(2) {
        if pair[0] == pair[1] {
            return Err(GateError::Misconfigured(format!(
                "`{}` gate appears more than once",
                pair[1].name()
            )));
        }
        if pair[0].order() > pair[1].order() {
            return Err(GateError::Misconfigured(format!(
                "`{}` gate must run before `{}`",
                pair[1].name(),
                pair[0].name()
            )));
        }
    }
    if let Some(missing) = GateKind::REQUIRED.into_iter().find(|k| !kinds.contains(k)) {
        return Err(GateError::Misconfigured(format!("`{}` gate is missing", missing.name())));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::{MockGate, UnavailableKv};
    use bastion_kv::MemoryKv;
    use bastion_policy::PolicyError;
    use bastion_routing::{BackendResolver, RoutingRegistry};
    use std::sync::atomic::Ordering;

    fn resolver() -> Arc<BackendResolver> {
        Arc::new(BackendResolver::new(
            Arc::new(RoutingRegistry::in_memory()),
            Arc::new(MemoryKv::new()),
        ))
    }

    fn ctx() -> RequestContext {
        RequestContext::builder("t_demo", "saas", "dev", "p1")
            .surface("nexus")
            .user("u1")
            .build()
            .unwrap()
    }

    fn lock_required(request: &GateRequest) -> PolicyError {
        PolicyError::StrategyLockRequired {
            action: request.action.clone(),
            surface: request.surface.clone(),
            reason: "mock".into(),
        }
    }

    fn chain_with(gates: Vec<Arc<dyn Gate>>) -> (GateChain, Arc<AuditLog>) {
        let audit = Arc::new(AuditLog::new(resolver()));
        (GateChain::new(gates, Arc::clone(&audit)).unwrap(), audit)
    }

    #[tokio::test]
    async fn all_gates_pass_and_audit_once() {
        let (gates, counters) = MockGate::full_chain();
        let (chain, audit) = chain_with(gates);
        let ctx = ctx();

        let report = chain
            .run(&ctx, "pages:publish", "nexus", "page", Some("home"), false)
            .await
            .unwrap();
        assert_eq!(report.passed.len(), 6);
        assert!(report.skipped.is_empty());
        assert_eq!(report.audit_sequence, Some(1));
        assert!(counters.iter().all(|c| c.load(Ordering::SeqCst) == 1));

        let records = audit.list_recent(&ctx, 10).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].entry.outcome, AuditOutcome::Allowed);
        assert!(records[0].entry.persist);
    }

    #[tokio::test]
    async fn first_rejection_short_circuits() {
        let (mut gates, counters) = MockGate::full_chain();
        let approval = MockGate::rejecting(GateKind::ApprovalLock, lock_required);
        let approval_calls = approval.counter();
        gates[2] = Arc::new(approval);
        let (chain, audit) = chain_with(gates);
        let ctx = ctx();

        let err = chain
            .run(&ctx, "tool:search", "nexus", "page", None, false)
            .await
            .unwrap_err();
        assert_eq!(err.gate(), Some("approval_lock"));
        assert_eq!(err.to_envelope().code, "strategy_lock_required");

        assert_eq!(counters[0].load(Ordering::SeqCst), 1);
        assert_eq!(counters[1].load(Ordering::SeqCst), 1);
        assert_eq!(approval_calls.load(Ordering::SeqCst), 1);
        for later in &counters[3..] {
            assert_eq!(later.load(Ordering::SeqCst), 0);
        }

        let records = audit.list_recent(&ctx, 10).await.unwrap();
        assert_eq!(records[0].entry.outcome, AuditOutcome::Denied);
        assert_eq!(records[0].entry.code.as_deref(), Some("strategy_lock_required"));
        assert_eq!(records[0].entry.gate.as_deref(), Some("approval_lock"));
    }

    fn kill_switched(request: &GateRequest) -> PolicyError {
        PolicyError::KillSwitchBlocked {
            action: request.action.clone(),
            reason: "action disabled".into(),
            provider: None,
        }
    }

    #[tokio::test]
    async fn kill_switch_rejection_evaluates_nothing_else() {
        let (mut gates, counters) = MockGate::full_chain();
        let kill_switch = MockGate::rejecting(GateKind::KillSwitch, kill_switched);
        let kill_switch_calls = kill_switch.counter();
        gates[0] = Arc::new(kill_switch);
        let (chain, audit) = chain_with(gates);
        let ctx = ctx();

        let err = chain
            .run(&ctx, "tool:trade", "nexus", "page", None, false)
            .await
            .unwrap_err();
        assert_eq!(err.gate(), Some("kill_switch"));
        assert_eq!(err.to_envelope().code, "kill_switch_blocked");

        assert_eq!(kill_switch_calls.load(Ordering::SeqCst), 1);
        for later in &counters[1..] {
            assert_eq!(later.load(Ordering::SeqCst), 0);
        }
        let records = audit.list_recent(&ctx, 10).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].entry.gate.as_deref(), Some("kill_switch"));
    }

    #[tokio::test]
    async fn skip_metrics_bypasses_metric_gates() {
        let (gates, counters) = MockGate::full_chain();
        let (chain, audit) = chain_with(gates);
        let ctx = ctx();

        let report = chain
            .run(&ctx, "pages:edit", "nexus", "page", None, true)
            .await
            .unwrap();
        assert_eq!(report.passed, vec!["kill_switch", "license", "approval_lock"]);
        assert_eq!(report.skipped, vec!["budget", "kpi", "temperature"]);
        for metric in &counters[3..] {
            assert_eq!(metric.load(Ordering::SeqCst), 0);
        }
        let records = audit.list_recent(&ctx, 1).await.unwrap();
        assert!(!records[0].entry.persist);
    }

    #[tokio::test]
    async fn audit_failure_does_not_fail_the_run() {
        let (gates, _) = MockGate::full_chain();
        let broken = Arc::new(BackendResolver::new(
            Arc::new(RoutingRegistry::in_memory()),
            Arc::new(UnavailableKv),
        ));
        let chain = GateChain::new(gates, Arc::new(AuditLog::new(broken))).unwrap();
        let report = chain
            .run(&ctx(), "pages:publish", "nexus", "page", None, false)
            .await
            .unwrap();
        assert_eq!(report.audit_sequence, None);
    }

    #[test]
    fn misordered_missing_or_duplicate_gates_refuse_to_build() {
        let audit = Arc::new(AuditLog::new(resolver()));

        let (mut gates, _) = MockGate::full_chain();
        gates.swap(0, 1);
        let err = GateChain::new(gates, Arc::clone(&audit)).err().unwrap();
        assert!(matches!(err, GateError::Misconfigured(_)));

        let (mut gates, _) = MockGate::full_chain();
        gates.remove(4);
        let err = GateChain::new(gates, Arc::clone(&audit)).err().unwrap();
        assert!(err.to_string().contains("`kpi` gate is missing"));

        let (mut gates, _) = MockGate::full_chain();
        gates.insert(1, Arc::new(MockGate::passing(GateKind::KillSwitch)));
        let err = GateChain::new(gates, Arc::clone(&audit)).err().unwrap();
        assert!(err.to_string().contains("more than once"));
        assert_eq!(err.to_envelope().http_status, 503);

        let (mut gates, _) = MockGate::full_chain();
        gates.push(Arc::new(MockGate::passing(GateKind::RateLimit)));
        assert!(GateChain::new(gates, audit).is_ok());
    }

    #[tokio::test]
    async fn empty_action_is_invalid() {
        let (gates, counters) = MockGate::full_chain();
        let (chain, _) = chain_with(gates);
        let err = chain.run(&ctx(), " ", "nexus", "page", None, false).await.unwrap_err();
        assert!(matches!(err, GateError::InvalidRequest(_)));
        assert_eq!(counters[0].load(Ordering::SeqCst), 0);
    }
}
