use async_trait::async_trait;
use bastion_policy::{gate_names, PolicyError};
use bastion_types::RequestContext;

use crate::context::{GateReport, GateRequest};

/// Position of a gate in the chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum GateKind {
    KillSwitch,
    License,
    ApprovalLock,
    Budget,
    Kpi,
    Temperature,
    RateLimit,
}

impl GateKind {
    /// Gates every chain must contain, in order.
    pub const REQUIRED: [GateKind; 6] = [
        GateKind::KillSwitch,
        GateKind::License,
        GateKind::ApprovalLock,
        GateKind::Budget,
        GateKind::Kpi,
        GateKind::Temperature,
    ];

    pub fn order(self) -> u8 {
        match self {
            GateKind::KillSwitch => 1,
            GateKind::License => 2,
            GateKind::ApprovalLock => 3,
            GateKind::Budget => 4,
            GateKind::Kpi => 5,
            GateKind::Temperature => 6,
            GateKind::RateLimit => 7,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            GateKind::KillSwitch => gate_names::KILL_SWITCH,
            GateKind::License => gate_names::LICENSE,
            GateKind::ApprovalLock => gate_names::APPROVAL_LOCK,
            GateKind::Budget => gate_names::BUDGET,
            GateKind::Kpi => gate_names::KPI,
            GateKind::Temperature => gate_names::TEMPERATURE,
            GateKind::RateLimit => gate_names::RATE_LIMIT,
        }
    }

    /// Metric gates are skipped for `skip_metrics` runs.
    pub fn is_metric(self) -> bool {
        matches!(self, GateKind::Budget | GateKind::Kpi | GateKind::Temperature)
    }
}

/// One check in the chain.
///
/// `evaluate` returns `Ok(())` to let the run continue. It may record what
/// it found on the report.
#[async_trait]
pub trait Gate: Send + Sync {
    fn kind(&self) -> GateKind;

    async fn evaluate(
        &self,
        ctx: &RequestContext,
        request: &GateRequest,
        report: &mut GateReport,
    ) -> Result<(), PolicyError>;
}
