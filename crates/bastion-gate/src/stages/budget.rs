use std::sync::Arc;

use async_trait::async_trait;
use bastion_policy::{BudgetService, PolicyError};
use bastion_types::RequestContext;

use crate::context::{GateReport, GateRequest};
use crate::traits::{Gate, GateKind};

/// Gate 4: recent usage plus the estimated cost must stay within the
/// surface threshold. The check is recorded on the report.
pub struct BudgetGate {
    service: Arc<BudgetService>,
}

impl BudgetGate {
    pub fn new(service: Arc<BudgetService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl Gate for BudgetGate {
    fn kind(&self) -> GateKind {
        GateKind::Budget
    }

    async fn evaluate(
        &self,
        ctx: &RequestContext,
        request: &GateRequest,
        report: &mut GateReport,
    ) -> Result<(), PolicyError> {
        let check = self
            .service
            .evaluate(ctx, &request.surface, request.estimated_cost.unwrap_or(0.0))
            .await?;
        report.budget = Some(check);
        Ok(())
    }
}
