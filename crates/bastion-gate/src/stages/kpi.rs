use std::sync::Arc;

use async_trait::async_trait;
use bastion_policy::{KpiService, PolicyError};
use bastion_types::RequestContext;

use crate::context::{GateReport, GateRequest};
use crate::traits::{Gate, GateKind};

/// Gate 5: latest KPI observations must sit inside their corridors.
pub struct KpiGate {
    service: Arc<KpiService>,
}

impl KpiGate {
    pub fn new(service: Arc<KpiService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl Gate for KpiGate {
    fn kind(&self) -> GateKind {
        GateKind::Kpi
    }

    async fn evaluate(
        &self,
        ctx: &RequestContext,
        request: &GateRequest,
        _report: &mut GateReport,
    ) -> Result<(), PolicyError> {
        self.service.evaluate(ctx, &request.surface).await
    }
}
