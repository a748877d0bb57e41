use std::sync::Arc;

use async_trait::async_trait;
use bastion_policy::{PolicyError, TemperatureService};
use bastion_types::RequestContext;

use crate::context::{GateReport, GateRequest};
use crate::traits::{Gate, GateKind};

/// Gate 6: windowed metric averages must stay inside their bands.
pub struct TemperatureGate {
    service: Arc<TemperatureService>,
}

impl TemperatureGate {
    pub fn new(service: Arc<TemperatureService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl Gate for TemperatureGate {
    fn kind(&self) -> GateKind {
        GateKind::Temperature
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
