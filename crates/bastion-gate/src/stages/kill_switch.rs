use std::sync::Arc;

use async_trait::async_trait;
use bastion_policy::{KillSwitchService, PolicyError};
use bastion_types::RequestContext;

use crate::context::{GateReport, GateRequest};
use crate::traits::{Gate, GateKind};

/// Gate 1: refuses actions on the tenant's disable list.
pub struct KillSwitchGate {
    service: Arc<KillSwitchService>,
}

impl KillSwitchGate {
    pub fn new(service: Arc<KillSwitchService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl Gate for KillSwitchGate {
    fn kind(&self) -> GateKind {
        GateKind::KillSwitch
    }

    async fn evaluate(
        &self,
        ctx: &RequestContext,
        request: &GateRequest,
        _report: &mut GateReport,
    ) -> Result<(), PolicyError> {
        self.service.evaluate(ctx, &request.action, &request.surface).await
    }
}
