use std::sync::Arc;

use async_trait::async_trait;
use bastion_policy::{LicenseService, PolicyError};
use bastion_types::RequestContext;

use crate::context::{GateReport, GateRequest};
use crate::traits::{Gate, GateKind};

/// Gate 2: every firearm bound to the action needs an active grant held by
/// the calling agent or user.
pub struct LicenseGate {
    service: Arc<LicenseService>,
}

impl LicenseGate {
    pub fn new(service: Arc<LicenseService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl Gate for LicenseGate {
    fn kind(&self) -> GateKind {
        GateKind::License
    }

    async fn evaluate(
        &self,
        ctx: &RequestContext,
        request: &GateRequest,
        _report: &mut GateReport,
    ) -> Result<(), PolicyError> {
        self.service.evaluate(ctx, &request.action).await
    }
}
