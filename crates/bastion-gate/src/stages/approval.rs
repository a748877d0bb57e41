use std::sync::Arc;

use async_trait::async_trait;
use bastion_policy::{ApprovalService, PolicyError};
use bastion_types::RequestContext;

use crate::context::{GateReport, GateRequest};
use crate::traits::{Gate, GateKind};

/// Gate 3: lock-requiring actions need an approved strategy lock.
pub struct ApprovalLockGate {
    service: Arc<ApprovalService>,
}

impl ApprovalLockGate {
    pub fn new(service: Arc<ApprovalService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl Gate for ApprovalLockGate {
    fn kind(&self) -> GateKind {
        GateKind::ApprovalLock
    }

    async fn evaluate(
        &self,
        ctx: &RequestContext,
        request: &GateRequest,
        _report: &mut GateReport,
    ) -> Result<(), PolicyError> {
        self.service
            .evaluate(
                ctx,
                &request.surface,
                &request.action,
                &request.subject_type,
                request.subject_id.as_deref(),
            )
            .await
    }
}
