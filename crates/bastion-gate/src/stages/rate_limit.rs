use std::sync::Arc;

use async_trait::async_trait;
use bastion_policy::{PolicyError, RateLimiter};
use bastion_types::RequestContext;

use crate::context::{GateReport, GateRequest};
use crate::traits::{Gate, GateKind};

/// Optional gate after the policy checks. Only checks the window; the hit
/// is left pending on the report and counted by [`crate::GateChain::commit`]
/// once the guarded operation succeeds.
pub struct RateLimitGate {
    limiter: Arc<RateLimiter>,
}

impl RateLimitGate {
    pub fn new(limiter: Arc<RateLimiter>) -> Self {
        Self { limiter }
    }
}

#[async_trait]
impl Gate for RateLimitGate {
    fn kind(&self) -> GateKind {
        GateKind::RateLimit
    }

    async fn evaluate(
        &self,
        ctx: &RequestContext,
        request: &GateRequest,
        report: &mut GateReport,
    ) -> Result<(), PolicyError> {
        self.limiter.check(ctx, &request.action).await?;
        report.pending_rate_limit = Some(request.action.clone());
        Ok(())
    }
}
