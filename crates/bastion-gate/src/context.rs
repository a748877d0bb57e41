use bastion_policy::BudgetCheck;

/// What the caller is about to do.
#[derive(Clone, Debug, PartialEq)]
pub struct GateRequest {
    pub action: String,
    pub surface: String,
    pub subject_type: String,
    pub subject_id: Option<String>,
    pub skip_metrics: bool,
    /// Cost the guarded operation is expected to add; counted by the
    /// budget gate on top of recent usage.
    pub estimated_cost: Option<f64>,
}

impl GateRequest {
    pub fn new(
        action: impl Into<String>,
        surface: impl Into<String>,
        subject_type: impl Into<String>,
    ) -> Self {
        Self {
            action: action.into(),
            surface: surface.into(),
            subject_type: subject_type.into(),
            subject_id: None,
            skip_metrics: false,
            estimated_cost: None,
        }
    }

    pub fn subject_id(mut self, subject_id: impl Into<String>) -> Self {
        self.subject_id = Some(subject_id.into());
        self
    }

    pub fn skip_metrics(mut self, skip: bool) -> Self {
        self.skip_metrics = skip;
        self
    }

    pub fn estimated_cost(mut self, cost: f64) -> Self {
        self.estimated_cost = Some(cost);
        self
    }
}

/// Trace of a passing run.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct GateReport {
    pub trace_id: String,
    pub passed: Vec<&'static str>,
    pub skipped: Vec<&'static str>,
    pub budget: Option<BudgetCheck>,
    /// Sequence of the audit record, when one was written.
    pub audit_sequence: Option<u64>,
    /// Action whose rate-limit hit is counted on commit.
    pub pending_rate_limit: Option<String>,
}

impl GateReport {
    pub(crate) fn new(trace_id: &str) -> Self {
        Self {
            trace_id: trace_id.to_string(),
            ..Default::default()
        }
    }
}
