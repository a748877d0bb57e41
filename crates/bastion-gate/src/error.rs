use bastion_policy::PolicyError;
use bastion_types::{ErrorEnvelope, ErrorKind, ToEnvelope};
use thiserror::Error;

/// Errors from the gate chain.
#[derive(Error, Debug)]
pub enum GateError {
    /// The chain was assembled with missing, duplicated or misordered gates.
    #[error("gate chain misconfigured: {0}")]
    Misconfigured(String),

    #[error("invalid gate request: {0}")]
    InvalidRequest(String),

    /// A gate rejected the request or could not reach its policy data.
    #[error("gate `{gate}` stopped `{action}`: {source}")]
    Stage {
        gate: &'static str,
        action: String,
        #[source]
        source: PolicyError,
    },
}

impl GateError {
    /// Name of the gate that stopped the run.
    pub fn gate(&self) -> Option<&'static str> {
        match self {
            GateError::Stage { gate, .. } => Some(gate),
            _ => None,
        }
    }

    pub fn policy_error(&self) -> Option<&PolicyError> {
        match self {
            GateError::Stage { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl ToEnvelope for GateError {
    fn to_envelope(&self) -> ErrorEnvelope {
        match self {
            GateError::Misconfigured(_) => ErrorEnvelope::new(
                ErrorKind::MissingConfiguration,
                "gate.misconfigured",
                self.to_string(),
            ),
            GateError::InvalidRequest(_) => {
                ErrorEnvelope::new(ErrorKind::InvalidInput, "gate.invalid_request", self.to_string())
            }
            GateError::Stage {
                gate,
                action,
                source,
            } => {
                let mut envelope = source.to_envelope();
                if envelope.gate.is_none() {
                    envelope = envelope.with_gate(*gate);
                }
                if envelope.action_name.is_none() {
                    envelope = envelope.with_action(action.clone());
                }
                envelope
            }
        }
    }
}
