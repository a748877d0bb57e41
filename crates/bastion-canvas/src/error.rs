use bastion_kv::KvError;
use bastion_routing::RoutingError;
use bastion_types::{ErrorEnvelope, ErrorKind, ToEnvelope};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CanvasError {
    /// The caller's base revision is not the current head. Re-fetch and rebase.
    #[error("canvas `{canvas_id}` is at revision {actual}, command was based on {expected}")]
    BaseRevMismatch {
        canvas_id: String,
        expected: u64,
        actual: u64,
    },

    #[error("invalid canvas command: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Routing(#[from] RoutingError),

    #[error(transparent)]
    Backend(#[from] KvError),
}

impl ToEnvelope for CanvasError {
    fn to_envelope(&self) -> ErrorEnvelope {
        match self {
            CanvasError::BaseRevMismatch {
                canvas_id,
                expected,
                actual,
            } => ErrorEnvelope::new(ErrorKind::Conflict, "base_rev_mismatch", self.to_string())
                .with_detail("canvas_id", canvas_id.clone())
                .with_detail("expected", *expected)
                .with_detail("actual", *actual),
            CanvasError::InvalidInput(_) => {
                ErrorEnvelope::new(ErrorKind::InvalidInput, "canvas.invalid_input", self.to_string())
            }
            CanvasError::Routing(err) => err.to_envelope(),
            CanvasError::Backend(err) => err.to_envelope(),
        }
    }
}
