use bastion_canvas::CanvasError;
use bastion_gate::GateError;
use bastion_routing::RoutingError;
use bastion_store::StoreError;
use bastion_types::{ErrorEnvelope, ToEnvelope};
use thiserror::Error;

/// Errors from the runtime facades.
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error(transparent)]
    Gate(#[from] GateError),

    #[error(transparent)]
    Canvas(#[from] CanvasError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Routing(#[from] RoutingError),
}

impl ToEnvelope for RuntimeError {
    fn to_envelope(&self) -> ErrorEnvelope {
        match self {
            RuntimeError::Gate(err) => err.to_envelope(),
            RuntimeError::Canvas(err) => err.to_envelope(),
            RuntimeError::Store(err) => err.to_envelope(),
            RuntimeError::Routing(err) => err.to_envelope(),
        }
    }
}
