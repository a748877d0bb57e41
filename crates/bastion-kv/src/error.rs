use std::time::Duration;

use bastion_types::{ErrorEnvelope, ErrorKind, ToEnvelope};
use thiserror::Error;

/// Result type for backend operations.
pub type KvResult<T> = Result<T, KvError>;

/// Backend-layer errors.
///
/// Messages never carry backend configuration (URLs, paths, credentials).
#[derive(Debug, Error)]
pub enum KvError {
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    #[error("backend call exceeded its {0:?} deadline")]
    Timeout(Duration),

    #[error("stored value could not be decoded: {0}")]
    Serialization(String),

    #[error("backend is not configured correctly: {0}")]
    InvalidConfig(String),
}

impl ToEnvelope for KvError {
    fn to_envelope(&self) -> ErrorEnvelope {
        match self {
            KvError::Unavailable(_) | KvError::Timeout(_) => ErrorEnvelope::new(
                ErrorKind::BackendUnavailable,
                "backend_unavailable",
                self.to_string(),
            ),
            KvError::Serialization(_) => ErrorEnvelope::new(
                ErrorKind::BackendUnavailable,
                "backend.corrupt_record",
                self.to_string(),
            ),
            KvError::InvalidConfig(_) => ErrorEnvelope::new(
                ErrorKind::MissingConfiguration,
                "backend.invalid_config",
                self.to_string(),
            ),
        }
    }
}

impl From<serde_json::Error> for KvError {
    fn from(err: serde_json::Error) -> Self {
        KvError::Serialization(err.to_string())
    }
}
