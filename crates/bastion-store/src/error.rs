use bastion_kv::KvError;
use bastion_routing::RoutingError;
use bastion_types::{ErrorEnvelope, ErrorKind, ScopeError, ToEnvelope};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("record id must be non-empty and must not contain '#'")]
    InvalidId,

    #[error("{resource_kind} `{id}` already exists")]
    RecordExists { resource_kind: String, id: String },

    #[error("{resource_kind} `{id}` not found")]
    RecordNotFound { resource_kind: String, id: String },

    /// Another writer committed the version this write was about to create.
    #[error("{resource_kind} `{id}` changed concurrently (expected version {expected}, found {actual})")]
    VersionConflict {
        resource_kind: String,
        id: String,
        expected: u64,
        actual: u64,
    },

    #[error(transparent)]
    Scope(#[from] ScopeError),

    #[error(transparent)]
    Routing(#[from] RoutingError),

    #[error(transparent)]
    Backend(#[from] KvError),
}

impl ToEnvelope for StoreError {
    fn to_envelope(&self) -> ErrorEnvelope {
        match self {
            StoreError::InvalidId => {
                ErrorEnvelope::new(ErrorKind::InvalidInput, "store.invalid_id", self.to_string())
            }
            StoreError::RecordExists { resource_kind, id } => {
                ErrorEnvelope::new(ErrorKind::Conflict, "record_exists", self.to_string())
                    .with_resource_kind(resource_kind.clone())
                    .with_detail("id", id.clone())
            }
            StoreError::RecordNotFound { resource_kind, id } => {
                ErrorEnvelope::new(ErrorKind::NotFound, "record_not_found", self.to_string())
                    .with_resource_kind(resource_kind.clone())
                    .with_detail("id", id.clone())
            }
            StoreError::VersionConflict {
                resource_kind,
                id,
                expected,
                actual,
            } => ErrorEnvelope::new(ErrorKind::Conflict, "version_conflict", self.to_string())
                .with_resource_kind(resource_kind.clone())
                .with_detail("id", id.clone())
                .with_detail("expected", *expected)
                .with_detail("actual", *actual),
            StoreError::Scope(err) => err.to_envelope(),
            StoreError::Routing(err) => err.to_envelope(),
            StoreError::Backend(err) => err.to_envelope(),
        }
    }
}
