use bastion_kv::KvError;
use bastion_types::{ErrorEnvelope, ErrorKind, ToEnvelope};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RoutingError {
    /// A required resource kind has no route for the requested scope.
    #[error("no route configured for required resource kind `{resource_kind}`")]
    MissingRoute { resource_kind: String },

    #[error("route for `{resource_kind}` not found")]
    RouteNotFound { resource_kind: String },

    #[error("invalid route: {0}")]
    InvalidRoute(String),

    #[error("changing the backend of `{resource_kind}` requires an authorized switch")]
    SwitchRequiresAuthorization { resource_kind: String },

    #[error("backend switch for `{resource_kind}` was rejected: {}", .rejection.message)]
    SwitchDenied {
        resource_kind: String,
        rejection: ErrorEnvelope,
    },

    #[error(transparent)]
    Backend(#[from] KvError),
}

impl ToEnvelope for RoutingError {
    fn to_envelope(&self) -> ErrorEnvelope {
        match self {
            RoutingError::MissingRoute { resource_kind } => ErrorEnvelope::new(
                ErrorKind::MissingConfiguration,
                format!("{resource_kind}.missing_route"),
                self.to_string(),
            )
            .with_resource_kind(resource_kind.clone()),
            RoutingError::RouteNotFound { resource_kind } => ErrorEnvelope::new(
                ErrorKind::NotFound,
                "routing.route_not_found",
                self.to_string(),
            )
            .with_resource_kind(resource_kind.clone()),
            RoutingError::InvalidRoute(_) => ErrorEnvelope::new(
                ErrorKind::InvalidInput,
                "routing.invalid_route",
                self.to_string(),
            ),
            RoutingError::SwitchRequiresAuthorization { resource_kind } => ErrorEnvelope::new(
                ErrorKind::Conflict,
                "routing.switch_requires_authorization",
                self.to_string(),
            )
            .with_resource_kind(resource_kind.clone()),
            RoutingError::SwitchDenied {
                resource_kind,
                rejection,
            } => rejection.clone().with_resource_kind(resource_kind.clone()),
            RoutingError::Backend(err) => err.to_envelope(),
        }
    }
}
