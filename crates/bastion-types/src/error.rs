use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Failure taxonomy shared by every component.
///
/// The kind decides the HTTP-equivalent status; the stable `code` on the
/// envelope decides what the caller actually matches on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Deliberate, user-facing refusal by a gate.
    PolicyRejection,
    /// Operator gap: a route or threshold has not been configured.
    MissingConfiguration,
    /// Optimistic-concurrency failure; re-read and retry.
    Conflict,
    NotFound,
    /// Storage call failed or timed out.
    BackendUnavailable,
    InvalidInput,
    RateLimited,
}

impl ErrorKind {
    pub fn http_status(self) -> u16 {
        match self {
            ErrorKind::PolicyRejection => 403,
            ErrorKind::MissingConfiguration => 503,
            ErrorKind::Conflict => 409,
            ErrorKind::NotFound => 404,
            ErrorKind::BackendUnavailable => 503,
            ErrorKind::InvalidInput => 400,
            ErrorKind::RateLimited => 429,
        }
    }

    /// Whether an idempotent read may be retried blindly after this failure.
    ///
    /// Mutations (`bump_version`, `append_command`) must re-read state first
    /// regardless of the answer here.
    pub fn is_retryable_read(self) -> bool {
        matches!(self, ErrorKind::BackendUnavailable | ErrorKind::RateLimited)
    }
}

/// Transport-neutral failure shape.
///
/// Serializes as
/// `{code, message, httpStatusEquivalent, gate?, actionName?, resourceKind?, details}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorEnvelope {
    pub code: String,
    pub message: String,
    #[serde(rename = "httpStatusEquivalent")]
    pub http_status: u16,
    pub kind: ErrorKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gate: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_kind: Option<String>,
    #[serde(default)]
    pub details: Map<String, Value>,
}

impl ErrorEnvelope {
    pub fn new(kind: ErrorKind, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            http_status: kind.http_status(),
            kind,
            gate: None,
            action_name: None,
            resource_kind: None,
            details: Map::new(),
        }
    }

    pub fn with_gate(mut self, gate: impl Into<String>) -> Self {
        self.gate = Some(gate.into());
        self
    }

    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.action_name = Some(action.into());
        self
    }

    pub fn with_resource_kind(mut self, resource_kind: impl Into<String>) -> Self {
        self.resource_kind = Some(resource_kind.into());
        self
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    pub fn with_details(mut self, details: Map<String, Value>) -> Self {
        self.details.extend(details);
        self
    }
}

/// Implemented by every error type that can cross the core's boundary.
pub trait ToEnvelope {
    fn to_envelope(&self) -> ErrorEnvelope;

    fn kind(&self) -> ErrorKind {
        self.to_envelope().kind
    }

    fn code(&self) -> String {
        self.to_envelope().code
    }
}

impl ToEnvelope for ErrorEnvelope {
    fn to_envelope(&self) -> ErrorEnvelope {
        self.clone()
    }
}
