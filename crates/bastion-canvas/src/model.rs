use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// An accepted command. Immutable once written.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CanvasCommand {
    pub canvas_id: String,
    pub command_id: String,
    pub revision: u64,
    pub command_type: String,
    pub command_args: Value,
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub user_id: String,
    pub base_rev: u64,
}

/// Current revision of a canvas. Revision 0 means no commands yet.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanvasHead {
    pub canvas_id: String,
    pub head_rev: u64,
    pub updated_at: DateTime<Utc>,
}

/// What an idempotency key produced the first time it was used.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    pub canvas_id: String,
    pub idempotency_key: String,
    pub command_id: String,
    pub revision: u64,
    pub event_id: String,
    pub recorded_at: DateTime<Utc>,
}

/// Input to [`crate::CanvasCommandStore::append_command`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AppendCommand {
    pub canvas_id: String,
    pub command_id: String,
    #[serde(default)]
    pub idempotency_key: Option<String>,
    pub base_rev: u64,
    pub command_type: String,
    #[serde(default)]
    pub command_args: Value,
    pub user_id: String,
}

impl AppendCommand {
    pub fn new(
        canvas_id: impl Into<String>,
        command_id: impl Into<String>,
        base_rev: u64,
        command_type: impl Into<String>,
        command_args: Value,
        user_id: impl Into<String>,
    ) -> Self {
        Self {
            canvas_id: canvas_id.into(),
            command_id: command_id.into(),
            idempotency_key: None,
            base_rev,
            command_type: command_type.into(),
            command_args,
            user_id: user_id.into(),
        }
    }

    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }
}
