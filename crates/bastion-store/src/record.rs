use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One version of a stored artifact.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VersionedRecord<T> {
    pub id: String,
    /// Starts at 1, +1 per mutation.
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Tombstone marker.
    pub deleted: bool,
    pub payload: T,
}

impl<T> VersionedRecord<T> {
    pub fn is_live(&self) -> bool {
        !self.deleted
    }
}
