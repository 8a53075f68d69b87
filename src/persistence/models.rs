//! Serializable data models for persistence.

use bincode::{Decode, Encode};
use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;

/// A broadcast message as stored on disk
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct StoredMessage {
    /// Monotonic id, unique across topics and restarts
    pub id: u64,
    pub topic: String,
    pub message: String,
    /// Unix timestamp in milliseconds when the message was recorded
    pub created_at_millis: i64,
}

impl StoredMessage {
    pub fn created_at(&self) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(self.created_at_millis)
            .single()
            .unwrap_or_default()
    }
}

/// One row of the history API response
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoryEntry {
    pub id: u64,
    pub topic: String,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

impl From<StoredMessage> for HistoryEntry {
    fn from(stored: StoredMessage) -> Self {
        let created_at = stored.created_at();
        Self {
            id: stored.id,
            topic: stored.topic,
            message: stored.message,
            created_at,
        }
    }
}

/// Current wall-clock time in Unix milliseconds
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}
