//! Storage backend trait for persistence.
//!
//! The broker only ever appends broadcast messages and reads them back per
//! topic, newest first. Backends implement that contract; the dispatcher
//! never sees which one is in use.

use async_trait::async_trait;

use super::error::Result;
use super::models::StoredMessage;

/// Persistence operation for batch writes
#[derive(Debug, Clone)]
pub enum PersistenceOp {
    /// Append a broadcast message
    Record {
        topic: String,
        message: String,
        created_at_millis: i64,
    },
}

/// Append/query store of broadcast messages
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Append one message, returning it with its assigned id
    async fn record(&self, topic: &str, message: &str) -> Result<StoredMessage>;

    /// Append a batch of operations atomically, returning how many were written
    async fn batch_write(&self, ops: Vec<PersistenceOp>) -> Result<usize>;

    /// Up to `limit` messages for `topic`, newest first
    async fn query(&self, topic: &str, limit: usize) -> Result<Vec<StoredMessage>>;

    /// Flush all pending writes to disk
    async fn flush(&self) -> Result<()>;

    /// Close the backend (flush and release resources)
    async fn close(&self) -> Result<()> {
        self.flush().await
    }
}
