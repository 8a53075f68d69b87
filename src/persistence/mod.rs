//! Persistence module for TurpleMQ.
//!
//! Keeps a durable log of broadcast messages so the HTTP surface can serve
//! per-topic history. Buffered (queue) messages are never persisted.
//!
//! Uses a trait-based design allowing different backends:
//! - `FjallBackend` (default) - Local LSM-tree storage
//!
//! `PersistenceManager` sits between the dispatcher and the backend. In
//! `sync` mode each record is written inline (bounded by a timeout); in
//! `async` mode records are handed to a background task that batches them.
//! Either way a failure is reported to the caller to log, and never stops
//! the broadcast.

mod backend;
mod error;
mod fjall;
mod models;

pub use backend::{MessageStore, PersistenceOp};
pub use error::{PersistenceError, Result};
pub use fjall::FjallBackend;
pub use models::{now_millis, HistoryEntry, StoredMessage};

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::{PersistenceConfig, PersistenceMode};

/// Runtime settings for the manager
#[derive(Debug, Clone)]
pub struct PersistenceSettings {
    pub mode: PersistenceMode,
    /// Upper bound on an inline (sync mode) record
    pub record_timeout: Duration,
    /// Interval between background flushes (async mode)
    pub flush_interval: Duration,
    /// Maximum batch size before forced flush (async mode)
    pub max_batch_size: usize,
    /// Capacity of the background channel (async mode)
    pub channel_capacity: usize,
}

impl Default for PersistenceSettings {
    fn default() -> Self {
        Self {
            mode: PersistenceMode::Sync,
            record_timeout: Duration::from_secs(2),
            flush_interval: Duration::from_millis(100),
            max_batch_size: 100,
            channel_capacity: 10_000,
        }
    }
}

impl From<&PersistenceConfig> for PersistenceSettings {
    fn from(config: &PersistenceConfig) -> Self {
        Self {
            mode: config.mode,
            record_timeout: config.record_timeout,
            flush_interval: config.flush_interval,
            max_batch_size: config.max_batch_size.max(1),
            channel_capacity: config.channel_capacity.max(1),
        }
    }
}

/// Persistence manager that records broadcasts and serves history
pub struct PersistenceManager {
    backend: Arc<dyn MessageStore>,
    settings: PersistenceSettings,
    tx: Option<mpsc::Sender<PersistenceOp>>,
    shutdown_tx: Option<mpsc::Sender<()>>,
    writer: Mutex<Option<JoinHandle<()>>>,
}

impl PersistenceManager {
    /// Create a new persistence manager with the given backend
    ///
    /// In async mode this spawns a background task that batches and commits
    /// writes, so it must be called inside a tokio runtime.
    pub fn new(backend: Arc<dyn MessageStore>, settings: PersistenceSettings) -> Self {
        match settings.mode {
            PersistenceMode::Sync => Self {
                backend,
                settings,
                tx: None,
                shutdown_tx: None,
                writer: Mutex::new(None),
            },
            PersistenceMode::Async => {
                let (tx, rx) = mpsc::channel(settings.channel_capacity);
                let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

                let writer = tokio::spawn(Self::writer_loop(
                    backend.clone(),
                    rx,
                    shutdown_rx,
                    settings.flush_interval,
                    settings.max_batch_size,
                ));

                Self {
                    backend,
                    settings,
                    tx: Some(tx),
                    shutdown_tx: Some(shutdown_tx),
                    writer: Mutex::new(Some(writer)),
                }
            }
        }
    }

    pub fn mode(&self) -> PersistenceMode {
        self.settings.mode
    }

    /// Record a broadcast message.
    ///
    /// Sync mode waits for the backend (at most `record_timeout`); async mode
    /// only enqueues, dropping the record if the channel is full.
    pub async fn record(&self, topic: &str, message: &str) -> Result<()> {
        match &self.tx {
            None => {
                let stored = tokio::time::timeout(
                    self.settings.record_timeout,
                    self.backend.record(topic, message),
                )
                .await
                .map_err(|_| PersistenceError::Timeout)??;
                debug!("Recorded message {} for topic {:?}", stored.id, topic);
                Ok(())
            }
            Some(tx) => {
                let op = PersistenceOp::Record {
                    topic: topic.to_string(),
                    message: message.to_string(),
                    created_at_millis: now_millis(),
                };
                tx.try_send(op).map_err(|e| match e {
                    mpsc::error::TrySendError::Full(_) => {
                        warn!("Persistence channel full, dropping record for {:?}", topic);
                        PersistenceError::Storage("persistence channel full".to_string())
                    }
                    mpsc::error::TrySendError::Closed(_) => PersistenceError::ChannelClosed,
                })
            }
        }
    }

    /// Messages for `topic`, newest first, at most `limit`
    pub async fn history(&self, topic: &str, limit: usize) -> Result<Vec<StoredMessage>> {
        self.backend.query(topic, limit).await
    }

    /// Gracefully shutdown the persistence manager
    ///
    /// This flushes all pending writes and closes the backend.
    pub async fn shutdown(&self) -> Result<()> {
        info!("Shutting down persistence manager");

        if let Some(shutdown_tx) = &self.shutdown_tx {
            // Signal writer task to stop
            let _ = shutdown_tx.send(()).await;
        }

        let writer = self.writer.lock().take();
        if let Some(writer) = writer {
            if let Err(e) = writer.await {
                error!("Persistence writer task failed: {}", e);
            }
        }

        // Final flush
        self.backend.close().await?;

        info!("Persistence manager shutdown complete");
        Ok(())
    }

    /// Background writer loop that batches and commits writes
    async fn writer_loop(
        backend: Arc<dyn MessageStore>,
        mut rx: mpsc::Receiver<PersistenceOp>,
        mut shutdown_rx: mpsc::Receiver<()>,
        flush_interval: Duration,
        max_batch_size: usize,
    ) {
        let mut batch = Vec::with_capacity(max_batch_size);
        let mut interval = tokio::time::interval(flush_interval);

        loop {
            tokio::select! {
                // Receive operations
                op = rx.recv() => {
                    match op {
                        Some(op) => {
                            batch.push(op);

                            // Flush immediately if batch is large
                            if batch.len() >= max_batch_size {
                                Self::flush_batch(&backend, &mut batch, "max batch").await;
                            }
                        }
                        None => {
                            // Channel closed, flush remaining and exit
                            Self::flush_batch(&backend, &mut batch, "channel closed").await;
                            break;
                        }
                    }
                }

                // Periodic flush
                _ = interval.tick() => {
                    Self::flush_batch(&backend, &mut batch, "interval").await;
                }

                // Shutdown signal
                _ = shutdown_rx.recv() => {
                    info!("Persistence writer received shutdown signal");
                    // Drain whatever producers already queued
                    while let Ok(op) = rx.try_recv() {
                        batch.push(op);
                    }
                    Self::flush_batch(&backend, &mut batch, "shutdown").await;
                    break;
                }
            }
        }

        info!("Persistence writer loop exited");
    }

    async fn flush_batch(
        backend: &Arc<dyn MessageStore>,
        batch: &mut Vec<PersistenceOp>,
        reason: &str,
    ) {
        if batch.is_empty() {
            return;
        }
        let count = batch.len();
        match backend.batch_write(std::mem::take(batch)).await {
            Ok(_) => debug!("Flushed {} records ({})", count, reason),
            Err(e) => error!("Failed to write batch of {} records: {}", count, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    fn open(temp_dir: &tempfile::TempDir) -> Arc<dyn MessageStore> {
        Arc::new(FjallBackend::open(temp_dir.path()).unwrap())
    }

    /// Backend that never finishes a record
    struct StuckStore;

    #[async_trait]
    impl MessageStore for StuckStore {
        async fn record(&self, _topic: &str, _message: &str) -> Result<StoredMessage> {
            std::future::pending().await
        }
        async fn batch_write(&self, _ops: Vec<PersistenceOp>) -> Result<usize> {
            Ok(0)
        }
        async fn query(&self, _topic: &str, _limit: usize) -> Result<Vec<StoredMessage>> {
            Ok(Vec::new())
        }
        async fn flush(&self) -> Result<()> {
            Ok(())
        }
    }

    /// Backend whose commits block a thread for a while
    struct SlowStore {
        delay: Duration,
    }

    #[async_trait]
    impl MessageStore for SlowStore {
        async fn record(&self, topic: &str, message: &str) -> Result<StoredMessage> {
            let delay = self.delay;
            let record = StoredMessage {
                id: 1,
                topic: topic.to_string(),
                message: message.to_string(),
                created_at_millis: now_millis(),
            };
            tokio::task::spawn_blocking(move || {
                std::thread::sleep(delay);
                Ok::<_, PersistenceError>(record)
            })
            .await?
        }
        async fn batch_write(&self, _ops: Vec<PersistenceOp>) -> Result<usize> {
            Ok(0)
        }
        async fn query(&self, _topic: &str, _limit: usize) -> Result<Vec<StoredMessage>> {
            Ok(Vec::new())
        }
        async fn flush(&self) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_sync_mode_records_inline() {
        let temp_dir = tempfile::tempdir().unwrap();
        let manager = PersistenceManager::new(open(&temp_dir), PersistenceSettings::default());

        manager.record("news", "one").await.unwrap();
        manager.record("news", "two").await.unwrap();

        let history = manager.history("news", 100).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].message, "two");
    }

    #[tokio::test]
    async fn test_sync_mode_times_out() {
        let settings = PersistenceSettings {
            record_timeout: Duration::from_millis(20),
            ..PersistenceSettings::default()
        };
        let manager = PersistenceManager::new(Arc::new(StuckStore), settings);

        let result = manager.record("news", "never").await;
        assert!(matches!(result, Err(PersistenceError::Timeout)));
    }

    #[tokio::test]
    async fn test_sync_mode_times_out_on_blocking_commit() {
        let settings = PersistenceSettings {
            record_timeout: Duration::from_millis(20),
            ..PersistenceSettings::default()
        };
        let store = SlowStore {
            delay: Duration::from_millis(300),
        };
        let manager = PersistenceManager::new(Arc::new(store), settings);

        let start = std::time::Instant::now();
        let result = manager.record("news", "slow").await;
        assert!(matches!(result, Err(PersistenceError::Timeout)));
        assert!(start.elapsed() < Duration::from_millis(250));
    }

    #[tokio::test]
    async fn test_async_mode_flushes_on_shutdown() {
        let temp_dir = tempfile::tempdir().unwrap();
        let backend = open(&temp_dir);
        let settings = PersistenceSettings {
            mode: PersistenceMode::Async,
            flush_interval: Duration::from_secs(60),
            ..PersistenceSettings::default()
        };
        let manager = PersistenceManager::new(backend.clone(), settings);

        for i in 0..5 {
            manager.record("t", &i.to_string()).await.unwrap();
        }
        manager.shutdown().await.unwrap();

        let history = backend.query("t", 100).await.unwrap();
        let messages: Vec<_> = history.into_iter().map(|m| m.message).collect();
        assert_eq!(messages, vec!["4", "3", "2", "1", "0"]);
    }

    #[tokio::test]
    async fn test_async_mode_flushes_full_batch() {
        let temp_dir = tempfile::tempdir().unwrap();
        let backend = open(&temp_dir);
        let settings = PersistenceSettings {
            mode: PersistenceMode::Async,
            flush_interval: Duration::from_secs(60),
            max_batch_size: 3,
            ..PersistenceSettings::default()
        };
        let manager = PersistenceManager::new(backend.clone(), settings);

        for i in 0..3 {
            manager.record("t", &i.to_string()).await.unwrap();
        }

        let mut found = 0;
        for _ in 0..50 {
            found = backend.query("t", 100).await.unwrap().len();
            if found == 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(found, 3);
    }

    #[tokio::test]
    async fn test_async_record_after_shutdown_fails() {
        let temp_dir = tempfile::tempdir().unwrap();
        let settings = PersistenceSettings {
            mode: PersistenceMode::Async,
            ..PersistenceSettings::default()
        };
        let manager = PersistenceManager::new(open(&temp_dir), settings);
        manager.shutdown().await.unwrap();

        let result = manager.record("t", "late").await;
        assert!(matches!(result, Err(PersistenceError::ChannelClosed)));
    }
}
