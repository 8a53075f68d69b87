//! Persistence configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// How a broadcast reaches the backend
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PersistenceMode {
    /// Recorded inline before fan-out, bounded by `record_timeout`
    #[default]
    Sync,
    /// Handed to a background writer that batches commits
    Async,
}

fn default_record_timeout() -> Duration {
    Duration::from_secs(2)
}

fn default_flush_interval() -> Duration {
    Duration::from_millis(100)
}

/// Persistence configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    /// Enable persistence (also registers the `/messages` route)
    pub enabled: bool,

    /// Fjall data directory
    pub path: PathBuf,

    /// Write mode: "sync" or "async"
    pub mode: PersistenceMode,

    /// Upper bound on one inline record (e.g., "2s")
    #[serde(default = "default_record_timeout", with = "humantime_serde")]
    pub record_timeout: Duration,

    /// Flush interval (e.g., "100ms", "1s")
    #[serde(default = "default_flush_interval", with = "humantime_serde")]
    pub flush_interval: Duration,

    /// Maximum batch size before forced flush
    pub max_batch_size: usize,

    /// Records that may wait for the background writer before new ones are dropped
    pub channel_capacity: usize,

    /// Maximum entries returned by the history endpoint
    pub history_limit: usize,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: PathBuf::from("./data"),
            mode: PersistenceMode::Sync,
            record_timeout: default_record_timeout(),
            flush_interval: default_flush_interval(),
            max_batch_size: 100,
            channel_capacity: 10_000,
            history_limit: 100,
        }
    }
}
