//! Fjall-based storage backend implementation.
//!
//! Uses fjall (an LSM-tree based embedded database) for local persistence.
//!
//! Key layout in the `messages` partition is `topic ++ 0x00 ++ id (u64 BE)`,
//! so a reverse prefix scan over one topic yields its messages newest first.
//! The next id lives in the `meta` partition and is committed in the same
//! batch as the messages that consume it.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use fjall::{Batch, Config, Keyspace, PartitionCreateOptions, PartitionHandle, PersistMode};
use parking_lot::Mutex;

use super::backend::{MessageStore, PersistenceOp};
use super::error::{PersistenceError, Result};
use super::models::{now_millis, StoredMessage};

const NEXT_ID_KEY: &str = "next_id";

/// Fjall-based storage backend
///
/// Every keyspace call runs on tokio's blocking pool, so a slow commit or
/// scan never stalls the worker threads that drive sessions.
pub struct FjallBackend {
    store: Arc<Store>,
}

/// Keyspace handles shared with blocking tasks
struct Store {
    keyspace: Keyspace,
    messages: PartitionHandle,
    meta: PartitionHandle,
    /// Next id to assign; the lock also serializes commits so ids hit disk in order
    next_id: Mutex<u64>,
}

/// Serialize a value using bincode
fn serialize<T: bincode::Encode>(value: &T) -> Result<Vec<u8>> {
    bincode::encode_to_vec(value, bincode::config::standard()).map_err(PersistenceError::from)
}

/// Deserialize a value using bincode
fn deserialize<T: bincode::Decode<()>>(bytes: &[u8]) -> Result<T> {
    bincode::decode_from_slice(bytes, bincode::config::standard())
        .map(|(value, _)| value)
        .map_err(PersistenceError::from)
}

fn topic_prefix(topic: &str) -> Vec<u8> {
    let mut prefix = Vec::with_capacity(topic.len() + 1);
    prefix.extend_from_slice(topic.as_bytes());
    prefix.push(0);
    prefix
}

fn message_key(topic: &str, id: u64) -> Vec<u8> {
    let mut key = topic_prefix(topic);
    key.extend_from_slice(&id.to_be_bytes());
    key
}

impl FjallBackend {
    /// Open a fjall backend at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let keyspace = Config::new(path).open()?;

        let messages = keyspace.open_partition("messages", PartitionCreateOptions::default())?;
        let meta = keyspace.open_partition("meta", PartitionCreateOptions::default())?;

        let next_id = match meta.get(NEXT_ID_KEY)? {
            Some(bytes) => deserialize::<u64>(&bytes)?,
            None => 1,
        };

        Ok(Self {
            store: Arc::new(Store {
                keyspace,
                messages,
                meta,
                next_id: Mutex::new(next_id),
            }),
        })
    }

    /// Run `op` against the store on the blocking pool
    async fn blocking<T, F>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Store) -> Result<T> + Send + 'static,
    {
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || op(&store)).await?
    }
}

impl Store {
    /// Assign ids and commit messages in one batch
    fn append(&self, entries: Vec<(String, String, i64)>) -> Result<Vec<StoredMessage>> {
        let mut next_id = self.next_id.lock();
        let mut batch: Batch = self.keyspace.batch();
        let mut stored = Vec::with_capacity(entries.len());
        let mut id = *next_id;

        for (topic, message, created_at_millis) in entries {
            let record = StoredMessage {
                id,
                topic,
                message,
                created_at_millis,
            };
            batch.insert(
                &self.messages,
                message_key(&record.topic, id),
                serialize(&record)?,
            );
            stored.push(record);
            id += 1;
        }

        batch.insert(&self.meta, NEXT_ID_KEY, serialize(&id)?);
        batch.commit()?;
        *next_id = id;
        Ok(stored)
    }

    fn scan(&self, topic: &str, limit: usize) -> Result<Vec<StoredMessage>> {
        let mut result = Vec::new();
        for item in self.messages.prefix(topic_prefix(topic)).rev() {
            if result.len() >= limit {
                break;
            }
            let (_key, value) = item?;
            let message: StoredMessage = deserialize(&value)?;
            // A topic containing 0x00 can share a prefix with another topic
            if message.topic == topic {
                result.push(message);
            }
        }
        Ok(result)
    }
}

#[async_trait]
impl MessageStore for FjallBackend {
    async fn record(&self, topic: &str, message: &str) -> Result<StoredMessage> {
        let entry = (topic.to_string(), message.to_string(), now_millis());
        let mut stored = self.blocking(move |store| store.append(vec![entry])).await?;
        stored
            .pop()
            .ok_or_else(|| PersistenceError::Storage("empty append result".to_string()))
    }

    async fn batch_write(&self, ops: Vec<PersistenceOp>) -> Result<usize> {
        let entries: Vec<_> = ops
            .into_iter()
            .map(|op| match op {
                PersistenceOp::Record {
                    topic,
                    message,
                    created_at_millis,
                } => (topic, message, created_at_millis),
            })
            .collect();
        if entries.is_empty() {
            return Ok(0);
        }
        self.blocking(move |store| store.append(entries).map(|stored| stored.len()))
            .await
    }

    async fn query(&self, topic: &str, limit: usize) -> Result<Vec<StoredMessage>> {
        let topic = topic.to_string();
        self.blocking(move |store| store.scan(&topic, limit)).await
    }

    async fn flush(&self) -> Result<()> {
        self.blocking(|store| {
            store.keyspace.persist(PersistMode::SyncAll)?;
            Ok(())
        })
        .await
    }

    async fn close(&self) -> Result<()> {
        // Flush before closing
        self.flush().await?;
        // fjall handles cleanup on drop
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_record_assigns_increasing_ids() {
        let temp_dir = tempfile::tempdir().unwrap();
        let backend = FjallBackend::open(temp_dir.path()).unwrap();

        let first = backend.record("news", "one").await.unwrap();
        let second = backend.record("sports", "two").await.unwrap();
        assert_eq!(first.id, 1);
        assert_eq!(second.id, 2);
    }

    #[tokio::test]
    async fn test_concurrent_records_get_unique_ids() {
        let temp_dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(FjallBackend::open(temp_dir.path()).unwrap());

        let tasks: Vec<_> = (0..16)
            .map(|i| {
                let backend = backend.clone();
                tokio::spawn(async move { backend.record("t", &i.to_string()).await })
            })
            .collect();
        let mut ids = Vec::new();
        for task in tasks {
            ids.push(task.await.unwrap().unwrap().id);
        }
        ids.sort_unstable();
        assert_eq!(ids, (1..=16).collect::<Vec<u64>>());
        assert_eq!(backend.query("t", 100).await.unwrap().len(), 16);
    }

    #[tokio::test]
    async fn test_query_is_newest_first_and_per_topic() {
        let temp_dir = tempfile::tempdir().unwrap();
        let backend = FjallBackend::open(temp_dir.path()).unwrap();

        backend.record("news", "a").await.unwrap();
        backend.record("other", "x").await.unwrap();
        backend.record("news", "b").await.unwrap();
        backend.record("news", "c").await.unwrap();

        let messages: Vec<_> = backend
            .query("news", 100)
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.message)
            .collect();
        assert_eq!(messages, vec!["c", "b", "a"]);
        assert!(backend.query("missing", 100).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_query_respects_limit() {
        let temp_dir = tempfile::tempdir().unwrap();
        let backend = FjallBackend::open(temp_dir.path()).unwrap();

        for i in 0..120 {
            backend.record("busy", &i.to_string()).await.unwrap();
        }
        let messages = backend.query("busy", 100).await.unwrap();
        assert_eq!(messages.len(), 100);
        assert_eq!(messages[0].message, "119");
        assert_eq!(messages[99].message, "20");
    }

    #[tokio::test]
    async fn test_prefix_topics_do_not_mix() {
        let temp_dir = tempfile::tempdir().unwrap();
        let backend = FjallBackend::open(temp_dir.path()).unwrap();

        backend.record("a", "short").await.unwrap();
        backend.record("a\0b", "tricky").await.unwrap();
        backend.record("ab", "longer").await.unwrap();

        let a: Vec<_> = backend.query("a", 10).await.unwrap();
        assert_eq!(a.len(), 1);
        assert_eq!(a[0].message, "short");
    }

    #[tokio::test]
    async fn test_ids_survive_reopen() {
        let temp_dir = tempfile::tempdir().unwrap();
        {
            let backend = FjallBackend::open(temp_dir.path()).unwrap();
            backend.record("news", "before").await.unwrap();
            backend.record("news", "restart").await.unwrap();
            backend.close().await.unwrap();
        }

        let backend = FjallBackend::open(temp_dir.path()).unwrap();
        let next = backend.record("news", "after").await.unwrap();
        assert_eq!(next.id, 3);
        let history = backend.query("news", 100).await.unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].message, "after");
    }

    #[tokio::test]
    async fn test_batch_write() {
        let temp_dir = tempfile::tempdir().unwrap();
        let backend = FjallBackend::open(temp_dir.path()).unwrap();

        let ops = vec![
            PersistenceOp::Record {
                topic: "t".to_string(),
                message: "1".to_string(),
                created_at_millis: now_millis(),
            },
            PersistenceOp::Record {
                topic: "t".to_string(),
                message: "2".to_string(),
                created_at_millis: now_millis(),
            },
        ];
        assert_eq!(backend.batch_write(ops).await.unwrap(), 2);
        assert_eq!(backend.batch_write(Vec::new()).await.unwrap(), 0);

        let history = backend.query("t", 100).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].message, "2");
    }
}
