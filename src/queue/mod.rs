//! Point-to-point queue store
//!
//! One FIFO buffer per topic. Producers append, consumers pop the oldest
//! entry. All access goes through a single `RwLock`; every operation that
//! touches a buffer takes the exclusive side, so concurrent enqueues on a
//! topic are serialized and pop order equals completion order of the pushes.

use std::collections::VecDeque;
use std::fmt;

use ahash::AHashMap;
use parking_lot::RwLock;

/// Capacity policy applied to every topic buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueueBound {
    /// No limit; enqueue never fails
    #[default]
    Unbounded,
    /// At most `n` pending payloads per topic; further enqueues are rejected
    Bounded(usize),
}

impl QueueBound {
    /// Build from a configured capacity where 0 means unbounded
    pub fn from_capacity(capacity: usize) -> Self {
        if capacity == 0 {
            QueueBound::Unbounded
        } else {
            QueueBound::Bounded(capacity)
        }
    }
}

/// Queue store errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    /// Topic buffer is at capacity
    Full { topic: String, capacity: usize },
}

impl fmt::Display for QueueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueueError::Full { topic, capacity } => {
                write!(f, "queue for topic {:?} is full ({} pending)", topic, capacity)
            }
        }
    }
}

impl std::error::Error for QueueError {}

/// Thread-safe per-topic FIFO store
pub struct QueueStore {
    buffers: RwLock<AHashMap<String, VecDeque<String>>>,
    bound: QueueBound,
}

impl QueueStore {
    pub fn new() -> Self {
        Self::with_bound(QueueBound::Unbounded)
    }

    pub fn with_bound(bound: QueueBound) -> Self {
        Self {
            buffers: RwLock::new(AHashMap::new()),
            bound,
        }
    }

    pub fn bound(&self) -> QueueBound {
        self.bound
    }

    /// Append a payload to the topic's buffer, creating it if absent.
    ///
    /// Returns the buffer depth after the push.
    pub fn enqueue(&self, topic: &str, payload: String) -> Result<usize, QueueError> {
        let mut buffers = self.buffers.write();

        // Check before inserting so a rejected push never leaves an empty buffer
        if let QueueBound::Bounded(capacity) = self.bound {
            let depth = buffers.get(topic).map_or(0, VecDeque::len);
            if depth >= capacity {
                return Err(QueueError::Full {
                    topic: topic.to_string(),
                    capacity,
                });
            }
        }

        let buffer = buffers.entry(topic.to_string()).or_default();
        buffer.push_back(payload);
        Ok(buffer.len())
    }

    /// Pop the oldest payload. Returns `None` for empty or unknown topics.
    pub fn dequeue(&self, topic: &str) -> Option<String> {
        let mut buffers = self.buffers.write();
        let buffer = buffers.get_mut(topic)?;
        let payload = buffer.pop_front();
        // Empty and absent are equivalent; don't keep dead buffers around
        if buffer.is_empty() {
            buffers.remove(topic);
        }
        payload
    }

    /// Number of pending payloads for a topic
    pub fn depth(&self, topic: &str) -> usize {
        self.buffers.read().get(topic).map_or(0, VecDeque::len)
    }

    /// Number of topics with at least one pending payload
    pub fn topic_count(&self) -> usize {
        self.buffers.read().len()
    }
}

impl Default for QueueStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use proptest::prelude::*;

    #[test]
    fn test_enqueue_then_dequeue() {
        let store = QueueStore::new();
        assert_eq!(store.enqueue("t1", "hello".into()), Ok(1));
        assert_eq!(store.dequeue("t1").as_deref(), Some("hello"));
        assert_eq!(store.dequeue("t1"), None);
    }

    #[test]
    fn test_dequeue_unknown_topic() {
        let store = QueueStore::new();
        assert_eq!(store.dequeue("nobody-home"), None);
        assert_eq!(store.topic_count(), 0);
    }

    #[test]
    fn test_fifo_order_within_topic() {
        let store = QueueStore::new();
        store.enqueue("t2", "a".into()).unwrap();
        store.enqueue("t2", "b".into()).unwrap();
        store.enqueue("other", "x".into()).unwrap();

        assert_eq!(store.dequeue("t2").as_deref(), Some("a"));
        assert_eq!(store.dequeue("t2").as_deref(), Some("b"));
        assert_eq!(store.dequeue("other").as_deref(), Some("x"));
    }

    #[test]
    fn test_drained_buffer_is_dropped() {
        let store = QueueStore::new();
        store.enqueue("t1", "only".into()).unwrap();
        assert_eq!(store.topic_count(), 1);
        store.dequeue("t1");
        assert_eq!(store.topic_count(), 0);
        assert_eq!(store.depth("t1"), 0);
    }

    #[test]
    fn test_bounded_queue_rejects_at_capacity() {
        let store = QueueStore::with_bound(QueueBound::Bounded(2));
        store.enqueue("t", "1".into()).unwrap();
        store.enqueue("t", "2".into()).unwrap();
        assert_eq!(
            store.enqueue("t", "3".into()),
            Err(QueueError::Full {
                topic: "t".into(),
                capacity: 2
            })
        );
        // Other topics are unaffected
        assert!(store.enqueue("u", "1".into()).is_ok());

        store.dequeue("t");
        assert_eq!(store.enqueue("t", "3".into()), Ok(2));
    }

    #[test]
    fn test_rejected_enqueue_leaves_no_buffer() {
        let store = QueueStore::with_bound(QueueBound::Bounded(0));
        assert!(matches!(
            store.enqueue("t", "1".into()),
            Err(QueueError::Full { capacity: 0, .. })
        ));
        assert_eq!(store.topic_count(), 0);
        assert_eq!(store.depth("t"), 0);
    }

    #[test]
    fn test_bound_from_capacity() {
        assert_eq!(QueueBound::from_capacity(0), QueueBound::Unbounded);
        assert_eq!(QueueBound::from_capacity(5), QueueBound::Bounded(5));
    }

    #[test]
    fn test_concurrent_producers_keep_per_producer_order() {
        let store = Arc::new(QueueStore::new());
        let producers = 8;
        let per_producer = 500;

        let handles: Vec<_> = (0..producers)
            .map(|p| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for i in 0..per_producer {
                        store.enqueue("shared", format!("{}:{}", p, i)).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let mut last_seen = vec![None::<usize>; producers];
        let mut total = 0;
        while let Some(payload) = store.dequeue("shared") {
            let (p, i) = payload.split_once(':').unwrap();
            let (p, i): (usize, usize) = (p.parse().unwrap(), i.parse().unwrap());
            if let Some(prev) = last_seen[p] {
                assert!(i > prev, "producer {} reordered: {} after {}", p, i, prev);
            }
            last_seen[p] = Some(i);
            total += 1;
        }
        assert_eq!(total, producers * per_producer);
    }

    proptest! {
        #[test]
        fn prop_dequeue_returns_enqueue_order(payloads in proptest::collection::vec(".*", 0..64)) {
            let store = QueueStore::new();
            for p in &payloads {
                store.enqueue("t", p.clone()).unwrap();
            }
            let mut drained = Vec::new();
            while let Some(p) = store.dequeue("t") {
                drained.push(p);
            }
            prop_assert_eq!(drained, payloads);
            prop_assert_eq!(store.dequeue("t"), None);
        }
    }
}
