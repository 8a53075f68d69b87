//! Publish/subscribe connection registry
//!
//! Maps each topic to the set of connection handles subscribed to it.
//!
//! Publishing is split into two critical sections that are never nested:
//! a fan-out pass under the shared lock that writes to every subscriber and
//! collects the ones that failed, then (only if something failed) a removal
//! pass under the exclusive lock. The lock is not re-entrant, so the read
//! guard is always dropped before the write guard is requested.

use std::sync::Arc;

use ahash::AHashMap;
use parking_lot::RwLock;
use smallvec::SmallVec;
use tracing::{debug, warn};

use crate::broker::{ConnectionHandle, ConnectionId};

type SubscriberSet = SmallVec<[Arc<ConnectionHandle>; 4]>;

/// Result of one publish call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Fanout {
    /// Frames queued successfully
    pub delivered: usize,
    /// Connections that failed and were removed from every topic
    pub removed: usize,
}

/// Thread-safe topic -> subscribers store
pub struct ConnectionRegistry {
    topics: RwLock<AHashMap<String, SubscriberSet>>,
    /// Treat subscribe as a set insert (otherwise duplicates are kept and
    /// the connection receives one copy per subscribe call)
    dedupe: bool,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::with_dedupe(true)
    }

    pub fn with_dedupe(dedupe: bool) -> Self {
        Self {
            topics: RwLock::new(AHashMap::new()),
            dedupe,
        }
    }

    /// Add a handle to a topic's subscriber set.
    ///
    /// Returns false if nothing was added (already subscribed with dedupe on,
    /// or the handle is already closed).
    pub fn subscribe(&self, topic: &str, handle: &Arc<ConnectionHandle>) -> bool {
        if !handle.is_alive() {
            return false;
        }

        let mut topics = self.topics.write();
        let subs = topics.entry(topic.to_string()).or_default();
        if self.dedupe && subs.iter().any(|h| h.id() == handle.id()) {
            return false;
        }
        subs.push(handle.clone());
        true
    }

    /// Remove a handle from every topic. Returns the number of entries removed.
    pub fn unsubscribe_all(&self, handle: &ConnectionHandle) -> usize {
        let mut topics = self.topics.write();
        remove_everywhere(&mut topics, handle.id())
    }

    /// Deliver `payload` to every current subscriber of `topic`.
    pub fn publish(&self, topic: &str, payload: &str) -> Fanout {
        let mut fanout = Fanout::default();
        let mut failed: SmallVec<[ConnectionId; 4]> = SmallVec::new();

        // Pass 1: fan-out under the shared lock
        {
            let topics = self.topics.read();
            let Some(subs) = topics.get(topic) else {
                return fanout;
            };
            for handle in subs {
                match handle.send(payload) {
                    Ok(()) => fanout.delivered += 1,
                    Err(e) => {
                        warn!(
                            "Delivery to connection {} ({}) failed on topic {:?}: {}",
                            handle.id(),
                            handle.addr(),
                            topic,
                            e
                        );
                        if !failed.contains(&handle.id()) {
                            failed.push(handle.id());
                        }
                    }
                }
            }
        }

        // Pass 2: remove failed connections under the exclusive lock
        if !failed.is_empty() {
            let mut topics = self.topics.write();
            for id in &failed {
                let removed = remove_everywhere(&mut topics, *id);
                debug!("Removed connection {} from {} subscriptions", id, removed);
            }
            fanout.removed = failed.len();
        }

        fanout
    }

    /// Number of subscriber entries for a topic
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics.read().get(topic).map_or(0, |subs| subs.len())
    }

    /// Number of topics with at least one subscriber
    pub fn topic_count(&self) -> usize {
        self.topics.read().len()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Drop every entry for `id`, and any topic left without subscribers.
/// Caller must hold the exclusive lock.
fn remove_everywhere(topics: &mut AHashMap<String, SubscriberSet>, id: ConnectionId) -> usize {
    let mut removed = 0;
    topics.retain(|_, subs| {
        let before = subs.len();
        subs.retain(|h| h.id() != id);
        removed += before - subs.len();
        !subs.is_empty()
    });
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn handle() -> Arc<ConnectionHandle> {
        Arc::new(ConnectionHandle::new("127.0.0.1:0".parse().unwrap(), 0))
    }

    fn frames(h: &ConnectionHandle) -> Vec<String> {
        h.take_frames().into_iter().collect()
    }

    #[test]
    fn test_subscribe_then_publish_delivers_once() {
        let registry = ConnectionRegistry::new();
        let h = handle();
        assert!(registry.subscribe("news", &h));

        let fanout = registry.publish("news", "breaking");
        assert_eq!(fanout, Fanout { delivered: 1, removed: 0 });
        assert_eq!(frames(&h), vec!["breaking"]);
    }

    #[test]
    fn test_publish_without_subscribers() {
        let registry = ConnectionRegistry::new();
        assert_eq!(registry.publish("empty", "x"), Fanout::default());
    }

    #[test]
    fn test_publish_reaches_every_subscriber() {
        let registry = ConnectionRegistry::new();
        let (a, b) = (handle(), handle());
        registry.subscribe("news", &a);
        registry.subscribe("news", &b);
        registry.subscribe("sports", &b);

        assert_eq!(registry.publish("news", "m").delivered, 2);
        assert_eq!(frames(&a), vec!["m"]);
        assert_eq!(frames(&b), vec!["m"]);
    }

    #[test]
    fn test_duplicate_subscribe_is_deduped() {
        let registry = ConnectionRegistry::new();
        let h = handle();
        assert!(registry.subscribe("news", &h));
        assert!(!registry.subscribe("news", &h));
        assert_eq!(registry.subscriber_count("news"), 1);

        registry.publish("news", "once");
        assert_eq!(frames(&h), vec!["once"]);
    }

    #[test]
    fn test_duplicate_subscribe_without_dedupe_delivers_twice() {
        let registry = ConnectionRegistry::with_dedupe(false);
        let h = handle();
        assert!(registry.subscribe("news", &h));
        assert!(registry.subscribe("news", &h));

        assert_eq!(registry.publish("news", "twice").delivered, 2);
        assert_eq!(frames(&h), vec!["twice", "twice"]);
    }

    #[test]
    fn test_unsubscribe_all_removes_every_topic_and_is_idempotent() {
        let registry = ConnectionRegistry::new();
        let (gone, stays) = (handle(), handle());
        registry.subscribe("a", &gone);
        registry.subscribe("b", &gone);
        registry.subscribe("b", &stays);

        assert_eq!(registry.unsubscribe_all(&gone), 2);
        assert_eq!(registry.unsubscribe_all(&gone), 0);
        assert_eq!(registry.subscriber_count("a"), 0);
        assert_eq!(registry.subscriber_count("b"), 1);
        assert_eq!(registry.topic_count(), 1);

        registry.publish("a", "x");
        registry.publish("b", "y");
        assert!(frames(&gone).is_empty());
        assert_eq!(frames(&stays), vec!["y"]);
    }

    #[test]
    fn test_failed_subscriber_is_removed_others_still_receive() {
        let registry = ConnectionRegistry::new();
        let (broken, ok) = (handle(), handle());
        registry.subscribe("news", &broken);
        registry.subscribe("news", &ok);
        registry.subscribe("other", &broken);
        broken.close();

        let fanout = registry.publish("news", "m");
        assert_eq!(fanout, Fanout { delivered: 1, removed: 1 });
        assert_eq!(frames(&ok), vec!["m"]);

        // Removed from all topics, not only the one published to
        assert_eq!(registry.subscriber_count("news"), 1);
        assert_eq!(registry.subscriber_count("other"), 0);
    }

    #[test]
    fn test_backlogged_subscriber_is_dropped() {
        let registry = ConnectionRegistry::new();
        let slow = Arc::new(ConnectionHandle::new("127.0.0.1:0".parse().unwrap(), 1));
        registry.subscribe("news", &slow);

        assert_eq!(registry.publish("news", "1").delivered, 1);
        assert_eq!(registry.publish("news", "2"), Fanout { delivered: 0, removed: 1 });
        assert_eq!(registry.subscriber_count("news"), 0);
        assert!(!slow.is_alive());
    }

    #[test]
    fn test_closed_handle_cannot_subscribe() {
        let registry = ConnectionRegistry::new();
        let h = handle();
        h.close();
        assert!(!registry.subscribe("news", &h));
        assert_eq!(registry.topic_count(), 0);
    }

    #[test]
    fn test_concurrent_publishers_and_subscribers() {
        let registry = Arc::new(ConnectionRegistry::new());
        let subscribers: Vec<_> = (0..16).map(|_| handle()).collect();
        for h in &subscribers {
            registry.subscribe("t", h);
        }

        let threads: Vec<_> = (0..4)
            .map(|i| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    for n in 0..100 {
                        registry.publish("t", &format!("{}-{}", i, n));
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }

        for h in &subscribers {
            assert_eq!(h.pending_len(), 400);
        }
    }
}
