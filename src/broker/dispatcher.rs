//! Envelope dispatch
//!
//! Routes one decoded envelope to the queue store, the subscription registry
//! or the persistence sink, depending on its role, subscribe flag and mode.
//! Nothing here produces an error frame: every failure is logged and folded
//! into the returned [`Dispatched`] outcome.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, trace, warn};

use super::ConnectionHandle;
use crate::metrics::Metrics;
use crate::persistence::PersistenceManager;
use crate::protocol::{Envelope, Mode, Role};
use crate::queue::QueueStore;
use crate::registry::ConnectionRegistry;

/// What a single dispatch did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatched {
    /// Caller was added to the topic's subscribers
    Subscribed,
    /// Caller was already subscribed (or is closing); nothing changed
    AlreadySubscribed,
    /// A buffered message was written back to the caller
    Replied,
    /// Pull on an empty topic; no reply is sent
    QueueEmpty,
    /// Message appended to the topic queue
    Enqueued,
    /// Topic queue is full; message dropped
    Rejected,
    /// Message fanned out to current subscribers
    Broadcast { delivered: usize },
    /// Unknown role or mode; nothing changed
    Ignored,
}

/// Routes envelopes for every session of a broker
pub struct Dispatcher {
    queues: Arc<QueueStore>,
    registry: Arc<ConnectionRegistry>,
    persistence: Option<Arc<PersistenceManager>>,
    metrics: Option<Arc<Metrics>>,
}

impl Dispatcher {
    pub fn new(queues: Arc<QueueStore>, registry: Arc<ConnectionRegistry>) -> Self {
        Self {
            queues,
            registry,
            persistence: None,
            metrics: None,
        }
    }

    /// Record broadcast messages through `persistence` before fan-out
    pub fn with_persistence(mut self, persistence: Arc<PersistenceManager>) -> Self {
        self.persistence = Some(persistence);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn queues(&self) -> &Arc<QueueStore> {
        &self.queues
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Dispatch one envelope received from `caller`
    pub async fn dispatch(&self, envelope: Envelope, caller: &Arc<ConnectionHandle>) -> Dispatched {
        let start = Instant::now();

        let outcome = match envelope.role {
            Role::Consumer if envelope.subscribe => self.subscribe(&envelope.topic, caller),
            Role::Consumer => self.pull(&envelope.topic, caller),
            Role::Producer => match envelope.transmission_mode {
                Mode::Buffered => self.enqueue(envelope.topic, envelope.message, caller),
                Mode::Broadcast => self.broadcast(&envelope.topic, &envelope.message).await,
                Mode::Invalid(ref mode) => {
                    warn!(
                        "Ignoring envelope from {} with invalid transmission mode {:?}",
                        caller.addr(),
                        mode
                    );
                    self.invalid()
                }
            },
            Role::Invalid(ref role) => {
                warn!(
                    "Ignoring envelope from {} with invalid role {:?}",
                    caller.addr(),
                    role
                );
                self.invalid()
            }
        };

        if let Some(ref metrics) = self.metrics {
            metrics
                .dispatch_latency
                .observe(start.elapsed().as_secs_f64());
        }
        outcome
    }

    fn subscribe(&self, topic: &str, caller: &Arc<ConnectionHandle>) -> Dispatched {
        if self.registry.subscribe(topic, caller) {
            debug!("Connection {} subscribed to {:?}", caller.id(), topic);
            if let Some(ref metrics) = self.metrics {
                metrics.subscriptions_total.inc();
            }
            Dispatched::Subscribed
        } else {
            trace!("Connection {} already subscribed to {:?}", caller.id(), topic);
            Dispatched::AlreadySubscribed
        }
    }

    fn pull(&self, topic: &str, caller: &Arc<ConnectionHandle>) -> Dispatched {
        let Some(payload) = self.queues.dequeue(topic) else {
            trace!("Pull on empty topic {:?} from {}", topic, caller.id());
            if let Some(ref metrics) = self.metrics {
                metrics.empty_pulls_total.inc();
            }
            return Dispatched::QueueEmpty;
        };

        if let Some(ref metrics) = self.metrics {
            metrics.messages_dequeued_total.inc();
        }
        // Once dequeued the message is gone even if the caller is closing
        if let Err(e) = caller.send(&payload) {
            warn!(
                "Dropping message for {:?}: reply to {} failed: {}",
                topic,
                caller.addr(),
                e
            );
        }
        Dispatched::Replied
    }

    fn enqueue(&self, topic: String, message: String, caller: &ConnectionHandle) -> Dispatched {
        match self.queues.enqueue(&topic, message) {
            Ok(depth) => {
                trace!("Enqueued on {:?} (depth {})", topic, depth);
                if let Some(ref metrics) = self.metrics {
                    metrics.messages_enqueued_total.inc();
                }
                Dispatched::Enqueued
            }
            Err(e) => {
                warn!("Rejecting message from {}: {}", caller.addr(), e);
                if let Some(ref metrics) = self.metrics {
                    metrics.queue_rejections_total.inc();
                }
                Dispatched::Rejected
            }
        }
    }

    async fn broadcast(&self, topic: &str, message: &str) -> Dispatched {
        if let Some(ref persistence) = self.persistence {
            if let Err(e) = persistence.record(topic, message).await {
                warn!("Failed to persist broadcast on {:?}: {}", topic, e);
                if let Some(ref metrics) = self.metrics {
                    metrics.persistence_failures_total.inc();
                }
            }
        }

        let fanout = self.registry.publish(topic, message);
        debug!(
            "Broadcast on {:?} delivered to {} subscribers ({} removed)",
            topic, fanout.delivered, fanout.removed
        );
        if let Some(ref metrics) = self.metrics {
            metrics.broadcast(fanout.delivered, fanout.removed);
        }
        Dispatched::Broadcast {
            delivered: fanout.delivered,
        }
    }

    fn invalid(&self) -> Dispatched {
        if let Some(ref metrics) = self.metrics {
            metrics.invalid_envelopes_total.inc();
        }
        Dispatched::Ignored
    }
}
