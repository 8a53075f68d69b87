//! Prometheus metrics for TurpleMQ
//!
//! Exposed at `/metrics` on the HTTP surface for monitoring and
//! observability. The broker core only calls the helper methods; all
//! counters are optional (a broker built without metrics skips them).

use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};

/// All TurpleMQ metrics in one place
#[derive(Clone)]
pub struct Metrics {
    pub registry: Registry,

    // Connection metrics
    pub connections_total: IntCounter,
    pub connections_current: IntGauge,
    pub connections_maximum: IntGauge,
    pub connections_rejected_total: IntCounterVec,

    // Frame metrics
    pub frames_received_total: IntCounter,
    pub frames_sent_total: IntCounter,
    pub bytes_received_total: IntCounter,
    pub bytes_sent_total: IntCounter,
    pub decode_errors_total: IntCounter,
    pub invalid_envelopes_total: IntCounter,

    // Queue metrics
    pub messages_enqueued_total: IntCounter,
    pub messages_dequeued_total: IntCounter,
    pub empty_pulls_total: IntCounter,
    pub queue_rejections_total: IntCounter,

    // Pub/sub metrics
    pub subscriptions_total: IntCounter,
    pub broadcasts_total: IntCounter,
    pub deliveries_total: IntCounter,
    pub delivery_failures_total: IntCounter,

    // Persistence
    pub persistence_failures_total: IntCounter,

    // Performance metrics
    pub dispatch_latency: Histogram,
}

fn counter(name: &str, help: &str) -> IntCounter {
    IntCounter::with_opts(Opts::new(name, help)).unwrap()
}

fn gauge(name: &str, help: &str) -> IntGauge {
    IntGauge::with_opts(Opts::new(name, help)).unwrap()
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        // Connection metrics
        let connections_total = counter(
            "turplemq_connections_total",
            "Total number of client connections since startup",
        );
        let connections_current = gauge(
            "turplemq_connections_current",
            "Current number of connected clients",
        );
        let connections_maximum = gauge(
            "turplemq_connections_maximum",
            "Maximum concurrent connections since startup",
        );
        let connections_rejected_total = IntCounterVec::new(
            Opts::new(
                "turplemq_connections_rejected_total",
                "Connections rejected before becoming active",
            ),
            &["reason"],
        )
        .unwrap();

        // Frame metrics
        let frames_received_total = counter(
            "turplemq_frames_received_total",
            "Data frames received from clients",
        );
        let frames_sent_total = counter(
            "turplemq_frames_sent_total",
            "Data frames written to clients",
        );
        let bytes_received_total = counter(
            "turplemq_bytes_received_total",
            "Payload bytes received from clients",
        );
        let bytes_sent_total = counter(
            "turplemq_bytes_sent_total",
            "Payload bytes written to clients",
        );
        let decode_errors_total = counter(
            "turplemq_decode_errors_total",
            "Frames dropped because they did not decode as an envelope",
        );
        let invalid_envelopes_total = counter(
            "turplemq_invalid_envelopes_total",
            "Envelopes ignored because of an unknown role or mode",
        );

        // Queue metrics
        let messages_enqueued_total = counter(
            "turplemq_messages_enqueued_total",
            "Buffered messages accepted into a topic queue",
        );
        let messages_dequeued_total = counter(
            "turplemq_messages_dequeued_total",
            "Buffered messages handed to a consumer",
        );
        let empty_pulls_total = counter(
            "turplemq_empty_pulls_total",
            "Consumer pulls that found no pending message",
        );
        let queue_rejections_total = counter(
            "turplemq_queue_rejections_total",
            "Buffered messages rejected by a full queue",
        );

        // Pub/sub metrics
        let subscriptions_total = counter(
            "turplemq_subscriptions_total",
            "Subscribe requests that added a subscriber",
        );
        let broadcasts_total = counter(
            "turplemq_broadcasts_total",
            "Broadcast messages published",
        );
        let deliveries_total = counter(
            "turplemq_deliveries_total",
            "Broadcast copies queued for subscribers",
        );
        let delivery_failures_total = counter(
            "turplemq_delivery_failures_total",
            "Subscribers removed after a failed broadcast write",
        );

        let persistence_failures_total = counter(
            "turplemq_persistence_failures_total",
            "Broadcast messages that could not be recorded",
        );

        let dispatch_latency = Histogram::with_opts(
            HistogramOpts::new(
                "turplemq_dispatch_latency_seconds",
                "Time to dispatch one envelope",
            )
            .buckets(vec![
                0.00001, 0.00005, 0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5,
            ]),
        )
        .unwrap();

        registry
            .register(Box::new(connections_total.clone()))
            .unwrap();
        registry
            .register(Box::new(connections_current.clone()))
            .unwrap();
        registry
            .register(Box::new(connections_maximum.clone()))
            .unwrap();
        registry
            .register(Box::new(connections_rejected_total.clone()))
            .unwrap();
        registry
            .register(Box::new(frames_received_total.clone()))
            .unwrap();
        registry
            .register(Box::new(frames_sent_total.clone()))
            .unwrap();
        registry
            .register(Box::new(bytes_received_total.clone()))
            .unwrap();
        registry
            .register(Box::new(bytes_sent_total.clone()))
            .unwrap();
        registry
            .register(Box::new(decode_errors_total.clone()))
            .unwrap();
        registry
            .register(Box::new(invalid_envelopes_total.clone()))
            .unwrap();
        registry
            .register(Box::new(messages_enqueued_total.clone()))
            .unwrap();
        registry
            .register(Box::new(messages_dequeued_total.clone()))
            .unwrap();
        registry
            .register(Box::new(empty_pulls_total.clone()))
            .unwrap();
        registry
            .register(Box::new(queue_rejections_total.clone()))
            .unwrap();
        registry
            .register(Box::new(subscriptions_total.clone()))
            .unwrap();
        registry
            .register(Box::new(broadcasts_total.clone()))
            .unwrap();
        registry
            .register(Box::new(deliveries_total.clone()))
            .unwrap();
        registry
            .register(Box::new(delivery_failures_total.clone()))
            .unwrap();
        registry
            .register(Box::new(persistence_failures_total.clone()))
            .unwrap();
        registry
            .register(Box::new(dispatch_latency.clone()))
            .unwrap();

        Metrics {
            registry,
            connections_total,
            connections_current,
            connections_maximum,
            connections_rejected_total,
            frames_received_total,
            frames_sent_total,
            bytes_received_total,
            bytes_sent_total,
            decode_errors_total,
            invalid_envelopes_total,
            messages_enqueued_total,
            messages_dequeued_total,
            empty_pulls_total,
            queue_rejections_total,
            subscriptions_total,
            broadcasts_total,
            deliveries_total,
            delivery_failures_total,
            persistence_failures_total,
            dispatch_latency,
        }
    }

    /// Render all metrics in the Prometheus text format
    pub fn encode(&self) -> Result<(Vec<u8>, String), prometheus::Error> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok((buffer, encoder.format_type().to_string()))
    }

    // Helper methods for common operations

    pub fn client_connected(&self) {
        self.connections_total.inc();
        self.connections_current.inc();
        // Update maximum if current exceeds it
        let current = self.connections_current.get();
        if current > self.connections_maximum.get() {
            self.connections_maximum.set(current);
        }
    }

    pub fn client_disconnected(&self) {
        self.connections_current.dec();
    }

    pub fn connection_rejected(&self, reason: &str) {
        self.connections_rejected_total
            .with_label_values(&[reason])
            .inc();
    }

    pub fn frame_received(&self, bytes: usize) {
        self.frames_received_total.inc();
        self.bytes_received_total.inc_by(bytes as u64);
    }

    pub fn frame_sent(&self, bytes: usize) {
        self.frames_sent_total.inc();
        self.bytes_sent_total.inc_by(bytes as u64);
    }

    pub fn broadcast(&self, delivered: usize, failed: usize) {
        self.broadcasts_total.inc();
        self.deliveries_total.inc_by(delivered as u64);
        self.delivery_failures_total.inc_by(failed as u64);
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_maximum_tracks_peak() {
        let metrics = Metrics::new();
        metrics.client_connected();
        metrics.client_connected();
        metrics.client_disconnected();
        assert_eq!(metrics.connections_current.get(), 1);
        assert_eq!(metrics.connections_maximum.get(), 2);
        assert_eq!(metrics.connections_total.get(), 2);
    }

    #[test]
    fn test_encode_text_format() {
        let metrics = Metrics::new();
        metrics.broadcast(3, 1);
        let (body, content_type) = metrics.encode().unwrap();
        let text = String::from_utf8(body).unwrap();
        assert!(content_type.starts_with("text/plain"));
        assert!(text.contains("turplemq_deliveries_total 3"));
        assert!(text.contains("turplemq_delivery_failures_total 1"));
    }
}
