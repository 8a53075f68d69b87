//! TurpleMQ - real-time WebSocket message broker
//!
//! Clients exchange JSON envelopes over a WebSocket. Each topic offers two
//! delivery models: a point-to-point FIFO queue (buffered mode) and a
//! publish/subscribe fan-out (broadcast mode). Broadcast messages can be
//! recorded and read back through the HTTP history endpoint.

pub mod broker;
pub mod config;
pub mod http;
pub mod metrics;
pub mod persistence;
pub mod protocol;
pub mod queue;
pub mod registry;
pub mod transport;

pub use broker::{Broker, BrokerConfig, Dispatched, Dispatcher};
pub use config::Config;
pub use http::{HttpServer, HttpState};
pub use metrics::Metrics;
pub use persistence::{FjallBackend, MessageStore, PersistenceManager};
pub use protocol::{Envelope, Mode, Role};
pub use queue::QueueStore;
pub use registry::ConnectionRegistry;
