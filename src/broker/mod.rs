//! TurpleMQ Broker Core
//!
//! The main broker implementation that accepts WebSocket clients, runs one
//! session per connection, and coordinates the queue store, the subscription
//! registry and the optional persistence sink.

mod dispatcher;
mod session;
mod writer;

pub use dispatcher::{Dispatched, Dispatcher};
pub use session::{
    CloseReason, Session, SessionContext, SessionError, SessionState, SessionSummary,
};
pub use writer::{ConnectionHandle, ConnectionId, SendError};

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::metrics::Metrics;
use crate::persistence::PersistenceManager;
use crate::queue::{QueueBound, QueueStore};
use crate::registry::ConnectionRegistry;
use crate::transport::{configure_stream, TransportConfig, WsStream};

/// Broker configuration
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// TCP bind address for WebSocket clients
    pub bind_addr: SocketAddr,
    /// WebSocket path (default: "/ws")
    pub ws_path: String,
    /// Maximum connections (0 = unbounded)
    pub max_connections: usize,
    /// Upper bound on the WebSocket handshake
    pub handshake_timeout: Duration,
    /// Pending outbound frames per connection (0 = unbounded)
    pub outbound_capacity: usize,
    /// Per-topic bound of the buffered queue
    pub queue_bound: QueueBound,
    /// Ignore repeated subscribes from the same connection
    pub dedupe_subscriptions: bool,
    /// TCP socket options
    pub transport: TransportConfig,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".parse().unwrap(),
            ws_path: "/ws".to_string(),
            max_connections: 100_000,
            handshake_timeout: Duration::from_secs(10),
            outbound_capacity: 1024,
            queue_bound: QueueBound::Unbounded,
            dedupe_subscriptions: true,
            transport: TransportConfig::default(),
        }
    }
}

impl From<&Config> for BrokerConfig {
    fn from(config: &Config) -> Self {
        Self {
            bind_addr: config.server.bind,
            ws_path: config.server.ws_path.clone(),
            max_connections: config.server.max_connections,
            handshake_timeout: config.server.handshake_timeout,
            outbound_capacity: config.server.outbound_capacity,
            queue_bound: QueueBound::from_capacity(config.queue.capacity),
            dedupe_subscriptions: config.registry.dedupe_subscriptions,
            transport: TransportConfig::default(),
        }
    }
}

/// Releases a connection slot when the connection task ends
struct ConnectionSlot(Arc<AtomicUsize>);

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// The TurpleMQ Broker
pub struct Broker {
    /// Configuration
    config: BrokerConfig,
    /// Shared by every session
    context: Arc<SessionContext>,
    /// Live connection tasks (handshaking or active)
    connections: Arc<AtomicUsize>,
    /// Shutdown signal
    shutdown: broadcast::Sender<()>,
    /// Set once shutdown was requested, so a late `run` returns at once
    stopped: AtomicBool,
}

impl Broker {
    /// Create a new broker.
    ///
    /// Broadcast messages are recorded through `persistence` when given.
    pub fn new(
        config: BrokerConfig,
        persistence: Option<Arc<PersistenceManager>>,
        metrics: Option<Arc<Metrics>>,
    ) -> Self {
        let (shutdown, _) = broadcast::channel(1);

        let queues = Arc::new(QueueStore::with_bound(config.queue_bound));
        let registry = Arc::new(ConnectionRegistry::with_dedupe(config.dedupe_subscriptions));
        let mut dispatcher = Dispatcher::new(queues, registry);
        if let Some(persistence) = persistence {
            dispatcher = dispatcher.with_persistence(persistence);
        }
        if let Some(ref metrics) = metrics {
            dispatcher = dispatcher.with_metrics(metrics.clone());
        }

        let context = Arc::new(SessionContext {
            dispatcher: Arc::new(dispatcher),
            metrics,
            ws_path: config.ws_path.clone(),
            handshake_timeout: config.handshake_timeout,
            outbound_capacity: config.outbound_capacity,
        });

        Self {
            config,
            context,
            connections: Arc::new(AtomicUsize::new(0)),
            shutdown,
            stopped: AtomicBool::new(false),
        }
    }

    /// Run the accept loop until `shutdown` is called
    pub async fn run(&self) -> Result<(), std::io::Error> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        info!(
            "WebSocket listening on {} (path: {})",
            listener.local_addr()?,
            self.config.ws_path
        );

        let mut shutdown_rx = self.shutdown.subscribe();
        if self.stopped.load(Ordering::Acquire) {
            return Ok(());
        }

        debug!("Starting accept loop");
        loop {
            tokio::select! {
                biased;

                result = shutdown_rx.recv() => {
                    match result {
                        Ok(()) | Err(broadcast::error::RecvError::Closed) => break,
                        Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    }
                }

                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            debug!("New TCP connection from {}", addr);
                            self.handle_connection(stream, addr);
                        }
                        Err(e) => {
                            error!("Failed to accept TCP connection: {}", e);
                        }
                    }
                }
            }
        }

        info!("Broker accept loop stopped");
        Ok(())
    }

    /// Reserve a connection slot, or `None` if the limit is reached
    fn acquire_slot(&self, addr: SocketAddr) -> Option<ConnectionSlot> {
        let max = self.config.max_connections;
        let current = self.connections.fetch_add(1, Ordering::AcqRel);
        let slot = ConnectionSlot(self.connections.clone());
        if max > 0 && current >= max {
            warn!(
                "Rejecting connection from {}: limit of {} connections reached",
                addr, max
            );
            if let Some(ref metrics) = self.context.metrics {
                metrics.connection_rejected("max_connections");
            }
            return None;
        }
        Some(slot)
    }

    /// Handle a new connection
    fn handle_connection(&self, stream: TcpStream, addr: SocketAddr) {
        let Some(slot) = self.acquire_slot(addr) else {
            return;
        };

        if let Err(e) = configure_stream(&stream, &self.config.transport) {
            debug!("Failed to configure socket for {}: {}", addr, e);
        }

        let context = self.context.clone();
        let shutdown_rx = self.shutdown.subscribe();

        tokio::spawn(async move {
            let _slot = slot;
            let metrics = context.metrics.clone();
            match Session::establish(stream, addr, context, shutdown_rx).await {
                Ok(session) => {
                    let summary = session.run().await;
                    debug!(
                        "Connection {} from {} finished after {} frames: {}",
                        summary.id, addr, summary.frames_received, summary.reason
                    );
                }
                Err(e) => {
                    debug!("WebSocket handshake failed for {}: {}", addr, e);
                    if let Some(metrics) = metrics {
                        metrics.connection_rejected("handshake");
                    }
                }
            }
        });
    }

    /// Run a session over a stream upgraded by another listener.
    ///
    /// Used when the HTTP server shares its port with the broker. Returns
    /// `false` if the stream was refused (limit reached or broker stopped).
    pub fn attach(&self, stream: WsStream, addr: SocketAddr) -> bool {
        let shutdown_rx = self.shutdown.subscribe();
        if self.stopped.load(Ordering::Acquire) {
            debug!("Refusing upgraded connection from {}: broker stopped", addr);
            return false;
        }
        let Some(slot) = self.acquire_slot(addr) else {
            return false;
        };

        let session = Session::new(stream, addr, self.context.clone(), shutdown_rx);
        tokio::spawn(async move {
            let _slot = slot;
            let summary = session.run().await;
            debug!(
                "Connection {} from {} finished after {} frames: {}",
                summary.id, addr, summary.frames_received, summary.reason
            );
        });
        true
    }

    /// Wait until `shutdown` is called.
    ///
    /// Stands in for `run` when sessions arrive through `attach` only.
    pub async fn wait_for_shutdown(&self) {
        let mut shutdown_rx = self.shutdown.subscribe();
        if self.stopped.load(Ordering::Acquire) {
            return;
        }
        loop {
            match shutdown_rx.recv().await {
                Ok(()) | Err(broadcast::error::RecvError::Closed) => return,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
            }
        }
    }

    /// Shutdown the broker: stop accepting and close every session
    pub fn shutdown(&self) {
        self.stopped.store(true, Ordering::Release);
        let _ = self.shutdown.send(());
    }

    /// Get connection count
    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::Acquire)
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.context.dispatcher
    }

    pub fn queues(&self) -> &Arc<QueueStore> {
        self.context.dispatcher.queues()
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        self.context.dispatcher.registry()
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }
}

impl Default for Broker {
    fn default() -> Self {
        Self::new(BrokerConfig::default(), None, None)
    }
}
