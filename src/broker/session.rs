//! Client session lifecycle
//!
//! A session owns one WebSocket connection from handshake to close:
//! `Connecting -> Active -> Closed`. While active it waits on three things at
//! once: the next inbound frame, its handle's outbound notification, and the
//! broker shutdown signal. Whatever ends the session, it closes its handle and
//! leaves every subscription exactly once.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, trace, warn};

use super::dispatcher::Dispatcher;
use super::{ConnectionHandle, ConnectionId};
use crate::metrics::Metrics;
use crate::protocol::Envelope;
use crate::transport::{self, WsStream};

/// Upper bound on the close handshake once a session is done
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Session error types (handshake phase only)
#[derive(Debug)]
pub enum SessionError {
    /// WebSocket upgrade was refused or malformed
    Handshake(String),
    /// Handshake did not finish within `handshake_timeout`
    Timeout,
    /// Socket error
    Io(std::io::Error),
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::Handshake(msg) => write!(f, "handshake failed: {}", msg),
            SessionError::Timeout => write!(f, "handshake timed out"),
            SessionError::Io(e) => write!(f, "IO error: {}", e),
        }
    }
}

impl std::error::Error for SessionError {}

impl From<std::io::Error> for SessionError {
    fn from(e: std::io::Error) -> Self {
        SessionError::Io(e)
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for SessionError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        match e {
            tokio_tungstenite::tungstenite::Error::Io(e) => SessionError::Io(e),
            other => SessionError::Handshake(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Active,
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Connecting => write!(f, "connecting"),
            SessionState::Active => write!(f, "active"),
            SessionState::Closed => write!(f, "closed"),
        }
    }
}

/// Why an active session ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// Peer sent a close frame
    ClientClosed,
    /// Stream ended without a close frame
    StreamEnded,
    /// Reading from the socket failed
    ReadError(String),
    /// Writing to the socket failed
    WriteError(String),
    /// Handle was closed elsewhere (e.g. outbound backlog)
    HandleClosed,
    /// Broker is shutting down
    Shutdown,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::ClientClosed => write!(f, "client closed"),
            CloseReason::StreamEnded => write!(f, "stream ended"),
            CloseReason::ReadError(e) => write!(f, "read error: {}", e),
            CloseReason::WriteError(e) => write!(f, "write error: {}", e),
            CloseReason::HandleClosed => write!(f, "handle closed"),
            CloseReason::Shutdown => write!(f, "broker shutdown"),
        }
    }
}

/// Result of a finished session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    pub id: ConnectionId,
    pub frames_received: u64,
    pub reason: CloseReason,
}

/// Everything a session needs from its broker
pub struct SessionContext {
    pub dispatcher: Arc<Dispatcher>,
    pub metrics: Option<Arc<Metrics>>,
    pub ws_path: String,
    pub handshake_timeout: Duration,
    /// Pending outbound frames per connection (0 = unbounded)
    pub outbound_capacity: usize,
}

/// One active client connection
pub struct Session {
    handle: Arc<ConnectionHandle>,
    stream: WsStream,
    ctx: Arc<SessionContext>,
    shutdown_rx: broadcast::Receiver<()>,
    state: SessionState,
    frames_received: u64,
}

impl Session {
    /// Perform the WebSocket handshake for an accepted socket.
    ///
    /// On success the session is `Active` and owns a fresh connection handle.
    pub async fn establish(
        stream: TcpStream,
        addr: SocketAddr,
        ctx: Arc<SessionContext>,
        shutdown_rx: broadcast::Receiver<()>,
    ) -> Result<Self, SessionError> {
        trace!("Session {} {}", addr, SessionState::Connecting);

        let stream = tokio::time::timeout(
            ctx.handshake_timeout,
            transport::accept(stream, &ctx.ws_path),
        )
        .await
        .map_err(|_| SessionError::Timeout)??;

        Ok(Self::new(stream, addr, ctx, shutdown_rx))
    }

    /// Start an `Active` session over an already upgraded stream
    pub fn new(
        stream: WsStream,
        addr: SocketAddr,
        ctx: Arc<SessionContext>,
        shutdown_rx: broadcast::Receiver<()>,
    ) -> Self {
        let handle = Arc::new(ConnectionHandle::new(addr, ctx.outbound_capacity));
        if let Some(ref metrics) = ctx.metrics {
            metrics.client_connected();
        }
        debug!(
            "Session {} from {} {}",
            handle.id(),
            addr,
            SessionState::Active
        );

        Self {
            handle,
            stream,
            ctx,
            shutdown_rx,
            state: SessionState::Active,
            frames_received: 0,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.handle.id()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn handle(&self) -> &Arc<ConnectionHandle> {
        &self.handle
    }

    /// Serve the connection until it closes
    pub async fn run(mut self) -> SessionSummary {
        let reason = loop {
            tokio::select! {
                biased;

                result = self.shutdown_rx.recv() => {
                    match result {
                        Ok(()) | Err(broadcast::error::RecvError::Closed) => break CloseReason::Shutdown,
                        Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    }
                }

                _ = self.handle.notified() => {
                    if let Err(e) = self.flush_outbound().await {
                        break CloseReason::WriteError(e.to_string());
                    }
                    if !self.handle.is_alive() {
                        break CloseReason::HandleClosed;
                    }
                }

                msg = self.stream.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => self.handle_frame(text.as_bytes()).await,
                        Some(Ok(Message::Binary(data))) => self.handle_frame(&data).await,
                        Some(Ok(Message::Ping(_))) => {
                            // The pong is queued by the transport; push it out now
                            if let Err(e) = self.stream.flush().await {
                                break CloseReason::WriteError(e.to_string());
                            }
                        }
                        Some(Ok(Message::Pong(_))) | Some(Ok(Message::Frame(_))) => {}
                        Some(Ok(Message::Close(_))) => break CloseReason::ClientClosed,
                        Some(Err(e)) => break CloseReason::ReadError(e.to_string()),
                        None => break CloseReason::StreamEnded,
                    }
                }
            }
        };

        self.close(reason).await
    }

    async fn handle_frame(&mut self, frame: &[u8]) {
        self.frames_received += 1;
        if let Some(ref metrics) = self.ctx.metrics {
            metrics.frame_received(frame.len());
        }

        match Envelope::decode(frame) {
            Ok(envelope) => {
                let outcome = self.ctx.dispatcher.dispatch(envelope, &self.handle).await;
                trace!("Session {} dispatched: {:?}", self.handle.id(), outcome);
            }
            Err(e) => {
                warn!(
                    "Dropping undecodable frame from {}: {}",
                    self.handle.addr(),
                    e
                );
                if let Some(ref metrics) = self.ctx.metrics {
                    metrics.decode_errors_total.inc();
                }
            }
        }
    }

    /// Write every pending frame of this connection's handle to the socket
    async fn flush_outbound(&mut self) -> Result<(), tokio_tungstenite::tungstenite::Error> {
        let frames = self.handle.take_frames();
        if frames.is_empty() {
            return Ok(());
        }

        for frame in frames {
            if let Some(ref metrics) = self.ctx.metrics {
                metrics.frame_sent(frame.len());
            }
            self.stream.feed(Message::Text(frame)).await?;
        }
        self.stream.flush().await
    }

    async fn close(mut self, reason: CloseReason) -> SessionSummary {
        self.state = SessionState::Closed;
        self.handle.close();
        let removed = self.ctx.dispatcher.registry().unsubscribe_all(&self.handle);

        match reason {
            CloseReason::ReadError(_) | CloseReason::WriteError(_) => {}
            _ => {
                let _ = tokio::time::timeout(CLOSE_TIMEOUT, self.stream.close(None)).await;
            }
        }

        if let Some(ref metrics) = self.ctx.metrics {
            metrics.client_disconnected();
        }
        debug!(
            "Session {} from {} {} ({}, {} subscriptions removed)",
            self.handle.id(),
            self.handle.addr(),
            self.state,
            reason,
            removed
        );

        SessionSummary {
            id: self.handle.id(),
            frames_received: self.frames_received,
            reason,
        }
    }
}
