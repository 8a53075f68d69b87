//! Transport Layer
//!
//! TCP socket tuning and the WebSocket streams every client session runs over.

mod websocket;

pub use websocket::{accept, from_upgraded, BoxedIo, Io, WsStream};

use std::time::Duration;

use socket2::{SockRef, TcpKeepalive};
use tokio::net::TcpStream;

/// Transport configuration
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// TCP nodelay
    pub tcp_nodelay: bool,
    /// Idle time before TCP keepalive probes start
    pub tcp_keepalive: Option<Duration>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            tcp_nodelay: true,
            tcp_keepalive: Some(Duration::from_secs(60)),
        }
    }
}

/// Configure a TCP stream
pub fn configure_stream(stream: &TcpStream, config: &TransportConfig) -> std::io::Result<()> {
    stream.set_nodelay(config.tcp_nodelay)?;

    if let Some(idle) = config.tcp_keepalive {
        let keepalive = TcpKeepalive::new().with_time(idle);
        SockRef::from(stream).set_tcp_keepalive(&keepalive)?;
    }

    Ok(())
}
