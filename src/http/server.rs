//! HTTP/1 listener for the history, health, metrics and static routes

use super::upgrade::{is_upgrade, upgrade};
use super::{handle, HttpState};
use crate::transport::{configure_stream, TransportConfig};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, error, info};

/// HTTP server for the broker's REST surface
pub struct HttpServer {
    state: Arc<HttpState>,
    addr: SocketAddr,
}

impl HttpServer {
    pub fn new(state: HttpState, addr: SocketAddr) -> Self {
        Self {
            state: Arc::new(state),
            addr,
        }
    }

    pub async fn run(self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let listener = TcpListener::bind(self.addr).await?;
        info!("HTTP server listening on http://{}", self.addr);
        self.serve(listener).await;
        Ok(())
    }

    /// Serve connections from an already bound listener
    pub async fn serve(self, listener: TcpListener) {
        let transport = TransportConfig::default();

        loop {
            let (stream, peer) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    error!("Failed to accept HTTP connection: {}", e);
                    continue;
                }
            };
            if let Err(e) = configure_stream(&stream, &transport) {
                debug!("Failed to configure socket for {}: {}", peer, e);
            }
            let io = TokioIo::new(stream);
            let state = self.state.clone();

            tokio::spawn(async move {
                let service = service_fn(move |req: hyper::Request<hyper::body::Incoming>| {
                    let state = state.clone();
                    async move {
                        if let Some(ref broker) = state.broker {
                            if is_upgrade(&req) {
                                return Ok::<_, Infallible>(upgrade(req, broker.clone(), peer));
                            }
                        }
                        Ok::<_, Infallible>(handle(req.method(), req.uri(), &state).await)
                    }
                });

                if let Err(err) = http1::Builder::new()
                    .serve_connection(io, service)
                    .with_upgrades()
                    .await
                {
                    debug!("Error serving HTTP connection from {}: {:?}", peer, err);
                }
            });
        }
    }
}
