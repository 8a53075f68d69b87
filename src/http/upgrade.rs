//! WebSocket upgrades on the shared HTTP listener

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::header::{self, HeaderMap, HeaderName, HeaderValue};
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio_tungstenite::tungstenite::handshake::derive_accept_key;
use tracing::{debug, warn};

use super::text;
use crate::broker::Broker;
use crate::transport;

fn has_token(headers: &HeaderMap, name: HeaderName, token: &str) -> bool {
    headers
        .get_all(name)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .any(|part| part.trim().eq_ignore_ascii_case(token))
}

/// Whether the request asks to switch to the WebSocket protocol
pub(super) fn is_upgrade<B>(req: &Request<B>) -> bool {
    has_token(req.headers(), header::CONNECTION, "upgrade")
        && has_token(req.headers(), header::UPGRADE, "websocket")
}

/// Answer the upgrade handshake and hand the connection to `broker`
pub(super) fn upgrade(
    mut req: Request<Incoming>,
    broker: Arc<Broker>,
    peer: SocketAddr,
) -> Response<Full<Bytes>> {
    if req.uri().path() != broker.config().ws_path {
        return text(StatusCode::NOT_FOUND, "Not Found");
    }
    if req.method() != Method::GET {
        return text(StatusCode::METHOD_NOT_ALLOWED, "Method not allowed");
    }
    let version_ok = req
        .headers()
        .get(header::SEC_WEBSOCKET_VERSION)
        .is_some_and(|v| v.as_bytes() == b"13");
    let Some(key) = req.headers().get(header::SEC_WEBSOCKET_KEY) else {
        return text(StatusCode::BAD_REQUEST, "Missing Sec-WebSocket-Key");
    };
    if !version_ok {
        return text(StatusCode::BAD_REQUEST, "Unsupported WebSocket version");
    }
    let Ok(accept) = HeaderValue::from_str(&derive_accept_key(key.as_bytes())) else {
        return text(StatusCode::BAD_REQUEST, "Invalid Sec-WebSocket-Key");
    };

    let on_upgrade = hyper::upgrade::on(&mut req);
    tokio::spawn(async move {
        match on_upgrade.await {
            Ok(upgraded) => {
                let stream = transport::from_upgraded(TokioIo::new(upgraded)).await;
                if !broker.attach(stream, peer) {
                    debug!("Upgraded connection from {} was refused", peer);
                }
            }
            Err(e) => warn!("WebSocket upgrade from {} failed: {}", peer, e),
        }
    });

    let mut response = Response::new(Full::new(Bytes::new()));
    *response.status_mut() = StatusCode::SWITCHING_PROTOCOLS;
    let headers = response.headers_mut();
    headers.insert(header::CONNECTION, HeaderValue::from_static("Upgrade"));
    headers.insert(header::UPGRADE, HeaderValue::from_static("websocket"));
    headers.insert(header::SEC_WEBSOCKET_ACCEPT, accept);
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(headers: &[(&str, &str)]) -> Request<()> {
        let mut builder = Request::builder().uri("/ws");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        builder.body(()).unwrap()
    }

    #[test]
    fn test_is_upgrade() {
        assert!(is_upgrade(&request(&[
            ("connection", "Upgrade"),
            ("upgrade", "websocket"),
        ])));
        assert!(is_upgrade(&request(&[
            ("connection", "keep-alive, Upgrade"),
            ("upgrade", "WebSocket"),
        ])));
        assert!(!is_upgrade(&request(&[("upgrade", "websocket")])));
        assert!(!is_upgrade(&request(&[
            ("connection", "upgrade"),
            ("upgrade", "h2c"),
        ])));
        assert!(!is_upgrade(&request(&[])));
    }
}
