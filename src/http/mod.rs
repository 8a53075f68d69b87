//! HTTP surface
//!
//! Routes:
//! - `GET /messages?topic=<name>`: broadcast history, newest first
//!   (only when persistence is enabled)
//! - `GET /health`: liveness probe
//! - `GET /metrics`: Prometheus text format (only when metrics are enabled)
//! - anything else: the web client from `static_dir`, with SPA fallback
//!
//! When the broker shares this listener, a WebSocket upgrade on its path is
//! answered here and the upgraded connection is handed to the broker.
//!
//! With CORS on, every response carries permissive CORS headers and any
//! `OPTIONS` request is answered with an empty 200.

mod assets;
mod server;
mod upgrade;

pub use server::HttpServer;

use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::Full;
use hyper::header::{self, HeaderValue};
use hyper::{Method, Response, StatusCode, Uri};
use serde::Serialize;
use tracing::error;

use crate::broker::Broker;
use crate::metrics::Metrics;
use crate::persistence::{HistoryEntry, PersistenceManager};

/// Shared state of the HTTP handlers
pub struct HttpState {
    /// History source; `/messages` is not routed without it
    pub persistence: Option<Arc<PersistenceManager>>,
    pub metrics: Option<Arc<Metrics>>,
    /// Maximum entries per history response
    pub history_limit: usize,
    pub cors: bool,
    /// Web client root
    pub static_dir: Option<PathBuf>,
    /// Broker that takes WebSocket upgrades on this listener
    pub broker: Option<Arc<Broker>>,
}

impl Default for HttpState {
    fn default() -> Self {
        Self {
            persistence: None,
            metrics: None,
            history_limit: 100,
            cors: true,
            static_dir: None,
            broker: None,
        }
    }
}

#[derive(Serialize)]
struct HistoryResponse {
    topic: String,
    messages: Vec<HistoryEntry>,
}

pub(crate) fn text(status: StatusCode, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}

/// Route one request
pub async fn handle(method: &Method, uri: &Uri, state: &HttpState) -> Response<Full<Bytes>> {
    let mut response = if state.cors && method == Method::OPTIONS {
        text(StatusCode::OK, Bytes::new())
    } else {
        route(method, uri, state).await
    };

    if state.cors {
        let headers = response.headers_mut();
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_ORIGIN,
            HeaderValue::from_static("*"),
        );
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_METHODS,
            HeaderValue::from_static("GET, POST, OPTIONS"),
        );
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_HEADERS,
            HeaderValue::from_static("Content-Type"),
        );
    }
    response
}

async fn route(method: &Method, uri: &Uri, state: &HttpState) -> Response<Full<Bytes>> {
    match uri.path() {
        "/messages" if state.persistence.is_some() => message_history(method, uri, state).await,
        "/health" | "/healthz" => text(StatusCode::OK, "OK"),
        "/metrics" if state.metrics.is_some() => render_metrics(state),
        path => match state.static_dir {
            Some(ref root) => assets::serve(root, path).await,
            None => text(StatusCode::NOT_FOUND, "Not Found"),
        },
    }
}

async fn message_history(method: &Method, uri: &Uri, state: &HttpState) -> Response<Full<Bytes>> {
    if method != Method::GET {
        return text(StatusCode::METHOD_NOT_ALLOWED, "Method not allowed");
    }

    let topic = uri
        .query()
        .and_then(|query| {
            url::form_urlencoded::parse(query.as_bytes())
                .find(|(key, _)| key == "topic")
                .map(|(_, value)| value.into_owned())
        })
        .unwrap_or_default();
    if topic.is_empty() {
        return text(StatusCode::BAD_REQUEST, "Topic is required");
    }

    let Some(ref persistence) = state.persistence else {
        return text(StatusCode::NOT_FOUND, "Not Found");
    };
    let messages = match persistence.history(&topic, state.history_limit).await {
        Ok(messages) => messages,
        Err(e) => {
            error!("Error retrieving messages for {:?}: {}", topic, e);
            return text(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to retrieve messages",
            );
        }
    };

    let body = HistoryResponse {
        topic,
        messages: messages.into_iter().map(HistoryEntry::from).collect(),
    };
    match serde_json::to_vec(&body) {
        Ok(json) => {
            let mut response = text(StatusCode::OK, json);
            response.headers_mut().insert(
                header::CONTENT_TYPE,
                HeaderValue::from_static("application/json"),
            );
            response
        }
        Err(e) => {
            error!("Failed to encode history: {}", e);
            text(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to retrieve messages",
            )
        }
    }
}

fn render_metrics(state: &HttpState) -> Response<Full<Bytes>> {
    let Some(ref metrics) = state.metrics else {
        return text(StatusCode::NOT_FOUND, "Not Found");
    };
    match metrics.encode() {
        Ok((buffer, content_type)) => {
            let mut response = text(StatusCode::OK, buffer);
            if let Ok(value) = HeaderValue::from_str(&content_type) {
                response.headers_mut().insert(header::CONTENT_TYPE, value);
            }
            response
        }
        Err(e) => {
            error!("Failed to encode metrics: {}", e);
            text(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to encode metrics",
            )
        }
    }
}
