//! HTTP surface configuration

use serde::Deserialize;
use std::net::SocketAddr;
use std::path::PathBuf;

/// HTTP configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Whether the HTTP listener is started
    pub enabled: bool,
    /// HTTP bind address for history, health, metrics and static assets
    pub bind: SocketAddr,
    /// Attach permissive CORS headers and answer preflight requests
    pub cors: bool,
    /// Directory holding the web client (`index.html` plus `assets/`)
    pub static_dir: Option<PathBuf>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind: "0.0.0.0:8080".parse().unwrap(),
            cors: true,
            static_dir: None,
        }
    }
}
