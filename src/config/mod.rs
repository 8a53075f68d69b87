//! Configuration Module
//!
//! Provides TOML-based configuration for TurpleMQ with support for:
//! - Server settings (bind address, WebSocket path, connection limit)
//! - Queue bound and subscription semantics
//! - Persistence of broadcast messages
//! - HTTP surface (history endpoint, CORS, static assets) and metrics
//! - Environment variable overrides (TURPLEMQ__* prefix)

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use config::{Environment, File, FileFormat};
use regex::Regex;
use serde::Deserialize;

pub use http::HttpConfig;
pub use metrics::MetricsConfig;
pub use persistence::{PersistenceConfig, PersistenceMode};

mod http;
mod metrics;
mod persistence;

/// Substitute environment variables in a string.
/// Supports `${VAR}` and `${VAR:-default}` syntax.
fn substitute_env_vars(content: &str) -> String {
    let re = Regex::new(r"\$\{([^}:]+)(?::-([^}]*))?\}").unwrap();
    re.replace_all(content, |caps: &regex::Captures| {
        let var_name = &caps[1];
        let default = caps.get(2).map(|m| m.as_str()).unwrap_or("");
        std::env::var(var_name).unwrap_or_else(|_| default.to_string())
    })
    .to_string()
}

#[cfg(test)]
mod tests;

/// Configuration error types
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file
    Io(std::io::Error),
    /// TOML parsing error
    Parse(toml::de::Error),
    /// Config crate error
    Config(config::ConfigError),
    /// Validation error
    Validation(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Parse(e) => write!(f, "Parse error: {}", e),
            ConfigError::Config(e) => write!(f, "Config error: {}", e),
            ConfigError::Validation(msg) => write!(f, "Validation error: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

impl From<config::ConfigError> for ConfigError {
    fn from(e: config::ConfigError) -> Self {
        ConfigError::Config(e)
    }
}

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Logging configuration
    pub log: LogConfig,
    /// WebSocket listener configuration
    pub server: ServerConfig,
    /// Buffered-mode queue configuration
    pub queue: QueueConfig,
    /// Broadcast subscription configuration
    pub registry: RegistryConfig,
    /// Broadcast history persistence
    pub persistence: PersistenceConfig,
    /// HTTP surface
    pub http: HttpConfig,
    /// Metrics configuration
    pub metrics: MetricsConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level: error, warn, info, debug, trace
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Server configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// TCP bind address for WebSocket clients
    #[serde(default = "default_bind")]
    pub bind: SocketAddr,
    /// WebSocket upgrade path (default: "/ws")
    #[serde(default = "default_ws_path")]
    pub ws_path: String,
    /// Maximum concurrent connections (0 = unbounded)
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Upper bound on the WebSocket handshake (e.g. "10s")
    #[serde(default = "default_handshake_timeout", with = "humantime_serde")]
    pub handshake_timeout: Duration,
    /// Frames that may wait for one slow client before it is dropped.
    /// Set to 0 for unbounded (not recommended for production).
    #[serde(default = "default_outbound_capacity")]
    pub outbound_capacity: usize,
}

fn default_bind() -> SocketAddr {
    "0.0.0.0:8080".parse().unwrap()
}
fn default_ws_path() -> String {
    "/ws".to_string()
}
fn default_max_connections() -> usize {
    100_000
}
fn default_handshake_timeout() -> Duration {
    Duration::from_secs(10)
}
fn default_outbound_capacity() -> usize {
    1024
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            ws_path: default_ws_path(),
            max_connections: default_max_connections(),
            handshake_timeout: default_handshake_timeout(),
            outbound_capacity: default_outbound_capacity(),
        }
    }
}

/// Buffered-mode queue configuration
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct QueueConfig {
    /// Maximum pending messages per topic (0 = unbounded).
    /// A producer hitting the bound is rejected, never blocked.
    pub capacity: usize,
}

/// Subscription registry configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Ignore a repeated subscribe for the same topic on the same connection.
    /// When false every subscribe registers again and the client receives one
    /// copy per registration.
    pub dedupe_subscriptions: bool,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            dedupe_subscriptions: true,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file with environment variable overrides.
    ///
    /// Supports two forms of environment variable usage:
    /// 1. In-file substitution: `${VAR}` or `${VAR:-default}` syntax in the TOML file
    /// 2. Override via env vars: `TURPLEMQ__` prefix with double underscores for nesting:
    ///    - `TURPLEMQ__SERVER__BIND=0.0.0.0:9000` overrides `server.bind`
    ///    - `TURPLEMQ__QUEUE__CAPACITY=500` overrides `queue.capacity`
    ///    - `TURPLEMQ__PERSISTENCE__ENABLED=false` overrides `persistence.enabled`
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder()
            // Start with defaults
            .set_default("log.level", "info")?
            .set_default("server.bind", "0.0.0.0:8080")?
            .set_default("server.ws_path", "/ws")?
            .set_default("server.max_connections", 100_000)?
            .set_default("server.handshake_timeout", "10s")?
            .set_default("server.outbound_capacity", 1024)?
            .set_default("queue.capacity", 0)?
            .set_default("registry.dedupe_subscriptions", true)?
            .set_default("persistence.enabled", true)?
            .set_default("persistence.path", "./data")?
            .set_default("persistence.mode", "sync")?
            .set_default("persistence.record_timeout", "2s")?
            .set_default("persistence.flush_interval", "100ms")?
            .set_default("persistence.max_batch_size", 100)?
            .set_default("persistence.channel_capacity", 10_000)?
            .set_default("persistence.history_limit", 100)?
            .set_default("http.enabled", true)?
            .set_default("http.bind", "0.0.0.0:8080")?
            .set_default("http.cors", true)?
            .set_default("metrics.enabled", true)?;

        // Load from file with env var substitution
        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(content) => {
                let substituted = substitute_env_vars(&content);
                builder = builder.add_source(File::from_str(&substituted, FileFormat::Toml));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // File doesn't exist, use defaults
            }
            Err(e) => return Err(ConfigError::Io(e)),
        }

        // Override with environment variables (TURPLEMQ__SERVER__BIND, etc.)
        // Double underscore separates nested keys, single underscore preserved in field names
        let cfg = builder
            .add_source(
                Environment::with_prefix("TURPLEMQ")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = cfg.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration with environment variable overrides only (no file).
    ///
    /// Useful for containerized deployments where all config comes from env vars.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(Path::new(""))
    }

    /// Parse configuration from a string (for testing, no env var support)
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.server.ws_path.starts_with('/') {
            return Err(ConfigError::Validation(format!(
                "server.ws_path must start with '/', got {:?}",
                self.server.ws_path
            )));
        }

        if self.server.handshake_timeout.is_zero() {
            return Err(ConfigError::Validation(
                "server.handshake_timeout must be greater than zero".to_string(),
            ));
        }

        if self.persistence.enabled {
            if self.persistence.path.as_os_str().is_empty() {
                return Err(ConfigError::Validation(
                    "persistence.path is required when persistence is enabled".to_string(),
                ));
            }
            if self.persistence.history_limit == 0 {
                return Err(ConfigError::Validation(
                    "persistence.history_limit must be at least 1".to_string(),
                ));
            }
            if self.persistence.mode == PersistenceMode::Sync
                && self.persistence.record_timeout.is_zero()
            {
                return Err(ConfigError::Validation(
                    "persistence.record_timeout must be greater than zero in sync mode"
                        .to_string(),
                ));
            }
        }

        if self.http.enabled
            && self.http.bind.port() == self.server.bind.port()
            && self.http.bind != self.server.bind
        {
            return Err(ConfigError::Validation(format!(
                "http.bind {} and server.bind {} use the same port; make them identical to share one listener",
                self.http.bind, self.server.bind
            )));
        }

        Ok(())
    }

    /// Whether WebSocket clients are accepted on the HTTP listener
    pub fn shares_listener(&self) -> bool {
        self.http.enabled && self.http.bind == self.server.bind
    }
}
