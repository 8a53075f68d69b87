//! TurpleMQ - real-time WebSocket message broker
//!
//! Usage:
//!   turplemq [OPTIONS]
//!
//! Options:
//!   -c, --config <FILE>    Configuration file path
//!   -b, --bind <ADDR>      WebSocket bind address (default: 0.0.0.0:8080)
//!   --ws-path <PATH>       WebSocket path (default: /ws)
//!   --http-bind <ADDR>     HTTP bind address (default: 0.0.0.0:8080)
//!
//! When both addresses are equal, one listener serves WebSocket upgrades on
//! the WebSocket path alongside the HTTP routes.
//!   --data-dir <DIR>       Persistence directory (default: ./data)
//!   --no-persistence       Disable broadcast history
//!   --static-dir <DIR>     Serve the web client from this directory
//!   -l, --log-level        Log level (error, warn, info, debug, trace)
//!   -h, --help             Print help

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use turplemq::broker::{Broker, BrokerConfig};
use turplemq::config::{Config, PersistenceMode};
use turplemq::http::{HttpServer, HttpState};
use turplemq::persistence::{FjallBackend, PersistenceManager, PersistenceSettings};
use turplemq::Metrics;

/// Log level for CLI
#[derive(Debug, Clone, Copy, ValueEnum, Default)]
enum LogLevel {
    /// Only errors
    Error,
    /// Warnings and errors
    Warn,
    /// Informational messages
    #[default]
    Info,
    /// Debug messages
    Debug,
    /// Trace messages (very verbose)
    Trace,
}

impl LogLevel {
    fn to_tracing_level(self) -> Level {
        match self {
            LogLevel::Error => Level::ERROR,
            LogLevel::Warn => Level::WARN,
            LogLevel::Info => Level::INFO,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Trace => Level::TRACE,
        }
    }
}

/// TurpleMQ - real-time WebSocket message broker
#[derive(Parser, Debug)]
#[command(name = "turplemq")]
#[command(version)]
#[command(about = "Real-time WebSocket message broker with queue and pub/sub topics")]
struct Args {
    /// Configuration file path (TOML format)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// WebSocket bind address
    #[arg(short, long)]
    bind: Option<SocketAddr>,

    /// WebSocket upgrade path
    #[arg(long)]
    ws_path: Option<String>,

    /// HTTP bind address (history, health, metrics, web client)
    #[arg(long)]
    http_bind: Option<SocketAddr>,

    /// Directory for persisted broadcast history
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Disable broadcast history (and the /messages endpoint)
    #[arg(long)]
    no_persistence: bool,

    /// Directory holding the web client (index.html and assets/)
    #[arg(long)]
    static_dir: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, value_enum)]
    log_level: Option<LogLevel>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Load configuration file if specified, otherwise defaults plus env overrides
    let loaded = match &args.config {
        Some(config_path) => Config::load(config_path),
        None => Config::from_env(),
    };
    let mut config = match loaded {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Error loading configuration: {}", e);
            std::process::exit(1);
        }
    };

    // Setup logging - CLI overrides config, config overrides default (info)
    let log_level = args.log_level.unwrap_or_else(|| {
        match config.log.level.to_lowercase().as_str() {
            "error" => LogLevel::Error,
            "warn" => LogLevel::Warn,
            "info" => LogLevel::Info,
            "debug" => LogLevel::Debug,
            "trace" => LogLevel::Trace,
            _ => LogLevel::Info,
        }
    });

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level.to_tracing_level())
        .with_target(false)
        .with_thread_ids(true)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    if let Some(ref path) = args.config {
        info!("Loaded configuration from {:?}", path);
    }

    // CLI args override file config
    if let Some(bind) = args.bind {
        config.server.bind = bind;
    }
    if let Some(ws_path) = args.ws_path {
        config.server.ws_path = ws_path;
    }
    if let Some(http_bind) = args.http_bind {
        config.http.bind = http_bind;
    }
    if let Some(data_dir) = args.data_dir {
        config.persistence.path = data_dir;
    }
    if args.no_persistence {
        config.persistence.enabled = false;
    }
    if let Some(static_dir) = args.static_dir {
        config.http.static_dir = Some(static_dir);
    }
    if let Err(e) = config.validate() {
        eprintln!("Invalid configuration: {}", e);
        std::process::exit(1);
    }

    let broker_config = BrokerConfig::from(&config);

    info!("Starting TurpleMQ");
    info!(
        "  WebSocket address: {} (path: {})",
        broker_config.bind_addr, broker_config.ws_path
    );
    info!("  Max connections: {}", broker_config.max_connections);
    info!("  Queue bound: {:?}", broker_config.queue_bound);
    info!(
        "  Deduplicate subscriptions: {}",
        broker_config.dedupe_subscriptions
    );

    // A store that fails to open only disables history
    let persistence = if config.persistence.enabled {
        match FjallBackend::open(&config.persistence.path) {
            Ok(backend) => {
                let settings = PersistenceSettings::from(&config.persistence);
                let mode = match settings.mode {
                    PersistenceMode::Sync => "sync",
                    PersistenceMode::Async => "async",
                };
                info!(
                    "  Persistence: enabled ({}, {} mode)",
                    config.persistence.path.display(),
                    mode
                );
                Some(Arc::new(PersistenceManager::new(Arc::new(backend), settings)))
            }
            Err(e) => {
                warn!(
                    "Failed to open persistence at {}: {}",
                    config.persistence.path.display(),
                    e
                );
                warn!("Continuing without persistence");
                None
            }
        }
    } else {
        info!("  Persistence: disabled");
        None
    };

    let metrics = if config.metrics.enabled {
        info!("  Metrics: enabled");
        Some(Arc::new(Metrics::new()))
    } else {
        info!("  Metrics: disabled");
        None
    };

    let shared = config.shares_listener();
    let broker = Arc::new(Broker::new(broker_config, persistence.clone(), metrics.clone()));

    let mut http = if config.http.enabled {
        let state = HttpState {
            persistence: persistence.clone(),
            metrics,
            history_limit: config.persistence.history_limit,
            cors: config.http.cors,
            static_dir: config.http.static_dir.clone(),
            broker: shared.then(|| broker.clone()),
        };
        if let Some(ref dir) = state.static_dir {
            info!("  Web client: {}", dir.display());
        }
        if shared {
            info!("  WebSocket shares the HTTP listener on {}", config.http.bind);
        }
        let server = HttpServer::new(state, config.http.bind);
        Some(tokio::spawn(async move {
            if let Err(e) = server.run().await {
                error!("HTTP server error: {}", e);
            }
        }))
    } else {
        info!("  HTTP: disabled");
        None
    };

    if let (true, Some(http)) = (shared, http.as_mut()) {
        // Sessions arrive through the HTTP listener; it going away ends the broker
        tokio::select! {
            _ = broker.wait_for_shutdown() => {}
            _ = http => {
                error!("HTTP listener stopped");
                broker.shutdown();
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down");
                broker.shutdown();
            }
        }
    } else {
        tokio::select! {
            result = broker.run() => result?,
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down");
                broker.shutdown();
            }
        }
    }

    if let Some(http) = http {
        http.abort();
    }

    if let Some(persistence) = persistence {
        if let Err(e) = persistence.shutdown().await {
            error!("Persistence shutdown failed: {}", e);
        }
    }

    info!("TurpleMQ stopped");
    Ok(())
}
