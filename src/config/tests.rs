//! Config module tests

use super::*;
use std::path::PathBuf;
use pretty_assertions::assert_eq;

#[test]
fn test_substitute_env_vars_simple() {
    std::env::set_var("TEST_VAR_SIMPLE", "hello");
    let result = substitute_env_vars("value = \"${TEST_VAR_SIMPLE}\"");
    assert_eq!(result, "value = \"hello\"");
    std::env::remove_var("TEST_VAR_SIMPLE");
}

#[test]
fn test_substitute_env_vars_with_default() {
    // Unset var should use default
    std::env::remove_var("TEST_VAR_UNSET");
    let result = substitute_env_vars("value = \"${TEST_VAR_UNSET:-default_value}\"");
    assert_eq!(result, "value = \"default_value\"");

    // Set var should use env value
    std::env::set_var("TEST_VAR_SET", "env_value");
    let result = substitute_env_vars("value = \"${TEST_VAR_SET:-default_value}\"");
    assert_eq!(result, "value = \"env_value\"");
    std::env::remove_var("TEST_VAR_SET");
}

#[test]
fn test_substitute_env_vars_missing_no_default() {
    std::env::remove_var("TEST_VAR_MISSING");
    let result = substitute_env_vars("value = \"${TEST_VAR_MISSING}\"");
    assert_eq!(result, "value = \"\"");
}

#[test]
fn test_load_config_with_env_substitution() {
    let temp_dir = tempfile::tempdir().unwrap();
    let config_path = temp_dir.path().join("turplemq.toml");

    std::env::set_var("TEST_TURPLE_HOST", "127.0.0.1");
    std::env::set_var("TEST_TURPLE_PORT", "9100");

    let config_content = r#"
[server]
bind = "${TEST_TURPLE_HOST}:${TEST_TURPLE_PORT}"

[queue]
capacity = ${TEST_TURPLE_CAPACITY:-250}
"#;

    std::fs::write(&config_path, config_content).unwrap();

    let config = Config::load(&config_path).unwrap();
    assert_eq!(config.server.bind.to_string(), "127.0.0.1:9100");
    assert_eq!(config.queue.capacity, 250); // Uses default

    std::env::remove_var("TEST_TURPLE_HOST");
    std::env::remove_var("TEST_TURPLE_PORT");
}

#[test]
fn test_load_missing_file_uses_defaults() {
    let temp_dir = tempfile::tempdir().unwrap();
    let config = Config::load(temp_dir.path().join("absent.toml")).unwrap();
    assert_eq!(config.server.ws_path, "/ws");
    assert_eq!(config.http.bind.port(), 8080);
    assert_eq!(config.persistence.mode, PersistenceMode::Sync);
    assert_eq!(config.persistence.history_limit, 100);
}

#[test]
fn test_default_config() {
    let config = Config::default();
    assert_eq!(config.log.level, "info");
    assert_eq!(config.server.bind.port(), 8080);
    assert!(config.shares_listener());
    assert_eq!(config.server.ws_path, "/ws");
    assert_eq!(config.server.outbound_capacity, 1024);
    assert_eq!(config.queue.capacity, 0);
    assert!(config.registry.dedupe_subscriptions);
    assert!(config.persistence.enabled);
    assert_eq!(config.persistence.path, PathBuf::from("./data"));
    assert!(config.http.enabled);
    assert!(config.http.cors);
    assert!(config.http.static_dir.is_none());
    assert!(config.metrics.enabled);
    assert!(config.validate().is_ok());
}

#[test]
fn test_parse_full_config() {
    let toml = r#"
[log]
level = "debug"

[server]
bind = "127.0.0.1:7000"
ws_path = "/socket"
max_connections = 500
handshake_timeout = "3s"
outbound_capacity = 64

[queue]
capacity = 1000

[registry]
dedupe_subscriptions = false

[persistence]
enabled = true
path = "/var/lib/turplemq"
mode = "async"
record_timeout = "500ms"
flush_interval = "1s"
max_batch_size = 50
channel_capacity = 200
history_limit = 20

[http]
bind = "127.0.0.1:7001"
cors = false
static_dir = "./static"

[metrics]
enabled = false
"#;

    let config = Config::parse(toml).unwrap();
    assert_eq!(config.log.level, "debug");
    assert_eq!(config.server.ws_path, "/socket");
    assert_eq!(config.server.max_connections, 500);
    assert_eq!(config.server.handshake_timeout, Duration::from_secs(3));
    assert_eq!(config.server.outbound_capacity, 64);
    assert_eq!(config.queue.capacity, 1000);
    assert!(!config.registry.dedupe_subscriptions);
    assert_eq!(config.persistence.mode, PersistenceMode::Async);
    assert_eq!(
        config.persistence.path,
        std::path::PathBuf::from("/var/lib/turplemq")
    );
    assert_eq!(config.persistence.record_timeout, Duration::from_millis(500));
    assert_eq!(config.persistence.flush_interval, Duration::from_secs(1));
    assert_eq!(config.persistence.max_batch_size, 50);
    assert_eq!(config.persistence.channel_capacity, 200);
    assert_eq!(config.persistence.history_limit, 20);
    assert_eq!(config.http.bind.to_string(), "127.0.0.1:7001");
    assert!(!config.http.cors);
    assert_eq!(
        config.http.static_dir,
        Some(std::path::PathBuf::from("./static"))
    );
    assert!(!config.metrics.enabled);
}

#[test]
fn test_unknown_persistence_mode_rejected() {
    let toml = r#"
[persistence]
mode = "eventually"
"#;

    assert!(matches!(Config::parse(toml), Err(ConfigError::Parse(_))));
}

#[test]
fn test_invalid_ws_path() {
    let toml = r#"
[server]
ws_path = "ws"
"#;

    let err = Config::parse(toml).unwrap_err().to_string();
    assert!(err.contains("ws_path"));
}

#[test]
fn test_zero_history_limit_rejected() {
    let toml = r#"
[persistence]
history_limit = 0
"#;

    assert!(matches!(
        Config::parse(toml),
        Err(ConfigError::Validation(_))
    ));
}

#[test]
fn test_zero_history_limit_allowed_when_disabled() {
    let toml = r#"
[persistence]
enabled = false
history_limit = 0
"#;

    assert!(Config::parse(toml).is_ok());
}

#[test]
fn test_sync_mode_requires_record_timeout() {
    let toml = r#"
[persistence]
mode = "sync"
record_timeout = "0s"
"#;

    let err = Config::parse(toml).unwrap_err().to_string();
    assert!(err.contains("record_timeout"));
}

#[test]
fn test_separate_listeners() {
    let toml = r#"
[server]
bind = "127.0.0.1:8081"

[http]
bind = "127.0.0.1:8080"
"#;

    let config = Config::parse(toml).unwrap();
    assert!(!config.shares_listener());
}

#[test]
fn test_disabled_http_never_shares() {
    let toml = r#"
[http]
enabled = false
"#;

    let config = Config::parse(toml).unwrap();
    assert_eq!(config.http.bind, config.server.bind);
    assert!(!config.shares_listener());
}

#[test]
fn test_same_port_different_address_is_rejected() {
    let toml = r#"
[server]
bind = "127.0.0.1:8080"

[http]
bind = "0.0.0.0:8080"
"#;

    let err = Config::parse(toml).unwrap_err().to_string();
    assert!(err.contains("same port"));
}
