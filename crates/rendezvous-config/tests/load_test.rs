//! Loading configuration from files and the environment.

use std::fs;

use serial_test::serial;
use tempfile::tempdir;

use rendezvous_config::{Config, ConfigError, LogFormat};

fn clear_env() {
    for key in [
        "RENDEZVOUS__SERVER__PORT",
        "RENDEZVOUS__SERVER__BIND",
        "RENDEZVOUS__LOGGING__FORMAT",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
#[serial]
fn test_load_from_explicit_file() {
    clear_env();
    let dir = tempdir().unwrap();
    let path = dir.path().join("config.toml");
    fs::write(
        &path,
        r#"
[server]
bind = "127.0.0.1"
port = 18080

[client]
broker_url = "http://broker.example:9999"
"#,
    )
    .unwrap();

    let config = Config::load(Some(path.to_str().unwrap())).unwrap();
    assert_eq!(config.server.listen_addr(), "127.0.0.1:18080");
    assert_eq!(config.client.broker_url, "http://broker.example:9999");
}

#[test]
#[serial]
fn test_missing_explicit_file_is_an_error() {
    clear_env();
    let dir = tempdir().unwrap();
    let path = dir.path().join("absent.toml");

    let err = Config::load(Some(path.to_str().unwrap())).unwrap_err();
    assert!(matches!(err, ConfigError::Load(_)));
}

#[test]
#[serial]
fn test_environment_overrides_file() {
    clear_env();
    let dir = tempdir().unwrap();
    let path = dir.path().join("config.toml");
    fs::write(&path, "[server]\nport = 18080\n").unwrap();

    std::env::set_var("RENDEZVOUS__SERVER__PORT", "19090");
    std::env::set_var("RENDEZVOUS__LOGGING__FORMAT", "json");
    let config = Config::load(Some(path.to_str().unwrap()));
    clear_env();

    let config = config.unwrap();
    assert_eq!(config.server.port, 19090);
    assert_eq!(config.logging.format, LogFormat::Json);
}

#[test]
#[serial]
fn test_invalid_values_fail_validation() {
    clear_env();
    let dir = tempdir().unwrap();
    let path = dir.path().join("config.toml");
    fs::write(&path, "[maintenance]\nsweep_interval_secs = 0\n").unwrap();

    let err = Config::load(Some(path.to_str().unwrap())).unwrap_err();
    assert!(err.to_string().contains("sweep_interval_secs"));
}
