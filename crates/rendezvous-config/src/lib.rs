//! Layered configuration for the rendezvous broker and tunnel endpoints.
//!
//! Values are resolved in order, later sources winning:
//! 1. Built-in defaults
//! 2. A TOML file (`~/.config/rendezvous/config.toml` unless a path is given)
//! 3. Environment variables prefixed `RENDEZVOUS__`, e.g. `RENDEZVOUS__SERVER__PORT=8080`

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "RENDEZVOUS";

/// Separator between nested keys in environment variable names.
pub const ENV_SEPARATOR: &str = "__";

/// Port the broker listens on unless configured otherwise.
pub const DEFAULT_PORT: u16 = 9999;

/// Errors raised while loading or rendering configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Failed to render configuration: {0}")]
    Render(#[from] toml::ser::Error),
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub maintenance: MaintenanceConfig,
    pub client: ClientConfig,
    pub logging: LoggingConfig,
}

/// The `[server]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind.
    pub bind: String,
    pub port: u16,
    /// Value forced into the `Server` response header, if set.
    pub server_header: Option<String>,
    /// Largest accepted request body.
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            server_header: None,
            max_body_bytes: 1024 * 1024,
        }
    }
}

impl ServerConfig {
    /// `bind:port` string suitable for a listener.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

/// The `[maintenance]` section.
///
/// Channels never expire on their own. Setting `channel_max_age_secs`
/// enables a periodic sweep that deletes channels older than that.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MaintenanceConfig {
    pub channel_max_age_secs: Option<u64>,
    pub sweep_interval_secs: u64,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            channel_max_age_secs: None,
            sweep_interval_secs: 60,
        }
    }
}

impl MaintenanceConfig {
    pub fn channel_max_age(&self) -> Option<Duration> {
        self.channel_max_age_secs.map(Duration::from_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

/// The `[client]` section, used by the tunnel endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub broker_url: String,
    /// Delay between polls when the broker had nothing for us.
    pub poll_interval_ms: u64,
    /// Size of each read from a tunnelled TCP socket.
    pub read_buffer_bytes: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            broker_url: format!("http://127.0.0.1:{DEFAULT_PORT}"),
            poll_interval_ms: 1000,
            read_buffer_bytes: 128 * 1024,
        }
    }
}

impl ClientConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// The `[logging]` section.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub format: LogFormat,
}

impl Config {
    /// Load configuration from `path` (required to exist) or from the
    /// default location (optional), then apply environment overrides.
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        let (file, required) = match path {
            Some(path) => (Some(expand_path(path)), true),
            None => (default_config_path(), false),
        };

        let mut builder = config::Config::builder();
        if let Some(file) = file {
            builder = builder.add_source(
                config::File::from(file.as_path())
                    .format(config::FileFormat::Toml)
                    .required(required),
            );
        }
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .separator(ENV_SEPARATOR)
                .try_parsing(true),
        );

        let config: Config = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a TOML string, without environment overrides.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Config = config::Config::builder()
            .add_source(config::File::from_str(s, config::FileFormat::Toml))
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make the broker or tunnel unusable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::Invalid("server.port must be non-zero".into()));
        }
        if self.maintenance.sweep_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "maintenance.sweep_interval_secs must be non-zero".into(),
            ));
        }
        if self.client.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "client.poll_interval_ms must be non-zero".into(),
            ));
        }
        if self.client.read_buffer_bytes == 0 {
            return Err(ConfigError::Invalid(
                "client.read_buffer_bytes must be non-zero".into(),
            ));
        }
        Ok(())
    }

    /// Render the effective configuration as TOML.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }
}

/// Default configuration file location.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("rendezvous").join("config.toml"))
}

/// Expand `~` and environment variables in a user-supplied path.
pub fn expand_path(path: &str) -> PathBuf {
    match shellexpand::full(path) {
        Ok(expanded) => Path::new(expanded.as_ref()).to_path_buf(),
        Err(_) => PathBuf::from(path),
    }
}
