//! Server configuration loading from file and environment variables.

use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr};
use talkback_relay::RelayConfig;
use talkback_voice::VoiceConfig;
use thiserror::Error;

/// Top-level server configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Server network settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Database settings.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub auth: AuthConfig,

    /// Queue store endpoints, envelope format and reply timing.
    #[serde(default)]
    pub relay: RelayConfig,

    #[serde(default)]
    pub hub: HubConfig,

    /// Speech tooling.
    #[serde(default)]
    pub voice: VoiceConfig,
}

/// Network configuration for the HTTP server.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to.
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: String,

    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    #[serde(default = "default_pool_max_size")]
    pub pool_max_size: u32,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "talkback_server=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

/// Session token settings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthConfig {
    /// HS256 secret shared with the service that issues session tokens.
    #[serde(default)]
    pub jwt_secret: String,
}

/// Connection hub settings.
#[derive(Debug, Clone, Deserialize)]
pub struct HubConfig {
    /// Outbound frames buffered per connection before it is evicted.
    #[serde(default = "default_connection_capacity")]
    pub connection_capacity: usize,
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))
}

fn default_port() -> u16 {
    8080
}

fn default_db_path() -> String {
    "talkback.db".to_string()
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

fn default_pool_max_size() -> u32 {
    8
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_connection_capacity() -> usize {
    256
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            busy_timeout_ms: default_busy_timeout_ms(),
            pool_max_size: default_pool_max_size(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            connection_capacity: default_connection_capacity(),
        }
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl Config {
    /// Rejects settings the server cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.auth.jwt_secret.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "auth.jwt_secret must be set (or TALKBACK_JWT_SECRET)".to_string(),
            ));
        }
        if self.relay.channel.is_empty() || self.relay.channel.contains([' ', ':', '-']) {
            return Err(ConfigError::Invalid(format!(
                "relay.channel {:?} must be non-empty and free of spaces, ':' and '-'",
                self.relay.channel
            )));
        }
        if self.hub.connection_capacity == 0 {
            return Err(ConfigError::Invalid(
                "hub.connection_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Loads configuration from a TOML file, falling back to defaults.
///
/// Environment variable overrides:
/// - `TALKBACK_HOST` overrides `server.host`
/// - `TALKBACK_PORT` overrides `server.port`
/// - `TALKBACK_DB_PATH` overrides `database.path`
/// - `TALKBACK_LOG_LEVEL` overrides `logging.level`
/// - `TALKBACK_LOG_JSON` overrides `logging.json` (set to "true" to enable)
/// - `TALKBACK_JWT_SECRET` overrides `auth.jwt_secret`
/// - `TALKBACK_REDIS_URL` overrides `relay.redis_url`
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(contents) => toml::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = p, "config file not found, using defaults");
                Config::default()
            }
            Err(e) => return Err(ConfigError::FileRead(e)),
        },
        None => Config::default(),
    };

    if let Ok(host) = std::env::var("TALKBACK_HOST") {
        if let Ok(parsed) = host.parse() {
            config.server.host = parsed;
        }
    }
    if let Ok(port) = std::env::var("TALKBACK_PORT") {
        if let Ok(parsed) = port.parse() {
            config.server.port = parsed;
        }
    }
    if let Ok(db_path) = std::env::var("TALKBACK_DB_PATH") {
        config.database.path = db_path;
    }
    if let Ok(level) = std::env::var("TALKBACK_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Ok(json) = std::env::var("TALKBACK_LOG_JSON") {
        config.logging.json = json == "true" || json == "1";
    }
    if let Ok(secret) = std::env::var("TALKBACK_JWT_SECRET") {
        config.auth.jwt_secret = secret;
    }
    if let Ok(url) = std::env::var("TALKBACK_REDIS_URL") {
        config.relay.redis_url = url;
    }

    Ok(config)
}
