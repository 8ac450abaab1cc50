//! Server configuration.
//!
//! Configuration is layered from:
//! - The first existing file of `tubes.toml`, `/etc/tubes/tubes.toml`,
//!   `~/.config/tubes/tubes.toml`
//! - Environment variables (`TUBES_PORT`, `TUBES_LIMITS__MAX_CONNECTIONS`, ...)

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Configuration file locations, in lookup order.
const CONFIG_PATHS: [&str; 3] = [
    "tubes.toml",
    "/etc/tubes/tubes.toml",
    "~/.config/tubes/tubes.toml",
];

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Transport configuration.
    #[serde(default)]
    pub transport: TransportConfig,

    /// Resource limits.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Channel bookkeeping.
    #[serde(default)]
    pub channels: ChannelsConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Path of the WebSocket endpoint.
    #[serde(default = "default_connect_path")]
    pub connect_path: String,
}

/// Resource limits configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum number of connections.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Maximum inbound message size in bytes.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
}

/// Channel bookkeeping configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelsConfig {
    /// Drop subscription contexts once their last subscriber leaves.
    #[serde(default = "default_true")]
    pub prune_empty_contexts: bool,

    /// Prefix of the demo chat channel (`<prefix>/{room}`); empty disables it.
    #[serde(default = "default_chat_prefix")]
    pub chat_prefix: String,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics export.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,

    /// Interval between router statistics samples, in milliseconds.
    #[serde(default = "default_sample_interval")]
    pub sample_interval_ms: u64,
}

// Default value functions
fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    9090
}

fn default_true() -> bool {
    true
}

fn default_connect_path() -> String {
    "/connect".to_string()
}

fn default_max_connections() -> usize {
    100_000
}

fn default_max_message_size() -> usize {
    64 * 1024 // 64 KB
}

fn default_chat_prefix() -> String {
    "chat".to_string()
}

fn default_metrics_port() -> u16 {
    9091
}

fn default_sample_interval() -> u64 {
    5_000
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            transport: TransportConfig::default(),
            limits: LimitsConfig::default(),
            channels: ChannelsConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_path: default_connect_path(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            max_message_size: default_max_message_size(),
        }
    }
}

impl Default for ChannelsConfig {
    fn default() -> Self {
        Self {
            prune_empty_contexts: true,
            chat_prefix: default_chat_prefix(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
            sample_interval_ms: default_sample_interval(),
        }
    }
}

impl Config {
    /// Load configuration from the first existing config file, then apply
    /// `TUBES_*` environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be parsed, or an
    /// override has the wrong type.
    pub fn load() -> Result<Self> {
        let mut builder = ::config::Config::builder();

        if let Some(path) = Self::find_file() {
            tracing::info!("Loading configuration from {}", path.display());
            builder = builder.add_source(::config::File::from(path.as_path()));
        }

        builder
            .add_source(
                ::config::Environment::with_prefix("TUBES")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to load configuration")?
            .try_deserialize()
            .context("Invalid configuration")
    }

    /// Load configuration from a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    fn find_file() -> Option<PathBuf> {
        CONFIG_PATHS
            .iter()
            .map(|p| PathBuf::from(shellexpand::tilde(p).as_ref()))
            .find(|p| p.exists())
    }

    /// Get the socket address to bind to.
    ///
    /// # Errors
    ///
    /// Returns an error if host and port do not form a socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid host:port {}:{}", self.host, self.port))
    }
}
