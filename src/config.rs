//! Configuration management
//!
//! Handles loading and validating agent configuration from TOML files.
//! Every section has defaults, so a missing file yields a usable config.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

use crate::transport::Endpoint;

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub endpoint: EndpointConfig,
    pub reconnect: ReconnectConfig,
    pub protocol: ProtocolConfig,
    pub power: PowerConfig,
    pub credentials: CredentialsConfig,
    pub metrics: MetricsConfig,
    pub logging: LoggingConfig,
}

/// Remote control endpoint
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    /// WebSocket URL (ws:// or wss://)
    pub url: String,
    /// Query parameter carrying the identity id
    pub identity_param: String,
    /// Query parameter carrying the license token
    pub license_param: String,
    /// Skip TLS certificate verification (insecure, dev only)
    pub insecure: bool,
    /// Upper bound for one connection attempt
    pub connect_timeout_secs: u64,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            url: default_endpoint_url(),
            // Deployed endpoint's name for the identity-id parameter
            identity_param: "awsid".to_string(),
            license_param: "license".to_string(),
            insecure: false,
            connect_timeout_secs: 15,
        }
    }
}

impl EndpointConfig {
    /// Build the transport endpoint
    pub fn endpoint(&self) -> Result<Endpoint> {
        let endpoint = Endpoint::parse(&self.url, &self.identity_param, &self.license_param)
            .with_context(|| format!("Invalid endpoint url: {}", self.url))?;
        Ok(endpoint)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

/// Attempt-loop configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    /// Fixed delay between attempts
    pub backoff_secs: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self { backoff_secs: 5 }
    }
}

impl ReconnectConfig {
    pub fn backoff(&self) -> Duration {
        Duration::from_secs(self.backoff_secs)
    }
}

/// Application protocol configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    /// Value the server answers with to acknowledge liveness
    pub ack_value: String,
    /// Value carried by outbound keepalive frames
    pub keepalive_value: String,
    /// Keepalive send interval (0 disables keepalive frames)
    pub keepalive_interval_secs: u64,
    /// Identity report resend interval
    pub identity_interval_secs: u64,
    /// Liveness window without an ack before the indicator goes stale
    pub watchdog_timeout_secs: u64,
    /// Largest reassembled inbound message
    pub max_message_bytes: usize,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            ack_value: "pong".to_string(),
            keepalive_value: "ping".to_string(),
            keepalive_interval_secs: 20,
            identity_interval_secs: 30,
            watchdog_timeout_secs: 40,
            max_message_bytes: 64 * 1024,
        }
    }
}

impl ProtocolConfig {
    pub fn keepalive_interval(&self) -> Option<Duration> {
        (self.keepalive_interval_secs > 0).then(|| Duration::from_secs(self.keepalive_interval_secs))
    }

    pub fn identity_interval(&self) -> Duration {
        Duration::from_secs(self.identity_interval_secs)
    }

    pub fn watchdog_timeout(&self) -> Duration {
        Duration::from_secs(self.watchdog_timeout_secs)
    }
}

/// Privileged action configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PowerConfig {
    /// Log shutdown requests instead of executing them
    pub dry_run: bool,
    /// Override for the platform power-off command
    pub command: Option<Vec<String>>,
}

/// Credential store location
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CredentialsConfig {
    /// Credentials file (defaults to the user config directory)
    pub path: Option<PathBuf>,
}

/// Metrics configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Enable Prometheus endpoint
    pub enabled: bool,
    /// Prometheus bind address
    pub bind_addr: SocketAddr,
    /// Status API bind address (disabled when unset)
    pub api_bind: Option<SocketAddr>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind_addr: default_metrics_addr(),
            api_bind: None,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    pub level: String,
    /// Output format: "json" or "pretty"
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

// Default value functions
fn default_endpoint_url() -> String {
    "wss://3rbp1kul8g.execute-api.eu-west-1.amazonaws.com/prod".to_string()
}

fn default_metrics_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 9090))
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        Self::from_toml(&contents)
    }

    /// Load configuration, falling back to defaults when the file is absent
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            let config = Self::default();
            config.validate()?;
            Ok(config)
        }
    }

    /// Parse and validate configuration text
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Config =
            toml::from_str(contents).with_context(|| "Failed to parse config file")?;

        config.validate()?;
        Ok(config)
    }

    /// Default config file location
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .map(|dir| dir.join("wolskill").join("config.toml"))
            .unwrap_or_else(|| PathBuf::from("config.toml"))
    }

    /// Validate configuration values
    fn validate(&self) -> Result<()> {
        let endpoint = self.endpoint.endpoint()?;
        if !endpoint.is_secure() {
            warn!(url = %self.endpoint.url, "Endpoint is not TLS-secured");
        }
        if self.endpoint.insecure {
            warn!("TLS certificate verification disabled (insecure mode)");
        }
        if self.endpoint.connect_timeout_secs == 0 {
            anyhow::bail!("endpoint.connect_timeout_secs must be > 0");
        }
        if self.reconnect.backoff_secs == 0 {
            anyhow::bail!("reconnect.backoff_secs must be > 0");
        }
        if self.protocol.identity_interval_secs == 0 {
            anyhow::bail!("protocol.identity_interval_secs must be > 0");
        }
        if self.protocol.watchdog_timeout_secs == 0 {
            anyhow::bail!("protocol.watchdog_timeout_secs must be > 0");
        }
        if self.protocol.max_message_bytes == 0 {
            anyhow::bail!("protocol.max_message_bytes must be > 0");
        }
        if self.protocol.ack_value == self.protocol.keepalive_value {
            anyhow::bail!("protocol.ack_value and protocol.keepalive_value must differ");
        }
        Ok(())
    }
}
