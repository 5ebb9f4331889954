//! Configuration management for the service registry.
//!
//! This module provides a configuration system that supports:
//! - Loading from YAML files
//! - Environment variable overrides through the `config` crate
//! - Validation of all settings

use crate::error::{ConfigError, RegistryError, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Prefix for environment variable overrides (`SVCREG__REGISTRY__SERVERS=...`).
pub const ENV_PREFIX: &str = "SVCREG";

/// Main application configuration.
///
/// # Examples
///
/// ```no_run
/// use svcreg_core::config::AppConfig;
///
/// let config = AppConfig::from_file("svcreg.yaml").unwrap();
/// config.validate().unwrap();
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Registry client settings
    #[serde(default)]
    pub registry: RegistryConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Metrics configuration
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl AppConfig {
    /// Loads configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::LoadFailed {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        Self::from_yaml(&contents)
    }

    /// Loads configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(|e| {
            ConfigError::InvalidFormat {
                reason: e.to_string(),
            }
            .into()
        })
    }

    /// Loads configuration using the `config` crate: the optional file first,
    /// then `SVCREG__`-prefixed environment variables on top.
    pub fn from_config_builder(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let config = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| ConfigError::LoadFailed {
                path: path
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "<environment>".to_string()),
                reason: e.to_string(),
            })?;

        config.try_deserialize().map_err(|e| {
            ConfigError::InvalidFormat {
                reason: e.to_string(),
            }
            .into()
        })
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<()> {
        self.registry.validate()?;
        self.metrics.validate()?;
        Ok(())
    }
}

/// Settings for one registry client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Comma-separated coordination servers (`host:port,host:port`)
    #[serde(default = "default_servers")]
    pub servers: String,

    /// Dial and wait-for-first-event timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Requested session timeout in seconds
    #[serde(default = "default_session_timeout")]
    pub session_timeout_secs: u64,

    /// ACL applied to every node the client creates
    #[serde(default)]
    pub acl: AclPolicy,

    /// Reconnect backoff
    #[serde(default)]
    pub reconnect: ReconnectConfig,
}

fn default_servers() -> String {
    "localhost:2181".to_string()
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_session_timeout() -> u64 {
    10
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            servers: default_servers(),
            connect_timeout_secs: default_connect_timeout(),
            session_timeout_secs: default_session_timeout(),
            acl: AclPolicy::default(),
            reconnect: ReconnectConfig::default(),
        }
    }
}

impl RegistryConfig {
    /// Creates a config for the given server list with default settings.
    pub fn new(servers: impl Into<String>) -> Self {
        Self {
            servers: servers.into(),
            ..Default::default()
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.session_timeout_secs)
    }

    /// Validates the registry settings.
    pub fn validate(&self) -> Result<()> {
        if self.servers.split(',').all(|s| s.trim().is_empty()) {
            return Err(invalid("registry.servers", "at least one server is required"));
        }

        if self.connect_timeout_secs == 0 {
            return Err(invalid("registry.connect_timeout_secs", "cannot be 0"));
        }

        if self.session_timeout_secs == 0 {
            return Err(invalid("registry.session_timeout_secs", "cannot be 0"));
        }

        self.reconnect.validate()
    }
}

/// Bounded exponential backoff between reconnect attempts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectConfig {
    /// Delay before the second attempt, in milliseconds
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    /// Upper bound on the delay, in milliseconds
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,

    /// Growth factor per failed attempt
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

fn default_initial_backoff() -> u64 {
    100
}

fn default_max_backoff() -> u64 {
    30_000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

impl ReconnectConfig {
    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.initial_backoff_ms == 0 {
            return Err(invalid("registry.reconnect.initial_backoff_ms", "cannot be 0"));
        }

        if self.initial_backoff_ms > self.max_backoff_ms {
            return Err(invalid(
                "registry.reconnect.max_backoff_ms",
                "must not be smaller than initial_backoff_ms",
            ));
        }

        if !(self.backoff_multiplier >= 1.0) {
            return Err(invalid(
                "registry.reconnect.backoff_multiplier",
                "must be at least 1.0",
            ));
        }

        Ok(())
    }
}

/// Access policy for nodes created by the registry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AclPolicy {
    /// Anyone may do anything
    #[default]
    Open,
    /// Only the authenticated creator has access
    CreatorAll,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level used when `RUST_LOG` is not set
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: "text" or "json"
    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable text
    #[default]
    Text,
    /// One JSON object per line
    Json,
}

/// Prometheus exporter configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Whether to expose metrics
    #[serde(default)]
    pub enabled: bool,

    /// Listen address of the exporter
    #[serde(default)]
    pub bind_addr: Option<SocketAddr>,
}

impl MetricsConfig {
    pub fn validate(&self) -> Result<()> {
        if self.enabled && self.bind_addr.is_none() {
            return Err(invalid(
                "metrics.bind_addr",
                "required when metrics are enabled",
            ));
        }
        Ok(())
    }
}

fn invalid(field: &str, reason: &str) -> RegistryError {
    ConfigError::invalid_value(field, reason).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.registry.servers, "localhost:2181");
        assert_eq!(config.registry.connect_timeout(), Duration::from_secs(10));
        assert_eq!(config.registry.acl, AclPolicy::Open);
        assert_eq!(config.logging.format, LogFormat::Text);
        assert!(!config.metrics.enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_from_yaml() {
        let yaml = r#"
registry:
  servers: zk1:2181,zk2:2181
  session_timeout_secs: 30
  acl: creator_all
  reconnect:
    initial_backoff_ms: 250
    max_backoff_ms: 5000

logging:
  level: debug
  format: json
"#;

        let config = AppConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.registry.servers, "zk1:2181,zk2:2181");
        assert_eq!(config.registry.session_timeout(), Duration::from_secs(30));
        assert_eq!(config.registry.connect_timeout_secs, 10);
        assert_eq!(config.registry.acl, AclPolicy::CreatorAll);
        assert_eq!(
            config.registry.reconnect.initial_backoff(),
            Duration::from_millis(250)
        );
        assert_eq!(config.registry.reconnect.backoff_multiplier, 2.0);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, LogFormat::Json);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_yaml() {
        assert!(AppConfig::from_yaml("registry: [").is_err());
    }

    #[test]
    fn test_validation_rejects_empty_servers() {
        let config = RegistryConfig::new(" , ");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_zero_timeouts() {
        let mut config = RegistryConfig::default();
        config.connect_timeout_secs = 0;
        assert!(config.validate().is_err());

        let mut config = RegistryConfig::default();
        config.session_timeout_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_bad_backoff() {
        let mut config = ReconnectConfig::default();
        config.backoff_multiplier = 0.5;
        assert!(config.validate().is_err());

        let mut config = ReconnectConfig::default();
        config.initial_backoff_ms = 60_000;
        assert!(config.validate().is_err());

        let mut config = ReconnectConfig::default();
        config.initial_backoff_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_metrics_requires_bind_addr() {
        let mut config = AppConfig::default();
        config.metrics.enabled = true;
        assert!(config.validate().is_err());

        config.metrics.bind_addr = Some("127.0.0.1:9100".parse().unwrap());
        assert!(config.validate().is_ok());
    }
}
