//! Configuration module
//!
//! Handles loading and saving connection and logging settings from TOML files.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::connection::codec::DEFAULT_MAX_FRAME;

/// Conventional Scratch remote sensor port
pub const DEFAULT_PORT: u16 = 42001;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Remote sensor connection settings
    #[serde(default)]
    pub connection: ConnectionConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Remote sensor connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Host running Scratch
    #[serde(default = "default_host")]
    pub host: String,

    /// Remote sensor port
    #[serde(default = "default_port")]
    pub port: u16,

    /// TCP connect timeout in milliseconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,

    /// Time allowed to finish a frame once its first byte arrived (0 = unbounded)
    #[serde(default = "default_read_timeout")]
    pub read_timeout_ms: u64,

    /// Largest accepted frame payload in bytes
    #[serde(default = "default_max_frame")]
    pub max_frame_bytes: usize,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (pretty, json, compact)
    #[serde(default = "default_log_format")]
    pub format: String,
}

// Default value functions
fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_connect_timeout() -> u64 {
    1000
}

fn default_read_timeout() -> u64 {
    5000
}

fn default_max_frame() -> usize {
    DEFAULT_MAX_FRAME
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            connect_timeout_ms: default_connect_timeout(),
            read_timeout_ms: default_read_timeout(),
            max_frame_bytes: default_max_frame(),
        }
    }
}

impl ConnectionConfig {
    /// `host:port` string used for dialing and logging
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// `None` when frames may take arbitrarily long to arrive
    pub fn read_timeout(&self) -> Option<Duration> {
        (self.read_timeout_ms > 0).then(|| Duration::from_millis(self.read_timeout_ms))
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        if config.connection.max_frame_bytes == 0 {
            anyhow::bail!("connection.max_frame_bytes must be greater than zero");
        }

        Ok(config)
    }

    /// Create a default configuration
    pub fn default_config() -> Self {
        Self::default()
    }

    /// Save configuration to a TOML file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .context("Failed to serialize configuration")?;

        std::fs::write(path.as_ref(), content)
            .with_context(|| format!("Failed to write config file: {}", path.as_ref().display()))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default_config();
        assert_eq!(config.connection.addr(), "127.0.0.1:42001");
        assert_eq!(config.connection.connect_timeout(), Duration::from_secs(1));
        assert_eq!(config.connection.max_frame_bytes, 64 * 1024);
        assert_eq!(config.logging.format, "pretty");
    }

    #[test]
    fn test_parse_minimal_config() {
        let toml_content = r#"
            [connection]
            host = "scratch.local"
        "#;

        let config: Config = toml::from_str(toml_content).unwrap();
        assert_eq!(config.connection.host, "scratch.local");
        assert_eq!(config.connection.port, DEFAULT_PORT);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_sample_config_loads() {
        let path = concat!(env!("CARGO_MANIFEST_DIR"), "/../../config/scratch.toml");
        let config = Config::load(path).unwrap();
        assert_eq!(config.connection.port, DEFAULT_PORT);
        assert_eq!(config.connection.read_timeout(), Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_zero_read_timeout_means_unbounded() {
        let config = ConnectionConfig {
            read_timeout_ms: 0,
            ..ConnectionConfig::default()
        };
        assert!(config.read_timeout().is_none());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scratch.toml");

        let mut config = Config::default_config();
        config.connection.port = 42002;
        config.logging.format = "json".to_string();
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.connection.port, 42002);
        assert_eq!(loaded.logging.format, "json");
    }

    #[test]
    fn test_rejects_zero_frame_limit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[connection]\nmax_frame_bytes = 0\n").unwrap();
        assert!(Config::load(&path).is_err());
    }
}
