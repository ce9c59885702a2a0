//! Configuration
//!
//! Loaded from a TOML file (default `~/.config/ocpp-exchange/config.toml`).
//! Every section and key is optional; missing values take the defaults
//! below.
//!
//! ```toml
//! [server]
//! host = "0.0.0.0"
//! port = 9000
//! shutdown_timeout = 30
//!
//! [session]
//! call_timeout_secs = 30
//! busy_policy = "queue"        # or "reject"
//! queue_capacity = 16
//! transaction_retry_attempts = 3
//! transaction_retry_interval_ms = 1000
//!
//! [logging]
//! level = "info"
//! format = "text"              # or "json"
//!
//! [metrics]
//! enabled = false
//! listen = "0.0.0.0:9100"
//! ```

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::application::session::{BusyPolicy, SessionConfig};
use crate::support::retry::RetryConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to encode config: {0}")]
    Encode(#[from] toml::ser::Error),

    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// Default location of the config file.
pub fn default_config_path() -> PathBuf {
    dirs_next::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("ocpp-exchange")
        .join("config.toml")
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub session: SessionSettings,
    pub logging: LoggingConfig,
    pub metrics: MetricsConfig,
}

impl AppConfig {
    /// Read and validate `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let text = toml::to_string_pretty(self)?;
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir).map_err(|source| ConfigError::Write {
                path: dir.to_path_buf(),
                source,
            })?;
        }
        std::fs::write(path, text).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.session.call_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                key: "session.call_timeout_secs",
                reason: "must be greater than zero".into(),
            });
        }
        if self.session.busy_policy == BusyPolicy::Queue && self.session.queue_capacity == 0 {
            return Err(ConfigError::Invalid {
                key: "session.queue_capacity",
                reason: "must be greater than zero when busy_policy = \"queue\"".into(),
            });
        }
        if self.metrics.enabled {
            self.metrics.listen_addr()?;
        }
        Ok(())
    }
}

// ── [server] ───────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Seconds to wait for connections to drain on shutdown.
    pub shutdown_timeout: u64,
}

impl ServerConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 9000,
            shutdown_timeout: 30,
        }
    }
}

// ── [session] ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    pub call_timeout_secs: u64,
    pub busy_policy: BusyPolicy,
    pub queue_capacity: usize,
    pub transaction_retry_attempts: u32,
    pub transaction_retry_interval_ms: u64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            call_timeout_secs: 30,
            busy_policy: BusyPolicy::Queue,
            queue_capacity: 16,
            transaction_retry_attempts: 3,
            transaction_retry_interval_ms: 1000,
        }
    }
}

impl From<&SessionSettings> for SessionConfig {
    fn from(settings: &SessionSettings) -> Self {
        Self {
            call_timeout: Duration::from_secs(settings.call_timeout_secs),
            busy_policy: settings.busy_policy,
            queue_capacity: settings.queue_capacity,
            transaction_retry: RetryConfig {
                max_attempts: settings.transaction_retry_attempts,
                initial_delay: Duration::from_millis(settings.transaction_retry_interval_ms),
                ..RetryConfig::default()
            },
        }
    }
}

// ── [logging] ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive; `RUST_LOG` takes precedence.
    pub level: String,
    /// `text` or `json`.
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}

// ── [metrics] ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    /// Address of the Prometheus scrape endpoint.
    pub listen: String,
}

impl MetricsConfig {
    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.listen.parse().map_err(|e| ConfigError::Invalid {
            key: "metrics.listen",
            reason: format!("{}", e),
        })
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen: "0.0.0.0:9100".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let config = AppConfig::from_toml("").unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.server.address(), "0.0.0.0:9000");
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = AppConfig::from_toml(
            r#"
            [session]
            busy_policy = "reject"
            call_timeout_secs = 5

            [logging]
            format = "json"
            "#,
        )
        .unwrap();

        assert_eq!(config.session.busy_policy, BusyPolicy::Reject);
        assert_eq!(config.session.queue_capacity, 16);
        assert_eq!(config.logging.format, "json");
        assert_eq!(config.logging.level, "info");

        let session = SessionConfig::from(&config.session);
        assert_eq!(session.call_timeout, Duration::from_secs(5));
        assert_eq!(session.transaction_retry.max_attempts, 3);
        assert_eq!(
            session.transaction_retry.initial_delay,
            Duration::from_millis(1000)
        );
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let err = AppConfig::from_toml("[session]\ncall_timeout_secs = 0").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                key: "session.call_timeout_secs",
                ..
            }
        ));
    }

    #[test]
    fn unknown_busy_policy_is_a_parse_error() {
        let err = AppConfig::from_toml("[session]\nbusy_policy = \"drop\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn bad_metrics_address_is_rejected_when_enabled() {
        let err = AppConfig::from_toml("[metrics]\nenabled = true\nlisten = \"nowhere\"")
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "metrics.listen", .. }));
    }

    #[test]
    fn missing_file_gives_defaults() {
        let path = std::env::temp_dir().join("ocpp-exchange-does-not-exist.toml");
        assert_eq!(AppConfig::load(&path).unwrap(), AppConfig::default());
    }

    #[test]
    fn default_path_ends_in_crate_dir() {
        assert!(default_config_path().ends_with("ocpp-exchange/config.toml"));
    }
}
