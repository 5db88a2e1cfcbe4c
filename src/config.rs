//! Runtime configuration.
//!
//! Rule constants (rounds, reveal rounds, allocations) are fixed in code; only
//! the operational knobs live here.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Read(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("{field}: {message}")]
    Invalid { field: &'static str, message: String },
}

/// Main configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefereeConfig {
    pub network: NetworkConfig,
    pub persistence: PersistenceConfig,
    pub logging: LoggingConfig,
}

/// Network-related configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Connection establishment timeout in milliseconds
    pub connect_timeout_ms: u64,
    /// Bounded mailbox size per connection
    pub mailbox_capacity: usize,
    /// How long a send waits for room in a full mailbox
    pub send_timeout_ms: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 10_000,
            mailbox_capacity: 64,
            send_timeout_ms: 5_000,
        }
    }
}

impl NetworkConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }
}

/// Session persistence configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    /// Quiet period before a dirty session is written
    pub debounce_ms: u64,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self { debounce_ms: 500 }
    }
}

impl PersistenceConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default `tracing` filter directive
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
        }
    }
}

impl RefereeConfig {
    /// Load configuration from a file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: RefereeConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.network.connect_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "network.connect_timeout_ms",
                message: "Connection timeout must be greater than 0".to_string(),
            });
        }
        if self.network.mailbox_capacity == 0 {
            return Err(ConfigError::Invalid {
                field: "network.mailbox_capacity",
                message: "Mailbox capacity must be greater than 0".to_string(),
            });
        }
        if self.network.send_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "network.send_timeout_ms",
                message: "Send timeout must be greater than 0".to_string(),
            });
        }
        if self.logging.filter.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "logging.filter",
                message: "Log filter must not be empty".to_string(),
            });
        }
        Ok(())
    }
}
