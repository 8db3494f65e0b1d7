// SPDX-License-Identifier: Apache-2.0 OR MIT
//! Configuration file types and parsing for ringlogd.
//!
//! JSON5 configuration format (comments and trailing commas allowed) with
//! CLI overrides layered on top. Everything has a default, so the server
//! runs with no config file at all.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::logging::Severity;

/// Default TCP listening port.
pub const DEFAULT_PORT: u16 = 9000;
/// Default ring capacity in entries.
pub const DEFAULT_CAPACITY: usize = 10;
/// Default seconds between timestamp entries.
pub const DEFAULT_TIMESTAMP_PERIOD_SECS: u64 = 10;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    IoError(PathBuf, String),

    #[error("failed to parse config: {0}")]
    ParseError(String),

    #[error("ring capacity must be positive")]
    InvalidCapacity,

    #[error("timestamp period must be positive")]
    InvalidTimestampPeriod,
}

/// Startup configuration (JSON5 file format)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// TCP port to listen on. 0 lets the OS pick (used by tests).
    pub port: u16,

    /// Ring log capacity in entries (in-process variant).
    pub capacity: usize,

    /// Seconds between timestamp entries (in-process variant).
    pub timestamp_period_secs: u64,

    /// Path to an external log device. When set, the in-process ring log and
    /// the timestamp task are replaced by the device.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device: Option<PathBuf>,

    /// Minimum severity to emit.
    pub log_level: Severity,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            capacity: DEFAULT_CAPACITY,
            timestamp_period_secs: DEFAULT_TIMESTAMP_PERIOD_SECS,
            device: None,
            log_level: Severity::Notice,
        }
    }
}

impl Config {
    /// Load configuration from a JSON5 file
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(path.to_path_buf(), e.to_string()))?;
        Self::parse(&content)
    }

    /// Parse configuration from a JSON5 string
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Self =
            json5::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.capacity == 0 {
            return Err(ConfigError::InvalidCapacity);
        }
        if self.timestamp_period_secs == 0 {
            return Err(ConfigError::InvalidTimestampPeriod);
        }
        Ok(())
    }

    pub fn timestamp_period(&self) -> Duration {
        Duration::from_secs(self.timestamp_period_secs)
    }
}
