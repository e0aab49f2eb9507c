//! Event bus configuration.
//!
//! Settings are loaded from environment variables with defaults suitable for
//! local development.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Default pause between the first and the only retry attempt.
pub const DEFAULT_RETRY_BACKOFF_MS: u64 = 100;

/// Configuration errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// Invalid configuration value.
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue {
        /// Configuration key.
        key: String,
        /// Error message.
        message: String,
    },
}

/// Event bus configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusConfig {
    /// Backoff before the single retry in `retry_with_backoff`, in milliseconds.
    pub retry_backoff_ms: u64,

    /// Log event payloads at trace level when publishing.
    pub log_payloads: bool,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            retry_backoff_ms: DEFAULT_RETRY_BACKOFF_MS,
            log_payloads: false,
        }
    }
}

impl BusConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `EVENT_BUS_RETRY_BACKOFF_MS`: retry backoff in milliseconds (default: 100)
    /// - `EVENT_BUS_LOG_PAYLOADS`: log payloads when publishing (default: false)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let default = Self::default();

        let retry_backoff_ms = match lookup("EVENT_BUS_RETRY_BACKOFF_MS") {
            Some(raw) => raw.trim().parse().map_err(|e| ConfigError::InvalidValue {
                key: "EVENT_BUS_RETRY_BACKOFF_MS".to_string(),
                message: format!("{}: {:?}", e, raw),
            })?,
            None => default.retry_backoff_ms,
        };

        let log_payloads = match lookup("EVENT_BUS_LOG_PAYLOADS") {
            Some(raw) => parse_bool("EVENT_BUS_LOG_PAYLOADS", &raw)?,
            None => default.log_payloads,
        };

        Ok(Self {
            retry_backoff_ms,
            log_payloads,
        })
    }

    /// Retry backoff as a duration.
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

fn parse_bool(key: &str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected a boolean, got {:?}", other),
        }),
    }
}
