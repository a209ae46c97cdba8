//! Client configuration: timing, backoff and identity settings.
//!
//! All timing values are milliseconds so the TOML form stays flat:
//!
//! ```toml
//! heartbeat_interval_ms = 1000
//! heartbeat_allowed_misses = 3
//! initial_backoff_ms = 20
//! max_backoff_ms = 10000
//! subscription_timeout_ms = 1000
//! subscription_max_retries = 5
//! client_version = "1.0.0"
//! # session_id = "my-session"
//! # hostname = "override"
//! ```
//!
//! Missing keys take their defaults. Configuration is validated on load and
//! again when a [`ClientFactory`](crate::ClientFactory) is built.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use crate::backoff::Backoff;
use crate::protocol::CLIENT_PROTOCOL_VERSION;

pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 1000;
pub const DEFAULT_HEARTBEAT_ALLOWED_MISSES: u32 = 3;
pub const DEFAULT_INITIAL_BACKOFF_MS: u64 = 20;
pub const DEFAULT_MAX_BACKOFF_MS: u64 = 10_000;
pub const DEFAULT_SUBSCRIPTION_TIMEOUT_MS: u64 = 1000;
pub const DEFAULT_SUBSCRIPTION_MAX_RETRIES: u32 = 5;

/// Errors while loading or validating a configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// IO error while reading a configuration file.
    #[error("IO error while reading configuration: {0}")]
    Io(#[from] std::io::Error),

    /// The TOML text could not be parsed.
    #[error("Parse error while reading configuration: {0}")]
    Parse(String),

    /// Parsed values violate a constraint.
    #[error("Validation error: {0}")]
    Validation(String),
}

impl From<validator::ValidationErrors> for ConfigError {
    fn from(errors: validator::ValidationErrors) -> Self {
        ConfigError::Validation(errors.to_string())
    }
}

/// Settings shared by every connection a factory creates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(default)]
#[validate(schema(function = "validate_backoff_bounds"))]
pub struct ClientConfig {
    /// Interval between client heartbeats.
    #[validate(range(min = 1))]
    pub heartbeat_interval_ms: u64,

    /// Heartbeat intervals without server traffic before the connection is reset.
    #[validate(range(min = 1))]
    pub heartbeat_allowed_misses: u32,

    /// Backoff floor for reconnects and resubscriptions.
    #[validate(range(min = 1))]
    pub initial_backoff_ms: u64,

    /// Backoff cap.
    #[validate(range(min = 1))]
    pub max_backoff_ms: u64,

    /// Time a SUBSCRIBE may stay unacknowledged before it is resent.
    #[validate(range(min = 1))]
    pub subscription_timeout_ms: u64,

    /// Retries after a SUBSCRIBE_EXCEPTION before the subscription is dropped.
    pub subscription_max_retries: u32,

    /// Protocol version sent with CLIENT_CONNECT.
    #[validate(length(min = 1))]
    pub client_version: String,

    /// Session id put in request headers; defaults to the connection identity.
    pub session_id: Option<String>,

    /// Hostname used in the connection identity; defaults to the system hostname.
    pub hostname: Option<String>,
}

fn validate_backoff_bounds(config: &ClientConfig) -> Result<(), ValidationError> {
    if config.initial_backoff_ms > config.max_backoff_ms {
        let mut err = ValidationError::new("invalid_backoff_bounds");
        err.message = Some(
            format!(
                "initial_backoff_ms ({}) exceeds max_backoff_ms ({})",
                config.initial_backoff_ms, config.max_backoff_ms
            )
            .into(),
        );
        return Err(err);
    }
    Ok(())
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: DEFAULT_HEARTBEAT_INTERVAL_MS,
            heartbeat_allowed_misses: DEFAULT_HEARTBEAT_ALLOWED_MISSES,
            initial_backoff_ms: DEFAULT_INITIAL_BACKOFF_MS,
            max_backoff_ms: DEFAULT_MAX_BACKOFF_MS,
            subscription_timeout_ms: DEFAULT_SUBSCRIPTION_TIMEOUT_MS,
            subscription_max_retries: DEFAULT_SUBSCRIPTION_MAX_RETRIES,
            client_version: CLIENT_PROTOCOL_VERSION.to_string(),
            session_id: None,
            hostname: None,
        }
    }
}

impl ClientConfig {
    /// Parse and validate TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: ClientConfig =
            toml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&text)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    /// Silence after which the server is considered gone.
    pub fn heartbeat_timeout(&self) -> Duration {
        self.heartbeat_interval() * self.heartbeat_allowed_misses
    }

    pub fn subscription_timeout(&self) -> Duration {
        Duration::from_millis(self.subscription_timeout_ms)
    }

    /// Fresh backoff with this configuration's floor and cap.
    pub fn backoff(&self) -> Backoff {
        Backoff::new(
            Duration::from_millis(self.initial_backoff_ms),
            Duration::from_millis(self.max_backoff_ms),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.heartbeat_interval(), Duration::from_secs(1));
        assert_eq!(config.heartbeat_timeout(), Duration::from_secs(3));
        assert_eq!(config.backoff().current(), Duration::from_millis(20));
        assert_eq!(config.backoff().max(), Duration::from_millis(10_000));
        assert_eq!(config.client_version, "1.0.0");
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = ClientConfig::from_toml_str("heartbeat_interval_ms = 250\n").unwrap();
        assert_eq!(config.heartbeat_interval_ms, 250);
        assert_eq!(config.heartbeat_allowed_misses, 3);
        assert_eq!(config.subscription_max_retries, 5);
        assert!(config.session_id.is_none());
    }

    #[test]
    fn test_invalid_toml() {
        let err = ClientConfig::from_toml_str("heartbeat_interval_ms = \"fast\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_zero_interval_rejected() {
        let err = ClientConfig::from_toml_str("heartbeat_interval_ms = 0").unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn test_backoff_bounds_rejected() {
        let text = "initial_backoff_ms = 500\nmax_backoff_ms = 100\n";
        let err = ClientConfig::from_toml_str(text).unwrap_err();
        match err {
            ConfigError::Validation(msg) => assert!(msg.contains("backoff")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "session_id = \"test-session\"").unwrap();
        writeln!(file, "hostname = \"node1\"").unwrap();

        let config = ClientConfig::load_from_file(file.path()).unwrap();
        assert_eq!(config.session_id.as_deref(), Some("test-session"));
        assert_eq!(config.hostname.as_deref(), Some("node1"));
    }

    #[test]
    fn test_missing_file() {
        let err = ClientConfig::load_from_file("/nonexistent/cmwlight.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
