//! Worker configuration.
//!
//! Loading from files or the environment belongs to the process that hosts
//! the worker; this is the in-memory form it hands over.

use serde::{Deserialize, Serialize};
use sqlmux_core::{ConfigError, Error, Result};
use sqlmux_wire::Protocol;
use sqlmux_wire::stream::{DEFAULT_MAX_MESSAGE_SIZE, DEFAULT_READ_BUFFER_SIZE};
use std::time::Duration;

/// Per-connection worker configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Close the session after this long without a request
    pub idle_timeout: Option<Duration>,
    /// Bytes requested per read from the client socket
    pub read_buffer_size: usize,
    /// Largest accepted request message
    pub max_message_size: usize,
    /// Decoder tried first on each message
    pub first_protocol: Protocol,
    /// Override of the adapter's bind-by-name convention
    pub use_bind_names: Option<bool>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            idle_timeout: None,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            first_protocol: Protocol::Netstring,
            use_bind_names: None,
        }
    }
}

impl WorkerConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the idle timeout.
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = Some(timeout);
        self
    }

    /// Set the read buffer size.
    pub fn read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size;
        self
    }

    /// Set the maximum message size.
    pub fn max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }

    /// Set the protocol decoded first.
    pub fn first_protocol(mut self, protocol: Protocol) -> Self {
        self.first_protocol = protocol;
        self
    }

    /// Force bind arguments to be passed by name (or positionally).
    pub fn use_bind_names(mut self, enabled: bool) -> Self {
        self.use_bind_names = Some(enabled);
        self
    }

    /// Reject settings the worker cannot run with.
    pub fn validate(&self) -> Result<()> {
        let problem = if self.read_buffer_size == 0 {
            Some("read_buffer_size must be non-zero")
        } else if self.max_message_size == 0 {
            Some("max_message_size must be non-zero")
        } else if self.idle_timeout == Some(Duration::ZERO) {
            Some("idle_timeout must be non-zero when set")
        } else {
            None
        };
        match problem {
            Some(message) => Err(Error::Config(ConfigError {
                message: message.to_string(),
                source: None,
            })),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder() {
        let config = WorkerConfig::new()
            .idle_timeout(Duration::from_secs(30))
            .read_buffer_size(4096)
            .max_message_size(1 << 20)
            .first_protocol(Protocol::MySql)
            .use_bind_names(true);

        assert_eq!(config.idle_timeout, Some(Duration::from_secs(30)));
        assert_eq!(config.read_buffer_size, 4096);
        assert_eq!(config.max_message_size, 1 << 20);
        assert_eq!(config.first_protocol, Protocol::MySql);
        assert_eq!(config.use_bind_names, Some(true));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_defaults() {
        let config = WorkerConfig::default();
        assert_eq!(config.idle_timeout, None);
        assert_eq!(config.read_buffer_size, 16 * 1024);
        assert_eq!(config.max_message_size, 64 * 1024 * 1024);
        assert_eq!(config.first_protocol, Protocol::Netstring);
        assert_eq!(config.use_bind_names, None);
    }

    #[test]
    fn test_validate_rejects_zero_sizes() {
        assert!(matches!(
            WorkerConfig::new().read_buffer_size(0).validate(),
            Err(Error::Config(_))
        ));
        assert!(WorkerConfig::new().max_message_size(0).validate().is_err());
        assert!(WorkerConfig::new().idle_timeout(Duration::ZERO).validate().is_err());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: WorkerConfig =
            serde_json::from_str(r#"{"first_protocol":"MySql"}"#).expect("parse");
        assert_eq!(config.first_protocol, Protocol::MySql);
        assert_eq!(config.read_buffer_size, 16 * 1024);
    }
}
