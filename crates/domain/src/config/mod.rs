mod client;
mod observability;
mod server;
mod session;

pub use client::*;
pub use observability::*;
pub use server::*;
pub use session::*;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Config {
    /// Read a TOML config file.  A missing file is not an error: every
    /// field has a default, so the defaults are returned instead.
    pub fn load_from(path: impl AsRef<Path>) -> crate::Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&raw)?)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigError {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl ConfigError {
    fn error(field: &str, message: impl Into<String>) -> Self {
        Self {
            severity: ConfigSeverity::Error,
            field: field.into(),
            message: message.into(),
        }
    }

    fn warning(field: &str, message: impl Into<String>) -> Self {
        Self {
            severity: ConfigSeverity::Warning,
            field: field.into(),
            message: message.into(),
        }
    }
}

impl Config {
    /// Validate the configuration and return a list of issues.
    ///
    /// Returns an empty vec when everything looks good.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        // Server port must be non-zero.
        if self.server.port == 0 {
            errors.push(ConfigError::error(
                "server.port",
                "port must be greater than 0",
            ));
        }

        // Server host must not be empty.
        if self.server.host.is_empty() {
            errors.push(ConfigError::error("server.host", "host must not be empty"));
        }

        if self.server.max_message_bytes == 0 {
            errors.push(ConfigError::error(
                "server.max_message_bytes",
                "max_message_bytes must be greater than 0",
            ));
        }

        // Every session timer must be armed with a positive duration.
        let timers = [
            ("session.heartbeat_interval_ms", self.session.heartbeat_interval_ms),
            ("session.grace_period_ms", self.session.grace_period_ms),
            ("session.response_timeout_ms", self.session.response_timeout_ms),
            ("session.retry_initial_delay_ms", self.session.retry_initial_delay_ms),
            ("session.idle_timeout_ms", self.session.idle_timeout_ms),
        ];
        for (field, value) in timers {
            if value == 0 {
                errors.push(ConfigError::error(field, "must be greater than 0"));
            }
        }

        if self.session.heartbeat_interval_ms >= self.session.grace_period_ms {
            errors.push(ConfigError::warning(
                "session.heartbeat_interval_ms",
                "heartbeat interval is not shorter than the grace period; \
                 dead connections may outlive their session",
            ));
        }

        // Client URL must be a WebSocket URL.
        if !(self.client.url.starts_with("ws://") || self.client.url.starts_with("wss://")) {
            errors.push(ConfigError::error(
                "client.url",
                format!("expected a ws:// or wss:// URL, got {:?}", self.client.url),
            ));
        }

        if self.client.reconnect_delay_ms == 0 {
            errors.push(ConfigError::error(
                "client.reconnect_delay_ms",
                "must be greater than 0",
            ));
        } else if self.client.effective_max_reconnect_attempts() == 0 {
            errors.push(ConfigError::warning(
                "client.max_reconnect_attempts",
                "reconnection is disabled (grace period shorter than reconnect delay)",
            ));
        }

        if !(0.0..=1.0).contains(&self.observability.sample_rate) {
            errors.push(ConfigError::error(
                "observability.sample_rate",
                "sample_rate must be between 0.0 and 1.0",
            ));
        }

        errors
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
