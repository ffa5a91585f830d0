//! Builder pattern for constructing a [`SessionClient`].

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tether_domain::config::ClientConfig;
use tether_protocol::AckPolicy;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::client::SessionClient;
use crate::handlers::ClientHandlers;
use crate::reconnect::ReconnectPolicy;
use crate::types::ClientError;

/// Fluent builder for [`SessionClient`].
///
/// # Example
///
/// ```rust,no_run
/// # use tether_client::SessionClientBuilder;
/// let client = SessionClientBuilder::new()
///     .url("ws://localhost:8080/ws")
///     .reconnect_delay(std::time::Duration::from_secs(6))
///     .server_grace_period(std::time::Duration::from_secs(60))
///     .build()
///     .unwrap();
/// ```
pub struct SessionClientBuilder {
    pub(crate) url: String,
    pub(crate) reconnect_delay: Duration,
    pub(crate) server_heartbeat_interval: Duration,
    pub(crate) server_grace_period: Duration,
    pub(crate) max_reconnect_attempts: Option<u32>,
    pub(crate) ack_policy: AckPolicy,
    pub(crate) handlers: ClientHandlers,
    pub(crate) progress: Option<mpsc::Sender<Value>>,
    pub(crate) shutdown: CancellationToken,
}

impl SessionClientBuilder {
    pub fn new() -> Self {
        Self::from_config(&ClientConfig::default())
    }

    /// Start from a `[client]` config section.
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            url: config.url.clone(),
            reconnect_delay: config.reconnect_delay(),
            server_heartbeat_interval: config.server_heartbeat_interval(),
            server_grace_period: Duration::from_millis(config.server_grace_period_ms),
            max_reconnect_attempts: config.max_reconnect_attempts,
            ack_policy: AckPolicy {
                response_timeout: Duration::from_millis(config.response_timeout_ms),
                initial_retry_delay: Duration::from_millis(config.retry_initial_delay_ms),
                max_retries: config.max_send_retries,
            },
            handlers: ClientHandlers::new(),
            progress: None,
            shutdown: CancellationToken::new(),
        }
    }

    // ── Endpoint ─────────────────────────────────────────────────────

    /// Server WebSocket URL (e.g. `wss://host/ws`).
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    // ── Server timings ───────────────────────────────────────────────

    /// Delay between reconnect attempts after the first (default 6s).
    pub fn reconnect_delay(mut self, d: Duration) -> Self {
        self.reconnect_delay = d;
        self
    }

    /// The server's ping interval.  The connection is considered lost when
    /// no ping arrives within one and a half intervals.
    pub fn server_heartbeat_interval(mut self, d: Duration) -> Self {
        self.server_heartbeat_interval = d;
        self
    }

    /// How long the server keeps a detached session.  Bounds the number of
    /// reconnect attempts unless set explicitly.
    pub fn server_grace_period(mut self, d: Duration) -> Self {
        self.server_grace_period = d;
        self
    }

    pub fn max_reconnect_attempts(mut self, n: u32) -> Self {
        self.max_reconnect_attempts = Some(n);
        self
    }

    pub fn ack_policy(mut self, policy: AckPolicy) -> Self {
        self.ack_policy = policy;
        self
    }

    // ── Behavior ─────────────────────────────────────────────────────

    /// Handlers for requests initiated by the server.
    pub fn handlers(mut self, handlers: ClientHandlers) -> Self {
        self.handlers = handlers;
        self
    }

    /// Receive the payload of every `INFO` the server pushes.  Payloads are
    /// dropped when the channel is full.
    pub fn progress(mut self, tx: mpsc::Sender<Value>) -> Self {
        self.progress = Some(tx);
        self
    }

    pub fn shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    /// Build the [`SessionClient`].
    pub fn build(self) -> Result<SessionClient, ClientError> {
        if !(self.url.starts_with("ws://") || self.url.starts_with("wss://")) {
            return Err(ClientError::Config(format!(
                "url must use ws:// or wss://, got {:?}",
                self.url
            )));
        }
        if self.server_heartbeat_interval.is_zero() {
            return Err(ClientError::Config(
                "server_heartbeat_interval must be > 0".into(),
            ));
        }
        if self.reconnect_delay.is_zero() && self.max_reconnect_attempts.is_none() {
            return Err(ClientError::Config(
                "reconnect_delay must be > 0 when max_reconnect_attempts is derived".into(),
            ));
        }

        let reconnect = match self.max_reconnect_attempts {
            Some(max_attempts) => ReconnectPolicy {
                delay: self.reconnect_delay,
                max_attempts,
            },
            None => {
                ReconnectPolicy::from_grace_period(self.server_grace_period, self.reconnect_delay)
            }
        };

        let hb = self.server_heartbeat_interval;
        Ok(SessionClient {
            url: self.url,
            reconnect,
            liveness_timeout: hb + hb / 2,
            ack_policy: self.ack_policy,
            handlers: Arc::new(self.handlers),
            progress: self.progress,
            shutdown: self.shutdown,
        })
    }
}

impl Default for SessionClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}
