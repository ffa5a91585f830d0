use std::time::Duration;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Client
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Settings used by command-line clients.  The `server_*` values describe
/// what the server is expected to do; they must agree with the server's
/// `[session]` table for liveness and reconnection to behave.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// WebSocket endpoint of the server.
    #[serde(default = "d_url")]
    pub url: String,

    /// Fixed pause between two reconnection attempts (the first retry is
    /// immediate).
    #[serde(default = "d_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,

    /// Probe interval the server uses; the client gives up on a connection
    /// after 1.5x this without a probe.
    #[serde(default = "d_server_heartbeat_interval_ms")]
    pub server_heartbeat_interval_ms: u64,

    /// Grace period the server keeps a detached session around.
    #[serde(default = "d_server_grace_period_ms")]
    pub server_grace_period_ms: u64,

    /// Acknowledgment timeout for the client's own sends.
    #[serde(default = "d_response_timeout_ms")]
    pub response_timeout_ms: u64,

    /// Initial resend delay for the client's own sends.
    #[serde(default = "d_retry_initial_delay_ms")]
    pub retry_initial_delay_ms: u64,

    /// Resends after the initial attempt for the client's own sends.
    #[serde(default = "d_max_send_retries")]
    pub max_send_retries: u32,

    /// Explicit reconnection bound.  When unset it is derived from the
    /// server grace period divided by the reconnect delay.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_reconnect_attempts: Option<u32>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: d_url(),
            reconnect_delay_ms: d_reconnect_delay_ms(),
            server_heartbeat_interval_ms: d_server_heartbeat_interval_ms(),
            server_grace_period_ms: d_server_grace_period_ms(),
            response_timeout_ms: d_response_timeout_ms(),
            retry_initial_delay_ms: d_retry_initial_delay_ms(),
            max_send_retries: d_max_send_retries(),
            max_reconnect_attempts: None,
        }
    }
}

impl ClientConfig {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn server_heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.server_heartbeat_interval_ms)
    }

    /// The reconnection bound actually applied.
    pub fn effective_max_reconnect_attempts(&self) -> u32 {
        match self.max_reconnect_attempts {
            Some(n) => n,
            None if self.reconnect_delay_ms == 0 => 0,
            None => (self.server_grace_period_ms / self.reconnect_delay_ms)
                .min(u32::MAX as u64) as u32,
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_url() -> String {
    "ws://127.0.0.1:3000/ws".into()
}
fn d_reconnect_delay_ms() -> u64 {
    6_000
}
fn d_server_heartbeat_interval_ms() -> u64 {
    15_000
}
fn d_server_grace_period_ms() -> u64 {
    60_000
}
fn d_response_timeout_ms() -> u64 {
    15_000
}
fn d_retry_initial_delay_ms() -> u64 {
    5_000
}
fn d_max_send_retries() -> u32 {
    3
}
