use std::time::Duration;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session protocol (server side)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Timings of the server half of the session protocol.  All values are
/// milliseconds so they read naturally in TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Interval between two liveness probes sent to every open connection.
    #[serde(default = "d_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,

    /// How long a session survives without a connection after an abnormal
    /// close before it is destroyed.
    #[serde(default = "d_grace_period_ms")]
    pub grace_period_ms: u64,

    /// How long a single send attempt waits for its acknowledgment.
    #[serde(default = "d_response_timeout_ms")]
    pub response_timeout_ms: u64,

    /// Delay before the first resend; doubled on every further attempt.
    #[serde(default = "d_retry_initial_delay_ms")]
    pub retry_initial_delay_ms: u64,

    /// Resends after the initial attempt.
    #[serde(default = "d_max_send_retries")]
    pub max_send_retries: u32,

    /// A new session that has not issued a routable request within this
    /// window is closed normally.
    #[serde(default = "d_idle_timeout_ms")]
    pub idle_timeout_ms: u64,

    /// Consecutive undecodable frames tolerated on one connection.
    #[serde(default = "d_max_decode_failures")]
    pub max_decode_failures: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: d_heartbeat_interval_ms(),
            grace_period_ms: d_grace_period_ms(),
            response_timeout_ms: d_response_timeout_ms(),
            retry_initial_delay_ms: d_retry_initial_delay_ms(),
            max_send_retries: d_max_send_retries(),
            idle_timeout_ms: d_idle_timeout_ms(),
            max_decode_failures: d_max_decode_failures(),
        }
    }
}

impl SessionConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    pub fn retry_initial_delay(&self) -> Duration {
        Duration::from_millis(self.retry_initial_delay_ms)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_heartbeat_interval_ms() -> u64 {
    15_000
}
fn d_grace_period_ms() -> u64 {
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
fn d_idle_timeout_ms() -> u64 {
    5_000
}
fn d_max_decode_failures() -> u32 {
    8
}
