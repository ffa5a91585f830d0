use std::sync::Arc;

use tether_domain::config::{Config, SessionConfig};
use tether_protocol::AckPolicy;
use tokio_util::sync::CancellationToken;

use crate::handlers::RequestRouter;
use crate::sessions::{LivenessMonitor, SessionRegistry};

/// Shared application state passed to all HTTP and WebSocket handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,

    // ── Sessions ──────────────────────────────────────────────────────
    pub sessions: Arc<SessionRegistry>,
    pub liveness: Arc<LivenessMonitor>,

    // ── Requests ──────────────────────────────────────────────────────
    pub handlers: Arc<dyn RequestRouter>,

    /// Cancelled once when the server stops accepting connections.
    pub shutdown: CancellationToken,
}

impl AppState {
    /// Delivery policy for server-initiated sends.
    pub fn ack_policy(&self) -> AckPolicy {
        ack_policy(&self.config.session)
    }
}

pub fn ack_policy(session: &SessionConfig) -> AckPolicy {
    AckPolicy {
        response_timeout: session.response_timeout(),
        initial_retry_delay: session.retry_initial_delay(),
        max_retries: session.max_send_retries,
    }
}
