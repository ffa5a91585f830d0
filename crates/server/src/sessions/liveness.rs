//! Server-wide liveness probe.
//!
//! One interval for all connections.  A connection that has not answered
//! the previous ping by the next tick is terminated, which the transport
//! loop reports as an abnormal closure.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tether_protocol::Connection;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub struct LivenessMonitor {
    connections: RwLock<HashMap<u64, Connection>>,
    interval: Duration,
}

/// Outcome of one sweep.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Sweep {
    pub probed: usize,
    pub terminated: usize,
}

impl LivenessMonitor {
    pub fn new(interval: Duration) -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            interval,
        }
    }

    pub fn track(&self, conn: &Connection) {
        conn.mark_alive();
        self.connections.write().insert(conn.id(), conn.clone());
    }

    pub fn untrack(&self, conn_id: u64) {
        self.connections.write().remove(&conn_id);
    }

    pub fn tracked(&self) -> usize {
        self.connections.read().len()
    }

    /// Terminate connections that missed the last probe, then probe the rest.
    pub fn sweep(&self) -> Sweep {
        let mut sweep = Sweep::default();
        self.connections.write().retain(|id, conn| {
            if conn.is_closed() {
                return false;
            }
            if !conn.is_alive() {
                tracing::info!(conn = *id, "no pong since last probe, terminating");
                conn.terminate();
                sweep.terminated += 1;
                return false;
            }
            conn.clear_alive();
            if !conn.ping() {
                tracing::debug!(conn = *id, "probe not queued");
            }
            sweep.probed += 1;
            true
        });
        sweep
    }

    /// Run [`sweep`](Self::sweep) every interval until `shutdown` fires.
    pub fn spawn(self: &Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let monitor = Arc::clone(self);
        tokio::spawn(async move {
            let period = monitor.interval;
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let sweep = monitor.sweep();
                        if sweep.terminated > 0 {
                            tracing::debug!(
                                probed = sweep.probed,
                                terminated = sweep.terminated,
                                "liveness sweep"
                            );
                        }
                    }
                    _ = shutdown.cancelled() => {
                        tracing::debug!("liveness monitor stopped");
                        break;
                    }
                }
            }
        })
    }
}
