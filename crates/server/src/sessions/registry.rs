//! In-memory registry of sessions and the connection bound to each.
//!
//! ```text
//!            on_connect(None | unknown | expired)
//!                        │
//!                        ▼
//!   ┌──────────────▶ LIVE ──── on_disconnect(1000) ───▶ destroyed
//!   │                    │
//!   │ on_connect(sid)    │ on_disconnect(other)
//!   │                    ▼
//!   └────────────── DETACHED ── grace period elapses ─▶ destroyed
//! ```
//!
//! Every mutation happens under the single write lock, so transitions for
//! one session id are serialized.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tether_protocol::{is_normal_closure, Connection, SendError, GOING_AWAY};
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Result of binding an incoming connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectOutcome {
    /// A fresh session was created.
    New(String),
    /// The carried session was detached and is now bound to this connection.
    Recovered(String),
    /// The carried session already has a live connection.
    Rejected(String),
}

impl ConnectOutcome {
    pub fn sid(&self) -> &str {
        match self {
            ConnectOutcome::New(sid)
            | ConnectOutcome::Recovered(sid)
            | ConnectOutcome::Rejected(sid) => sid,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Live,
    Detached,
}

/// Summary returned by list endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub sid: String,
    pub state: SessionState,
    pub routed: bool,
    pub created_at: DateTime<Utc>,
}

struct Session {
    connection: Option<Connection>,
    destruction: Option<DestructionTimer>,
    routed: bool,
    created_at: DateTime<Utc>,
}

struct DestructionTimer {
    deadline: Instant,
    epoch: u64,
    task: JoinHandle<()>,
}

impl Session {
    fn state(&self) -> SessionState {
        match &self.connection {
            Some(conn) if !conn.is_closed() => SessionState::Live,
            _ => SessionState::Detached,
        }
    }

    fn cancel_destruction(&mut self) {
        if let Some(timer) = self.destruction.take() {
            timer.task.abort();
        }
    }
}

/// Thread-safe registry of all sessions owned by one server instance.
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Session>>,
    grace_period: Duration,
    next_epoch: AtomicU64,
}

impl SessionRegistry {
    pub fn new(grace_period: Duration) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            grace_period,
            next_epoch: AtomicU64::new(1),
        }
    }

    /// Bind `conn` to the session named by `carried`, or to a fresh one.
    ///
    /// A carried id that is unknown, already destroyed, or whose grace period
    /// has run out yields a new session with a new id.
    pub fn on_connect(&self, carried: Option<&str>, conn: &Connection) -> ConnectOutcome {
        let mut sessions = self.sessions.write();

        if let Some(sid) = carried {
            if let Some(session) = sessions.get_mut(sid) {
                if session.state() == SessionState::Live {
                    tracing::warn!(sid = %sid, conn = conn.id(), "session already has a live connection");
                    return ConnectOutcome::Rejected(sid.to_owned());
                }

                let expired = session
                    .destruction
                    .as_ref()
                    .is_some_and(|t| t.deadline <= Instant::now());
                if !expired {
                    session.cancel_destruction();
                    session.connection = Some(conn.clone());
                    tracing::info!(sid = %sid, conn = conn.id(), "session recovered");
                    return ConnectOutcome::Recovered(sid.to_owned());
                }

                // The timer is due but has not run yet.
                if let Some(mut stale) = sessions.remove(sid) {
                    stale.cancel_destruction();
                }
                tracing::info!(sid = %sid, "session destroyed (grace period elapsed)");
            } else {
                tracing::debug!(sid = %sid, "carried session id is unknown");
            }
        }

        let sid = uuid::Uuid::new_v4().to_string();
        sessions.insert(
            sid.clone(),
            Session {
                connection: Some(conn.clone()),
                destruction: None,
                routed: false,
                created_at: Utc::now(),
            },
        );
        tracing::info!(sid = %sid, conn = conn.id(), "new session");
        ConnectOutcome::New(sid)
    }

    /// Handle the end of connection `conn_id` for `sid`.
    ///
    /// Ignored when the session has since been bound to another connection.
    /// A normal closure destroys the session; anything else detaches it and
    /// arms the destruction timer.
    pub fn on_disconnect(self: &Arc<Self>, sid: &str, conn_id: u64, code: u16) {
        let mut sessions = self.sessions.write();
        let Some(session) = sessions.get_mut(sid) else {
            tracing::debug!(sid = %sid, code, "disconnect for a session already gone");
            return;
        };

        if session.connection.as_ref().map(Connection::id) != Some(conn_id) {
            tracing::debug!(sid = %sid, conn = conn_id, "stale disconnect ignored");
            return;
        }

        if is_normal_closure(code) {
            if let Some(mut gone) = sessions.remove(sid) {
                gone.cancel_destruction();
            }
            tracing::info!(sid = %sid, code, "session destroyed (normal closure)");
            return;
        }

        session.connection = None;
        session.cancel_destruction();

        let epoch = self.next_epoch.fetch_add(1, Ordering::Relaxed);
        let deadline = Instant::now() + self.grace_period;
        let registry = Arc::clone(self);
        let owned_sid = sid.to_owned();
        let task = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            registry.expire(&owned_sid, epoch);
        });
        session.destruction = Some(DestructionTimer {
            deadline,
            epoch,
            task,
        });

        tracing::info!(
            sid = %sid,
            code,
            grace_ms = self.grace_period.as_millis() as u64,
            "session detached"
        );
    }

    fn expire(&self, sid: &str, epoch: u64) {
        let mut sessions = self.sessions.write();
        let armed = sessions
            .get(sid)
            .and_then(|s| s.destruction.as_ref())
            .is_some_and(|t| t.epoch == epoch);
        if armed {
            sessions.remove(sid);
            tracing::info!(sid = %sid, "session destroyed (grace period elapsed)");
        }
    }

    /// Connection currently bound to `sid`.
    pub fn lookup(&self, sid: &str) -> Result<Connection, SendError> {
        let sessions = self.sessions.read();
        let session = sessions.get(sid).ok_or(SendError::SessionMissing)?;
        match &session.connection {
            Some(conn) if !conn.is_closed() => Ok(conn.clone()),
            _ => Err(SendError::SessionDetached),
        }
    }

    pub fn contains(&self, sid: &str) -> bool {
        self.sessions.read().contains_key(sid)
    }

    /// Set the routed flag.  Returns `true` only for the call that set it.
    pub fn mark_routed(&self, sid: &str) -> bool {
        match self.sessions.write().get_mut(sid) {
            Some(session) if !session.routed => {
                session.routed = true;
                true
            }
            _ => false,
        }
    }

    /// Destroy `sid` now and close its connection, if any, with `code`.
    pub async fn close_session(&self, sid: &str, code: u16, reason: &str) {
        let conn = {
            let mut sessions = self.sessions.write();
            match sessions.remove(sid) {
                Some(mut session) => {
                    session.cancel_destruction();
                    session.connection
                }
                None => return,
            }
        };
        tracing::info!(sid = %sid, code, reason, "session closed");
        if let Some(conn) = conn {
            conn.close(code, reason).await;
        }
    }

    /// Like [`close_session`](Self::close_session), but only if no request
    /// has been routed for `sid`.  Returns whether the session was closed.
    pub async fn close_unrouted(&self, sid: &str, code: u16, reason: &str) -> bool {
        let conn = {
            let mut sessions = self.sessions.write();
            match sessions.get(sid) {
                Some(session) if !session.routed => {}
                _ => return false,
            }
            match sessions.remove(sid) {
                Some(mut session) => {
                    session.cancel_destruction();
                    session.connection
                }
                None => return false,
            }
        };
        tracing::info!(sid = %sid, code, reason, "session closed");
        if let Some(conn) = conn {
            conn.close(code, reason).await;
        }
        true
    }

    /// List all sessions.
    pub fn list(&self) -> Vec<SessionInfo> {
        let mut out: Vec<SessionInfo> = self
            .sessions
            .read()
            .iter()
            .map(|(sid, s)| SessionInfo {
                sid: sid.clone(),
                state: s.state(),
                routed: s.routed,
                created_at: s.created_at,
            })
            .collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        out
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    /// Drop every session, cancel pending timers and close live connections
    /// with [`GOING_AWAY`].
    pub async fn shutdown(&self) {
        let drained: Vec<(String, Session)> = self.sessions.write().drain().collect();
        let count = drained.len();
        for (sid, mut session) in drained {
            session.cancel_destruction();
            if let Some(conn) = session.connection {
                tracing::debug!(sid = %sid, "closing session on shutdown");
                conn.close(GOING_AWAY, "server shutting down").await;
            }
        }
        tracing::info!(sessions = count, "session registry shut down");
    }
}
