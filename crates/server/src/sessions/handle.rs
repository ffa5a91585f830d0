//! Session-addressed send target.

use std::sync::Arc;

use tether_protocol::{Connection, LinkResolver, SendError};

use super::registry::SessionRegistry;

/// Addresses a session rather than a connection, so every send attempt
/// picks up whichever connection the session is bound to at that moment.
#[derive(Clone)]
pub struct SessionHandle {
    sid: String,
    registry: Arc<SessionRegistry>,
}

impl SessionHandle {
    pub fn new(sid: impl Into<String>, registry: Arc<SessionRegistry>) -> Self {
        Self {
            sid: sid.into(),
            registry,
        }
    }

    pub fn sid(&self) -> &str {
        &self.sid
    }
}

impl LinkResolver for SessionHandle {
    fn resolve(&self) -> Result<Connection, SendError> {
        self.registry.lookup(&self.sid)
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle").field("sid", &self.sid).finish()
    }
}
