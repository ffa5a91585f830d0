//! The client's current connection, shared with in-flight sends.

use parking_lot::RwLock;
use tether_protocol::{Connection, LinkResolver, SendError};

/// Slot holding the connection of the current session, if any.
///
/// Sends resolve through it on every attempt, so a send started on one
/// connection is retried on the connection that recovers the session.
#[derive(Default)]
pub struct ClientLink {
    current: RwLock<Option<Connection>>,
}

impl ClientLink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(&self, conn: &Connection) {
        *self.current.write() = Some(conn.clone());
    }

    /// Clear the slot if it still holds connection `conn_id`.
    pub fn unbind(&self, conn_id: u64) {
        let mut current = self.current.write();
        if current.as_ref().map(Connection::id) == Some(conn_id) {
            *current = None;
        }
    }
}

impl LinkResolver for ClientLink {
    fn resolve(&self) -> Result<Connection, SendError> {
        match self.current.read().as_ref() {
            Some(conn) if !conn.is_closed() => Ok(conn.clone()),
            _ => Err(SendError::NotConnected),
        }
    }
}
