//! Session server: accepts WebSocket connections, binds each to a
//! recoverable session and routes the first request of every new session
//! to a registered handler.

pub mod api;
pub mod bootstrap;
pub mod cli;
pub mod handlers;
pub mod sessions;
pub mod state;
