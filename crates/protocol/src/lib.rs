//! Session protocol: envelope types, the binary codec, the per-connection
//! handle and the acknowledgment engine shared by server and client.
//!
//! # Exchange
//!
//! ```text
//! client                                   server
//!   │ ── WS upgrade (Sec-WebSocket-Protocol: <sid>?) ──▶ │
//!   │ ◀── NEW_SESSION{sid, ack:0} | RECOVERED_SESSION ── │
//!   │ ── REQUEST{target, payload, ack:n} ──────────────▶ │  dispatched once
//!   │ ◀── ACK{n} ─────────────────────────────────────── │
//!   │ ◀── INFO / REQUEST (optional, acknowledged) ────── │
//!   │ ◀── RESPONSE{target, success, result|error, ack:m} │
//!   │ ── ACK{m} ───────────────────────────────────────▶ │
//!   │ ◀───────────── close 1000 ──────────────────────── │  session destroyed
//! ```
//!
//! Any envelope that carries an `ack` and is not itself an `ACK` is answered
//! with `ACK{ack}` by the receiving side.  Liveness is checked with
//! transport-level ping/pong frames, never with envelopes.

pub mod ack;
pub mod codec;
pub mod connection;
pub mod envelope;

pub use ack::{AckPolicy, LinkResolver, SendError};
pub use codec::{decode, encode, CodecError};
pub use connection::{Connection, Outbound};
pub use envelope::{Envelope, MessageType};

/// Close code meaning "intentional, final, do not attempt recovery".
pub const NORMAL_CLOSURE: u16 = 1000;

/// Close code sent by the server when it stops.  Not a normal closure: the
/// client is free to try recovering elsewhere.
pub const GOING_AWAY: u16 = 1001;

/// Close code used when a connection claims a session that already has a
/// live connection bound.
pub const POLICY_VIOLATION: u16 = 1008;

/// Close code recorded when a connection dies without a close frame.
pub const ABNORMAL_CLOSURE: u16 = 1006;

/// Close code recorded when the peer sent a close frame without a status.
pub const NO_STATUS_RECEIVED: u16 = 1005;

/// Handshake header carrying a previously issued session id.
pub const SESSION_HEADER: &str = "sec-websocket-protocol";

/// Whether a close code ends the session for good.
pub fn is_normal_closure(code: u16) -> bool {
    code == NORMAL_CLOSURE
}
