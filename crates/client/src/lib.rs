//! `tether-client`: client side of the tether session protocol.
//!
//! A [`SessionClient`] runs one request per session:
//!
//! 1. Connect to the server's `/ws` endpoint.
//! 2. Wait for `NEW_SESSION`, then send the `REQUEST` with acknowledged
//!    delivery.
//! 3. Acknowledge everything the server asks for, answer server-initiated
//!    `REQUEST`s through [`ClientHandlers`], forward `INFO` payloads to the
//!    progress channel.
//! 4. On an abnormal drop, reconnect carrying the session id as the
//!    WebSocket sub-protocol and expect `RECOVERED_SESSION`.  In-flight
//!    sends resume on the new connection.
//! 5. When the server closes normally, return the `RESPONSE` it sent.
//!
//! ```rust,no_run
//! # async fn demo() -> Result<(), tether_client::ClientError> {
//! let client = tether_client::SessionClientBuilder::new()
//!     .url("ws://localhost:3000/ws")
//!     .build()?;
//! let echoed = client.request("ECHO", serde_json::json!({"hello": "world"})).await?;
//! # let _ = echoed;
//! # Ok(())
//! # }
//! ```

pub mod builder;
pub mod client;
pub mod handlers;
pub mod link;
pub mod reconnect;
pub mod types;

// ── Re-exports for ergonomic imports ─────────────────────────────────

pub use builder::SessionClientBuilder;
pub use client::SessionClient;
pub use handlers::{ClientHandler, ClientHandlers};
pub use reconnect::ReconnectPolicy;
pub use types::{ClientError, HandlerFailure, HandlerResult};

pub use tether_protocol::{AckPolicy, Envelope, MessageType};
