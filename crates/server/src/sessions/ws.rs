//! WebSocket endpoint for session connections.
//!
//! Flow:
//! 1. Client connects to `/ws`, optionally carrying a session id as its
//!    requested sub-protocol (`Sec-WebSocket-Protocol: <sid>`).
//! 2. The registry creates, recovers or rejects the session; the server
//!    confirms with `NEW_SESSION` or `RECOVERED_SESSION`.
//! 3. Bidirectional loop: binary frames carry envelopes, every envelope
//!    that asks for it is acknowledged, and new sessions route their first
//!    request through a [`Dispatcher`].

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use tether_protocol::{
    codec, Connection, Envelope, Outbound, ABNORMAL_CLOSURE, NO_STATUS_RECEIVED, POLICY_VIOLATION,
    SESSION_HEADER,
};

use super::dispatch::Dispatcher;
use super::registry::ConnectOutcome;
use crate::state::AppState;

/// First nonce the server uses on a connection.  `0` is reserved for the
/// session confirmation.
const FIRST_SERVER_NONCE: u64 = 1;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Handler
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// GET /ws — upgrade to WebSocket.
///
/// A carried session id is echoed back as the selected sub-protocol so
/// standards-compliant clients accept the handshake.
pub async fn session_ws(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let carried = carried_session_id(&headers);
    let ws = ws.max_message_size(state.config.server.max_message_bytes);
    let ws = match &carried {
        Some(sid) => ws.protocols([sid.clone()]),
        None => ws,
    };
    let span = tracing::info_span!("connection", carried = ?carried);
    ws.on_upgrade(move |socket| {
        tracing::Instrument::instrument(handle_socket(socket, state, carried), span)
    })
}

/// First entry of the sub-protocol header, if any.
fn carried_session_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_owned)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Socket handler
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn handle_socket(socket: WebSocket, state: AppState, carried: Option<String>) {
    let (mut ws_sink, mut ws_stream) = socket.split();
    let (conn, mut outbound_rx) = Connection::new(FIRST_SERVER_NONCE);

    // 1. Bind the connection to a session.
    let outcome = state.sessions.on_connect(carried.as_deref(), &conn);
    let confirmation = match &outcome {
        ConnectOutcome::New(sid) => Envelope::new_session(sid.as_str()),
        ConnectOutcome::Recovered(sid) => Envelope::recovered_session(sid.as_str()),
        ConnectOutcome::Rejected(sid) => {
            tracing::warn!(sid = %sid, "rejecting duplicate connection");
            let _ = ws_sink
                .send(Message::Close(Some(CloseFrame {
                    code: POLICY_VIOLATION,
                    reason: "session already connected".into(),
                })))
                .await;
            return;
        }
    };
    let sid = outcome.sid().to_owned();

    // 2. Confirm.  Queued before the writer starts, so it goes out first.
    if let Err(e) = conn.send(&confirmation).await {
        tracing::warn!(sid = %sid, error = %e, "failed to queue session confirmation");
    }
    state.liveness.track(&conn);

    // 3. Writer task: drains the connection's outbound queue into the socket.
    let writer_conn = conn.clone();
    let writer = tokio::spawn(async move {
        loop {
            let item = tokio::select! {
                biased;
                item = outbound_rx.recv() => item,
                _ = writer_conn.closed() => None,
            };
            let Some(item) = item else { break };
            let (msg, last) = match item {
                Outbound::Frame(bytes) => (Message::Binary(bytes), false),
                Outbound::Ping => (Message::Ping(Vec::new()), false),
                Outbound::Close { code, reason } => (
                    Message::Close(Some(CloseFrame {
                        code,
                        reason: reason.into(),
                    })),
                    true,
                ),
            };
            if ws_sink.send(msg).await.is_err() || last {
                break;
            }
        }
    });

    // 4. Reader loop.
    let mut dispatcher = matches!(outcome, ConnectOutcome::New(_)).then(|| {
        Dispatcher::install(
            sid.clone(),
            state.sessions.clone(),
            state.handlers.clone(),
            state.ack_policy(),
            state.config.session.idle_timeout(),
        )
    });
    let max_decode_failures = state.config.session.max_decode_failures;
    let mut decode_failures: u32 = 0;
    let mut peer_code: Option<u16> = None;

    loop {
        let next = tokio::select! {
            next = ws_stream.next() => next,
            _ = conn.closed() => break,
        };
        let msg = match next {
            Some(Ok(msg)) => msg,
            Some(Err(e)) => {
                tracing::debug!(sid = %sid, error = %e, "websocket read error");
                break;
            }
            None => break,
        };

        match msg {
            Message::Binary(bytes) => match codec::decode(&bytes) {
                Ok(envelope) => {
                    decode_failures = 0;
                    if let Err(e) = conn.acknowledge(&envelope).await {
                        tracing::debug!(sid = %sid, error = %e, "failed to acknowledge");
                    }
                    if let Some(d) = dispatcher.as_mut() {
                        if d.offer(&envelope) {
                            dispatcher = None;
                        }
                    }
                    conn.publish(envelope);
                }
                Err(e) => {
                    decode_failures += 1;
                    tracing::warn!(
                        sid = %sid,
                        error = %e,
                        consecutive = decode_failures,
                        "dropping undecodable frame"
                    );
                    if decode_failures > max_decode_failures {
                        tracing::warn!(sid = %sid, "too many undecodable frames, terminating");
                        conn.terminate();
                    }
                }
            },
            Message::Pong(_) => conn.mark_alive(),
            Message::Close(frame) => {
                // Keep reading so the close handshake completes.
                peer_code = Some(frame.map(|f| f.code).unwrap_or(NO_STATUS_RECEIVED));
            }
            Message::Text(_) => {
                tracing::debug!(sid = %sid, "ignoring text frame");
            }
            Message::Ping(_) => {}
        }
    }

    // Cleanup: report the close to the registry, stop probing, stop writing.
    let code = conn
        .local_close_code()
        .or(peer_code)
        .unwrap_or(ABNORMAL_CLOSURE);
    conn.mark_closed();
    state.liveness.untrack(conn.id());
    state.sessions.on_disconnect(&sid, conn.id(), code);
    writer.abort();
    tracing::info!(sid = %sid, code, "connection closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn carried_id_is_first_protocol_entry() {
        let mut headers = HeaderMap::new();
        assert_eq!(carried_session_id(&headers), None);

        headers.insert(SESSION_HEADER, HeaderValue::from_static("abc"));
        assert_eq!(carried_session_id(&headers).as_deref(), Some("abc"));

        headers.insert(SESSION_HEADER, HeaderValue::from_static(" abc , v2.proto"));
        assert_eq!(carried_session_id(&headers).as_deref(), Some("abc"));

        headers.insert(SESSION_HEADER, HeaderValue::from_static(""));
        assert_eq!(carried_session_id(&headers), None);
    }
}
