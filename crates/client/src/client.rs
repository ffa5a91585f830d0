//! Core session client: connects, sends one request, survives transport
//! drops by recovering its session, and returns the server's response.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tether_protocol::ack::{self, AckPolicy};
use tether_protocol::{
    codec, Connection, Envelope, MessageType, Outbound, SendError, NORMAL_CLOSURE,
    NO_STATUS_RECEIVED, SESSION_HEADER,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use crate::handlers::ClientHandlers;
use crate::link::ClientLink;
use crate::reconnect::ReconnectPolicy;
use crate::types::ClientError;

/// The server reserves nonce `0` for the session confirmation; the client
/// starts there too.
const FIRST_CLIENT_NONCE: u64 = 0;

/// How long a shutdown waits for the close frame to be written.
const CLOSE_FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

/// A fully-configured client ready to run requests.
///
/// Create via [`SessionClientBuilder`](crate::builder::SessionClientBuilder).
pub struct SessionClient {
    pub(crate) url: String,
    pub(crate) reconnect: ReconnectPolicy,
    pub(crate) liveness_timeout: Duration,
    pub(crate) ack_policy: AckPolicy,
    pub(crate) handlers: Arc<ClientHandlers>,
    pub(crate) progress: Option<mpsc::Sender<Value>>,
    pub(crate) shutdown: CancellationToken,
}

impl std::fmt::Debug for SessionClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionClient")
            .field("url", &self.url)
            .field("reconnect", &self.reconnect)
            .field("liveness_timeout", &self.liveness_timeout)
            .field("ack_policy", &self.ack_policy)
            .finish_non_exhaustive()
    }
}

/// How one connection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectionEnd {
    /// The server closed with a normal closure.  The session is over.
    Normal,
    /// Anything else.  `established` is set once the session was confirmed
    /// on this connection.
    Lost { established: bool },
}

/// State of one request that outlives individual connections.
struct RequestRun {
    target: String,
    payload: Value,
    sid: Option<String>,
    link: Arc<ClientLink>,
    sender: Option<JoinHandle<Result<(), SendError>>>,
    response: Option<Envelope>,
}

impl RequestRun {
    fn new(target: &str, payload: Value) -> Self {
        Self {
            target: target.to_owned(),
            payload,
            sid: None,
            link: Arc::new(ClientLink::new()),
            sender: None,
            response: None,
        }
    }

    /// Outcome after the server closed the session normally.
    fn finish(&mut self) -> Result<Value, ClientError> {
        match self.response.take() {
            Some(resp) if resp.success == Some(true) => Ok(resp.result.unwrap_or(Value::Null)),
            Some(resp) => Err(ClientError::Remote {
                code: resp.code.unwrap_or(500),
                message: resp.error.unwrap_or_default(),
            }),
            None => Err(ClientError::SessionClosed),
        }
    }
}

impl SessionClient {
    /// Start a new builder.
    pub fn builder() -> crate::builder::SessionClientBuilder {
        crate::builder::SessionClientBuilder::new()
    }

    /// Open a session, send `target` with `payload`, and wait for the
    /// server to answer and close the session.
    ///
    /// Abnormal closures are retried by reconnecting with the session id,
    /// up to the reconnect bound.  Server `REQUEST`s and `INFO`s that arrive
    /// meanwhile go to the configured handlers and progress channel.
    pub async fn request(&self, target: &str, payload: Value) -> Result<Value, ClientError> {
        let mut run = RequestRun::new(target, payload);
        let outcome = self.drive(&mut run).await;
        if let Some(sender) = run.sender.take() {
            sender.abort();
        }
        outcome
    }

    async fn drive(&self, run: &mut RequestRun) -> Result<Value, ClientError> {
        let mut attempt: u32 = 0;

        loop {
            if self.shutdown.is_cancelled() {
                return Err(ClientError::Shutdown);
            }

            match self.connect_once(run).await? {
                ConnectionEnd::Normal => {
                    tracing::info!(sid = ?run.sid, target = %run.target, "session closed");
                    return run.finish();
                }
                ConnectionEnd::Lost { established } => {
                    // Only a confirmed session resets the bound, not a bare
                    // TCP connect.
                    if established {
                        attempt = 0;
                    }
                    tracing::warn!(sid = ?run.sid, attempt, established, "connection lost");
                }
            }

            if self.reconnect.should_give_up(attempt) {
                tracing::error!(sid = ?run.sid, attempts = attempt, "max reconnect attempts exhausted");
                return Err(ClientError::ReconnectExhausted(attempt));
            }

            let delay = self.reconnect.delay_for_attempt(attempt);
            tracing::info!(
                sid = ?run.sid,
                delay_ms = delay.as_millis() as u64,
                attempt = attempt + 1,
                "reconnecting"
            );

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.shutdown.cancelled() => return Err(ClientError::Shutdown),
            }

            attempt += 1;
        }
    }

    /// Single connection lifecycle: connect, confirm the session, then pump
    /// messages until the connection ends.
    ///
    /// Failing to connect is a lost connection.  `Err` is reserved for
    /// outcomes that reconnecting cannot fix.
    async fn connect_once(&self, run: &mut RequestRun) -> Result<ConnectionEnd, ClientError> {
        let request = self.handshake_request(run.sid.as_deref())?;
        tracing::debug!(url = %self.url, sid = ?run.sid, "connecting");

        let ws = match tokio_tungstenite::connect_async(request).await {
            Ok((ws, _response)) => ws,
            Err(e) => {
                tracing::debug!(url = %self.url, error = %e, "connect failed");
                return Ok(ConnectionEnd::Lost { established: false });
            }
        };
        let (mut ws_sink, mut ws_stream) = ws.split();
        let (conn, mut outbound_rx) = Connection::new(FIRST_CLIENT_NONCE);

        // Writer task: drains the connection's outbound queue into the socket.
        let writer_conn = conn.clone();
        let mut writer = tokio::spawn(async move {
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
                            code: CloseCode::from(code),
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

        let liveness = tokio::time::sleep(self.liveness_timeout);
        tokio::pin!(liveness);

        let mut established = false;
        let mut peer_code: Option<u16> = None;

        let failure = loop {
            let next = tokio::select! {
                next = ws_stream.next() => next,
                sent = wait_sender(&mut run.sender) => match sent {
                    Ok(()) => {
                        tracing::debug!(sid = ?run.sid, target = %run.target, "request acknowledged");
                        continue;
                    }
                    Err(e) => break Some(ClientError::Send(e)),
                },
                _ = &mut liveness => {
                    tracing::warn!(
                        sid = ?run.sid,
                        timeout_ms = self.liveness_timeout.as_millis() as u64,
                        "no ping from server, dropping connection"
                    );
                    conn.terminate();
                    break None;
                }
                _ = self.shutdown.cancelled() => {
                    conn.close(NORMAL_CLOSURE, "client shutdown").await;
                    let _ = tokio::time::timeout(CLOSE_FLUSH_TIMEOUT, &mut writer).await;
                    break Some(ClientError::Shutdown);
                }
            };

            let msg = match next {
                Some(Ok(msg)) => msg,
                Some(Err(e)) => {
                    tracing::debug!(sid = ?run.sid, error = %e, "websocket read error");
                    break None;
                }
                None => break None,
            };

            match msg {
                Message::Binary(bytes) => {
                    let envelope = match codec::decode(&bytes) {
                        Ok(envelope) => envelope,
                        Err(e) => {
                            tracing::warn!(sid = ?run.sid, error = %e, "dropping undecodable frame");
                            continue;
                        }
                    };
                    if let Err(e) = conn.acknowledge(&envelope).await {
                        tracing::debug!(sid = ?run.sid, error = %e, "failed to acknowledge");
                    }

                    if !established {
                        if let Err(e) = self.confirm_session(run, &conn, &envelope) {
                            break Some(e);
                        }
                        established = true;
                        liveness.as_mut().reset(Instant::now() + self.liveness_timeout);
                    } else {
                        self.on_envelope(run, &envelope);
                    }
                    conn.publish(envelope);
                }
                Message::Ping(_) => {
                    liveness.as_mut().reset(Instant::now() + self.liveness_timeout);
                }
                Message::Close(frame) => {
                    // Keep reading until the handshake completes.
                    peer_code = Some(
                        frame
                            .map(|f| u16::from(f.code))
                            .unwrap_or(NO_STATUS_RECEIVED),
                    );
                }
                _ => {}
            }
        };

        run.link.unbind(conn.id());
        conn.mark_closed();
        writer.abort();

        if let Some(e) = failure {
            return Err(e);
        }
        let end = match peer_code {
            Some(NORMAL_CLOSURE) if conn.local_close_code().is_none() => ConnectionEnd::Normal,
            _ => ConnectionEnd::Lost { established },
        };
        tracing::debug!(sid = ?run.sid, code = ?peer_code, ?end, "connection ended");
        Ok(end)
    }

    /// Upgrade request, carrying the session id once one is known.
    fn handshake_request(
        &self,
        sid: Option<&str>,
    ) -> Result<tokio_tungstenite::tungstenite::handshake::client::Request, ClientError> {
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| ClientError::Config(format!("invalid url {}: {e}", self.url)))?;
        if let Some(sid) = sid {
            let value = HeaderValue::from_str(sid)
                .map_err(|e| ClientError::Protocol(format!("unusable session id {sid:?}: {e}")))?;
            request.headers_mut().insert(SESSION_HEADER, value);
        }
        Ok(request)
    }

    /// Check the first envelope of a connection and bind the link.
    ///
    /// A fresh session starts the request sender; a recovered one leaves
    /// the running sender to pick up the new link.
    fn confirm_session(
        &self,
        run: &mut RequestRun,
        conn: &Connection,
        envelope: &Envelope,
    ) -> Result<(), ClientError> {
        let offered = envelope.sid.as_deref();
        match (envelope.kind, run.sid.as_deref()) {
            (MessageType::NewSession, None) => {
                let sid = offered
                    .ok_or_else(|| ClientError::Protocol("NEW_SESSION without sid".into()))?;
                tracing::info!(sid = %sid, target = %run.target, "session opened");
                run.sid = Some(sid.to_owned());
                run.link.bind(conn);

                let link = run.link.clone();
                let request = Envelope::request(run.target.clone(), run.payload.clone());
                let policy = self.ack_policy.clone();
                run.sender = Some(tokio::spawn(async move {
                    ack::send(link.as_ref(), &request, &policy).await
                }));
                Ok(())
            }
            (MessageType::NewSession, Some(known)) => Err(ClientError::Protocol(format!(
                "session {known} was replaced by a new session"
            ))),
            (MessageType::RecoveredSession, Some(known)) if offered == Some(known) => {
                tracing::info!(sid = %known, "session recovered");
                run.link.bind(conn);
                Ok(())
            }
            (MessageType::RecoveredSession, known) => Err(ClientError::Protocol(format!(
                "recovered session {offered:?} does not match {known:?}"
            ))),
            (kind, _) => Err(ClientError::Protocol(format!(
                "expected session confirmation, got {kind:?}"
            ))),
        }
    }

    /// Route an envelope received on a confirmed session.
    fn on_envelope(&self, run: &mut RequestRun, envelope: &Envelope) {
        match envelope.kind {
            MessageType::Response if envelope.is_response_to(&run.target) => {
                tracing::debug!(
                    sid = ?run.sid,
                    target = %run.target,
                    success = ?envelope.success,
                    "response received"
                );
                run.response = Some(envelope.clone());
            }
            MessageType::Request => {
                let Some(target) = envelope.request_target().map(str::to_owned) else {
                    return;
                };
                let payload = envelope.payload.clone().unwrap_or(Value::Null);
                let handlers = self.handlers.clone();
                let link = run.link.clone();
                let policy = self.ack_policy.clone();
                tokio::spawn(async move {
                    let response = handlers.respond(&target, payload).await;
                    if !ack::try_send(link.as_ref(), &response, &policy).await {
                        tracing::warn!(target = %target, "response to server request dropped");
                    }
                });
            }
            MessageType::Info => {
                let payload = envelope.payload.clone().unwrap_or(Value::Null);
                if let Some(tx) = &self.progress {
                    if tx.try_send(payload).is_err() {
                        tracing::debug!(sid = ?run.sid, "progress channel full or closed, dropping info");
                    }
                }
            }
            MessageType::Ack => {}
            other => {
                tracing::debug!(sid = ?run.sid, kind = ?other, "ignoring envelope");
            }
        }
    }
}

/// Resolve once the request sender finishes; never while there is none.
async fn wait_sender(slot: &mut Option<JoinHandle<Result<(), SendError>>>) -> Result<(), SendError> {
    let Some(handle) = slot.as_mut() else {
        return std::future::pending().await;
    };
    let outcome = handle.await;
    *slot = None;
    match outcome {
        Ok(result) => result,
        Err(e) => {
            tracing::error!(error = %e, "request sender task failed");
            Err(SendError::ConnectionClosed)
        }
    }
}
