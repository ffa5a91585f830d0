//! Shared harness: an in-process server on an ephemeral port plus raw
//! WebSocket helpers.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tether_domain::config::Config;
use tether_protocol::{codec, Envelope, MessageType, SESSION_HEADER};
use tether_server::bootstrap;
use tether_server::handlers::HandlerRegistry;
use tether_server::state::AppState;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

pub type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// How long a helper waits for an expected frame.
const RECV_TIMEOUT: Duration = Duration::from_secs(5);

/// Millisecond-scale timings.  The heartbeat is long enough that raw
/// sockets which do not read are not probed away mid-test.
pub fn fast_config() -> Config {
    let mut config = Config::default();
    config.session.heartbeat_interval_ms = 10_000;
    config.session.grace_period_ms = 1_000;
    config.session.response_timeout_ms = 300;
    config.session.retry_initial_delay_ms = 50;
    config.session.max_send_retries = 3;
    config.session.idle_timeout_ms = 400;
    config.session.max_decode_failures = 3;
    config
}

pub struct TestServer {
    pub addr: SocketAddr,
    pub state: AppState,
    tasks: Vec<JoinHandle<()>>,
    server: JoinHandle<anyhow::Result<()>>,
}

impl TestServer {
    pub async fn start(config: Config, handlers: HandlerRegistry) -> Self {
        let state = bootstrap::build_app_state(Arc::new(config), Arc::new(handlers)).unwrap();
        let tasks = bootstrap::spawn_background_tasks(&state);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(bootstrap::serve(listener, state.clone()));
        Self {
            addr,
            state,
            tasks,
            server,
        }
    }

    pub fn url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    /// Raw connection, optionally carrying a session id.
    pub async fn connect(&self, sid: Option<&str>) -> Ws {
        let mut request = self.url().into_client_request().unwrap();
        if let Some(sid) = sid {
            request
                .headers_mut()
                .insert(SESSION_HEADER, HeaderValue::from_str(sid).unwrap());
        }
        let (ws, _) = tokio_tungstenite::connect_async(request).await.unwrap();
        ws
    }

    /// Connect fresh, acknowledge `NEW_SESSION`, return the socket and sid.
    pub async fn open_session(&self) -> (Ws, String) {
        let mut ws = self.connect(None).await;
        let confirm = recv_kind(&mut ws, MessageType::NewSession).await;
        send(&mut ws, &Envelope::ack(confirm.ack.unwrap())).await;
        (ws, confirm.sid.unwrap())
    }

    pub async fn stop(self) {
        self.state.shutdown.cancel();
        let _ = self.server.await;
        for task in self.tasks {
            let _ = task.await;
        }
    }
}

pub async fn send(ws: &mut Ws, env: &Envelope) {
    ws.send(Message::Binary(codec::encode(env).unwrap()))
        .await
        .unwrap();
}

/// Next envelope of `kind`; other envelopes and control frames are skipped.
pub async fn recv_kind(ws: &mut Ws, kind: MessageType) -> Envelope {
    let wait = async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Binary(bytes))) => {
                    let env = codec::decode(&bytes).unwrap();
                    if env.kind == kind {
                        return env;
                    }
                }
                Some(Ok(_)) => {}
                other => panic!("connection ended while waiting for {kind:?}: {other:?}"),
            }
        }
    };
    tokio::time::timeout(RECV_TIMEOUT, wait)
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {kind:?}"))
}

/// Acknowledge `env` if it asks for it.
pub async fn ack(ws: &mut Ws, env: &Envelope) {
    if let Some(nonce) = env.ack_requested() {
        send(ws, &Envelope::ack(nonce)).await;
    }
}

/// Read until the peer's close frame and return its code.  `None` when the
/// connection ended without one.
pub async fn close_code(ws: &mut Ws) -> Option<u16> {
    let wait = async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Close(frame))) => {
                    return frame.map(|f| u16::from(f.code));
                }
                Some(Ok(_)) => {}
                Some(Err(_)) | None => return None,
            }
        }
    };
    tokio::time::timeout(RECV_TIMEOUT, wait)
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for close"))
}
