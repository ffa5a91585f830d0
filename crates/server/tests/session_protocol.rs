//! Wire-level session behavior, driven with raw WebSocket frames.

mod common;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use common::{ack, close_code, fast_config, recv_kind, send, TestServer};
use futures_util::SinkExt;
use serde_json::{json, Value};
use tether_protocol::{Envelope, MessageType, NORMAL_CLOSURE, POLICY_VIOLATION};
use tether_server::handlers::{HandlerError, HandlerRegistry, RequestContext, RequestHandler};
use tether_server::sessions::SessionState;
use tokio_tungstenite::tungstenite::Message;

struct Counting(Arc<AtomicU32>);

#[async_trait::async_trait]
impl RequestHandler for Counting {
    async fn handle(&self, _ctx: RequestContext, payload: Value) -> Result<Value, HandlerError> {
        self.0.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(100)).await;
        Ok(payload)
    }
}

struct Slow;

#[async_trait::async_trait]
impl RequestHandler for Slow {
    async fn handle(&self, _ctx: RequestContext, _payload: Value) -> Result<Value, HandlerError> {
        tokio::time::sleep(Duration::from_millis(300)).await;
        Ok(json!("slow done"))
    }
}

struct Deny;

#[async_trait::async_trait]
impl RequestHandler for Deny {
    async fn handle(&self, _ctx: RequestContext, _payload: Value) -> Result<Value, HandlerError> {
        Err(HandlerError::Forbidden("not yours".into()))
    }
}

struct Panics;

#[async_trait::async_trait]
impl RequestHandler for Panics {
    async fn handle(&self, _ctx: RequestContext, _payload: Value) -> Result<Value, HandlerError> {
        panic!("handler bug");
    }
}

#[tokio::test]
async fn request_is_answered_then_session_closed() {
    let server = TestServer::start(fast_config(), HandlerRegistry::with_defaults()).await;
    let mut ws = server.connect(None).await;

    let confirm = recv_kind(&mut ws, MessageType::NewSession).await;
    assert_eq!(confirm.ack, Some(0));
    let sid = confirm.sid.clone().unwrap();
    ack(&mut ws, &confirm).await;

    send(&mut ws, &Envelope::request("ECHO", json!({"x": 1})).with_ack(0)).await;
    let request_ack = recv_kind(&mut ws, MessageType::Ack).await;
    assert!(request_ack.acknowledges(0));

    let response = recv_kind(&mut ws, MessageType::Response).await;
    assert!(response.is_response_to("ECHO"));
    assert_eq!(response.success, Some(true));
    assert_eq!(response.result, Some(json!({"x": 1})));
    // Server nonces start at 1.
    assert_eq!(response.ack, Some(1));
    ack(&mut ws, &response).await;

    assert_eq!(close_code(&mut ws).await, Some(NORMAL_CLOSURE));
    assert!(!server.state.sessions.contains(&sid));

    // A destroyed session cannot be recovered.
    let mut again = server.connect(Some(&sid)).await;
    let fresh = recv_kind(&mut again, MessageType::NewSession).await;
    assert_ne!(fresh.sid.as_deref(), Some(sid.as_str()));

    server.stop().await;
}

#[tokio::test]
async fn only_the_first_request_is_routed() {
    let calls = Arc::new(AtomicU32::new(0));
    let mut handlers = HandlerRegistry::new();
    handlers.register("COUNT", Counting(calls.clone()));
    let server = TestServer::start(fast_config(), handlers).await;

    let (mut ws, _sid) = server.open_session().await;
    send(&mut ws, &Envelope::request("COUNT", json!(1)).with_ack(0)).await;
    send(&mut ws, &Envelope::request("COUNT", json!(2)).with_ack(1)).await;

    let response = recv_kind(&mut ws, MessageType::Response).await;
    assert_eq!(response.result, Some(json!(1)));
    ack(&mut ws, &response).await;
    assert_eq!(close_code(&mut ws).await, Some(NORMAL_CLOSURE));
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    server.stop().await;
}

#[tokio::test]
async fn session_without_request_is_closed_after_idle_window() {
    let server = TestServer::start(fast_config(), HandlerRegistry::with_defaults()).await;
    let (mut ws, sid) = server.open_session().await;

    // Unknown targets do not count as routed.
    send(&mut ws, &Envelope::request("NOPE", json!(null)).with_ack(0)).await;

    assert_eq!(close_code(&mut ws).await, Some(NORMAL_CLOSURE));
    assert!(!server.state.sessions.contains(&sid));

    server.stop().await;
}

#[tokio::test]
async fn response_reaches_recovered_connection() {
    let mut handlers = HandlerRegistry::new();
    handlers.register("SLOW", Slow);
    let server = TestServer::start(fast_config(), handlers).await;

    let (mut ws, sid) = server.open_session().await;
    send(&mut ws, &Envelope::request("SLOW", json!(null)).with_ack(0)).await;
    recv_kind(&mut ws, MessageType::Ack).await;
    drop(ws);
    // Let the server notice the drop before reconnecting.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut ws = server.connect(Some(&sid)).await;
    let confirm = recv_kind(&mut ws, MessageType::RecoveredSession).await;
    assert_eq!(confirm.sid.as_deref(), Some(sid.as_str()));
    assert_eq!(confirm.ack, Some(0));
    ack(&mut ws, &confirm).await;

    let response = recv_kind(&mut ws, MessageType::Response).await;
    assert_eq!(response.result, Some(json!("slow done")));
    ack(&mut ws, &response).await;
    assert_eq!(close_code(&mut ws).await, Some(NORMAL_CLOSURE));

    server.stop().await;
}

#[tokio::test]
async fn detached_session_expires_after_grace_period() {
    let mut config = fast_config();
    config.session.grace_period_ms = 150;
    config.session.idle_timeout_ms = 5_000;
    let server = TestServer::start(config, HandlerRegistry::with_defaults()).await;

    let (ws, sid) = server.open_session().await;
    drop(ws);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(server.state.sessions.contains(&sid));

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(!server.state.sessions.contains(&sid));

    let mut ws = server.connect(Some(&sid)).await;
    let fresh = recv_kind(&mut ws, MessageType::NewSession).await;
    assert_ne!(fresh.sid.as_deref(), Some(sid.as_str()));

    server.stop().await;
}

#[tokio::test]
async fn second_connection_for_live_session_is_rejected() {
    let server = TestServer::start(fast_config(), HandlerRegistry::with_defaults()).await;
    let (mut first, sid) = server.open_session().await;

    let mut second = server.connect(Some(&sid)).await;
    assert_eq!(close_code(&mut second).await, Some(POLICY_VIOLATION));

    // The original connection is untouched.
    send(&mut first, &Envelope::request("ECHO", json!("still here")).with_ack(0)).await;
    let response = recv_kind(&mut first, MessageType::Response).await;
    assert_eq!(response.result, Some(json!("still here")));
    ack(&mut first, &response).await;
    assert_eq!(close_code(&mut first).await, Some(NORMAL_CLOSURE));

    server.stop().await;
}

#[tokio::test]
async fn garbage_and_text_frames_are_ignored() {
    let server = TestServer::start(fast_config(), HandlerRegistry::with_defaults()).await;
    let (mut ws, _sid) = server.open_session().await;

    ws.send(Message::Binary(vec![0xc1])).await.unwrap();
    ws.send(Message::Text("hello".into())).await.unwrap();
    send(&mut ws, &Envelope::request("ECHO", json!("ok")).with_ack(0)).await;

    let response = recv_kind(&mut ws, MessageType::Response).await;
    assert_eq!(response.result, Some(json!("ok")));
    ack(&mut ws, &response).await;
    assert_eq!(close_code(&mut ws).await, Some(NORMAL_CLOSURE));

    server.stop().await;
}

#[tokio::test]
async fn repeated_garbage_terminates_connection_but_keeps_session() {
    let mut config = fast_config();
    config.session.idle_timeout_ms = 5_000;
    let server = TestServer::start(config, HandlerRegistry::with_defaults()).await;
    let (mut ws, sid) = server.open_session().await;

    for _ in 0..4 {
        ws.send(Message::Binary(vec![0xc1])).await.unwrap();
    }
    // Terminated without a close handshake.
    assert_eq!(close_code(&mut ws).await, None);

    let mut ws = server.connect(Some(&sid)).await;
    let confirm = recv_kind(&mut ws, MessageType::RecoveredSession).await;
    assert_eq!(confirm.sid.as_deref(), Some(sid.as_str()));

    server.stop().await;
}

#[tokio::test]
async fn handler_failures_are_classified() {
    let mut handlers = HandlerRegistry::new();
    handlers.register("DENY", Deny).register("PANIC", Panics);
    let server = TestServer::start(fast_config(), handlers).await;

    let (mut ws, _) = server.open_session().await;
    send(&mut ws, &Envelope::request("DENY", json!(null)).with_ack(0)).await;
    let denied = recv_kind(&mut ws, MessageType::Response).await;
    assert_eq!(denied.success, Some(false));
    assert_eq!(denied.code, Some(403));
    assert_eq!(denied.error.as_deref(), Some("not yours"));
    ack(&mut ws, &denied).await;
    assert_eq!(close_code(&mut ws).await, Some(NORMAL_CLOSURE));

    let (mut ws, _) = server.open_session().await;
    send(&mut ws, &Envelope::request("PANIC", json!(null)).with_ack(0)).await;
    let crashed = recv_kind(&mut ws, MessageType::Response).await;
    assert_eq!(crashed.code, Some(500));
    assert_eq!(crashed.error.as_deref(), Some("Internal error"));
    ack(&mut ws, &crashed).await;
    assert_eq!(close_code(&mut ws).await, Some(NORMAL_CLOSURE));

    server.stop().await;
}

#[tokio::test]
async fn silent_client_is_detached_by_liveness_probe() {
    let mut config = fast_config();
    config.session.heartbeat_interval_ms = 100;
    config.session.idle_timeout_ms = 5_000;
    let server = TestServer::start(config, HandlerRegistry::with_defaults()).await;

    let (ws, sid) = server.open_session().await;
    // Not reading means pings are never answered.
    tokio::time::sleep(Duration::from_millis(500)).await;

    let info = server
        .state
        .sessions
        .list()
        .into_iter()
        .find(|s| s.sid == sid)
        .unwrap();
    assert_eq!(info.state, SessionState::Detached);

    drop(ws);
    server.stop().await;
}
