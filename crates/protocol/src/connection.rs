//! Handle to one live transport connection.
//!
//! The transport loops (server and client) own the socket halves.  They
//! drain [`Outbound`] items into the socket and publish every decoded
//! inbound envelope through [`Connection::publish`]; everything else in the
//! protocol talks to the socket only through this handle.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

use crate::ack::SendError;
use crate::codec;
use crate::envelope::Envelope;
use crate::ABNORMAL_CLOSURE;

const OUTBOUND_CAPACITY: usize = 64;
const INBOUND_CAPACITY: usize = 64;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Work item for a connection's writer loop.
#[derive(Debug)]
pub enum Outbound {
    /// Encoded envelope, sent as a binary frame.
    Frame(Vec<u8>),
    /// Transport-level liveness probe.
    Ping,
    /// Close the connection with `code`.  Nothing is written after this.
    Close { code: u16, reason: String },
}

#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

struct Inner {
    id: u64,
    outbound: mpsc::Sender<Outbound>,
    inbound: broadcast::Sender<Envelope>,
    closed: CancellationToken,
    next_nonce: AtomicU64,
    alive: AtomicBool,
    close_code: Mutex<Option<u16>>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.inner.id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Connection {
    /// Create a handle and the receiver its writer loop must drain.
    ///
    /// `first_nonce` is the first value handed out by
    /// [`next_nonce`](Self::next_nonce).
    pub fn new(first_nonce: u64) -> (Self, mpsc::Receiver<Outbound>) {
        let (outbound, outbound_rx) = mpsc::channel(OUTBOUND_CAPACITY);
        let (inbound, _) = broadcast::channel(INBOUND_CAPACITY);
        let conn = Self {
            inner: Arc::new(Inner {
                id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
                outbound,
                inbound,
                closed: CancellationToken::new(),
                next_nonce: AtomicU64::new(first_nonce),
                alive: AtomicBool::new(true),
                close_code: Mutex::new(None),
            }),
        };
        (conn, outbound_rx)
    }

    /// Process-unique connection id.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Allocate the next acknowledgment nonce.  Strictly increasing for the
    /// lifetime of this connection.
    pub fn next_nonce(&self) -> u64 {
        self.inner.next_nonce.fetch_add(1, Ordering::Relaxed)
    }

    /// Encode and queue an envelope.  Waiting on a full queue gives up as
    /// soon as the connection is closed or terminated.
    pub async fn send(&self, envelope: &Envelope) -> Result<(), SendError> {
        if self.is_closed() {
            return Err(SendError::ConnectionClosed);
        }
        let frame = codec::encode(envelope)?;
        if self.enqueue(Outbound::Frame(frame)).await {
            Ok(())
        } else {
            Err(SendError::ConnectionClosed)
        }
    }

    /// Answer `envelope` with an `ACK` if it asks for one.
    pub async fn acknowledge(&self, envelope: &Envelope) -> Result<(), SendError> {
        match envelope.ack_requested() {
            Some(nonce) => {
                tracing::trace!(conn = self.id(), nonce, "acknowledging");
                self.send(&Envelope::ack(nonce)).await
            }
            None => Ok(()),
        }
    }

    /// Queue a liveness probe.  Returns `false` when the writer is gone or
    /// backed up.
    pub fn ping(&self) -> bool {
        self.inner.outbound.try_send(Outbound::Ping).is_ok()
    }

    /// Ask the writer to close the connection with `code`.  The first close
    /// code recorded wins.
    pub async fn close(&self, code: u16, reason: impl Into<String>) {
        self.record_close_code(code);
        self.enqueue(Outbound::Close {
            code,
            reason: reason.into(),
        })
        .await;
    }

    async fn enqueue(&self, item: Outbound) -> bool {
        tokio::select! {
            biased;
            _ = self.inner.closed.cancelled() => false,
            sent = self.inner.outbound.send(item) => sent.is_ok(),
        }
    }

    /// Tear the connection down without a close handshake.  Counts as an
    /// abnormal closure.
    pub fn terminate(&self) {
        self.record_close_code(ABNORMAL_CLOSURE);
        self.inner.closed.cancel();
    }

    /// Called by the transport loop once the socket is gone.
    pub fn mark_closed(&self) {
        self.inner.closed.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.is_cancelled()
    }

    /// Resolves once the connection is closed or terminated.
    pub async fn closed(&self) {
        self.inner.closed.cancelled().await
    }

    /// Close code this side asked for, if any.
    pub fn local_close_code(&self) -> Option<u16> {
        *self.inner.close_code.lock()
    }

    fn record_close_code(&self, code: u16) {
        let mut slot = self.inner.close_code.lock();
        if slot.is_none() {
            *slot = Some(code);
        }
    }

    /// Listen to envelopes published after this call.  Dropping the
    /// receiver detaches the listener.
    pub fn subscribe(&self) -> broadcast::Receiver<Envelope> {
        self.inner.inbound.subscribe()
    }

    /// Number of attached reply listeners.
    pub fn listener_count(&self) -> usize {
        self.inner.inbound.receiver_count()
    }

    /// Hand a decoded inbound envelope to every current listener.
    pub fn publish(&self, envelope: Envelope) {
        // No listener is the common case.
        let _ = self.inner.inbound.send(envelope);
    }

    // ── Liveness mark ────────────────────────────────────────────────

    pub fn mark_alive(&self) {
        self.inner.alive.store(true, Ordering::Relaxed);
    }

    pub fn is_alive(&self) -> bool {
        self.inner.alive.load(Ordering::Relaxed)
    }

    pub fn clear_alive(&self) {
        self.inner.alive.store(false, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::MessageType;

    fn frame_envelope(item: Outbound) -> Envelope {
        match item {
            Outbound::Frame(bytes) => codec::decode(&bytes).unwrap(),
            other => panic!("expected frame, got {other:?}"),
        }
    }

    #[test]
    fn ids_and_nonces_increase() {
        let (a, _rx_a) = Connection::new(1);
        let (b, _rx_b) = Connection::new(0);
        assert!(b.id() > a.id());
        assert_eq!(a.next_nonce(), 1);
        assert_eq!(a.next_nonce(), 2);
        assert_eq!(b.next_nonce(), 0);
    }

    #[tokio::test]
    async fn send_queues_an_encoded_frame() {
        let (conn, mut rx) = Connection::new(1);
        conn.send(&Envelope::ack(9)).await.unwrap();
        let env = frame_envelope(rx.recv().await.unwrap());
        assert!(env.acknowledges(9));
    }

    #[tokio::test]
    async fn acknowledge_answers_only_when_asked() {
        let (conn, mut rx) = Connection::new(1);
        conn.acknowledge(&Envelope::info(serde_json::json!({}))).await.unwrap();
        conn.acknowledge(&Envelope::ack(3)).await.unwrap();
        conn.acknowledge(&Envelope::new_session("s")).await.unwrap();
        let env = frame_envelope(rx.recv().await.unwrap());
        assert_eq!(env.kind, MessageType::Ack);
        assert_eq!(env.ack, Some(0));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn send_after_close_fails() {
        let (conn, _rx) = Connection::new(1);
        conn.mark_closed();
        let err = conn.send(&Envelope::ack(1)).await.unwrap_err();
        assert!(matches!(err, SendError::ConnectionClosed));
    }

    #[tokio::test]
    async fn full_queue_send_gives_up_on_terminate() {
        let (conn, _rx) = Connection::new(1);
        for _ in 0..OUTBOUND_CAPACITY {
            conn.send(&Envelope::ack(1)).await.unwrap();
        }

        let stuck = conn.clone();
        let pending = tokio::spawn(async move {
            stuck.acknowledge(&Envelope::info(serde_json::json!({})).with_ack(7)).await
        });
        tokio::task::yield_now().await;
        assert!(!pending.is_finished());

        conn.terminate();
        let result = tokio::time::timeout(std::time::Duration::from_secs(1), pending)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, Err(SendError::ConnectionClosed)));
    }

    #[tokio::test]
    async fn first_close_code_wins() {
        let (conn, mut rx) = Connection::new(1);
        conn.close(1000, "done").await;
        conn.terminate();
        assert_eq!(conn.local_close_code(), Some(1000));
        assert!(conn.is_closed());
        assert!(matches!(
            rx.recv().await,
            Some(Outbound::Close { code: 1000, .. })
        ));
    }

    #[tokio::test]
    async fn terminate_records_abnormal_closure() {
        let (conn, _rx) = Connection::new(1);
        conn.terminate();
        assert_eq!(conn.local_close_code(), Some(ABNORMAL_CLOSURE));
        conn.closed().await;
    }

    #[test]
    fn liveness_mark_starts_set() {
        let (conn, _rx) = Connection::new(1);
        assert!(conn.is_alive());
        conn.clear_alive();
        assert!(!conn.is_alive());
        conn.mark_alive();
        assert!(conn.is_alive());
    }
}
