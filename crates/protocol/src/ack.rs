//! Acknowledged delivery with bounded exponential-backoff retry.
//!
//! Every attempt re-resolves the link, allocates a fresh nonce, attaches a
//! reply listener *before* writing, and waits up to the response timeout for
//! a validated reply.  Between failed attempts it sleeps
//! `initial_retry_delay * 2^attempt`.  The listener is dropped at the end of
//! each attempt whatever the outcome.

use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;

use crate::codec::CodecError;
use crate::connection::Connection;
use crate::envelope::Envelope;

#[derive(thiserror::Error, Debug)]
pub enum SendError {
    #[error("session missing")]
    SessionMissing,
    #[error("session detached")]
    SessionDetached,
    #[error("not connected")]
    NotConnected,
    #[error("connection closed")]
    ConnectionClosed,
    #[error("send message timeout reached after {0:?}")]
    Timeout(Duration),
    #[error(transparent)]
    Codec(#[from] CodecError),
}

impl SendError {
    /// Encoding failures are deterministic; resending cannot help.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, SendError::Codec(_))
    }
}

/// Resolves the connection a send attempt should use.
///
/// Called once per attempt, so a session that was recovered on a new
/// connection between attempts is picked up by the next one.
pub trait LinkResolver: Send + Sync {
    fn resolve(&self) -> Result<Connection, SendError>;
}

impl LinkResolver for Connection {
    fn resolve(&self) -> Result<Connection, SendError> {
        if self.is_closed() {
            Err(SendError::ConnectionClosed)
        } else {
            Ok(self.clone())
        }
    }
}

/// Timing knobs for acknowledged sends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AckPolicy {
    pub response_timeout: Duration,
    pub initial_retry_delay: Duration,
    /// Resends after the initial attempt.
    pub max_retries: u32,
}

impl Default for AckPolicy {
    fn default() -> Self {
        Self {
            response_timeout: Duration::from_secs(15),
            initial_retry_delay: Duration::from_secs(5),
            max_retries: 3,
        }
    }
}

impl AckPolicy {
    /// Backoff before the resend that follows failed attempt `attempt`
    /// (0-based).
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        self.initial_retry_delay
            .saturating_mul(2u32.saturating_pow(attempt))
    }
}

/// Send `message` and wait for the reply accepted by `validate`.
///
/// `validate` receives the nonce of the current attempt and every inbound
/// envelope; the first `Some` ends the attempt successfully.  On exhaustion
/// the error of the last attempt is returned.
pub async fn deliver<L, R, F>(
    link: &L,
    message: &Envelope,
    policy: &AckPolicy,
    validate: F,
) -> Result<R, SendError>
where
    L: LinkResolver + ?Sized,
    F: Fn(u64, &Envelope) -> Option<R>,
{
    let mut attempt: u32 = 0;
    loop {
        match attempt_once(link, message, policy.response_timeout, &validate).await {
            Ok(reply) => return Ok(reply),
            Err(e) if !e.is_retryable() => return Err(e),
            Err(e) => {
                if attempt >= policy.max_retries {
                    tracing::debug!(
                        kind = ?message.kind,
                        attempts = attempt + 1,
                        error = %e,
                        "delivery attempts exhausted"
                    );
                    return Err(e);
                }
                let delay = policy.retry_delay(attempt);
                tracing::debug!(
                    kind = ?message.kind,
                    attempt,
                    error = %e,
                    delay_ms = delay.as_millis() as u64,
                    "send attempt failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

async fn attempt_once<L, R, F>(
    link: &L,
    message: &Envelope,
    timeout: Duration,
    validate: &F,
) -> Result<R, SendError>
where
    L: LinkResolver + ?Sized,
    F: Fn(u64, &Envelope) -> Option<R>,
{
    let conn = link.resolve()?;
    let mut inbound = conn.subscribe();
    let nonce = conn.next_nonce();
    conn.send(&message.with_ack(nonce)).await?;
    tracing::trace!(conn = conn.id(), nonce, kind = ?message.kind, "awaiting reply");

    let wait = async {
        loop {
            tokio::select! {
                biased;
                received = inbound.recv() => match received {
                    Ok(env) => {
                        if let Some(reply) = validate(nonce, &env) {
                            return Ok(reply);
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(conn = conn.id(), skipped, "reply listener lagged");
                    }
                    Err(RecvError::Closed) => return Err(SendError::ConnectionClosed),
                },
                _ = conn.closed() => return Err(SendError::ConnectionClosed),
            }
        }
    };

    match tokio::time::timeout(timeout, wait).await {
        Ok(outcome) => outcome,
        Err(_) => Err(SendError::Timeout(timeout)),
    }
}

/// Send `message` and wait for the matching `ACK`.
pub async fn send<L>(link: &L, message: &Envelope, policy: &AckPolicy) -> Result<(), SendError>
where
    L: LinkResolver + ?Sized,
{
    deliver(link, message, policy, |nonce, env| {
        env.acknowledges(nonce).then_some(())
    })
    .await
}

/// Lenient [`send`]: failures are logged, never returned.  Returns whether
/// the message was acknowledged.
pub async fn try_send<L>(link: &L, message: &Envelope, policy: &AckPolicy) -> bool
where
    L: LinkResolver + ?Sized,
{
    match send(link, message, policy).await {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(kind = ?message.kind, error = %e, "message could not be delivered");
            false
        }
    }
}
