//! First-request dispatch for new sessions.
//!
//! A [`Dispatcher`] is installed only when a connection creates a fresh
//! session.  It watches inbound envelopes until one `REQUEST` resolves to a
//! handler, runs that handler exactly once, delivers its `RESPONSE` to the
//! session and then closes the session normally.  If nothing routable
//! arrives within the idle window the session is closed instead.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use serde_json::Value;
use tether_protocol::ack::{self, AckPolicy};
use tether_protocol::{Envelope, NORMAL_CLOSURE};
use tokio::task::JoinHandle;

use super::handle::SessionHandle;
use super::registry::SessionRegistry;
use crate::handlers::{HandlerError, RequestContext, RequestHandler, RequestRouter};

pub struct Dispatcher {
    sid: String,
    sessions: Arc<SessionRegistry>,
    router: Arc<dyn RequestRouter>,
    policy: AckPolicy,
    idle_guard: Option<JoinHandle<()>>,
}

impl Dispatcher {
    /// Install routing for the new session `sid` and start its idle guard.
    pub fn install(
        sid: impl Into<String>,
        sessions: Arc<SessionRegistry>,
        router: Arc<dyn RequestRouter>,
        policy: AckPolicy,
        idle_timeout: Duration,
    ) -> Self {
        let sid = sid.into();
        let guard = {
            let sid = sid.clone();
            let sessions = sessions.clone();
            tokio::spawn(async move {
                tokio::time::sleep(idle_timeout).await;
                if sessions
                    .close_unrouted(&sid, NORMAL_CLOSURE, "no request received")
                    .await
                {
                    tracing::info!(
                        sid = %sid,
                        idle_ms = idle_timeout.as_millis() as u64,
                        "idle session closed"
                    );
                }
            })
        };
        Self {
            sid,
            sessions,
            router,
            policy,
            idle_guard: Some(guard),
        }
    }

    /// Offer one inbound envelope.
    ///
    /// Returns `true` when it was dispatched; the dispatcher is spent after
    /// that and the caller should drop it.  Non-requests and requests for
    /// unknown targets are ignored.
    pub fn offer(&mut self, envelope: &Envelope) -> bool {
        let Some(target) = envelope.request_target() else {
            return false;
        };
        let Some(handler) = self.router.resolve(target) else {
            tracing::debug!(sid = %self.sid, target = %target, "no handler for target, ignoring");
            return false;
        };
        if !self.sessions.mark_routed(&self.sid) {
            return false;
        }
        if let Some(guard) = self.idle_guard.take() {
            guard.abort();
        }

        tracing::info!(sid = %self.sid, target = %target, "request routed");
        let ctx = RequestContext::new(
            SessionHandle::new(self.sid.clone(), self.sessions.clone()),
            target,
            self.policy.clone(),
        );
        let payload = envelope.payload.clone().unwrap_or(Value::Null);
        let request_span = tracing::info_span!(
            "request",
            sid = %self.sid,
            target = %target,
            "otel.kind" = "SERVER",
        );
        tokio::spawn(tracing::Instrument::instrument(
            run_request(handler, ctx, payload, self.sessions.clone()),
            request_span,
        ));
        true
    }
}

/// Run the handler to completion, deliver its outcome, close the session.
async fn run_request(
    handler: Arc<dyn RequestHandler>,
    ctx: RequestContext,
    payload: Value,
    sessions: Arc<SessionRegistry>,
) {
    let sid = ctx.sid().to_owned();
    let target = ctx.target().to_owned();
    let session = ctx.session().clone();
    let policy = ctx.policy().clone();
    let started = std::time::Instant::now();

    // A panicking handler still produces a RESPONSE.
    let outcome = AssertUnwindSafe(handler.handle(ctx, payload))
        .catch_unwind()
        .await;

    let response = match outcome {
        Ok(Ok(result)) => {
            tracing::info!(
                sid = %sid,
                target = %target,
                duration_ms = started.elapsed().as_millis() as u64,
                "request completed"
            );
            Envelope::response_ok(&target, result)
        }
        Ok(Err(err)) => {
            log_handler_error(&sid, &target, &err);
            err.to_response(&target)
        }
        Err(_panic) => {
            tracing::error!(sid = %sid, target = %target, "request handler panicked");
            Envelope::response_err(&target, 500, "Internal error")
        }
    };

    if !ack::try_send(&session, &response, &policy).await {
        tracing::warn!(sid = %sid, target = %target, "response dropped");
    }
    sessions
        .close_session(&sid, NORMAL_CLOSURE, "request complete")
        .await;
}

fn log_handler_error(sid: &str, target: &str, err: &HandlerError) {
    match err {
        HandlerError::Internal(e) => {
            tracing::error!(sid = %sid, target = %target, error = ?e, "unexpected handler error");
        }
        other => {
            tracing::info!(
                sid = %sid,
                target = %target,
                code = other.code(),
                error = %other,
                "request refused"
            );
        }
    }
}
