//! Request handlers and the target → handler table.

pub mod echo;

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tether_protocol::ack::{self, AckPolicy};
use tether_protocol::Envelope;

use crate::sessions::SessionHandle;

const DEFAULT_WORKAROUND: &str = "Please update the client to the latest version.";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Errors
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Handler failure, classified by who caused it.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    /// Malformed request payload.
    #[error("{0}")]
    Validation(String),
    /// Authorization or business-rule refusal.
    #[error("{0}")]
    Forbidden(String),
    /// The client is too old for this request.
    #[error("{message}")]
    OutdatedClient {
        message: String,
        workaround: Option<String>,
    },
    /// Anything else.  Never shown to the client.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl HandlerError {
    pub fn outdated_client(message: impl Into<String>) -> Self {
        Self::OutdatedClient {
            message: message.into(),
            workaround: None,
        }
    }

    /// HTTP-style class carried in the `RESPONSE.code` field.
    pub fn code(&self) -> u16 {
        match self {
            HandlerError::Validation(_) => 400,
            HandlerError::Forbidden(_) => 403,
            HandlerError::OutdatedClient { .. } => 410,
            HandlerError::Internal(_) => 500,
        }
    }

    /// Message sent to the client.  Internal errors are redacted.
    pub fn public_message(&self) -> String {
        match self {
            HandlerError::Validation(m) | HandlerError::Forbidden(m) => m.clone(),
            HandlerError::OutdatedClient {
                message,
                workaround,
            } => format!(
                "{message}\n{}",
                workaround.as_deref().unwrap_or(DEFAULT_WORKAROUND)
            ),
            HandlerError::Internal(_) => "Internal error".into(),
        }
    }

    /// `RESPONSE` envelope for this failure.
    pub fn to_response(&self, target: &str) -> Envelope {
        Envelope::response_err(target, self.code(), self.public_message())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Context
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Per-request context handed to a [`RequestHandler`].
///
/// Everything sent through it addresses the session, not the connection
/// the request arrived on.
#[derive(Clone, Debug)]
pub struct RequestContext {
    session: SessionHandle,
    target: String,
    policy: AckPolicy,
}

impl RequestContext {
    pub fn new(session: SessionHandle, target: impl Into<String>, policy: AckPolicy) -> Self {
        Self {
            session,
            target: target.into(),
            policy,
        }
    }

    pub fn sid(&self) -> &str {
        self.session.sid()
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn session(&self) -> &SessionHandle {
        &self.session
    }

    pub fn policy(&self) -> &AckPolicy {
        &self.policy
    }

    /// Push an acknowledged `INFO` notification.  Delivery failures are
    /// logged and reported as `false`.
    pub async fn info(&self, payload: Value) -> bool {
        ack::try_send(&self.session, &Envelope::info(payload), &self.policy).await
    }

    /// Ask the client to run `target` and wait for its `RESPONSE`.
    ///
    /// A refusal from the client becomes [`HandlerError::Forbidden`];
    /// an undeliverable request becomes [`HandlerError::Internal`].
    pub async fn ask(&self, target: &str, payload: Value) -> Result<Value, HandlerError> {
        let request = Envelope::request(target, payload);
        let reply = ack::deliver(&self.session, &request, &self.policy, |_, env| {
            env.is_response_to(target).then(|| env.clone())
        })
        .await
        .map_err(|e| anyhow::anyhow!("client request {target} failed: {e}"))?;

        if reply.success == Some(true) {
            Ok(reply.result.unwrap_or(Value::Null))
        } else {
            Err(HandlerError::Forbidden(
                reply
                    .error
                    .unwrap_or_else(|| format!("client refused {target}")),
            ))
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Handler traits
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Runs one request target.
#[async_trait::async_trait]
pub trait RequestHandler: Send + Sync {
    async fn handle(&self, ctx: RequestContext, payload: Value) -> Result<Value, HandlerError>;
}

/// Resolves a request target to its handler.
pub trait RequestRouter: Send + Sync {
    fn resolve(&self, target: &str) -> Option<Arc<dyn RequestHandler>>;
}

/// Handler table keyed by upper-cased target.
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn RequestHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Table with the built-in handlers.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(echo::TARGET, echo::EchoHandler);
        registry
    }

    /// Register `handler` for `target`.  Replaces any previous handler.
    pub fn register(&mut self, target: &str, handler: impl RequestHandler + 'static) -> &mut Self {
        self.handlers
            .insert(target.to_ascii_uppercase(), Arc::new(handler));
        self
    }

    pub fn targets(&self) -> Vec<String> {
        let mut targets: Vec<String> = self.handlers.keys().cloned().collect();
        targets.sort();
        targets
    }
}

impl RequestRouter for HandlerRegistry {
    fn resolve(&self, target: &str) -> Option<Arc<dyn RequestHandler>> {
        self.handlers.get(&target.to_ascii_uppercase()).cloned()
    }
}
