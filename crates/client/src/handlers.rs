//! Handlers for requests the server sends to the client.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use serde_json::Value;
use tether_protocol::Envelope;

use crate::types::{HandlerFailure, HandlerResult};

/// Implement this trait to answer a server-initiated `REQUEST`.
///
/// ```rust,no_run
/// use tether_client::{ClientHandler, HandlerResult};
///
/// struct RenewToken;
///
/// #[async_trait::async_trait]
/// impl ClientHandler for RenewToken {
///     async fn handle(&self, _payload: serde_json::Value) -> HandlerResult {
///         Ok(serde_json::json!({ "token": "fresh" }))
///     }
/// }
/// ```
#[async_trait::async_trait]
pub trait ClientHandler: Send + Sync + 'static {
    async fn handle(&self, payload: Value) -> HandlerResult;
}

/// Handler table keyed by upper-cased target.
#[derive(Clone, Default)]
pub struct ClientHandlers {
    handlers: HashMap<String, Arc<dyn ClientHandler>>,
}

impl ClientHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `&mut Self` for method chaining.
    pub fn register<H: ClientHandler>(&mut self, target: impl Into<String>, handler: H) -> &mut Self {
        self.handlers
            .insert(target.into().to_ascii_uppercase(), Arc::new(handler));
        self
    }

    pub fn get(&self, target: &str) -> Option<Arc<dyn ClientHandler>> {
        self.handlers.get(&target.to_ascii_uppercase()).cloned()
    }

    /// Run the handler for `target` and build the `RESPONSE`.  Unknown
    /// targets get a 404-class refusal; panics a 500-class one.
    pub async fn respond(&self, target: &str, payload: Value) -> Envelope {
        let Some(handler) = self.get(target) else {
            tracing::warn!(target = %target, "no handler registered for server request");
            return Envelope::response_err(target, 404, format!("unknown target: {target}"));
        };

        match AssertUnwindSafe(handler.handle(payload)).catch_unwind().await {
            Ok(Ok(result)) => Envelope::response_ok(target, result),
            Ok(Err(HandlerFailure { code, message })) => {
                tracing::debug!(target = %target, code, "server request refused");
                Envelope::response_err(target, code, message)
            }
            Err(_panic) => {
                tracing::error!(target = %target, "client handler panicked");
                Envelope::response_err(target, 500, "Internal error")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Token;

    #[async_trait::async_trait]
    impl ClientHandler for Token {
        async fn handle(&self, payload: Value) -> HandlerResult {
            match payload.get("scope").and_then(Value::as_str) {
                Some("push") => Ok(json!({"token": "t-1"})),
                _ => Err(HandlerFailure::forbidden("scope not allowed")),
            }
        }
    }

    struct Broken;

    #[async_trait::async_trait]
    impl ClientHandler for Broken {
        async fn handle(&self, _payload: Value) -> HandlerResult {
            panic!("broken handler");
        }
    }

    fn handlers() -> ClientHandlers {
        let mut h = ClientHandlers::new();
        h.register("renew_push_token", Token).register("BROKEN", Broken);
        h
    }

    #[tokio::test]
    async fn registered_target_answers() {
        let env = handlers()
            .respond("RENEW_PUSH_TOKEN", json!({"scope": "push"}))
            .await;
        assert!(env.is_response_to("RENEW_PUSH_TOKEN"));
        assert_eq!(env.success, Some(true));
        assert_eq!(env.result, Some(json!({"token": "t-1"})));
    }

    #[tokio::test]
    async fn refusal_keeps_code() {
        let env = handlers().respond("RENEW_PUSH_TOKEN", json!({})).await;
        assert_eq!(env.success, Some(false));
        assert_eq!(env.code, Some(403));
        assert_eq!(env.error.as_deref(), Some("scope not allowed"));
    }

    #[tokio::test]
    async fn unknown_target_is_404() {
        let env = handlers().respond("NOPE", json!(null)).await;
        assert_eq!(env.code, Some(404));
    }

    #[tokio::test]
    async fn panic_becomes_internal_error() {
        let env = handlers().respond("BROKEN", json!(null)).await;
        assert_eq!(env.code, Some(500));
        assert_eq!(env.error.as_deref(), Some("Internal error"));
    }
}
