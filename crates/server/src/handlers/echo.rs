//! `ECHO`: returns the request payload unchanged.

use serde_json::Value;

use super::{HandlerError, RequestContext, RequestHandler};

pub const TARGET: &str = "ECHO";

pub struct EchoHandler;

#[async_trait::async_trait]
impl RequestHandler for EchoHandler {
    async fn handle(&self, ctx: RequestContext, payload: Value) -> Result<Value, HandlerError> {
        if payload.is_null() {
            return Err(HandlerError::Validation("ECHO requires a payload".into()));
        }
        tracing::debug!(sid = %ctx.sid(), "echoing payload");
        Ok(payload)
    }
}
