pub mod health;

use axum::routing::get;
use axum::Router;

use crate::sessions::ws;
use crate::state::AppState;

/// Build the API router.  No authentication: the session id is the only
/// credential a connection carries.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/ws", get(ws::session_ws))
        .route("/health", get(health::health))
        .route("/v1/sessions", get(health::list_sessions))
}
