//! Application state construction and server lifecycle.

use std::sync::Arc;

use anyhow::Context;
use tether_domain::config::{Config, ConfigSeverity};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::api;
use crate::handlers::RequestRouter;
use crate::sessions::{LivenessMonitor, SessionRegistry};
use crate::state::AppState;

/// Validate `config` and build the shared [`AppState`].
///
/// Warnings are logged; any error-severity issue aborts startup.
pub fn build_app_state(
    config: Arc<Config>,
    handlers: Arc<dyn RequestRouter>,
) -> anyhow::Result<AppState> {
    let issues = config.validate();
    let mut errors = Vec::new();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Error => errors.push(issue.to_string()),
            ConfigSeverity::Warning => {
                tracing::warn!(field = %issue.field, "{}", issue.message);
            }
        }
    }
    if !errors.is_empty() {
        anyhow::bail!("invalid configuration:\n{}", errors.join("\n"));
    }

    let sessions = Arc::new(SessionRegistry::new(config.session.grace_period()));
    let liveness = Arc::new(LivenessMonitor::new(config.session.heartbeat_interval()));

    tracing::info!(
        heartbeat_ms = config.session.heartbeat_interval_ms,
        grace_ms = config.session.grace_period_ms,
        idle_ms = config.session.idle_timeout_ms,
        "session registry ready"
    );

    Ok(AppState {
        config,
        sessions,
        liveness,
        handlers,
        shutdown: CancellationToken::new(),
    })
}

/// Spawn the long-running background tasks (liveness monitor).
///
/// They stop when `state.shutdown` is cancelled.
pub fn spawn_background_tasks(state: &AppState) -> Vec<JoinHandle<()>> {
    let tasks = vec![state.liveness.spawn(state.shutdown.clone())];
    tracing::info!("background tasks spawned");
    tasks
}

/// Serve the API on `listener` until `state.shutdown` is cancelled.
///
/// On shutdown every session is closed with a going-away code before the
/// listener stops.
pub async fn serve(listener: TcpListener, state: AppState) -> anyhow::Result<()> {
    let max_concurrent = state.config.server.max_concurrent_requests;
    tracing::info!(max_concurrent, "concurrency limit set");

    let app = api::router()
        .layer(TraceLayer::new_for_http())
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_concurrent))
        .with_state(state.clone());

    let shutdown = state.shutdown.clone();
    let sessions = state.sessions.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown.cancelled().await;
            sessions.shutdown().await;
        })
        .await
        .context("axum server error")
}
