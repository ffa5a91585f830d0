//! One-shot command-line client for a tether server.
//!
//! Opens a session, sends a single request and prints the response as
//! JSON on stdout.  `INFO` notifications pushed by the server go to stderr.
//!
//! Usage:
//!   tether-send ECHO '{"hello": "world"}'
//!   tether-send --url wss://example.com/ws BUILD '{}'
//!
//! Env vars:
//!   TETHER_CONFIG  — config file whose `[client]` section supplies defaults
//!   RUST_LOG       — log filter (default: "warn")

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use serde_json::Value;
use tether_client::SessionClientBuilder;
use tether_domain::config::{ClientConfig, Config};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "tether-send", version, about = "Send one request over a tether session")]
struct Args {
    /// Request target (e.g. ECHO).
    target: String,

    /// JSON payload.  Defaults to `null`.
    payload: Option<String>,

    /// Server WebSocket URL.  Overrides the config file.
    #[arg(long)]
    url: Option<String>,

    /// Config file.  Falls back to $TETHER_CONFIG when set.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Do not print INFO notifications.
    #[arg(long, short)]
    quiet: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .compact()
        .init();

    let args = Args::parse();
    let client_config = load_client_config(args.config.as_ref())?;

    let payload: Value = match &args.payload {
        Some(raw) => serde_json::from_str(raw).context("payload is not valid JSON")?,
        None => Value::Null,
    };

    let shutdown = CancellationToken::new();
    let mut builder = SessionClientBuilder::from_config(&client_config).shutdown(shutdown.clone());
    if let Some(url) = &args.url {
        builder = builder.url(url);
    }

    let (progress_tx, mut progress_rx) = tokio::sync::mpsc::channel::<Value>(32);
    if !args.quiet {
        builder = builder.progress(progress_tx);
        tokio::spawn(async move {
            while let Some(info) = progress_rx.recv().await {
                eprintln!("info: {info}");
            }
        });
    }

    let client = builder.build()?;

    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("interrupted, closing session");
                shutdown.cancel();
            }
        }
    });

    tracing::info!(target = %args.target, "sending request");
    let result = client
        .request(&args.target, payload)
        .await
        .with_context(|| format!("request {} failed", args.target))?;

    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

/// `[client]` section of the config file, or defaults when there is none.
fn load_client_config(explicit: Option<&PathBuf>) -> anyhow::Result<ClientConfig> {
    let path = match explicit {
        Some(path) => Some(path.clone()),
        None => std::env::var_os("TETHER_CONFIG").map(PathBuf::from),
    };
    let Some(path) = path else {
        return Ok(ClientConfig::default());
    };
    let config = Config::load_from(&path)
        .with_context(|| format!("loading config from {}", path.display()))?;
    tracing::debug!(path = %path.display(), "config loaded");
    Ok(config.client)
}
