//! Probe gate service.
//!
//! Liveness/readiness probes plus a WebSocket endpoint guarded by signed,
//! time-bounded bearer tokens.
//!
//! # Architecture Overview
//!
//! ```text
//!                      ┌───────────────────────────────────────────────────┐
//!                      │                    PROBE GATE                      │
//!                      │                                                    │
//!   GET /Availability  │  ┌─────────┐    ┌──────────────┐                   │
//!   GET /Health ───────┼─▶│  http   │───▶│    health    │ 200 / 404         │
//!                      │  │ server  │    │    probes    │                   │
//!   POST /auth ────────┼─▶│         │───▶│   security   │ access_token      │
//!                      │  │         │    │   issuance   │                   │
//!   GET /ws (Bearer) ──┼─▶│         │───▶│ security gate│──┐                │
//!                      │  └─────────┘    └──────────────┘  │                │
//!                      │                                   ▼                │
//!                      │                 ┌──────────────────────────────┐   │
//!                      │                 │ session engine               │   │
//!                      │                 │  receive loop ◀─ buffer pool │   │
//!                      │                 │  iteration loop (idle check) │   │
//!                      │                 └──────────────────────────────┘   │
//!                      │                                                    │
//!                      │  config (TOML + watcher) · observability · lifecycle│
//!                      └───────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;

use probe_gate::config::{load_config, validate_config, ServiceConfig};
use probe_gate::lifecycle::{self, signals, Shutdown};
use probe_gate::observability::logging;

#[derive(Parser)]
#[command(name = "probe-gate")]
#[command(about = "Health probes and token-gated WebSocket sessions", long_about = None)]
struct Cli {
    /// Path to a TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override `listener.bind_address`.
    #[arg(short, long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => ServiceConfig::default(),
    };
    if let Some(bind) = cli.bind {
        config.listener.bind_address = bind;
    }

    logging::init(
        &config.observability.log_level,
        config.observability.json_logs,
    );

    tracing::info!("probe-gate v{} starting", env!("CARGO_PKG_VERSION"));

    if let Err(errors) = validate_config(&config) {
        for error in &errors {
            tracing::error!(field = error.field, message = %error.message, "Invalid configuration");
        }
        return Err(format!("{} configuration error(s)", errors.len()).into());
    }

    tracing::info!(
        bind_address = %config.listener.bind_address,
        websocket_path = %config.websocket.path,
        auth_enabled = config.auth.enabled,
        session_timeout_ms = config.websocket.session_timeout_ms,
        "Configuration loaded"
    );

    let shutdown = Shutdown::new();
    signals::spawn_signal_handler(shutdown.clone());

    lifecycle::start(config, cli.config.as_deref(), &shutdown).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
