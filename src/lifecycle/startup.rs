//! Startup orchestration.
//!
//! # Responsibilities
//! - Start the metrics exporter and config watcher
//! - Bind the listener and run the server until shutdown
//!
//! # Design Decisions
//! - Fail fast: bind and TLS errors are fatal
//! - Listeners start last (traffic only when ready)

use std::net::SocketAddr;
use std::path::Path;

use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use crate::config::{ConfigWatcher, ServiceConfig};
use crate::http::{HttpServer, ServerError};
use crate::lifecycle::shutdown::Shutdown;
use crate::observability::metrics;

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("invalid bind address '{0}'")]
    BindAddress(String),

    #[error("failed to bind {address}: {source}")]
    Bind {
        address: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Server(#[from] ServerError),
}

/// Start all subsystems and serve until `shutdown` fires.
///
/// When `config_path` is set, the file is watched and authentication
/// settings are reloaded on change.
pub async fn start(
    config: ServiceConfig,
    config_path: Option<&Path>,
    shutdown: &Shutdown,
) -> Result<(), StartupError> {
    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    // The watcher stops when dropped; keep it for the server's lifetime.
    let (_watcher, config_updates) = match config_path {
        Some(path) => {
            let (watcher, updates) = ConfigWatcher::new(path, config.clone());
            match watcher.run() {
                Ok(handle) => (Some(handle), updates),
                Err(e) => {
                    tracing::warn!(error = %e, "Config watcher unavailable, hot reload disabled");
                    (None, updates)
                }
            }
        }
        None => (None, mpsc::unbounded_channel().1),
    };

    let address: SocketAddr = config
        .listener
        .bind_address
        .parse()
        .map_err(|_| StartupError::BindAddress(config.listener.bind_address.clone()))?;

    let tls = config.listener.tls.clone();
    let server = HttpServer::new(config);

    match tls {
        Some(tls) => {
            server
                .run_tls(address, &tls, config_updates, shutdown.subscribe())
                .await?
        }
        None => {
            let listener = TcpListener::bind(address)
                .await
                .map_err(|source| StartupError::Bind { address, source })?;
            tracing::info!(address = %address, "Listening for connections");
            server
                .run(listener, config_updates, shutdown.subscribe())
                .await?
        }
    }

    Ok(())
}
