//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum router with probe, issuance and duplex endpoints
//! - Wire up middleware (endpoint resolution, tracing, timeout, request ID,
//!   bearer gate)
//! - Cap concurrent connections on plain and TLS listeners
//! - Apply authentication settings from config reloads
//! - Serve plain or TLS listeners with graceful shutdown
//! - Stop and drain running sessions on shutdown

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{FromRef, Request, State};
use axum::response::Response;
use axum::routing::{any, get};
use axum::Router;
use axum_server::tls_rustls::{RustlsAcceptor, RustlsConfig};
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::config::{ServiceConfig, TlsConfig};
use crate::health::probes::{ProbeChecks, ProbeTable};
use crate::http::endpoints::{resolve_endpoint, EndpointResolver};
use crate::http::request::{make_request_span, propagate_request_id_layer, set_request_id_layer};
use crate::http::response::UnhandledResponse;
use crate::http::websocket::upgrade_handler;
use crate::net::listener::{BoundedListener, ConnectionLimit, LimitedAcceptor};
use crate::security::gate::{require_bearer, AuthGate, GateSettings};
use crate::security::issuance::{issue_token, Authenticator, IssuanceState, StaticCredentials};
use crate::session::buffer_pool::BufferPool;
use crate::session::engine::SessionSettings;
use crate::session::handler::{Echo, FixedDelay, MessageHandler, TickHandler};
use crate::session::registry::SessionRegistry;

const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Server failures.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("server I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to load TLS material: {0}")]
    Tls(#[source] std::io::Error),
}

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub gate: Arc<AuthGate>,
    pub authenticator: Arc<dyn Authenticator>,
    pub sessions: SessionRegistry,
    pub pool: Arc<BufferPool>,
    pub handler: Arc<dyn MessageHandler>,
    pub ticker: Arc<dyn TickHandler>,
    pub session_settings: SessionSettings,
    pub allowed_origins: Arc<Vec<String>>,
    pub unhandled: UnhandledResponse,
}

impl FromRef<AppState> for IssuanceState {
    fn from_ref(state: &AppState) -> Self {
        IssuanceState {
            gate: Arc::clone(&state.gate),
            authenticator: Arc::clone(&state.authenticator),
        }
    }
}

/// HTTP server hosting probes, token issuance and duplex sessions.
pub struct HttpServer {
    config: ServiceConfig,
    state: AppState,
    probe_checks: ProbeChecks,
}

impl HttpServer {
    /// Create a new HTTP server with the given configuration.
    ///
    /// Defaults: credentials from `auth.users`, echo message handler, fixed
    /// delay tick of `websocket.tick_interval_ms`, probes that always pass.
    pub fn new(config: ServiceConfig) -> Self {
        let state = AppState {
            gate: Arc::new(AuthGate::from_config(&config.auth)),
            authenticator: Arc::new(StaticCredentials::new(&config.auth.users)),
            sessions: SessionRegistry::new(),
            pool: BufferPool::new(config.websocket.receive_buffer_size),
            handler: Arc::new(Echo),
            ticker: Arc::new(FixedDelay(Duration::from_millis(
                config.websocket.tick_interval_ms,
            ))),
            session_settings: SessionSettings::from(&config.websocket),
            allowed_origins: Arc::new(config.websocket.allowed_origins.clone()),
            unhandled: UnhandledResponse::default(),
        };

        Self {
            config,
            state,
            probe_checks: ProbeChecks::default(),
        }
    }

    pub fn with_authenticator(mut self, authenticator: impl Authenticator) -> Self {
        self.state.authenticator = Arc::new(authenticator);
        self
    }

    pub fn with_message_handler(mut self, handler: impl MessageHandler) -> Self {
        self.state.handler = Arc::new(handler);
        self
    }

    pub fn with_tick_handler(mut self, ticker: impl TickHandler) -> Self {
        self.state.ticker = Arc::new(ticker);
        self
    }

    pub fn with_probe_checks(mut self, checks: ProbeChecks) -> Self {
        self.probe_checks = checks;
        self
    }

    pub fn with_unhandled_response(mut self, unhandled: UnhandledResponse) -> Self {
        self.state.unhandled = unhandled;
        self
    }

    /// Get a reference to the config.
    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn gate(&self) -> Arc<AuthGate> {
        Arc::clone(&self.state.gate)
    }

    pub fn sessions(&self) -> SessionRegistry {
        self.state.sessions.clone()
    }

    /// Number of sessions currently running.
    pub fn active_sessions(&self) -> usize {
        self.state.sessions.len()
    }

    pub fn buffer_pool(&self) -> Arc<BufferPool> {
        Arc::clone(&self.state.pool)
    }

    /// Build the Axum router with all middleware layers.
    ///
    /// Endpoint resolution wraps the routes so probe and issuance paths are
    /// matched ignoring case before routing.
    #[allow(deprecated)]
    pub fn router(&self) -> Router {
        let config = &self.config;

        let table = ProbeTable::from_config(&config.probes, self.probe_checks.clone());
        let resolver = EndpointResolver::new(
            &table,
            [config.auth.authentication_path.clone()],
            self.probe_checks.unknown_endpoint.clone(),
        );

        let duplex = get(upgrade_handler)
            .route_layer(axum::middleware::from_fn_with_state(
                Arc::clone(&self.state.gate),
                require_bearer,
            ))
            .fallback(unhandled_request);

        let routes = Router::new()
            .route(&config.auth.authentication_path, any(issue_token))
            .route(&config.websocket.path, duplex)
            .merge(table.into_router(self.state.unhandled.clone()))
            .fallback(unhandled_request)
            .with_state(self.state.clone());

        Router::new()
            .fallback_service(routes)
            .layer(axum::middleware::from_fn_with_state(resolver, resolve_endpoint))
            .layer(TimeoutLayer::new(Duration::from_secs(
                config.listener.request_timeout_secs,
            )))
            .layer(propagate_request_id_layer())
            .layer(TraceLayer::new_for_http().make_span_with(make_request_span))
            .layer(set_request_id_layer())
    }

    fn connection_limit(&self) -> ConnectionLimit {
        ConnectionLimit::new(self.config.listener.max_connections)
    }

    /// Run the server, accepting connections on the given listener.
    ///
    /// Authentication settings from `config_updates` are applied live. A
    /// message on `shutdown` stops accepting, stops every session and waits
    /// briefly for them to drain.
    pub async fn run(
        self,
        listener: TcpListener,
        config_updates: mpsc::UnboundedReceiver<ServiceConfig>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), ServerError> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let app = self.router();
        let sessions = self.sessions();
        let listener = BoundedListener::new(listener, self.connection_limit());
        tokio::spawn(apply_config_updates(self.gate(), config_updates));

        let stopping = sessions.clone();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("Shutdown signal received");
                stopping.stop_all();
            })
            .await?;

        drain(&sessions).await;
        tracing::info!("HTTP server stopped");
        Ok(())
    }

    /// Run the server over TLS on `addr`.
    pub async fn run_tls(
        self,
        addr: SocketAddr,
        tls: &TlsConfig,
        config_updates: mpsc::UnboundedReceiver<ServiceConfig>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), ServerError> {
        let rustls = RustlsConfig::from_pem_file(
            &tls.cert_path,
            &tls.key_path,
        )
        .await
        .map_err(ServerError::Tls)?;

        tracing::info!(address = %addr, "HTTPS server starting");

        let app = self.router();
        let sessions = self.sessions();
        let acceptor =
            RustlsAcceptor::new(rustls).acceptor(LimitedAcceptor::new(self.connection_limit()));
        tokio::spawn(apply_config_updates(self.gate(), config_updates));

        let handle = axum_server::Handle::new();
        let signal = handle.clone();
        let stopping = sessions.clone();
        tokio::spawn(async move {
            let _ = shutdown.recv().await;
            tracing::info!("Shutdown signal received");
            stopping.stop_all();
            signal.graceful_shutdown(Some(DRAIN_TIMEOUT));
        });

        axum_server::bind(addr)
            .acceptor(acceptor)
            .handle(handle)
            .serve(app.into_make_service())
            .await?;

        drain(&sessions).await;
        tracing::info!("HTTPS server stopped");
        Ok(())
    }
}

/// Fallback for requests no route or method handles.
async fn unhandled_request(State(state): State<AppState>, request: Request) -> Response {
    state.unhandled.handle(request).await
}

async fn apply_config_updates(
    gate: Arc<AuthGate>,
    mut updates: mpsc::UnboundedReceiver<ServiceConfig>,
) {
    while let Some(config) = updates.recv().await {
        gate.update(GateSettings::from_config(&config.auth));
        tracing::debug!("Listener, endpoint and session settings apply on restart");
    }
}

/// Wait until every session has left the registry, up to `DRAIN_TIMEOUT`.
async fn drain(sessions: &SessionRegistry) {
    let deadline = tokio::time::Instant::now() + DRAIN_TIMEOUT;
    while !sessions.is_empty() {
        if tokio::time::Instant::now() >= deadline {
            tracing::warn!(remaining = sessions.len(), "Sessions still open after drain timeout");
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
