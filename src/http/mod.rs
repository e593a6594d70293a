//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP/TLS connection (net::listener slot)
//!     → server.rs (Axum setup, middleware)
//!     → request.rs (request ID, tracing span)
//!     → endpoints.rs (case folding, unknown-endpoint policy)
//!     → /Availability, /Health      → health::probes
//!     → /auth                       → security::issuance
//!     → /ws   → security::gate      → websocket.rs → session::Session
//!     → anything else               → response.rs (hook, then unhandled)
//! ```

pub mod endpoints;
pub mod request;
pub mod response;
pub mod server;
pub mod websocket;

pub use request::{RequestIdExt, X_REQUEST_ID};
pub use endpoints::{resolve_endpoint, EndpointResolver};
pub use response::{unhandled_hook, UnhandledHook, UnhandledResponse, ValuePayload};
pub use server::{AppState, HttpServer, ServerError};
