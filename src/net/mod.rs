//! Network layer.
//!
//! # Data Flow
//! ```text
//! TCP accept
//!     → listener.rs (connection slot from the shared limit)
//!     → LimitedStream (slot released when the connection ends)
//!     → plain HTTP via axum::serve, or TLS via axum-server
//! ```
//!
//! # Design Decisions
//! - A slot is taken before the connection is handed to HTTP, so excess
//!   clients wait in the accept backlog
//! - Upgraded duplex sessions keep their slot for their whole lifetime

pub mod listener;

pub use listener::{BoundedListener, ConnectionLimit, LimitedAcceptor, LimitedStream};
