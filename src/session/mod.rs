//! Duplex session subsystem.
//!
//! # Data Flow
//! ```text
//! Upgraded channel
//!     → FrameSource ──► receive loop ──► PendingFragments ──► MessageHandler
//!     → FrameSink   ◄── SessionHandle::send / close
//!
//! Iteration loop:
//!     TickHandler → idle check → (timeout) → close → join receive loop
//! ```
//!
//! # Design Decisions
//! - Transports are behind `FrameSource`/`FrameSink` so the engine never
//!   depends on axum directly
//! - Receive buffers come from one shared `BufferPool` per server

pub mod buffer_pool;
pub mod channel;
pub mod engine;
pub mod handler;
pub mod memory;
pub mod registry;

pub use buffer_pool::{BufferPool, PooledBuffer};
pub use channel::{FrameSink, FrameSource, MessageKind, Received, TransportError};
pub use engine::{
    CloseReason, Session, SessionHandle, SessionId, SessionReport, SessionSettings, SessionState,
    SessionStats,
};
pub use handler::{
    handler_fn, tick_fn, Discard, Echo, FixedDelay, HandlerError, MessageHandler, TickHandler,
};
pub use registry::{RegistrationGuard, SessionRegistry};
