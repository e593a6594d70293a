//! Duplex channel seam.
//!
//! A physical channel is split into a receiving half (`FrameSource`) owned by
//! the receive loop and a sending half (`FrameSink`) shared behind the session
//! handle. The HTTP layer adapts upgraded WebSockets to these traits; the
//! in-memory transport in `session::memory` implements them for tests.

use bytes::Bytes;
use futures_util::future::BoxFuture;
use thiserror::Error;

/// I/O failure on a duplex channel.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The underlying connection failed.
    #[error("transport I/O failed: {0}")]
    Io(String),

    /// The channel was already closed when the operation was attempted.
    #[error("channel already closed")]
    Closed,

    /// A text payload was not valid UTF-8.
    #[error("text payload is not valid UTF-8")]
    InvalidText,
}

/// Outcome of one bounded receive on a `FrameSource`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Received {
    /// `count` bytes were written to the front of the buffer.
    Fragment {
        count: usize,
        end_of_message: bool,
    },
    /// The peer closed the channel.
    Closed,
}

/// Payload kind of an outbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Text,
    Binary,
}

impl MessageKind {
    pub fn from_binary_flag(is_binary: bool) -> Self {
        if is_binary {
            MessageKind::Binary
        } else {
            MessageKind::Text
        }
    }
}

/// Receiving half of a duplex channel.
///
/// `receive` must be cancel-safe: the receive loop wraps it in a bounded wait
/// and drops the future when the wait elapses, so no data may be lost when the
/// future is dropped before completion.
pub trait FrameSource: Send + 'static {
    fn receive<'a>(
        &'a mut self,
        buffer: &'a mut [u8],
    ) -> BoxFuture<'a, Result<Received, TransportError>>;
}

/// Sending half of a duplex channel.
pub trait FrameSink: Send + 'static {
    /// Send one complete message.
    fn send_message(
        &mut self,
        payload: Bytes,
        kind: MessageKind,
    ) -> BoxFuture<'_, Result<(), TransportError>>;

    /// Start the graceful close handshake.
    fn close(&mut self) -> BoxFuture<'_, Result<(), TransportError>>;
}
