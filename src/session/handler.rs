//! Behaviors injected into a session.
//!
//! A session is composed from a `MessageHandler` (called once per reassembled
//! inbound message) and a `TickHandler` (called once per iteration of the
//! session loop). Closures can be adapted with `handler_fn` and `tick_fn`.

use std::future::Future;
use std::time::Duration;

use bytes::Bytes;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;

use crate::session::engine::SessionHandle;

/// Error returned by application message handling.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Receives fully reassembled inbound messages.
pub trait MessageHandler: Send + Sync + 'static {
    fn on_message(
        &self,
        session: SessionHandle,
        message: Bytes,
    ) -> BoxFuture<'static, Result<(), HandlerError>>;
}

/// Per-iteration hook of the session loop.
pub trait TickHandler: Send + Sync + 'static {
    fn tick<'a>(&'a self, session: &'a SessionHandle) -> BoxFuture<'a, ()>;
}

/// Default tick: wait a fixed delay and do nothing else.
#[derive(Debug, Clone, Copy)]
pub struct FixedDelay(pub Duration);

impl TickHandler for FixedDelay {
    fn tick<'a>(&'a self, _session: &'a SessionHandle) -> BoxFuture<'a, ()> {
        tokio::time::sleep(self.0).boxed()
    }
}

/// Handler that drops every message.
#[derive(Debug, Clone, Copy, Default)]
pub struct Discard;

impl MessageHandler for Discard {
    fn on_message(
        &self,
        _session: SessionHandle,
        _message: Bytes,
    ) -> BoxFuture<'static, Result<(), HandlerError>> {
        futures_util::future::ready(Ok(())).boxed()
    }
}

/// Handler that sends every message back to its sender.
///
/// Handlers see only the reassembled payload, so the frame kind is picked
/// again: valid UTF-8 goes back as text, anything else as binary. A binary
/// frame that happens to hold valid UTF-8 is echoed as text.
#[derive(Debug, Clone, Copy, Default)]
pub struct Echo;

impl MessageHandler for Echo {
    fn on_message(
        &self,
        session: SessionHandle,
        message: Bytes,
    ) -> BoxFuture<'static, Result<(), HandlerError>> {
        async move {
            let is_binary = std::str::from_utf8(&message).is_err();
            if session.send(message, is_binary).await {
                Ok(())
            } else {
                Err("echo send failed".into())
            }
        }
        .boxed()
    }
}

/// Adapter turning a closure into a `MessageHandler`.
pub struct HandlerFn<F>(F);

/// Build a `MessageHandler` from an async closure.
pub fn handler_fn<F, Fut>(f: F) -> HandlerFn<F>
where
    F: Fn(SessionHandle, Bytes) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    HandlerFn(f)
}

impl<F, Fut> MessageHandler for HandlerFn<F>
where
    F: Fn(SessionHandle, Bytes) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    fn on_message(
        &self,
        session: SessionHandle,
        message: Bytes,
    ) -> BoxFuture<'static, Result<(), HandlerError>> {
        (self.0)(session, message).boxed()
    }
}

/// Adapter turning a closure into a `TickHandler`.
pub struct TickFn<F>(F);

/// Build a `TickHandler` from an async closure taking an owned handle.
pub fn tick_fn<F, Fut>(f: F) -> TickFn<F>
where
    F: Fn(SessionHandle) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    TickFn(f)
}

impl<F, Fut> TickHandler for TickFn<F>
where
    F: Fn(SessionHandle) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    fn tick<'a>(&'a self, session: &'a SessionHandle) -> BoxFuture<'a, ()> {
        (self.0)(session.clone()).boxed()
    }
}
