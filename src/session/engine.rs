//! Duplex session engine.
//!
//! # Responsibilities
//! - Own one authorized duplex channel from promotion until closure
//! - Run the receive loop: bounded-wait reads, fragment reassembly, dispatch
//! - Run the iteration loop: per-tick hook and idle-timeout enforcement
//! - Close the channel exactly once and wait for the receive loop to finish
//!
//! # State Machine
//! ```text
//! Created → Open → Closing → Closed
//! ```
//!
//! # Design Decisions
//! - The iteration loop is the only idle-timeout mechanism (no separate timer)
//! - Fragment buffers are leased from the shared `BufferPool` and returned on
//!   every exit path through RAII
//! - Handler failures and panics are counted and logged, never fatal
//! - Sends report failure as `false` instead of propagating transport errors

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures_util::FutureExt;
use tokio::sync::Mutex;
use tokio::time::Instant;
use uuid::Uuid;

use crate::config::WebSocketConfig;
use crate::observability::metrics;
use crate::security::gate::AuthContext;
use crate::session::buffer_pool::{BufferPool, PooledBuffer};
use crate::session::channel::{FrameSink, FrameSource, MessageKind, Received};
use crate::session::handler::{MessageHandler, TickHandler};

/// Opaque per-session identifier, used for log correlation only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

/// Lifecycle state of a session.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SessionState {
    Created = 0,
    Open = 1,
    Closing = 2,
    Closed = 3,
}

impl From<u8> for SessionState {
    fn from(val: u8) -> Self {
        match val {
            0 => SessionState::Created,
            1 => SessionState::Open,
            2 => SessionState::Closing,
            _ => SessionState::Closed,
        }
    }
}

/// Why a session left the open state.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// No send or receive activity within the session timeout.
    IdleTimeout = 1,
    /// The remote end closed the channel.
    PeerClosed = 2,
    /// Receiving from the channel failed.
    TransportFailure = 3,
    /// `close()` was called on the handle.
    Local = 4,
    /// An external stop request (for example process shutdown).
    Stopped = 5,
    /// The per-tick hook panicked.
    TickFailure = 6,
}

impl CloseReason {
    fn from_u8(val: u8) -> Option<Self> {
        match val {
            1 => Some(CloseReason::IdleTimeout),
            2 => Some(CloseReason::PeerClosed),
            3 => Some(CloseReason::TransportFailure),
            4 => Some(CloseReason::Local),
            5 => Some(CloseReason::Stopped),
            6 => Some(CloseReason::TickFailure),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CloseReason::IdleTimeout => "idle_timeout",
            CloseReason::PeerClosed => "peer_closed",
            CloseReason::TransportFailure => "transport_failure",
            CloseReason::Local => "local",
            CloseReason::Stopped => "stopped",
            CloseReason::TickFailure => "tick_failure",
        }
    }
}

/// Timing parameters of a session.
#[derive(Debug, Clone, Copy)]
pub struct SessionSettings {
    /// Maximum time without send/receive activity.
    pub session_timeout: Duration,
    /// Bounded wait of each receive.
    pub poll_interval: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            session_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_millis(250),
        }
    }
}

impl From<&WebSocketConfig> for SessionSettings {
    fn from(config: &WebSocketConfig) -> Self {
        Self {
            session_timeout: Duration::from_millis(config.session_timeout_ms),
            poll_interval: Duration::from_millis(config.poll_interval_ms),
        }
    }
}

#[derive(Debug, Default)]
struct SessionCounters {
    messages_received: AtomicU64,
    fragments_received: AtomicU64,
    bytes_received: AtomicU64,
    messages_sent: AtomicU64,
    send_failures: AtomicU64,
    callback_errors: AtomicU64,
    transport_errors: AtomicU64,
}

/// Point-in-time copy of a session's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub messages_received: u64,
    pub fragments_received: u64,
    pub bytes_received: u64,
    pub messages_sent: u64,
    pub send_failures: u64,
    pub callback_errors: u64,
    pub transport_errors: u64,
}

struct SessionShared {
    id: SessionId,
    auth: Option<AuthContext>,
    state: AtomicU8,
    close_reason: AtomicU8,
    close_attempted: AtomicBool,
    epoch: Instant,
    last_activity_ms: AtomicU64,
    sink: Mutex<Box<dyn FrameSink>>,
    counters: SessionCounters,
}

/// Cloneable handle to a running session.
///
/// Handed to message and tick handlers; also used by the server to stop
/// sessions on shutdown.
#[derive(Clone)]
pub struct SessionHandle {
    inner: Arc<SessionShared>,
}

impl fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.inner.id)
            .field("state", &self.state())
            .finish()
    }
}

impl SessionHandle {
    pub fn id(&self) -> SessionId {
        self.inner.id
    }

    /// Resource and policy the channel was authorized for, if the gate ran.
    pub fn auth(&self) -> Option<&AuthContext> {
        self.inner.auth.as_ref()
    }

    pub fn state(&self) -> SessionState {
        SessionState::from(self.inner.state.load(Ordering::Acquire))
    }

    pub fn is_open(&self) -> bool {
        self.state() == SessionState::Open
    }

    /// Why the session left the open state, once it has.
    pub fn close_reason(&self) -> Option<CloseReason> {
        CloseReason::from_u8(self.inner.close_reason.load(Ordering::Acquire))
    }

    pub fn stats(&self) -> SessionStats {
        let c = &self.inner.counters;
        SessionStats {
            messages_received: c.messages_received.load(Ordering::Relaxed),
            fragments_received: c.fragments_received.load(Ordering::Relaxed),
            bytes_received: c.bytes_received.load(Ordering::Relaxed),
            messages_sent: c.messages_sent.load(Ordering::Relaxed),
            send_failures: c.send_failures.load(Ordering::Relaxed),
            callback_errors: c.callback_errors.load(Ordering::Relaxed),
            transport_errors: c.transport_errors.load(Ordering::Relaxed),
        }
    }

    /// Time since the last successful send or receive.
    pub fn idle_for(&self) -> Duration {
        let last = Duration::from_millis(self.inner.last_activity_ms.load(Ordering::Relaxed));
        self.inner.epoch.elapsed().saturating_sub(last)
    }

    fn touch(&self) {
        let now = self.inner.epoch.elapsed().as_millis() as u64;
        self.inner.last_activity_ms.store(now, Ordering::Relaxed);
    }

    /// Send one complete message.
    ///
    /// Returns `false` if the transport rejected it or the session is already
    /// closing down; the cause is logged, not returned.
    pub async fn send(&self, message: impl Into<Bytes>, is_binary: bool) -> bool {
        let payload = message.into();
        let len = payload.len();

        if self.inner.close_attempted.load(Ordering::Acquire) {
            tracing::debug!(session_id = %self.id(), bytes = len, "Send after close dropped");
            return false;
        }

        tracing::debug!(session_id = %self.id(), bytes = len, "Sending message");
        let result = {
            let mut sink = self.inner.sink.lock().await;
            sink.send_message(payload, MessageKind::from_binary_flag(is_binary))
                .await
        };

        match result {
            Ok(()) => {
                self.touch();
                self.inner.counters.messages_sent.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(e) => {
                self.inner.counters.send_failures.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(session_id = %self.id(), bytes = len, error = %e, "Error sending message");
                false
            }
        }
    }

    /// Start the close handshake. Only the first call has any effect.
    ///
    /// Returns whether this call performed the close.
    pub async fn close(&self) -> bool {
        if self.inner.close_attempted.swap(true, Ordering::AcqRel) {
            tracing::trace!(session_id = %self.id(), "Close already attempted");
            return false;
        }

        self.begin_closing(CloseReason::Local);

        let mut sink = self.inner.sink.lock().await;
        match sink.close().await {
            Ok(()) => tracing::debug!(session_id = %self.id(), "Close handshake sent"),
            Err(e) => tracing::debug!(session_id = %self.id(), error = %e, "Close handshake failed"),
        }
        true
    }

    /// Force the session out of the open state.
    ///
    /// The receive loop observes this within one polling interval and the
    /// iteration loop then performs the close.
    pub fn stop(&self) {
        if self.begin_closing(CloseReason::Stopped) {
            tracing::info!(session_id = %self.id(), "Session stop requested");
        }
    }

    fn open(&self) {
        self.touch();
        self.inner
            .state
            .store(SessionState::Open as u8, Ordering::Release);
    }

    fn begin_closing(&self, reason: CloseReason) -> bool {
        let moved = self
            .inner
            .state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                if current < SessionState::Closing as u8 {
                    Some(SessionState::Closing as u8)
                } else {
                    None
                }
            })
            .is_ok();

        if moved {
            self.inner
                .close_reason
                .store(reason as u8, Ordering::Release);
        }
        moved
    }

    fn mark_closed(&self) {
        self.inner
            .state
            .store(SessionState::Closed as u8, Ordering::Release);
    }
}

/// Summary returned once a session has fully closed.
#[derive(Debug, Clone)]
pub struct SessionReport {
    pub id: SessionId,
    pub reason: Option<CloseReason>,
    pub stats: SessionStats,
    pub duration: Duration,
}

/// One duplex session, ready to run.
pub struct Session {
    handle: SessionHandle,
    source: Box<dyn FrameSource>,
    pool: Arc<BufferPool>,
    handler: Arc<dyn MessageHandler>,
    ticker: Arc<dyn TickHandler>,
    settings: SessionSettings,
}

impl Session {
    pub fn new(
        source: Box<dyn FrameSource>,
        sink: Box<dyn FrameSink>,
        pool: Arc<BufferPool>,
        handler: Arc<dyn MessageHandler>,
        ticker: Arc<dyn TickHandler>,
        settings: SessionSettings,
        auth: Option<AuthContext>,
    ) -> Self {
        let shared = SessionShared {
            id: SessionId::new(),
            auth,
            state: AtomicU8::new(SessionState::Created as u8),
            close_reason: AtomicU8::new(0),
            close_attempted: AtomicBool::new(false),
            epoch: Instant::now(),
            last_activity_ms: AtomicU64::new(0),
            sink: Mutex::new(sink),
            counters: SessionCounters::default(),
        };

        Self {
            handle: SessionHandle {
                inner: Arc::new(shared),
            },
            source,
            pool,
            handler,
            ticker,
            settings,
        }
    }

    pub fn handle(&self) -> SessionHandle {
        self.handle.clone()
    }

    /// Run the session until it closes.
    pub async fn run(self) -> SessionReport {
        let Session {
            handle,
            source,
            pool,
            handler,
            ticker,
            settings,
        } = self;

        let started = Instant::now();
        let _active = metrics::ActiveSessionGuard::new();
        handle.open();

        tracing::info!(
            session_id = %handle.id(),
            resource_uri = handle.auth().map(|a| a.resource_uri.as_str()).unwrap_or("-"),
            timeout_ms = settings.session_timeout.as_millis() as u64,
            "Session opened"
        );

        let receiver = tokio::spawn(receive_loop(
            source,
            handle.clone(),
            pool,
            handler,
            settings.poll_interval,
        ));

        while handle.is_open() {
            if handle.idle_for() >= settings.session_timeout {
                handle.begin_closing(CloseReason::IdleTimeout);
                tracing::info!(
                    session_id = %handle.id(),
                    idle_ms = handle.idle_for().as_millis() as u64,
                    "Session idle timeout elapsed"
                );
                break;
            }

            let iteration = Instant::now();
            if AssertUnwindSafe(ticker.tick(&handle))
                .catch_unwind()
                .await
                .is_err()
            {
                metrics::record_session_error("tick");
                tracing::error!(session_id = %handle.id(), "Session tick panicked, closing");
                handle.begin_closing(CloseReason::TickFailure);
                break;
            }
            metrics::record_iteration(iteration.elapsed());
        }

        tracing::debug!(session_id = %handle.id(), "Session iteration complete, closing");
        handle.close().await;

        if let Err(e) = receiver.await {
            handle
                .inner
                .counters
                .transport_errors
                .fetch_add(1, Ordering::Relaxed);
            metrics::record_session_error("transport");
            tracing::error!(session_id = %handle.id(), error = %e, "Receive loop terminated abnormally");
        }

        handle.mark_closed();

        let report = SessionReport {
            id: handle.id(),
            reason: handle.close_reason(),
            stats: handle.stats(),
            duration: started.elapsed(),
        };

        tracing::info!(
            session_id = %report.id,
            reason = report.reason.map(|r| r.as_str()).unwrap_or("unknown"),
            messages = report.stats.messages_received,
            duration_ms = report.duration.as_millis() as u64,
            "Session closed"
        );
        report
    }
}

/// Fragments of the message currently being assembled.
///
/// Owns its leased buffers; clearing or dropping the list returns them.
struct PendingFragments {
    fragments: Vec<(PooledBuffer, usize)>,
}

impl PendingFragments {
    fn new() -> Self {
        Self {
            fragments: Vec::new(),
        }
    }

    fn push(&mut self, buffer: PooledBuffer, count: usize) {
        self.fragments.push((buffer, count));
    }

    fn len(&self) -> usize {
        self.fragments.len()
    }

    /// Concatenate all fragments in arrival order and release their buffers.
    fn assemble(&mut self) -> Bytes {
        let total = self.fragments.iter().map(|(_, count)| *count).sum();
        let mut message = BytesMut::with_capacity(total);
        for (buffer, count) in self.fragments.drain(..) {
            message.extend_from_slice(&buffer[..count]);
        }
        message.freeze()
    }

    fn release(&mut self) {
        self.fragments.clear();
    }
}

async fn receive_loop(
    mut source: Box<dyn FrameSource>,
    handle: SessionHandle,
    pool: Arc<BufferPool>,
    handler: Arc<dyn MessageHandler>,
    poll_interval: Duration,
) {
    let counters = &handle.inner.counters;
    let mut pending = PendingFragments::new();
    let mut buffer = pool.take();

    tracing::debug!(session_id = %handle.id(), "Receive loop starting");

    while handle.is_open() {
        let received =
            match tokio::time::timeout(poll_interval, source.receive(&mut buffer[..])).await {
                Ok(received) => received,
                Err(_elapsed) => continue,
            };

        match received {
            Ok(Received::Fragment {
                count,
                end_of_message,
            }) => {
                handle.touch();

                if count > 0 {
                    counters.fragments_received.fetch_add(1, Ordering::Relaxed);
                    counters
                        .bytes_received
                        .fetch_add(count as u64, Ordering::Relaxed);
                    let filled = std::mem::replace(&mut buffer, pool.take());
                    pending.push(filled, count);
                }

                if end_of_message {
                    let message = pending.assemble();
                    if !handle.is_open() {
                        tracing::debug!(session_id = %handle.id(), bytes = message.len(), "Session closing, message dropped");
                        break;
                    }
                    counters.messages_received.fetch_add(1, Ordering::Relaxed);
                    dispatch(&handle, handler.as_ref(), message).await;
                }
            }
            Ok(Received::Closed) => {
                tracing::debug!(session_id = %handle.id(), "Peer closed the channel");
                handle.begin_closing(CloseReason::PeerClosed);
                break;
            }
            Err(e) => {
                counters.transport_errors.fetch_add(1, Ordering::Relaxed);
                metrics::record_session_error("transport");
                tracing::error!(
                    session_id = %handle.id(),
                    error = %e,
                    pending_fragments = pending.len(),
                    "Error in receive loop"
                );
                pending.release();
                handle.begin_closing(CloseReason::TransportFailure);
                break;
            }
        }
    }

    pending.release();
    drop(buffer);
    tracing::debug!(session_id = %handle.id(), "Receive loop ended");
}

async fn dispatch(handle: &SessionHandle, handler: &dyn MessageHandler, message: Bytes) {
    let started = Instant::now();
    let bytes = message.len();

    let outcome = AssertUnwindSafe(handler.on_message(handle.clone(), message))
        .catch_unwind()
        .await;

    let failure = match outcome {
        Ok(Ok(())) => None,
        Ok(Err(e)) => Some(e.to_string()),
        Err(_panic) => Some("message handler panicked".to_string()),
    };

    if let Some(error) = failure {
        handle
            .inner
            .counters
            .callback_errors
            .fetch_add(1, Ordering::Relaxed);
        metrics::record_session_error("callback");
        tracing::error!(session_id = %handle.id(), bytes, error = %error, "Error processing received message");
    }

    metrics::record_receive(started.elapsed());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::handler::{handler_fn, Discard, FixedDelay, HandlerError};
    use crate::session::memory::{self, MemoryPeer, Outbound};
    use std::sync::Mutex as StdMutex;

    fn fast_settings() -> SessionSettings {
        SessionSettings {
            session_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_millis(20),
        }
    }

    fn build(
        handler: Arc<dyn MessageHandler>,
        settings: SessionSettings,
        buffer_size: usize,
    ) -> (Session, MemoryPeer, Arc<BufferPool>) {
        let (source, sink, peer) = memory::pair();
        let pool = BufferPool::new(buffer_size);
        let session = Session::new(
            Box::new(source),
            Box::new(sink),
            Arc::clone(&pool),
            handler,
            Arc::new(FixedDelay(Duration::from_millis(10))),
            settings,
            None,
        );
        (session, peer, pool)
    }

    fn recording_handler() -> (Arc<dyn MessageHandler>, Arc<StdMutex<Vec<Bytes>>>) {
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let handler = handler_fn(move |_session, message| {
            let sink = Arc::clone(&sink);
            async move {
                sink.lock().unwrap().push(message);
                Ok::<(), HandlerError>(())
            }
        });
        (Arc::new(handler), seen)
    }

    async fn wait_for(condition: impl Fn() -> bool) {
        for _ in 0..300 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached in time");
    }

    #[tokio::test]
    async fn three_fragments_reassemble_in_order() {
        let (handler, seen) = recording_handler();
        let (session, peer, pool) = build(handler, fast_settings(), 256);
        let handle = session.handle();
        let task = tokio::spawn(session.run());

        peer.push_fragment(vec![1u8; 100], false);
        peer.push_fragment(vec![2u8; 250], false);
        peer.push_fragment(vec![3u8; 50], true);

        let probe = Arc::clone(&seen);
        wait_for(move || probe.lock().unwrap().len() == 1).await;

        handle.close().await;
        let report = task.await.unwrap();

        let messages = seen.lock().unwrap();
        let message = &messages[0];
        assert_eq!(message.len(), 400);
        let mut expected = vec![1u8; 100];
        expected.extend(vec![2u8; 250]);
        expected.extend(vec![3u8; 50]);
        assert_eq!(&message[..], &expected[..]);

        assert_eq!(report.stats.fragments_received, 3);
        assert_eq!(pool.leased(), 4);
        assert_eq!(pool.returned(), 4);
        assert_eq!(pool.outstanding(), 0);
    }

    #[tokio::test]
    async fn messages_delivered_in_arrival_order() {
        let (handler, seen) = recording_handler();
        let (session, peer, pool) = build(handler, fast_settings(), 8);
        let handle = session.handle();
        let task = tokio::spawn(session.run());

        for i in 0..5u8 {
            peer.push_fragment(vec![i; 3], false);
            peer.push_fragment(vec![i + 100; 12], true);
        }

        let probe = Arc::clone(&seen);
        wait_for(move || probe.lock().unwrap().len() == 5).await;
        handle.close().await;
        task.await.unwrap();

        let messages = seen.lock().unwrap();
        for (i, message) in messages.iter().enumerate() {
            let i = i as u8;
            assert_eq!(message.len(), 15);
            assert!(message[..3].iter().all(|b| *b == i));
            assert!(message[3..].iter().all(|b| *b == i + 100));
        }
        assert_eq!(pool.outstanding(), 0);
    }

    #[tokio::test]
    async fn callback_failure_does_not_stop_receiving() {
        let attempts = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&attempts);
        let handler = handler_fn(move |_session, message: Bytes| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                if &message[..] == b"first" {
                    Err::<(), HandlerError>("rejected".into())
                } else {
                    Ok(())
                }
            }
        });
        let (session, peer, _pool) = build(Arc::new(handler), fast_settings(), 64);
        let handle = session.handle();
        let task = tokio::spawn(session.run());

        peer.push_message("first");
        peer.push_message("second");

        let probe = Arc::clone(&attempts);
        wait_for(move || probe.load(Ordering::SeqCst) == 2).await;

        assert!(handle.is_open());
        assert_eq!(handle.stats().callback_errors, 1);
        assert_eq!(handle.stats().messages_received, 2);

        handle.close().await;
        task.await.unwrap();
    }

    #[tokio::test]
    async fn panicking_callback_is_contained() {
        let handler = handler_fn(|_session, message: Bytes| async move {
            if &message[..] == b"boom" {
                panic!("handler exploded");
            }
            Ok::<(), HandlerError>(())
        });
        let (session, peer, _pool) = build(Arc::new(handler), fast_settings(), 64);
        let handle = session.handle();
        let task = tokio::spawn(session.run());

        peer.push_message("boom");
        peer.push_message("fine");

        let probe = handle.clone();
        wait_for(move || probe.stats().messages_received == 2).await;
        assert!(handle.is_open());
        assert_eq!(handle.stats().callback_errors, 1);

        handle.close().await;
        task.await.unwrap();
    }

    #[tokio::test]
    async fn transport_error_mid_message_returns_buffers() {
        let (handler, seen) = recording_handler();
        let (session, peer, pool) = build(handler, fast_settings(), 64);

        peer.push_fragment(vec![9u8; 40], false);
        peer.push_error("connection reset");

        let report = session.run().await;

        assert_eq!(report.reason, Some(CloseReason::TransportFailure));
        assert_eq!(report.stats.transport_errors, 1);
        assert!(seen.lock().unwrap().is_empty());
        assert_eq!(pool.leased(), 2);
        assert_eq!(pool.outstanding(), 0);
        assert_eq!(peer.close_calls(), 1);
    }

    #[tokio::test]
    async fn peer_close_ends_session() {
        let (session, peer, pool) = build(Arc::new(Discard), fast_settings(), 64);
        peer.push_message("hello");
        peer.close();

        let report = session.run().await;
        assert_eq!(report.reason, Some(CloseReason::PeerClosed));
        assert_eq!(report.stats.messages_received, 1);
        assert_eq!(pool.outstanding(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_session_times_out() {
        let settings = SessionSettings {
            session_timeout: Duration::from_millis(500),
            poll_interval: Duration::from_millis(250),
        };
        let (source, sink, peer) = memory::pair();
        let pool = BufferPool::new(64);
        let session = Session::new(
            Box::new(source),
            Box::new(sink),
            Arc::clone(&pool),
            Arc::new(Discard),
            Arc::new(FixedDelay(Duration::from_millis(100))),
            settings,
            None,
        );
        let handle = session.handle();

        let started = Instant::now();
        let report = session.run().await;
        let elapsed = started.elapsed();

        assert_eq!(report.reason, Some(CloseReason::IdleTimeout));
        assert!(elapsed >= Duration::from_millis(500), "closed too early: {elapsed:?}");
        assert!(elapsed <= Duration::from_millis(750), "closed too late: {elapsed:?}");
        assert_eq!(handle.state(), SessionState::Closed);
        assert_eq!(peer.close_calls(), 1);
        assert_eq!(pool.outstanding(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn message_after_idle_timeout_is_not_delivered() {
        let settings = SessionSettings {
            session_timeout: Duration::from_millis(500),
            poll_interval: Duration::from_millis(250),
        };
        let (handler, seen) = recording_handler();
        let (session, peer, pool) = build(handler, settings, 64);
        let handle = session.handle();
        let task = tokio::spawn(session.run());

        let watched = handle.clone();
        wait_for(move || watched.is_open()).await;
        let watched = handle.clone();
        wait_for(move || !watched.is_open()).await;

        // The receive loop is still inside its poll window.
        peer.push_message("too late");

        let report = task.await.unwrap();
        assert_eq!(report.reason, Some(CloseReason::IdleTimeout));
        assert!(seen.lock().unwrap().is_empty());
        assert_eq!(report.stats.messages_received, 0);
        assert_eq!(handle.state(), SessionState::Closed);
        assert_eq!(pool.outstanding(), 0);
    }

    #[tokio::test]
    async fn close_twice_is_noop() {
        let (session, peer, _pool) = build(Arc::new(Discard), fast_settings(), 64);
        let handle = session.handle();
        let task = tokio::spawn(session.run());

        let probe = handle.clone();
        wait_for(move || probe.is_open()).await;

        assert!(handle.close().await);
        assert!(!handle.close().await);

        let report = task.await.unwrap();
        assert_eq!(report.reason, Some(CloseReason::Local));
        assert_eq!(handle.state(), SessionState::Closed);
        assert_eq!(peer.close_calls(), 1);
        assert!(!handle.close().await);
    }

    #[tokio::test]
    async fn send_reports_failure_without_closing() {
        let (session, mut peer, _pool) = build(Arc::new(Discard), fast_settings(), 64);
        let handle = session.handle();
        let task = tokio::spawn(session.run());

        let probe = handle.clone();
        wait_for(move || probe.is_open()).await;

        assert!(handle.send("hello", false).await);
        assert_eq!(
            peer.next_outbound().await,
            Some(Outbound::Message {
                payload: Bytes::from_static(b"hello"),
                kind: MessageKind::Text,
            })
        );

        peer.fail_sends(true);
        assert!(!handle.send(vec![1u8, 2, 3], true).await);
        assert!(handle.is_open());

        let stats = handle.stats();
        assert_eq!(stats.messages_sent, 1);
        assert_eq!(stats.send_failures, 1);

        handle.close().await;
        task.await.unwrap();
        assert!(!handle.send("late", false).await);
    }

    #[tokio::test]
    async fn stopped_session_delivers_nothing_further() {
        let (handler, seen) = recording_handler();
        let (session, peer, pool) = build(handler, fast_settings(), 64);
        let handle = session.handle();
        let task = tokio::spawn(session.run());

        let probe = handle.clone();
        wait_for(move || probe.is_open()).await;

        handle.stop();
        peer.push_message("late");

        let report = task.await.unwrap();
        assert_eq!(report.reason, Some(CloseReason::Stopped));
        assert!(seen.lock().unwrap().is_empty());
        assert_eq!(pool.outstanding(), 0);
    }
}
