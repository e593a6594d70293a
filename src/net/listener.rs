//! Connection-limited listeners.
//!
//! # Responsibilities
//! - Enforce `listener.max_connections` with a semaphore
//! - Adapt the limit to `axum::serve` (plain) and `axum-server` (TLS)
//! - Retry transient accept errors

use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use axum_server::accept::Accept;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Shared cap on concurrently open connections.
#[derive(Debug, Clone)]
pub struct ConnectionLimit {
    permits: Arc<Semaphore>,
    max_connections: usize,
}

impl ConnectionLimit {
    pub fn new(max_connections: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(max_connections)),
            max_connections,
        }
    }

    /// Wait for a free connection slot.
    pub async fn acquire(&self) -> Option<OwnedSemaphorePermit> {
        match Arc::clone(&self.permits).acquire_owned().await {
            Ok(permit) => Some(permit),
            Err(_) => {
                tracing::error!("Connection limit closed, admitting without a slot");
                None
            }
        }
    }

    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    pub fn max_connections(&self) -> usize {
        self.max_connections
    }
}

/// A stream holding a connection slot until it is dropped.
#[derive(Debug)]
pub struct LimitedStream<S> {
    inner: S,
    _permit: Option<OwnedSemaphorePermit>,
}

impl<S> LimitedStream<S> {
    pub fn new(inner: S, permit: Option<OwnedSemaphorePermit>) -> Self {
        Self {
            inner,
            _permit: permit,
        }
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for LimitedStream<S> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for LimitedStream<S> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }

    fn poll_write_vectored(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write_vectored(cx, bufs)
    }

    fn is_write_vectored(&self) -> bool {
        self.inner.is_write_vectored()
    }
}

/// TCP listener that accepts only while a connection slot is free.
pub struct BoundedListener {
    inner: TcpListener,
    limit: ConnectionLimit,
}

impl BoundedListener {
    pub fn new(inner: TcpListener, limit: ConnectionLimit) -> Self {
        tracing::info!(
            max_connections = limit.max_connections(),
            "Connection limit applied"
        );
        Self { inner, limit }
    }

    pub fn limit(&self) -> &ConnectionLimit {
        &self.limit
    }
}

impl axum::serve::Listener for BoundedListener {
    type Io = LimitedStream<TcpStream>;
    type Addr = SocketAddr;

    async fn accept(&mut self) -> (Self::Io, Self::Addr) {
        // Slot first, so excess clients queue in the backlog.
        let permit = self.limit.acquire().await;

        loop {
            match self.inner.accept().await {
                Ok((stream, addr)) => {
                    tracing::debug!(
                        peer_addr = %addr,
                        available = self.limit.available(),
                        "Connection accepted"
                    );
                    return (LimitedStream::new(stream, permit), addr);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Accept failed, retrying");
                    tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
                }
            }
        }
    }

    fn local_addr(&self) -> io::Result<Self::Addr> {
        self.inner.local_addr()
    }
}

/// `axum-server` acceptor taking a connection slot before TLS runs.
#[derive(Debug, Clone)]
pub struct LimitedAcceptor {
    limit: ConnectionLimit,
}

impl LimitedAcceptor {
    pub fn new(limit: ConnectionLimit) -> Self {
        Self { limit }
    }
}

impl<S> Accept<TcpStream, S> for LimitedAcceptor
where
    S: Send + 'static,
{
    type Stream = LimitedStream<TcpStream>;
    type Service = S;
    type Future = BoxFuture<'static, io::Result<(Self::Stream, Self::Service)>>;

    fn accept(&self, stream: TcpStream, service: S) -> Self::Future {
        let limit = self.limit.clone();
        async move {
            let permit = limit.acquire().await;
            Ok((LimitedStream::new(stream, permit), service))
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::serve::Listener;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn slots_return_when_released() {
        let limit = ConnectionLimit::new(2);
        let first = limit.acquire().await;
        let second = limit.acquire().await;
        assert_eq!(limit.available(), 0);

        drop(first);
        assert_eq!(limit.available(), 1);
        drop(second);
        assert_eq!(limit.available(), 2);
    }

    #[tokio::test]
    async fn listener_waits_for_a_free_slot() {
        let tcp = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = tcp.local_addr().unwrap();
        let mut listener = BoundedListener::new(tcp, ConnectionLimit::new(1));

        let _client_a = TcpStream::connect(addr).await.unwrap();
        let (server_a, _) = listener.accept().await;
        assert_eq!(listener.limit().available(), 0);

        let mut client_b = TcpStream::connect(addr).await.unwrap();
        let blocked = tokio::time::timeout(Duration::from_millis(200), listener.accept()).await;
        assert!(blocked.is_err(), "second connection admitted over the limit");

        drop(server_a);
        let (mut server_b, _) = tokio::time::timeout(Duration::from_secs(2), listener.accept())
            .await
            .expect("slot was not released");
        assert_eq!(listener.limit().available(), 0);

        client_b.write_all(b"ok").await.unwrap();
        let mut buf = [0u8; 2];
        server_b.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ok");
    }
}
