//! In-process duplex transport.
//!
//! `pair()` returns the two channel halves a session consumes plus a
//! `MemoryPeer` that plays the remote end: it scripts inbound fragments,
//! transport errors and closure, and observes what the session sent.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tokio::sync::mpsc;

use crate::session::channel::{FrameSink, FrameSource, MessageKind, Received, TransportError};

enum Inbound {
    Fragment { data: Vec<u8>, end_of_message: bool },
    Fail(String),
    Close,
}

/// Something the session wrote to the channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Message { payload: Bytes, kind: MessageKind },
    Close,
}

#[derive(Debug, Default)]
struct PeerFlags {
    fail_sends: AtomicBool,
    close_calls: AtomicUsize,
}

/// Receiving half backed by an unbounded queue.
pub struct MemorySource {
    inbound: mpsc::UnboundedReceiver<Inbound>,
    carry: Option<(Vec<u8>, usize, bool)>,
}

/// Sending half that forwards to the peer.
pub struct MemorySink {
    outbound: mpsc::UnboundedSender<Outbound>,
    flags: Arc<PeerFlags>,
}

/// The remote end of an in-memory channel.
pub struct MemoryPeer {
    inbound: mpsc::UnboundedSender<Inbound>,
    outbound: mpsc::UnboundedReceiver<Outbound>,
    flags: Arc<PeerFlags>,
}

/// Create a connected in-memory channel.
pub fn pair() -> (MemorySource, MemorySink, MemoryPeer) {
    let (in_tx, in_rx) = mpsc::unbounded_channel();
    let (out_tx, out_rx) = mpsc::unbounded_channel();
    let flags = Arc::new(PeerFlags::default());

    (
        MemorySource {
            inbound: in_rx,
            carry: None,
        },
        MemorySink {
            outbound: out_tx,
            flags: Arc::clone(&flags),
        },
        MemoryPeer {
            inbound: in_tx,
            outbound: out_rx,
            flags,
        },
    )
}

impl MemoryPeer {
    /// Deliver one physical fragment.
    pub fn push_fragment(&self, data: impl Into<Vec<u8>>, end_of_message: bool) {
        let _ = self.inbound.send(Inbound::Fragment {
            data: data.into(),
            end_of_message,
        });
    }

    /// Deliver a whole message as a single fragment.
    pub fn push_message(&self, data: impl Into<Vec<u8>>) {
        self.push_fragment(data, true);
    }

    /// Make the next receive fail with a transport error.
    pub fn push_error(&self, cause: impl Into<String>) {
        let _ = self.inbound.send(Inbound::Fail(cause.into()));
    }

    /// Close the channel from the remote side.
    pub fn close(&self) {
        let _ = self.inbound.send(Inbound::Close);
    }

    /// Make every subsequent send fail.
    pub fn fail_sends(&self, fail: bool) {
        self.flags.fail_sends.store(fail, Ordering::SeqCst);
    }

    /// Number of close handshakes the session started.
    pub fn close_calls(&self) -> usize {
        self.flags.close_calls.load(Ordering::SeqCst)
    }

    /// Next frame the session wrote, waiting for it.
    pub async fn next_outbound(&mut self) -> Option<Outbound> {
        self.outbound.recv().await
    }

    /// Drain everything the session wrote so far.
    pub fn drain_outbound(&mut self) -> Vec<Outbound> {
        let mut frames = Vec::new();
        while let Ok(frame) = self.outbound.try_recv() {
            frames.push(frame);
        }
        frames
    }
}

impl MemorySource {
    fn fill(&mut self, buffer: &mut [u8]) -> Received {
        let Some((data, offset, end_of_message)) = self.carry.take() else {
            return Received::Fragment {
                count: 0,
                end_of_message: false,
            };
        };

        let count = (data.len() - offset).min(buffer.len());
        buffer[..count].copy_from_slice(&data[offset..offset + count]);
        let consumed = offset + count;

        if consumed < data.len() {
            self.carry = Some((data, consumed, end_of_message));
            Received::Fragment {
                count,
                end_of_message: false,
            }
        } else {
            Received::Fragment {
                count,
                end_of_message,
            }
        }
    }
}

impl FrameSource for MemorySource {
    fn receive<'a>(
        &'a mut self,
        buffer: &'a mut [u8],
    ) -> BoxFuture<'a, Result<Received, TransportError>> {
        async move {
            if self.carry.is_none() {
                match self.inbound.recv().await {
                    Some(Inbound::Fragment {
                        data,
                        end_of_message,
                    }) => self.carry = Some((data, 0, end_of_message)),
                    Some(Inbound::Fail(cause)) => return Err(TransportError::Io(cause)),
                    Some(Inbound::Close) | None => return Ok(Received::Closed),
                }
            }
            Ok(self.fill(buffer))
        }
        .boxed()
    }
}

impl FrameSink for MemorySink {
    fn send_message(
        &mut self,
        payload: Bytes,
        kind: MessageKind,
    ) -> BoxFuture<'_, Result<(), TransportError>> {
        async move {
            if self.flags.fail_sends.load(Ordering::SeqCst) {
                return Err(TransportError::Io("send rejected by peer".into()));
            }
            self.outbound
                .send(Outbound::Message { payload, kind })
                .map_err(|_| TransportError::Closed)
        }
        .boxed()
    }

    fn close(&mut self) -> BoxFuture<'_, Result<(), TransportError>> {
        async move {
            self.flags.close_calls.fetch_add(1, Ordering::SeqCst);
            self.outbound
                .send(Outbound::Close)
                .map_err(|_| TransportError::Closed)
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn oversized_fragment_is_split_across_reads() {
        let (mut source, _sink, peer) = pair();
        peer.push_fragment(vec![7u8; 10], true);

        let mut buffer = [0u8; 4];
        let mut reads = Vec::new();
        loop {
            match source.receive(&mut buffer).await.unwrap() {
                Received::Fragment {
                    count,
                    end_of_message,
                } => {
                    reads.push(count);
                    if end_of_message {
                        break;
                    }
                }
                Received::Closed => panic!("unexpected close"),
            }
        }
        assert_eq!(reads, vec![4, 4, 2]);
    }

    #[tokio::test]
    async fn dropped_peer_reads_as_closed() {
        let (mut source, _sink, peer) = pair();
        drop(peer);
        let mut buffer = [0u8; 4];
        assert_eq!(source.receive(&mut buffer).await.unwrap(), Received::Closed);
    }
}
