//! Fixed-size receive buffer pool.
//!
//! # Responsibilities
//! - Lease fixed-size byte buffers to receive loops
//! - Reuse returned buffers instead of reallocating
//! - Count leases and returns so leaks are observable
//!
//! # Design Decisions
//! - Leases are RAII (`PooledBuffer`): a buffer goes back exactly once, on drop
//! - No upper bound on outstanding buffers; the free list only caches
//! - A wrongly sized buffer handed back is logged and discarded

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Shared pool of equally sized byte buffers.
#[derive(Debug)]
pub struct BufferPool {
    buffer_size: usize,
    free: Mutex<Vec<Vec<u8>>>,
    leased: AtomicU64,
    returned: AtomicU64,
    allocated: AtomicU64,
}

impl BufferPool {
    /// Create a pool handing out buffers of `buffer_size` bytes.
    pub fn new(buffer_size: usize) -> Arc<Self> {
        Arc::new(Self {
            buffer_size,
            free: Mutex::new(Vec::new()),
            leased: AtomicU64::new(0),
            returned: AtomicU64::new(0),
            allocated: AtomicU64::new(0),
        })
    }

    /// Size in bytes of every buffer this pool hands out.
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Lease a buffer, reusing a free one when available.
    pub fn take(self: &Arc<Self>) -> PooledBuffer {
        let reused = self
            .free
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop();

        let data = match reused {
            Some(buffer) => buffer,
            None => {
                self.allocated.fetch_add(1, Ordering::Relaxed);
                vec![0u8; self.buffer_size]
            }
        };
        self.leased.fetch_add(1, Ordering::SeqCst);

        PooledBuffer {
            data: Some(data),
            pool: Arc::clone(self),
        }
    }

    /// Place a raw buffer back on the free list.
    ///
    /// Buffers that do not match the configured size are dropped with a warning.
    pub fn give_back(&self, buffer: Vec<u8>) {
        if buffer.len() != self.buffer_size {
            tracing::warn!(
                expected = self.buffer_size,
                actual = buffer.len(),
                "Discarding buffer with unexpected size"
            );
            return;
        }

        self.free
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(buffer);
    }

    /// Total number of leases handed out.
    pub fn leased(&self) -> u64 {
        self.leased.load(Ordering::SeqCst)
    }

    /// Total number of leases that came back.
    pub fn returned(&self) -> u64 {
        self.returned.load(Ordering::SeqCst)
    }

    /// Leases currently held by callers.
    pub fn outstanding(&self) -> u64 {
        self.leased().saturating_sub(self.returned())
    }

    /// Buffers allocated because the free list was empty.
    pub fn allocated(&self) -> u64 {
        self.allocated.load(Ordering::Relaxed)
    }

    /// Buffers currently cached on the free list.
    pub fn available(&self) -> usize {
        self.free
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }
}

/// A leased buffer. Returned to its pool when dropped.
#[derive(Debug)]
pub struct PooledBuffer {
    data: Option<Vec<u8>>,
    pool: Arc<BufferPool>,
}

impl Deref for PooledBuffer {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        self.data.as_deref().unwrap_or_default()
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.data.as_deref_mut().unwrap_or_default()
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        if let Some(data) = self.data.take() {
            self.pool.returned.fetch_add(1, Ordering::SeqCst);
            self.pool.give_back(data);
        }
    }
}
