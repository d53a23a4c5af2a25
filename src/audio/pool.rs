//! Free list of reusable payload buffers
//!
//! Packets are copied into pooled buffers before they are handed to the
//! jitter buffer, so the receive path does not allocate per packet. A
//! [`PooledBuffer`] goes back to its pool when dropped. Buffers that grew
//! past the slot size are kept as they are; the pool only bounds how many
//! idle buffers it retains.

use crossbeam::queue::ArrayQueue;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

struct PoolInner {
    free: ArrayQueue<Vec<u8>>,
    slot_size: usize,
    allocated: AtomicUsize,
    reused: AtomicUsize,
}

/// Shared pool of byte buffers
#[derive(Clone)]
pub struct AudioDataPool {
    inner: Arc<PoolInner>,
}

impl AudioDataPool {
    /// Create a pool retaining at most `capacity` idle buffers of at least
    /// `slot_size` bytes
    pub fn new(slot_size: usize, capacity: usize) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                free: ArrayQueue::new(capacity.max(1)),
                slot_size,
                allocated: AtomicUsize::new(0),
                reused: AtomicUsize::new(0),
            }),
        }
    }

    /// Take an empty buffer from the pool, allocating when none is idle
    pub fn acquire(&self) -> PooledBuffer {
        let buf = match self.inner.free.pop() {
            Some(buf) => {
                self.inner.reused.fetch_add(1, Ordering::Relaxed);
                buf
            }
            None => {
                self.inner.allocated.fetch_add(1, Ordering::Relaxed);
                Vec::with_capacity(self.inner.slot_size)
            }
        };

        PooledBuffer {
            buf,
            pool: Arc::clone(&self.inner),
        }
    }

    /// Take a buffer holding a copy of `data`
    pub fn copy_of(&self, data: &[u8]) -> PooledBuffer {
        let mut buffer = self.acquire();
        buffer.buf.extend_from_slice(data);
        buffer
    }

    /// Slot size new buffers are allocated with
    pub fn slot_size(&self) -> usize {
        self.inner.slot_size
    }

    /// Number of idle buffers
    pub fn idle(&self) -> usize {
        self.inner.free.len()
    }

    /// Get statistics
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            idle: self.inner.free.len(),
            allocated: self.inner.allocated.load(Ordering::Relaxed),
            reused: self.inner.reused.load(Ordering::Relaxed),
        }
    }
}

/// Pool statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolStats {
    pub idle: usize,
    pub allocated: usize,
    pub reused: usize,
}

/// Byte buffer on loan from an [`AudioDataPool`]
pub struct PooledBuffer {
    buf: Vec<u8>,
    pool: Arc<PoolInner>,
}

impl PooledBuffer {
    /// Resize to `len` bytes, zero-filling any growth
    pub fn resize(&mut self, len: usize) {
        self.buf.resize(len, 0);
    }

    /// Shorten to `len` bytes
    pub fn truncate(&mut self, len: usize) {
        self.buf.truncate(len);
    }

    /// Replace the contents with a copy of `data`
    pub fn copy_from(&mut self, data: &[u8]) {
        self.buf.clear();
        self.buf.extend_from_slice(data);
    }
}

impl Deref for PooledBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.buf
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.buf
    }
}

impl std::fmt::Debug for PooledBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledBuffer")
            .field("len", &self.buf.len())
            .field("capacity", &self.buf.capacity())
            .finish()
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        let mut buf = std::mem::take(&mut self.buf);
        buf.clear();
        // A full free list simply lets the buffer go
        let _ = self.pool.free.push(buf);
    }
}
