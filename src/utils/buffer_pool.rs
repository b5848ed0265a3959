//! # Buffer Pool
//!
//! Pool of reusable byte buffers backing decoded packet bodies.
//!
//! Every buffer handed out is a [`PooledBuffer`]: exactly one live owner,
//! moved (never cloned) into the packet it backs, and returned to the pool
//! when dropped. Dropping is the release operation, so every error branch
//! that unwinds a buffer releases it as well.
//!
//! The pool is shared between connections. Its free list sits behind a
//! mutex and the outstanding count is atomic, so concurrent acquire and
//! release never corrupt it. An optional outstanding limit turns exhaustion
//! into [`ProtocolError::PoolExhausted`] instead of unbounded growth.
//!
//! ## Usage
//! ```rust
//! use gamewire::utils::buffer_pool::BufferPool;
//!
//! let pool = BufferPool::new(16);
//! let buffer = pool.acquire(128).unwrap();
//! assert_eq!(buffer.len(), 128);
//! assert_eq!(pool.outstanding(), 1);
//! drop(buffer);
//! assert_eq!(pool.outstanding(), 0);
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::{ProtocolError, Result};
use crate::utils::metrics::global_metrics;

/// Largest buffer capacity kept for reuse (64KB)
pub const DEFAULT_MAX_POOLED_BUFFER_SIZE: usize = 64 * 1024;

/// Capacity of pre-allocated buffers
const DEFAULT_BUFFER_CAPACITY: usize = 1024;

struct PoolShared {
    free: Mutex<Vec<Vec<u8>>>,
    outstanding: AtomicUsize,
    max_outstanding: usize,
    max_pooled_size: usize,
}

/// A pooled buffer that returns itself to the pool when dropped
pub struct PooledBuffer {
    buffer: Vec<u8>,
    pool: Arc<PoolShared>,
}

impl PooledBuffer {
    /// Get a mutable reference to the underlying buffer
    #[allow(clippy::should_implement_trait)]
    pub fn as_mut(&mut self) -> &mut Vec<u8> {
        &mut self.buffer
    }

    /// Get an immutable reference to the underlying buffer
    #[allow(clippy::should_implement_trait)]
    pub fn as_ref(&self) -> &[u8] {
        &self.buffer
    }

    /// Release the buffer back to its pool.
    ///
    /// Equivalent to dropping it; spelled out for call sites where the
    /// release point matters.
    pub fn release(self) {}
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        self.pool.outstanding.fetch_sub(1, Ordering::AcqRel);
        if self.buffer.capacity() <= self.pool.max_pooled_size {
            self.buffer.clear();
            if let Ok(mut free) = self.pool.free.lock() {
                free.push(std::mem::take(&mut self.buffer));
            }
        }
        // Otherwise, let it be deallocated
    }
}

impl std::ops::Deref for PooledBuffer {
    type Target = Vec<u8>;

    fn deref(&self) -> &Self::Target {
        &self.buffer
    }
}

impl std::ops::DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.buffer
    }
}

impl std::fmt::Debug for PooledBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledBuffer")
            .field("len", &self.buffer.len())
            .field("capacity", &self.buffer.capacity())
            .finish()
    }
}

/// Thread-safe buffer pool shared across connections
#[derive(Clone)]
pub struct BufferPool {
    shared: Arc<PoolShared>,
}

impl BufferPool {
    /// Create a pool with `pool_size` pre-allocated buffers and no outstanding limit
    pub fn new(pool_size: usize) -> Self {
        Self::with_limits(pool_size, DEFAULT_MAX_POOLED_BUFFER_SIZE, 0)
    }

    /// Create a pool with explicit limits.
    ///
    /// `max_outstanding == 0` disables the outstanding limit.
    pub fn with_limits(pool_size: usize, max_pooled_size: usize, max_outstanding: usize) -> Self {
        let mut free = Vec::with_capacity(pool_size);

        // Pre-allocate buffers
        for _ in 0..pool_size {
            free.push(Vec::with_capacity(DEFAULT_BUFFER_CAPACITY.min(max_pooled_size)));
        }

        Self {
            shared: Arc::new(PoolShared {
                free: Mutex::new(free),
                outstanding: AtomicUsize::new(0),
                max_outstanding,
                max_pooled_size,
            }),
        }
    }

    /// Acquire a zero-filled buffer of exactly `len` bytes.
    ///
    /// # Errors
    /// Returns `ProtocolError::PoolExhausted` when the outstanding limit is reached.
    pub fn acquire(&self, len: usize) -> Result<PooledBuffer> {
        let shared = &self.shared;
        let previous = shared.outstanding.fetch_add(1, Ordering::AcqRel);
        if shared.max_outstanding != 0 && previous >= shared.max_outstanding {
            shared.outstanding.fetch_sub(1, Ordering::AcqRel);
            global_metrics().pool_exhausted();
            return Err(ProtocolError::PoolExhausted(previous));
        }

        let mut buffer = if let Ok(mut free) = shared.free.lock() {
            free.pop().unwrap_or_default()
        } else {
            Vec::new()
        };
        buffer.resize(len, 0);

        Ok(PooledBuffer {
            buffer,
            pool: self.shared.clone(),
        })
    }

    /// Get the current number of available buffers in the pool
    pub fn available(&self) -> usize {
        self.shared.free.lock().map(|p| p.len()).unwrap_or(0)
    }

    /// Number of buffers currently checked out and not yet released
    pub fn outstanding(&self) -> usize {
        self.shared.outstanding.load(Ordering::Acquire)
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new(50) // Default: 50 buffers
    }
}

impl std::fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferPool")
            .field("available", &self.available())
            .field("outstanding", &self.outstanding())
            .finish()
    }
}
