//! Byte-buffer pooling for drain output.
//!
//! Pooling is an allocator-reuse optimization and never changes results. The
//! lifecycle manager checks a buffer out for one compression attempt through
//! [`PooledBuffer`], which hands the buffer back to its pool when dropped, so
//! a failed or cancelled attempt always returns what it borrowed. A
//! successful attempt detaches the buffer into the sealed block, and the block
//! gives it back when it is evicted.
//!
//! [`HeapPool`] is the "no pool" implementation: it allocates fresh buffers
//! and lets returned ones drop.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use crate::error::DrainError;

/// Source of reusable byte buffers.
pub trait BytesPool: Send + Sync + fmt::Debug {
    /// Returns an empty buffer with at least `capacity` bytes of capacity.
    ///
    /// # Errors
    ///
    /// Returns [`DrainError::Pool`] if no buffer can be provided.
    fn checkout(&self, capacity: usize) -> Result<Vec<u8>, DrainError>;

    /// Gives a buffer back to the pool.
    fn checkin(&self, buffer: Vec<u8>);
}

/// Plain heap allocation with no reuse.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeapPool;

impl BytesPool for HeapPool {
    fn checkout(&self, capacity: usize) -> Result<Vec<u8>, DrainError> {
        Ok(Vec::with_capacity(capacity))
    }

    fn checkin(&self, _buffer: Vec<u8>) {}
}

/// Bounded free list of byte buffers.
///
/// Holds at most `max_free` idle buffers; extra check-ins are dropped so the
/// pool cannot grow without bound under sustained failures.
#[derive(Debug)]
pub struct SimpleBytesPool {
    free: Mutex<Vec<Vec<u8>>>,
    max_free: usize,
}

impl SimpleBytesPool {
    /// Creates an empty pool that keeps at most `max_free` idle buffers.
    pub fn new(max_free: usize) -> Self {
        Self {
            free: Mutex::new(Vec::with_capacity(max_free)),
            max_free,
        }
    }

    /// Number of idle buffers currently held.
    pub fn idle(&self) -> usize {
        self.free.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

impl BytesPool for SimpleBytesPool {
    fn checkout(&self, capacity: usize) -> Result<Vec<u8>, DrainError> {
        let reused = self
            .free
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop();

        let mut buffer = reused.unwrap_or_default();
        buffer.clear();
        buffer.reserve(capacity);
        Ok(buffer)
    }

    fn checkin(&self, mut buffer: Vec<u8>) {
        let mut free = self.free.lock().unwrap_or_else(PoisonError::into_inner);
        if free.len() < self.max_free {
            buffer.clear();
            free.push(buffer);
        }
    }
}

/// A buffer checked out of a [`BytesPool`] for the lifetime of one operation.
///
/// Dropping the guard returns the buffer to the pool on every exit path;
/// [`detach`](Self::detach) takes ownership instead.
pub struct PooledBuffer {
    buffer: Option<Vec<u8>>,
    pool: Arc<dyn BytesPool>,
}

impl PooledBuffer {
    /// Checks out a buffer with at least `capacity` bytes of capacity.
    ///
    /// # Errors
    ///
    /// Returns [`DrainError::Pool`] if the pool cannot supply a buffer.
    pub fn checkout(pool: &Arc<dyn BytesPool>, capacity: usize) -> Result<Self, DrainError> {
        let buffer = pool.checkout(capacity)?;
        Ok(Self {
            buffer: Some(buffer),
            pool: Arc::clone(pool),
        })
    }

    /// Takes the buffer out of the guard for writing.
    ///
    /// Hand it back with [`restore`](Self::restore) before the guard drops,
    /// otherwise the pool never sees it again.
    pub fn take(&mut self) -> Vec<u8> {
        self.buffer.take().unwrap_or_default()
    }

    /// Puts a buffer back into the guard so it is returned on drop.
    pub fn restore(&mut self, buffer: Vec<u8>) {
        self.buffer = Some(buffer);
    }

    /// Consumes the guard without returning the buffer to the pool.
    pub fn detach(mut self) -> Vec<u8> {
        self.buffer.take().unwrap_or_default()
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        if let Some(buffer) = self.buffer.take() {
            self.pool.checkin(buffer);
        }
    }
}

impl fmt::Debug for PooledBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledBuffer")
            .field("held", &self.buffer.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heap_pool_allocates_capacity() {
        let buffer = HeapPool.checkout(128).unwrap();
        assert!(buffer.is_empty());
        assert!(buffer.capacity() >= 128);
    }

    #[test]
    fn test_guard_returns_buffer_on_drop() {
        let simple = Arc::new(SimpleBytesPool::new(4));
        let pool: Arc<dyn BytesPool> = simple.clone();

        {
            let mut guard = PooledBuffer::checkout(&pool, 32).unwrap();
            let mut buffer = guard.take();
            buffer.extend_from_slice(&[1, 2, 3]);
            guard.restore(buffer);
        }

        assert_eq!(simple.idle(), 1);
        let reused = pool.checkout(8).unwrap();
        assert!(reused.is_empty(), "returned buffers are cleared");
        assert!(reused.capacity() >= 32);
    }

    #[test]
    fn test_detach_keeps_buffer() {
        let simple = Arc::new(SimpleBytesPool::new(4));
        let pool: Arc<dyn BytesPool> = simple.clone();

        let guard = PooledBuffer::checkout(&pool, 16).unwrap();
        let buffer = guard.detach();

        assert!(buffer.capacity() >= 16);
        assert_eq!(simple.idle(), 0);
    }

    #[test]
    fn test_pool_is_bounded() {
        let pool = SimpleBytesPool::new(2);
        for _ in 0..5 {
            pool.checkin(Vec::with_capacity(8));
        }
        assert_eq!(pool.idle(), 2);
    }
}
