use crate::{ClientError, Result};
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::warn;
use tracking_channel::Allocator;

/// Reusable byte buffers for message payloads and query replies.
///
/// Installed on the channel as its [`Allocator`]. Every buffer handed out is
/// counted until it comes back. Sizes above `max_buffer` are refused.
pub struct BufferPool {
    idle: Mutex<Vec<Vec<u8>>>,
    max_idle: usize,
    max_buffer: usize,
    outstanding: AtomicUsize,
}

impl BufferPool {
    pub fn new(max_idle: usize, max_buffer: usize) -> Self {
        Self {
            idle: Mutex::new(Vec::new()),
            max_idle,
            max_buffer,
            outstanding: AtomicUsize::new(0),
        }
    }

    /// A zeroed buffer of `size` bytes, returned to the pool on drop.
    pub fn acquire(self: &Arc<Self>, size: usize) -> Result<PooledBuffer> {
        let buf = self.take(size)?;
        self.outstanding.fetch_add(1, Ordering::AcqRel);
        Ok(PooledBuffer {
            buf: Some(buf),
            pool: Arc::clone(self),
        })
    }

    /// Buffers handed out and not yet returned.
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }

    pub fn idle_count(&self) -> usize {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn take(&self, size: usize) -> Result<Vec<u8>> {
        if size > self.max_buffer {
            return Err(ClientError::ReplyTooLarge {
                size,
                limit: self.max_buffer,
            });
        }
        let reused = {
            let mut idle = self.idle.lock().unwrap_or_else(PoisonError::into_inner);
            idle.iter()
                .position(|b| b.capacity() >= size)
                .map(|i| idle.swap_remove(i))
        };
        let mut buf = match reused {
            Some(buf) => buf,
            None => {
                let mut buf = Vec::new();
                buf.try_reserve_exact(size).map_err(|_| ClientError::Allocation(size))?;
                buf
            }
        };
        buf.clear();
        buf.resize(size, 0);
        Ok(buf)
    }
}

impl Allocator for BufferPool {
    fn allocate(&self, size: usize) -> Vec<u8> {
        // Counted even when refused; the channel hands every payload back
        self.outstanding.fetch_add(1, Ordering::AcqRel);
        self.take(size).unwrap_or_else(|e| {
            warn!(error = %e, "payload allocation refused");
            Vec::new()
        })
    }

    fn deallocate(&self, buf: Vec<u8>) {
        // Payloads from a channel that ignored the pool are adopted, never underflow the count
        let _ = self
            .outstanding
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        let mut idle = self.idle.lock().unwrap_or_else(PoisonError::into_inner);
        if idle.len() < self.max_idle && buf.capacity() > 0 {
            idle.push(buf);
        }
    }
}

/// A pool buffer scoped to one query.
pub struct PooledBuffer {
    buf: Option<Vec<u8>>,
    pool: Arc<BufferPool>,
}

impl Deref for PooledBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.buf.as_deref().unwrap_or(&[])
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut [u8] {
        self.buf.as_deref_mut().unwrap_or(&mut [])
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        if let Some(buf) = self.buf.take() {
            self.pool.deallocate(buf);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scoped_buffer_returns_on_drop() {
        let pool = Arc::new(BufferPool::new(4, 1024));
        {
            let mut buf = pool.acquire(36).unwrap();
            assert_eq!(buf.len(), 36);
            buf[0] = 7;
            assert_eq!(pool.outstanding(), 1);
        }
        assert_eq!(pool.outstanding(), 0);
        assert_eq!(pool.idle_count(), 1);

        // Reused buffers come back zeroed
        let buf = pool.acquire(16).unwrap();
        assert!(buf.iter().all(|&b| b == 0));
        assert_eq!(pool.idle_count(), 0);
    }

    #[test]
    fn test_idle_list_is_bounded() {
        let pool = Arc::new(BufferPool::new(1, 1024));
        let a = pool.acquire(8).unwrap();
        let b = pool.acquire(8).unwrap();
        drop(a);
        drop(b);
        assert_eq!(pool.idle_count(), 1);
        assert_eq!(pool.outstanding(), 0);
    }

    #[test]
    fn test_foreign_payload_does_not_underflow() {
        let pool = BufferPool::new(2, 1024);
        pool.deallocate(vec![1, 2, 3]);
        assert_eq!(pool.outstanding(), 0);
        assert_eq!(pool.idle_count(), 1);
    }

    #[test]
    fn test_oversized_request_is_refused() {
        let pool = Arc::new(BufferPool::new(2, 64));
        assert!(matches!(
            pool.acquire(65),
            Err(ClientError::ReplyTooLarge { size: 65, limit: 64 })
        ));
        assert!(pool.acquire(64).is_ok());
        assert_eq!(pool.outstanding(), 0);
    }

    #[test]
    fn test_unbounded_pool_reports_allocation_failure() {
        let pool = Arc::new(BufferPool::new(2, usize::MAX));
        assert!(matches!(
            pool.acquire(usize::MAX),
            Err(ClientError::Allocation(usize::MAX))
        ));
        assert_eq!(pool.outstanding(), 0);
    }

    #[test]
    fn test_refused_channel_allocation_stays_balanced() {
        let pool = BufferPool::new(2, 16);
        let buf = pool.allocate(1 << 20);
        assert!(buf.is_empty());
        assert_eq!(pool.outstanding(), 1);
        pool.deallocate(buf);
        assert_eq!(pool.outstanding(), 0);
    }
}
