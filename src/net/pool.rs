//! Round-robin pool of scratch buffers for packet packing
//!
//! Lets several threads pack concurrently without allocating per packet.
//! When every buffer is busy the caller gets a temporary allocation instead
//! of waiting.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::util::diag::RateLimitedWarn;

pub struct BufferPool {
    buffers: Box<[Mutex<Box<[u8]>>]>,
    buffer_size: usize,
    next: AtomicUsize,
    fallbacks: AtomicU64,
    exhausted_diag: RateLimitedWarn,
}

impl BufferPool {
    pub fn new(count: usize, buffer_size: usize) -> Self {
        let buffers = (0..count.max(1))
            .map(|_| Mutex::new(vec![0u8; buffer_size].into_boxed_slice()))
            .collect();
        Self {
            buffers,
            buffer_size,
            next: AtomicUsize::new(0),
            fallbacks: AtomicU64::new(0),
            exhausted_diag: RateLimitedWarn::new("net.pool.exhausted"),
        }
    }

    #[inline]
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    /// Times a caller found every buffer busy
    pub fn fallback_count(&self) -> u64 {
        self.fallbacks.load(Ordering::Relaxed)
    }

    /// Run `f` with exclusive use of a scratch buffer
    pub fn with_buffer<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> R {
        let n = self.buffers.len();
        let start = self.next.fetch_add(1, Ordering::Relaxed);
        for i in 0..n {
            if let Some(mut guard) = self.buffers[(start + i) % n].try_lock() {
                return f(&mut guard);
            }
        }

        self.fallbacks.fetch_add(1, Ordering::Relaxed);
        self.exhausted_diag.warn(format_args!(
            "all {} pool buffers busy, allocating {} bytes",
            n, self.buffer_size
        ));
        let mut temp = vec![0u8; self.buffer_size];
        f(&mut temp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_with_buffer() {
        let pool = BufferPool::new(2, 64);
        let len = pool.with_buffer(|buf| {
            buf[0] = 1;
            buf.len()
        });
        assert_eq!(len, 64);
        assert_eq!(pool.fallback_count(), 0);
    }

    #[test]
    fn test_nested_use_takes_other_buffer_then_falls_back() {
        let pool = BufferPool::new(2, 8);
        pool.with_buffer(|a| {
            a[0] = 0xAA;
            pool.with_buffer(|b| {
                assert_eq!(b.len(), 8);
                pool.with_buffer(|c| {
                    // Third concurrent user gets a temporary buffer
                    assert_eq!(c.len(), 8);
                });
            });
        });
        assert_eq!(pool.fallback_count(), 1);
    }

    #[test]
    fn test_zero_count_still_has_one_buffer() {
        let pool = BufferPool::new(0, 4);
        assert_eq!(pool.len(), 1);
        pool.with_buffer(|b| assert_eq!(b.len(), 4));
        assert_eq!(pool.fallback_count(), 0);
    }

    #[test]
    fn test_concurrent_users() {
        let pool = Arc::new(BufferPool::new(4, 32));
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let pool = pool.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        pool.with_buffer(|buf| {
                            buf.fill(t);
                            assert!(buf.iter().all(|&b| b == t));
                        });
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
    }
}
