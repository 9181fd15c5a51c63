//! Memory pool (component C, `umem`).
//!
//! Backs both `ubuf` block storage (`u8` pages) and `udict` packed storage.
//! The shape is lifted directly from the bucketed frame-pool the teacher
//! used to amortize per-frame audio sample allocation, generalized from a
//! fixed `f32` sample buffer to a generic `MemPool<T>` keyed by size class.
//! There is no compaction; freelists simply drain on pipe teardown by virtue
//! of their `Arc` going out of scope.

use std::sync::{Arc, Mutex};

/// Size classes a pool buckets by. A request is rounded up to the smallest
/// bucket that fits; oversized requests bypass the pool entirely.
const DEFAULT_BUCKET_SIZES: &[usize] = &[256, 1024, 4096, 16384, 65536];

struct PoolInner<T> {
    buckets: Vec<Vec<Vec<T>>>,
    bucket_sizes: Vec<usize>,
    hits: u64,
    misses: u64,
}

impl<T> PoolInner<T> {
    fn bucket_for(&self, capacity: usize) -> Option<usize> {
        self.bucket_sizes.iter().position(|&sz| capacity <= sz)
    }
}

/// A shared pool of reusable `Vec<T>` buffers, bucketed by capacity.
pub struct MemPool<T> {
    inner: Arc<Mutex<PoolInner<T>>>,
}

impl<T> Clone for MemPool<T> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<T: Default> MemPool<T> {
    #[must_use]
    pub fn new() -> Self {
        Self::with_bucket_sizes(DEFAULT_BUCKET_SIZES.to_vec())
    }

    #[must_use]
    pub fn with_bucket_sizes(mut bucket_sizes: Vec<usize>) -> Self {
        bucket_sizes.sort_unstable();
        let buckets = bucket_sizes.iter().map(|_| Vec::new()).collect();
        Self {
            inner: Arc::new(Mutex::new(PoolInner { buckets, bucket_sizes, hits: 0, misses: 0 })),
        }
    }

    /// Acquires a page of at least `capacity` elements, reusing a pooled
    /// buffer when one of a suitable bucket is available.
    #[must_use]
    #[allow(clippy::unwrap_used)] // lock poisoning is a fatal bug, not a recoverable state
    pub fn acquire(&self, capacity: usize) -> PooledPage<T> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(bucket_idx) = inner.bucket_for(capacity) {
            if let Some(mut buf) = inner.buckets[bucket_idx].pop() {
                buf.clear();
                inner.hits += 1;
                return PooledPage { buf: Some(buf), bucket_idx: Some(bucket_idx), pool: self.clone() };
            }
            inner.misses += 1;
            let bucket_size = inner.bucket_sizes[bucket_idx];
            return PooledPage {
                buf: Some(Vec::with_capacity(bucket_size)),
                bucket_idx: Some(bucket_idx),
                pool: self.clone(),
            };
        }
        inner.misses += 1;
        PooledPage { buf: Some(Vec::with_capacity(capacity)), bucket_idx: None, pool: self.clone() }
    }

    #[must_use]
    #[allow(clippy::unwrap_used)]
    pub fn stats(&self) -> PoolStats {
        let inner = self.inner.lock().unwrap();
        PoolStats {
            hits: inner.hits,
            misses: inner.misses,
            buckets: inner
                .bucket_sizes
                .iter()
                .zip(&inner.buckets)
                .map(|(&size, pooled)| BucketStats { size, free: pooled.len() })
                .collect(),
        }
    }

    #[allow(clippy::unwrap_used)]
    fn release(&self, bucket_idx: usize, buf: Vec<T>) {
        let mut inner = self.inner.lock().unwrap();
        inner.buckets[bucket_idx].push(buf);
    }
}

impl<T: Default> Default for MemPool<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BucketStats {
    pub size: usize,
    pub free: usize,
}

#[derive(Debug, Clone)]
pub struct PoolStats {
    pub hits: u64,
    pub misses: u64,
    pub buckets: Vec<BucketStats>,
}

/// A `Vec<T>` on loan from a [`MemPool`]. Returns its storage to the pool on
/// drop unless it came from an oversized (bucket-less) allocation.
pub struct PooledPage<T> {
    buf: Option<Vec<T>>,
    bucket_idx: Option<usize>,
    pool: MemPool<T>,
}

impl<T> std::ops::Deref for PooledPage<T> {
    type Target = Vec<T>;

    #[allow(clippy::unwrap_used)]
    fn deref(&self) -> &Vec<T> {
        self.buf.as_ref().unwrap()
    }
}

impl<T> std::ops::DerefMut for PooledPage<T> {
    #[allow(clippy::unwrap_used)]
    fn deref_mut(&mut self) -> &mut Vec<T> {
        self.buf.as_mut().unwrap()
    }
}

impl<T: Default> Drop for PooledPage<T> {
    fn drop(&mut self) {
        if let (Some(buf), Some(bucket_idx)) = (self.buf.take(), self.bucket_idx) {
            self.pool.release(bucket_idx, buf);
        }
    }
}
