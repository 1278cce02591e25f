use crate::buffer::format::{BufferKey, PixelFormat};
use crate::buffer::pixel::PixelBuffer;
use crate::foundation::core::Dimensions;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Pool configuration.
#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize)]
pub struct BufferPoolOpts {
    /// Maximum simultaneously checked-out buffers per (dims, format) key.
    /// The next acquire past this limit observes exhaustion.
    pub capacity_per_key: usize,
    /// Maximum bytes retained across all idle buckets; release past this
    /// frees the storage instead of keeping it.
    pub max_retained_bytes: usize,
}

impl Default for BufferPoolOpts {
    fn default() -> Self {
        Self {
            capacity_per_key: 8,
            max_retained_bytes: 256 * 1024 * 1024,
        }
    }
}

/// Counters describing pool behavior since construction.
#[derive(Debug, Default, Clone)]
pub struct BufferPoolStats {
    /// Buffers currently checked out across all keys.
    pub outstanding: usize,
    /// Idle buffers currently held for reuse.
    pub retained_buffers: usize,
    /// Bytes held by idle buffers.
    pub retained_bytes: usize,
    /// Fresh allocations performed.
    pub alloc_buffers: u64,
    /// Bytes freshly allocated.
    pub alloc_bytes: u64,
    /// Acquires served from retained storage.
    pub reused: u64,
    /// Acquires refused because a key was at capacity.
    pub exhausted: u64,
    /// Releases that freed storage instead of retaining it.
    pub dropped_on_release: u64,
}

struct Bucket {
    outstanding: usize,
    free: Vec<Vec<u8>>,
}

struct PoolInner {
    opts: BufferPoolOpts,
    stats: BufferPoolStats,
    buckets: HashMap<BufferKey, Bucket>,
}

/// Bounded recycling allocator for [`PixelBuffer`]s, keyed by
/// (dims, format).
///
/// Cloning the handle shares the pool. Acquire and release are safe from
/// different threads (capture callback thread vs. render thread); the lock
/// is held per call, never across frame work.
///
/// Exhaustion is a recoverable condition: callers treat `None` as "drop
/// this frame" and move on.
#[derive(Clone)]
pub struct BufferPool {
    inner: Arc<Mutex<PoolInner>>,
}

impl BufferPool {
    pub fn new(opts: BufferPoolOpts) -> Self {
        Self {
            inner: Arc::new(Mutex::new(PoolInner {
                opts,
                stats: BufferPoolStats::default(),
                buckets: HashMap::new(),
            })),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(BufferPoolOpts::default())
    }

    pub fn stats(&self) -> BufferPoolStats {
        self.inner.lock().stats.clone()
    }

    /// Check out a buffer, or `None` if the key is at capacity.
    ///
    /// Contents of the returned buffer are unspecified; its timestamp is
    /// cleared.
    pub fn acquire(&self, format: PixelFormat, dims: Dimensions) -> Option<PixelBuffer> {
        let key = BufferKey::new(format, dims);
        let mut guard = self.inner.lock();
        let PoolInner {
            opts,
            stats,
            buckets,
        } = &mut *guard;

        let bucket = buckets.entry(key).or_insert_with(|| Bucket {
            outstanding: 0,
            free: Vec::new(),
        });

        if bucket.outstanding >= opts.capacity_per_key {
            stats.exhausted = stats.exhausted.saturating_add(1);
            tracing::debug!(
                ?format,
                width = dims.width,
                height = dims.height,
                "pool exhausted"
            );
            return None;
        }

        bucket.outstanding += 1;
        stats.outstanding += 1;
        match bucket.free.pop() {
            Some(data) => {
                stats.retained_buffers = stats.retained_buffers.saturating_sub(1);
                stats.retained_bytes = stats.retained_bytes.saturating_sub(key.byte_len());
                stats.reused = stats.reused.saturating_add(1);
                Some(PixelBuffer::from_storage(key, data))
            }
            None => {
                stats.alloc_buffers = stats.alloc_buffers.saturating_add(1);
                stats.alloc_bytes = stats.alloc_bytes.saturating_add(key.byte_len() as u64);
                Some(PixelBuffer::from_storage(key, vec![0; key.byte_len()]))
            }
        }
    }

    /// Return a buffer to the pool.
    ///
    /// Takes a move: after release the caller holds nothing, so a buffer
    /// cannot be both recycled and still referenced. Releasing a buffer
    /// this pool did not issue is a logic defect and asserts in debug
    /// builds.
    pub fn release(&self, buffer: PixelBuffer) {
        let key = buffer.key();
        let data = buffer.into_storage();
        let mut guard = self.inner.lock();
        let PoolInner {
            opts,
            stats,
            buckets,
        } = &mut *guard;

        let Some(bucket) = buckets.get_mut(&key) else {
            debug_assert!(false, "release of a buffer this pool never issued");
            stats.dropped_on_release = stats.dropped_on_release.saturating_add(1);
            return;
        };
        if bucket.outstanding == 0 {
            debug_assert!(false, "release without matching acquire");
            stats.dropped_on_release = stats.dropped_on_release.saturating_add(1);
            return;
        }

        bucket.outstanding -= 1;
        stats.outstanding = stats.outstanding.saturating_sub(1);

        if stats.retained_bytes.saturating_add(key.byte_len()) > opts.max_retained_bytes {
            stats.dropped_on_release = stats.dropped_on_release.saturating_add(1);
            return;
        }

        bucket.free.push(data);
        stats.retained_buffers = stats.retained_buffers.saturating_add(1);
        stats.retained_bytes = stats.retained_bytes.saturating_add(key.byte_len());
    }
}
