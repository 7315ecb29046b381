//! Pool of reusable destination buffers.
//!
//! Avoids allocating GPU storage per frame by keeping buffers keyed by
//! (width, height). Reuse is matched on dimensions alone; concurrent users of
//! the same buffer are serialized by the backend's in-order queue, and the
//! inflight budget bounds how many can be in flight at all.

use livecast_core::Result;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Counters describing pool behaviour since creation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub hits: u64,
    pub allocations: u64,
    pub evictions: u64,
    pub failures: u64,
}

struct PooledBuffer<T> {
    buffer: Arc<T>,
    width: u32,
    height: u32,
    last_used: u64,
}

struct PoolState<T> {
    entries: Vec<PooledBuffer<T>>,
    tick: u64,
    stats: PoolStats,
}

/// LRU-bounded pool of destination buffers.
pub struct BufferPool<T> {
    state: Mutex<PoolState<T>>,
    max_pool_size: AtomicUsize,
}

impl<T> BufferPool<T> {
    /// Create an empty pool holding at most `max_pool_size` buffers.
    pub fn new(max_pool_size: usize) -> Self {
        Self {
            state: Mutex::new(PoolState {
                entries: Vec::new(),
                tick: 0,
                stats: PoolStats::default(),
            }),
            max_pool_size: AtomicUsize::new(max_pool_size),
        }
    }

    /// Get a buffer of the given size, allocating one with `allocate` when
    /// none is pooled.
    ///
    /// Returns `None` if allocation fails; the failure is logged and the
    /// caller is expected to drop its work item.
    pub fn acquire_with<F>(&self, width: u32, height: u32, allocate: F) -> Option<Arc<T>>
    where
        F: FnOnce(u32, u32) -> Result<T>,
    {
        let mut state = self.state.lock();
        state.tick += 1;
        let tick = state.tick;

        if let Some(entry) = state
            .entries
            .iter_mut()
            .find(|e| e.width == width && e.height == height)
        {
            entry.last_used = tick;
            let buffer = Arc::clone(&entry.buffer);
            state.stats.hits += 1;
            return Some(buffer);
        }

        let buffer = match allocate(width, height) {
            Ok(buffer) => Arc::new(buffer),
            Err(e) => {
                state.stats.failures += 1;
                warn!("Failed to allocate {}x{} pool buffer: {}", width, height, e);
                return None;
            }
        };

        state.entries.push(PooledBuffer {
            buffer: Arc::clone(&buffer),
            width,
            height,
            last_used: tick,
        });
        state.stats.allocations += 1;
        debug!("Pool allocated {}x{} ({} pooled)", width, height, state.entries.len());

        Self::evict_locked(&mut state, self.max_pool_size());
        Some(buffer)
    }

    fn evict_locked(state: &mut PoolState<T>, max: usize) {
        if state.entries.len() <= max {
            return;
        }
        state.entries.sort_by_key(|e| e.last_used);
        let excess = state.entries.len() - max;
        state.entries.drain(..excess);
        state.stats.evictions += excess as u64;
    }

    /// Change the bound, evicting immediately if the pool is now too large.
    pub fn set_max_pool_size(&self, max_pool_size: usize) {
        self.max_pool_size.store(max_pool_size, Ordering::Relaxed);
        let mut state = self.state.lock();
        Self::evict_locked(&mut state, max_pool_size);
    }

    pub fn max_pool_size(&self) -> usize {
        self.max_pool_size.load(Ordering::Relaxed)
    }

    /// Number of buffers in the pool.
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> PoolStats {
        self.state.lock().stats
    }

    /// Drop every pooled buffer. Buffers still referenced by in-flight work
    /// stay alive until that work finishes.
    pub fn clear(&self) {
        self.state.lock().entries.clear();
    }

    /// Whether a buffer of the given size is pooled.
    pub fn contains(&self, width: u32, height: u32) -> bool {
        self.state
            .lock()
            .entries
            .iter()
            .any(|e| e.width == width && e.height == height)
    }
}
