//! Cache counters.
//!
//! Counters are plain std atomics updated with relaxed ordering: they are
//! telemetry, not synchronization, so they stay outside the loom shim.

use std::sync::atomic::{AtomicU64, Ordering};

/// Internal counter set, one per cache.
#[derive(Default)]
pub(crate) struct CacheMetrics {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    evict_retries: AtomicU64,
    backend_reads: AtomicU64,
    backend_writes: AtomicU64,
}

impl CacheMetrics {
    #[inline]
    pub(crate) fn hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn evict_retry(&self) {
        self.evict_retries.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn backend_read(&self) {
        self.backend_reads.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn backend_write(&self) {
        self.backend_writes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            evict_retries: self.evict_retries.load(Ordering::Relaxed),
            backend_reads: self.backend_reads.load(Ordering::Relaxed),
            backend_writes: self.backend_writes.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of a cache's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Lookups served from a resident slot.
    pub hits: u64,

    /// Lookups that had to claim a slot.
    pub misses: u64,

    /// Recycles of a previously assigned slot for a new block. First-time
    /// claims of never-used slots do not count.
    pub evictions: u64,

    /// Eviction candidates abandoned because their reference count rose
    /// between the unlocked scan and revalidation under the bucket lock.
    pub evict_retries: u64,

    /// Block fetches issued to the backend.
    pub backend_reads: u64,

    /// Block writes issued to the backend.
    pub backend_writes: u64,
}

impl MetricsSnapshot {
    /// Fraction of lookups served without claiming a slot.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}
