//! Lightweight counters for cache and reaper activity.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters kept by every reclaimable cache.
///
/// A *load* is a fill of an empty or reclaimed slot; a *hit* is a request
/// answered from the still-live cached buffer. `loads - 1` therefore counts
/// how many times the cache was reclaimed and rebuilt.
#[derive(Debug, Default)]
pub struct CacheMetrics {
    loads: AtomicU64,
    hits: AtomicU64,
}

impl CacheMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub(crate) fn record_load(&self) {
        self.loads.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    /// Number of underlying fetches performed.
    #[inline]
    pub fn loads(&self) -> u64 {
        self.loads.load(Ordering::Relaxed)
    }

    /// Number of requests served from the live cache.
    #[inline]
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Consistent point-in-time copy of both counters.
    pub fn snapshot(&self) -> CacheMetricsSnapshot {
        CacheMetricsSnapshot {
            loads: self.loads(),
            hits: self.hits(),
        }
    }
}

/// Plain copy of [`CacheMetrics`] counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheMetricsSnapshot {
    pub loads: u64,
    pub hits: u64,
}

/// Counters kept by the resource reaper.
#[derive(Debug, Default)]
pub struct ReaperMetrics {
    released: AtomicU64,
    failed: AtomicU64,
}

impl ReaperMetrics {
    #[inline]
    pub(crate) fn record_released(&self) {
        self.released.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Release actions that completed successfully.
    #[inline]
    pub fn released(&self) -> u64 {
        self.released.load(Ordering::Relaxed)
    }

    /// Release actions that failed (also retained on the failure list).
    #[inline]
    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }
}
