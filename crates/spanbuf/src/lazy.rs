//! Deferred segment loading with reclaimable caching.
//!
//! A [`LazyLoader`] produces a buffer on demand; a [`LazySpan`] is a buffer
//! that delegates every read to its loader while supporting the whole
//! algebra (slice, head, duplicate) without ever triggering a load. Loaders
//! cache the last materialized buffer through a [`ReclaimCache`]: the cache
//! holds only a weak handle, so the buffer is dropped once no reader keeps
//! it alive, and the next load transparently re-fetches.

use crate::buffer::{Buffer, SpanBuffer, WeakSpan};
use crate::error::{BufferError, Result};
use crate::invariants::debug_assert_length;
use crate::metrics::CacheMetrics;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

/// Sentinel for a loader whose segment length is unknown until first load.
pub const UNDEF_LEN: i64 = -1;

/// A deferred source of one buffer segment.
///
/// `load(inset)` returns the segment's bytes from the logical inset onward,
/// as a buffer whose relative index 0 is the inset byte. Implementations
/// may fulfill the call from cache or re-read underlying storage; reads may
/// block, mutation never occurs. Concurrent `load` calls must observe at
/// most one underlying fetch.
pub trait LazyLoader: fmt::Debug + Send + Sync {
    /// Materializes the segment from `inset` onward.
    fn load(&self, inset: i64) -> Result<SpanBuffer>;

    /// Total segment length, or [`UNDEF_LEN`] while still unknown.
    fn length(&self) -> Result<i64>;
}

/// A weak-handle cache with single-fetch fill.
///
/// The mutex is held across the fill so racing callers wait for one fetch
/// instead of issuing their own. A failed fill leaves the slot empty; a
/// cache is never partially populated.
pub struct ReclaimCache {
    slot: Mutex<WeakSpan>,
    metrics: CacheMetrics,
}

impl ReclaimCache {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(WeakSpan::new()),
            metrics: CacheMetrics::new(),
        }
    }

    /// Returns the cached buffer, or fills the cache with `fetch`.
    pub fn get_or_fill(
        &self,
        fetch: impl FnOnce() -> Result<SpanBuffer>,
    ) -> Result<SpanBuffer> {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(alive) = slot.upgrade() {
            self.metrics.record_hit();
            return Ok(alive);
        }
        self.metrics.record_load();
        let fresh = fetch()?;
        *slot = fresh.downgrade();
        Ok(fresh)
    }

    /// Counters for this cache.
    pub fn metrics(&self) -> &CacheMetrics {
        &self.metrics
    }
}

impl Default for ReclaimCache {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ReclaimCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let live = self
            .slot
            .lock()
            .map(|slot| slot.upgrade().is_some())
            .unwrap_or(false);
        write!(f, "ReclaimCache {{ live: {live} }}")
    }
}

/// A buffer that delegates to a [`LazyLoader`].
///
/// Carries `(offset, inset, length)`: the label of its first byte, the
/// logical inset of that byte inside the loader's segment, and how many
/// bytes it exposes. Slicing, heading, and relabeling adjust these fields
/// only; reads and walkers force a load.
pub struct LazySpan {
    loader: Arc<dyn LazyLoader>,
    offset: i64,
    inset: i64,
    length: i64,
}

impl LazySpan {
    /// A span over the loader's whole segment, labeled at `offset`.
    ///
    /// Resolves a loader that reports [`UNDEF_LEN`] by forcing one load.
    pub fn new(loader: Arc<dyn LazyLoader>, offset: i64) -> Result<Self> {
        let mut length = loader.length()?;
        if length == UNDEF_LEN {
            log::trace!("resolving unknown segment length via load");
            length = loader.load(0)?.length();
        }
        debug_assert_length!(length);
        Ok(Self {
            loader,
            offset,
            inset: 0,
            length,
        })
    }

    /// A span over `length` bytes of the segment starting at `inset`,
    /// labeled at `offset`. The caller vouches for the range.
    pub fn with_range(loader: Arc<dyn LazyLoader>, offset: i64, inset: i64, length: i64) -> Self {
        debug_assert_length!(length);
        Self {
            loader,
            offset,
            inset,
            length,
        }
    }

    fn delegate(&self) -> Result<SpanBuffer> {
        let loaded = self.loader.load(self.inset)?;
        if loaded.length() < self.length {
            return Err(BufferError::UnexpectedEof {
                needed: self.length,
                remaining: loaded.length(),
            });
        }
        Ok(loaded)
    }
}

impl fmt::Debug for LazySpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "LazySpan {{ offset: {}, inset: {}, length: {}, loader: {:?} }}",
            self.offset, self.inset, self.length, self.loader
        )
    }
}

impl Buffer for LazySpan {
    fn offset(&self) -> i64 {
        self.offset
    }

    fn length(&self) -> i64 {
        self.length
    }

    fn read_at(&self, position: i64, out: &mut [u8]) -> Result<usize> {
        let relative = position - self.offset;
        let take = (out.len() as i64).min(self.length - relative) as usize;
        self.delegate()?.read_relative(relative, &mut out[..take])
    }

    fn byte_at(&self, position: i64) -> Result<u8> {
        self.delegate()?.byte_relative(position - self.offset)
    }

    fn slice_at(&self, position: i64) -> Result<SpanBuffer> {
        let shift = position - self.offset;
        Ok(SpanBuffer::from_impl(Self {
            loader: Arc::clone(&self.loader),
            offset: position,
            inset: self.inset + shift,
            length: self.length - shift,
        }))
    }

    fn head(&self, count: i64) -> Result<SpanBuffer> {
        Ok(SpanBuffer::from_impl(Self {
            loader: Arc::clone(&self.loader),
            offset: self.offset,
            inset: self.inset,
            length: count,
        }))
    }

    fn duplicate(&self, new_offset: i64) -> SpanBuffer {
        SpanBuffer::from_impl(Self {
            loader: Arc::clone(&self.loader),
            offset: new_offset,
            inset: self.inset,
            length: self.length,
        })
    }
}
