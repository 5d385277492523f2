//! Leaf buffers over contiguous in-memory byte regions.

use crate::buffer::{Buffer, SpanBuffer};
use crate::error::Result;
use crate::invariants::{debug_assert_in_bounds, debug_assert_length};
use std::fmt;
use std::sync::Arc;

/// A contiguous region of bytes that can back a buffer.
///
/// Implementations hand out the same slice for the lifetime of the region;
/// the region is owned by whoever allocated it (a vector, a memory mapping)
/// and shared read-only by every buffer derived from it.
pub trait ByteRegion: Send + Sync + 'static {
    /// The region's bytes. Must return the same slice on every call.
    fn as_bytes(&self) -> &[u8];
}

impl ByteRegion for Vec<u8> {
    fn as_bytes(&self) -> &[u8] {
        self
    }
}

impl ByteRegion for Box<[u8]> {
    fn as_bytes(&self) -> &[u8] {
        self
    }
}

/// A buffer over a slice of a shared byte region.
///
/// Carries an inner `[start, start + len)` cursor pair because the region
/// itself may be larger than the buffer (slicing moves `start`, never the
/// region). Reads are O(1) and never touch the region's state.
pub struct ByteSpan {
    region: Arc<dyn ByteRegion>,
    start: usize,
    len: usize,
    offset: i64,
}

impl ByteSpan {
    /// Wraps an owned vector, exposing all of it at `offset`.
    pub fn from_vec(offset: i64, bytes: Vec<u8>) -> Self {
        let len = bytes.len();
        Self {
            region: Arc::new(bytes),
            start: 0,
            len,
            offset,
        }
    }

    /// Wraps a shared region, exposing all of it at `offset`.
    pub fn from_region(offset: i64, region: Arc<dyn ByteRegion>) -> Self {
        let len = region.as_bytes().len();
        Self {
            region,
            start: 0,
            len,
            offset,
        }
    }

    /// Wraps a sub-slice `[start, start + len)` of a shared region.
    ///
    /// # Panics
    ///
    /// Panics if the window does not fit inside the region.
    pub fn from_region_slice(
        offset: i64,
        region: Arc<dyn ByteRegion>,
        start: usize,
        len: usize,
    ) -> Self {
        assert!(
            start + len <= region.as_bytes().len(),
            "byte span window [{start}, {}) escapes region of {} bytes",
            start + len,
            region.as_bytes().len()
        );
        Self {
            region,
            start,
            len,
            offset,
        }
    }

    #[inline]
    fn bytes(&self) -> &[u8] {
        &self.region.as_bytes()[self.start..self.start + self.len]
    }
}

impl fmt::Debug for ByteSpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ByteSpan {{ offset: {}, len: {}, region_start: {} }}",
            self.offset, self.len, self.start
        )
    }
}

impl Buffer for ByteSpan {
    fn offset(&self) -> i64 {
        self.offset
    }

    fn length(&self) -> i64 {
        self.len as i64
    }

    fn read_at(&self, position: i64, out: &mut [u8]) -> Result<usize> {
        debug_assert_in_bounds!(position, self.offset, self.offset + self.len as i64 - 1);
        let relative = (position - self.offset) as usize;
        let take = out.len().min(self.len - relative);
        out[..take].copy_from_slice(&self.bytes()[relative..relative + take]);
        Ok(take)
    }

    fn byte_at(&self, position: i64) -> Result<u8> {
        debug_assert_in_bounds!(position, self.offset, self.offset + self.len as i64 - 1);
        let relative = (position - self.offset) as usize;
        Ok(self.bytes()[relative])
    }

    fn slice_at(&self, position: i64) -> Result<SpanBuffer> {
        let relative = (position - self.offset) as usize;
        debug_assert_length!(self.len as i64 - relative as i64);
        Ok(SpanBuffer::from_impl(Self {
            region: Arc::clone(&self.region),
            start: self.start + relative,
            len: self.len - relative,
            offset: position,
        }))
    }

    fn head(&self, count: i64) -> Result<SpanBuffer> {
        Ok(SpanBuffer::from_impl(Self {
            region: Arc::clone(&self.region),
            start: self.start,
            len: count as usize,
            offset: self.offset,
        }))
    }

    fn duplicate(&self, new_offset: i64) -> SpanBuffer {
        SpanBuffer::from_impl(Self {
            region: Arc::clone(&self.region),
            start: self.start,
            len: self.len,
            offset: new_offset,
        })
    }
}
