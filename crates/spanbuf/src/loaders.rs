//! File-backed segment loaders for sources too large to hold on the heap.
//!
//! A large file is exposed as a list of fixed-size segments, each backed by
//! a lazy loader. The two loader flavors differ only in where the loaded
//! segment lives: [`HeapLoader`] reads into a fresh allocation,
//! [`MappedLoader`] maps the segment read-only. Both cache reclaimably and
//! serialize their positional I/O under a per-file lock.

use crate::buffer::SpanBuffer;
use crate::bytes::{ByteRegion, ByteSpan};
use crate::error::Result;
use crate::lazy::{LazyLoader, LazySpan, ReclaimCache};
use crate::list;
use crate::reaper::Marker;
use crate::span::Span;
use std::fmt;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::sync::{Arc, Mutex, PoisonError};

// Mapping offsets must be page aligned; align down and trim the slack off
// the front of the resulting region.
const MAP_ALIGN: u64 = 4096;

impl ByteRegion for memmap2::Mmap {
    fn as_bytes(&self) -> &[u8] {
        self
    }
}

/// A file handle shared by every segment loader over the same source.
///
/// Positional reads seek under the lock, so concurrent segment loads never
/// interleave their cursor movement. The optional marker ties external
/// cleanup (say, deleting a spill file) to the life of the last loader.
pub struct SharedFile {
    file: Mutex<File>,
    length: i64,
    marker: Option<Arc<Marker>>,
}

impl SharedFile {
    /// Wraps an open file, reading its current length.
    pub fn new(file: File) -> Result<Arc<Self>> {
        Self::with_marker(file, None)
    }

    /// Wraps an open file and ties `marker` to it.
    pub fn with_marker(file: File, marker: Option<Arc<Marker>>) -> Result<Arc<Self>> {
        let length = file.metadata()?.len() as i64;
        Ok(Arc::new(Self {
            file: Mutex::new(file),
            length,
            marker,
        }))
    }

    /// Total length of the underlying file in bytes.
    #[inline]
    pub fn length(&self) -> i64 {
        self.length
    }

    /// The marker keeping external cleanup at bay, if any.
    pub fn marker(&self) -> Option<&Arc<Marker>> {
        self.marker.as_ref()
    }

    /// Positionally reads `span` into a fresh allocation.
    pub(crate) fn read_span(&self, span: Span) -> Result<Vec<u8>> {
        let mut bytes = vec![0u8; Span::checked_usize(span.length())?];
        let mut file = self.file.lock().unwrap_or_else(PoisonError::into_inner);
        file.seek(SeekFrom::Start(span.offset() as u64))?;
        file.read_exact(&mut bytes)?;
        Ok(bytes)
    }

    /// Maps `span` read-only, aligning the mapping start down to a page
    /// boundary. Returns the mapping and the slack to skip at its front.
    pub(crate) fn map_span(&self, span: Span) -> Result<(memmap2::Mmap, usize)> {
        let offset = span.offset() as u64;
        let aligned = offset & !(MAP_ALIGN - 1);
        let slack = (offset - aligned) as usize;
        let length = Span::checked_usize(span.length())? + slack;
        let file = self.file.lock().unwrap_or_else(PoisonError::into_inner);
        // Safety: the mapping is read-only and the region outlives every
        // buffer referencing it via its shared ownership.
        let mapping = unsafe {
            memmap2::MmapOptions::new()
                .offset(aligned)
                .len(length)
                .map(&*file)?
        };
        Ok((mapping, slack))
    }
}

impl fmt::Debug for SharedFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SharedFile {{ length: {}, marked: {} }}",
            self.length,
            self.marker.is_some()
        )
    }
}

/// Loads its segment into a freshly allocated byte array.
pub struct HeapLoader {
    file: Arc<SharedFile>,
    span: Span,
    cache: ReclaimCache,
}

impl HeapLoader {
    pub fn new(file: Arc<SharedFile>, span: Span) -> Self {
        Self {
            file,
            span,
            cache: ReclaimCache::new(),
        }
    }

    /// Counters for this segment's cache.
    pub fn metrics(&self) -> &crate::metrics::CacheMetrics {
        self.cache.metrics()
    }
}

impl fmt::Debug for HeapLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HeapLoader {{ span: {}, cache: {:?} }}", self.span, self.cache)
    }
}

impl LazyLoader for HeapLoader {
    fn load(&self, inset: i64) -> Result<SpanBuffer> {
        let full = self.cache.get_or_fill(|| {
            log::debug!("loading heap segment {}", self.span);
            Ok(SpanBuffer::wrap(self.file.read_span(self.span)?))
        })?;
        full.cut(inset)
    }

    fn length(&self) -> Result<i64> {
        Ok(self.span.length())
    }
}

/// Maps its segment read-only instead of copying it onto the heap.
pub struct MappedLoader {
    file: Arc<SharedFile>,
    span: Span,
    cache: ReclaimCache,
}

impl MappedLoader {
    pub fn new(file: Arc<SharedFile>, span: Span) -> Self {
        Self {
            file,
            span,
            cache: ReclaimCache::new(),
        }
    }
}

impl fmt::Debug for MappedLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "MappedLoader {{ span: {}, cache: {:?} }}",
            self.span, self.cache
        )
    }
}

impl LazyLoader for MappedLoader {
    fn load(&self, inset: i64) -> Result<SpanBuffer> {
        let full = self.cache.get_or_fill(|| {
            log::debug!("mapping segment {}", self.span);
            let (mapping, slack) = self.file.map_span(self.span)?;
            let length = Span::checked_usize(self.span.length())?;
            Ok(SpanBuffer::from_impl(ByteSpan::from_region_slice(
                0,
                Arc::new(mapping),
                slack,
                length,
            )))
        })?;
        full.cut(inset)
    }

    fn length(&self) -> Result<i64> {
        Ok(self.span.length())
    }
}

/// Splits `file` into `segment_size` windows, one lazy span per window, and
/// merges them into a single buffer starting at offset 0.
pub(crate) fn segment_buffers(
    file: &Arc<SharedFile>,
    segment_size: i64,
    mapped: bool,
) -> SpanBuffer {
    let total = file.length();
    let mut segments = Vec::new();
    let mut offset = 0;
    while offset < total {
        let span = Span::from_length(offset, segment_size.min(total - offset));
        let loader: Arc<dyn LazyLoader> = if mapped {
            Arc::new(MappedLoader::new(Arc::clone(file), span))
        } else {
            Arc::new(HeapLoader::new(Arc::clone(file), span))
        };
        segments.push(SpanBuffer::from_impl(LazySpan::with_range(
            loader,
            offset,
            0,
            span.length(),
        )));
        offset += segment_size;
    }
    list::merge_at(0, segments)
}
