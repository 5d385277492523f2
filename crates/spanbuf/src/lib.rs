//! spanbuf - Immutable Virtual Byte Buffers
//!
//! An addressable byte sequence assembled by composition over one or more
//! underlying sources without copying. Slicing, concatenation, and
//! relabeling are O(1); positional reads through a composite are
//! O(log k) in the number of children. Sources too large for the heap are
//! exposed as lists of lazily loaded segments (positional file reads or
//! read-only memory maps) with reclaimable caches.
//!
//! # Key pieces
//!
//! - [`SpanBuffer`]: the shared handle carrying the whole algebra
//!   (slice/cut/head/trunc/tail/concat, search, content equality, hashing)
//! - [`Walker`]: a cursor with typed big-endian reads
//! - [`SpanFactory`]: wrap bytes, text, regions, files, handles, or streams;
//!   merge many buffers into one
//! - [`LazyLoader`] / [`LazySpan`]: deferred segments with weak-rebuild
//!   caching
//! - [`Reaper`]: releases external resources (spill files,
//!   delete-after-use sources) when the last referencing buffer is gone
//!
//! # Example
//!
//! ```
//! use spanbuf::SpanBuffer;
//!
//! let greeting = SpanBuffer::wrap_text("Hello")
//!     .concat(&SpanBuffer::wrap_text(" "))
//!     .concat(&SpanBuffer::wrap_text("World"));
//! assert_eq!(greeting.length(), 11);
//! assert_eq!(greeting.text().unwrap(), "Hello World");
//!
//! // Slicing relabels, never copies.
//! let world = greeting.slice_at(6).unwrap();
//! assert_eq!(world.offset(), 6);
//! assert_eq!(world.text().unwrap(), "World");
//! ```

mod buffer;
mod bytes;
mod error;
mod factory;
mod invariants;
mod lazy;
mod list;
mod loaders;
mod metrics;
mod reaper;
mod span;
mod spool;
mod walker;

pub use buffer::{Buffer, SpanBuffer, WeakSpan};
pub use bytes::{ByteRegion, ByteSpan};
pub use error::{BufferError, Result};
pub use factory::{
    FactoryConfig, FileOptions, SpanFactory, DEFAULT_MAX_HEAP, DEFAULT_SEGMENT_SIZE,
};
pub use lazy::{LazyLoader, LazySpan, ReclaimCache, UNDEF_LEN};
pub use list::{merge, merge_at};
pub use loaders::{HeapLoader, MappedLoader, SharedFile};
pub use metrics::{CacheMetrics, CacheMetricsSnapshot, ReaperMetrics};
pub use reaper::{Marker, Reaper};
pub use span::Span;
pub use spool::SpoolWriter;
pub use walker::Walker;
