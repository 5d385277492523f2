//! The factory: every way to obtain a buffer, plus the knobs that decide
//! when a source goes lazy.

use crate::buffer::SpanBuffer;
use crate::bytes::ByteRegion;
use crate::error::{BufferError, Result};
use crate::list;
use crate::loaders::{segment_buffers, SharedFile};
use crate::reaper::{Marker, Reaper};
use crate::spool::SpoolWriter;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Sources at most this large are read fully into memory by default.
pub const DEFAULT_MAX_HEAP: i64 = 32 * 1024 * 1024;

/// Window size for lazily loaded segments of larger sources.
pub const DEFAULT_SEGMENT_SIZE: i64 = 4 * 1024 * 1024;

/// Tunables for a [`SpanFactory`].
///
/// Kept on the factory rather than as process globals so two factories with
/// different policies can coexist.
#[derive(Debug, Clone, Copy)]
pub struct FactoryConfig {
    /// Sources up to this many bytes are wrapped fully in memory.
    pub max_heap: i64,
    /// Segment window for sources beyond `max_heap`.
    pub segment_size: i64,
}

impl FactoryConfig {
    /// Creates a configuration with custom thresholds.
    ///
    /// # Panics
    ///
    /// Panics if either threshold is not positive.
    pub const fn new(max_heap: i64, segment_size: i64) -> Self {
        assert!(max_heap > 0, "max_heap must be positive");
        assert!(segment_size > 0, "segment_size must be positive");
        Self {
            max_heap,
            segment_size,
        }
    }
}

impl Default for FactoryConfig {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_HEAP, DEFAULT_SEGMENT_SIZE)
    }
}

/// Per-call options for file-backed wrapping.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileOptions {
    /// Segment window override; the factory's default when `None`.
    pub segment_size: Option<i64>,
    /// Delete the file once no buffer references it anymore. Only honored
    /// when the factory knows the path (ignored for bare handles).
    pub delete_after_use: bool,
    /// Force memory-mapped backing regardless of size.
    pub mapped: bool,
}

impl FileOptions {
    /// Options that force memory-mapped backing.
    pub fn mapped() -> Self {
        Self {
            mapped: true,
            ..Self::default()
        }
    }
}

/// Builds buffers from bytes, text, regions, files, and streams.
///
/// Operations on the produced buffers are closed under the algebra: every
/// slice, head, or merge is again a buffer. Sources larger than
/// `max_heap` become lists of lazily loaded segments; the factory's
/// [`Reaper`] deletes spill files and delete-after-use sources once the
/// last buffer over them is gone.
#[derive(Debug)]
pub struct SpanFactory {
    config: FactoryConfig,
    reaper: Reaper,
}

impl SpanFactory {
    pub fn new(config: FactoryConfig) -> Self {
        Self {
            config,
            reaper: Reaper::new(),
        }
    }

    /// The factory's thresholds.
    #[inline]
    pub fn config(&self) -> FactoryConfig {
        self.config
    }

    /// The resource reaper owned by this factory.
    pub fn reaper(&self) -> &Reaper {
        &self.reaper
    }

    // ---------------------------------------------------------------------
    // IN-MEMORY SOURCES
    // ---------------------------------------------------------------------

    /// Wraps owned bytes without copying; offset 0.
    pub fn wrap(&self, bytes: Vec<u8>) -> SpanBuffer {
        SpanBuffer::wrap(bytes)
    }

    /// Wraps owned bytes without copying, labeled at `offset`.
    pub fn wrap_at(&self, offset: i64, bytes: Vec<u8>) -> SpanBuffer {
        SpanBuffer::wrap_at(offset, bytes)
    }

    /// Wraps the UTF-8 encoding of `text`.
    pub fn wrap_text(&self, text: &str) -> SpanBuffer {
        SpanBuffer::wrap_text(text)
    }

    /// Wraps the UTF-8 encoding of `text`, labeled at `offset`.
    pub fn wrap_text_at(&self, offset: i64, text: &str) -> SpanBuffer {
        SpanBuffer::wrap_text_at(offset, text)
    }

    /// Wraps a shared byte region without copying.
    pub fn wrap_region(&self, region: Arc<dyn ByteRegion>) -> SpanBuffer {
        SpanBuffer::wrap_region(region)
    }

    /// Wraps a shared byte region without copying, labeled at `offset`.
    pub fn wrap_region_at(&self, offset: i64, region: Arc<dyn ByteRegion>) -> SpanBuffer {
        SpanBuffer::wrap_region_at(offset, region)
    }

    /// Concatenates buffers; result offset is the first buffer's.
    pub fn merge<I>(&self, buffers: I) -> SpanBuffer
    where
        I: IntoIterator<Item = SpanBuffer>,
    {
        list::merge(buffers)
    }

    /// Concatenates buffers into a buffer starting at `offset`.
    pub fn merge_at<I>(&self, offset: i64, buffers: I) -> SpanBuffer
    where
        I: IntoIterator<Item = SpanBuffer>,
    {
        list::merge_at(offset, buffers)
    }

    // ---------------------------------------------------------------------
    // FILE SOURCES
    // ---------------------------------------------------------------------

    /// Wraps a file with default options: fully in memory up to `max_heap`,
    /// lazily segmented beyond it.
    pub fn wrap_file(&self, path: impl AsRef<Path>) -> Result<SpanBuffer> {
        self.wrap_file_with(path, FileOptions::default())
    }

    /// Wraps a file with explicit options.
    pub fn wrap_file_with(
        &self,
        path: impl AsRef<Path>,
        options: FileOptions,
    ) -> Result<SpanBuffer> {
        let path = path.as_ref();
        let file = File::open(path)?;
        self.wrap_open_file(file, options, Some(path.to_path_buf()))
    }

    /// Wraps an already-open handle (the file-channel form). The handle is
    /// shared by the segment loaders and closed when the last one drops.
    pub fn wrap_handle(&self, file: File, options: FileOptions) -> Result<SpanBuffer> {
        self.wrap_open_file(file, options, None)
    }

    /// Forces memory-mapped backing for a file.
    pub fn as_mem_map(&self, path: impl AsRef<Path>) -> Result<SpanBuffer> {
        self.wrap_file_with(path, FileOptions::mapped())
    }

    /// Forces memory-mapped backing with an explicit segment window.
    pub fn as_mem_map_with(
        &self,
        path: impl AsRef<Path>,
        segment_size: i64,
    ) -> Result<SpanBuffer> {
        self.wrap_file_with(
            path,
            FileOptions {
                segment_size: Some(segment_size),
                mapped: true,
                ..FileOptions::default()
            },
        )
    }

    fn wrap_open_file(
        &self,
        mut file: File,
        options: FileOptions,
        path: Option<PathBuf>,
    ) -> Result<SpanBuffer> {
        let segment_size = options.segment_size.unwrap_or(self.config.segment_size);
        if segment_size <= 0 {
            return Err(BufferError::out_of_range(segment_size, 1, i64::MAX));
        }
        let length = file.metadata()?.len() as i64;

        if !options.mapped && length <= self.config.max_heap {
            let mut bytes = Vec::with_capacity(length as usize);
            file.seek(SeekFrom::Start(0))?;
            file.read_to_end(&mut bytes)?;
            if options.delete_after_use {
                if let Some(path) = path {
                    log::debug!("deleting fully read source {}", path.display());
                    std::fs::remove_file(path)?;
                }
            }
            return Ok(SpanBuffer::wrap(bytes));
        }

        let marker = match (options.delete_after_use, path) {
            (true, Some(path)) => {
                let marker = Marker::new();
                let label = format!("delete {}", path.display());
                self.reaper
                    .register(&marker, label, move || std::fs::remove_file(&path))?;
                Some(marker)
            }
            _ => None,
        };
        let shared = SharedFile::with_marker(file, marker)?;
        log::debug!(
            "segmenting {} bytes into {}-byte {} windows",
            length,
            segment_size,
            if options.mapped { "mapped" } else { "heap" }
        );
        Ok(segment_buffers(&shared, segment_size, options.mapped))
    }

    // ---------------------------------------------------------------------
    // STREAM SOURCES
    // ---------------------------------------------------------------------

    /// A spool to write into; finish with
    /// [`into_buffer`](SpoolWriter::into_buffer).
    pub fn spool(&self) -> SpoolWriter<'_> {
        SpoolWriter::new(self)
    }

    /// Drains `source` through the spool facility and wraps the result.
    pub fn wrap_read(&self, mut source: impl Read) -> Result<SpanBuffer> {
        let mut spool = self.spool();
        std::io::copy(&mut source, &mut spool)?;
        spool.into_buffer()
    }

    /// Wraps a spool's spill file, registering it for deletion when the
    /// last buffer over it is dropped.
    pub(crate) fn wrap_spilled(
        &self,
        file: File,
        path: tempfile::TempPath,
    ) -> Result<SpanBuffer> {
        let marker = Marker::new();
        let label = format!("delete spill {}", path.display());
        self.reaper.register(&marker, label, move || path.close())?;
        let shared = SharedFile::with_marker(file, Some(marker))?;
        Ok(segment_buffers(&shared, self.config.segment_size, false))
    }
}

impl Default for SpanFactory {
    fn default() -> Self {
        Self::new(FactoryConfig::default())
    }
}
