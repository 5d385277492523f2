//! Write-side spooling: memory first, spill to a temp file past the
//! configured heap ceiling.

use crate::buffer::SpanBuffer;
use crate::error::Result;
use crate::factory::SpanFactory;
use std::io::{self, Write};

enum SpoolState {
    Memory(Vec<u8>),
    Spilled {
        file: std::fs::File,
        path: tempfile::TempPath,
        written: i64,
    },
}

/// A write-only byte sink that buffers in memory until the factory's
/// `max_heap` is exceeded, then spills everything to a named temp file and
/// keeps appending there.
///
/// [`into_buffer`](SpoolWriter::into_buffer) turns the accumulated bytes
/// into a buffer: in-memory, or lazily segmented over the spill file. A
/// spill file is registered with the factory's reaper and deleted once the
/// last buffer over it is dropped.
pub struct SpoolWriter<'a> {
    factory: &'a SpanFactory,
    state: SpoolState,
}

impl<'a> SpoolWriter<'a> {
    pub(crate) fn new(factory: &'a SpanFactory) -> Self {
        Self {
            factory,
            state: SpoolState::Memory(Vec::new()),
        }
    }

    /// Total bytes accepted so far.
    pub fn written(&self) -> i64 {
        match &self.state {
            SpoolState::Memory(bytes) => bytes.len() as i64,
            SpoolState::Spilled { written, .. } => *written,
        }
    }

    /// Returns `true` once the spool has gone to disk.
    pub fn is_spilled(&self) -> bool {
        matches!(self.state, SpoolState::Spilled { .. })
    }

    fn append(&mut self, data: &[u8]) -> io::Result<()> {
        match &mut self.state {
            SpoolState::Memory(bytes) => {
                bytes.extend_from_slice(data);
                if (bytes.len() as i64) > self.factory.config().max_heap {
                    self.spill()?;
                }
                Ok(())
            }
            SpoolState::Spilled { file, written, .. } => {
                file.write_all(data)?;
                *written += data.len() as i64;
                Ok(())
            }
        }
    }

    fn spill(&mut self) -> io::Result<()> {
        let accumulated = match &mut self.state {
            SpoolState::Memory(bytes) => std::mem::take(bytes),
            SpoolState::Spilled { .. } => return Ok(()),
        };
        let (mut file, path) = tempfile::NamedTempFile::new()?.into_parts();
        file.write_all(&accumulated)?;
        log::debug!(
            "spooled {} bytes to {}",
            accumulated.len(),
            path.display()
        );
        self.state = SpoolState::Spilled {
            file,
            path,
            written: accumulated.len() as i64,
        };
        Ok(())
    }

    /// Finishes the spool and wraps what was written as a buffer.
    pub fn into_buffer(self) -> Result<SpanBuffer> {
        match self.state {
            SpoolState::Memory(bytes) => Ok(SpanBuffer::wrap(bytes)),
            SpoolState::Spilled {
                mut file, path, ..
            } => {
                file.flush()?;
                self.factory.wrap_spilled(file, path)
            }
        }
    }
}

impl Write for SpoolWriter<'_> {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.append(data)?;
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        match &mut self.state {
            SpoolState::Memory(_) => Ok(()),
            SpoolState::Spilled { file, .. } => file.flush(),
        }
    }
}
