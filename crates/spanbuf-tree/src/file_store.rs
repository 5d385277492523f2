//! A file-backed block store with checksummed blocks.
//!
//! Records are appended as `[length: u32 BE][block bytes]`; a block's
//! position is its record's file offset, serialized as eight big-endian
//! bytes. The store requires a four-byte factory header per block and fills
//! it with a CRC32 of the payload when storing, verifying it on every read.
//! The tree layer skips the header, so checksums ride along invisibly.

use crate::serde::{TreeDeserializer, TreePosition, TreeSerializer};
use spanbuf::{BufferError, Result, SpanBuffer};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

/// Position into a [`FileBlockStore`]: the record's byte offset.
/// `u64::MAX` stands for no data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilePosition(u64);

impl FilePosition {
    pub const NO_DATA: FilePosition = FilePosition(u64::MAX);

    /// The file offset this position names.
    #[inline]
    pub fn offset(self) -> u64 {
        self.0
    }
}

impl TreePosition for FilePosition {
    fn is_no_data(&self) -> bool {
        self.0 == u64::MAX
    }
}

struct StoreInner {
    file: Mutex<File>,
}

/// Append-only block records in a single file.
///
/// Cloning shares the handle, so one instance serves as both serializer and
/// deserializer. All file I/O is positional under the store's lock.
#[derive(Clone)]
pub struct FileBlockStore {
    inner: Arc<StoreInner>,
}

impl FileBlockStore {
    /// Front bytes of every block the store claims for its payload CRC32.
    /// Pair the store with a block factory reserving exactly this much.
    pub const HEADER_SIZE: usize = 4;

    /// Creates (or truncates) a store file at `path`.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        Ok(Self::from_file(file))
    }

    /// Opens an existing store file for reading and appending.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        Ok(Self::from_file(file))
    }

    /// Wraps an already-open handle.
    pub fn from_file(file: File) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                file: Mutex::new(file),
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, File> {
        self.inner.file.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for FileBlockStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "FileBlockStore")
    }
}

impl TreeSerializer for FileBlockStore {
    type Position = FilePosition;

    fn max_buffer_size(&self) -> usize {
        u32::MAX as usize
    }

    fn position_size(&self) -> usize {
        8
    }

    fn no_data(&self) -> FilePosition {
        FilePosition::NO_DATA
    }

    fn serialize(&self, block: &[u8]) -> Result<FilePosition> {
        if block.len() < Self::HEADER_SIZE {
            return Err(BufferError::IllegalState(
                "file store blocks must reserve a four-byte header",
            ));
        }
        let payload = &block[Self::HEADER_SIZE..];
        let checksum = crc32fast::hash(payload);
        let mut file = self.lock();
        let offset = file.seek(SeekFrom::End(0))?;
        file.write_all(&(block.len() as u32).to_be_bytes())?;
        file.write_all(&checksum.to_be_bytes())?;
        file.write_all(payload)?;
        Ok(FilePosition(offset))
    }

    fn serialize_position(&self, position: &FilePosition) -> Result<Vec<u8>> {
        Ok(position.0.to_be_bytes().to_vec())
    }
}

impl TreeDeserializer for FileBlockStore {
    type Position = FilePosition;

    fn header_size(&self) -> usize {
        Self::HEADER_SIZE
    }

    fn position_size(&self) -> usize {
        8
    }

    fn deserialize(&self, position: &FilePosition) -> Result<SpanBuffer> {
        if position.is_no_data() {
            return Ok(SpanBuffer::empty());
        }
        let mut file = self.lock();
        file.seek(SeekFrom::Start(position.0))?;
        let mut length = [0u8; 4];
        file.read_exact(&mut length)?;
        let mut block = vec![0u8; u32::from_be_bytes(length) as usize];
        file.read_exact(&mut block)?;
        drop(file);

        if block.len() < Self::HEADER_SIZE {
            return Err(BufferError::IllegalState("truncated block record"));
        }
        let stored = u32::from_be_bytes(
            block[..Self::HEADER_SIZE]
                .try_into()
                .map_err(|_| BufferError::IllegalState("truncated block record"))?,
        );
        let payload = &block[Self::HEADER_SIZE..];
        if crc32fast::hash(payload) != stored {
            return Err(BufferError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("block checksum mismatch at offset {}", position.0),
            )));
        }
        Ok(SpanBuffer::wrap(block))
    }

    fn read_position(&self, bytes: &[u8]) -> Result<FilePosition> {
        let raw: [u8; 8] = bytes
            .try_into()
            .map_err(|_| BufferError::IllegalState("position must be eight bytes"))?;
        Ok(FilePosition(u64::from_be_bytes(raw)))
    }
}
