//! An in-memory block store: block index as position, zero-copy reads.

use crate::serde::{TreeDeserializer, TreePosition, TreeSerializer};
use spanbuf::{BufferError, Result, SpanBuffer};
use std::sync::{Arc, Mutex, PoisonError};

/// Position into a [`MemoryBlockStore`]: the block's index, serialized as
/// four big-endian bytes. `u32::MAX` stands for no data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemPosition(u32);

impl MemPosition {
    pub const NO_DATA: MemPosition = MemPosition(u32::MAX);

    /// The block index this position names.
    #[inline]
    pub fn index(self) -> u32 {
        self.0
    }
}

impl TreePosition for MemPosition {
    fn is_no_data(&self) -> bool {
        self.0 == u32::MAX
    }
}

/// Blocks in a shared vector, in serialization order.
///
/// Cloning the store clones the handle; all clones serialize into and read
/// from the same vector, so one instance can serve as both the serializer
/// and the deserializer of a serde triple. Deserialization is zero-copy:
/// the returned buffer shares the stored block.
#[derive(Debug, Clone)]
pub struct MemoryBlockStore {
    blocks: Arc<Mutex<Vec<Arc<Vec<u8>>>>>,
    header_size: usize,
}

impl MemoryBlockStore {
    /// A store whose blocks reserve `header_size` opaque front bytes.
    pub fn new(header_size: usize) -> Self {
        Self {
            blocks: Arc::new(Mutex::new(Vec::new())),
            header_size,
        }
    }

    /// Number of blocks stored so far.
    pub fn block_count(&self) -> usize {
        self.lock().len()
    }

    /// A stored block's bytes, if `index` names one.
    pub fn block(&self, index: usize) -> Option<Arc<Vec<u8>>> {
        self.lock().get(index).cloned()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Arc<Vec<u8>>>> {
        self.blocks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl TreeSerializer for MemoryBlockStore {
    type Position = MemPosition;

    fn max_buffer_size(&self) -> usize {
        u32::MAX as usize
    }

    fn position_size(&self) -> usize {
        4
    }

    fn no_data(&self) -> MemPosition {
        MemPosition::NO_DATA
    }

    fn serialize(&self, block: &[u8]) -> Result<MemPosition> {
        let mut blocks = self.lock();
        let index = blocks.len();
        if index >= u32::MAX as usize {
            return Err(BufferError::IllegalState("memory block store is full"));
        }
        blocks.push(Arc::new(block.to_vec()));
        Ok(MemPosition(index as u32))
    }

    fn serialize_position(&self, position: &MemPosition) -> Result<Vec<u8>> {
        Ok(position.0.to_be_bytes().to_vec())
    }
}

impl TreeDeserializer for MemoryBlockStore {
    type Position = MemPosition;

    fn header_size(&self) -> usize {
        self.header_size
    }

    fn position_size(&self) -> usize {
        4
    }

    fn deserialize(&self, position: &MemPosition) -> Result<SpanBuffer> {
        if position.is_no_data() {
            return Ok(SpanBuffer::empty());
        }
        let block = self
            .lock()
            .get(position.0 as usize)
            .cloned()
            .ok_or(BufferError::IllegalState("unknown block index"))?;
        Ok(SpanBuffer::wrap_region(block))
    }

    fn read_position(&self, bytes: &[u8]) -> Result<MemPosition> {
        let raw: [u8; 4] = bytes
            .try_into()
            .map_err(|_| BufferError::IllegalState("position must be four bytes"))?;
        Ok(MemPosition(u32::from_be_bytes(raw)))
    }
}
