//! The pluggable serialization contracts a block store implements.

use crate::node::BlockFactory;
use crate::read;
use crate::stream::TreeOutputStream;
use spanbuf::{BufferError, Result, SpanBuffer};
use std::fmt;

/// An opaque block locator understood by one serializer/deserializer pair.
///
/// Serializes to a fixed number of bytes advertised by the serializer. The
/// only property this layer inspects is [`is_no_data`](TreePosition::is_no_data),
/// the root of an empty stream.
pub trait TreePosition: fmt::Debug + Clone + PartialEq + Send + Sync + 'static {
    /// Returns `true` for the position that stands for "nothing stored".
    fn is_no_data(&self) -> bool;
}

/// Writes blocks into a store and names each with a position.
pub trait TreeSerializer: Send + Sync {
    type Position: TreePosition;

    /// Largest block this serializer can store.
    fn max_buffer_size(&self) -> usize;

    /// Exact byte width of a serialized position.
    fn position_size(&self) -> usize;

    /// The position standing for an empty stream.
    fn no_data(&self) -> Self::Position;

    /// Stores one block (header plus written payload) and names it.
    fn serialize(&self, block: &[u8]) -> Result<Self::Position>;

    /// Encodes a position into exactly [`position_size`](Self::position_size)
    /// bytes for embedding into a parent inner node.
    fn serialize_position(&self, position: &Self::Position) -> Result<Vec<u8>>;
}

/// Reads stored blocks back by position.
pub trait TreeDeserializer: Send + Sync {
    type Position: TreePosition;

    /// Bytes to skip at the front of every returned block before the
    /// payload; must equal the factory's reservation.
    fn header_size(&self) -> usize;

    /// Byte width of a serialized position; must equal the serializer's.
    fn position_size(&self) -> usize;

    /// Fetches the block named by `position`. Never called with a
    /// [`no_data`](TreePosition::is_no_data) position by this layer.
    fn deserialize(&self, position: &Self::Position) -> Result<SpanBuffer>;

    /// Decodes one position from exactly
    /// [`position_size`](TreeSerializer::position_size) bytes.
    fn read_position(&self, bytes: &[u8]) -> Result<Self::Position>;
}

/// A compatible `(factory, serializer, deserializer)` triple.
///
/// Construction runs the contract check: an inner block must fit its flag
/// byte plus at least two child positions, the serializer must accept the
/// factory's block size, and factory and deserializer must agree on the
/// header reservation.
pub struct Serde<F, S, D> {
    pub factory: F,
    pub serializer: S,
    pub deserializer: D,
}

impl<F, S, D> Serde<F, S, D>
where
    F: BlockFactory,
    S: TreeSerializer,
    D: TreeDeserializer<Position = S::Position>,
{
    pub fn new(factory: F, serializer: S, deserializer: D) -> Result<Self> {
        Self::verify(&factory, &serializer, &deserializer)?;
        Ok(Self {
            factory,
            serializer,
            deserializer,
        })
    }

    /// Checks the triple without constructing it.
    pub fn verify(factory: &F, serializer: &S, deserializer: &D) -> Result<()> {
        let needed = factory.header_size() + 1 + 2 * serializer.position_size();
        if factory.buffer_size() < needed {
            return Err(BufferError::IllegalState(
                "block size cannot fit a flag byte and two child positions",
            ));
        }
        if factory.buffer_size() > serializer.max_buffer_size() {
            return Err(BufferError::IllegalState(
                "block size exceeds the serializer's limit",
            ));
        }
        if factory.header_size() != deserializer.header_size() {
            return Err(BufferError::IllegalState(
                "factory and deserializer disagree on header size",
            ));
        }
        if serializer.position_size() != deserializer.position_size() {
            return Err(BufferError::IllegalState(
                "serializer and deserializer disagree on position width",
            ));
        }
        Ok(())
    }

    /// A tree writer over this triple.
    pub fn writer(&self) -> Result<TreeOutputStream<S, F>>
    where
        S: Clone,
        F: Clone,
    {
        TreeOutputStream::new(self.serializer.clone(), self.factory.clone())
    }

    /// Rehydrates the buffer a writer's root position describes.
    pub fn hydrate(&self, position: &S::Position) -> Result<SpanBuffer>
    where
        D: Clone + 'static,
    {
        read::hydrate(self.deserializer.clone(), position.clone())
    }
}
