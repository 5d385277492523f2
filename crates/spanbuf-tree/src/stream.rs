//! The tree writer: a byte stream out, a balanced tree of blocks in the
//! store, one root position back.

use crate::node::{BlockFactory, InnerNode, LeafNode, FLAG_INNER_REF, FLAG_LEAF_REF};
use crate::serde::TreeSerializer;
use spanbuf::{BufferError, Result};
use std::io::{self, Write};

/// A byte-stream writer that emits a balanced tree over a block store.
///
/// The stack holds the current leaf plus one inner node per tree level;
/// nodes flush upward only when more data arrives for them, so empty inner
/// levels are never serialized and an empty stream writes no blocks at all
/// (its root is the serializer's no-data position). A whole message that
/// fits in one inner block short-circuits into a single `OUTER` block at
/// [`close`](TreeOutputStream::close).
pub struct TreeOutputStream<S: TreeSerializer, F: BlockFactory> {
    serializer: S,
    factory: F,
    /// `None` once closed; doubles as the closed flag.
    leaf: Option<LeafNode>,
    /// Inner node for tree level `i` at index `i - 1`.
    inners: Vec<InnerNode>,
    root: Option<S::Position>,
}

impl<S: TreeSerializer, F: BlockFactory> TreeOutputStream<S, F> {
    /// Creates a writer, validating the factory/serializer geometry.
    pub fn new(serializer: S, factory: F) -> Result<Self> {
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
        let leaf = LeafNode::new(&factory);
        let first_inner = InnerNode::new(&factory, FLAG_LEAF_REF)?;
        Ok(Self {
            serializer,
            factory,
            leaf: Some(leaf),
            inners: vec![first_inner],
            root: None,
        })
    }

    /// Appends bytes to the stream.
    pub fn append(&mut self, mut data: &[u8]) -> Result<()> {
        if self.leaf.is_none() {
            return Err(BufferError::IllegalState("stream is closed"));
        }
        while !data.is_empty() {
            if self.leaf_space() == 0 {
                self.flush_leaf()?;
            }
            let take = data.len().min(self.leaf_space());
            self.leaf_mut()?.write(&data[..take])?;
            data = &data[take..];
        }
        Ok(())
    }

    /// Flushes whatever remains, writes the ancestry, and records the root
    /// position. Idempotent.
    pub fn close(&mut self) -> Result<()> {
        let Some(leaf) = self.leaf.take() else {
            return Ok(());
        };

        // Nothing was ever written: the leaf is only cleared when more data
        // immediately follows, so an empty leaf here means an empty stream.
        if leaf.is_data_empty() {
            self.factory.free(leaf.into_block());
            self.release_inners();
            self.root = Some(self.serializer.no_data());
            return Ok(());
        }

        // OUTER shortcut: a two-entry stack whose inner level is untouched,
        // with the whole payload fitting beside the flag byte.
        if self.inners.len() == 1
            && self.inners[0].is_data_empty()
            && self.inners[0].has_space(leaf.payload_len())
        {
            let outer = InnerNode::outer_from_leaf(&self.factory, leaf)?;
            let root = self.serializer.serialize(outer.used())?;
            self.factory.free(outer.into_block());
            self.release_inners();
            self.root = Some(root);
            return Ok(());
        }

        // General case: serialize the leaf, then walk the stack upward,
        // pushing each level's position into its parent. The ascent may
        // cascade and even deepen the stack; the loop re-reads the length.
        let position = self.serializer.serialize(leaf.used())?;
        let encoded = self.serializer.serialize_position(&position)?;
        let expanded = leaf.expanded_length();
        self.factory.free(leaf.into_block());
        self.write_node(&encoded, 1, expanded)?;

        let mut level = 1;
        while level < self.inners.len() {
            let position = self.serializer.serialize(self.inners[level - 1].used())?;
            let encoded = self.serializer.serialize_position(&position)?;
            let expanded = self.inners[level - 1].expanded_length();
            self.write_node(&encoded, level + 1, expanded)?;
            level += 1;
        }

        let top = self
            .inners
            .last()
            .ok_or(BufferError::IllegalState("tree stack lost its top"))?;
        let root = self.serializer.serialize(top.used())?;
        self.release_inners();
        self.root = Some(root);
        Ok(())
    }

    /// The root position of the written tree.
    ///
    /// Only available after [`close`](Self::close); asking earlier is
    /// `IllegalState`.
    pub fn position(&self) -> Result<S::Position> {
        self.root
            .clone()
            .ok_or(BufferError::IllegalState("position requested before close"))
    }

    /// Returns `true` once the stream has been closed.
    pub fn is_closed(&self) -> bool {
        self.leaf.is_none()
    }

    fn leaf_space(&self) -> usize {
        self.leaf.as_ref().map_or(0, LeafNode::space)
    }

    fn leaf_mut(&mut self) -> Result<&mut LeafNode> {
        self.leaf
            .as_mut()
            .ok_or(BufferError::IllegalState("stream is closed"))
    }

    /// Serializes the full leaf, pushes its position into level 1, and
    /// resets the leaf for more data.
    fn flush_leaf(&mut self) -> Result<()> {
        let (stored, expanded) = {
            let leaf = self
                .leaf
                .as_ref()
                .ok_or(BufferError::IllegalState("stream is closed"))?;
            (
                self.serializer.serialize(leaf.used())?,
                leaf.expanded_length(),
            )
        };
        let encoded = self.serializer.serialize_position(&stored)?;
        self.write_node(&encoded, 1, expanded)?;
        self.leaf_mut()?.clear_data();
        Ok(())
    }

    /// Writes `data` into the inner node at stack `index`, flushing that
    /// node one level up first when it lacks space. New levels materialize
    /// only here, at the moment data arrives for them.
    fn write_node(&mut self, data: &[u8], index: usize, expanded: i64) -> Result<()> {
        if index > self.inners.len() {
            self.inners.push(InnerNode::new(&self.factory, FLAG_INNER_REF)?);
        }
        if !self.inners[index - 1].has_space(data.len()) {
            let position = self.serializer.serialize(self.inners[index - 1].used())?;
            let encoded = self.serializer.serialize_position(&position)?;
            let child_expanded = self.inners[index - 1].expanded_length();
            self.write_node(&encoded, index + 1, child_expanded)?;
            self.inners[index - 1].clear_data()?;
        }
        self.inners[index - 1].write(data, expanded)
    }

    fn release_inners(&mut self) {
        for inner in self.inners.drain(..) {
            self.factory.free(inner.into_block());
        }
    }
}

impl<S: TreeSerializer, F: BlockFactory> Write for TreeOutputStream<S, F> {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.append(data)?;
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
