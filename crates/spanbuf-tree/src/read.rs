//! Read-side traversal: rehydrating a buffer from a stored tree.
//!
//! Reads descend the tree on demand. Each stored block gets a loader
//! implementing the core [`LazyLoader`] contract; composites and payloads
//! are cached weakly, so a path from root to leaf materializes when read
//! and is reclaimed once nothing holds it. Node *lengths* are memoised
//! separately: positions carry no length, so the first query walks child
//! blocks once, and later rebuilds reuse the memo without re-walking.

use crate::node::{FLAG_INNER_REF, FLAG_LEAF_REF, FLAG_OUTER};
use crate::serde::{TreeDeserializer, TreePosition};
use spanbuf::{merge_at, BufferError, LazyLoader, LazySpan, ReclaimCache, Result, SpanBuffer};
use std::fmt;
use std::sync::{Arc, OnceLock};

/// Rehydrates the buffer rooted at `position`.
///
/// A no-data position yields the empty buffer. Otherwise the result is a
/// lazy buffer of the stream's full length whose reads materialize tree
/// paths on demand.
pub fn hydrate<D>(deserializer: D, position: D::Position) -> Result<SpanBuffer>
where
    D: TreeDeserializer + 'static,
{
    if position.is_no_data() {
        return Ok(SpanBuffer::empty());
    }
    let loader: Arc<dyn LazyLoader> = Arc::new(InnerLoader::new(Arc::new(deserializer), position));
    let length = loader.length()?;
    Ok(SpanBuffer::from_impl(LazySpan::with_range(
        loader, 0, 0, length,
    )))
}

/// Decoded structure of an inner block, computed once and kept for the
/// loader's lifetime (unlike the data, which is reclaimable).
enum InnerShape {
    /// User bytes follow the flag inline.
    Outer,
    /// Child loaders in stream order.
    Children(Vec<Arc<dyn LazyLoader>>),
}

/// Loader for an inner block: materializes the ordered catenation of its
/// children (or its inline bytes) as one composite buffer.
struct InnerLoader<D: TreeDeserializer> {
    deserializer: Arc<D>,
    position: D::Position,
    shape: OnceLock<InnerShape>,
    length: OnceLock<i64>,
    cache: ReclaimCache,
}

impl<D: TreeDeserializer + 'static> InnerLoader<D> {
    fn new(deserializer: Arc<D>, position: D::Position) -> Self {
        Self {
            deserializer,
            position,
            shape: OnceLock::new(),
            length: OnceLock::new(),
            cache: ReclaimCache::new(),
        }
    }

    /// The stored block minus the factory header, relabeled at 0.
    fn payload(&self) -> Result<SpanBuffer> {
        let block = self.deserializer.deserialize(&self.position)?;
        let header = self.deserializer.header_size() as i64;
        Ok(block.cut(header)?.duplicate(0))
    }

    fn shape(&self) -> Result<&InnerShape> {
        if let Some(shape) = self.shape.get() {
            return Ok(shape);
        }
        let payload = self.payload()?;
        let flag = payload.byte_relative(0)?;
        log::trace!("decoding inner block {:?} flag {flag}", self.position);
        let shape = match flag {
            FLAG_OUTER => InnerShape::Outer,
            FLAG_LEAF_REF | FLAG_INNER_REF => {
                let body = payload.cut(1)?.to_vec()?;
                let width = self.deserializer.position_size();
                if width == 0 || body.len() % width != 0 {
                    return Err(BufferError::IllegalState(
                        "inner body is not a whole number of child positions",
                    ));
                }
                let mut children: Vec<Arc<dyn LazyLoader>> = Vec::new();
                for chunk in body.chunks_exact(width) {
                    let position = self.deserializer.read_position(chunk)?;
                    if position.is_no_data() {
                        continue;
                    }
                    if flag == FLAG_LEAF_REF {
                        children.push(Arc::new(LeafLoader::new(
                            Arc::clone(&self.deserializer),
                            position,
                        )));
                    } else {
                        children.push(Arc::new(InnerLoader::new(
                            Arc::clone(&self.deserializer),
                            position,
                        )));
                    }
                }
                InnerShape::Children(children)
            }
            _ => {
                return Err(BufferError::IllegalState("unrecognized tree node flag"));
            }
        };
        Ok(self.shape.get_or_init(|| shape))
    }

    fn materialize(&self) -> Result<SpanBuffer> {
        self.cache.get_or_fill(|| match self.shape()? {
            InnerShape::Outer => Ok(self.payload()?.cut(1)?.duplicate(0)),
            InnerShape::Children(loaders) => {
                let mut children = Vec::with_capacity(loaders.len());
                let mut running = 0;
                for loader in loaders {
                    let length = loader.length()?;
                    children.push(SpanBuffer::from_impl(LazySpan::with_range(
                        Arc::clone(loader),
                        running,
                        0,
                        length,
                    )));
                    running += length;
                }
                Ok(merge_at(0, children))
            }
        })
    }
}

impl<D: TreeDeserializer> fmt::Debug for InnerLoader<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TreeInnerLoader {{ position: {:?} }}", self.position)
    }
}

impl<D: TreeDeserializer + 'static> LazyLoader for InnerLoader<D> {
    fn load(&self, inset: i64) -> Result<SpanBuffer> {
        self.materialize()?.cut(inset)
    }

    fn length(&self) -> Result<i64> {
        if let Some(length) = self.length.get() {
            return Ok(*length);
        }
        let length = match self.shape()? {
            InnerShape::Outer => self.payload()?.length() - 1,
            InnerShape::Children(loaders) => {
                let mut total = 0;
                for loader in loaders {
                    total += loader.length()?;
                }
                total
            }
        };
        Ok(*self.length.get_or_init(|| length))
    }
}

/// Loader for a leaf block: its payload bytes, relabeled at 0.
struct LeafLoader<D: TreeDeserializer> {
    deserializer: Arc<D>,
    position: D::Position,
    length: OnceLock<i64>,
    cache: ReclaimCache,
}

impl<D: TreeDeserializer> LeafLoader<D> {
    fn new(deserializer: Arc<D>, position: D::Position) -> Self {
        Self {
            deserializer,
            position,
            length: OnceLock::new(),
            cache: ReclaimCache::new(),
        }
    }
}

impl<D: TreeDeserializer> fmt::Debug for LeafLoader<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TreeLeafLoader {{ position: {:?} }}", self.position)
    }
}

impl<D: TreeDeserializer> LazyLoader for LeafLoader<D> {
    fn load(&self, inset: i64) -> Result<SpanBuffer> {
        let payload = self.cache.get_or_fill(|| {
            let block = self.deserializer.deserialize(&self.position)?;
            let header = self.deserializer.header_size() as i64;
            Ok(block.cut(header)?.duplicate(0))
        })?;
        let _ = self.length.get_or_init(|| payload.length());
        payload.cut(inset)
    }

    fn length(&self) -> Result<i64> {
        if let Some(length) = self.length.get() {
            return Ok(*length);
        }
        Ok(self.load(0)?.length())
    }
}
