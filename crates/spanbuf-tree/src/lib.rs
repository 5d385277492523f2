//! spanbuf-tree - Balanced-Tree Buffer Serialization
//!
//! Writes an arbitrary byte stream as a balanced tree of fixed-size blocks
//! over an opaque block store, and faithfully reconstructs it: the
//! transport for objects too large for any single frame of a channel.
//!
//! Leaf blocks carry raw user bytes; inner blocks carry a one-byte type
//! flag followed by packed child positions (or, for small messages, the
//! user bytes inline, the `OUTER` shortcut). An empty stream stores no
//! blocks at all: its root is the serializer's no-data position.
//!
//! # Example
//!
//! ```
//! use spanbuf_tree::{hydrate, HeapBlockFactory, MemoryBlockStore, TreeOutputStream};
//!
//! let store = MemoryBlockStore::new(0);
//! let mut writer =
//!     TreeOutputStream::new(store.clone(), HeapBlockFactory::new(10, 0)).unwrap();
//! writer.append(b"Now is the time for all good men").unwrap();
//! writer.close().unwrap();
//!
//! let root = writer.position().unwrap();
//! let buffer = hydrate(store, root).unwrap();
//! assert_eq!(buffer.text().unwrap(), "Now is the time for all good men");
//! ```

mod file_store;
mod mem_store;
mod node;
mod read;
mod serde;
mod stream;

pub use file_store::{FileBlockStore, FilePosition};
pub use mem_store::{MemPosition, MemoryBlockStore};
pub use node::{
    Block, BlockFactory, HeapBlockFactory, FLAG_INNER_REF, FLAG_LEAF_REF, FLAG_OUTER,
};
pub use read::hydrate;
pub use serde::{Serde, TreeDeserializer, TreePosition, TreeSerializer};
pub use stream::TreeOutputStream;
