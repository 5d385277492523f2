//! Writing a byte stream as a block tree and reading it back.

use spanbuf_tree::{hydrate, HeapBlockFactory, MemoryBlockStore, TreeOutputStream};
use std::io::Write;

fn main() -> spanbuf::Result<()> {
    let store = MemoryBlockStore::new(0);
    let mut writer = TreeOutputStream::new(store.clone(), HeapBlockFactory::new(10, 0))?;

    // The writer is an io::Write sink; tiny blocks make the tree visible.
    writer.write_all(b"Now is the time for all good men ")?;
    writer.write_all(b"to come to the aid of their country")?;
    writer.close()?;

    let root = writer.position()?;
    println!("wrote {} blocks, root {:?}", store.block_count(), root);

    let buffer = hydrate(store, root)?;
    println!("rehydrated {} bytes: {}", buffer.length(), buffer.text()?);

    // The result is an ordinary buffer: slice it, search it, walk it.
    let aid = buffer.cut(48)?.head(3)?;
    println!("slice at {}: {}", aid.offset(), aid.text()?);
    Ok(())
}
