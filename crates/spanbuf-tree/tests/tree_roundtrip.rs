//! End-to-end tree serialization tests: exact block layout for known
//! inputs, and roundtrip properties over arbitrary inputs and geometries.

use proptest::prelude::*;
use spanbuf_tree::{
    hydrate, HeapBlockFactory, MemPosition, MemoryBlockStore, Serde, TreeOutputStream,
    TreePosition, TreeSerializer, FLAG_INNER_REF, FLAG_LEAF_REF, FLAG_OUTER,
};

/// The reference geometry: 10-byte blocks, 4-byte positions, no header.
fn small_writer(store: &MemoryBlockStore) -> TreeOutputStream<MemoryBlockStore, HeapBlockFactory> {
    TreeOutputStream::new(store.clone(), HeapBlockFactory::new(10, 0)).unwrap()
}

fn write_all(store: &MemoryBlockStore, data: &[u8]) -> MemPosition {
    let mut writer = small_writer(store);
    writer.append(data).unwrap();
    writer.close().unwrap();
    writer.position().unwrap()
}

/// An expected inner block: flag byte plus packed 4-byte child indices.
fn inner_block(flag: u8, children: &[u32]) -> Vec<u8> {
    let mut bytes = vec![flag];
    for child in children {
        bytes.extend_from_slice(&child.to_be_bytes());
    }
    bytes
}

#[test]
fn test_empty_stream_has_no_data_root() {
    let store = MemoryBlockStore::new(0);
    let root = write_all(&store, b"");
    assert!(root.is_no_data());
    assert_eq!(store.block_count(), 0, "no block written for empty input");
    let buffer = hydrate(store, root).unwrap();
    assert_eq!(buffer.length(), 0);
}

#[test]
fn test_small_object_takes_the_outer_shortcut() {
    let store = MemoryBlockStore::new(0);
    let root = write_all(&store, b"Now");
    assert_eq!(store.block_count(), 1, "exactly one block written");
    let block = store.block(0).unwrap();
    assert_eq!(block[0], FLAG_OUTER);
    assert_eq!(&block[1..], b"Now");
    let buffer = hydrate(store, root).unwrap();
    assert_eq!(buffer.text().unwrap(), "Now");
}

#[test]
fn test_long_input_builds_the_balanced_tree_in_order() {
    let store = MemoryBlockStore::new(0);
    let text = b"Now is the time for all good men to come to the aid of their country";
    assert_eq!(text.len(), 68);
    let root = write_all(&store, text);

    let expected: Vec<Vec<u8>> = vec![
        b"Now is the".to_vec(),                    // 0
        b" time for ".to_vec(),                    // 1
        b"all good m".to_vec(),                    // 2
        inner_block(FLAG_LEAF_REF, &[0, 1]),       // 3
        b"en to come".to_vec(),                    // 4
        b" to the ai".to_vec(),                    // 5
        inner_block(FLAG_LEAF_REF, &[2, 4]),       // 6
        b"d of their".to_vec(),                    // 7
        b" country".to_vec(),                      // 8
        inner_block(FLAG_LEAF_REF, &[5, 7]),       // 9
        inner_block(FLAG_INNER_REF, &[3, 6]),      // 10
        inner_block(FLAG_LEAF_REF, &[8]),          // 11
        inner_block(FLAG_INNER_REF, &[9, 11]),     // 12
        inner_block(FLAG_INNER_REF, &[10, 12]),    // 13 (root)
    ];

    assert_eq!(store.block_count(), expected.len());
    for (index, want) in expected.iter().enumerate() {
        let got = store.block(index).unwrap();
        assert_eq!(
            got.as_slice(),
            want.as_slice(),
            "block {index} differs"
        );
    }
    assert_eq!(root.index(), 13, "last block written is the root");

    let buffer = hydrate(store, root).unwrap();
    assert_eq!(buffer.length(), 68);
    assert_eq!(buffer.text().unwrap(), std::str::from_utf8(text).unwrap());
}

#[test]
fn test_rehydrated_buffer_supports_the_algebra() {
    let store = MemoryBlockStore::new(0);
    let text = b"Now is the time for all good men to come to the aid of their country";
    let root = write_all(&store, text);
    let buffer = hydrate(store, root).unwrap();

    // Slices cross leaf and inner boundaries transparently.
    let middle = buffer.cut(20).unwrap().head(13).unwrap();
    assert_eq!(middle.text().unwrap(), "all good men ");
    let tail = buffer.tail(7).unwrap();
    assert_eq!(tail.text().unwrap(), "country");

    // Search and walkers work over the lazy tree.
    let needle = spanbuf::SpanBuffer::wrap_text("aid");
    assert_eq!(buffer.position_of(&needle).unwrap(), Some(48));
    let mut walker = buffer.walker_at(4).unwrap();
    assert_eq!(walker.read_u8().unwrap(), b'i');

    // Repeated reads are stable despite cache reclamation in between.
    assert_eq!(buffer.to_vec().unwrap(), buffer.to_vec().unwrap());
}

#[test]
fn test_exactly_one_leaf_without_outer_room() {
    let store = MemoryBlockStore::new(0);
    // Ten bytes fill the leaf exactly; with the flag byte they no longer
    // fit an inner block, so no OUTER shortcut applies.
    let root = write_all(&store, b"0123456789");
    assert_eq!(store.block_count(), 2);
    assert_eq!(store.block(0).unwrap().as_slice(), b"0123456789");
    assert_eq!(
        store.block(1).unwrap().as_slice(),
        inner_block(FLAG_LEAF_REF, &[0]).as_slice()
    );
    assert_eq!(root.index(), 1);
    let buffer = hydrate(store, root).unwrap();
    assert_eq!(buffer.text().unwrap(), "0123456789");
}

#[test]
fn test_outer_boundary_is_payload_capacity_minus_flag() {
    let store = MemoryBlockStore::new(0);
    // Nine bytes + flag = ten: the largest OUTER payload for 10-byte blocks.
    let root = write_all(&store, b"012345678");
    assert_eq!(store.block_count(), 1);
    assert_eq!(store.block(0).unwrap()[0], FLAG_OUTER);
    let buffer = hydrate(store, root).unwrap();
    assert_eq!(buffer.text().unwrap(), "012345678");
}

#[test]
fn test_position_before_close_is_illegal() {
    let store = MemoryBlockStore::new(0);
    let mut writer = small_writer(&store);
    writer.append(b"pending").unwrap();
    assert!(writer.position().is_err());
    writer.close().unwrap();
    assert!(writer.position().is_ok());
    // Close is idempotent; writes after close are rejected.
    writer.close().unwrap();
    assert!(writer.append(b"more").is_err());
}

#[test]
fn test_nonzero_header_is_written_and_skipped() {
    let header = 3;
    let store = MemoryBlockStore::new(header);
    let factory = HeapBlockFactory::new(16, header);
    let serde = Serde::new(factory, store.clone(), store.clone()).unwrap();

    let mut writer = serde.writer().unwrap();
    writer.append(b"headered payload across blocks").unwrap();
    writer.close().unwrap();
    let root = writer.position().unwrap();

    // Every stored block begins with the opaque (zeroed) header.
    for index in 0..store.block_count() {
        let block = store.block(index).unwrap();
        assert_eq!(&block[..header], &[0, 0, 0], "block {index} header");
    }

    let buffer = serde.hydrate(&root).unwrap();
    assert_eq!(buffer.text().unwrap(), "headered payload across blocks");
}

#[test]
fn test_serde_verify_rejects_mismatched_geometry() {
    let store = MemoryBlockStore::new(0);
    // 9 bytes is the minimum for flag + two 4-byte positions; 8 is not.
    assert!(Serde::new(HeapBlockFactory::new(8, 0), store.clone(), store.clone()).is_err());
    assert!(Serde::new(HeapBlockFactory::new(9, 0), store.clone(), store.clone()).is_ok());
}

proptest! {
    /// Whatever goes in comes back, for arbitrary inputs and geometries.
    #[test]
    fn prop_roundtrip_is_identity(
        data in prop::collection::vec(any::<u8>(), 0..600),
        block_size in 12usize..48,
        header in 0usize..3,
    ) {
        let store = MemoryBlockStore::new(header);
        let factory = HeapBlockFactory::new(block_size, header);
        let mut writer = TreeOutputStream::new(store.clone(), factory).unwrap();
        writer.append(&data).unwrap();
        writer.close().unwrap();
        let root = writer.position().unwrap();

        let buffer = hydrate(store, root).unwrap();
        prop_assert_eq!(buffer.length() as usize, data.len());
        prop_assert_eq!(buffer.to_vec().unwrap(), data);
    }

    /// An empty input never stores a block; a fitting input stores exactly
    /// one OUTER block.
    #[test]
    fn prop_root_shape_matches_size(data in prop::collection::vec(any::<u8>(), 0..40)) {
        let store = MemoryBlockStore::new(0);
        let factory = HeapBlockFactory::new(24, 0);
        let mut writer = TreeOutputStream::new(store.clone(), factory).unwrap();
        writer.append(&data).unwrap();
        writer.close().unwrap();
        let root = writer.position().unwrap();

        if data.is_empty() {
            prop_assert_eq!(root, store.no_data());
            prop_assert_eq!(store.block_count(), 0);
        } else if data.len() <= 23 {
            // Fits beside the flag byte in a single inner block.
            prop_assert_eq!(store.block_count(), 1);
            prop_assert_eq!(store.block(0).unwrap()[0], FLAG_OUTER);
        } else {
            prop_assert!(store.block_count() > 1);
        }
        let buffer = hydrate(store, root).unwrap();
        prop_assert_eq!(buffer.to_vec().unwrap(), data);
    }

    /// Chunked appends and one-shot appends produce identical stores.
    #[test]
    fn prop_append_chunking_is_invisible(
        data in prop::collection::vec(any::<u8>(), 0..300),
        chunk in 1usize..17,
    ) {
        let whole = MemoryBlockStore::new(0);
        let mut writer = TreeOutputStream::new(whole.clone(), HeapBlockFactory::new(10, 0)).unwrap();
        writer.append(&data).unwrap();
        writer.close().unwrap();
        let whole_root = writer.position().unwrap();

        let pieces = MemoryBlockStore::new(0);
        let mut writer = TreeOutputStream::new(pieces.clone(), HeapBlockFactory::new(10, 0)).unwrap();
        for part in data.chunks(chunk) {
            writer.append(part).unwrap();
        }
        writer.close().unwrap();
        let pieces_root = writer.position().unwrap();

        prop_assert_eq!(whole_root, pieces_root);
        prop_assert_eq!(whole.block_count(), pieces.block_count());
        for index in 0..whole.block_count() {
            prop_assert_eq!(whole.block(index).unwrap(), pieces.block(index).unwrap());
        }
    }
}
