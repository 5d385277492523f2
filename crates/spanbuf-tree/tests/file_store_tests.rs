//! Integration tests for the file-backed block store: roundtrips through a
//! real file, checksum headers, and corruption detection.

use spanbuf::BufferError;
use spanbuf_tree::{hydrate, FileBlockStore, HeapBlockFactory, Serde};
use std::io::{Seek, SeekFrom, Write};

fn patterned(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 17 % 253) as u8).collect()
}

fn file_serde(
    store: &FileBlockStore,
    block_size: usize,
) -> Serde<HeapBlockFactory, FileBlockStore, FileBlockStore> {
    Serde::new(
        HeapBlockFactory::new(block_size, FileBlockStore::HEADER_SIZE),
        store.clone(),
        store.clone(),
    )
    .unwrap()
}

#[test]
fn test_roundtrip_through_a_store_file() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileBlockStore::create(dir.path().join("tree.dat")).unwrap();
    let serde = file_serde(&store, 64);
    let data = patterned(10_000);

    let mut writer = serde.writer().unwrap();
    writer.append(&data).unwrap();
    writer.close().unwrap();
    let root = writer.position().unwrap();

    let buffer = serde.hydrate(&root).unwrap();
    assert_eq!(buffer.length(), 10_000);
    assert_eq!(buffer.to_vec().unwrap(), data);

    // Random access without reading the whole stream.
    let window = buffer.cut(4_321).unwrap().head(77).unwrap();
    assert_eq!(window.to_vec().unwrap(), data[4_321..4_398].to_vec());
}

#[test]
fn test_store_survives_reopening() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tree.dat");
    let data = patterned(2_000);

    let root = {
        let store = FileBlockStore::create(&path).unwrap();
        let serde = file_serde(&store, 32);
        let mut writer = serde.writer().unwrap();
        writer.append(&data).unwrap();
        writer.close().unwrap();
        writer.position().unwrap()
    };

    let reopened = FileBlockStore::open(&path).unwrap();
    let buffer = hydrate(reopened, root).unwrap();
    assert_eq!(buffer.to_vec().unwrap(), data);
}

#[test]
fn test_corrupted_payload_fails_the_checksum() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tree.dat");
    let store = FileBlockStore::create(&path).unwrap();
    let serde = file_serde(&store, 32);

    let mut writer = serde.writer().unwrap();
    writer.append(&patterned(500)).unwrap();
    writer.close().unwrap();
    let root = writer.position().unwrap();

    // Flip one payload byte of the first record: offset 0 is its length
    // word, then the CRC header, then payload.
    {
        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .open(&path)
            .unwrap();
        file.seek(SeekFrom::Start(4 + 4 + 2)).unwrap();
        file.write_all(&[0xAA]).unwrap();
        file.flush().unwrap();
    }

    // The failure may surface while resolving lengths at hydration or on
    // the first read, depending on which block the traversal touches first.
    let outcome = serde.hydrate(&root).and_then(|buffer| buffer.to_vec());
    match outcome {
        Err(BufferError::Io(err)) => {
            assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
        }
        other => panic!("expected a checksum failure, got {other:?}"),
    }
}

#[test]
fn test_mixed_small_objects_share_one_store() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileBlockStore::create(dir.path().join("tree.dat")).unwrap();
    let serde = file_serde(&store, 32);

    let mut roots = Vec::new();
    for size in [0usize, 3, 26, 27, 400] {
        let mut writer = serde.writer().unwrap();
        writer.append(&patterned(size)).unwrap();
        writer.close().unwrap();
        roots.push((size, writer.position().unwrap()));
    }

    for (size, root) in roots {
        let buffer = serde.hydrate(&root).unwrap();
        assert_eq!(buffer.length() as usize, size, "stream of {size} bytes");
        assert_eq!(buffer.to_vec().unwrap(), patterned(size));
    }
}
