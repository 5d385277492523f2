//! Integration tests for the factory: file wrapping (heap, segmented,
//! mapped), spooling, and reaper-driven cleanup.

use spanbuf::{FactoryConfig, FileOptions, SpanBuffer, SpanFactory};
use std::io::Write;
use std::time::{Duration, Instant};

fn patterned(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 251) as u8).collect()
}

fn write_temp(dir: &tempfile::TempDir, name: &str, bytes: &[u8]) -> std::path::PathBuf {
    let path = dir.path().join(name);
    let mut file = std::fs::File::create(&path).unwrap();
    file.write_all(bytes).unwrap();
    file.flush().unwrap();
    path
}

fn wait_until(what: &str, condition: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        std::thread::sleep(Duration::from_millis(10));
    }
}

#[test]
fn test_small_file_is_wrapped_fully_in_memory() {
    let dir = tempfile::tempdir().unwrap();
    let bytes = patterned(1000);
    let path = write_temp(&dir, "small.bin", &bytes);

    let factory = SpanFactory::default();
    let buffer = factory.wrap_file(&path).unwrap();
    assert_eq!(buffer.offset(), 0);
    assert_eq!(buffer.length(), 1000);
    assert_eq!(buffer.to_vec().unwrap(), bytes);
}

#[test]
fn test_large_file_is_segmented_lazily() {
    let dir = tempfile::tempdir().unwrap();
    let bytes = patterned(10_000);
    let path = write_temp(&dir, "large.bin", &bytes);

    // 10_000 bytes over 1_024-byte segments: ceil -> 10 lazy children.
    let factory = SpanFactory::new(FactoryConfig::new(4_096, 1_024));
    let buffer = factory.wrap_file(&path).unwrap();
    assert_eq!(buffer.length(), 10_000);
    assert!(format!("{buffer:?}").contains("children: 10"));
    assert_eq!(buffer.to_vec().unwrap(), bytes);

    // Segment boundaries are invisible to the algebra.
    let carved = buffer.cut(1_000).unwrap().head(2_048).unwrap();
    assert_eq!(carved.to_vec().unwrap(), bytes[1_000..3_048].to_vec());
    assert_eq!(
        buffer,
        SpanBuffer::wrap(bytes),
        "segmented content equals in-memory content"
    );
}

#[test]
fn test_mapped_backing_reads_identically() {
    let dir = tempfile::tempdir().unwrap();
    let bytes = patterned(8_192);
    let path = write_temp(&dir, "mapped.bin", &bytes);

    let factory = SpanFactory::new(FactoryConfig::new(1_024, 3_000));
    let mapped = factory.as_mem_map(&path).unwrap();
    assert_eq!(mapped.length(), 8_192);
    assert_eq!(mapped.to_vec().unwrap(), bytes);
    // Unaligned segment windows still map correctly.
    let unaligned = factory.as_mem_map_with(&path, 1_111).unwrap();
    assert_eq!(unaligned.to_vec().unwrap(), bytes);
}

#[test]
fn test_mapped_forced_even_for_small_files() {
    let dir = tempfile::tempdir().unwrap();
    let bytes = patterned(100);
    let path = write_temp(&dir, "tiny.bin", &bytes);

    let factory = SpanFactory::default();
    let mapped = factory.as_mem_map(&path).unwrap();
    assert_eq!(mapped.to_vec().unwrap(), bytes);
}

#[test]
fn test_wrap_handle_shares_one_descriptor_across_segments() {
    let dir = tempfile::tempdir().unwrap();
    let bytes = patterned(5_000);
    let path = write_temp(&dir, "handle.bin", &bytes);

    let factory = SpanFactory::new(FactoryConfig::new(1_000, 512));
    let file = std::fs::File::open(&path).unwrap();
    let buffer = factory.wrap_handle(file, FileOptions::default()).unwrap();
    assert_eq!(buffer.to_vec().unwrap(), bytes);
}

#[test]
fn test_delete_after_use_removes_file_once_buffers_drop() {
    let dir = tempfile::tempdir().unwrap();
    let bytes = patterned(6_000);
    let path = write_temp(&dir, "doomed.bin", &bytes);

    let factory = SpanFactory::new(FactoryConfig::new(1_000, 2_048));
    let options = FileOptions {
        delete_after_use: true,
        ..FileOptions::default()
    };
    let buffer = factory.wrap_file_with(&path, options).unwrap();
    assert_eq!(buffer.to_vec().unwrap(), bytes);
    assert!(path.exists(), "file lives while a buffer references it");

    drop(buffer);
    wait_until("delete-after-use to fire", || !path.exists());
    assert_eq!(factory.reaper().failures().len(), 0);
}

#[test]
fn test_delete_after_use_on_small_file_deletes_eagerly() {
    let dir = tempfile::tempdir().unwrap();
    let bytes = patterned(100);
    let path = write_temp(&dir, "eager.bin", &bytes);

    let factory = SpanFactory::default();
    let options = FileOptions {
        delete_after_use: true,
        ..FileOptions::default()
    };
    let buffer = factory.wrap_file_with(&path, options).unwrap();
    // Fully read into memory: the source is gone already, the bytes are not.
    assert!(!path.exists());
    assert_eq!(buffer.to_vec().unwrap(), bytes);
}

#[test]
fn test_spool_stays_in_memory_below_threshold() {
    let factory = SpanFactory::new(FactoryConfig::new(1_024, 256));
    let mut spool = factory.spool();
    spool.write_all(b"fits in memory").unwrap();
    assert!(!spool.is_spilled());
    let buffer = spool.into_buffer().unwrap();
    assert_eq!(buffer.text().unwrap(), "fits in memory");
    assert_eq!(factory.reaper().tracked_count(), 0);
}

#[test]
fn test_spool_spills_and_cleans_up_after_itself() {
    let bytes = patterned(5_000);
    let factory = SpanFactory::new(FactoryConfig::new(1_024, 512));

    let mut spool = factory.spool();
    spool.write_all(&bytes).unwrap();
    assert!(spool.is_spilled());
    assert_eq!(spool.written(), 5_000);

    let buffer = spool.into_buffer().unwrap();
    assert_eq!(buffer.length(), 5_000);
    assert_eq!(buffer.to_vec().unwrap(), bytes);
    assert_eq!(factory.reaper().tracked_count(), 1);

    drop(buffer);
    wait_until("spill file release", || {
        factory.reaper().tracked_count() == 0
    });
    assert_eq!(factory.reaper().metrics().released(), 1);
    assert_eq!(factory.reaper().failures().len(), 0);
}

#[test]
fn test_wrap_read_goes_through_the_spool() {
    let bytes = patterned(3_000);
    let factory = SpanFactory::new(FactoryConfig::new(1_000, 512));
    let buffer = factory.wrap_read(bytes.as_slice()).unwrap();
    assert_eq!(buffer.to_vec().unwrap(), bytes);
}

#[test]
fn test_reaper_graceful_shutdown() {
    let factory = SpanFactory::default();
    factory.reaper().exit_when_finished();
    let marker = spanbuf::Marker::new();
    assert!(factory
        .reaper()
        .register(&marker, "late arrival", || Ok(()))
        .is_err());
}
