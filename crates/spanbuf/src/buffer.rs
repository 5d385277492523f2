//! The buffer abstraction: primitive trait, shared handle, derived algebra.
//!
//! Variants implement the small [`Buffer`] trait (read, slice, head,
//! duplicate); everything else (cut/trunc/tail, concatenation, search,
//! equality, hashing, text) is derived once on [`SpanBuffer`], the
//! reference-counted handle every operation returns. Cloning a handle is an
//! `Arc` bump; the underlying bytes are never copied.

use crate::error::{BufferError, Result};
use crate::list;
use crate::walker::Walker;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, OnceLock, Weak};

// Chunk size for content comparison and hashing. Reads go through the
// positional API, so each chunk is one traversal of the variant tree.
const SCAN_CHUNK: usize = 512;

/// Primitive operations a buffer variant must supply.
///
/// Implementations may assume the handle has already range-checked
/// positional arguments: `read_at`/`byte_at` positions are contained,
/// `slice_at` positions lie in `[offset, end + 1]`, and `head` counts lie in
/// `[0, length]`.
pub trait Buffer: fmt::Debug + Send + Sync {
    /// Absolute logical position of the first byte. An opaque label; it may
    /// be negative and it survives slicing (`slice_at(p)` yields offset `p`).
    fn offset(&self) -> i64;

    /// Number of bytes in the buffer; never negative.
    fn length(&self) -> i64;

    /// Copies bytes starting at absolute `position` into `out`, returning
    /// the number copied. Returns fewer than `out.len()` only when the
    /// buffer's end intervenes; never more.
    fn read_at(&self, position: i64, out: &mut [u8]) -> Result<usize>;

    /// The single byte at absolute `position`.
    fn byte_at(&self, position: i64) -> Result<u8>;

    /// The suffix starting at absolute `position`, relabeled to offset
    /// `position`.
    fn slice_at(&self, position: i64) -> Result<SpanBuffer>;

    /// The first `count` bytes, offset preserved.
    fn head(&self, count: i64) -> Result<SpanBuffer>;

    /// The same content relabeled to start at `new_offset`.
    fn duplicate(&self, new_offset: i64) -> SpanBuffer;
}

struct Inner {
    backing: Box<dyn Buffer>,
    hash: OnceLock<i32>,
}

/// An immutable, positionally addressed byte sequence.
///
/// `SpanBuffer` is a cheap clonable handle over a shared variant (byte
/// region, composite list, lazy segment, tree node). All operations are
/// pure: each returns a new handle or a scalar, and the underlying bytes are
/// shared, never duplicated.
///
/// Every buffer carries two address spaces: *absolute* positions in
/// `[offset, offset + length)` and *relative* offsets in `[0, length)`, with
/// `absolute = offset + relative`.
#[derive(Clone)]
pub struct SpanBuffer {
    inner: Arc<Inner>,
}

/// A non-owning handle to a buffer, used by reclaimable caches.
///
/// Upgrading yields the buffer again while any strong handle survives.
#[derive(Clone)]
pub struct WeakSpan {
    inner: Weak<Inner>,
}

impl WeakSpan {
    /// A handle that will never upgrade.
    pub fn new() -> Self {
        Self { inner: Weak::new() }
    }

    /// Recovers a strong handle if the buffer is still alive.
    pub fn upgrade(&self) -> Option<SpanBuffer> {
        self.inner.upgrade().map(|inner| SpanBuffer { inner })
    }
}

impl Default for WeakSpan {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for WeakSpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.upgrade() {
            Some(buffer) => write!(f, "WeakSpan(live, {:?})", buffer),
            None => write!(f, "WeakSpan(reclaimed)"),
        }
    }
}

impl SpanBuffer {
    /// Wraps a concrete variant into a shared handle.
    pub fn from_impl(backing: impl Buffer + 'static) -> Self {
        Self {
            inner: Arc::new(Inner {
                backing: Box::new(backing),
                hash: OnceLock::new(),
            }),
        }
    }

    /// The canonical empty buffer at offset 0.
    pub fn empty() -> Self {
        Self::empty_at(0)
    }

    /// An empty buffer labeled to start at `offset`.
    pub fn empty_at(offset: i64) -> Self {
        Self::from_impl(EmptyBuffer { offset })
    }

    /// Wraps owned bytes without copying; offset 0.
    pub fn wrap(bytes: Vec<u8>) -> Self {
        Self::wrap_at(0, bytes)
    }

    /// Wraps owned bytes without copying, labeled at `offset`.
    pub fn wrap_at(offset: i64, bytes: Vec<u8>) -> Self {
        if bytes.is_empty() {
            Self::empty_at(offset)
        } else {
            Self::from_impl(crate::bytes::ByteSpan::from_vec(offset, bytes))
        }
    }

    /// Wraps the UTF-8 encoding of `text`; offset 0.
    pub fn wrap_text(text: &str) -> Self {
        Self::wrap(text.as_bytes().to_vec())
    }

    /// Wraps the UTF-8 encoding of `text`, labeled at `offset`.
    pub fn wrap_text_at(offset: i64, text: &str) -> Self {
        Self::wrap_at(offset, text.as_bytes().to_vec())
    }

    /// Wraps a shared byte region without copying; offset 0.
    pub fn wrap_region(region: Arc<dyn crate::bytes::ByteRegion>) -> Self {
        Self::wrap_region_at(0, region)
    }

    /// Wraps a shared byte region without copying, labeled at `offset`.
    pub fn wrap_region_at(offset: i64, region: Arc<dyn crate::bytes::ByteRegion>) -> Self {
        if region.as_bytes().is_empty() {
            Self::empty_at(offset)
        } else {
            Self::from_impl(crate::bytes::ByteSpan::from_region(offset, region))
        }
    }

    /// Downgrades to a cache-friendly weak handle.
    pub fn downgrade(&self) -> WeakSpan {
        WeakSpan {
            inner: Arc::downgrade(&self.inner),
        }
    }

    // ---------------------------------------------------------------------
    // ADDRESSING
    // ---------------------------------------------------------------------

    /// Absolute position of the first byte.
    #[inline]
    pub fn offset(&self) -> i64 {
        self.inner.backing.offset()
    }

    /// Number of bytes.
    #[inline]
    pub fn length(&self) -> i64 {
        self.inner.backing.length()
    }

    /// Inclusive absolute end; `offset - 1` when empty.
    #[inline]
    pub fn end(&self) -> i64 {
        self.offset() + self.length() - 1
    }

    /// Returns `true` when the buffer has no bytes.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.length() == 0
    }

    /// Returns `true` when `position` addresses a byte of this buffer.
    #[inline]
    pub fn contains(&self, position: i64) -> bool {
        position >= self.offset() && position <= self.end()
    }

    // ---------------------------------------------------------------------
    // THE ALGEBRA: each operation yields a new handle
    // ---------------------------------------------------------------------

    /// The same content relabeled to start at `new_offset`.
    pub fn duplicate(&self, new_offset: i64) -> SpanBuffer {
        if new_offset == self.offset() {
            self.clone()
        } else {
            self.inner.backing.duplicate(new_offset)
        }
    }

    /// The suffix starting at absolute `position`.
    ///
    /// `position == offset` returns the buffer itself; `position == end + 1`
    /// returns an empty buffer labeled `end + 1`; anything outside
    /// `[offset, end + 1]` is `OutOfRange`.
    pub fn slice_at(&self, position: i64) -> Result<SpanBuffer> {
        if position == self.offset() {
            return Ok(self.clone());
        }
        if position == self.end() + 1 {
            return Ok(Self::empty_at(position));
        }
        if !self.contains(position) {
            return Err(BufferError::out_of_range(
                position,
                self.offset(),
                self.end() + 1,
            ));
        }
        self.inner.backing.slice_at(position)
    }

    /// Drops the first `count` bytes: `slice_at(offset + count)`.
    pub fn cut(&self, count: i64) -> Result<SpanBuffer> {
        if count < 0 || count > self.length() {
            return Err(BufferError::out_of_range(count, 0, self.length()));
        }
        self.slice_at(self.offset() + count)
    }

    /// The first `count` bytes, offset preserved.
    pub fn head(&self, count: i64) -> Result<SpanBuffer> {
        if count < 0 || count > self.length() {
            return Err(BufferError::out_of_range(count, 0, self.length()));
        }
        if count == self.length() {
            return Ok(self.clone());
        }
        if count == 0 {
            return Ok(Self::empty_at(self.offset()));
        }
        self.inner.backing.head(count)
    }

    /// Everything before absolute `position`: `head(position - offset)`.
    pub fn trunc(&self, position: i64) -> Result<SpanBuffer> {
        self.head(position - self.offset())
    }

    /// The last `count` bytes, relabeled at `offset + length - count`.
    pub fn tail(&self, count: i64) -> Result<SpanBuffer> {
        if count < 0 || count > self.length() {
            return Err(BufferError::out_of_range(count, 0, self.length()));
        }
        self.slice_at(self.offset() + self.length() - count)
    }

    /// Like [`tail`](Self::tail) but clamps an oversized `count` to the whole
    /// buffer instead of failing.
    pub fn safe_tail(&self, count: i64) -> SpanBuffer {
        let clamped = count.clamp(0, self.length());
        self.tail(clamped)
            .unwrap_or_else(|_| Self::empty_at(self.end() + 1))
    }

    /// Like [`slice_at`](Self::slice_at) but yields an empty buffer for
    /// out-of-range positions instead of failing.
    pub fn safe_slice_at(&self, position: i64) -> SpanBuffer {
        self.slice_at(position)
            .unwrap_or_else(|_| Self::empty_at(self.end() + 1))
    }

    /// This buffer followed by `other`; the result keeps this buffer's
    /// offset. No bytes are copied.
    pub fn concat(&self, other: &SpanBuffer) -> SpanBuffer {
        list::merge_at(self.offset(), [self.clone(), other.clone()])
    }

    // ---------------------------------------------------------------------
    // READS
    // ---------------------------------------------------------------------

    /// Copies bytes starting at absolute `position` into `out`, returning
    /// the count copied. Short only at the buffer's tail.
    pub fn read_at(&self, position: i64, out: &mut [u8]) -> Result<usize> {
        if out.is_empty() {
            return Ok(0);
        }
        if !self.contains(position) {
            return Err(BufferError::out_of_range(
                position,
                self.offset(),
                self.end(),
            ));
        }
        self.inner.backing.read_at(position, out)
    }

    /// Copies bytes starting at relative index `relative` into `out`.
    pub fn read_relative(&self, relative: i64, out: &mut [u8]) -> Result<usize> {
        self.read_at(self.offset() + relative, out)
    }

    /// The byte at absolute `position`.
    pub fn byte_at(&self, position: i64) -> Result<u8> {
        if !self.contains(position) {
            return Err(BufferError::out_of_range(
                position,
                self.offset(),
                self.end(),
            ));
        }
        self.inner.backing.byte_at(position)
    }

    /// The byte at relative index `relative`.
    pub fn byte_relative(&self, relative: i64) -> Result<u8> {
        self.byte_at(self.offset() + relative)
    }

    /// Copies the entire content into a fresh vector.
    pub fn to_vec(&self) -> Result<Vec<u8>> {
        let len = crate::span::Span::checked_usize(self.length())?;
        let mut out = vec![0u8; len];
        if len > 0 {
            let got = self.read_at(self.offset(), &mut out)?;
            if got != len {
                return Err(BufferError::UnexpectedEof {
                    needed: len as i64,
                    remaining: got as i64,
                });
            }
        }
        Ok(out)
    }

    /// A cursor positioned at the first byte.
    pub fn walker(&self) -> Walker {
        Walker::new(self.clone(), self.offset())
    }

    /// A cursor positioned at absolute `position`.
    ///
    /// Accepts any position in `[offset, offset + length]`; one past the
    /// last byte is the EOF cursor.
    pub fn walker_at(&self, position: i64) -> Result<Walker> {
        if position < self.offset() || position > self.offset() + self.length() {
            return Err(BufferError::NoSuchElement { position });
        }
        Ok(Walker::new(self.clone(), position))
    }

    // ---------------------------------------------------------------------
    // SEARCH: naive sliding match, absolute positions
    // ---------------------------------------------------------------------

    /// First occurrence of `needle` at or after this buffer's offset.
    pub fn position_of(&self, needle: &SpanBuffer) -> Result<Option<i64>> {
        self.position_of_from(needle, self.offset())
    }

    /// First occurrence of `needle` at or after absolute `from`.
    ///
    /// An empty needle matches immediately at `from`. A `from` beyond the
    /// buffer's end is `OutOfRange`; an absent match is `Ok(None)`.
    pub fn position_of_from(&self, needle: &SpanBuffer, from: i64) -> Result<Option<i64>> {
        if needle.is_empty() {
            return Ok(Some(from));
        }
        if from > self.end() {
            return Err(BufferError::out_of_range(from, self.offset(), self.end()));
        }
        let start = from.max(self.offset());
        let last_start = self.end() - needle.length() + 1;
        let mut candidate = start;
        while candidate <= last_start {
            if self.matches_at(candidate, needle)? {
                return Ok(Some(candidate));
            }
            candidate += 1;
        }
        Ok(None)
    }

    /// Last occurrence of `needle` ending the scan at this buffer's end.
    pub fn last_position_of(&self, needle: &SpanBuffer) -> Result<Option<i64>> {
        self.last_position_of_from(needle, self.end())
    }

    /// Last occurrence of `needle` starting at or before absolute `from`.
    ///
    /// An empty needle matches at `min(from, end)`.
    pub fn last_position_of_from(&self, needle: &SpanBuffer, from: i64) -> Result<Option<i64>> {
        if needle.is_empty() {
            return Ok(Some(from.min(self.end())));
        }
        let last_start = (self.end() - needle.length() + 1).min(from);
        let mut candidate = last_start;
        while candidate >= self.offset() {
            if self.matches_at(candidate, needle)? {
                return Ok(Some(candidate));
            }
            candidate -= 1;
        }
        Ok(None)
    }

    fn matches_at(&self, candidate: i64, needle: &SpanBuffer) -> Result<bool> {
        let mut index = 0;
        while index < needle.length() {
            if self.byte_at(candidate + index)? != needle.byte_relative(index)? {
                return Ok(false);
            }
            index += 1;
        }
        Ok(true)
    }

    // ---------------------------------------------------------------------
    // COMPARISON
    // ---------------------------------------------------------------------

    /// Count of leading bytes equal between this buffer and `other`.
    pub fn common_prefix(&self, other: &SpanBuffer) -> Result<i64> {
        let limit = self.length().min(other.length());
        let mut index = 0;
        while index < limit {
            if self.byte_relative(index)? != other.byte_relative(index)? {
                break;
            }
            index += 1;
        }
        Ok(index)
    }

    /// Count of trailing bytes equal between this buffer and `other`.
    pub fn common_suffix(&self, other: &SpanBuffer) -> Result<i64> {
        let limit = self.length().min(other.length());
        let mut index = 0;
        while index < limit {
            let own = self.byte_relative(self.length() - 1 - index)?;
            let theirs = other.byte_relative(other.length() - 1 - index)?;
            if own != theirs {
                break;
            }
            index += 1;
        }
        Ok(index)
    }

    /// Returns `true` when this buffer begins with the content of `other`.
    pub fn starts_with(&self, other: &SpanBuffer) -> Result<bool> {
        if other.length() > self.length() {
            return Ok(false);
        }
        Ok(self.common_prefix(other)? == other.length())
    }

    /// Returns `true` when this buffer ends with the content of `other`.
    pub fn ends_with(&self, other: &SpanBuffer) -> Result<bool> {
        if other.length() > self.length() {
            return Ok(false);
        }
        Ok(self.common_suffix(other)? == other.length())
    }

    /// Content equality: same length, same byte sequence. Offsets are not
    /// compared.
    pub fn content_eq(&self, other: &SpanBuffer) -> Result<bool> {
        if Arc::ptr_eq(&self.inner, &other.inner) {
            return Ok(true);
        }
        if self.length() != other.length() {
            return Ok(false);
        }
        let mut own = [0u8; SCAN_CHUNK];
        let mut theirs = [0u8; SCAN_CHUNK];
        let mut done = 0;
        while done < self.length() {
            let a = self.read_relative(done, &mut own)?;
            let b = other.read_relative(done, &mut theirs)?;
            let take = a.min(b);
            if take == 0 {
                return Err(BufferError::UnexpectedEof {
                    needed: self.length() - done,
                    remaining: 0,
                });
            }
            if own[..take] != theirs[..take] {
                return Ok(false);
            }
            done += take as i64;
        }
        Ok(true)
    }

    /// Content hash: `hash = 1; hash = 31 * hash + byte` in wrapping 32-bit
    /// signed arithmetic. Computed lazily and memoised on first use.
    pub fn content_hash(&self) -> Result<i32> {
        if let Some(hash) = self.inner.hash.get() {
            return Ok(*hash);
        }
        let mut hash: i32 = 1;
        let mut chunk = [0u8; SCAN_CHUNK];
        let mut done = 0;
        while done < self.length() {
            let got = self.read_relative(done, &mut chunk)?;
            if got == 0 {
                return Err(BufferError::UnexpectedEof {
                    needed: self.length() - done,
                    remaining: 0,
                });
            }
            for byte in &chunk[..got] {
                hash = hash.wrapping_mul(31).wrapping_add(i32::from(*byte));
            }
            done += got as i64;
        }
        Ok(*self.inner.hash.get_or_init(|| hash))
    }

    // ---------------------------------------------------------------------
    // RENDERING
    // ---------------------------------------------------------------------

    /// Decodes the entire content as UTF-8.
    pub fn text(&self) -> Result<String> {
        let bytes = self.to_vec()?;
        String::from_utf8(bytes).map_err(|err| BufferError::Encoding(err.utf8_error()))
    }

    /// Renders the entire content as lowercase hex.
    pub fn hex(&self) -> Result<String> {
        self.hex_limit(self.length())
    }

    /// Renders at most the first `limit` bytes as lowercase hex.
    pub fn hex_limit(&self, limit: i64) -> Result<String> {
        use std::fmt::Write as _;
        let take = limit.clamp(0, self.length());
        let mut rendered = String::with_capacity((take as usize) * 2);
        let mut chunk = [0u8; SCAN_CHUNK];
        let mut done = 0;
        while done < take {
            let want = ((take - done) as usize).min(SCAN_CHUNK);
            let got = self.read_relative(done, &mut chunk[..want])?;
            if got == 0 {
                break;
            }
            for byte in &chunk[..got] {
                let _ = write!(rendered, "{byte:02x}");
            }
            done += got as i64;
        }
        Ok(rendered)
    }
}

// Equality and hashing are content-level and must stay deterministic even
// when a reclaimable cache was dropped between reads: retry once so a
// transient refill failure does not change the answer. A persistent storage
// failure has no honest representation in `PartialEq`, so it panics.
fn retried<T>(what: &str, op: impl Fn() -> Result<T>) -> T {
    match op() {
        Ok(value) => value,
        Err(BufferError::Io(_)) => match op() {
            Ok(value) => value,
            Err(err) => panic!("{what} failed on unreadable buffer content: {err}"),
        },
        Err(err) => panic!("{what} failed on unreadable buffer content: {err}"),
    }
}

impl PartialEq for SpanBuffer {
    fn eq(&self, other: &Self) -> bool {
        retried("content equality", || self.content_eq(other))
    }
}

impl Eq for SpanBuffer {}

impl Hash for SpanBuffer {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_i32(retried("content hash", || self.content_hash()));
    }
}

impl fmt::Debug for SpanBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpanBuffer")
            .field("offset", &self.offset())
            .field("length", &self.length())
            .field("end", &self.end())
            .field("backing", &self.inner.backing)
            .finish()
    }
}

/// The zero-length variant. Keeps only its offset label; `end` prints as
/// `offset - 1`.
struct EmptyBuffer {
    offset: i64,
}

impl fmt::Debug for EmptyBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Empty @ {}", self.offset)
    }
}

impl Buffer for EmptyBuffer {
    fn offset(&self) -> i64 {
        self.offset
    }

    fn length(&self) -> i64 {
        0
    }

    fn read_at(&self, position: i64, _out: &mut [u8]) -> Result<usize> {
        Err(BufferError::out_of_range(
            position,
            self.offset,
            self.offset - 1,
        ))
    }

    fn byte_at(&self, position: i64) -> Result<u8> {
        Err(BufferError::out_of_range(
            position,
            self.offset,
            self.offset - 1,
        ))
    }

    fn slice_at(&self, position: i64) -> Result<SpanBuffer> {
        // The handle resolves position == offset (self) and position ==
        // end + 1 (== offset) before delegating, so nothing valid remains.
        Err(BufferError::out_of_range(position, self.offset, self.offset))
    }

    fn head(&self, count: i64) -> Result<SpanBuffer> {
        Err(BufferError::out_of_range(count, 0, 0))
    }

    fn duplicate(&self, new_offset: i64) -> SpanBuffer {
        SpanBuffer::empty_at(new_offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_buffer_conventions() {
        let empty = SpanBuffer::empty_at(10);
        assert_eq!(empty.offset(), 10);
        assert_eq!(empty.length(), 0);
        assert_eq!(empty.end(), 9);
        assert!(!empty.contains(10));
        assert!(empty.byte_at(10).is_err());
    }

    #[test]
    fn slice_at_identity_and_one_past_end() {
        let buffer = SpanBuffer::wrap_text("abcdef");
        let same = buffer.slice_at(0).unwrap();
        assert_eq!(same.offset(), 0);
        assert_eq!(same.length(), 6);
        let empty = buffer.slice_at(6).unwrap();
        assert!(empty.is_empty());
        assert_eq!(empty.offset(), 6);
        assert!(buffer.slice_at(7).is_err());
        assert!(buffer.slice_at(-1).is_err());
    }

    #[test]
    fn content_equality_ignores_offset() {
        let buffer = SpanBuffer::wrap_text("payload");
        let shifted = buffer.duplicate(100);
        assert_eq!(buffer, shifted);
        assert_eq!(
            buffer.content_hash().unwrap(),
            shifted.content_hash().unwrap()
        );
    }

    #[test]
    fn hash_matches_reference_recurrence() {
        let buffer = SpanBuffer::wrap(vec![1, 2, 3]);
        // 31*(31*(31*1 + 1) + 2) + 3
        let expected = 31 * (31 * (31 + 1) + 2) + 3;
        assert_eq!(buffer.content_hash().unwrap(), expected);
    }

    #[test]
    fn safe_variants_never_fail() {
        let buffer = SpanBuffer::wrap_text("abc");
        assert_eq!(buffer.safe_tail(99).length(), 3);
        assert!(buffer.safe_slice_at(50).is_empty());
        assert_eq!(buffer.safe_slice_at(1).length(), 2);
    }

    #[test]
    fn hex_renders_lowercase_pairs() {
        let buffer = SpanBuffer::wrap(vec![0x00, 0xAB, 0x10]);
        assert_eq!(buffer.hex().unwrap(), "00ab10");
        assert_eq!(buffer.hex_limit(2).unwrap(), "00ab");
    }
}
