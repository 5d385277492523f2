//! Composite buffers: ordered catenation of child buffers without copying.

use crate::buffer::{Buffer, SpanBuffer};
use crate::error::Result;
use crate::invariants::{debug_assert_contiguous, debug_assert_in_bounds};
use std::fmt;

/// Concatenates buffers; the result starts at the first buffer's offset
/// (or 0 when nothing is supplied).
///
/// Zero-length children are dropped. No children yields the empty buffer;
/// one child is returned as-is (relabeled); otherwise a composite is built
/// whose children are relabeled to be logically contiguous.
pub fn merge<I>(buffers: I) -> SpanBuffer
where
    I: IntoIterator<Item = SpanBuffer>,
{
    let children: Vec<SpanBuffer> = buffers.into_iter().collect();
    let offset = children.first().map_or(0, SpanBuffer::offset);
    merge_at(offset, children)
}

/// Concatenates buffers into a single buffer starting at `offset`.
pub fn merge_at<I>(offset: i64, buffers: I) -> SpanBuffer
where
    I: IntoIterator<Item = SpanBuffer>,
{
    let survivors: Vec<SpanBuffer> = buffers
        .into_iter()
        .filter(|child| !child.is_empty())
        .collect();
    match survivors.len() {
        0 => SpanBuffer::empty_at(offset),
        1 => survivors.into_iter().next().map_or_else(
            || SpanBuffer::empty_at(offset),
            |only| only.duplicate(offset),
        ),
        _ => SpanBuffer::from_impl(SpanList::build(offset, survivors)),
    }
}

/// An ordered catenation of child buffers.
///
/// Children are stored relabeled so that child `i` covers
/// `[offset + sum(len_0..len_i), offset + sum(len_0..=len_i))`; locating the
/// child for an absolute position is a binary search over the accumulated
/// starts.
pub struct SpanList {
    children: Vec<SpanBuffer>,
    starts: Vec<i64>,
    offset: i64,
    length: i64,
}

impl SpanList {
    fn build(offset: i64, children: Vec<SpanBuffer>) -> Self {
        let mut relabeled = Vec::with_capacity(children.len());
        let mut starts = Vec::with_capacity(children.len());
        let mut running = offset;
        for child in children {
            let child = child.duplicate(running);
            starts.push(running);
            running += child.length();
            relabeled.push(child);
        }
        Self {
            children: relabeled,
            starts,
            offset,
            length: running - offset,
        }
    }

    /// Index of the child whose range contains `position`.
    fn locate(&self, position: i64) -> usize {
        debug_assert_in_bounds!(position, self.offset, self.offset + self.length - 1);
        let index = self.starts.partition_point(|start| *start <= position) - 1;
        if cfg!(debug_assertions) && index > 0 {
            debug_assert_contiguous!(self.children[index - 1].end(), self.children[index].offset());
        }
        index
    }

    fn rebuild(&self) -> SpanBuffer {
        SpanBuffer::from_impl(Self {
            children: self.children.clone(),
            starts: self.starts.clone(),
            offset: self.offset,
            length: self.length,
        })
    }
}

impl fmt::Debug for SpanList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SpanList {{ offset: {}, length: {}, children: {} }}",
            self.offset,
            self.length,
            self.children.len()
        )
    }
}

impl Buffer for SpanList {
    fn offset(&self) -> i64 {
        self.offset
    }

    fn length(&self) -> i64 {
        self.length
    }

    fn read_at(&self, position: i64, out: &mut [u8]) -> Result<usize> {
        let mut index = self.locate(position);
        let mut cursor = position;
        let mut done = 0;
        while done < out.len() && index < self.children.len() {
            let child = &self.children[index];
            let got = child.read_at(cursor, &mut out[done..])?;
            done += got;
            cursor += got as i64;
            index += 1;
        }
        Ok(done)
    }

    fn byte_at(&self, position: i64) -> Result<u8> {
        self.children[self.locate(position)].byte_at(position)
    }

    fn slice_at(&self, position: i64) -> Result<SpanBuffer> {
        let index = self.locate(position);
        let first = self.children[index].slice_at(position)?;
        let rest = self.children[index + 1..].iter().cloned();
        Ok(crate::list::merge_at(
            position,
            std::iter::once(first).chain(rest),
        ))
    }

    fn head(&self, count: i64) -> Result<SpanBuffer> {
        let mut kept = Vec::new();
        let mut accumulated = 0;
        for child in &self.children {
            if accumulated + child.length() <= count {
                accumulated += child.length();
                kept.push(child.clone());
                if accumulated == count {
                    break;
                }
            } else {
                kept.push(child.head(count - accumulated)?);
                break;
            }
        }
        Ok(crate::list::merge_at(self.offset, kept))
    }

    fn duplicate(&self, new_offset: i64) -> SpanBuffer {
        if new_offset == self.offset {
            self.rebuild()
        } else {
            crate::list::merge_at(new_offset, self.children.iter().cloned())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn abc_list() -> SpanBuffer {
        merge([
            SpanBuffer::wrap_text("abc"),
            SpanBuffer::wrap_text("defg"),
            SpanBuffer::wrap_text("hij"),
        ])
    }

    #[test]
    fn merge_relabels_children_contiguously() {
        let list = abc_list();
        assert_eq!(list.offset(), 0);
        assert_eq!(list.length(), 10);
        assert_eq!(list.text().unwrap(), "abcdefghij");
    }

    #[test]
    fn merge_drops_empty_children() {
        let list = merge([
            SpanBuffer::empty(),
            SpanBuffer::wrap_text("xy"),
            SpanBuffer::empty_at(40),
        ]);
        assert_eq!(list.length(), 2);
        assert_eq!(list.text().unwrap(), "xy");
    }

    #[test]
    fn merge_of_one_child_collapses() {
        let single = merge_at(5, [SpanBuffer::wrap_text("solo")]);
        assert_eq!(single.offset(), 5);
        assert_eq!(single.text().unwrap(), "solo");
    }

    #[test]
    fn merge_of_nothing_is_empty() {
        let none = merge_at(9, std::iter::empty());
        assert!(none.is_empty());
        assert_eq!(none.offset(), 9);
    }

    #[test]
    fn reads_cross_child_boundaries() {
        let list = abc_list();
        let mut out = [0u8; 6];
        let got = list.read_at(2, &mut out).unwrap();
        assert_eq!(got, 6);
        assert_eq!(&out, b"cdefgh");
    }

    #[test]
    fn slice_replaces_the_boundary_child() {
        let list = abc_list();
        let sliced = list.slice_at(4).unwrap();
        assert_eq!(sliced.offset(), 4);
        assert_eq!(sliced.text().unwrap(), "efghij");
    }

    #[test]
    fn head_keeps_whole_children_then_trims() {
        let list = abc_list();
        let head = list.head(5).unwrap();
        assert_eq!(head.offset(), 0);
        assert_eq!(head.text().unwrap(), "abcde");
        let exact = list.head(7).unwrap();
        assert_eq!(exact.text().unwrap(), "abcdefg");
    }
}
