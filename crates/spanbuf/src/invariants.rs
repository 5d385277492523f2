//! Debug assertion macros for buffer invariants.
//!
//! Active in debug builds only; release builds pay nothing. Each macro names
//! the invariant it guards so a failure message points at the broken rule,
//! not just the values.

/// Assert that an absolute read position falls inside `[low, high]`.
///
/// Used after the `Result`-level range checks, right before indexing into
/// backing storage, to catch arithmetic slips in the relative/absolute
/// mapping.
macro_rules! debug_assert_in_bounds {
    ($position:expr, $low:expr, $high:expr) => {
        debug_assert!(
            $position >= $low && $position <= $high,
            "read position {} escaped bounds [{}, {}]",
            $position,
            $low,
            $high
        )
    };
}

/// Assert that a derived buffer length is non-negative.
macro_rules! debug_assert_length {
    ($length:expr) => {
        debug_assert!(
            $length >= 0,
            "buffer length went negative: {}",
            $length
        )
    };
}

/// Assert that composite children are logically contiguous: each child must
/// begin exactly one past the previous child's end.
macro_rules! debug_assert_contiguous {
    ($previous_end:expr, $next_offset:expr) => {
        debug_assert!(
            $previous_end + 1 == $next_offset,
            "composite children not contiguous: previous end {} vs next offset {}",
            $previous_end,
            $next_offset
        )
    };
}

pub(crate) use debug_assert_contiguous;
pub(crate) use debug_assert_in_bounds;
pub(crate) use debug_assert_length;
