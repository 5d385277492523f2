//! Error types for buffer operations.

use std::io;
use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, BufferError>;

/// Errors raised by buffer, walker, loader, and factory operations.
///
/// Absent matches from `position_of`/`last_position_of` are *not* errors;
/// those searches return `Ok(None)`.
#[derive(Debug, Error)]
pub enum BufferError {
    /// A positional or count argument fell outside the buffer's bounds.
    #[error("position {position} outside valid range [{low}, {high}]")]
    OutOfRange {
        /// The offending absolute position (or count, mapped to a position).
        position: i64,
        /// Lowest acceptable value.
        low: i64,
        /// Highest acceptable value.
        high: i64,
    },

    /// A walker step landed outside its buffer.
    #[error("no element at position {position}")]
    NoSuchElement {
        /// The target position of the rejected step.
        position: i64,
    },

    /// A typed read required more bytes than remain before the buffer end.
    #[error("unexpected end of buffer: needed {needed} bytes but only {remaining} remain")]
    UnexpectedEof {
        /// Bytes the read required.
        needed: i64,
        /// Bytes left before the end of the buffer.
        remaining: i64,
    },

    /// A contract was used out of order, or a collaborator misbehaved.
    #[error("illegal state: {0}")]
    IllegalState(&'static str),

    /// Buffer contents could not be decoded as UTF-8.
    #[error("buffer contents are not valid UTF-8")]
    Encoding(#[from] std::str::Utf8Error),

    /// An underlying read, mapping, or block-store call failed.
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl BufferError {
    /// Returns `true` for bounds violations (programming errors in the caller).
    #[inline]
    pub fn is_out_of_range(&self) -> bool {
        matches!(self, Self::OutOfRange { .. })
    }

    /// Returns `true` if the error came from underlying storage rather than
    /// from how the buffer was used.
    #[inline]
    pub fn is_io(&self) -> bool {
        matches!(self, Self::Io(_))
    }

    pub(crate) fn out_of_range(position: i64, low: i64, high: i64) -> Self {
        Self::OutOfRange {
            position,
            low,
            high,
        }
    }
}

impl From<BufferError> for io::Error {
    fn from(err: BufferError) -> io::Error {
        match err {
            BufferError::Io(inner) => inner,
            other => {
                let kind = match &other {
                    BufferError::UnexpectedEof { .. } => io::ErrorKind::UnexpectedEof,
                    BufferError::OutOfRange { .. } | BufferError::NoSuchElement { .. } => {
                        io::ErrorKind::InvalidInput
                    }
                    BufferError::Encoding(_) => io::ErrorKind::InvalidData,
                    _ => io::ErrorKind::Other,
                };
                io::Error::new(kind, other.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn out_of_range_is_classified() {
        let err = BufferError::out_of_range(10, 0, 5);
        assert!(err.is_out_of_range());
        assert!(!err.is_io());
    }

    #[test]
    fn io_conversion_preserves_eof_kind() {
        let err = BufferError::UnexpectedEof {
            needed: 4,
            remaining: 1,
        };
        let io_err: io::Error = err.into();
        assert_eq!(io_err.kind(), io::ErrorKind::UnexpectedEof);
    }
}
