//! Error types for allocator operations.

use thiserror::Error;

/// Errors produced by [`Segment`](crate::Segment) and
/// [`Buffer`](crate::Buffer) operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SegmentError {
    /// The current buffer has no more IDs. Callers retry after the ring
    /// advances or a refill lands.
    #[error("buffer empty")]
    Empty,

    /// The ring has no free slot for another buffer; the refill is dropped.
    #[error("buffer ring full")]
    Full,

    /// An expand claimed a slot that is still draining. Cursor bookkeeping
    /// has been violated.
    #[error("expand into undrained slot")]
    ExpandDuplicated,
}

impl SegmentError {
    /// Returns `true` if the caller can retry immediately (e.g. after an
    /// inline refill).
    #[inline]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Empty)
    }

    /// Returns `true` for a dropped refill that leaves the segment usable.
    #[inline]
    pub fn is_benign(&self) -> bool {
        matches!(self, Self::Full)
    }
}
