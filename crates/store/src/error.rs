//! Error types for coordinator operations.

use thiserror::Error;

/// Errors produced by [`Store`](crate::Store) backends.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// Transport-layer failure (network, protocol, server error).
    #[error("transport error: {0}")]
    Transport(String),

    /// A deadline expired while talking to the backend.
    #[error("store operation timed out")]
    Timeout,

    /// Optimistic update lost every one of its bounded attempts.
    #[error("compare-and-swap exhausted after {attempts} attempts")]
    RetriesExhausted { attempts: u32 },

    /// The high-water key could not be located at commit time.
    #[error("high-water key not found")]
    NotFound,

    /// The db namespace is not provisioned in the backend; the db goes on
    /// probation and refills are skipped for a while.
    #[error("db namespace not provisioned")]
    DbNotExists,

    /// The stored high-water payload did not parse as an integer.
    #[error("bad high-water payload: {0}")]
    BadPayload(String),
}

impl StoreError {
    /// Returns `true` when a later attempt could succeed without operator
    /// intervention.
    #[inline]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Transport(_) | Self::Timeout | Self::RetriesExhausted { .. }
        )
    }
}
