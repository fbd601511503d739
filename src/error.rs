//! Crate-wide error type.
//!
//! The codec and segment layers surface their kinds unchanged; the
//! coordinator adds segment/operation context to the message where it has
//! any. I/O errors are wrapped rather than stringified so callers can still
//! inspect the underlying `std::io::ErrorKind`.

use std::path::PathBuf;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, WalError>;

/// Errors surfaced by the WAL and its components.
#[derive(Debug, thiserror::Error)]
pub enum WalError {
    /// Index outside the stored range, or a file that should exist is absent.
    #[error("not found")]
    NotFound,

    /// Append whose first index is not the expected next index.
    #[error("out of order append: expected first index {expected}, got {got}")]
    OutOfOrder {
        /// Index the log expects next.
        expected: u64,
        /// First index of the rejected batch.
        got: u64,
    },

    /// On-disk state failed validation: bad magic, header mismatch, missing
    /// commit frame, unexpected frame type, or checksum failure.
    #[error("corrupt: {0}")]
    Corrupt(String),

    /// Codec output buffer too small for the encoded value.
    #[error("short buffer: need {needed} bytes, have {have}")]
    ShortBuffer {
        /// Bytes the encoding requires.
        needed: usize,
        /// Bytes the caller provided.
        have: usize,
    },

    /// Segment writer rejected an append that would exceed a hard limit.
    #[error("segment full")]
    Full,

    /// Append or seal attempted on an already sealed segment.
    #[error("segment is sealed")]
    Sealed,

    /// Meta store used before a successful load.
    #[error("meta store used before load")]
    Uninitialized,

    /// Meta store asked to load a different directory while open.
    #[error("meta store already open in {open:?}, cannot load {requested:?}")]
    AlreadyOpen {
        /// Directory the store is currently bound to.
        open: PathBuf,
        /// Directory the caller asked for.
        requested: PathBuf,
    },

    /// Truncation range with an unsupported shape (interior hole, or a
    /// boundary that would split a segment).
    #[error("invalid truncation range [{min}, {max}]")]
    InvalidRange {
        /// Lowest index of the requested range.
        min: u64,
        /// Highest index of the requested range.
        max: u64,
    },

    /// Operation on a closed WAL handle.
    #[error("wal is closed")]
    Closed,

    /// Configuration rejected by validation.
    #[error(transparent)]
    Config(#[from] crate::config::WalConfigError),

    /// Underlying filesystem error.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}
