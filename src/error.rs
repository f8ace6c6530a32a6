//! Error types for `queue-index`.

use std::path::PathBuf;

/// Result type for queue-index operations.
pub type IndexResult<T> = Result<T, IndexError>;

/// Errors returned by the `queue-index` crate.
#[derive(thiserror::Error, Debug)]
pub enum IndexError {
    /// I/O error.
    ///
    /// Non-ENOENT I/O failures are fatal for the index state that observed
    /// them; callers must discard the state and reopen via `init`.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// A message id with the wrong length was passed in.
    ///
    /// Message ids are opaque 16-byte values owned by the message store;
    /// nothing was written when this is returned.
    #[error("invalid message id length: {length} (expected 16)")]
    InvalidMessageId {
        /// Length of the rejected id, in bytes.
        length: usize,
    },

    /// A segment read was requested at a sequence id that is not a segment
    /// boundary. Caller bug, not an on-disk condition.
    #[error("sequence id {seq_id} is not on a segment boundary")]
    NotOnBoundary {
        /// The offending sequence id.
        seq_id: u64,
    },

    /// Invalid state (operation not allowed in current state).
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Lock acquisition failed (concurrent access conflict).
    #[error("lock failed on {resource}: {reason}")]
    LockFailed {
        /// What we were trying to lock (file path, in-memory map, etc.).
        resource: String,
        /// Human-readable reason (poisoned lock, OS error, etc.).
        reason: String,
    },

    /// Resource not found (file/segment/etc).
    #[error("not found: {0}")]
    NotFound(String),

    /// Requested path does not exist.
    #[error("missing path: {0}")]
    MissingPath(PathBuf),
}
