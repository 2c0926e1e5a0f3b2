//! Error types for deduprs.
//!
//! This module defines the error type used throughout the crate.
//!
//! - [`DedupError`] - Represents all possible errors during store operations

use thiserror::Error;

/// Errors that can occur during deduplication store operations.
///
/// The index is authoritative: a failed operation either leaves the index
/// untouched (validation, conflicts) or restores it through the
/// compensation path before surfacing the error. Orphaned bytes in the
/// external chunk store are possible after a failure; dangling index edges
/// are not.
#[derive(Debug, Error)]
pub enum DedupError {
    /// A caller-supplied argument failed validation.
    ///
    /// Raised for invalid chunking parameters (sizes, shift, boundary check
    /// width), empty or unsanitizable object names, and container arguments
    /// that do not match the index mode. The index is never touched.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The object does not exist in the index.
    #[error("object not found: {0}")]
    ObjectNotFound(String),

    /// The container does not exist in the pool index.
    #[error("container not found: {0}")]
    ContainerNotFound(String),

    /// An object with this name already exists (plain store, not replace).
    #[error("object already exists: {0}")]
    ObjectExists(String),

    /// A container with this name is already registered in the pool.
    #[error("container already exists: {0}")]
    ContainerExists(String),

    /// A chunk callback returned failure or an empty result.
    ///
    /// During a store this triggers the compensation path; during a
    /// retrieve it aborts the read with the index left untouched.
    #[error("chunk callback failed: {op} for key {key}")]
    Backend {
        /// The callback that failed (`write`, `read`, `delete`).
        op: &'static str,
        /// The chunk key the callback was invoked with.
        key: String,
    },

    /// A chunk referenced by object metadata came back with the wrong size.
    #[error("chunk {key} returned {actual} bytes, index records {expected}")]
    ChunkSizeMismatch {
        /// The chunk key that was read.
        key: String,
        /// Length recorded in the index.
        expected: u64,
        /// Length the callback actually returned.
        actual: u64,
    },

    /// The index is missing required configuration or has an incompatible
    /// schema. Fatal at open time.
    #[error("index corrupt: {0}")]
    Corrupt(String),

    /// The operation is not available for this index shape (container
    /// operation on a flat index, or the reverse).
    #[error("unsupported in this index mode: {0}")]
    Unsupported(&'static str),

    /// An error from the underlying SQLite index.
    #[error("index error: {0}")]
    Index(#[from] rusqlite::Error),

    /// An I/O error occurred while reading input data.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "test");
        let err: DedupError = io_err.into();
        assert!(matches!(err, DedupError::Io(_)));
    }

    #[test]
    fn test_display() {
        let err = DedupError::Backend {
            op: "write",
            key: "abc=".to_string(),
        };
        assert!(err.to_string().contains("write"));
        assert!(err.to_string().contains("abc="));

        let err = DedupError::ChunkSizeMismatch {
            key: "abc=".to_string(),
            expected: 128,
            actual: 64,
        };
        assert!(err.to_string().contains("128"));
    }
}
