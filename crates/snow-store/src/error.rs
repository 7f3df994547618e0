//! Error type for the object store.

use std::path::PathBuf;

use thiserror::Error;

/// Errors from the content-addressed blob store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The requested object is not present under `objects/`.
    #[error("object {hash} not found in the object store")]
    ObjectMissing {
        /// Hex fingerprint of the missing object.
        hash: String,
    },

    /// Copying a file into or out of the store failed.
    #[error("failed to copy {path}: {source}")]
    Copy {
        /// The path being copied.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// A hash-block sidecar file is malformed.
    #[error("malformed hash-block sidecar {path}: {reason}")]
    MalformedSidecar {
        /// Path of the sidecar file.
        path: PathBuf,
        /// What was wrong with it.
        reason: String,
    },
}
