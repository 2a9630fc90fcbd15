//! Error types for cityfeed-sync.

use std::path::PathBuf;

use thiserror::Error;

use cityfeed_core::{ContentHash, RelPath};
use cityfeed_origin::Exhausted;

/// All errors that abort a reconciliation run.
///
/// Every variant is raised before activation or is a pointer-swap failure;
/// none of them leave `current` pointing anywhere new.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Filesystem failure, annotated with the path involved.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// No origin served a usable manifest.
    #[error("manifest unavailable: {0}")]
    ManifestUnavailable(#[source] Exhausted),

    /// No origin served an object whose bytes hash to `hash`.
    #[error("object {hash} unavailable: {source}")]
    ObjectUnavailable {
        hash: ContentHash,
        #[source]
        source: Exhausted,
    },

    /// The object store lost an object the snapshot needs.
    #[error("object {hash} for {path} is missing from the object store")]
    MissingObject { hash: ContentHash, path: RelPath },

    /// A snapshot directory already exists at the final name of a new build.
    #[error("snapshot already exists at {path}")]
    SnapshotExists { path: PathBuf },

    /// `current` exists but is not a symlink, so it cannot be swapped atomically.
    #[error("{path} exists but is not a symlink; refusing to replace it")]
    CurrentNotSymlink { path: PathBuf },

    /// Snapshot index JSON could not be encoded or decoded.
    #[error("snapshot index error at {path}: {source}")]
    Index {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// An object fetch worker panicked.
    #[error("object fetch worker failed: {0}")]
    Worker(String),
}

/// Convenience constructor for [`SyncError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SyncError {
    SyncError::Io {
        path: path.into(),
        source,
    }
}
