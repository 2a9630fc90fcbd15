//! Error types for cityfeed-core.

use std::path::PathBuf;

use thiserror::Error;

/// A string that is not a 64-character lowercase hex SHA-256 digest.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid SHA-256 hex digest {0:?}")]
pub struct InvalidHash(pub String);

/// All reasons a fetched manifest document can be rejected.
///
/// A manifest error is a data defect, not a transient failure: the same
/// response is never retried, although a fresh fetch from another origin may be.
#[derive(Debug, Error)]
pub enum ManifestError {
    /// The body is not valid JSON, or a field has the wrong JSON type.
    #[error("malformed manifest JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// A required field is absent (`version`, `files`, `files[n].path`, ...).
    #[error("manifest is missing required field `{field}`")]
    MissingField { field: String },

    /// `version` cannot be used as a snapshot directory name.
    #[error("invalid manifest version {version:?}: {reason}")]
    InvalidVersion { version: String, reason: &'static str },

    /// A file path is absolute, escapes the root, or is otherwise unusable.
    #[error("invalid manifest path {path:?}: {reason}")]
    InvalidPath { path: String, reason: &'static str },

    /// A file hash is not a lowercase SHA-256 hex digest.
    #[error("invalid hash {hash:?} for manifest path {path:?}")]
    InvalidHash { path: String, hash: String },

    /// Two entries normalise to the same path.
    #[error("duplicate manifest path {path:?}")]
    DuplicatePath { path: String },

    /// Two entries share a hash but declare different sizes.
    #[error("object {hash} is declared as {first} bytes and as {second} bytes")]
    SizeConflict { hash: String, first: u64, second: u64 },

    /// One entry is a file while another needs it to be a directory.
    #[error("manifest path {file:?} is a file but {nested:?} needs it to be a directory")]
    PathConflict { file: String, nested: String },
}

/// Errors raised while assembling a [`crate::config::ReconcileConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The YAML config file could not be read.
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The YAML config file is malformed.
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("at least one origin is required (--origin or `origins:` in the config file)")]
    NoOrigins,

    #[error("invalid origin {origin:?}: {reason}")]
    InvalidOrigin { origin: String, reason: String },

    #[error("a root directory is required (--root or `root:` in the config file)")]
    MissingRoot,

    #[error("invalid duration {value:?}; expected e.g. 500ms, 30s, 5m, 2h, 7d")]
    InvalidDuration { value: String },

    #[error("invalid value for `{field}`: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}
