//! cityfeed core library: manifest model, domain types, run configuration.
//!
//! - [`types`]: validated newtypes (`ContentHash`, `Version`, `RelPath`, `Origin`)
//! - [`manifest`]: the manifest document and its validation rules
//! - [`config`]: layered configuration resolved into [`ReconcileConfig`]
//! - [`error`]: [`ManifestError`], [`ConfigError`]

pub mod config;
pub mod error;
pub mod manifest;
pub mod types;

pub use config::{ConfigLayer, Materialize, ReconcileConfig, RetentionPolicy};
pub use error::{ConfigError, InvalidHash, ManifestError};
pub use manifest::{FileEntry, Manifest, MANIFEST_RESOURCE};
pub use types::{normalize_origins, ContentHash, Origin, RelPath, Version};
