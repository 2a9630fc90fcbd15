//! Manifest document model.
//!
//! # Wire format
//!
//! ```text
//! {
//!   "version": "2025-01-01T00:00:00Z",
//!   "files": [
//!     {"path": "index.html", "hash": "<64 hex>", "size": 5}
//!   ]
//! }
//! ```
//!
//! Parsing goes through a permissive raw layer first so that missing fields
//! and bad values surface as specific [`ManifestError`] variants rather than
//! generic serde messages.

use std::collections::{BTreeSet, HashMap, HashSet};

use serde::Deserialize;

use crate::error::ManifestError;
use crate::types::{ContentHash, RelPath, Version};

/// Resource path of the manifest on every origin.
pub const MANIFEST_RESOURCE: &str = "manifests/latest.json";

/// Resource path of an object on every origin.
pub fn object_resource(hash: &ContentHash) -> String {
    format!("objects/{hash}")
}

/// One file of a snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub path: RelPath,
    pub hash: ContentHash,
    /// Declared byte length, checked against the fetched object when present.
    pub size: Option<u64>,
}

/// A validated manifest. Entries keep the document order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    pub version: Version,
    pub files: Vec<FileEntry>,
}

#[derive(Debug, Deserialize)]
struct RawManifest {
    version: Option<String>,
    files: Option<Vec<RawFileEntry>>,
}

#[derive(Debug, Deserialize)]
struct RawFileEntry {
    path: Option<String>,
    hash: Option<String>,
    size: Option<u64>,
}

impl Manifest {
    /// Parse and validate a manifest body.
    pub fn parse(bytes: &[u8]) -> Result<Self, ManifestError> {
        let raw: RawManifest = serde_json::from_slice(bytes)?;

        let version = raw.version.ok_or_else(|| missing("version"))?;
        let version = Version::parse(&version)?;
        let raw_files = raw.files.ok_or_else(|| missing("files"))?;

        let mut files = Vec::with_capacity(raw_files.len());
        let mut seen = HashSet::with_capacity(raw_files.len());
        let mut sizes: HashMap<ContentHash, u64> = HashMap::new();
        for (idx, entry) in raw_files.into_iter().enumerate() {
            let path = entry
                .path
                .ok_or_else(|| missing(&format!("files[{idx}].path")))?;
            let hash = entry
                .hash
                .ok_or_else(|| missing(&format!("files[{idx}].hash")))?;

            let path = RelPath::parse(&path)?;
            let hash = ContentHash::parse(&hash).map_err(|e| ManifestError::InvalidHash {
                path: path.to_string(),
                hash: e.0,
            })?;
            if !seen.insert(path.clone()) {
                return Err(ManifestError::DuplicatePath {
                    path: path.to_string(),
                });
            }
            if let Some(size) = entry.size {
                let first = *sizes.entry(hash.clone()).or_insert(size);
                if first != size {
                    return Err(ManifestError::SizeConflict {
                        hash: hash.to_string(),
                        first,
                        second: size,
                    });
                }
            }
            files.push(FileEntry {
                path,
                hash,
                size: entry.size,
            });
        }

        check_path_conflicts(&files)?;
        Ok(Self { version, files })
    }

    /// Distinct object hashes in first-appearance order.
    pub fn unique_hashes(&self) -> Vec<&ContentHash> {
        let mut seen = HashSet::new();
        self.files
            .iter()
            .map(|f| &f.hash)
            .filter(|h| seen.insert(*h))
            .collect()
    }

    /// Declared size for `hash`, if any entry carries one. Entries sharing a
    /// hash never disagree; [`Manifest::parse`] rejects that.
    pub fn declared_size(&self, hash: &ContentHash) -> Option<u64> {
        self.files
            .iter()
            .filter(|f| &f.hash == hash)
            .find_map(|f| f.size)
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

fn missing(field: &str) -> ManifestError {
    ManifestError::MissingField {
        field: field.to_owned(),
    }
}

/// Reject manifests where a file path is also needed as a directory.
fn check_path_conflicts(files: &[FileEntry]) -> Result<(), ManifestError> {
    let all: BTreeSet<&str> = files.iter().map(|f| f.path.as_str()).collect();
    for entry in files {
        if let Some(file) = entry.path.ancestors().find(|a| all.contains(a)) {
            return Err(ManifestError::PathConflict {
                file: file.to_owned(),
                nested: entry.path.to_string(),
            });
        }
    }
    Ok(())
}
