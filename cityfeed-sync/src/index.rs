//! Snapshot index: which object each file of a snapshot was built from.
//!
//! Persists a [`SnapshotIndex`] JSON document at `<root>/index/<version>.json`.
//! Garbage collection reads these to learn the live object set without
//! re-hashing snapshot trees. Writes go to a synced `.tmp` file, then rename,
//! then fsync `index/`.

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use cityfeed_core::{ContentHash, Manifest, Version};

use crate::error::{io_err, SyncError};
use crate::fsutil::{fsync_dir, remove_file_if_exists};
use crate::layout::RootLayout;

/// Suffix of an index being written.
pub const INDEX_TMP_SUFFIX: &str = ".json.tmp";

/// On-disk index payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SnapshotIndex {
    pub version: Version,
    pub built_at: DateTime<Utc>,
    /// Relative file path to object hash.
    pub files: BTreeMap<String, ContentHash>,
}

impl SnapshotIndex {
    pub fn from_manifest(manifest: &Manifest) -> Self {
        Self {
            version: manifest.version.clone(),
            built_at: Utc::now(),
            files: manifest
                .files
                .iter()
                .map(|f| (f.path.to_string(), f.hash.clone()))
                .collect(),
        }
    }

    pub fn hashes(&self) -> impl Iterator<Item = &ContentHash> {
        self.files.values()
    }
}

/// Write the index for `index.version` atomically.
pub fn save_at(layout: &RootLayout, index: &SnapshotIndex) -> Result<PathBuf, SyncError> {
    let path = layout.index_path(&index.version);
    let json = serde_json::to_vec_pretty(index).map_err(|source| SyncError::Index {
        path: path.clone(),
        source,
    })?;
    let tmp = layout
        .index_dir()
        .join(format!("{}{INDEX_TMP_SUFFIX}", index.version));
    let mut file = fs::File::create(&tmp).map_err(|e| io_err(&tmp, e))?;
    file.write_all(&json).map_err(|e| io_err(&tmp, e))?;
    file.sync_all().map_err(|e| io_err(&tmp, e))?;
    drop(file);
    fs::rename(&tmp, &path).map_err(|e| io_err(&path, e))?;
    fsync_dir(&layout.index_dir())?;
    Ok(path)
}

/// Load the index for `version`. `Ok(None)` when none was recorded.
pub fn load_at(layout: &RootLayout, version: &Version) -> Result<Option<SnapshotIndex>, SyncError> {
    let path = layout.index_path(version);
    let bytes = match fs::read(&path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(io_err(&path, e)),
    };
    let index: SnapshotIndex =
        serde_json::from_slice(&bytes).map_err(|source| SyncError::Index { path, source })?;
    Ok(Some(index))
}

/// Versions that have an index file, sorted.
pub fn list_versions(layout: &RootLayout) -> Result<Vec<Version>, SyncError> {
    let dir = layout.index_dir();
    let entries = match fs::read_dir(&dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(vec![]),
        Err(e) => return Err(io_err(&dir, e)),
    };
    let mut versions = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| io_err(&dir, e))?;
        if let Some(version) = version_of(&entry.path()) {
            versions.push(version);
        }
    }
    versions.sort();
    Ok(versions)
}

/// Remove the index for `version` if present.
pub fn remove(layout: &RootLayout, version: &Version) -> Result<bool, SyncError> {
    remove_file_if_exists(&layout.index_path(version))
}

fn version_of(path: &Path) -> Option<Version> {
    let name = path.file_name()?.to_str()?;
    if name.ends_with(INDEX_TMP_SUFFIX) {
        return None;
    }
    let stem = name.strip_suffix(".json")?;
    Version::parse(stem).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn layout(tmp: &TempDir) -> RootLayout {
        let layout = RootLayout::new(tmp.path());
        layout.ensure().unwrap();
        layout
    }

    fn manifest() -> Manifest {
        Manifest::parse(
            br#"{"version":"v1.2","files":[
                {"path":"index.html","hash":"2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"},
                {"path":"css/site.css","hash":"486ea46224d1bb4fb680f34f7c9ad96a8f24ec88be73ea8e5a6c65260e9cb8a7"}
            ]}"#,
        )
        .unwrap()
    }

    #[test]
    fn missing_index_loads_as_none() {
        let tmp = TempDir::new().unwrap();
        let layout = layout(&tmp);
        let v = Version::parse("v1").unwrap();
        assert!(load_at(&layout, &v).unwrap().is_none());
    }

    #[test]
    fn save_then_load_preserves_files() {
        let tmp = TempDir::new().unwrap();
        let layout = layout(&tmp);
        let index = SnapshotIndex::from_manifest(&manifest());

        let path = save_at(&layout, &index).unwrap();
        assert!(path.ends_with("index/v1.2.json"));
        let loaded = load_at(&layout, &index.version).unwrap().unwrap();
        assert_eq!(loaded, index);
        assert_eq!(loaded.hashes().count(), 2);
    }

    #[test]
    fn tmp_file_cleaned_up_after_save() {
        let tmp = TempDir::new().unwrap();
        let layout = layout(&tmp);
        let index = SnapshotIndex::from_manifest(&manifest());
        save_at(&layout, &index).unwrap();
        let leftovers: Vec<_> = fs::read_dir(layout.index_dir())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(INDEX_TMP_SUFFIX))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn save_replaces_stale_tmp_from_interrupted_write() {
        let tmp = TempDir::new().unwrap();
        let layout = layout(&tmp);
        let index = SnapshotIndex::from_manifest(&manifest());
        let stale = layout.index_dir().join(format!("v1.2{INDEX_TMP_SUFFIX}"));
        fs::write(&stale, b"{\"version\":\"v1.2\",\"files\":{\"truncated").unwrap();

        save_at(&layout, &index).unwrap();
        assert!(!stale.exists());
        assert_eq!(load_at(&layout, &index.version).unwrap().unwrap(), index);
    }

    #[test]
    fn list_ignores_temp_and_foreign_files() {
        let tmp = TempDir::new().unwrap();
        let layout = layout(&tmp);
        save_at(&layout, &SnapshotIndex::from_manifest(&manifest())).unwrap();
        fs::write(layout.index_dir().join("v2.json.tmp"), b"{").unwrap();
        fs::write(layout.index_dir().join("notes.txt"), b"x").unwrap();

        let versions = list_versions(&layout).unwrap();
        assert_eq!(versions, vec![Version::parse("v1.2").unwrap()]);
    }

    #[test]
    fn corrupt_index_is_an_index_error() {
        let tmp = TempDir::new().unwrap();
        let layout = layout(&tmp);
        let v = Version::parse("v1").unwrap();
        fs::write(layout.index_path(&v), b"not json").unwrap();
        assert!(matches!(load_at(&layout, &v), Err(SyncError::Index { .. })));
    }
}
