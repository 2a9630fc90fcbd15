//! Snapshot builder: stage a version's tree from the object store and
//! commit it with one rename.
//!
//! A snapshot directory only ever appears under its final name complete and
//! fsynced. Until the rename it lives at `snapshots/.<version>.staging-XXXX`,
//! which is removed on every failure path (the [`tempfile::TempDir`] guard
//! owns it until the commit).

use std::collections::BTreeSet;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use cityfeed_core::{FileEntry, Manifest, Materialize, Version};

use crate::error::{io_err, SyncError};
use crate::fsutil::{fsync_dir, set_world_readable};
use crate::index::{self, SnapshotIndex};
use crate::layout::{RootLayout, STAGING_MARKER};
use crate::store::ObjectStore;

/// A committed snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltSnapshot {
    pub version: Version,
    pub path: PathBuf,
    pub files: usize,
    /// Entries that had to be copied because hard-linking failed.
    pub link_fallbacks: usize,
}

/// Builds snapshot trees under one root.
#[derive(Debug)]
pub struct SnapshotBuilder<'a> {
    layout: &'a RootLayout,
    store: &'a ObjectStore,
    materialize: Materialize,
}

impl<'a> SnapshotBuilder<'a> {
    pub fn new(layout: &'a RootLayout, store: &'a ObjectStore, materialize: Materialize) -> Self {
        Self {
            layout,
            store,
            materialize,
        }
    }

    /// Materialize `manifest` as `snapshots/<version>`.
    ///
    /// Every object must already be in the store. Fails with
    /// [`SyncError::SnapshotExists`] rather than touching an existing tree.
    pub fn build(&self, manifest: &Manifest) -> Result<BuiltSnapshot, SyncError> {
        let final_path = self.layout.snapshot_dir(&manifest.version);
        if final_path.symlink_metadata().is_ok() {
            return Err(SyncError::SnapshotExists { path: final_path });
        }

        let snapshots_dir = self.layout.snapshots_dir();
        let staging = tempfile::Builder::new()
            .prefix(&staging_prefix(&manifest.version))
            .tempdir_in(&snapshots_dir)
            .map_err(|e| io_err(&snapshots_dir, e))?;
        tracing::debug!(staging = %staging.path().display(), "staging snapshot");

        let mut dirs = BTreeSet::new();
        let mut link_fallbacks = 0;
        for entry in &manifest.files {
            let dest = staging.path().join(entry.path.as_path());
            if let Some(parent) = dest.parent() {
                if !parent.is_dir() {
                    fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
                }
                for dir in parent.ancestors().take_while(|d| *d != staging.path()) {
                    dirs.insert(dir.to_path_buf());
                }
            }
            if !self.place(entry, &dest)? {
                link_fallbacks += 1;
            }
        }

        // Deepest first so every child entry is durable before its parent.
        for dir in dirs.iter().rev() {
            fsync_dir(dir)?;
        }
        fsync_dir(staging.path())?;

        index::save_at(self.layout, &SnapshotIndex::from_manifest(manifest))?;

        // The guard is released only once the rename is about to happen; a
        // failed rename removes the staging tree by hand.
        let staged = staging.keep();
        if let Err(e) = fs::rename(&staged, &final_path) {
            let _ = fs::remove_dir_all(&staged);
            return Err(io_err(&final_path, e));
        }
        fsync_dir(&snapshots_dir)?;

        tracing::info!(
            version = %manifest.version,
            files = manifest.files.len(),
            link_fallbacks,
            "snapshot committed",
        );
        Ok(BuiltSnapshot {
            version: manifest.version.clone(),
            path: final_path,
            files: manifest.files.len(),
            link_fallbacks,
        })
    }

    /// Place one entry. Returns `false` when a hard link fell back to a copy.
    fn place(&self, entry: &FileEntry, dest: &Path) -> Result<bool, SyncError> {
        let src = self.store.path_for(&entry.hash);
        if !src.is_file() {
            return Err(SyncError::MissingObject {
                hash: entry.hash.clone(),
                path: entry.path.clone(),
            });
        }

        match self.materialize {
            Materialize::Copy => {
                copy_file(&src, dest)?;
                Ok(true)
            }
            Materialize::Hardlink => match fs::hard_link(&src, dest) {
                Ok(()) => Ok(true),
                Err(err) => {
                    tracing::debug!(
                        path = %entry.path,
                        error = %err,
                        "hard link failed; copying instead",
                    );
                    copy_file(&src, dest)?;
                    Ok(false)
                }
            },
        }
    }
}

/// `.<sanitized version>.staging-`
fn staging_prefix(version: &Version) -> String {
    let sanitized: String = version
        .as_str()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    format!(".{sanitized}{STAGING_MARKER}")
}

/// Copy into a file that must not exist yet, then fsync and chmod it.
fn copy_file(src: &Path, dest: &Path) -> Result<(), SyncError> {
    let mut input = File::open(src).map_err(|e| io_err(src, e))?;
    let mut output = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(dest)
        .map_err(|e| io_err(dest, e))?;
    io::copy(&mut input, &mut output).map_err(|e| io_err(dest, e))?;
    output.sync_all().map_err(|e| io_err(dest, e))?;
    set_world_readable(dest)
}

// ---------------------------------------------------------------------------
// Listing
// ---------------------------------------------------------------------------

/// A committed snapshot found on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotInfo {
    pub version: Version,
    pub path: PathBuf,
    pub modified: SystemTime,
}

/// Committed snapshots, newest version first. Dot-named entries (staging and
/// trash directories) are not snapshots and are skipped.
pub fn list_snapshots(layout: &RootLayout) -> Result<Vec<SnapshotInfo>, SyncError> {
    let dir = layout.snapshots_dir();
    let entries = match fs::read_dir(&dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(vec![]),
        Err(e) => return Err(io_err(&dir, e)),
    };

    let mut snapshots = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| io_err(&dir, e))?;
        let path = entry.path();
        let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
            continue;
        };
        let Ok(version) = Version::parse(&name) else {
            continue;
        };
        let meta = entry.metadata().map_err(|e| io_err(&path, e))?;
        if !meta.is_dir() {
            continue;
        }
        let modified = meta.modified().map_err(|e| io_err(&path, e))?;
        snapshots.push(SnapshotInfo {
            version,
            path,
            modified,
        });
    }
    snapshots.sort_by(|a, b| b.version.cmp(&a.version));
    Ok(snapshots)
}
