//! On-disk layout of a reconciler root.
//!
//! ```text
//! <root>/
//!   .lock                     advisory lock, never removed
//!   objects/<hash>            content-addressed blobs (0644)
//!   snapshots/<version>/...   complete, immutable trees
//!   index/<version>.json      path -> hash record per snapshot
//!   current -> snapshots/<version>
//! ```
//!
//! Names starting with `.` inside `objects/`, `snapshots/` and the root are
//! reserved for in-flight work (temp objects, staging trees, the pointer
//! being swapped) and are never served.

use std::fs;
use std::path::{Path, PathBuf};

use cityfeed_core::Version;

use crate::error::{io_err, SyncError};

pub const OBJECTS_DIR: &str = "objects";
pub const SNAPSHOTS_DIR: &str = "snapshots";
pub const INDEX_DIR: &str = "index";
pub const CURRENT_LINK: &str = "current";
pub const LOCK_FILE: &str = ".lock";

/// Prefix of the temporary symlink renamed over `current`.
pub const CURRENT_TMP_PREFIX: &str = ".current.new.";
/// Marker inside staging directory names.
pub const STAGING_MARKER: &str = ".staging-";
/// Marker inside names of snapshots being deleted.
pub const TRASH_MARKER: &str = ".trash-";
/// Prefix of temporary object files.
pub const OBJECT_TMP_PREFIX: &str = ".tmp-";

/// Paths under one reconciler root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootLayout {
    root: PathBuf,
}

impl RootLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn objects_dir(&self) -> PathBuf {
        self.root.join(OBJECTS_DIR)
    }

    pub fn snapshots_dir(&self) -> PathBuf {
        self.root.join(SNAPSHOTS_DIR)
    }

    pub fn index_dir(&self) -> PathBuf {
        self.root.join(INDEX_DIR)
    }

    pub fn current_link(&self) -> PathBuf {
        self.root.join(CURRENT_LINK)
    }

    pub fn lock_path(&self) -> PathBuf {
        self.root.join(LOCK_FILE)
    }

    /// `<root>/snapshots/<version>`
    pub fn snapshot_dir(&self, version: &Version) -> PathBuf {
        self.snapshots_dir().join(version.as_str())
    }

    /// Relative target stored in the `current` symlink: `snapshots/<version>`.
    pub fn link_target(version: &Version) -> PathBuf {
        Path::new(SNAPSHOTS_DIR).join(version.as_str())
    }

    /// `<root>/index/<version>.json`
    pub fn index_path(&self, version: &Version) -> PathBuf {
        self.index_dir().join(format!("{version}.json"))
    }

    /// Create every directory of the layout that does not exist yet.
    ///
    /// Existing directories are left alone, so a run against a prepared root
    /// performs no writes here.
    pub fn ensure(&self) -> Result<(), SyncError> {
        for dir in [
            self.root.clone(),
            self.objects_dir(),
            self.snapshots_dir(),
            self.index_dir(),
        ] {
            if !dir.is_dir() {
                fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;
            }
        }
        Ok(())
    }
}
