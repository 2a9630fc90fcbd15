//! The `current` activation pointer.
//!
//! `current` is a relative symlink `snapshots/<version>`. It is replaced by
//! creating `.current.new.<pid>` next to it and renaming that over the old
//! link, so readers resolve either the old or the new snapshot and never a
//! missing or partial one.

use std::fs;
use std::io;
use std::path::Path;

use cityfeed_core::Version;

use crate::error::{io_err, SyncError};
use crate::fsutil::{fsync_dir, remove_file_if_exists};
use crate::layout::{RootLayout, CURRENT_TMP_PREFIX, SNAPSHOTS_DIR};

/// Version `current` resolves to.
///
/// `Ok(None)` when there is no link yet, when it dangles, or when its target
/// is not a snapshot of this root; the next activation simply replaces it.
pub fn active_version(layout: &RootLayout) -> Result<Option<Version>, SyncError> {
    let link = layout.current_link();
    let meta = match fs::symlink_metadata(&link) {
        Ok(meta) => meta,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(io_err(&link, e)),
    };
    if !meta.file_type().is_symlink() {
        return Err(SyncError::CurrentNotSymlink { path: link });
    }

    let target = fs::read_link(&link).map_err(|e| io_err(&link, e))?;
    let Some(version) = version_from_target(&target) else {
        tracing::warn!(target = %target.display(), "current points outside snapshots/; ignoring");
        return Ok(None);
    };
    if !layout.snapshot_dir(&version).is_dir() {
        tracing::warn!(%version, "current is dangling; ignoring");
        return Ok(None);
    }
    Ok(Some(version))
}

/// `snapshots/<version>` (or an absolute path ending that way) to a version.
fn version_from_target(target: &Path) -> Option<Version> {
    let parent = target.parent()?.file_name()?;
    if parent != SNAPSHOTS_DIR {
        return None;
    }
    Version::parse(target.file_name()?.to_str()?).ok()
}

/// Atomically point `current` at `snapshots/<version>`.
pub fn switch_current(layout: &RootLayout, version: &Version) -> Result<(), SyncError> {
    let link = layout.current_link();
    if let Ok(meta) = fs::symlink_metadata(&link) {
        if !meta.file_type().is_symlink() {
            return Err(SyncError::CurrentNotSymlink { path: link });
        }
    }

    let target = RootLayout::link_target(version);
    let tmp = layout
        .root()
        .join(format!("{CURRENT_TMP_PREFIX}{}", std::process::id()));
    remove_file_if_exists(&tmp)?;
    symlink_dir(&target, &tmp).map_err(|e| io_err(&tmp, e))?;

    if let Err(e) = fs::rename(&tmp, &link) {
        let _ = fs::remove_file(&tmp);
        return Err(io_err(&link, e));
    }
    fsync_dir(layout.root())?;
    tracing::info!(%version, target = %target.display(), "current switched");
    Ok(())
}

#[cfg(unix)]
fn symlink_dir(target: &Path, link: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(windows)]
fn symlink_dir(target: &Path, link: &Path) -> io::Result<()> {
    std::os::windows::fs::symlink_dir(target, link)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn layout_with(versions: &[&str]) -> (TempDir, RootLayout) {
        let tmp = TempDir::new().unwrap();
        let layout = RootLayout::new(tmp.path());
        layout.ensure().unwrap();
        for v in versions {
            fs::create_dir_all(layout.snapshots_dir().join(v)).unwrap();
        }
        (tmp, layout)
    }

    fn v(s: &str) -> Version {
        Version::parse(s).unwrap()
    }

    #[test]
    fn no_link_means_no_active_version() {
        let (_tmp, layout) = layout_with(&[]);
        assert_eq!(active_version(&layout).unwrap(), None);
    }

    #[test]
    fn switch_writes_relative_target_and_replaces_previous() {
        let (_tmp, layout) = layout_with(&["v1", "v2"]);

        switch_current(&layout, &v("v1")).unwrap();
        assert_eq!(active_version(&layout).unwrap(), Some(v("v1")));

        switch_current(&layout, &v("v2")).unwrap();
        assert_eq!(
            fs::read_link(layout.current_link()).unwrap(),
            Path::new("snapshots/v2")
        );
        assert_eq!(active_version(&layout).unwrap(), Some(v("v2")));

        let stray: Vec<_> = fs::read_dir(layout.root())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with(CURRENT_TMP_PREFIX))
            .collect();
        assert!(stray.is_empty());
    }

    #[test]
    fn dangling_link_is_treated_as_inactive() {
        let (_tmp, layout) = layout_with(&[]);
        std::os::unix::fs::symlink("snapshots/gone", layout.current_link()).unwrap();
        assert_eq!(active_version(&layout).unwrap(), None);
    }

    #[test]
    fn regular_directory_at_current_is_refused() {
        let (_tmp, layout) = layout_with(&["v1"]);
        fs::create_dir(layout.current_link()).unwrap();
        assert!(matches!(
            active_version(&layout),
            Err(SyncError::CurrentNotSymlink { .. })
        ));
        assert!(matches!(
            switch_current(&layout, &v("v1")),
            Err(SyncError::CurrentNotSymlink { .. })
        ));
    }

    #[test]
    fn stale_temp_link_from_same_pid_is_replaced() {
        let (_tmp, layout) = layout_with(&["v1"]);
        let tmp_link = layout
            .root()
            .join(format!("{CURRENT_TMP_PREFIX}{}", std::process::id()));
        std::os::unix::fs::symlink("snapshots/old", &tmp_link).unwrap();

        switch_current(&layout, &v("v1")).unwrap();
        assert_eq!(active_version(&layout).unwrap(), Some(v("v1")));
        assert!(fs::symlink_metadata(&tmp_link).is_err());
    }
}
