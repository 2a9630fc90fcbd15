//! Retention and garbage collection.
//!
//! Runs after activation, under the root lock:
//!
//! 1. Prune non-active snapshots outside the [`RetentionPolicy`]. Each is
//!    renamed to `.<version>.trash-<pid>` first so a half-deleted tree never
//!    sits under a servable name.
//! 2. Compute the live object set from the indexes of the surviving
//!    snapshots, hashing the files of any snapshot without an index.
//! 3. Delete objects outside the live set, then indexes with no snapshot.
//!
//! Every failure here is logged and recorded in the [`GcReport`]; none of
//! them fail the run. If the live set cannot be established, no object is
//! deleted.

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::Path;
use std::time::SystemTime;

use serde::Serialize;

use cityfeed_core::{ContentHash, RetentionPolicy, Version};

use crate::error::{io_err, SyncError};
use crate::fsutil::{remove_file_if_exists, sha256_file};
use crate::index::{self, INDEX_TMP_SUFFIX};
use crate::layout::{
    RootLayout, CURRENT_TMP_PREFIX, OBJECT_TMP_PREFIX, STAGING_MARKER, TRASH_MARKER,
};
use crate::snapshot::{list_snapshots, SnapshotInfo};
use crate::store::ObjectStore;

/// What one GC pass removed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GcReport {
    pub snapshots_removed: Vec<Version>,
    pub objects_removed: usize,
    pub bytes_freed: u64,
    pub indexes_removed: usize,
    /// Non-fatal failures, one line each.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

impl GcReport {
    fn error(&mut self, err: impl std::fmt::Display) {
        tracing::warn!(error = %err, "gc step failed");
        self.errors.push(err.to_string());
    }
}

// ---------------------------------------------------------------------------
// Retention
// ---------------------------------------------------------------------------

/// Snapshots the policy prunes. Pure: decides from versions and mtimes only.
///
/// The active snapshot is never returned. `keep` counts the active snapshot,
/// so the newest `keep - 1` others survive by count.
pub fn plan_retention<'a>(
    snapshots: &'a [SnapshotInfo],
    active: Option<&Version>,
    policy: &RetentionPolicy,
    now: SystemTime,
) -> Vec<&'a SnapshotInfo> {
    if policy.is_unbounded() {
        return vec![];
    }

    let mut others: Vec<&SnapshotInfo> = snapshots
        .iter()
        .filter(|s| Some(&s.version) != active)
        .collect();
    others.sort_by(|a, b| b.version.cmp(&a.version));

    let active_present = active.is_some_and(|v| snapshots.iter().any(|s| &s.version == v));
    let quota = policy
        .keep
        .map(|keep| keep.saturating_sub(usize::from(active_present)));

    others
        .into_iter()
        .enumerate()
        .filter(|(rank, snapshot)| {
            let outside_count = quota.map_or(true, |q| *rank >= q);
            let old_enough = policy.max_age.map_or(true, |max_age| {
                now.duration_since(snapshot.modified)
                    .is_ok_and(|age| age > max_age)
            });
            outside_count && old_enough
        })
        .map(|(_, snapshot)| snapshot)
        .collect()
}

// ---------------------------------------------------------------------------
// Collection
// ---------------------------------------------------------------------------

/// Apply `policy` and remove unreferenced objects and indexes.
pub fn collect(
    layout: &RootLayout,
    store: &ObjectStore,
    active: Option<&Version>,
    policy: &RetentionPolicy,
) -> GcReport {
    let mut report = GcReport::default();

    let snapshots = match list_snapshots(layout) {
        Ok(snapshots) => snapshots,
        Err(err) => {
            report.error(err);
            return report;
        }
    };

    let mut pruned = HashSet::new();
    for snapshot in plan_retention(&snapshots, active, policy, SystemTime::now()) {
        match remove_snapshot(layout, snapshot) {
            Ok(()) => {
                tracing::info!(version = %snapshot.version, "snapshot pruned");
                pruned.insert(snapshot.version.clone());
                report.snapshots_removed.push(snapshot.version.clone());
            }
            Err(err) => report.error(err),
        }
    }
    let retained: Vec<&SnapshotInfo> = snapshots
        .iter()
        .filter(|s| !pruned.contains(&s.version))
        .collect();

    match live_objects(layout, &retained) {
        Ok(live) => remove_unreferenced_objects(store, &live, &mut report),
        Err(err) => {
            report.error(format!("skipping object gc: {err}"));
        }
    }

    let retained_versions: HashSet<&Version> = retained.iter().map(|s| &s.version).collect();
    match index::list_versions(layout) {
        Ok(versions) => {
            for version in versions.iter().filter(|v| !retained_versions.contains(v)) {
                match index::remove(layout, version) {
                    Ok(true) => report.indexes_removed += 1,
                    Ok(false) => {}
                    Err(err) => report.error(err),
                }
            }
        }
        Err(err) => report.error(err),
    }

    report
}

fn remove_snapshot(layout: &RootLayout, snapshot: &SnapshotInfo) -> Result<(), SyncError> {
    let trash = layout.snapshots_dir().join(format!(
        ".{}{TRASH_MARKER}{}",
        snapshot.version,
        std::process::id()
    ));
    fs::rename(&snapshot.path, &trash).map_err(|e| io_err(&snapshot.path, e))?;
    fs::remove_dir_all(&trash).map_err(|e| io_err(&trash, e))
}

fn live_objects(
    layout: &RootLayout,
    retained: &[&SnapshotInfo],
) -> Result<HashSet<ContentHash>, SyncError> {
    let mut live = HashSet::new();
    for snapshot in retained {
        match index::load_at(layout, &snapshot.version) {
            Ok(Some(index)) => live.extend(index.hashes().cloned()),
            Ok(None) => {
                tracing::debug!(version = %snapshot.version, "no index; hashing snapshot files");
                hash_tree(&snapshot.path, &mut live)?;
            }
            Err(err) => {
                tracing::warn!(
                    version = %snapshot.version,
                    error = %err,
                    "unreadable index; hashing snapshot files",
                );
                hash_tree(&snapshot.path, &mut live)?;
            }
        }
    }
    Ok(live)
}

fn hash_tree(dir: &Path, live: &mut HashSet<ContentHash>) -> Result<(), SyncError> {
    for entry in fs::read_dir(dir).map_err(|e| io_err(dir, e))? {
        let entry = entry.map_err(|e| io_err(dir, e))?;
        let path = entry.path();
        let file_type = entry.file_type().map_err(|e| io_err(&path, e))?;
        if file_type.is_dir() {
            hash_tree(&path, live)?;
        } else if file_type.is_file() {
            let digest = sha256_file(&path)?;
            if let Ok(hash) = ContentHash::parse(&digest) {
                live.insert(hash);
            }
        }
    }
    Ok(())
}

fn remove_unreferenced_objects(
    store: &ObjectStore,
    live: &HashSet<ContentHash>,
    report: &mut GcReport,
) {
    let stored = match store.list() {
        Ok(stored) => stored,
        Err(err) => {
            report.error(err);
            return;
        }
    };
    for hash in stored.iter().filter(|h| !live.contains(*h)) {
        match store.remove(hash) {
            Ok(bytes) => {
                tracing::debug!(%hash, bytes, "object removed");
                report.objects_removed += 1;
                report.bytes_freed += bytes;
            }
            Err(err) => report.error(err),
        }
    }
}

// ---------------------------------------------------------------------------
// Leftover sweep
// ---------------------------------------------------------------------------

/// Remove debris from interrupted runs: staging and trash trees, temp
/// objects, temp pointer links and temp indexes. Returns how many entries
/// were removed; a root without debris is not written to.
pub fn sweep_leftovers(layout: &RootLayout) -> usize {
    let mut removed = 0;

    removed += sweep_dir(&layout.snapshots_dir(), |name| {
        name.starts_with('.') && (name.contains(STAGING_MARKER) || name.contains(TRASH_MARKER))
    });
    removed += sweep_dir(&layout.objects_dir(), |name| name.starts_with(OBJECT_TMP_PREFIX));
    removed += sweep_dir(&layout.index_dir(), |name| name.ends_with(INDEX_TMP_SUFFIX));
    removed += sweep_dir(layout.root(), |name| name.starts_with(CURRENT_TMP_PREFIX));

    if removed > 0 {
        tracing::info!(removed, "removed leftovers from interrupted runs");
    }
    removed
}

fn sweep_dir(dir: &Path, is_leftover: impl Fn(&str) -> bool) -> usize {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return 0,
        Err(e) => {
            tracing::warn!(dir = %dir.display(), error = %e, "cannot scan for leftovers");
            return 0;
        }
    };

    let mut removed = 0;
    for entry in entries.filter_map(Result::ok) {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if !is_leftover(name) {
            continue;
        }
        let path = entry.path();
        let result = match entry.file_type() {
            Ok(t) if t.is_dir() => fs::remove_dir_all(&path).map_err(|e| io_err(&path, e)),
            Ok(_) => remove_file_if_exists(&path).map(|_| ()),
            Err(e) => Err(io_err(&path, e)),
        };
        match result {
            Ok(()) => {
                tracing::debug!(path = %path.display(), "leftover removed");
                removed += 1;
            }
            Err(err) => tracing::warn!(error = %err, "cannot remove leftover"),
        }
    }
    removed
}
