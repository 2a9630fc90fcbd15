//! Failed and interrupted runs must leave `current` and committed snapshots
//! exactly as they were.

use std::fs;

use tempfile::TempDir;

use cityfeed_core::Version;

use super::helpers::{config_for, hash_of, manifest_json, reconciler, MemoryOrigin};
use crate::activate::active_version;
use crate::error::SyncError;
use crate::layout::{CURRENT_TMP_PREFIX, OBJECT_TMP_PREFIX, STAGING_MARKER};
use crate::reconcile::Outcome;

const V1: &str = "2025-01-01T00:00:00Z";
const V2: &str = "2025-01-02T00:00:00Z";

fn hidden_entries(dir: &std::path::Path) -> Vec<String> {
    fs::read_dir(dir)
        .unwrap()
        .filter_map(Result::ok)
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|n| n.starts_with('.') && n != ".lock")
        .collect()
}

#[test]
fn missing_object_aborts_before_activation() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().join("site");
    let b = MemoryOrigin::new("http://b.test");
    b.publish(V1, &[("index.html", "hello")]);
    let r = reconciler(config_for(&root, &["http://b.test"]), &[&b]);
    assert!(matches!(r.run().unwrap(), Outcome::Activated(_)));

    // V2 names an object no origin serves, next to one that is available.
    b.publish(V2, &[("index.html", "world")]);
    let extra = manifest_json(V2, &[("index.html", "world"), ("gone.txt", "never served")]);
    b.set("/manifests/latest.json", 200, extra.into_bytes());
    b.set(&format!("/objects/{}", hash_of(b"never served")), 404, vec![]);

    let err = r.run().unwrap_err();
    assert!(
        matches!(
            err,
            SyncError::ObjectUnavailable { ref hash, .. } if *hash == hash_of(b"never served")
        ),
        "{err}"
    );
    assert_eq!(
        active_version(r.layout()).unwrap(),
        Some(Version::parse(V1).unwrap())
    );
    assert_eq!(fs::read(root.join("current/index.html")).unwrap(), b"hello");
    assert!(!root.join("snapshots").join(V2).exists());
    assert!(hidden_entries(&root.join("snapshots")).is_empty());
    assert!(hidden_entries(&root.join("objects")).is_empty());
}

#[test]
fn corrupt_object_on_every_origin_aborts_cleanly() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().join("site");
    let wanted = hash_of(b"hello");
    let a = MemoryOrigin::new("http://a.test").with_raw(
        &format!("/objects/{wanted}"),
        200,
        b"not hello".to_vec(),
    );
    a.set(
        "/manifests/latest.json",
        200,
        manifest_json(V1, &[("index.html", "hello")]).into_bytes(),
    );

    let r = reconciler(config_for(&root, &["http://a.test"]), &[&a]);
    let err = r.run().unwrap_err();
    match err {
        SyncError::ObjectUnavailable { source, .. } => assert!(source.all_rejected()),
        other => panic!("unexpected error: {other}"),
    }
    assert!(!root.join("objects").join(wanted.as_str()).exists());
    assert!(fs::symlink_metadata(root.join("current")).is_err());
}

#[cfg(unix)]
#[test]
fn leftovers_from_interrupted_runs_are_swept() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().join("site");
    let b = MemoryOrigin::new("http://b.test");
    b.publish(V1, &[("index.html", "hello")]);
    let r = reconciler(config_for(&root, &["http://b.test"]), &[&b]);
    r.layout().ensure().unwrap();

    let staging = root
        .join("snapshots")
        .join(format!(".2025_01_01T00_00_00Z{STAGING_MARKER}abc123"));
    fs::create_dir_all(staging.join("half")).unwrap();
    fs::write(staging.join("half/written.html"), b"partial").unwrap();
    fs::write(root.join("objects").join(format!("{OBJECT_TMP_PREFIX}xyz")), b"partial").unwrap();
    std::os::unix::fs::symlink("snapshots/nowhere", root.join(format!("{CURRENT_TMP_PREFIX}4242")))
        .unwrap();
    fs::write(root.join("index").join("v0.json.tmp"), b"{").unwrap();

    let report = match r.run().unwrap() {
        Outcome::Activated(report) => report,
        other => panic!("expected activation, got {other:?}"),
    };
    assert_eq!(report.leftovers_removed, 4);
    assert!(hidden_entries(&root.join("snapshots")).is_empty());
    assert!(hidden_entries(&root.join("objects")).is_empty());
    assert!(hidden_entries(&root).is_empty());
    assert!(!root.join("index/v0.json.tmp").exists());
}

#[test]
fn directory_in_place_of_current_is_left_alone() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().join("site");
    fs::create_dir_all(root.join("current")).unwrap();
    fs::write(root.join("current/hand-made.html"), b"keep").unwrap();

    let b = MemoryOrigin::new("http://b.test");
    b.publish(V1, &[("index.html", "hello")]);
    let r = reconciler(config_for(&root, &["http://b.test"]), &[&b]);

    assert!(matches!(
        r.run().unwrap_err(),
        SyncError::CurrentNotSymlink { .. }
    ));
    assert_eq!(fs::read(root.join("current/hand-made.html")).unwrap(), b"keep");
}

#[test]
fn flaky_origin_is_retried_within_its_budget() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().join("site");
    let b = MemoryOrigin::new("http://b.test").failing_first(2);
    b.publish(V1, &[("index.html", "hello")]);

    let mut config = config_for(&root, &["http://b.test"]);
    config.max_retry_wait = std::time::Duration::from_secs(5);
    config.retry_delay = std::time::Duration::from_millis(1);
    let r = reconciler(config, &[&b]);

    assert!(matches!(r.run().unwrap(), Outcome::Activated(_)));
    assert_eq!(fs::read(root.join("current/index.html")).unwrap(), b"hello");
}
