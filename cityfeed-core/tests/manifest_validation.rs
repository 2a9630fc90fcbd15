use cityfeed_core::{Manifest, ManifestError};
use rstest::rstest;

const HELLO: &str = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";

fn single_file(path: &str, hash: &str) -> String {
    format!(r#"{{"version":"v1","files":[{{"path":{path:?},"hash":{hash:?}}}]}}"#)
}

#[rstest]
#[case::absolute("/etc/passwd")]
#[case::parent("../x")]
#[case::nested_parent("a/../../b")]
#[case::leading_dot_slash("./index.html")]
#[case::backslash("a\\b.html")]
#[case::trailing_slash("assets/")]
#[case::empty("")]
fn traversal_and_malformed_paths_are_rejected(#[case] path: &str) {
    let err = Manifest::parse(single_file(path, HELLO).as_bytes()).unwrap_err();
    assert!(
        matches!(err, ManifestError::InvalidPath { .. }),
        "unexpected error for {path:?}: {err}"
    );
}

#[rstest]
#[case::uppercase(&HELLO.to_uppercase())]
#[case::short(&HELLO[..40])]
#[case::not_hex("zz24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824")]
fn malformed_hashes_are_rejected(#[case] hash: &str) {
    let err = Manifest::parse(single_file("index.html", hash).as_bytes()).unwrap_err();
    assert!(matches!(err, ManifestError::InvalidHash { .. }), "{err}");
}

#[rstest]
#[case::no_version(r#"{"files":[]}"#, "version")]
#[case::no_files(r#"{"version":"v1"}"#, "files")]
#[case::no_path(
    r#"{"version":"v1","files":[{"hash":"2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"}]}"#,
    "files[0].path"
)]
#[case::no_hash(r#"{"version":"v1","files":[{"path":"a"}]}"#, "files[0].hash")]
fn missing_fields_are_named(#[case] body: &str, #[case] expected: &str) {
    match Manifest::parse(body.as_bytes()).unwrap_err() {
        ManifestError::MissingField { field } => assert_eq!(field, expected),
        other => panic!("expected MissingField, got {other}"),
    }
}

#[rstest]
#[case::truncated(r#"{"version":"v1","files":["#)]
#[case::wrong_type(r#"{"version":1,"files":[]}"#)]
#[case::not_json("<html>502 Bad Gateway</html>")]
fn malformed_json_is_rejected(#[case] body: &str) {
    assert!(matches!(
        Manifest::parse(body.as_bytes()).unwrap_err(),
        ManifestError::Json(_)
    ));
}

#[test]
fn duplicate_paths_after_normalisation_are_rejected() {
    let body = format!(
        r#"{{"version":"v1","files":[
            {{"path":"a/b.html","hash":"{HELLO}"}},
            {{"path":"a/./b.html","hash":"{HELLO}"}}
        ]}}"#
    );
    let err = Manifest::parse(body.as_bytes()).unwrap_err();
    assert!(matches!(err, ManifestError::DuplicatePath { ref path } if path == "a/b.html"));
}

#[test]
fn file_that_is_also_a_directory_is_rejected() {
    let body = format!(
        r#"{{"version":"v1","files":[
            {{"path":"docs/guide/index.html","hash":"{HELLO}"}},
            {{"path":"docs","hash":"{HELLO}"}}
        ]}}"#
    );
    let err = Manifest::parse(body.as_bytes()).unwrap_err();
    match err {
        ManifestError::PathConflict { file, nested } => {
            assert_eq!(file, "docs");
            assert_eq!(nested, "docs/guide/index.html");
        }
        other => panic!("expected PathConflict, got {other}"),
    }
}

#[rstest]
#[case::slash("2025/01/01")]
#[case::dotdot("..")]
#[case::empty("")]
fn unusable_versions_are_rejected(#[case] version: &str) {
    let body = format!(r#"{{"version":{version:?},"files":[]}}"#);
    assert!(matches!(
        Manifest::parse(body.as_bytes()).unwrap_err(),
        ManifestError::InvalidVersion { .. }
    ));
}

#[test]
fn shared_hash_with_conflicting_sizes_is_rejected() {
    let body = format!(
        r#"{{"version":"v1","files":[
            {{"path":"a.html","hash":"{HELLO}","size":5}},
            {{"path":"b.html","hash":"{HELLO}"}},
            {{"path":"c.html","hash":"{HELLO}","size":6}}
        ]}}"#
    );
    match Manifest::parse(body.as_bytes()).unwrap_err() {
        ManifestError::SizeConflict { hash, first, second } => {
            assert_eq!(hash, HELLO);
            assert_eq!((first, second), (5, 6));
        }
        other => panic!("expected SizeConflict, got {other}"),
    }
}

#[test]
fn shared_hash_with_matching_sizes_is_accepted() {
    let body = format!(
        r#"{{"version":"v1","files":[
            {{"path":"a.html","hash":"{HELLO}","size":5}},
            {{"path":"b.html","hash":"{HELLO}","size":5}}
        ]}}"#
    );
    assert_eq!(Manifest::parse(body.as_bytes()).unwrap().files.len(), 2);
}
