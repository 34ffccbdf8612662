// crates/deep-research-store/tests/paths.rs
// ============================================================================
// Module: Path Containment Tests
// Description: Verifies traversal rejection and symlink-aware containment.
// ============================================================================
//! ## Overview
//! Ensures every externally influenced path is normalized, screened for
//! forbidden components, and real-path-contained inside the run root, with
//! symlink escapes rejected.

#![allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only output and panic-based assertions are permitted."
)]

use std::fs;

use deep_research_store::PathError;
use deep_research_store::contain_absolute;
use deep_research_store::contain_relative;

#[test]
fn plain_relative_paths_are_contained() {
    let dir = tempfile::tempdir().expect("tempdir");
    let resolved = contain_relative(dir.path(), "wave-1/p1.md").expect("contained");
    assert!(resolved.starts_with(dir.path()));
}

#[test]
fn parent_components_are_rejected() {
    let dir = tempfile::tempdir().expect("tempdir");
    let err = contain_relative(dir.path(), "../escape.md").expect_err("must reject");
    assert!(matches!(err, PathError::ForbiddenComponent(_)));

    let err = contain_relative(dir.path(), "a/../../escape.md").expect_err("must reject");
    assert!(matches!(err, PathError::ForbiddenComponent(_)));
}

#[test]
fn absolute_relative_input_is_rejected() {
    let dir = tempfile::tempdir().expect("tempdir");
    let err = contain_relative(dir.path(), "/etc/passwd").expect_err("must reject");
    assert!(matches!(err, PathError::ForbiddenComponent(_)));
}

#[test]
fn empty_input_is_rejected() {
    let dir = tempfile::tempdir().expect("tempdir");
    let err = contain_relative(dir.path(), "").expect_err("must reject");
    assert!(matches!(err, PathError::ForbiddenComponent(_)));
}

#[test]
fn escaping_absolute_paths_are_rejected() {
    let dir = tempfile::tempdir().expect("tempdir");
    let outside = tempfile::tempdir().expect("outside");
    let err =
        contain_absolute(dir.path(), &outside.path().join("file.md")).expect_err("must reject");
    assert!(matches!(err, PathError::Escapes(_)));
}

#[cfg(unix)]
#[test]
fn symlink_escape_is_rejected() {
    let dir = tempfile::tempdir().expect("tempdir");
    let outside = tempfile::tempdir().expect("outside");
    let link = dir.path().join("sneaky");
    std::os::unix::fs::symlink(outside.path(), &link).expect("symlink");

    let err = contain_absolute(dir.path(), &link.join("file.md")).expect_err("must reject");
    assert!(matches!(err, PathError::Escapes(_)));
}

#[cfg(unix)]
#[test]
fn symlinked_run_root_prefix_still_contains() {
    // A run root reached through a symlinked prefix must compare equal to
    // its real path (the /var -> /private/var case).
    let real = tempfile::tempdir().expect("real");
    let holder = tempfile::tempdir().expect("holder");
    let alias = holder.path().join("alias");
    std::os::unix::fs::symlink(real.path(), &alias).expect("symlink");

    fs::create_dir_all(real.path().join("logs")).expect("logs dir");
    let resolved = contain_relative(&alias, "logs/audit.jsonl").expect("contained");
    assert!(resolved.ends_with("logs/audit.jsonl"));
}

#[test]
fn not_yet_created_artifacts_are_contained() {
    let dir = tempfile::tempdir().expect("tempdir");
    let resolved =
        contain_relative(dir.path(), "citations/url-map.json").expect("contained");
    assert!(resolved.starts_with(dir.path()));
    assert!(!resolved.exists());
}
