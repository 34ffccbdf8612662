// crates/deep-research-store/tests/store.rs
// ============================================================================
// Module: Durable Store Tests
// Description: Verifies OCC manifest writes, deep merge, and audit digests.
// ============================================================================
//! ## Overview
//! Ensures every successful manifest write bumps the revision by exactly
//! one with monotone `updated_at`, that conflicts fail atomically, and that
//! semantically equal patches audit identical canonical digests.

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
use std::path::Path;
use std::path::PathBuf;

use deep_research_core::AuditRecord;
use deep_research_core::Manifest;
use deep_research_core::QuerySpec;
use deep_research_core::RunId;
use deep_research_core::Sensitivity;
use deep_research_core::Timestamp;
use deep_research_store::StoreError;
use deep_research_store::append_jsonl;
use deep_research_store::create_manifest;
use deep_research_store::deep_merge;
use deep_research_store::read_jsonl;
use deep_research_store::read_manifest;
use deep_research_store::write_manifest;
use serde_json::json;

fn seeded_manifest(root: &Path) -> PathBuf {
    let manifest = Manifest::new(
        RunId::new("r1").expect("run id"),
        QuerySpec {
            text: "Q".to_string(),
            sensitivity: Sensitivity::Normal,
            constraints: Vec::new(),
        },
        root.to_path_buf(),
        Timestamp::now(),
    );
    let path = root.join("manifest.json");
    create_manifest(&path, &manifest).expect("create manifest");
    path
}

#[test]
fn write_manifest_bumps_revision_by_exactly_one() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = seeded_manifest(dir.path());

    let patch = json!({ "query": { "text": "Q2" } });
    let revision = write_manifest(&path, 1, &patch, "update query").expect("write");
    assert_eq!(revision, 2);

    let snapshot = read_manifest(&path).expect("read");
    assert_eq!(snapshot.revision, 2);
    assert_eq!(snapshot.manifest.query.text, "Q2");
}

#[test]
fn write_manifest_keeps_updated_at_monotone() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = seeded_manifest(dir.path());

    let before = read_manifest(&path).expect("read").manifest.updated_at;
    let _ = write_manifest(&path, 1, &json!({ "query": { "text": "A" } }), "first")
        .expect("first write");
    let mid = read_manifest(&path).expect("read").manifest.updated_at;
    let _ = write_manifest(&path, 2, &json!({ "query": { "text": "B" } }), "second")
        .expect("second write");
    let after = read_manifest(&path).expect("read").manifest.updated_at;

    assert!(before <= mid, "updated_at must be monotone");
    assert!(mid <= after, "updated_at must be monotone");
}

#[test]
fn revision_conflict_fails_without_mutation() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = seeded_manifest(dir.path());
    let bytes_before = fs::read(&path).expect("before");

    let err = write_manifest(&path, 7, &json!({ "query": { "text": "X" } }), "conflict")
        .expect_err("conflict");
    assert!(matches!(
        err,
        StoreError::RevisionConflict {
            expected: 7,
            actual: 1,
        }
    ));
    assert_eq!(fs::read(&path).expect("after"), bytes_before, "file must be untouched");
}

#[test]
fn semantically_equal_patches_audit_identical_digests() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = seeded_manifest(dir.path());

    let patch_a: serde_json::Value =
        serde_json::from_str(r#"{"limits":{"max_wave1_agents":4,"max_wave2_agents":2}}"#)
            .expect("patch a");
    let patch_b: serde_json::Value =
        serde_json::from_str(r#"{"limits":{"max_wave2_agents":2,"max_wave1_agents":4}}"#)
            .expect("patch b");

    let _ = write_manifest(&path, 1, &patch_a, "patch a").expect("write a");
    let _ = write_manifest(&path, 2, &patch_b, "patch b").expect("write b");

    let audits: Vec<AuditRecord> =
        read_jsonl(&dir.path().join("logs").join("audit.jsonl")).expect("audit");
    assert_eq!(audits.len(), 2);
    assert_eq!(audits[0].patch_digest, audits[1].patch_digest);
    assert_eq!(audits[0].expected_revision, 1);
    assert_eq!(audits[0].new_revision, 2);
    assert_eq!(audits[1].new_revision, 3);
}

#[test]
fn atomic_writes_leave_no_tmp_files() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = seeded_manifest(dir.path());
    let _ = write_manifest(&path, 1, &json!({ "query": { "text": "Y" } }), "write")
        .expect("write");

    let leftovers: Vec<String> = fs::read_dir(dir.path())
        .expect("read dir")
        .filter_map(Result::ok)
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .filter(|name| name.contains(".tmp-"))
        .collect();
    assert!(leftovers.is_empty(), "tmp files must not survive: {leftovers:?}");
}

#[test]
fn manifest_files_are_newline_terminated() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = seeded_manifest(dir.path());
    let bytes = fs::read(&path).expect("read");
    assert_eq!(bytes.last(), Some(&b'\n'));
}

#[test]
fn deep_merge_recurses_objects_and_replaces_scalars() {
    let mut doc = json!({
        "a": { "x": 1, "y": 2 },
        "b": [1, 2, 3],
        "c": "keep",
    });
    deep_merge(&mut doc, &json!({
        "a": { "y": 9, "z": 3 },
        "b": [4],
    }));
    assert_eq!(doc, json!({
        "a": { "x": 1, "y": 9, "z": 3 },
        "b": [4],
        "c": "keep",
    }));
}

#[test]
fn deep_merge_null_removes_keys() {
    let mut doc = json!({ "a": 1, "b": { "c": 2, "d": 3 } });
    deep_merge(&mut doc, &json!({ "a": null, "b": { "c": null } }));
    assert_eq!(doc, json!({ "b": { "d": 3 } }));
}

#[test]
fn append_jsonl_is_newline_terminated_and_ordered() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("nested").join("stream.jsonl");
    append_jsonl(&path, &json!({ "seq": 1 })).expect("first");
    append_jsonl(&path, &json!({ "seq": 2 })).expect("second");

    let bytes = fs::read(&path).expect("read");
    assert_eq!(bytes.last(), Some(&b'\n'));
    let records: Vec<serde_json::Value> = read_jsonl(&path).expect("records");
    assert_eq!(records.len(), 2);
    assert_eq!(records[0]["seq"], 1);
    assert_eq!(records[1]["seq"], 2);
}

#[test]
fn read_manifest_rejects_non_object_documents() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("manifest.json");
    fs::write(&path, b"[1, 2, 3]\n").expect("write");
    let err = read_manifest(&path).expect_err("must reject");
    assert!(matches!(err, StoreError::NotObject { .. }));
}

#[test]
fn read_manifest_rejects_schema_version_mismatch() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("manifest.json");
    fs::write(&path, b"{\"schema_version\":\"manifest.v9\"}\n").expect("write");
    let err = read_manifest(&path).expect_err("must reject");
    assert!(matches!(err, StoreError::SchemaVersion { .. }));
}
