// crates/deep-research-core/tests/manifest.rs
// ============================================================================
// Module: Manifest Invariant Tests
// Description: Verifies manifest validation and serialization stability.
// ============================================================================
//! ## Overview
//! Ensures the manifest rejects escaping layouts, relative roots, and zero
//! revisions, and that documents round-trip through JSON unchanged.

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

use std::path::PathBuf;

use deep_research_core::Manifest;
use deep_research_core::ManifestError;
use deep_research_core::QuerySpec;
use deep_research_core::RunId;
use deep_research_core::Sensitivity;
use deep_research_core::Stage;
use deep_research_core::Timestamp;

fn sample_manifest() -> Manifest {
    Manifest::new(
        RunId::new("run-1").expect("run id"),
        QuerySpec {
            text: "What changed in the field this year?".to_string(),
            sensitivity: Sensitivity::Normal,
            constraints: vec!["english sources only".to_string()],
        },
        PathBuf::from("/runs/run-1"),
        Timestamp::now(),
    )
}

#[test]
fn fresh_manifest_is_valid_at_revision_one() {
    let manifest = sample_manifest();
    assert_eq!(manifest.revision, 1);
    assert_eq!(manifest.stage.current, Stage::Init);
    manifest.validate().expect("fresh manifest must validate");
}

#[test]
fn relative_root_is_rejected() {
    let mut manifest = sample_manifest();
    manifest.artifacts.root = PathBuf::from("runs/run-1");
    let err = manifest.validate().expect_err("relative root");
    assert!(matches!(err, ManifestError::RootNotAbsolute(_)));
}

#[test]
fn zero_revision_is_rejected() {
    let mut manifest = sample_manifest();
    manifest.revision = 0;
    let err = manifest.validate().expect_err("zero revision");
    assert!(matches!(err, ManifestError::RevisionZero));
}

#[test]
fn escaping_layout_path_is_rejected() {
    let mut manifest = sample_manifest();
    manifest.artifacts.paths.logs_dir = "../outside".to_string();
    let err = manifest.validate().expect_err("escaping path");
    assert!(matches!(
        err,
        ManifestError::EscapingPath {
            name: "logs_dir",
            ..
        }
    ));
}

#[test]
fn absolute_layout_path_is_rejected() {
    let mut manifest = sample_manifest();
    manifest.artifacts.paths.gates = "/etc/gates.json".to_string();
    let err = manifest.validate().expect_err("absolute path");
    assert!(matches!(err, ManifestError::EscapingPath { .. }));
}

#[test]
fn unsupported_schema_version_is_rejected() {
    let mut manifest = sample_manifest();
    manifest.schema_version = "manifest.v2".to_string();
    let err = manifest.validate().expect_err("schema version");
    assert!(matches!(err, ManifestError::SchemaVersion { .. }));
}

#[test]
fn manifest_round_trips_through_json() {
    let manifest = sample_manifest();
    let bytes = serde_json::to_vec(&manifest).expect("serialize");
    let parsed: Manifest = serde_json::from_slice(&bytes).expect("deserialize");
    assert_eq!(parsed, manifest);
}

#[test]
fn run_id_rejects_unsafe_segments() {
    assert!(RunId::new("ok-run_1.a").is_ok());
    assert!(RunId::new("").is_err());
    assert!(RunId::new("..").is_err());
    assert!(RunId::new("a/b").is_err());
    assert!(RunId::new("a b").is_err());
}
