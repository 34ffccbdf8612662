// crates/deep-research-engine/tests/lifecycle.rs
// ============================================================================
// Module: Run Lifecycle Tests
// Description: Verifies init, status switches, and checkpoint notes.
// ============================================================================
//! ## Overview
//! Covers the init happy path (seeded perspectives land the run in wave1 at
//! revision three with a digest-pinned plan), the pause/resume/cancel
//! switches, and tick rejection for paused runs.

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

mod common;

use deep_research_core::ErrorCode;
use deep_research_core::PerspectivesDoc;
use deep_research_core::RunPolicy;
use deep_research_core::RunStatus;
use deep_research_core::Stage;
use deep_research_core::WavePlan;
use deep_research_core::digest_value;
use deep_research_engine::TaskDriver;
use deep_research_engine::ToolSet;
use deep_research_engine::cancel;
use deep_research_engine::pause;
use deep_research_engine::resume;
use deep_research_engine::status;
use deep_research_engine::tick;
use deep_research_store::read_json;
use deep_research_store::read_manifest;

#[test]
fn init_with_perspectives_lands_in_wave1_at_revision_three() {
    let dir = tempfile::tempdir().expect("tempdir");
    let run = common::seeded_run(dir.path(), 5);

    let snapshot = read_manifest(&run.manifest_path).expect("read manifest");
    assert_eq!(snapshot.revision, 3);
    assert_eq!(snapshot.manifest.status, RunStatus::Running);
    assert_eq!(snapshot.manifest.stage.current, Stage::Wave1);

    // The shortcut records both hops in history.
    let history = &snapshot.manifest.stage.history;
    assert_eq!(history.len(), 2);
    assert_eq!((history[0].from, history[0].to), (Stage::Init, Stage::Perspectives));
    assert_eq!((history[1].from, history[1].to), (Stage::Perspectives, Stage::Wave1));

    let perspectives: PerspectivesDoc =
        read_json(&run.layout.perspectives_path()).expect("perspectives");
    let plan: WavePlan = read_json(&run.layout.wave_plan_path(1)).expect("plan");
    assert_eq!(plan.perspectives_digest, digest_value(&perspectives).expect("digest"));
    assert_eq!(plan.entries.len(), perspectives.perspectives.len());
}

#[test]
fn init_without_perspectives_stays_in_init() {
    let dir = tempfile::tempdir().expect("tempdir");
    let run = common::bare_run(dir.path());
    let snapshot = read_manifest(&run.manifest_path).expect("read manifest");
    assert_eq!(snapshot.manifest.stage.current, Stage::Init);
    assert_eq!(snapshot.revision, 2);
    assert!(!run.layout.perspectives_path().exists());
}

#[test]
fn pause_resume_round_trip_writes_checkpoints() {
    let dir = tempfile::tempdir().expect("tempdir");
    let run = common::seeded_run(dir.path(), 5);

    let revision = pause(&run.manifest_path, "maintenance window").expect("pause");
    assert_eq!(revision, 4);
    assert!(run.layout.pause_checkpoint_path().exists());
    let snapshot = read_manifest(&run.manifest_path).expect("read");
    assert_eq!(snapshot.manifest.status, RunStatus::Paused);

    let revision = resume(&run.manifest_path, "maintenance done").expect("resume");
    assert_eq!(revision, 5);
    assert!(run.layout.resume_checkpoint_path().exists());
    let snapshot = read_manifest(&run.manifest_path).expect("read");
    assert_eq!(snapshot.manifest.status, RunStatus::Running);
}

#[test]
fn paused_run_rejects_ticks() {
    let dir = tempfile::tempdir().expect("tempdir");
    let run = common::seeded_run(dir.path(), 5);
    let _ = pause(&run.manifest_path, "hold").expect("pause");

    let err = tick(
        &run.manifest_path,
        &run.gates_path,
        "tick while paused",
        &RunPolicy::default(),
        &TaskDriver,
        &ToolSet::new(),
    )
    .expect_err("must reject");
    assert_eq!(err.code, ErrorCode::Paused);
}

#[test]
fn cancel_is_terminal_and_idempotent_rejection() {
    let dir = tempfile::tempdir().expect("tempdir");
    let run = common::seeded_run(dir.path(), 5);

    let _ = cancel(&run.manifest_path, "operator abort").expect("cancel");
    assert!(run.layout.cancel_checkpoint_path().exists());
    let snapshot = read_manifest(&run.manifest_path).expect("read");
    assert_eq!(snapshot.manifest.status, RunStatus::Cancelled);

    let err = cancel(&run.manifest_path, "again").expect_err("terminal");
    assert_eq!(err.into_coded().code, ErrorCode::InvalidState);
}

#[test]
fn status_reports_stage_and_gates() {
    let dir = tempfile::tempdir().expect("tempdir");
    let run = common::seeded_run(dir.path(), 5);
    let report = status(&run.manifest_path).expect("status");
    assert_eq!(report["run_id"], "r1");
    assert_eq!(report["stage"], "wave1");
    assert_eq!(report["status"], "running");
    assert_eq!(report["gates"]["A"]["status"], "pass");
}
