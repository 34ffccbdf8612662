// crates/deep-research-engine/tests/watchdog.rs
// ============================================================================
// Module: Watchdog Tests
// Description: Verifies stale-marker detection and stage timeout checkpoints.
// ============================================================================
//! ## Overview
//! A stale tick-in-progress marker blocks further ticks with
//! `PREVIOUS_TICK_INCOMPLETE`; a stage past its timeout writes a typed
//! `timeout_checkpoint.v1` artifact and fails with `WATCHDOG_TIMEOUT`
//! without invoking the driver.

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
use deep_research_core::RunPolicy;
use deep_research_core::Stage;
use deep_research_core::TickMarker;
use deep_research_core::TimeoutCheckpoint;
use deep_research_core::Timestamp;
use deep_research_engine::TaskDriver;
use deep_research_engine::ToolSet;
use deep_research_engine::resume;
use deep_research_engine::tick;
use deep_research_store::read_json;
use deep_research_store::read_manifest;
use deep_research_store::write_json_atomic;
use deep_research_store::write_manifest;
use serde_json::json;

#[test]
fn stale_marker_blocks_the_next_tick() {
    let dir = tempfile::tempdir().expect("tempdir");
    let run = common::seeded_run(dir.path(), 5);

    let stale_ts = Timestamp::now().plus_seconds(-400);
    let marker = TickMarker::new(7, Stage::Wave1, stale_ts);
    write_json_atomic(&run.layout.tick_marker_path(), &marker).expect("marker");

    let err = tick(
        &run.manifest_path,
        &run.gates_path,
        "tick over stale marker",
        &RunPolicy::default(),
        &TaskDriver,
        &ToolSet::new(),
    )
    .expect_err("must block");
    assert_eq!(err.code, ErrorCode::PreviousTickIncomplete);

    let details = err.details.expect("details");
    assert_eq!(details["ts"], json!(stale_ts));
    assert_eq!(
        details["path"],
        run.layout.tick_marker_path().display().to_string()
    );
    assert!(details["age_seconds"].as_u64().expect("age") >= 400);
}

#[test]
fn fresh_marker_does_not_block() {
    let dir = tempfile::tempdir().expect("tempdir");
    let run = common::seeded_run(dir.path(), 5);

    let marker = TickMarker::new(1, Stage::Wave1, Timestamp::now());
    write_json_atomic(&run.layout.tick_marker_path(), &marker).expect("marker");

    // The tick proceeds past the marker check and halts on missing agents
    // instead.
    let err = tick(
        &run.manifest_path,
        &run.gates_path,
        "tick over fresh marker",
        &RunPolicy::default(),
        &TaskDriver,
        &ToolSet::new(),
    )
    .expect_err("task driver needs agents");
    assert_eq!(err.code, ErrorCode::RunAgentRequired);
}

#[test]
fn operator_resume_clears_a_stale_marker() {
    let dir = tempfile::tempdir().expect("tempdir");
    let run = common::seeded_run(dir.path(), 5);

    let marker = TickMarker::new(3, Stage::Wave1, Timestamp::now().plus_seconds(-900));
    write_json_atomic(&run.layout.tick_marker_path(), &marker).expect("marker");

    let _ = deep_research_engine::pause(&run.manifest_path, "inspect crash").expect("pause");
    let _ = resume(&run.manifest_path, "crash inspected").expect("resume");
    assert!(!run.layout.tick_marker_path().exists(), "resume clears the marker");
}

#[test]
fn stage_timeout_writes_checkpoint_and_skips_the_driver() {
    let dir = tempfile::tempdir().expect("tempdir");
    let run = common::seeded_run(dir.path(), 5);

    // Backdate the stage start well past a one-second timeout.
    let snapshot = read_manifest(&run.manifest_path).expect("read");
    let started_at = Timestamp::now().plus_seconds(-100);
    let _ = write_manifest(
        &run.manifest_path,
        snapshot.revision,
        &json!({ "stage": { "started_at": started_at } }),
        "backdate stage start",
    )
    .expect("backdate");

    let mut policy = RunPolicy::default();
    policy.stage_timeouts.default_seconds = 1;
    policy.stage_timeouts.overrides.clear();

    let err = tick(
        &run.manifest_path,
        &run.gates_path,
        "timed out tick",
        &policy,
        &TaskDriver,
        &ToolSet::new(),
    )
    .expect_err("must time out");
    assert_eq!(err.code, ErrorCode::WatchdogTimeout);

    let checkpoint: TimeoutCheckpoint =
        read_json(&run.layout.timeout_checkpoint_path()).expect("checkpoint");
    assert_eq!(checkpoint.schema_version, "timeout_checkpoint.v1");
    assert_eq!(checkpoint.stage, Stage::Wave1);
    assert!(checkpoint.elapsed_seconds >= 99, "elapsed: {}", checkpoint.elapsed_seconds);

    // The driver was never invoked: no prompts were written out.
    assert!(!run.layout.operator_prompts_dir(Stage::Wave1).exists());
}
