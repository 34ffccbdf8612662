// crates/deep-research-engine/tests/task_driver.rs
// ============================================================================
// Module: Task Driver Tests
// Description: Verifies prompt-out behavior and the RUN_AGENT_REQUIRED halt.
// ============================================================================
//! ## Overview
//! With a wave-1 plan and no outputs on disk, a task-driver tick writes the
//! prompts out and halts with `RUN_AGENT_REQUIRED`, enumerating every
//! missing perspective and suggesting one `agent-result` invocation per
//! perspective plus a final resume tick.

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
use deep_research_core::HaltArtifact;
use deep_research_core::RunPolicy;
use deep_research_core::Stage;
use deep_research_engine::TaskDriver;
use deep_research_engine::ToolSet;
use deep_research_engine::tick;
use deep_research_store::read_json;
use deep_research_store::read_manifest;

#[test]
fn task_tick_halts_with_missing_wave1_outputs() {
    let dir = tempfile::tempdir().expect("tempdir");
    let run = common::seeded_run(dir.path(), 2);

    let err = tick(
        &run.manifest_path,
        &run.gates_path,
        "task tick",
        &RunPolicy::default(),
        &TaskDriver,
        &ToolSet::new(),
    )
    .expect_err("must require agents");

    assert_eq!(err.code, ErrorCode::RunAgentRequired);
    let details = err.details.expect("details");
    let missing = details["missing_perspectives"].as_array().expect("missing");
    assert_eq!(missing.len(), 2);
    for item in missing {
        assert!(item["perspective_id"].is_string());
        assert!(item["prompt_path"].is_string());
        assert!(item["output_path"].is_string());
        assert!(item["meta_path"].is_string());
        let digest = item["prompt_digest"].as_str().expect("digest");
        assert!(digest.starts_with("sha256:"));

        // The prompt file was written out for the operator.
        let prompt_path = item["prompt_path"].as_str().expect("prompt path");
        assert!(std::path::Path::new(prompt_path).exists());
    }

    // The run did not advance.
    let snapshot = read_manifest(&run.manifest_path).expect("read");
    assert_eq!(snapshot.manifest.stage.current, Stage::Wave1);
}

#[test]
fn task_halt_artifact_enumerates_agent_result_commands() {
    let dir = tempfile::tempdir().expect("tempdir");
    let run = common::seeded_run(dir.path(), 2);

    let _ = tick(
        &run.manifest_path,
        &run.gates_path,
        "task tick",
        &RunPolicy::default(),
        &TaskDriver,
        &ToolSet::new(),
    )
    .expect_err("must require agents");

    let halt: HaltArtifact = read_json(&run.layout.halt_latest_path()).expect("latest halt");
    assert_eq!(halt.schema_version, "halt.v1");
    assert_eq!(halt.error.code, ErrorCode::RunAgentRequired);
    assert_eq!(halt.tick_index, 1);
    assert_eq!(halt.stage_current, Stage::Wave1);

    // One agent-result per missing perspective plus a final resume tick.
    assert_eq!(halt.next_commands.len(), 3);
    let agent_results =
        halt.next_commands.iter().filter(|cmd| cmd.contains("agent-result")).count();
    assert_eq!(agent_results, 2);
    let last = halt.next_commands.last().expect("last command");
    assert!(last.contains(" tick "), "final command resumes the tick: {last}");

    // The tick-indexed artifact matches the latest pointer.
    let indexed: HaltArtifact =
        read_json(&run.layout.halt_tick_path(halt.tick_index)).expect("indexed halt");
    assert_eq!(indexed, halt);
}

#[test]
fn tick_marker_is_removed_after_a_halted_tick() {
    let dir = tempfile::tempdir().expect("tempdir");
    let run = common::seeded_run(dir.path(), 2);

    let _ = tick(
        &run.manifest_path,
        &run.gates_path,
        "task tick",
        &RunPolicy::default(),
        &TaskDriver,
        &ToolSet::new(),
    )
    .expect_err("must require agents");

    assert!(
        !run.layout.tick_marker_path().exists(),
        "a completed tick removes its in-progress marker"
    );
}
