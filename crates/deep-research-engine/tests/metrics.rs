// crates/deep-research-engine/tests/metrics.rs
// ============================================================================
// Module: Run Metrics Tests
// Description: Verifies the skip-safe metrics writer.
// ============================================================================
//! ## Overview
//! A metrics write with an unchanged telemetry last-seq pointer is skipped
//! with `{skipped: true, reason: "telemetry unchanged"}` and touches nothing
//! on disk; an advanced pointer writes a fresh document.

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

use std::fs;

use deep_research_core::EventType;
use deep_research_core::RunMetrics;
use deep_research_core::Stage;
use deep_research_core::Timestamp;
use deep_research_engine::observe::append_event;
use deep_research_engine::run_metrics_write;
use deep_research_store::read_json;
use deep_research_store::read_manifest;

#[test]
fn second_write_without_telemetry_change_is_skipped() {
    let dir = tempfile::tempdir().expect("tempdir");
    let run = common::seeded_run(dir.path(), 5);
    let manifest = read_manifest(&run.manifest_path).expect("read").manifest;

    let first =
        run_metrics_write(&run.layout, &manifest, Timestamp::now()).expect("first write");
    assert!(!first.skipped);
    let bytes_after_first = fs::read(run.layout.run_metrics_path()).expect("metrics bytes");

    let second =
        run_metrics_write(&run.layout, &manifest, Timestamp::now()).expect("second write");
    assert!(second.skipped);
    assert_eq!(second.reason.as_deref(), Some("telemetry unchanged"));
    assert_eq!(
        fs::read(run.layout.run_metrics_path()).expect("metrics bytes"),
        bytes_after_first,
        "a skipped write must not touch disk"
    );
}

#[test]
fn advanced_telemetry_pointer_writes_again() {
    let dir = tempfile::tempdir().expect("tempdir");
    let run = common::seeded_run(dir.path(), 5);
    let manifest = read_manifest(&run.manifest_path).expect("read").manifest;

    let _ = run_metrics_write(&run.layout, &manifest, Timestamp::now()).expect("first");
    append_event(
        &run.layout,
        EventType::AgentResultIngested,
        Stage::Wave1,
        1,
        1,
        None,
        Timestamp::now(),
    )
    .expect("append telemetry");

    let third = run_metrics_write(&run.layout, &manifest, Timestamp::now()).expect("third");
    assert!(!third.skipped);
    assert_eq!(third.telemetry_last_seq, 1);

    let metrics: RunMetrics = read_json(&run.layout.run_metrics_path()).expect("metrics");
    assert_eq!(metrics.schema_version, "run_metrics.v1");
    assert_eq!(metrics.telemetry_last_seq, 1);
    assert_eq!(metrics.last_stage, Stage::Wave1);
    assert_eq!(metrics.events_by_type.get("agent_result_ingested"), Some(&1));
}
