// crates/deep-research-engine/tests/tick_fixture.rs
// ============================================================================
// Module: Fixture Tick Tests
// Description: Verifies fixture-driven ticks, observability pairing, and the
//              full replayed pipeline.
// ============================================================================
//! ## Overview
//! Drives ticks with the deterministic fixture driver: wave-1 acquisition
//! advances to pivot, ledger indices stay consecutive, every
//! `stage_started` pairs with a `stage_finished`, and a full replay reaches
//! `done`.

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

use std::collections::BTreeMap;

use deep_research_core::EventType;
use deep_research_core::RunPolicy;
use deep_research_core::RunStatus;
use deep_research_core::Stage;
use deep_research_core::TelemetryEvent;
use deep_research_core::TickLedgerRecord;
use deep_research_core::TickPhase;
use deep_research_engine::FixtureDoc;
use deep_research_engine::FixtureDriver;
use deep_research_engine::run_ticks;
use deep_research_engine::tick;
use deep_research_store::read_jsonl;
use deep_research_store::read_manifest;

#[test]
fn wave1_fixture_tick_advances_to_pivot() {
    let dir = tempfile::tempdir().expect("tempdir");
    let run = common::seeded_run(dir.path(), 5);

    let mut doc = FixtureDoc::default();
    common::fixture_for_wave(&mut doc, &run.layout, 1);
    let driver = FixtureDriver::new(doc);
    let tools = common::replay_tool_set(Vec::new());

    let report = tick(
        &run.manifest_path,
        &run.gates_path,
        "wave1 fixture",
        &RunPolicy::default(),
        &driver,
        &tools,
    )
    .expect("tick");

    assert!(report.advanced);
    assert_eq!(report.tick_index, 1);
    assert_eq!(report.stage_from, Stage::Wave1);
    assert_eq!(report.stage_to, Some(Stage::Pivot));

    let snapshot = read_manifest(&run.manifest_path).expect("read");
    assert_eq!(snapshot.manifest.stage.current, Stage::Pivot);

    // Every planned output landed with a digest-bound sidecar.
    let plan: deep_research_core::WavePlan =
        deep_research_store::read_json(&run.layout.wave_plan_path(1)).expect("plan");
    for entry in &plan.entries {
        assert!(run.layout.wave_output_path(1, &entry.perspective_id).exists());
        assert!(run.layout.wave_meta_path(1, &entry.perspective_id).exists());
    }
}

#[test]
fn ledger_records_paired_phases_with_consecutive_indices() {
    let dir = tempfile::tempdir().expect("tempdir");
    let run = common::seeded_run(dir.path(), 5);

    let mut doc = FixtureDoc::default();
    common::fixture_for_wave(&mut doc, &run.layout, 1);
    let driver = FixtureDriver::new(doc);
    let tools = common::replay_tool_set(Vec::new());
    let policy = RunPolicy::default();

    let _ = tick(&run.manifest_path, &run.gates_path, "t1", &policy, &driver, &tools)
        .expect("tick 1");
    let _ = tick(&run.manifest_path, &run.gates_path, "t2", &policy, &driver, &tools)
        .expect("tick 2");

    let records: Vec<TickLedgerRecord> = read_jsonl(&run.layout.ticks_path()).expect("ledger");
    let start_indices: Vec<u64> = records
        .iter()
        .filter(|record| record.phase == TickPhase::Start)
        .map(|record| record.tick_index)
        .collect();
    assert_eq!(start_indices, vec![1, 2], "tick indices are consecutive from 1");
    for index in &start_indices {
        let finishes = records
            .iter()
            .filter(|record| {
                record.phase == TickPhase::Finish && record.tick_index == *index
            })
            .count();
        assert_eq!(finishes, 1, "every start pairs with one finish");
    }

    // Start records carry the inputs digest; finish records carry outcomes.
    for record in &records {
        match record.phase {
            TickPhase::Start => assert!(record.inputs_digest.is_some()),
            TickPhase::Finish => assert!(record.outcome.is_some()),
        }
    }
}

#[test]
fn every_stage_started_pairs_with_stage_finished() {
    let dir = tempfile::tempdir().expect("tempdir");
    let run = common::seeded_run(dir.path(), 5);

    let mut doc = FixtureDoc::default();
    common::fixture_for_wave(&mut doc, &run.layout, 1);
    let driver = FixtureDriver::new(doc);
    let tools = common::replay_tool_set(Vec::new());
    let policy = RunPolicy::default();

    let _ = tick(&run.manifest_path, &run.gates_path, "t1", &policy, &driver, &tools)
        .expect("tick 1");
    let _ = tick(&run.manifest_path, &run.gates_path, "t2", &policy, &driver, &tools)
        .expect("tick 2");

    let events: Vec<TelemetryEvent> =
        read_jsonl(&run.layout.telemetry_path()).expect("telemetry");
    let mut started: BTreeMap<(String, u32), usize> = BTreeMap::new();
    let mut finished: BTreeMap<(String, u32), usize> = BTreeMap::new();
    for event in &events {
        let key = (event.stage_id.as_str().to_string(), event.stage_attempt);
        match event.event_type {
            EventType::StageStarted => *started.entry(key).or_insert(0) += 1,
            EventType::StageFinished => *finished.entry(key).or_insert(0) += 1,
            _ => {}
        }
    }
    assert_eq!(started, finished, "started and finished events must pair per attempt");

    // Sequence numbers are strictly increasing.
    let seqs: Vec<u64> = events.iter().map(|event| event.seq).collect();
    let mut sorted = seqs.clone();
    sorted.sort_unstable();
    sorted.dedup();
    assert_eq!(seqs.len(), sorted.len(), "telemetry seq must be unique");
}

#[test]
fn full_fixture_replay_reaches_done() {
    let dir = tempfile::tempdir().expect("tempdir");
    let run = common::seeded_run(dir.path(), 5);
    let policy = RunPolicy::default();

    // Wave 1 agents are known from the seeded plan.
    let mut doc = FixtureDoc::default();
    common::fixture_for_wave(&mut doc, &run.layout, 1);
    let driver = FixtureDriver::new(doc.clone());
    let tools = common::replay_tool_set(Vec::new());
    let _ = tick(&run.manifest_path, &run.gates_path, "wave1", &policy, &driver, &tools)
        .expect("wave1 tick");
    let _ = tick(&run.manifest_path, &run.gates_path, "pivot", &policy, &driver, &tools)
        .expect("pivot tick");

    // Wave 2 agents become known once the pivot planned them.
    common::fixture_for_wave(&mut doc, &run.layout, 2);
    let driver = FixtureDriver::new(doc);

    // The citation validator replays one envelope covering every cited URL.
    let plan1: deep_research_core::WavePlan =
        deep_research_store::read_json(&run.layout.wave_plan_path(1)).expect("plan 1");
    let plan2: deep_research_core::WavePlan =
        deep_research_store::read_json(&run.layout.wave_plan_path(2)).expect("plan 2");
    let mut urls = Vec::new();
    for (index, _) in plan1.entries.iter().enumerate() {
        urls.push(format!("https://example.com/w1-{index}"));
    }
    for (index, _) in plan2.entries.iter().enumerate() {
        urls.push(format!("https://example.com/w2-{index}"));
    }
    let tools = common::replay_tool_set(vec![common::valid_citations_envelope(&urls)]);

    let report = run_ticks(
        &run.manifest_path,
        &run.gates_path,
        "fixture replay",
        &policy,
        &driver,
        &tools,
        16,
    )
    .expect("run to done");
    assert!(report.completed);

    let snapshot = read_manifest(&run.manifest_path).expect("read");
    assert_eq!(snapshot.manifest.stage.current, Stage::Done);
    assert_eq!(snapshot.manifest.status, RunStatus::Completed);
    assert!(run.layout.synthesis_path().exists());
    assert!(run.layout.review_bundle_path().exists());
    assert!(run.layout.url_map_path().exists());
    assert!(run.layout.online_fixtures_latest_path().exists());
}
