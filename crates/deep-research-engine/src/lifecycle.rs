// crates/deep-research-engine/src/lifecycle.rs
// ============================================================================
// Module: Run Lifecycle Operations
// Description: Init, pause/resume/cancel, status, triage, draft promotion,
//              fixtures.
// Purpose: Implement the operator surface operations over the durable store.
// Dependencies: deep-research-config, deep-research-core, deep-research-store
// ============================================================================

//! ## Overview
//! Lifecycle operations are the operator surface around the tick engine:
//! run creation, the pause/resume/cancel switches with their checkpoint
//! notes, read-only status and triage, perspective draft promotion, bounded
//! multi-tick runs, and fixture capture/replay.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs;
use std::path::Path;
use std::path::PathBuf;

use deep_research_config::RunConfigDoc;
use deep_research_core::AdvanceContext;
use deep_research_core::CandidateDoc;
use deep_research_core::CodedError;
use deep_research_core::Driver;
use deep_research_core::ErrorCode;
use deep_research_core::GateId;
use deep_research_core::GatesDoc;
use deep_research_core::HaltArtifact;
use deep_research_core::Manifest;
use deep_research_core::PERSPECTIVES_SCHEMA_VERSION;
use deep_research_core::Perspective;
use deep_research_core::PerspectiveId;
use deep_research_core::PerspectivesDoc;
use deep_research_core::PromptContract;
use deep_research_core::QuerySpec;
use deep_research_core::RunId;
use deep_research_core::RunLayout;
use deep_research_core::RunLimits;
use deep_research_core::RunPolicy;
use deep_research_core::RunStatus;
use deep_research_core::Stage;
use deep_research_core::TelemetryEvent;
use deep_research_core::TickLedgerRecord;
use deep_research_core::Timestamp;
use deep_research_core::ToolPolicy;
use deep_research_core::Track;
use deep_research_core::advance;
use deep_research_core::transition_patch;
use deep_research_store::create_manifest;
use deep_research_store::read_json_optional;
use deep_research_store::read_jsonl;
use deep_research_store::read_manifest;
use deep_research_store::write_bytes_atomic;
use deep_research_store::write_json_atomic;
use deep_research_store::write_manifest;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use serde_json::json;

use crate::docs::OnlineFixturesDoc;
use crate::drivers::FIXTURES_SCHEMA_VERSION;
use crate::drivers::FixtureAgentReply;
use crate::drivers::FixtureDoc;
use crate::drivers::ToolSet;
use crate::error::EngineError;
use crate::halt::triage_blockers;
use crate::perspectives::MergeStatus;
use crate::perspectives::PERSPECTIVES_STATE_SCHEMA_VERSION;
use crate::perspectives::PerspectivesState;
use crate::perspectives::PerspectivesStateStatus;
use crate::perspectives::build_wave_plan;
use crate::perspectives::merge_candidates;
use crate::stages::EngineChecks;
use crate::tick::TickReport;
use crate::tick::tick;

// ============================================================================
// SECTION: Init
// ============================================================================

/// Arguments for run creation.
#[derive(Debug, Clone)]
pub struct InitArgs {
    /// Absolute run root to create.
    pub run_root: PathBuf,
    /// Run identifier.
    pub run_id: RunId,
    /// Research query.
    pub query: QuerySpec,
    /// Limits override; defaults when absent.
    pub limits: Option<RunLimits>,
    /// Seed default perspectives and the wave-1 plan, advancing to wave1.
    pub write_perspectives: bool,
}

/// Outcome of run creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitOutcome {
    /// Manifest path of the new run.
    pub manifest_path: String,
    /// Manifest revision after init.
    pub revision: u64,
    /// Stage after init.
    pub stage: Stage,
}

/// Creates a new run root with its manifest, gates, and config documents.
///
/// # Errors
///
/// Returns [`EngineError`] when the root is invalid, the run already
/// exists, or writes fail.
pub fn init_run(args: &InitArgs) -> Result<InitOutcome, EngineError> {
    if !args.run_root.is_absolute() {
        return Err(EngineError::Coded(CodedError::new(
            ErrorCode::InvalidArgs,
            format!("run root must be absolute: {}", args.run_root.display()),
        )));
    }
    let layout = RunLayout::from_root(args.run_root.clone());
    let manifest_path = layout.manifest_path();
    if manifest_path.exists() {
        return Err(EngineError::Coded(CodedError::new(
            ErrorCode::InvalidState,
            format!("run already exists at {}", args.run_root.display()),
        )));
    }
    fs::create_dir_all(&args.run_root).map_err(|err| {
        EngineError::Coded(CodedError::new(
            ErrorCode::InvalidState,
            format!("run root creation failed: {err}"),
        ))
    })?;

    let now = Timestamp::now();
    let mut manifest =
        Manifest::new(args.run_id.clone(), args.query.clone(), args.run_root.clone(), now);
    if let Some(limits) = args.limits {
        manifest.limits = limits;
    }
    create_manifest(&manifest_path, &manifest)?;

    write_json_atomic(&layout.gates_path(), &GatesDoc::default())?;
    write_json_atomic(
        &layout.run_config_path(),
        &RunConfigDoc::new(args.run_id.clone(), args.query.clone(), manifest.limits, now),
    )?;
    if !layout.policy_path().exists() {
        write_json_atomic(&layout.policy_path(), &RunPolicy::default())?;
    }

    // Second write: attach the explicit artifact layout.
    let layout_patch = json!({
        "artifacts": { "paths": manifest.artifacts.paths },
    });
    let mut revision = write_manifest(&manifest_path, 1, &layout_patch, "attach run layout")?;

    if args.write_perspectives {
        let doc = default_perspectives(&args.run_id, &args.query);
        write_json_atomic(&layout.perspectives_path(), &doc)?;
        let plan = build_wave_plan(1, &args.query, &doc, manifest.limits.max_wave1_agents)?;
        write_json_atomic(&layout.wave_plan_path(1), &plan)?;

        let mut gates = GatesDoc::default();
        gates.record_pass(
            GateId::A,
            now,
            Some(json!({ "merged": doc.perspectives.len(), "seeded": true })),
        );
        write_json_atomic(&layout.gates_path(), &gates)?;
        write_json_atomic(&layout.perspectives_state_path(), &PerspectivesState {
            schema_version: PERSPECTIVES_STATE_SCHEMA_VERSION.to_string(),
            status: PerspectivesStateStatus::Promoted,
            ingested: vec!["seeded".to_string()],
            merged_digest: Some(doc.digest()?),
            updated_at: now,
        })?;

        let snapshot = read_manifest(&manifest_path)?;
        let checks = EngineChecks {
            layout: &layout,
            manifest: &snapshot.manifest,
            gates: &gates,
        };
        let ctx = AdvanceContext {
            manifest: &snapshot.manifest,
            gates: &gates,
            custom: &checks,
        };
        let decision = advance(&ctx, Some(Stage::Wave1))?;
        let patch = transition_patch(&snapshot.manifest, &decision, Timestamp::now());
        revision = write_manifest(&manifest_path, revision, &patch, "init --write-perspectives")?;
    }

    let snapshot = read_manifest(&manifest_path)?;
    Ok(InitOutcome {
        manifest_path: manifest_path.display().to_string(),
        revision,
        stage: snapshot.manifest.stage.current,
    })
}

/// Seeds the default three-track perspectives document from the query.
#[must_use]
pub fn default_perspectives(run_id: &RunId, query: &QuerySpec) -> PerspectivesDoc {
    /// Builds one seeded perspective.
    fn seeded(id: &str, title: &str, track: Track, query: &QuerySpec) -> Option<Perspective> {
        Some(Perspective {
            id: PerspectiveId::new(id).ok()?,
            title: title.to_string(),
            domain: "general".to_string(),
            track,
            agent_type: "researcher".to_string(),
            questions: vec![
                format!("What is the current state of: {}?", query.text),
                "Which sources disagree, and why?".to_string(),
            ],
            prompt_contract: PromptContract {
                max_words: 1500,
                max_sources: 15,
                tool_budget: 25,
                must_include_sections: vec!["Findings".to_string(), "Sources".to_string()],
            },
            platform_requirements: Vec::new(),
            tool_policy: ToolPolicy {
                primary: vec!["web_search".to_string()],
                secondary: vec!["web_fetch".to_string()],
                forbidden: Vec::new(),
            },
        })
    }

    let perspectives = [
        seeded("standard-coverage", "Standard coverage", Track::Standard, query),
        seeded("independent-sources", "Independent sources", Track::Independent, query),
        seeded("contrarian-review", "Contrarian review", Track::Contrarian, query),
    ]
    .into_iter()
    .flatten()
    .collect();
    PerspectivesDoc {
        schema_version: PERSPECTIVES_SCHEMA_VERSION.to_string(),
        run_id: run_id.clone(),
        perspectives,
    }
}

// ============================================================================
// SECTION: Pause / Resume / Cancel
// ============================================================================

/// Pauses a running run, writing the pause checkpoint note.
///
/// # Errors
///
/// Returns [`EngineError`] when the run is not running or writes fail.
pub fn pause(manifest_path: &Path, reason: &str) -> Result<u64, EngineError> {
    switch_status(manifest_path, RunStatus::Running, RunStatus::Paused, reason, |layout| {
        layout.pause_checkpoint_path()
    })
}

/// Resumes a paused run, clearing any tick-in-progress marker.
///
/// # Errors
///
/// Returns [`EngineError`] when the run is not paused or writes fail.
pub fn resume(manifest_path: &Path, reason: &str) -> Result<u64, EngineError> {
    let snapshot = read_manifest(manifest_path)?;
    let layout = RunLayout::from_manifest(&snapshot.manifest);
    let _ = fs::remove_file(layout.tick_marker_path());
    switch_status(manifest_path, RunStatus::Paused, RunStatus::Running, reason, |layout| {
        layout.resume_checkpoint_path()
    })
}

/// Cancels a non-terminal run, writing the cancel checkpoint note.
///
/// # Errors
///
/// Returns [`EngineError`] when the run is already terminal or writes fail.
pub fn cancel(manifest_path: &Path, reason: &str) -> Result<u64, EngineError> {
    let snapshot = read_manifest(manifest_path)?;
    if snapshot.manifest.status.is_terminal() {
        return Err(EngineError::Coded(CodedError::new(
            ErrorCode::InvalidState,
            format!("run status is terminal: {}", snapshot.manifest.status.as_str()),
        )));
    }
    switch_status(manifest_path, snapshot.manifest.status, RunStatus::Cancelled, reason, |layout| {
        layout.cancel_checkpoint_path()
    })
}

/// Applies a status flip with its checkpoint note.
fn switch_status(
    manifest_path: &Path,
    expected: RunStatus,
    next: RunStatus,
    reason: &str,
    checkpoint: impl Fn(&RunLayout) -> PathBuf,
) -> Result<u64, EngineError> {
    let snapshot = read_manifest(manifest_path)?;
    if snapshot.manifest.status != expected {
        return Err(EngineError::Coded(CodedError::new(
            ErrorCode::InvalidState,
            format!(
                "run status is {} (expected {})",
                snapshot.manifest.status.as_str(),
                expected.as_str()
            ),
        )));
    }
    let layout = RunLayout::from_manifest(&snapshot.manifest);
    let note = format!(
        "# {} checkpoint\n\n- at: {}\n- reason: {}\n",
        next.as_str(),
        Timestamp::now(),
        reason
    );
    write_bytes_atomic(&checkpoint(&layout), note.as_bytes())?;
    let patch = json!({ "status": next });
    Ok(write_manifest(manifest_path, snapshot.revision, &patch, reason)?)
}

// ============================================================================
// SECTION: Status / Inspect / Triage
// ============================================================================

/// Read-only run status summary.
///
/// # Errors
///
/// Returns [`EngineError`] when the run documents are unreadable.
pub fn status(manifest_path: &Path) -> Result<Value, EngineError> {
    let snapshot = read_manifest(manifest_path)?;
    let manifest = &snapshot.manifest;
    let layout = RunLayout::from_manifest(manifest);
    let gates: GatesDoc = read_json_optional(&layout.gates_path())?.unwrap_or_default();
    let ticks: Vec<TickLedgerRecord> = read_jsonl(&layout.ticks_path())?;
    let tick_count = ticks.iter().map(|record| record.tick_index).max().unwrap_or(0);
    let latest_halt: Option<HaltArtifact> = read_json_optional(&layout.halt_latest_path())?;

    Ok(json!({
        "run_id": manifest.run_id,
        "status": manifest.status,
        "stage": manifest.stage.current,
        "revision": manifest.revision,
        "tick_count": tick_count,
        "gates": gates.gates,
        "latest_halt": latest_halt.map(|halt| json!({
            "tick_index": halt.tick_index,
            "code": halt.error.code,
            "blockers": halt.blockers,
        })),
    }))
}

/// Read-only deep inspection of a run root.
///
/// # Errors
///
/// Returns [`EngineError`] when the run documents are unreadable.
pub fn inspect(manifest_path: &Path) -> Result<Value, EngineError> {
    let snapshot = read_manifest(manifest_path)?;
    let manifest = &snapshot.manifest;
    let layout = RunLayout::from_manifest(manifest);
    let gates: GatesDoc = read_json_optional(&layout.gates_path())?.unwrap_or_default();
    let events: Vec<TelemetryEvent> = read_jsonl(&layout.telemetry_path())?;
    let ticks: Vec<TickLedgerRecord> = read_jsonl(&layout.ticks_path())?;
    let state: Option<PerspectivesState> =
        read_json_optional(&layout.perspectives_state_path())?;

    Ok(json!({
        "manifest": manifest,
        "gates": gates,
        "telemetry_events": events.len(),
        "ledger_records": ticks.len(),
        "perspectives_state": state,
        "history": manifest.stage.history,
    }))
}

/// Triage report for the current blockers.
///
/// # Errors
///
/// Returns [`EngineError`] when the run documents are unreadable.
pub fn triage(manifest_path: &Path) -> Result<Value, EngineError> {
    let snapshot = read_manifest(manifest_path)?;
    let manifest = &snapshot.manifest;
    let layout = RunLayout::from_manifest(manifest);
    let gates: GatesDoc = read_json_optional(&layout.gates_path())?.unwrap_or_default();
    let (blocked_transition, blockers) = triage_blockers(&layout, manifest, &gates);
    let latest_halt: Option<HaltArtifact> = read_json_optional(&layout.halt_latest_path())?;

    Ok(json!({
        "blocked_transition": blocked_transition,
        "blockers": blockers,
        "blockers_summary": blockers.summary(),
        "latest_halt_path": latest_halt
            .is_some()
            .then(|| layout.halt_latest_path().display().to_string()),
        "next_commands": latest_halt.map(|halt| halt.next_commands).unwrap_or_default(),
    }))
}

// ============================================================================
// SECTION: Stage Advance Operation
// ============================================================================

/// Explicit operator stage advance.
///
/// # Errors
///
/// Returns [`EngineError::Advance`] carrying the evaluated decision when the
/// transition is blocked.
pub fn stage_advance(
    manifest_path: &Path,
    requested_next: Option<Stage>,
    reason: &str,
) -> Result<Value, EngineError> {
    let snapshot = read_manifest(manifest_path)?;
    let manifest = &snapshot.manifest;
    let layout = RunLayout::from_manifest(manifest);
    let gates: GatesDoc = read_json_optional(&layout.gates_path())?.unwrap_or_default();
    let checks = EngineChecks {
        layout: &layout,
        manifest,
        gates: &gates,
    };
    let ctx = AdvanceContext {
        manifest,
        gates: &gates,
        custom: &checks,
    };
    let decision = advance(&ctx, requested_next)?;
    let patch = transition_patch(manifest, &decision, Timestamp::now());
    let revision = write_manifest(manifest_path, snapshot.revision, &patch, reason)?;
    Ok(json!({
        "from": decision.from,
        "to": decision.to,
        "revision": revision,
        "evaluated": decision.evaluated,
    }))
}

// ============================================================================
// SECTION: Perspectives Draft Operation
// ============================================================================

/// Merges collected candidates and promotes, or approves a held draft.
///
/// # Errors
///
/// Returns a `HUMAN_REVIEW_REQUIRED` error when the merge must be held for
/// review, and other [`EngineError`] variants for I/O failures.
pub fn perspectives_draft(manifest_path: &Path, approve_draft: bool) -> Result<Value, EngineError> {
    let snapshot = read_manifest(manifest_path)?;
    let manifest = &snapshot.manifest;
    let layout = RunLayout::from_manifest(manifest);
    let now = Timestamp::now();

    let doc = if approve_draft {
        let draft: Option<PerspectivesDoc> =
            read_json_optional(&layout.perspectives_draft_path())?;
        draft.ok_or_else(|| {
            EngineError::Coded(CodedError::new(
                ErrorCode::InvalidState,
                "no perspectives draft is awaiting approval",
            ))
        })?
    } else {
        let docs = collect_candidate_docs(&layout)?;
        if docs.is_empty() {
            return Err(EngineError::Coded(CodedError::new(
                ErrorCode::InvalidState,
                "no perspective candidate documents have been ingested",
            )));
        }
        let outcome = merge_candidates(&manifest.run_id, &docs)?;
        if outcome.status == MergeStatus::AwaitingHumanReview {
            write_json_atomic(&layout.perspectives_draft_path(), &outcome.doc)?;
            write_state(&layout, PerspectivesStateStatus::AwaitingHumanReview, None, now)?;
            return Err(EngineError::Coded(CodedError::new(
                ErrorCode::HumanReviewRequired,
                "perspective merge is awaiting human review",
            )));
        }
        outcome.doc
    };

    write_json_atomic(&layout.perspectives_path(), &doc)?;
    let plan = build_wave_plan(1, &manifest.query, &doc, manifest.limits.max_wave1_agents)?;
    write_json_atomic(&layout.wave_plan_path(1), &plan)?;
    write_state(&layout, PerspectivesStateStatus::Promoted, Some(doc.digest()?), now)?;

    let mut gates: GatesDoc = read_json_optional(&layout.gates_path())?.unwrap_or_default();
    gates.record_pass(GateId::A, now, Some(json!({ "merged": doc.perspectives.len() })));
    write_json_atomic(&layout.gates_path(), &gates)?;

    let checks = EngineChecks {
        layout: &layout,
        manifest,
        gates: &gates,
    };
    let ctx = AdvanceContext {
        manifest,
        gates: &gates,
        custom: &checks,
    };
    let decision = advance(&ctx, Some(Stage::Wave1))?;
    let patch = transition_patch(manifest, &decision, Timestamp::now());
    let revision = write_manifest(manifest_path, snapshot.revision, &patch, "perspectives-draft")?;

    Ok(json!({
        "status": "promoted",
        "perspectives": doc.perspectives.len(),
        "stage": decision.to,
        "revision": revision,
    }))
}

/// Scans the operator outputs directory for normalized candidate documents.
fn collect_candidate_docs(layout: &RunLayout) -> Result<Vec<CandidateDoc>, EngineError> {
    let dir = layout.operator_perspectives_dir();
    let mut docs = Vec::new();
    let Ok(entries) = fs::read_dir(&dir) else {
        return Ok(docs);
    };
    let mut paths: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| {
            let name = path.file_name().and_then(|name| name.to_str()).unwrap_or_default();
            name.ends_with(".json") && !name.ends_with(".meta.json") && !name.ends_with(".raw.json")
        })
        .collect();
    paths.sort();
    for path in paths {
        if let Some(doc) = read_json_optional::<CandidateDoc>(&path)? {
            docs.push(doc);
        }
    }
    Ok(docs)
}

/// Writes the perspectives collection state.
fn write_state(
    layout: &RunLayout,
    status_value: PerspectivesStateStatus,
    merged_digest: Option<String>,
    now: Timestamp,
) -> Result<(), EngineError> {
    let existing: Option<PerspectivesState> =
        read_json_optional(&layout.perspectives_state_path())?;
    let ingested = existing.map(|state| state.ingested).unwrap_or_default();
    write_json_atomic(&layout.perspectives_state_path(), &PerspectivesState {
        schema_version: PERSPECTIVES_STATE_SCHEMA_VERSION.to_string(),
        status: status_value,
        ingested,
        merged_digest,
        updated_at: now,
    })?;
    Ok(())
}

// ============================================================================
// SECTION: Bounded Multi-Tick Run
// ============================================================================

/// Report for one bounded multi-tick run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunLoopReport {
    /// Reports for every executed tick.
    pub ticks: Vec<TickReport>,
    /// True when the run reached `done`.
    pub completed: bool,
}

/// Executes up to `max_ticks` ticks, stopping at `done`.
///
/// # Errors
///
/// Returns the first tick error, or `TICK_CAP_EXCEEDED` when the cap is hit
/// before the run completes.
pub fn run_ticks(
    manifest_path: &Path,
    gates_path: &Path,
    reason: &str,
    policy: &RunPolicy,
    driver: &dyn Driver,
    tools: &ToolSet,
    max_ticks: u64,
) -> Result<RunLoopReport, CodedError> {
    let mut reports = Vec::new();
    for _ in 0 .. max_ticks {
        let report = tick(manifest_path, gates_path, reason, policy, driver, tools)?;
        let reached_done = report.stage_to == Some(Stage::Done);
        reports.push(report);
        if reached_done {
            return Ok(RunLoopReport {
                ticks: reports,
                completed: true,
            });
        }
    }
    Err(CodedError::with_details(
        ErrorCode::TickCapExceeded,
        format!("run did not complete within {max_ticks} tick(s)"),
        json!({ "ticks_executed": reports.len() }),
    ))
}

// ============================================================================
// SECTION: Fixture Capture and Rerun
// ============================================================================

/// Summarizes the latest online fixtures capture.
///
/// # Errors
///
/// Returns [`EngineError`] when the run documents are unreadable or no
/// capture exists.
pub fn capture_fixtures(manifest_path: &Path) -> Result<Value, EngineError> {
    let snapshot = read_manifest(manifest_path)?;
    let layout = RunLayout::from_manifest(&snapshot.manifest);
    let capture: Option<OnlineFixturesDoc> =
        read_json_optional(&layout.online_fixtures_latest_path())?;
    let capture = capture.ok_or_else(|| {
        EngineError::Coded(CodedError::new(
            ErrorCode::InvalidState,
            "no online fixtures capture exists for this run",
        ))
    })?;
    Ok(json!({
        "token": capture.token,
        "captured_at": capture.captured_at,
        "calls": capture.calls.len(),
        "latest_path": layout.online_fixtures_latest_path().display().to_string(),
        "token_path": layout.online_fixtures_path(&capture.token).display().to_string(),
    }))
}

/// Builds a replayable fixture document from a run's outputs and captures.
///
/// # Errors
///
/// Returns [`EngineError`] when the run documents are unreadable.
pub fn fixture_doc_for_rerun(manifest_path: &Path) -> Result<FixtureDoc, EngineError> {
    let snapshot = read_manifest(manifest_path)?;
    let layout = RunLayout::from_manifest(&snapshot.manifest);

    let mut doc = FixtureDoc {
        schema_version: FIXTURES_SCHEMA_VERSION.to_string(),
        ..FixtureDoc::default()
    };

    for wave in [1_u8, 2] {
        let plan: Option<deep_research_core::WavePlan> =
            read_json_optional(&layout.wave_plan_path(wave))?;
        let Some(plan) = plan else { continue };
        let stage = if wave == 1 { Stage::Wave1 } else { Stage::Wave2 };
        for entry in &plan.entries {
            let output_path = layout.wave_output_path(wave, &entry.perspective_id);
            let meta: Option<deep_research_core::AgentOutputMeta> =
                read_json_optional(&layout.wave_meta_path(wave, &entry.perspective_id))?;
            let (Ok(markdown), Some(meta)) = (fs::read_to_string(&output_path), meta) else {
                continue;
            };
            doc.agents.insert(
                FixtureDoc::agent_key(stage, entry.perspective_id.as_str()),
                FixtureAgentReply {
                    markdown,
                    agent_run_id: meta.agent_run_id.as_str().to_string(),
                    model: meta.model,
                },
            );
        }
    }

    let capture: Option<OnlineFixturesDoc> =
        read_json_optional(&layout.online_fixtures_latest_path())?;
    if let Some(capture) = capture {
        for call in capture.calls {
            doc.tools.entry(call.tool).or_default().push(call.envelope);
        }
    }
    Ok(doc)
}
