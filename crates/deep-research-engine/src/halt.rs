// crates/deep-research-engine/src/halt.rs
// ============================================================================
// Module: Halt and Triage
// Description: Dry-run blocker enumeration and halt artifact emission.
// Purpose: Turn every blocked tick into a triagable document with concrete
//          resume commands.
// Dependencies: deep-research-core, deep-research-store, serde_json
// ============================================================================

//! ## Overview
//! On tick failure the engine dry-runs the next transition against in-memory
//! copies of the manifest and gates (the real documents are never mutated),
//! enumerates the blockers, and writes the halt artifact twice: once under
//! the tick-indexed name and once as `latest.json`. Task-driver halts
//! override `next_commands` with one `agent-result` invocation per missing
//! perspective.

// ============================================================================
// SECTION: Imports
// ============================================================================

use deep_research_core::AdvanceContext;
use deep_research_core::AdvanceError;
use deep_research_core::BlockedTransition;
use deep_research_core::CodedError;
use deep_research_core::ErrorCode;
use deep_research_core::EventType;
use deep_research_core::GatesDoc;
use deep_research_core::HALT_SCHEMA_VERSION;
use deep_research_core::HaltArtifact;
use deep_research_core::HaltBlockers;
use deep_research_core::HaltError;
use deep_research_core::Manifest;
use deep_research_core::RelatedPaths;
use deep_research_core::RunLayout;
use deep_research_core::Stage;
use deep_research_core::Timestamp;
use deep_research_core::advance;
use deep_research_store::write_json_atomic;
use serde_json::Value;

use crate::error::EngineError;
use crate::observe::append_event;
use crate::stages::EngineChecks;

// ============================================================================
// SECTION: Triage
// ============================================================================

/// Dry-runs the next transition and enumerates blockers.
///
/// The evaluation operates on the in-memory manifest and gates copies; the
/// real documents are untouched.
#[must_use]
pub fn triage_blockers(
    layout: &RunLayout,
    manifest: &Manifest,
    gates: &GatesDoc,
) -> (BlockedTransition, HaltBlockers) {
    let checks = EngineChecks {
        layout,
        manifest,
        gates,
    };
    let ctx = AdvanceContext {
        manifest,
        gates,
        custom: &checks,
    };
    // Review is the only multi-edge stage; dry-run its canonical edge.
    let requested = if manifest.stage.current == Stage::Review {
        Some(Stage::Finalize)
    } else {
        None
    };
    match advance(&ctx, requested) {
        Ok(decision) => (
            BlockedTransition {
                from: decision.from,
                to: decision.to,
            },
            HaltBlockers::default(),
        ),
        Err(AdvanceError::Blocked { decision }) => (
            BlockedTransition {
                from: decision.from,
                to: decision.to,
            },
            decision.blockers(),
        ),
        Err(_) => (
            BlockedTransition {
                from: manifest.stage.current,
                to: manifest.stage.current,
            },
            HaltBlockers::default(),
        ),
    }
}

// ============================================================================
// SECTION: Halt Artifact
// ============================================================================

/// Builds and writes the halt artifact for a failed tick.
///
/// # Errors
///
/// Returns [`EngineError`] when the artifact cannot be written.
pub fn write_halt(
    layout: &RunLayout,
    manifest: &Manifest,
    gates: &GatesDoc,
    tick_index: u64,
    error: &CodedError,
) -> Result<HaltArtifact, EngineError> {
    let (blocked_transition, blockers) = triage_blockers(layout, manifest, gates);

    let next_commands = next_commands_for(layout, error);

    let artifact = HaltArtifact {
        schema_version: HALT_SCHEMA_VERSION.to_string(),
        run_id: manifest.run_id.clone(),
        run_root: layout.root().display().to_string(),
        tick_index,
        stage_current: manifest.stage.current,
        blocked_transition,
        error: HaltError {
            code: error.code,
            message: error.message.clone(),
        },
        blockers,
        related_paths: related_paths(layout),
        next_commands,
    };

    write_json_atomic(&layout.halt_tick_path(tick_index), &artifact)?;
    write_json_atomic(&layout.halt_latest_path(), &artifact)?;

    let now = Timestamp::now();
    if let Err(err) = append_event(
        layout,
        EventType::HaltWritten,
        manifest.stage.current,
        1,
        tick_index,
        Some(serde_json::json!({ "code": error.code })),
        now,
    ) {
        tracing::warn!(error = %err, "halt telemetry append failed");
    }

    Ok(artifact)
}

/// Collects the triage-relevant paths that exist on disk.
fn related_paths(layout: &RunLayout) -> RelatedPaths {
    /// Returns the display path when the file exists.
    fn existing(path: std::path::PathBuf) -> Option<String> {
        path.exists().then(|| path.display().to_string())
    }

    RelatedPaths {
        manifest_path: layout.manifest_path().display().to_string(),
        gates_path: layout.gates_path().display().to_string(),
        retry_directives_path: existing(layout.retry_directives_path()),
        blocked_urls_path: existing(layout.blocked_urls_path()),
        online_fixtures_latest_path: existing(layout.online_fixtures_latest_path()),
    }
}

/// Builds the operator resume commands for the halt.
///
/// `RUN_AGENT_REQUIRED` details override the default with one `agent-result`
/// invocation per missing perspective plus a final resume tick.
fn next_commands_for(layout: &RunLayout, error: &CodedError) -> Vec<String> {
    let manifest_path = layout.manifest_path().display().to_string();
    if error.code == ErrorCode::RunAgentRequired
        && let Some(details) = &error.details
        && let Some(missing) = details.get("missing_perspectives").and_then(Value::as_array)
    {
        let stage = details.get("stage").and_then(Value::as_str).unwrap_or("wave1");
        let mut commands: Vec<String> = missing
            .iter()
            .filter_map(|item| {
                let perspective_id = item.get("perspective_id").and_then(Value::as_str)?;
                let output_path = item.get("output_path").and_then(Value::as_str)?;
                Some(format!(
                    "deep-research agent-result --manifest {manifest_path} --stage {stage} \
                     --perspective {perspective_id} --input {output_path} --agent-run-id <id>"
                ))
            })
            .collect();
        commands.push(format!("deep-research tick --manifest {manifest_path} --driver task"));
        return commands;
    }
    match error.code {
        ErrorCode::HumanReviewRequired => vec![
            format!(
                "deep-research perspectives-draft --manifest {manifest_path} --approve-draft"
            ),
            format!("deep-research tick --manifest {manifest_path}"),
        ],
        ErrorCode::PreviousTickIncomplete => vec![
            format!("deep-research inspect --manifest {manifest_path}"),
            format!("deep-research resume --manifest {manifest_path}"),
        ],
        _ => vec![
            format!("deep-research triage --manifest {manifest_path}"),
            format!("deep-research tick --manifest {manifest_path}"),
        ],
    }
}
