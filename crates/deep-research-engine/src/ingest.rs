// crates/deep-research-engine/src/ingest.rs
// ============================================================================
// Module: Agent Result Ingest
// Description: Prompt-digest-bound ingestion of external agent output.
// Purpose: Bind every accepted output to the exact prompt that produced it,
//          idempotently.
// Dependencies: deep-research-config, deep-research-core, deep-research-store
// ============================================================================

//! ## Overview
//! `agent_result` resolves the prompt for `(stage, perspective)`, digests
//! it, validates the input, and writes the output plus its sidecar under the
//! run lock. Re-ingesting the same prompt digest is a no-op; a divergent
//! digest is a conflict unless forced; an output without a sidecar is healed
//! only when the bytes match. Every path is containment-checked against the
//! run root.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs;
use std::path::Path;
use std::path::PathBuf;

use deep_research_config::ProcessEnv;
use deep_research_config::resolve_policy;
use deep_research_core::AgentOutputMeta;
use deep_research_core::AgentRunId;
use deep_research_core::CodedError;
use deep_research_core::ErrorCode;
use deep_research_core::EventType;
use deep_research_core::Manifest;
use deep_research_core::PerspectiveId;
use deep_research_core::PerspectivesDoc;
use deep_research_core::RunLayout;
use deep_research_core::Stage;
use deep_research_core::Timestamp;
use deep_research_core::WavePlan;
use deep_research_core::digest_text;
use deep_research_store::acquire_lock;
use deep_research_store::contain_absolute;
use deep_research_store::read_json;
use deep_research_store::read_json_optional;
use deep_research_store::read_manifest;
use deep_research_store::release_lock;
use deep_research_store::write_bytes_atomic;
use deep_research_store::write_json_atomic;
use serde::Deserialize;
use serde::Serialize;
use serde_json::json;

use crate::error::EngineError;
use crate::observe::append_event;
use crate::observe::next_tick_index;
use crate::observe::stage_attempt;
use crate::perspectives::PerspectivesState;
use crate::perspectives::PerspectivesStateStatus;
use crate::perspectives::normalize_candidate_doc;

// ============================================================================
// SECTION: Arguments and Outcome
// ============================================================================

/// Arguments for one `agent-result` ingest.
#[derive(Debug, Clone)]
pub struct AgentResultArgs {
    /// Manifest path of the target run.
    pub manifest_path: PathBuf,
    /// Stage the output belongs to.
    pub stage: Stage,
    /// Perspective the output targets.
    pub perspective_id: PerspectiveId,
    /// Path the output is ingested from.
    pub input_path: PathBuf,
    /// Driver-assigned agent run identifier.
    pub agent_run_id: AgentRunId,
    /// Operator-supplied reason.
    pub reason: String,
    /// Overwrite a digest conflict.
    pub force: bool,
}

/// Outcome of one `agent-result` ingest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentResultOutcome {
    /// True when the ingest was an idempotent no-op.
    pub noop: bool,
    /// Output path written (or already present).
    pub output_path: String,
    /// Sidecar path written (or already present).
    pub meta_path: String,
    /// Digest binding the output to its prompt.
    pub prompt_digest: String,
}

// ============================================================================
// SECTION: Prompt Resolution
// ============================================================================

/// Resolves the prompt markdown for `(stage, perspective)`.
///
/// # Errors
///
/// Returns a stale-plan error for outdated wave plans and argument errors
/// for unknown perspectives or stages without an ingest surface.
pub fn resolve_prompt(
    layout: &RunLayout,
    stage: Stage,
    perspective_id: &PerspectiveId,
) -> Result<String, EngineError> {
    match stage {
        Stage::Wave1 | Stage::Wave2 => {
            let wave = if stage == Stage::Wave1 { 1 } else { 2 };
            let plan: WavePlan = read_json(&layout.wave_plan_path(wave))?;
            let doc: PerspectivesDoc = read_json(&layout.perspectives_path())?;
            let current_digest = doc.digest()?;
            if plan.is_stale(&current_digest) {
                let code = if wave == 1 {
                    ErrorCode::Wave1PlanStale
                } else {
                    ErrorCode::Wave2PlanStale
                };
                return Err(EngineError::Coded(CodedError::with_details(
                    code,
                    format!("wave {wave} plan digest no longer matches perspectives.json"),
                    json!({
                        "plan_digest": plan.perspectives_digest,
                        "current_digest": current_digest,
                    }),
                )));
            }
            plan.entry(perspective_id).map(|entry| entry.prompt_md.clone()).ok_or_else(|| {
                EngineError::Coded(CodedError::new(
                    ErrorCode::InvalidArgs,
                    format!("wave {wave} plan has no entry for perspective {perspective_id}"),
                ))
            })
        }
        Stage::Perspectives | Stage::Summaries | Stage::Synthesis => {
            let prompt_path = layout.operator_prompt_path(stage, perspective_id);
            fs::read_to_string(&prompt_path).map_err(|err| {
                EngineError::Coded(CodedError::new(
                    ErrorCode::InvalidArgs,
                    format!("operator prompt unreadable at {}: {err}", prompt_path.display()),
                ))
            })
        }
        _ => Err(EngineError::Coded(CodedError::new(
            ErrorCode::InvalidState,
            format!("stage {stage} has no agent-result surface"),
        ))),
    }
}

// ============================================================================
// SECTION: Ingest
// ============================================================================

/// Ingests one agent output, binding it to its prompt digest.
///
/// # Errors
///
/// Returns [`EngineError`] for stale plans, digest conflicts, containment
/// violations, and I/O failures.
pub fn agent_result(args: &AgentResultArgs) -> Result<AgentResultOutcome, EngineError> {
    let snapshot = read_manifest(&args.manifest_path)?;
    let manifest = &snapshot.manifest;
    let layout = RunLayout::from_manifest(manifest);
    let run_root = layout.root().clone();

    let prompt_md = resolve_prompt(&layout, args.stage, &args.perspective_id)?;
    if prompt_md.trim().is_empty() {
        return Err(EngineError::Coded(CodedError::new(
            ErrorCode::InvalidState,
            format!("resolved prompt for {} is empty", args.perspective_id),
        )));
    }
    let prompt_digest = digest_text(&prompt_md);

    let (output_path, meta_path, raw_path) = target_paths(&layout, args.stage, &args.perspective_id)?;
    contain_absolute(&run_root, &output_path)?;
    contain_absolute(&run_root, &meta_path)?;
    if let Some(raw) = &raw_path {
        contain_absolute(&run_root, raw)?;
    }

    let output_bytes = read_input(manifest, args)?;

    let policy = resolve_policy(&run_root, &ProcessEnv)?;
    let handle =
        acquire_lock(&run_root, policy.tick.heartbeat.lease_seconds, "agent-result ingest")?;
    let result = ingest_locked(
        &layout,
        args,
        &prompt_digest,
        &output_bytes,
        &output_path,
        &meta_path,
        raw_path.as_deref(),
    );
    release_lock(&handle);
    let outcome = result?;

    if !outcome.noop {
        record_ingest_event(&layout, manifest, args);
    }
    Ok(outcome)
}

/// Returns `(output, meta, raw?)` paths for the stage.
fn target_paths(
    layout: &RunLayout,
    stage: Stage,
    perspective_id: &PerspectiveId,
) -> Result<(PathBuf, PathBuf, Option<PathBuf>), EngineError> {
    match stage {
        Stage::Wave1 => Ok((
            layout.wave_output_path(1, perspective_id),
            layout.wave_meta_path(1, perspective_id),
            None,
        )),
        Stage::Wave2 => Ok((
            layout.wave_output_path(2, perspective_id),
            layout.wave_meta_path(2, perspective_id),
            None,
        )),
        Stage::Perspectives => Ok((
            layout.operator_perspective_output_path(perspective_id),
            layout.operator_perspective_meta_path(perspective_id),
            Some(layout.operator_perspective_raw_path(perspective_id)),
        )),
        Stage::Summaries => Ok((
            layout.summary_path(perspective_id),
            layout.summary_meta_path(perspective_id),
            None,
        )),
        Stage::Synthesis => Ok((layout.synthesis_path(), layout.synthesis_meta_path(), None)),
        _ => Err(EngineError::Coded(CodedError::new(
            ErrorCode::InvalidState,
            format!("stage {stage} has no agent-result surface"),
        ))),
    }
}

/// Reads and validates the ingest input, normalizing perspectives JSON.
fn read_input(manifest: &Manifest, args: &AgentResultArgs) -> Result<Vec<u8>, EngineError> {
    let bytes = fs::read(&args.input_path).map_err(|err| {
        EngineError::Coded(CodedError::new(
            ErrorCode::InvalidArgs,
            format!("input unreadable at {}: {err}", args.input_path.display()),
        ))
    })?;
    if args.stage == Stage::Perspectives {
        let raw: serde_json::Value = serde_json::from_slice(&bytes).map_err(|err| {
            EngineError::Coded(CodedError::new(
                ErrorCode::PerspectivesOutputInvalid,
                format!("perspectives output is not json: {err}"),
            ))
        })?;
        let normalized = normalize_candidate_doc(&manifest.run_id, &raw)?;
        let mut out = serde_json::to_vec_pretty(&normalized).map_err(|err| {
            EngineError::Coded(CodedError::new(
                ErrorCode::PerspectivesOutputInvalid,
                format!("normalized candidate doc failed to serialize: {err}"),
            ))
        })?;
        out.push(b'\n');
        return Ok(out);
    }
    if bytes.is_empty() {
        return Err(EngineError::Coded(CodedError::new(
            ErrorCode::InvalidArgs,
            "input is empty",
        )));
    }
    Ok(bytes)
}

/// Performs the conflict checks and writes under the run lock.
fn ingest_locked(
    layout: &RunLayout,
    args: &AgentResultArgs,
    prompt_digest: &str,
    output_bytes: &[u8],
    output_path: &Path,
    meta_path: &Path,
    raw_path: Option<&Path>,
) -> Result<AgentResultOutcome, EngineError> {
    let existing_meta: Option<AgentOutputMeta> = read_json_optional(meta_path)?;
    match &existing_meta {
        Some(meta) if meta.prompt_digest == prompt_digest => {
            return Ok(AgentResultOutcome {
                noop: true,
                output_path: output_path.display().to_string(),
                meta_path: meta_path.display().to_string(),
                prompt_digest: prompt_digest.to_string(),
            });
        }
        Some(meta) if !args.force => {
            return Err(EngineError::Coded(CodedError::with_details(
                ErrorCode::AgentResultPromptDigestConflict,
                format!(
                    "existing output for {} is bound to a different prompt digest",
                    args.perspective_id
                ),
                json!({
                    "existing_digest": meta.prompt_digest,
                    "current_digest": prompt_digest,
                }),
            )));
        }
        Some(_) | None => {}
    }

    if existing_meta.is_none() && output_path.exists() {
        let existing_bytes = fs::read(output_path).map_err(|err| {
            EngineError::Coded(CodedError::new(
                ErrorCode::InvalidState,
                format!("existing output unreadable at {}: {err}", output_path.display()),
            ))
        })?;
        if existing_bytes != output_bytes {
            return Err(EngineError::Coded(CodedError::new(
                ErrorCode::AgentResultMetaConflict,
                format!(
                    "output exists without a sidecar and differs from the ingest input: {}",
                    output_path.display()
                ),
            )));
        }
    }

    write_bytes_atomic(output_path, output_bytes)?;
    if let Some(raw) = raw_path {
        let raw_bytes = fs::read(&args.input_path).map_err(|err| {
            EngineError::Coded(CodedError::new(
                ErrorCode::InvalidArgs,
                format!("input unreadable at {}: {err}", args.input_path.display()),
            ))
        })?;
        write_bytes_atomic(raw, &raw_bytes)?;
    }

    let meta = AgentOutputMeta::new(
        prompt_digest.to_string(),
        args.agent_run_id.clone(),
        Timestamp::now(),
        args.input_path.display().to_string(),
    );
    write_json_atomic(meta_path, &meta)?;

    if args.stage == Stage::Perspectives {
        update_perspectives_state(layout, &args.perspective_id)?;
    }

    Ok(AgentResultOutcome {
        noop: false,
        output_path: output_path.display().to_string(),
        meta_path: meta_path.display().to_string(),
        prompt_digest: prompt_digest.to_string(),
    })
}

/// Records the ingested perspective in the collection state.
fn update_perspectives_state(
    layout: &RunLayout,
    perspective_id: &PerspectiveId,
) -> Result<(), EngineError> {
    let now = Timestamp::now();
    let mut state: PerspectivesState = read_json_optional(&layout.perspectives_state_path())?
        .unwrap_or_else(|| PerspectivesState::collecting(now));
    let label = perspective_id.as_str().to_string();
    if !state.ingested.contains(&label) {
        state.ingested.push(label);
        state.ingested.sort();
    }
    if state.status == PerspectivesStateStatus::Promoted {
        state.status = PerspectivesStateStatus::Collecting;
        state.merged_digest = None;
    }
    state.updated_at = now;
    write_json_atomic(&layout.perspectives_state_path(), &state)?;
    Ok(())
}

/// Best-effort telemetry for a completed ingest.
fn record_ingest_event(layout: &RunLayout, manifest: &Manifest, args: &AgentResultArgs) {
    let now = Timestamp::now();
    let tick_index = next_tick_index(layout).map_or(0, |next| next.saturating_sub(1));
    let attempt = stage_attempt(layout, manifest.stage.current).unwrap_or(1);
    let details = json!({
        "stage": args.stage,
        "perspective_id": args.perspective_id,
        "reason": args.reason,
    });
    if let Err(err) = append_event(
        layout,
        EventType::AgentResultIngested,
        manifest.stage.current,
        attempt,
        tick_index,
        Some(details),
        now,
    ) {
        tracing::warn!(error = %err, "agent-result telemetry append failed");
    }
}
