// crates/deep-research-engine/src/tick.rs
// ============================================================================
// Module: Tick Engine
// Description: One bounded unit of forward progress under the run lock.
// Purpose: Drive a stage procedure, commit the advance, and convert every
//          failure into a checkpoint or halt artifact.
// Dependencies: deep-research-core, deep-research-store, crate::{halt,
//               metrics, observe, stages}
// ============================================================================

//! ## Overview
//! A tick performs exactly one unit of forward progress or produces a
//! diagnostic halt. The watchdog runs before and after the stage procedure
//! for live and task drivers; a stale tick-in-progress marker is treated as
//! prior-crash evidence. Every `stage_started` event is paired with a
//! `stage_finished` event for the same `(stage, attempt)` before the tick
//! returns.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs;
use std::path::Path;
use std::time::Duration;

use deep_research_core::AdvanceContext;
use deep_research_core::CodedError;
use deep_research_core::Driver;
use deep_research_core::DriverKind;
use deep_research_core::ErrorCode;
use deep_research_core::FailureKind;
use deep_research_core::GatesDoc;
use deep_research_core::Manifest;
use deep_research_core::RunLayout;
use deep_research_core::RunPolicy;
use deep_research_core::Stage;
use deep_research_core::StageOutcome;
use deep_research_core::TickMarker;
use deep_research_core::TimeoutCheckpoint;
use deep_research_core::Timestamp;
use deep_research_core::advance;
use deep_research_core::transition_patch;
use deep_research_store::acquire_lock;
use deep_research_store::read_json_optional;
use deep_research_store::read_manifest;
use deep_research_store::release_lock;
use deep_research_store::start_heartbeat;
use deep_research_store::write_json_atomic;
use deep_research_store::write_manifest;
use serde::Deserialize;
use serde::Serialize;
use serde_json::json;

use crate::drivers::ToolSet;
use crate::error::EngineError;
use crate::halt::write_halt;
use crate::metrics::MetricsWriteOutcome;
use crate::metrics::run_metrics_write;
use crate::observe::append_stage_finished;
use crate::observe::append_stage_retry_planned;
use crate::observe::append_stage_started;
use crate::observe::append_tick_finish;
use crate::observe::append_tick_start;
use crate::observe::next_tick_index;
use crate::observe::stage_attempt;
use crate::observe::tick_inputs_digest;
use crate::stages::EngineChecks;
use crate::stages::ProcedureOutcome;
use crate::stages::StageContext;
use crate::stages::run_stage;

// ============================================================================
// SECTION: Report
// ============================================================================

/// Report for one completed tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickReport {
    /// Tick index assigned to this tick.
    pub tick_index: u64,
    /// Stage the tick ran in.
    pub stage_from: Stage,
    /// Stage the run advanced to, when it advanced.
    pub stage_to: Option<Stage>,
    /// True when the stage advanced.
    pub advanced: bool,
    /// Metrics refresh outcome, when a refresh ran.
    pub metrics: Option<MetricsWriteOutcome>,
}

// ============================================================================
// SECTION: Tick
// ============================================================================

/// Performs one tick against a manifest.
///
/// # Errors
///
/// Returns a [`CodedError`]; known blockers have already been written as
/// halt artifacts and timeouts as timeout checkpoints when this returns.
pub fn tick(
    manifest_path: &Path,
    gates_path: &Path,
    reason: &str,
    policy: &RunPolicy,
    driver: &dyn Driver,
    tools: &ToolSet,
) -> Result<TickReport, CodedError> {
    let snapshot = read_manifest(manifest_path)
        .map_err(|err| EngineError::from(err).into_coded())?;
    let manifest = snapshot.manifest.clone();
    let layout = RunLayout::from_manifest(&manifest);
    let now = Timestamp::now();

    match manifest.status {
        deep_research_core::RunStatus::Running => {}
        deep_research_core::RunStatus::Paused => {
            return Err(CodedError::new(ErrorCode::Paused, "run is paused"));
        }
        status => {
            return Err(CodedError::new(
                ErrorCode::InvalidState,
                format!("run status is terminal: {}", status.as_str()),
            ));
        }
    }

    check_tick_marker(&layout, policy, now)?;
    if matches!(driver.kind(), DriverKind::Live | DriverKind::Task) {
        watchdog_check(&layout, &manifest, policy, now)?;
    }

    let handle = acquire_lock(
        layout.root(),
        policy.tick.heartbeat.lease_seconds,
        reason,
    )
    .map_err(|err| EngineError::from(err).into_coded())?;
    let heartbeat = start_heartbeat(
        handle.clone(),
        Duration::from_millis(policy.tick.heartbeat.interval_ms),
        policy.tick.heartbeat.lease_seconds,
        policy.tick.heartbeat.max_failures,
        Box::new(|| {
            tracing::error!("run lock lost: heartbeat refresh failed repeatedly");
        }),
    );

    let result = tick_locked(
        manifest_path,
        gates_path,
        reason,
        policy,
        driver,
        tools,
        &layout,
        &manifest,
        snapshot.revision,
    );

    let _ = fs::remove_file(layout.tick_marker_path());
    heartbeat.stop();
    release_lock(&handle);
    result
}

/// Fails when a stale tick-in-progress marker is present.
fn check_tick_marker(
    layout: &RunLayout,
    policy: &RunPolicy,
    now: Timestamp,
) -> Result<(), CodedError> {
    let marker: Option<TickMarker> = read_json_optional(&layout.tick_marker_path())
        .map_err(|err| EngineError::from(err).into_coded())?;
    let Some(marker) = marker else {
        return Ok(());
    };
    let age = marker.ts.elapsed_seconds(now);
    if age > policy.tick.stale_marker_seconds {
        return Err(CodedError::with_details(
            ErrorCode::PreviousTickIncomplete,
            format!("tick-in-progress marker is {age}s old; a prior tick did not complete"),
            json!({
                "ts": marker.ts,
                "path": layout.tick_marker_path().display().to_string(),
                "age_seconds": age,
            }),
        ));
    }
    Ok(())
}

/// Writes a timeout checkpoint and fails when the stage timed out.
fn watchdog_check(
    layout: &RunLayout,
    manifest: &Manifest,
    policy: &RunPolicy,
    now: Timestamp,
) -> Result<(), CodedError> {
    let stage = manifest.stage.current;
    let elapsed = manifest.stage.started_at.elapsed_seconds(now);
    let timeout = policy.stage_timeouts.for_stage(stage);
    if elapsed <= timeout {
        return Ok(());
    }
    let checkpoint = TimeoutCheckpoint::new(stage, elapsed, now);
    if let Err(err) = write_json_atomic(&layout.timeout_checkpoint_path(), &checkpoint) {
        tracing::warn!(error = %err, "timeout checkpoint write failed");
    }
    Err(CodedError::with_details(
        ErrorCode::WatchdogTimeout,
        format!("stage {stage} exceeded its {timeout}s timeout after {elapsed}s"),
        json!({
            "stage": stage,
            "elapsed_seconds": elapsed,
            "timeout_seconds": timeout,
        }),
    ))
}

/// Runs the tick body under the run lock.
#[allow(clippy::too_many_arguments, reason = "The tick sequence threads one context set.")]
fn tick_locked(
    manifest_path: &Path,
    gates_path: &Path,
    _reason: &str,
    policy: &RunPolicy,
    driver: &dyn Driver,
    tools: &ToolSet,
    layout: &RunLayout,
    manifest: &Manifest,
    revision: u64,
) -> Result<TickReport, CodedError> {
    let stage = manifest.stage.current;
    let now = Timestamp::now();

    let tick_index =
        next_tick_index(layout).map_err(EngineError::into_coded)?;
    let attempt = stage_attempt(layout, stage).map_err(EngineError::into_coded)?;
    let inputs_digest =
        tick_inputs_digest(&manifest.run_id, stage, tick_index, attempt, revision)
            .map_err(EngineError::into_coded)?;

    append_tick_start(layout, tick_index, stage, attempt, inputs_digest, now)
        .map_err(EngineError::into_coded)?;
    append_stage_started(layout, stage, attempt, tick_index, now)
        .map_err(EngineError::into_coded)?;

    write_json_atomic(&layout.tick_marker_path(), &TickMarker::new(tick_index, stage, now))
        .map_err(|err| EngineError::from(err).into_coded())?;

    let ctx = StageContext {
        layout,
        manifest,
        gates_path,
        policy,
        driver,
        tools,
        tick_index,
    };
    let step = run_stage(&ctx).and_then(|outcome| {
        commit_outcome(manifest_path, gates_path, layout, manifest, revision, &outcome)
    });

    let finish_ts = Timestamp::now();
    match step {
        Ok(Some(stage_to)) => {
            append_stage_finished(
                layout,
                stage,
                attempt,
                tick_index,
                StageOutcome::Succeeded,
                None,
                None,
                finish_ts,
            )
            .map_err(EngineError::into_coded)?;
            append_tick_finish(
                layout,
                tick_index,
                stage,
                attempt,
                StageOutcome::Succeeded,
                None,
                finish_ts,
            )
            .map_err(EngineError::into_coded)?;
            let metrics = refresh_metrics(layout, manifest_path, tick_index, policy, true);
            Ok(TickReport {
                tick_index,
                stage_from: stage,
                stage_to: Some(stage_to),
                advanced: true,
                metrics,
            })
        }
        Ok(None) => {
            // The stage did not advance and no error was raised: plan a retry.
            append_stage_finished(
                layout,
                stage,
                attempt,
                tick_index,
                StageOutcome::Failed,
                Some(FailureKind::InvalidOutput),
                Some(true),
                finish_ts,
            )
            .map_err(EngineError::into_coded)?;
            append_stage_retry_planned(layout, stage, tick_index, attempt, attempt + 1, finish_ts)
                .map_err(EngineError::into_coded)?;
            append_tick_finish(
                layout,
                tick_index,
                stage,
                attempt,
                StageOutcome::Failed,
                None,
                finish_ts,
            )
            .map_err(EngineError::into_coded)?;
            if matches!(driver.kind(), DriverKind::Live | DriverKind::Task) {
                watchdog_check(layout, manifest, policy, Timestamp::now())?;
            }
            let metrics = refresh_metrics(layout, manifest_path, tick_index, policy, false);
            Ok(TickReport {
                tick_index,
                stage_from: stage,
                stage_to: None,
                advanced: false,
                metrics,
            })
        }
        Err(err) => {
            let coded = err.into_coded();
            let failure_kind = if coded.code.is_timeout() {
                FailureKind::Timeout
            } else {
                FailureKind::InvalidOutput
            };
            let retryable = !coded.code.is_timeout();
            if coded.code.is_timeout() {
                let checkpoint = TimeoutCheckpoint::new(
                    stage,
                    manifest.stage.started_at.elapsed_seconds(finish_ts),
                    finish_ts,
                );
                if let Err(write_err) =
                    write_json_atomic(&layout.timeout_checkpoint_path(), &checkpoint)
                {
                    tracing::warn!(error = %write_err, "timeout checkpoint write failed");
                }
            } else {
                let gates: GatesDoc = read_json_optional(gates_path)
                    .ok()
                    .flatten()
                    .unwrap_or_default();
                if let Err(halt_err) = write_halt(layout, manifest, &gates, tick_index, &coded) {
                    tracing::warn!(error = %halt_err, "halt artifact write failed");
                }
            }
            let _ = append_stage_finished(
                layout,
                stage,
                attempt,
                tick_index,
                StageOutcome::Failed,
                Some(failure_kind),
                Some(retryable),
                finish_ts,
            );
            let _ = append_tick_finish(
                layout,
                tick_index,
                stage,
                attempt,
                StageOutcome::Failed,
                Some(coded.code.as_str().to_string()),
                finish_ts,
            );
            Err(coded)
        }
    }
}

/// Commits a procedure outcome through the stage machine.
///
/// Returns the committed next stage, or `None` when no advance was
/// requested.
fn commit_outcome(
    manifest_path: &Path,
    gates_path: &Path,
    layout: &RunLayout,
    manifest: &Manifest,
    revision: u64,
    outcome: &ProcedureOutcome,
) -> Result<Option<Stage>, EngineError> {
    let Some(requested) = outcome.requested_next else {
        return Ok(None);
    };
    let gates: GatesDoc = read_json_optional(gates_path)?.unwrap_or_default();
    let checks = EngineChecks {
        layout,
        manifest,
        gates: &gates,
    };
    let ctx = AdvanceContext {
        manifest,
        gates: &gates,
        custom: &checks,
    };
    let decision = advance(&ctx, Some(requested))?;

    let now = Timestamp::now();
    let mut patch = transition_patch(manifest, &decision, now);
    if let Some(status) = outcome.status_override
        && let Some(object) = patch.as_object_mut()
    {
        object.insert("status".to_string(), serde_json::to_value(status).unwrap_or_default());
    }
    write_manifest(manifest_path, revision, &patch, "stage advance")?;
    Ok(Some(decision.to))
}

/// Refreshes run metrics on stage boundaries and every Nth tick.
fn refresh_metrics(
    layout: &RunLayout,
    manifest_path: &Path,
    tick_index: u64,
    policy: &RunPolicy,
    stage_boundary: bool,
) -> Option<MetricsWriteOutcome> {
    let due = stage_boundary || tick_index % policy.tick.metrics_refresh_interval_ticks == 0;
    if !due {
        return None;
    }
    let manifest = read_manifest(manifest_path).ok()?.manifest;
    match run_metrics_write(layout, &manifest, Timestamp::now()) {
        Ok(outcome) => Some(outcome),
        Err(err) => {
            tracing::warn!(error = %err, "run metrics refresh failed");
            None
        }
    }
}
