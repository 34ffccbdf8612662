// crates/deep-research-engine/src/observe.rs
// ============================================================================
// Module: Engine Observability
// Description: Tick ledger and telemetry stream maintenance.
// Purpose: Keep tick indices and stage attempts unique and totally ordered.
// Dependencies: deep-research-core, deep-research-store
// ============================================================================

//! ## Overview
//! Tick indices are `max(existing) + 1` over the ledger; stage attempts are
//! `1 + count(stage_started)` for the current stage over telemetry. The
//! inputs digest binds a tick to the canonical tuple of its inputs so replay
//! divergence is detectable.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde_json::json;

use deep_research_core::EventType;
use deep_research_core::FailureKind;
use deep_research_core::RunId;
use deep_research_core::RunLayout;
use deep_research_core::Stage;
use deep_research_core::StageOutcome;
use deep_research_core::TelemetryEvent;
use deep_research_core::TickLedgerRecord;
use deep_research_core::TickPhase;
use deep_research_core::Timestamp;
use deep_research_core::digest_value;
use deep_research_store::append_jsonl;
use deep_research_store::read_jsonl;

use crate::error::EngineError;

// ============================================================================
// SECTION: Indices
// ============================================================================

/// Returns the next tick index: `max(existing) + 1`, starting at 1.
///
/// # Errors
///
/// Returns [`EngineError`] when the ledger is unreadable.
pub fn next_tick_index(layout: &RunLayout) -> Result<u64, EngineError> {
    let records: Vec<TickLedgerRecord> = read_jsonl(&layout.ticks_path())?;
    let max = records.iter().map(|record| record.tick_index).max().unwrap_or(0);
    Ok(max + 1)
}

/// Returns the stage attempt number: `1 + count(stage_started)` for the
/// stage.
///
/// # Errors
///
/// Returns [`EngineError`] when the telemetry stream is unreadable.
pub fn stage_attempt(layout: &RunLayout, stage: Stage) -> Result<u32, EngineError> {
    let events: Vec<TelemetryEvent> = read_jsonl(&layout.telemetry_path())?;
    let started = events
        .iter()
        .filter(|event| event.event_type == EventType::StageStarted && event.stage_id == stage)
        .count();
    Ok(u32::try_from(started).unwrap_or(u32::MAX).saturating_add(1))
}

/// Returns the next telemetry sequence number.
///
/// # Errors
///
/// Returns [`EngineError`] when the telemetry stream is unreadable.
pub fn next_telemetry_seq(layout: &RunLayout) -> Result<u64, EngineError> {
    let events: Vec<TelemetryEvent> = read_jsonl(&layout.telemetry_path())?;
    let max = events.iter().map(|event| event.seq).max().unwrap_or(0);
    Ok(max + 1)
}

/// Computes the canonical inputs digest for a tick.
///
/// # Errors
///
/// Returns [`EngineError`] when canonicalization fails.
pub fn tick_inputs_digest(
    run_id: &RunId,
    stage: Stage,
    tick_index: u64,
    stage_attempt: u32,
    manifest_revision: u64,
) -> Result<String, EngineError> {
    Ok(digest_value(&json!({
        "run_id": run_id,
        "stage": stage,
        "tick_index": tick_index,
        "stage_attempt": stage_attempt,
        "manifest_revision": manifest_revision,
    }))?)
}

// ============================================================================
// SECTION: Ledger Appends
// ============================================================================

/// Appends a `phase=start` ledger record.
///
/// # Errors
///
/// Returns [`EngineError`] when the append fails.
pub fn append_tick_start(
    layout: &RunLayout,
    tick_index: u64,
    stage: Stage,
    stage_attempt: u32,
    inputs_digest: String,
    ts: Timestamp,
) -> Result<(), EngineError> {
    append_jsonl(&layout.ticks_path(), &TickLedgerRecord {
        tick_index,
        phase: TickPhase::Start,
        stage,
        stage_attempt,
        ts,
        inputs_digest: Some(inputs_digest),
        outcome: None,
        error_code: None,
    })?;
    Ok(())
}

/// Appends a `phase=finish` ledger record.
///
/// # Errors
///
/// Returns [`EngineError`] when the append fails.
pub fn append_tick_finish(
    layout: &RunLayout,
    tick_index: u64,
    stage: Stage,
    stage_attempt: u32,
    outcome: StageOutcome,
    error_code: Option<String>,
    ts: Timestamp,
) -> Result<(), EngineError> {
    append_jsonl(&layout.ticks_path(), &TickLedgerRecord {
        tick_index,
        phase: TickPhase::Finish,
        stage,
        stage_attempt,
        ts,
        inputs_digest: None,
        outcome: Some(outcome),
        error_code,
    })?;
    Ok(())
}

// ============================================================================
// SECTION: Telemetry Appends
// ============================================================================

/// Appends a `stage_started` telemetry event.
///
/// # Errors
///
/// Returns [`EngineError`] when the append fails.
pub fn append_stage_started(
    layout: &RunLayout,
    stage: Stage,
    stage_attempt: u32,
    tick_index: u64,
    ts: Timestamp,
) -> Result<(), EngineError> {
    let seq = next_telemetry_seq(layout)?;
    append_jsonl(&layout.telemetry_path(), &TelemetryEvent {
        seq,
        event_type: EventType::StageStarted,
        stage_id: stage,
        stage_attempt,
        tick_index,
        ts,
        outcome: None,
        failure_kind: None,
        retryable: None,
        from_attempt: None,
        to_attempt: None,
        details: None,
    })?;
    Ok(())
}

/// Appends a `stage_finished` telemetry event.
///
/// # Errors
///
/// Returns [`EngineError`] when the append fails.
#[allow(clippy::too_many_arguments, reason = "Event fields mirror the telemetry schema.")]
pub fn append_stage_finished(
    layout: &RunLayout,
    stage: Stage,
    stage_attempt: u32,
    tick_index: u64,
    outcome: StageOutcome,
    failure_kind: Option<FailureKind>,
    retryable: Option<bool>,
    ts: Timestamp,
) -> Result<(), EngineError> {
    let seq = next_telemetry_seq(layout)?;
    append_jsonl(&layout.telemetry_path(), &TelemetryEvent {
        seq,
        event_type: EventType::StageFinished,
        stage_id: stage,
        stage_attempt,
        tick_index,
        ts,
        outcome: Some(outcome),
        failure_kind,
        retryable,
        from_attempt: None,
        to_attempt: None,
        details: None,
    })?;
    Ok(())
}

/// Appends a `stage_retry_planned` telemetry event.
///
/// # Errors
///
/// Returns [`EngineError`] when the append fails.
pub fn append_stage_retry_planned(
    layout: &RunLayout,
    stage: Stage,
    tick_index: u64,
    from_attempt: u32,
    to_attempt: u32,
    ts: Timestamp,
) -> Result<(), EngineError> {
    let seq = next_telemetry_seq(layout)?;
    append_jsonl(&layout.telemetry_path(), &TelemetryEvent {
        seq,
        event_type: EventType::StageRetryPlanned,
        stage_id: stage,
        stage_attempt: from_attempt,
        tick_index,
        ts,
        outcome: None,
        failure_kind: None,
        retryable: None,
        from_attempt: Some(from_attempt),
        to_attempt: Some(to_attempt),
        details: None,
    })?;
    Ok(())
}

/// Appends a generic telemetry event with details.
///
/// # Errors
///
/// Returns [`EngineError`] when the append fails.
pub fn append_event(
    layout: &RunLayout,
    event_type: EventType,
    stage: Stage,
    stage_attempt: u32,
    tick_index: u64,
    details: Option<serde_json::Value>,
    ts: Timestamp,
) -> Result<(), EngineError> {
    let seq = next_telemetry_seq(layout)?;
    append_jsonl(&layout.telemetry_path(), &TelemetryEvent {
        seq,
        event_type,
        stage_id: stage,
        stage_attempt,
        tick_index,
        ts,
        outcome: None,
        failure_kind: None,
        retryable: None,
        from_attempt: None,
        to_attempt: None,
        details,
    })?;
    Ok(())
}
