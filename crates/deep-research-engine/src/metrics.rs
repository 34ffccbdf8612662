// crates/deep-research-engine/src/metrics.rs
// ============================================================================
// Module: Run Metrics
// Description: Skip-safe run-metrics.json refresh.
// Purpose: Fold telemetry into a cheap-to-read metrics document without
//          redundant writes.
// Dependencies: deep-research-core, deep-research-store
// ============================================================================

//! ## Overview
//! The metrics writer is keyed by the telemetry last-seq pointer: when the
//! stream has not advanced since the previous write, the call reports
//! `{skipped: true, reason: "telemetry unchanged"}` and touches nothing on
//! disk.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use deep_research_core::EventType;
use deep_research_core::Manifest;
use deep_research_core::RUN_METRICS_SCHEMA_VERSION;
use deep_research_core::RunLayout;
use deep_research_core::RunMetrics;
use deep_research_core::TelemetryEvent;
use deep_research_core::TickLedgerRecord;
use deep_research_core::Timestamp;
use deep_research_store::read_json_optional;
use deep_research_store::read_jsonl;
use deep_research_store::write_json_atomic;
use serde::Deserialize;
use serde::Serialize;

use crate::error::EngineError;

// ============================================================================
// SECTION: Outcome
// ============================================================================

/// Outcome of one metrics write attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsWriteOutcome {
    /// True when the write was skipped.
    pub skipped: bool,
    /// Skip reason, when skipped.
    pub reason: Option<String>,
    /// Telemetry last-seq pointer after the call.
    pub telemetry_last_seq: u64,
}

// ============================================================================
// SECTION: Writer
// ============================================================================

/// Refreshes `run-metrics.json`, skip-safe on an unchanged telemetry
/// pointer.
///
/// # Errors
///
/// Returns [`EngineError`] when streams are unreadable or the write fails.
pub fn run_metrics_write(
    layout: &RunLayout,
    manifest: &Manifest,
    now: Timestamp,
) -> Result<MetricsWriteOutcome, EngineError> {
    let events: Vec<TelemetryEvent> = read_jsonl(&layout.telemetry_path())?;
    let last_seq = events.iter().map(|event| event.seq).max().unwrap_or(0);

    let existing: Option<RunMetrics> = read_json_optional(&layout.run_metrics_path())?;
    if let Some(existing) = &existing
        && existing.telemetry_last_seq == last_seq
    {
        return Ok(MetricsWriteOutcome {
            skipped: true,
            reason: Some("telemetry unchanged".to_string()),
            telemetry_last_seq: last_seq,
        });
    }

    let ticks: Vec<TickLedgerRecord> = read_jsonl(&layout.ticks_path())?;
    let tick_count = ticks.iter().map(|record| record.tick_index).max().unwrap_or(0);

    let mut stage_attempts: BTreeMap<String, u32> = BTreeMap::new();
    let mut events_by_type: BTreeMap<String, u64> = BTreeMap::new();
    for event in &events {
        let type_label = match serde_json::to_value(event.event_type) {
            Ok(serde_json::Value::String(label)) => label,
            _ => continue,
        };
        *events_by_type.entry(type_label).or_insert(0) += 1;
        if event.event_type == EventType::StageStarted {
            let entry = stage_attempts.entry(event.stage_id.as_str().to_string()).or_insert(0);
            *entry = (*entry).max(event.stage_attempt);
        }
    }

    let metrics = RunMetrics {
        schema_version: RUN_METRICS_SCHEMA_VERSION.to_string(),
        run_id: manifest.run_id.clone(),
        generated_at: now,
        telemetry_last_seq: last_seq,
        tick_count,
        stage_attempts,
        events_by_type,
        last_stage: manifest.stage.current,
    };
    write_json_atomic(&layout.run_metrics_path(), &metrics)?;

    Ok(MetricsWriteOutcome {
        skipped: false,
        reason: None,
        telemetry_last_seq: last_seq,
    })
}
