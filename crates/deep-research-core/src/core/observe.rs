// crates/deep-research-core/src/core/observe.rs
// ============================================================================
// Module: Deep Research Observability Records
// Description: Tick ledger, telemetry events, audit records, and run metrics.
// Purpose: Capture deterministic, append-only run evolution for replay and
//          triage.
// Dependencies: crate::core::{identifiers, stage, time}, serde, serde_json
// ============================================================================

//! ## Overview
//! Observability is three append-only JSONL streams plus a periodically
//! refreshed metrics document. The ledger records one `start` and one
//! `finish` line per tick; telemetry records stage lifecycle events keyed by
//! `(stage_id, stage_attempt)`; the audit log records every manifest write
//! with its canonical patch digest.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::core::identifiers::RunId;
use crate::core::stage::Stage;
use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Schema version for the run metrics document.
pub const RUN_METRICS_SCHEMA_VERSION: &str = "run_metrics.v1";
/// Schema version for the timeout checkpoint document.
pub const TIMEOUT_CHECKPOINT_SCHEMA_VERSION: &str = "timeout_checkpoint.v1";
/// Schema version for the tick-in-progress marker.
pub const TICK_MARKER_SCHEMA_VERSION: &str = "tick_in_progress.v1";

// ============================================================================
// SECTION: Tick Ledger
// ============================================================================

/// Tick ledger phase.
///
/// # Invariants
/// - Variants are stable for serialization and contract matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TickPhase {
    /// Tick began.
    Start,
    /// Tick ended.
    Finish,
}

/// Stage completion outcome for a tick.
///
/// # Invariants
/// - Variants are stable for serialization and contract matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageOutcome {
    /// Stage advanced.
    Succeeded,
    /// Stage did not advance.
    Failed,
}

/// Failure classification for a non-advancing tick.
///
/// # Invariants
/// - Variants are stable for serialization and contract matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The tick exceeded a stage timeout.
    Timeout,
    /// The stage produced output that did not satisfy its checks.
    InvalidOutput,
}

/// One line of the tick ledger (`logs/ticks.jsonl`).
///
/// # Invariants
/// - `tick_index` is unique, consecutive, and starts at 1 within a run.
/// - Every `start` line is eventually paired with a `finish` line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickLedgerRecord {
    /// Monotonic tick index.
    pub tick_index: u64,
    /// Ledger phase.
    pub phase: TickPhase,
    /// Stage the tick ran in.
    pub stage: Stage,
    /// Attempt number for the stage.
    pub stage_attempt: u32,
    /// Instant the record was appended.
    pub ts: Timestamp,
    /// Digest of the canonical tick input tuple (start records only).
    pub inputs_digest: Option<String>,
    /// Stage outcome (finish records only).
    pub outcome: Option<StageOutcome>,
    /// Error code when the tick failed (finish records only).
    pub error_code: Option<String>,
}

// ============================================================================
// SECTION: Telemetry
// ============================================================================

/// Telemetry event classification.
///
/// # Invariants
/// - Variants are stable for serialization and contract matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// A stage attempt started.
    StageStarted,
    /// A stage attempt finished.
    StageFinished,
    /// A retry of the current stage was planned.
    StageRetryPlanned,
    /// The run metrics document was refreshed.
    RunMetricsWritten,
    /// An agent output was ingested.
    AgentResultIngested,
    /// A halt artifact was written.
    HaltWritten,
}

/// One line of the telemetry stream (`logs/telemetry.jsonl`).
///
/// # Invariants
/// - `seq` is monotonic within a run.
/// - `stage_attempt` counts `stage_started` events for `stage_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryEvent {
    /// Monotonic event sequence number.
    pub seq: u64,
    /// Event classification.
    pub event_type: EventType,
    /// Stage the event refers to.
    pub stage_id: Stage,
    /// Attempt number for the stage.
    pub stage_attempt: u32,
    /// Tick the event was recorded in.
    pub tick_index: u64,
    /// Instant the event was appended.
    pub ts: Timestamp,
    /// Stage outcome for `stage_finished` events.
    pub outcome: Option<StageOutcome>,
    /// Failure classification for failed attempts.
    pub failure_kind: Option<FailureKind>,
    /// Whether the failure is retryable.
    pub retryable: Option<bool>,
    /// Source attempt for `stage_retry_planned` events.
    pub from_attempt: Option<u32>,
    /// Target attempt for `stage_retry_planned` events.
    pub to_attempt: Option<u32>,
    /// Structured event details.
    pub details: Option<Value>,
}

// ============================================================================
// SECTION: Audit Records
// ============================================================================

/// One line of the audit stream (`logs/audit.jsonl`), appended per manifest
/// write.
///
/// # Invariants
/// - `patch_digest` is the canonical digest of the applied patch; two
///   semantically equal patches record identical digests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Instant of the write.
    pub ts: Timestamp,
    /// Operator-supplied reason for the write.
    pub reason: String,
    /// Revision the writer expected.
    pub expected_revision: u64,
    /// Revision produced by the write.
    pub new_revision: u64,
    /// Canonical digest of the applied patch.
    pub patch_digest: String,
}

// ============================================================================
// SECTION: Checkpoints and Markers
// ============================================================================

/// Typed timeout checkpoint (`logs/timeout-checkpoint.json`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutCheckpoint {
    /// Checkpoint schema version.
    pub schema_version: String,
    /// Stage that timed out.
    pub stage: Stage,
    /// Whole seconds elapsed since the stage started.
    pub elapsed_seconds: u64,
    /// Instant the checkpoint was written.
    pub ts: Timestamp,
}

impl TimeoutCheckpoint {
    /// Creates a timeout checkpoint for a stage.
    #[must_use]
    pub fn new(stage: Stage, elapsed_seconds: u64, ts: Timestamp) -> Self {
        Self {
            schema_version: TIMEOUT_CHECKPOINT_SCHEMA_VERSION.to_string(),
            stage,
            elapsed_seconds,
            ts,
        }
    }
}

/// Tick-in-progress marker (`logs/tick-in-progress.json`).
///
/// # Invariants
/// - A marker older than the stale threshold is prior-crash evidence and
///   blocks further ticks until an operator intervenes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickMarker {
    /// Marker schema version.
    pub schema_version: String,
    /// Tick the marker belongs to.
    pub tick_index: u64,
    /// Stage the tick ran in.
    pub stage: Stage,
    /// Instant the marker was written.
    pub ts: Timestamp,
}

impl TickMarker {
    /// Creates a marker for a tick.
    #[must_use]
    pub fn new(tick_index: u64, stage: Stage, ts: Timestamp) -> Self {
        Self {
            schema_version: TICK_MARKER_SCHEMA_VERSION.to_string(),
            tick_index,
            stage,
            ts,
        }
    }
}

// ============================================================================
// SECTION: Run Metrics
// ============================================================================

/// Periodically refreshed metrics document (`run-metrics.json`).
///
/// # Invariants
/// - `telemetry_last_seq` records the last telemetry sequence folded in; a
///   rewrite with an unchanged pointer is skipped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunMetrics {
    /// Metrics schema version.
    pub schema_version: String,
    /// Run the metrics describe.
    pub run_id: RunId,
    /// Instant the document was generated.
    pub generated_at: Timestamp,
    /// Last telemetry sequence folded into the document.
    pub telemetry_last_seq: u64,
    /// Total ticks recorded in the ledger.
    pub tick_count: u64,
    /// Highest attempt observed per stage.
    pub stage_attempts: BTreeMap<String, u32>,
    /// Event counts by type label.
    pub events_by_type: BTreeMap<String, u64>,
    /// Stage the run was in at generation time.
    pub last_stage: Stage,
}
