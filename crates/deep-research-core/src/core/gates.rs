// crates/deep-research-core/src/core/gates.rs
// ============================================================================
// Module: Deep Research Gates
// Description: Named preconditions A..F that pace the pipeline.
// Purpose: Record gate decisions with metrics and warnings for triage.
// Dependencies: crate::core::time, serde, serde_json
// ============================================================================

//! ## Overview
//! Gates are the named preconditions that pace stage advancement:
//! A = perspectives accepted, B = wave-1 reviewed, C = pivot complete,
//! D = wave-2 reviewed, E = synthesis acceptable, F = final review decision.
//! Gate records are durable in `gates.json` and consumed by the stage
//! machine's gate checks.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Schema version for the gates document.
pub const GATES_SCHEMA_VERSION: &str = "gates.v1";

// ============================================================================
// SECTION: Gate Identifiers
// ============================================================================

/// Named gate in the pipeline.
///
/// # Invariants
/// - Variants are stable for serialization and contract matching.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum GateId {
    /// Perspectives accepted.
    A,
    /// Wave-1 reviewed.
    B,
    /// Pivot complete.
    C,
    /// Wave-2 reviewed.
    D,
    /// Synthesis acceptable (citation coverage, duplicate rate, uncited numerics).
    E,
    /// Final review decision.
    F,
}

/// All gates in pipeline order.
pub const ALL_GATES: [GateId; 6] =
    [GateId::A, GateId::B, GateId::C, GateId::D, GateId::E, GateId::F];

impl GateId {
    /// Returns the stable wire label for the gate.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::A => "A",
            Self::B => "B",
            Self::C => "C",
            Self::D => "D",
            Self::E => "E",
            Self::F => "F",
        }
    }

    /// Returns the human description of the gate's semantics.
    #[must_use]
    pub const fn description(self) -> &'static str {
        match self {
            Self::A => "perspectives accepted",
            Self::B => "wave-1 reviewed",
            Self::C => "pivot complete",
            Self::D => "wave-2 reviewed",
            Self::E => "synthesis acceptable",
            Self::F => "final review decision",
        }
    }
}

impl fmt::Display for GateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// SECTION: Gate Records
// ============================================================================

/// Gate decision status.
///
/// # Invariants
/// - Variants are stable for serialization and contract matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateStatus {
    /// Gate has not been evaluated.
    #[default]
    Pending,
    /// Gate passed.
    Pass,
    /// Gate failed.
    Fail,
}

impl GateStatus {
    /// Returns the stable wire label for the status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Pass => "pass",
            Self::Fail => "fail",
        }
    }
}

/// One gate's durable record.
///
/// # Invariants
/// - `checked_at` is set whenever `status` leaves `pending`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GateRecord {
    /// Decision status.
    pub status: GateStatus,
    /// Instant the gate was last evaluated.
    pub checked_at: Option<Timestamp>,
    /// Structured metrics backing the decision.
    pub metrics: Option<Value>,
    /// Non-fatal warnings surfaced by the evaluation.
    #[serde(default)]
    pub warnings: Vec<String>,
    /// Run-root-relative artifacts the decision is based on.
    #[serde(default)]
    pub artifacts: Vec<String>,
    /// Free-form evaluator notes.
    pub notes: Option<String>,
}

// ============================================================================
// SECTION: Gates Document
// ============================================================================

/// Durable gates document recording all gate decisions for a run.
///
/// # Invariants
/// - Missing gates read as `pending`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatesDoc {
    /// Gates schema version.
    pub schema_version: String,
    /// Gate records keyed by gate identifier.
    #[serde(default)]
    pub gates: BTreeMap<GateId, GateRecord>,
}

impl Default for GatesDoc {
    fn default() -> Self {
        Self {
            schema_version: GATES_SCHEMA_VERSION.to_string(),
            gates: BTreeMap::new(),
        }
    }
}

impl GatesDoc {
    /// Returns the status for a gate, or `pending` when unrecorded.
    #[must_use]
    pub fn status(&self, id: GateId) -> GateStatus {
        self.gates.get(&id).map_or(GateStatus::Pending, |record| record.status)
    }

    /// Records a gate decision, replacing any prior record.
    pub fn record(&mut self, id: GateId, record: GateRecord) {
        self.gates.insert(id, record);
    }

    /// Records a passing decision with metrics.
    pub fn record_pass(&mut self, id: GateId, checked_at: Timestamp, metrics: Option<Value>) {
        self.record(id, GateRecord {
            status: GateStatus::Pass,
            checked_at: Some(checked_at),
            metrics,
            warnings: Vec::new(),
            artifacts: Vec::new(),
            notes: None,
        });
    }

    /// Records a failing decision with notes.
    pub fn record_fail(&mut self, id: GateId, checked_at: Timestamp, notes: Option<String>) {
        self.record(id, GateRecord {
            status: GateStatus::Fail,
            checked_at: Some(checked_at),
            metrics: None,
            warnings: Vec::new(),
            artifacts: Vec::new(),
            notes,
        });
    }
}
