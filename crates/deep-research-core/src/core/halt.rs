// crates/deep-research-core/src/core/halt.rs
// ============================================================================
// Module: Deep Research Halt Artifacts
// Description: Structured records of blocked ticks and operator resume steps.
// Purpose: Turn every failure into a triagable document with next commands.
// Dependencies: crate::core::{errors, identifiers, stage}, serde
// ============================================================================

//! ## Overview
//! A halt artifact captures the blocked transition, the triggering error,
//! the enumerated blockers from a dry-run advance, and the concrete operator
//! commands that unblock the run. It is written twice per halt: once under
//! the tick-indexed name and once as `latest.json`.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

use crate::core::errors::ErrorCode;
use crate::core::identifiers::RunId;
use crate::core::stage::Stage;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Schema version for halt artifacts.
pub const HALT_SCHEMA_VERSION: &str = "halt.v1";

// ============================================================================
// SECTION: Halt Artifact
// ============================================================================

/// Transition that was blocked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockedTransition {
    /// Stage the run attempted to leave.
    pub from: Stage,
    /// Stage the run attempted to enter.
    pub to: Stage,
}

/// Error that triggered the halt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HaltError {
    /// Stable error code.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
}

/// Enumerated blockers from the dry-run advance.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct HaltBlockers {
    /// Artifact checks that failed because the path was missing or invalid.
    #[serde(default)]
    pub missing_artifacts: Vec<String>,
    /// Gate checks that failed.
    #[serde(default)]
    pub blocked_gates: Vec<String>,
    /// Custom predicate checks that failed.
    #[serde(default)]
    pub failed_checks: Vec<String>,
}

impl HaltBlockers {
    /// Returns true when no blockers were recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.missing_artifacts.is_empty()
            && self.blocked_gates.is_empty()
            && self.failed_checks.is_empty()
    }

    /// Returns a one-line operator summary of the blockers.
    #[must_use]
    pub fn summary(&self) -> String {
        format!(
            "{} missing artifact(s), {} blocked gate(s), {} failed check(s)",
            self.missing_artifacts.len(),
            self.blocked_gates.len(),
            self.failed_checks.len()
        )
    }
}

/// Paths an operator will want while triaging the halt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelatedPaths {
    /// Manifest path.
    pub manifest_path: String,
    /// Gates document path.
    pub gates_path: String,
    /// Retry directives path, when present on disk.
    pub retry_directives_path: Option<String>,
    /// Blocked URLs path, when present on disk.
    pub blocked_urls_path: Option<String>,
    /// Latest online fixtures pointer, when present on disk.
    pub online_fixtures_latest_path: Option<String>,
}

/// Halt artifact (`operator/halt/tick-NNNN.json` and `latest.json`).
///
/// # Invariants
/// - `next_commands` is non-empty; a halt always names a way forward.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HaltArtifact {
    /// Halt schema version.
    pub schema_version: String,
    /// Run identifier.
    pub run_id: RunId,
    /// Absolute run root.
    pub run_root: String,
    /// Tick that halted.
    pub tick_index: u64,
    /// Stage the run was in.
    pub stage_current: Stage,
    /// Transition that was blocked.
    pub blocked_transition: BlockedTransition,
    /// Error that triggered the halt.
    pub error: HaltError,
    /// Enumerated blockers.
    pub blockers: HaltBlockers,
    /// Paths useful for triage.
    pub related_paths: RelatedPaths,
    /// Concrete operator commands that unblock the run.
    pub next_commands: Vec<String>,
}
