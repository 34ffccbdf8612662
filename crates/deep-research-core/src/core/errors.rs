// crates/deep-research-core/src/core/errors.rs
// ============================================================================
// Module: Deep Research Error Codes
// Description: Closed taxonomy of stable error codes.
// Purpose: Give every internal failure a programmatic code for halt artifacts
//          and envelopes.
// Dependencies: serde, serde_json, thiserror
// ============================================================================

//! ## Overview
//! Every internally raised error carries a stable code from this closed
//! taxonomy. The tick boundary converts module errors into a [`CodedError`];
//! codes matching the timeout family mark the failure non-retryable.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

// ============================================================================
// SECTION: Error Codes
// ============================================================================

/// Stable error codes for the orchestrator surface.
///
/// # Invariants
/// - Wire labels are SCREAMING_SNAKE_CASE and never change meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Invalid arguments supplied by the caller.
    InvalidArgs,
    /// A composed path escaped the run root.
    PathTraversal,
    /// Operation is invalid in the current run state.
    InvalidState,
    /// Manifest revision did not match the expectation.
    RevisionConflict,
    /// The run lock is held by another owner.
    LockHeld,
    /// The lock handle no longer owns the run lock.
    LockNotOwned,
    /// A prior tick left a stale in-progress marker.
    PreviousTickIncomplete,
    /// The stage machine blocked the requested transition.
    StageAdvanceBlocked,
    /// The wave-1 plan no longer matches the perspectives digest.
    Wave1PlanStale,
    /// The wave-2 plan no longer matches the perspectives digest.
    Wave2PlanStale,
    /// Agent outputs must be produced before the tick can proceed.
    RunAgentRequired,
    /// A driver failed to produce agent output.
    RunAgentFailed,
    /// An ingest targeted an output bound to a different prompt digest.
    AgentResultPromptDigestConflict,
    /// An ingest found an output without a parseable sidecar.
    AgentResultMetaConflict,
    /// An ingest conflicts with existing output content.
    AgentResultConflict,
    /// A perspectives candidate document failed normalization.
    PerspectivesOutputInvalid,
    /// The perspectives merge is awaiting human review.
    HumanReviewRequired,
    /// A stage exceeded its watchdog timeout.
    WatchdogTimeout,
    /// A collaborator tool failed.
    ToolFailed,
    /// Unclassified failure.
    Unknown,
    /// CLI arguments failed to parse.
    CliParseError,
    /// Generic CLI failure.
    CliError,
    /// A bounded multi-tick run hit its tick cap.
    TickCapExceeded,
    /// The run is paused.
    Paused,
}

impl ErrorCode {
    /// Returns the stable wire label for the code.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InvalidArgs => "INVALID_ARGS",
            Self::PathTraversal => "PATH_TRAVERSAL",
            Self::InvalidState => "INVALID_STATE",
            Self::RevisionConflict => "REVISION_CONFLICT",
            Self::LockHeld => "LOCK_HELD",
            Self::LockNotOwned => "LOCK_NOT_OWNED",
            Self::PreviousTickIncomplete => "PREVIOUS_TICK_INCOMPLETE",
            Self::StageAdvanceBlocked => "STAGE_ADVANCE_BLOCKED",
            Self::Wave1PlanStale => "WAVE1_PLAN_STALE",
            Self::Wave2PlanStale => "WAVE2_PLAN_STALE",
            Self::RunAgentRequired => "RUN_AGENT_REQUIRED",
            Self::RunAgentFailed => "RUN_AGENT_FAILED",
            Self::AgentResultPromptDigestConflict => "AGENT_RESULT_PROMPT_DIGEST_CONFLICT",
            Self::AgentResultMetaConflict => "AGENT_RESULT_META_CONFLICT",
            Self::AgentResultConflict => "AGENT_RESULT_CONFLICT",
            Self::PerspectivesOutputInvalid => "PERSPECTIVES_OUTPUT_INVALID",
            Self::HumanReviewRequired => "HUMAN_REVIEW_REQUIRED",
            Self::WatchdogTimeout => "WATCHDOG_TIMEOUT",
            Self::ToolFailed => "TOOL_FAILED",
            Self::Unknown => "UNKNOWN",
            Self::CliParseError => "CLI_PARSE_ERROR",
            Self::CliError => "CLI_ERROR",
            Self::TickCapExceeded => "TICK_CAP_EXCEEDED",
            Self::Paused => "PAUSED",
        }
    }

    /// Returns true when the code belongs to the timeout family.
    #[must_use]
    pub fn is_timeout(self) -> bool {
        self.as_str().to_ascii_uppercase().contains("TIMEOUT")
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// SECTION: Coded Error
// ============================================================================

/// Structured error crossing the tick boundary.
///
/// # Invariants
/// - `code` is the stable programmatic identity; `message` is for operators.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[error("{code}: {message}")]
pub struct CodedError {
    /// Stable error code.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
    /// Optional structured details.
    pub details: Option<Value>,
}

impl CodedError {
    /// Creates a coded error without details.
    #[must_use]
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    /// Creates a coded error with structured details.
    #[must_use]
    pub fn with_details(code: ErrorCode, message: impl Into<String>, details: Value) -> Self {
        Self {
            code,
            message: message.into(),
            details: Some(details),
        }
    }
}
