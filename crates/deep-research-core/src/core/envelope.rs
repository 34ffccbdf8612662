// crates/deep-research-core/src/core/envelope.rs
// ============================================================================
// Module: Deep Research CLI Envelope
// Description: Machine-readable envelope emitted by every operator command.
// Purpose: Keep the operator surface a thin, contract-stable shell.
// Dependencies: crate::core::errors, serde, serde_json
// ============================================================================

//! ## Overview
//! In machine-output mode every operation emits exactly one envelope on the
//! output stream; incidental logs go to the error stream. `ok` is true iff
//! `error` is null, and the process exit code is 0 iff `ok`.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::core::errors::CodedError;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Schema version for the CLI envelope.
pub const CLI_SCHEMA_VERSION: &str = "dr.cli.v1";

// ============================================================================
// SECTION: Envelope
// ============================================================================

/// Run context echoed in every envelope.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EnvelopeContract {
    /// Run identifier, when resolved.
    pub run_id: Option<String>,
    /// Run root, when resolved.
    pub run_root: Option<String>,
    /// Manifest path, when resolved.
    pub manifest_path: Option<String>,
    /// Gates path, when resolved.
    pub gates_path: Option<String>,
    /// Current stage, when resolved.
    pub stage_current: Option<String>,
    /// Run status, when resolved.
    pub status: Option<String>,
    /// Exact CLI invocation that produced the envelope.
    pub cli_invocation: String,
}

/// Error section of the envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvelopeError {
    /// Stable error code label.
    pub code: String,
    /// Human-readable message.
    pub message: String,
    /// Optional structured details.
    pub details: Option<Value>,
}

impl From<&CodedError> for EnvelopeError {
    fn from(err: &CodedError) -> Self {
        Self {
            code: err.code.as_str().to_string(),
            message: err.message.clone(),
            details: err.details.clone(),
        }
    }
}

/// Halt section of the envelope, present when a halt artifact was written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvelopeHalt {
    /// Tick that halted.
    pub tick_index: u64,
    /// Tick-indexed halt artifact path.
    pub tick_path: String,
    /// Latest halt artifact path.
    pub latest_path: String,
    /// One-line blockers summary.
    pub blockers_summary: Option<String>,
    /// Operator commands that unblock the run.
    pub next_commands: Vec<String>,
}

/// Machine-readable operation envelope.
///
/// # Invariants
/// - `ok` is true iff `error` is `None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Envelope schema version.
    pub schema_version: String,
    /// True iff the operation succeeded.
    pub ok: bool,
    /// Operation name.
    pub command: String,
    /// Run context.
    pub contract: EnvelopeContract,
    /// Operation result, when successful.
    pub result: Option<Value>,
    /// Operation error, when failed.
    pub error: Option<EnvelopeError>,
    /// Halt section, when a halt artifact was written.
    pub halt: Option<EnvelopeHalt>,
}

impl Envelope {
    /// Creates a success envelope.
    #[must_use]
    pub fn success(command: impl Into<String>, contract: EnvelopeContract, result: Value) -> Self {
        Self {
            schema_version: CLI_SCHEMA_VERSION.to_string(),
            ok: true,
            command: command.into(),
            contract,
            result: Some(result),
            error: None,
            halt: None,
        }
    }

    /// Creates a failure envelope.
    #[must_use]
    pub fn failure(
        command: impl Into<String>,
        contract: EnvelopeContract,
        error: &CodedError,
        halt: Option<EnvelopeHalt>,
    ) -> Self {
        Self {
            schema_version: CLI_SCHEMA_VERSION.to_string(),
            ok: false,
            command: command.into(),
            contract,
            result: None,
            error: Some(EnvelopeError::from(error)),
            halt,
        }
    }
}
