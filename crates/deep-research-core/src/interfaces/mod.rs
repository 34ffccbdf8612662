// crates/deep-research-core/src/interfaces/mod.rs
// ============================================================================
// Module: Deep Research Interfaces
// Description: Backend-agnostic interfaces for drivers and collaborator tools.
// Purpose: Define the contract surfaces the tick engine integrates through.
// Dependencies: crate::core
// ============================================================================

//! ## Overview
//! Interfaces define how the orchestrator acquires agent output and invokes
//! collaborator tools without embedding backend specifics. Implementations
//! must be deterministic where replay depends on it and fail closed on
//! missing or invalid data.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::Path;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::core::errors::CodedError;
use crate::core::errors::ErrorCode;
use crate::core::identifiers::AgentRunId;
use crate::core::identifiers::PerspectiveId;
use crate::core::stage::Stage;

// ============================================================================
// SECTION: Driver
// ============================================================================

/// Driver execution mode.
///
/// # Invariants
/// - Variants are stable for serialization and contract matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriverKind {
    /// Deterministic replay from recorded fixtures.
    Fixture,
    /// Interactive execution; the driver produces output inline.
    Live,
    /// Prompt-out mode; prompts are written for later `agent-result` ingest.
    Task,
}

impl DriverKind {
    /// Returns the stable wire label for the driver kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Fixture => "fixture",
            Self::Live => "live",
            Self::Task => "task",
        }
    }
}

/// Request handed to a driver for one agent invocation.
///
/// # Invariants
/// - `run_root` is absolute; `stage` and `perspective_id` are path-safe;
///   `prompt_md` is non-empty.
#[derive(Debug, Clone, Copy)]
pub struct AgentInvocation<'a> {
    /// Absolute run root the driver may write inside.
    pub run_root: &'a Path,
    /// Stage the invocation belongs to.
    pub stage: Stage,
    /// Perspective the prompt targets.
    pub perspective_id: &'a PerspectiveId,
    /// Rendered prompt markdown.
    pub prompt_md: &'a str,
}

/// Successful driver reply for one agent invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentReply {
    /// Markdown the agent produced.
    pub markdown: String,
    /// Driver-assigned agent run identifier.
    pub agent_run_id: AgentRunId,
    /// Model label, when the driver reports one.
    pub model: Option<String>,
}

/// Driver errors.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
#[derive(Debug, Error)]
pub enum DriverError {
    /// The driver has no recorded output for the invocation.
    #[error("no fixture recorded for {stage}/{perspective_id}")]
    FixtureMissing {
        /// Stage of the invocation.
        stage: Stage,
        /// Perspective of the invocation.
        perspective_id: PerspectiveId,
    },
    /// The driver cannot run agents inline (task mode).
    #[error("driver does not execute agents inline; ingest outputs via agent-result")]
    InlineExecutionUnsupported,
    /// The driver attempted and failed to produce output.
    #[error("agent execution failed: {0}")]
    Failed(String),
}

impl DriverError {
    /// Returns the stable code for the error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::FixtureMissing { .. } | Self::Failed(_) => ErrorCode::RunAgentFailed,
            Self::InlineExecutionUnsupported => ErrorCode::InvalidState,
        }
    }
}

/// Strategy for acquiring agent output.
pub trait Driver {
    /// Returns the driver's execution mode.
    fn kind(&self) -> DriverKind;

    /// Produces agent output for one invocation.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError`] when output cannot be produced.
    fn run_agent(&self, invocation: &AgentInvocation<'_>) -> Result<AgentReply, DriverError>;
}

// ============================================================================
// SECTION: Tools
// ============================================================================

/// Failure half of a tool envelope.
///
/// # Invariants
/// - `code` is a stable identifier for the tool surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolFailure {
    /// Stable error code string.
    pub code: String,
    /// Human-readable message.
    pub message: String,
    /// Optional structured details.
    pub details: Option<Value>,
}

/// Closed result sum for collaborator tool envelopes.
///
/// # Invariants
/// - The wire form is `{ok: true, value}` or `{ok: false, error}`; the open
///   map never leaks into engine code.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolResult<T> {
    /// Tool succeeded with a typed value.
    Ok(T),
    /// Tool failed with a coded error.
    Err(ToolFailure),
}

impl<T> ToolResult<T> {
    /// Converts the tool result into a standard result.
    ///
    /// # Errors
    ///
    /// Returns a [`CodedError`] with code `TOOL_FAILED` wrapping the tool's
    /// own code and message.
    pub fn into_result(self) -> Result<T, CodedError> {
        match self {
            Self::Ok(value) => Ok(value),
            Self::Err(failure) => Err(CodedError::with_details(
                ErrorCode::ToolFailed,
                format!("{}: {}", failure.code, failure.message),
                serde_json::json!({
                    "tool_code": failure.code,
                    "tool_message": failure.message,
                    "tool_details": failure.details,
                }),
            )),
        }
    }
}

/// Wire form of a tool envelope.
///
/// # Invariants
/// - `ok` is true iff `error` is absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolEnvelope {
    /// True iff the tool call succeeded.
    pub ok: bool,
    /// Success value.
    pub value: Option<Value>,
    /// Failure details.
    pub error: Option<ToolFailure>,
}

impl From<ToolEnvelope> for ToolResult<Value> {
    fn from(envelope: ToolEnvelope) -> Self {
        if envelope.ok {
            return Self::Ok(envelope.value.unwrap_or(Value::Null));
        }
        Self::Err(envelope.error.unwrap_or(ToolFailure {
            code: "UNKNOWN".to_string(),
            message: "tool reported failure without error details".to_string(),
            details: None,
        }))
    }
}

impl From<ToolResult<Value>> for ToolEnvelope {
    fn from(result: ToolResult<Value>) -> Self {
        match result {
            ToolResult::Ok(value) => Self {
                ok: true,
                value: Some(value),
                error: None,
            },
            ToolResult::Err(failure) => Self {
                ok: false,
                value: None,
                error: Some(failure),
            },
        }
    }
}

/// Black-box collaborator tool invoked by stage procedures.
pub trait Tool {
    /// Returns the stable tool name.
    fn name(&self) -> &'static str;

    /// Executes the tool with structured arguments.
    fn execute(&self, args: &Value) -> ToolResult<Value>;
}
