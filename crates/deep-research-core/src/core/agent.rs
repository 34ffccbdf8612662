// crates/deep-research-core/src/core/agent.rs
// ============================================================================
// Module: Deep Research Agent Output Metadata
// Description: Sidecar metadata binding agent output to its prompt digest.
// Purpose: Make every ingested output verifiable against the plan that asked
//          for it.
// Dependencies: crate::core::{identifiers, time}, serde
// ============================================================================

//! ## Overview
//! Every agent output `<pid>.md` is accompanied by a `<pid>.meta.json`
//! sidecar. The sidecar's `prompt_digest` must equal the digest of the
//! current plan's prompt for that perspective; otherwise the output is stale
//! and the ingest surface refuses to accept conflicting rewrites without
//! `force`.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

use crate::core::identifiers::AgentRunId;
use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Schema version for agent output sidecars.
pub const AGENT_OUTPUT_META_SCHEMA_VERSION: &str = "agent_output_meta.v1";

// ============================================================================
// SECTION: Sidecar
// ============================================================================

/// Sidecar metadata for one ingested agent output.
///
/// # Invariants
/// - `prompt_digest` binds the output to the exact prompt that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentOutputMeta {
    /// Sidecar schema version.
    pub schema_version: String,
    /// Digest of the prompt markdown that produced the output.
    pub prompt_digest: String,
    /// Driver-assigned agent run identifier.
    pub agent_run_id: AgentRunId,
    /// Instant the output was ingested.
    pub ingested_at: Timestamp,
    /// Path the output was ingested from.
    pub source_input_path: String,
    /// Instant the agent started, when reported.
    pub started_at: Option<Timestamp>,
    /// Instant the agent finished, when reported.
    pub finished_at: Option<Timestamp>,
    /// Model label reported by the driver.
    pub model: Option<String>,
}

impl AgentOutputMeta {
    /// Creates a sidecar binding an output to a prompt digest.
    #[must_use]
    pub fn new(
        prompt_digest: String,
        agent_run_id: AgentRunId,
        ingested_at: Timestamp,
        source_input_path: String,
    ) -> Self {
        Self {
            schema_version: AGENT_OUTPUT_META_SCHEMA_VERSION.to_string(),
            prompt_digest,
            agent_run_id,
            ingested_at,
            source_input_path,
            started_at: None,
            finished_at: None,
            model: None,
        }
    }
}
