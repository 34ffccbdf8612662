// crates/deep-research-core/src/core/perspective.rs
// ============================================================================
// Module: Deep Research Perspectives
// Description: Research angles, prompt contracts, and wave plans.
// Purpose: Model the perspective documents and digest-pinned wave plans.
// Dependencies: crate::core::{hashing, identifiers}, serde
// ============================================================================

//! ## Overview
//! Perspectives are the ordered research angles a run fans out over. A wave
//! plan pins the perspectives document it was generated from via a canonical
//! digest; the moment the document changes, every dependent plan is stale and
//! its agent outputs must be re-acquired.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

use crate::core::hashing::HashError;
use crate::core::hashing::digest_value;
use crate::core::identifiers::PerspectiveId;
use crate::core::identifiers::RunId;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Schema version for the perspectives document.
pub const PERSPECTIVES_SCHEMA_VERSION: &str = "perspectives.v1";
/// Schema version for wave plan documents.
pub const WAVE_PLAN_SCHEMA_VERSION: &str = "wave_plan.v1";

// ============================================================================
// SECTION: Tracks
// ============================================================================

/// Research track classification for a perspective.
///
/// # Invariants
/// - Variants are stable for serialization and contract matching.
/// - Track weights order merged perspectives deterministically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Track {
    /// Mainstream coverage of the query.
    Standard,
    /// Independent or primary-source coverage.
    Independent,
    /// Deliberately contrarian coverage.
    Contrarian,
}

impl Track {
    /// Returns the stable wire label for the track.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Standard => "standard",
            Self::Independent => "independent",
            Self::Contrarian => "contrarian",
        }
    }

    /// Returns the deterministic ordering weight for the track.
    #[must_use]
    pub const fn weight(self) -> u8 {
        match self {
            Self::Standard => 0,
            Self::Independent => 1,
            Self::Contrarian => 2,
        }
    }
}

// ============================================================================
// SECTION: Prompt Contract
// ============================================================================

/// Output contract enforced on every agent prompt for a perspective.
///
/// # Invariants
/// - All caps are > 0 in validated documents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptContract {
    /// Maximum words in the agent's markdown output.
    pub max_words: u32,
    /// Maximum distinct sources the agent may cite.
    pub max_sources: u32,
    /// Tool-call budget for the agent.
    pub tool_budget: u32,
    /// Section headings the output must include.
    #[serde(default)]
    pub must_include_sections: Vec<String>,
}

/// Tool usage policy attached to a perspective.
///
/// # Invariants
/// - A tool never appears in more than one of the three lists.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ToolPolicy {
    /// Tools the agent should prefer.
    #[serde(default)]
    pub primary: Vec<String>,
    /// Tools the agent may fall back to.
    #[serde(default)]
    pub secondary: Vec<String>,
    /// Tools the agent must not use.
    #[serde(default)]
    pub forbidden: Vec<String>,
}

// ============================================================================
// SECTION: Perspectives Document
// ============================================================================

/// One research angle in the promoted perspectives document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Perspective {
    /// Perspective identifier (path-safe).
    pub id: PerspectiveId,
    /// Human title of the angle.
    pub title: String,
    /// Subject domain used for deterministic ordering.
    pub domain: String,
    /// Research track.
    pub track: Track,
    /// Agent type label requested for this angle.
    pub agent_type: String,
    /// Research questions the agent must address.
    #[serde(default)]
    pub questions: Vec<String>,
    /// Output contract for the agent.
    pub prompt_contract: PromptContract,
    /// Platforms the agent must consult.
    #[serde(default)]
    pub platform_requirements: Vec<String>,
    /// Tool usage policy.
    #[serde(default)]
    pub tool_policy: ToolPolicy,
}

/// Promoted perspectives document (`perspectives.json`).
///
/// # Invariants
/// - `perspectives` is ordered by `(track weight, domain, title)`.
/// - Perspective identifiers are unique.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerspectivesDoc {
    /// Perspectives schema version.
    pub schema_version: String,
    /// Run the document belongs to.
    pub run_id: RunId,
    /// Ordered research angles.
    pub perspectives: Vec<Perspective>,
}

impl PerspectivesDoc {
    /// Returns the canonical digest pinning this document.
    ///
    /// # Errors
    ///
    /// Returns [`HashError`] when canonicalization fails.
    pub fn digest(&self) -> Result<String, HashError> {
        digest_value(self)
    }

    /// Finds a perspective by identifier.
    #[must_use]
    pub fn find(&self, id: &PerspectiveId) -> Option<&Perspective> {
        self.perspectives.iter().find(|perspective| &perspective.id == id)
    }
}

// ============================================================================
// SECTION: Candidate Documents
// ============================================================================

/// Flags attached to a perspective candidate by the drafting agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CandidateFlags {
    /// Candidate requires a human review before promotion.
    #[serde(default)]
    pub human_review_required: bool,
}

/// One perspective candidate produced by a drafting agent.
///
/// # Invariants
/// - `id` is optional; the merge assigns deterministic identifiers when
///   absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerspectiveCandidate {
    /// Optional proposed identifier.
    pub id: Option<PerspectiveId>,
    /// Human title of the angle.
    pub title: String,
    /// Subject domain.
    pub domain: String,
    /// Research track.
    pub track: Track,
    /// Agent type label.
    pub agent_type: String,
    /// Research questions.
    #[serde(default)]
    pub questions: Vec<String>,
    /// Output contract.
    pub prompt_contract: PromptContract,
    /// Platforms to consult.
    #[serde(default)]
    pub platform_requirements: Vec<String>,
    /// Tool usage policy.
    #[serde(default)]
    pub tool_policy: ToolPolicy,
    /// Drafting-agent flags.
    #[serde(default)]
    pub flags: CandidateFlags,
}

/// Normalized candidate document ingested from one drafting agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateDoc {
    /// Run the candidates target; must match the manifest.
    pub run_id: RunId,
    /// Candidate angles.
    pub candidates: Vec<PerspectiveCandidate>,
}

// ============================================================================
// SECTION: Wave Plans
// ============================================================================

/// One entry of a wave plan: a perspective and its rendered prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WavePlanEntry {
    /// Perspective the prompt targets.
    pub perspective_id: PerspectiveId,
    /// Rendered prompt markdown for the agent.
    pub prompt_md: String,
}

/// Wave plan document (`wave-N/waveN-plan.json`).
///
/// # Invariants
/// - `perspectives_digest` pins the perspectives document the plan was
///   rendered from; a mismatch makes the plan stale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WavePlan {
    /// Wave plan schema version.
    pub schema_version: String,
    /// Wave number (1 or 2).
    pub wave: u8,
    /// Canonical digest of the source perspectives document.
    pub perspectives_digest: String,
    /// Ordered plan entries.
    pub entries: Vec<WavePlanEntry>,
}

impl WavePlan {
    /// Finds the plan entry for a perspective.
    #[must_use]
    pub fn entry(&self, id: &PerspectiveId) -> Option<&WavePlanEntry> {
        self.entries.iter().find(|entry| &entry.perspective_id == id)
    }

    /// Returns true when the plan no longer matches the current perspectives
    /// digest.
    #[must_use]
    pub fn is_stale(&self, current_digest: &str) -> bool {
        self.perspectives_digest != current_digest
    }
}
