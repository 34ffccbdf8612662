// crates/deep-research-core/src/core/stage.rs
// ============================================================================
// Module: Deep Research Pipeline Stages
// Description: Stage enum for the research pipeline.
// Purpose: Provide stable stage names used by the manifest and stage machine.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! Stages name the phases of the research pipeline. The legal-transition
//! graph lives in the runtime advance module; this type only carries the
//! stable names and ordering metadata.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;
use std::str::FromStr;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

// ============================================================================
// SECTION: Stage Enum
// ============================================================================

/// Pipeline stage for a research run.
///
/// # Invariants
/// - Variants are stable for serialization and contract matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Run created; no research has started.
    Init,
    /// Research perspectives are being drafted and merged.
    Perspectives,
    /// First research wave executes one agent per perspective.
    Wave1,
    /// Pivot analysis identifies gaps and follow-up angles.
    Pivot,
    /// Second research wave covers pivot follow-ups.
    Wave2,
    /// Citations are extracted and validated.
    Citations,
    /// Per-perspective summaries are produced.
    Summaries,
    /// The final synthesis document is composed.
    Synthesis,
    /// The synthesis is reviewed against acceptance gates.
    Review,
    /// Final artifacts are sealed.
    Finalize,
    /// Run is complete.
    Done,
}

/// All stages in pipeline order.
pub const ALL_STAGES: [Stage; 11] = [
    Stage::Init,
    Stage::Perspectives,
    Stage::Wave1,
    Stage::Pivot,
    Stage::Wave2,
    Stage::Citations,
    Stage::Summaries,
    Stage::Synthesis,
    Stage::Review,
    Stage::Finalize,
    Stage::Done,
];

impl Stage {
    /// Returns the stable wire label for the stage.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Perspectives => "perspectives",
            Self::Wave1 => "wave1",
            Self::Pivot => "pivot",
            Self::Wave2 => "wave2",
            Self::Citations => "citations",
            Self::Summaries => "summaries",
            Self::Synthesis => "synthesis",
            Self::Review => "review",
            Self::Finalize => "finalize",
            Self::Done => "done",
        }
    }

    /// Returns true when the stage is terminal.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Done)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// SECTION: Parsing
// ============================================================================

/// Error raised when parsing an unknown stage label.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown stage: {0}")]
pub struct StageParseError(pub String);

impl FromStr for Stage {
    type Err = StageParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        ALL_STAGES
            .into_iter()
            .find(|stage| stage.as_str() == value)
            .ok_or_else(|| StageParseError(value.to_string()))
    }
}
