// crates/deep-research-core/src/core/manifest.rs
// ============================================================================
// Module: Deep Research Run Manifest
// Description: Durable run state document and its invariants.
// Purpose: Single source of truth for one run's lifecycle, stage, and layout.
// Dependencies: crate::core::{identifiers, stage, time}, serde
// ============================================================================

//! ## Overview
//! The manifest is the single source of truth for live run state. Every
//! mutation flows through the durable store, which bumps `revision` by
//! exactly one and keeps `updated_at` monotone. The manifest must be treated
//! as untrusted on load; [`Manifest::validate`] enforces the structural
//! invariants before any engine code consumes it.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::Component;
use std::path::Path;
use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

use crate::core::identifiers::RunId;
use crate::core::stage::Stage;
use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Schema version for the manifest document.
pub const MANIFEST_SCHEMA_VERSION: &str = "manifest.v1";

// ============================================================================
// SECTION: Run Status
// ============================================================================

/// Run lifecycle status.
///
/// # Invariants
/// - Variants are stable for serialization and contract matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Run is active and accepting ticks.
    Running,
    /// Run is paused by an operator; ticks are rejected.
    Paused,
    /// Run has completed successfully.
    Completed,
    /// Run has failed.
    Failed,
    /// Run was cancelled by an operator.
    Cancelled,
}

impl RunStatus {
    /// Returns the stable wire label for the status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Returns true when the status terminates the run.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

// ============================================================================
// SECTION: Stage State
// ============================================================================

/// One recorded stage transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageTransition {
    /// Stage the run left.
    pub from: Stage,
    /// Stage the run entered.
    pub to: Stage,
    /// Instant the transition was committed.
    pub at: Timestamp,
}

/// Current stage pointer with transition history.
///
/// # Invariants
/// - `history` is append-only and ordered by commit time.
/// - `last_progress_at` is updated on every committed transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageState {
    /// Stage the run is currently in.
    pub current: Stage,
    /// Instant the current stage was entered.
    pub started_at: Timestamp,
    /// Instant of the most recent committed progress.
    pub last_progress_at: Timestamp,
    /// Ordered transition history.
    pub history: Vec<StageTransition>,
}

// ============================================================================
// SECTION: Query
// ============================================================================

/// Sensitivity classification for the research query.
///
/// # Invariants
/// - Variants are stable for serialization and contract matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sensitivity {
    /// Normal query; all research tools are permitted.
    #[default]
    Normal,
    /// Restricted query; tool policies narrow the allowed surfaces.
    Restricted,
    /// Web access is forbidden for this query.
    NoWeb,
}

/// Research query carried by the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuerySpec {
    /// Query text supplied at init.
    pub text: String,
    /// Sensitivity classification.
    #[serde(default)]
    pub sensitivity: Sensitivity,
    /// Free-form operator constraints applied to every prompt.
    #[serde(default)]
    pub constraints: Vec<String>,
}

// ============================================================================
// SECTION: Limits
// ============================================================================

/// Hard caps applied to run fan-out and artifact sizes.
///
/// # Invariants
/// - All caps are enforced fail-closed by the stage procedures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunLimits {
    /// Maximum number of wave-1 agents.
    pub max_wave1_agents: u32,
    /// Maximum number of wave-2 agents.
    pub max_wave2_agents: u32,
    /// Maximum size of one per-perspective summary, in bytes.
    pub max_summary_bytes: u64,
    /// Maximum review iterations before the run halts for triage.
    pub max_review_iterations: u32,
}

impl Default for RunLimits {
    fn default() -> Self {
        Self {
            max_wave1_agents: 5,
            max_wave2_agents: 3,
            max_summary_bytes: 16 * 1024,
            max_review_iterations: 2,
        }
    }
}

// ============================================================================
// SECTION: Artifact Layout
// ============================================================================

/// Relative sub-paths for run artifacts inside the run root.
///
/// # Invariants
/// - All values are relative, non-escaping paths (no `..`, no absolute
///   components).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactPaths {
    /// Gates document.
    pub gates: String,
    /// Promoted perspectives document.
    pub perspectives: String,
    /// Logs directory (ledger, telemetry, audit, checkpoints).
    pub logs_dir: String,
    /// Wave-1 plan and outputs directory.
    pub wave1_dir: String,
    /// Wave-2 plan and outputs directory.
    pub wave2_dir: String,
    /// Citations directory (url map, citation records, fixtures).
    pub citations_dir: String,
    /// Per-perspective summaries directory.
    pub summaries_dir: String,
    /// Synthesis directory.
    pub synthesis_dir: String,
    /// Review bundle directory.
    pub review_dir: String,
    /// Retry directives directory.
    pub retry_dir: String,
    /// Operator prompts, outputs, state, drafts, and halt directory.
    pub operator_dir: String,
}

impl Default for ArtifactPaths {
    fn default() -> Self {
        Self {
            gates: "gates.json".to_string(),
            perspectives: "perspectives.json".to_string(),
            logs_dir: "logs".to_string(),
            wave1_dir: "wave-1".to_string(),
            wave2_dir: "wave-2".to_string(),
            citations_dir: "citations".to_string(),
            summaries_dir: "summaries".to_string(),
            synthesis_dir: "synthesis".to_string(),
            review_dir: "review".to_string(),
            retry_dir: "retry".to_string(),
            operator_dir: "operator".to_string(),
        }
    }
}

impl ArtifactPaths {
    /// Returns `(name, value)` pairs for every configured sub-path.
    #[must_use]
    pub fn entries(&self) -> Vec<(&'static str, &str)> {
        vec![
            ("gates", self.gates.as_str()),
            ("perspectives", self.perspectives.as_str()),
            ("logs_dir", self.logs_dir.as_str()),
            ("wave1_dir", self.wave1_dir.as_str()),
            ("wave2_dir", self.wave2_dir.as_str()),
            ("citations_dir", self.citations_dir.as_str()),
            ("summaries_dir", self.summaries_dir.as_str()),
            ("synthesis_dir", self.synthesis_dir.as_str()),
            ("review_dir", self.review_dir.as_str()),
            ("retry_dir", self.retry_dir.as_str()),
            ("operator_dir", self.operator_dir.as_str()),
        ]
    }
}

/// Artifact section of the manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactsSection {
    /// Absolute run root directory.
    pub root: PathBuf,
    /// Relative sub-paths inside the root.
    #[serde(default)]
    pub paths: ArtifactPaths,
}

// ============================================================================
// SECTION: Manifest
// ============================================================================

/// Durable run manifest, the single source of truth for live run state.
///
/// # Invariants
/// - `revision` is >= 1 and bumps by exactly one per mutating write.
/// - `updated_at` is monotone non-decreasing across writes.
/// - `artifacts.root` is absolute; every relative sub-path is non-escaping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    /// Manifest schema version.
    pub schema_version: String,
    /// Run identifier.
    pub run_id: RunId,
    /// Instant the run was created.
    pub created_at: Timestamp,
    /// Instant of the most recent mutating write.
    pub updated_at: Timestamp,
    /// Monotonic document revision, starting at 1.
    pub revision: u64,
    /// Run lifecycle status.
    pub status: RunStatus,
    /// Current stage state with history.
    pub stage: StageState,
    /// Research query.
    pub query: QuerySpec,
    /// Fan-out and size limits.
    #[serde(default)]
    pub limits: RunLimits,
    /// Artifact root and layout.
    pub artifacts: ArtifactsSection,
}

impl Manifest {
    /// Creates a fresh manifest at revision 1 in the `init` stage.
    #[must_use]
    pub fn new(run_id: RunId, query: QuerySpec, root: PathBuf, now: Timestamp) -> Self {
        Self {
            schema_version: MANIFEST_SCHEMA_VERSION.to_string(),
            run_id,
            created_at: now,
            updated_at: now,
            revision: 1,
            status: RunStatus::Running,
            stage: StageState {
                current: Stage::Init,
                started_at: now,
                last_progress_at: now,
                history: Vec::new(),
            },
            query,
            limits: RunLimits::default(),
            artifacts: ArtifactsSection {
                root,
                paths: ArtifactPaths::default(),
            },
        }
    }

    /// Validates the structural manifest invariants.
    ///
    /// # Errors
    ///
    /// Returns [`ManifestError`] when any invariant is violated.
    pub fn validate(&self) -> Result<(), ManifestError> {
        if self.schema_version != MANIFEST_SCHEMA_VERSION {
            return Err(ManifestError::SchemaVersion {
                found: self.schema_version.clone(),
            });
        }
        if self.revision == 0 {
            return Err(ManifestError::RevisionZero);
        }
        if !self.artifacts.root.is_absolute() {
            return Err(ManifestError::RootNotAbsolute(self.artifacts.root.clone()));
        }
        if self.updated_at < self.created_at {
            return Err(ManifestError::UpdatedBeforeCreated);
        }
        for (name, value) in self.artifacts.paths.entries() {
            validate_relative_path(name, value)?;
        }
        Ok(())
    }
}

/// Rejects escaping or absolute artifact sub-paths.
fn validate_relative_path(name: &'static str, value: &str) -> Result<(), ManifestError> {
    if value.is_empty() {
        return Err(ManifestError::EscapingPath {
            name,
            value: value.to_string(),
        });
    }
    let path = Path::new(value);
    if path.is_absolute() {
        return Err(ManifestError::EscapingPath {
            name,
            value: value.to_string(),
        });
    }
    for component in path.components() {
        match component {
            Component::Normal(_) => {}
            _ => {
                return Err(ManifestError::EscapingPath {
                    name,
                    value: value.to_string(),
                });
            }
        }
    }
    Ok(())
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Manifest invariant violations.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
#[derive(Debug, Error)]
pub enum ManifestError {
    /// Manifest schema version is not supported.
    #[error("unsupported manifest schema version: {found}")]
    SchemaVersion {
        /// Schema version found in the document.
        found: String,
    },
    /// Manifest revision is zero.
    #[error("manifest revision must be >= 1")]
    RevisionZero,
    /// Artifact root is not an absolute path.
    #[error("artifacts.root must be absolute: {0}")]
    RootNotAbsolute(PathBuf),
    /// `updated_at` precedes `created_at`.
    #[error("manifest updated_at precedes created_at")]
    UpdatedBeforeCreated,
    /// An artifact sub-path is absolute, empty, or escaping.
    #[error("artifacts.paths.{name} must be a relative, non-escaping path: {value}")]
    EscapingPath {
        /// Name of the offending layout entry.
        name: &'static str,
        /// Offending path value.
        value: String,
    },
}
