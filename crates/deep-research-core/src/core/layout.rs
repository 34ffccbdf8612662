// crates/deep-research-core/src/core/layout.rs
// ============================================================================
// Module: Deep Research Run Layout
// Description: Absolute path builders for every run-root artifact.
// Purpose: Keep the on-disk layout bit-exact and defined in one place.
// Dependencies: crate::core::{identifiers, manifest, stage}
// ============================================================================

//! ## Overview
//! Every artifact path inside a run root is derived here from the manifest's
//! `artifacts` section. No other module composes artifact paths by hand, so
//! the layout contract stays bit-exact and the containment resolver has one
//! producer to police.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::PathBuf;

use crate::core::identifiers::PerspectiveId;
use crate::core::manifest::ArtifactPaths;
use crate::core::manifest::Manifest;
use crate::core::stage::Stage;

// ============================================================================
// SECTION: Run Layout
// ============================================================================

/// Absolute path builders for one run root.
///
/// # Invariants
/// - `root` is absolute; every produced path is inside it by construction.
#[derive(Debug, Clone)]
pub struct RunLayout {
    /// Absolute run root.
    root: PathBuf,
    /// Relative layout entries from the manifest.
    paths: ArtifactPaths,
}

impl RunLayout {
    /// Builds the layout from a manifest.
    #[must_use]
    pub fn from_manifest(manifest: &Manifest) -> Self {
        Self {
            root: manifest.artifacts.root.clone(),
            paths: manifest.artifacts.paths.clone(),
        }
    }

    /// Builds the layout from a run root with default sub-paths.
    #[must_use]
    pub fn from_root(root: PathBuf) -> Self {
        Self {
            root,
            paths: ArtifactPaths::default(),
        }
    }

    /// Returns the absolute run root.
    #[must_use]
    pub fn root(&self) -> &PathBuf {
        &self.root
    }

    /// Manifest document.
    #[must_use]
    pub fn manifest_path(&self) -> PathBuf {
        self.root.join("manifest.json")
    }

    /// Gates document.
    #[must_use]
    pub fn gates_path(&self) -> PathBuf {
        self.root.join(&self.paths.gates)
    }

    /// Promoted perspectives document.
    #[must_use]
    pub fn perspectives_path(&self) -> PathBuf {
        self.root.join(&self.paths.perspectives)
    }

    /// Run configuration document.
    #[must_use]
    pub fn run_config_path(&self) -> PathBuf {
        self.root.join("run-config.json")
    }

    /// Run policy document.
    #[must_use]
    pub fn policy_path(&self) -> PathBuf {
        self.root.join("run-config").join("policy.json")
    }

    /// Run metrics document.
    #[must_use]
    pub fn run_metrics_path(&self) -> PathBuf {
        self.root.join("run-metrics.json")
    }

    /// Exclusive run lock.
    #[must_use]
    pub fn lock_path(&self) -> PathBuf {
        self.root.join(".lock")
    }

    /// Wave directory for wave 1 or 2.
    #[must_use]
    pub fn wave_dir(&self, wave: u8) -> PathBuf {
        let dir = if wave == 1 { &self.paths.wave1_dir } else { &self.paths.wave2_dir };
        self.root.join(dir)
    }

    /// Wave plan document for wave 1 or 2.
    #[must_use]
    pub fn wave_plan_path(&self, wave: u8) -> PathBuf {
        self.wave_dir(wave).join(format!("wave{wave}-plan.json"))
    }

    /// Agent output markdown for a wave perspective.
    #[must_use]
    pub fn wave_output_path(&self, wave: u8, id: &PerspectiveId) -> PathBuf {
        self.wave_dir(wave).join(format!("{id}.md"))
    }

    /// Agent output sidecar for a wave perspective.
    #[must_use]
    pub fn wave_meta_path(&self, wave: u8, id: &PerspectiveId) -> PathBuf {
        self.wave_dir(wave).join(format!("{id}.meta.json"))
    }

    /// Citations directory.
    #[must_use]
    pub fn citations_dir(&self) -> PathBuf {
        self.root.join(&self.paths.citations_dir)
    }

    /// URL map produced by the citations stage.
    #[must_use]
    pub fn url_map_path(&self) -> PathBuf {
        self.citations_dir().join("url-map.json")
    }

    /// Citation records stream.
    #[must_use]
    pub fn citations_records_path(&self) -> PathBuf {
        self.citations_dir().join("citations.jsonl")
    }

    /// Blocked URLs document.
    #[must_use]
    pub fn blocked_urls_path(&self) -> PathBuf {
        self.citations_dir().join("blocked-urls.json")
    }

    /// Tokenized online fixtures capture.
    #[must_use]
    pub fn online_fixtures_path(&self, token: &str) -> PathBuf {
        self.citations_dir().join(format!("online-fixtures.{token}.json"))
    }

    /// Latest online fixtures pointer.
    #[must_use]
    pub fn online_fixtures_latest_path(&self) -> PathBuf {
        self.citations_dir().join("online-fixtures.latest.json")
    }

    /// Summaries directory.
    #[must_use]
    pub fn summaries_dir(&self) -> PathBuf {
        self.root.join(&self.paths.summaries_dir)
    }

    /// Summary markdown for a perspective.
    #[must_use]
    pub fn summary_path(&self, id: &PerspectiveId) -> PathBuf {
        self.summaries_dir().join(format!("{id}.md"))
    }

    /// Summary sidecar for a perspective.
    #[must_use]
    pub fn summary_meta_path(&self, id: &PerspectiveId) -> PathBuf {
        self.summaries_dir().join(format!("{id}.meta.json"))
    }

    /// Final synthesis markdown.
    #[must_use]
    pub fn synthesis_path(&self) -> PathBuf {
        self.root.join(&self.paths.synthesis_dir).join("final-synthesis.md")
    }

    /// Final synthesis sidecar.
    #[must_use]
    pub fn synthesis_meta_path(&self) -> PathBuf {
        self.root.join(&self.paths.synthesis_dir).join("final-synthesis.md.meta.json")
    }

    /// Review bundle document.
    #[must_use]
    pub fn review_bundle_path(&self) -> PathBuf {
        self.root.join(&self.paths.review_dir).join("review-bundle.json")
    }

    /// Retry directives document.
    #[must_use]
    pub fn retry_directives_path(&self) -> PathBuf {
        self.root.join(&self.paths.retry_dir).join("retry-directives.json")
    }

    /// Logs directory.
    #[must_use]
    pub fn logs_dir(&self) -> PathBuf {
        self.root.join(&self.paths.logs_dir)
    }

    /// Tick ledger stream.
    #[must_use]
    pub fn ticks_path(&self) -> PathBuf {
        self.logs_dir().join("ticks.jsonl")
    }

    /// Telemetry stream.
    #[must_use]
    pub fn telemetry_path(&self) -> PathBuf {
        self.logs_dir().join("telemetry.jsonl")
    }

    /// Audit stream.
    #[must_use]
    pub fn audit_path(&self) -> PathBuf {
        self.logs_dir().join("audit.jsonl")
    }

    /// Tick-in-progress marker.
    #[must_use]
    pub fn tick_marker_path(&self) -> PathBuf {
        self.logs_dir().join("tick-in-progress.json")
    }

    /// Timeout checkpoint document.
    #[must_use]
    pub fn timeout_checkpoint_path(&self) -> PathBuf {
        self.logs_dir().join("timeout-checkpoint.json")
    }

    /// Pause checkpoint note.
    #[must_use]
    pub fn pause_checkpoint_path(&self) -> PathBuf {
        self.logs_dir().join("pause-checkpoint.md")
    }

    /// Resume checkpoint note.
    #[must_use]
    pub fn resume_checkpoint_path(&self) -> PathBuf {
        self.logs_dir().join("resume-checkpoint.md")
    }

    /// Cancel checkpoint note.
    #[must_use]
    pub fn cancel_checkpoint_path(&self) -> PathBuf {
        self.logs_dir().join("cancel-checkpoint.md")
    }

    /// Operator directory.
    #[must_use]
    pub fn operator_dir(&self) -> PathBuf {
        self.root.join(&self.paths.operator_dir)
    }

    /// Operator prompt directory for a stage.
    #[must_use]
    pub fn operator_prompts_dir(&self, stage: Stage) -> PathBuf {
        self.operator_dir().join("prompts").join(stage.as_str())
    }

    /// Operator prompt file for a stage and perspective.
    #[must_use]
    pub fn operator_prompt_path(&self, stage: Stage, id: &PerspectiveId) -> PathBuf {
        self.operator_prompts_dir(stage).join(format!("{id}.md"))
    }

    /// Operator perspectives output directory.
    #[must_use]
    pub fn operator_perspectives_dir(&self) -> PathBuf {
        self.operator_dir().join("outputs").join("perspectives")
    }

    /// Normalized perspectives output for one drafting agent.
    #[must_use]
    pub fn operator_perspective_output_path(&self, id: &PerspectiveId) -> PathBuf {
        self.operator_perspectives_dir().join(format!("{id}.json"))
    }

    /// Sidecar for one normalized perspectives output.
    #[must_use]
    pub fn operator_perspective_meta_path(&self, id: &PerspectiveId) -> PathBuf {
        self.operator_perspectives_dir().join(format!("{id}.meta.json"))
    }

    /// Raw (pre-normalization) perspectives output copy.
    #[must_use]
    pub fn operator_perspective_raw_path(&self, id: &PerspectiveId) -> PathBuf {
        self.operator_perspectives_dir().join(format!("{id}.raw.json"))
    }

    /// Perspectives collection state document.
    #[must_use]
    pub fn perspectives_state_path(&self) -> PathBuf {
        self.operator_dir().join("state").join("perspectives-state.json")
    }

    /// Perspectives merge draft awaiting human review.
    #[must_use]
    pub fn perspectives_draft_path(&self) -> PathBuf {
        self.operator_dir().join("drafts").join("perspectives.draft.json")
    }

    /// Halt directory.
    #[must_use]
    pub fn halt_dir(&self) -> PathBuf {
        self.operator_dir().join("halt")
    }

    /// Tick-indexed halt artifact.
    #[must_use]
    pub fn halt_tick_path(&self, tick_index: u64) -> PathBuf {
        self.halt_dir().join(format!("tick-{tick_index:04}.json"))
    }

    /// Latest halt artifact pointer.
    #[must_use]
    pub fn halt_latest_path(&self) -> PathBuf {
        self.halt_dir().join("latest.json")
    }
}
