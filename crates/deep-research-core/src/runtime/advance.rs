// crates/deep-research-core/src/runtime/advance.rs
// ============================================================================
// Module: Deep Research Stage Machine
// Description: Legal-transition graph and precondition evaluator.
// Purpose: Decide stage advancement deterministically and surface blockers.
// Dependencies: crate::core, serde, serde_json
// ============================================================================

//! ## Overview
//! The stage machine owns the legal-transition graph and evaluates the
//! declared checks for a requested transition. Evaluation is pure with
//! respect to run state: artifact checks read the filesystem but nothing is
//! mutated, so a dry run surfaces the exact blocker set. The caller commits
//! a successful decision by applying [`transition_patch`] through the
//! durable store.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs;
use std::path::Path;
use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use serde_json::json;
use thiserror::Error;

use crate::core::errors::ErrorCode;
use crate::core::gates::GateId;
use crate::core::gates::GateStatus;
use crate::core::gates::GatesDoc;
use crate::core::halt::HaltBlockers;
use crate::core::layout::RunLayout;
use crate::core::manifest::Manifest;
use crate::core::manifest::StageTransition;
use crate::core::stage::Stage;
use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Custom Predicates
// ============================================================================

/// Stable names for custom transition predicates.
pub mod predicates {
    /// Retry directives exist and are unconsumed (wave1 self-edge).
    pub const RETRY_DIRECTIVES_PRESENT: &str = "retry_directives_present";
    /// Every wave-1 plan entry has a digest-fresh output.
    pub const WAVE1_OUTPUTS_COMPLETE: &str = "wave1_outputs_complete";
    /// Every wave-2 plan entry has a digest-fresh output.
    pub const WAVE2_OUTPUTS_COMPLETE: &str = "wave2_outputs_complete";
    /// Every perspective has a summary within the size cap.
    pub const SUMMARIES_COMPLETE: &str = "summaries_complete";
    /// Gate D flipped back to fail after review (review → wave2 regression).
    pub const GATE_D_REOPENED: &str = "gate_d_reopened";
    /// The reviewer requested a synthesis scaffold rewrite.
    pub const SCAFFOLD_REWRITE_REQUESTED: &str = "scaffold_rewrite_requested";
}

/// Evaluator for custom transition predicates.
///
/// # Invariants
/// - Unknown predicate names fail closed.
pub trait CustomPredicate {
    /// Returns whether the named predicate holds.
    ///
    /// # Errors
    ///
    /// Returns a reason string when the predicate cannot be evaluated; the
    /// check is treated as failed.
    fn holds(&self, name: &str) -> Result<bool, String>;
}

/// Predicate evaluator that fails every custom check closed.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCustomPredicates;

impl CustomPredicate for NoCustomPredicates {
    fn holds(&self, name: &str) -> Result<bool, String> {
        Err(format!("no evaluator registered for predicate: {name}"))
    }
}

// ============================================================================
// SECTION: Checks
// ============================================================================

/// One declared precondition for a transition.
///
/// # Invariants
/// - Variants form a closed sum; decision details never require string
///   parsing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Check {
    /// A named artifact must exist and parse.
    Artifact {
        /// Stable check name.
        name: String,
        /// Run-root-relative display path.
        path: String,
    },
    /// A named gate must be `pass`.
    Gate {
        /// Gate identifier.
        id: GateId,
    },
    /// A named predicate must hold.
    Custom {
        /// Stable predicate name.
        name: String,
    },
}

/// Outcome of one evaluated check.
///
/// # Invariants
/// - Variants are stable for serialization and contract matching.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CheckStatus {
    /// Check passed.
    Ok,
    /// Check failed with a reason.
    Failed {
        /// Human-readable failure reason.
        reason: String,
    },
}

/// One check with its evaluation outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluatedCheck {
    /// The declared check.
    pub check: Check,
    /// Evaluation outcome.
    pub outcome: CheckStatus,
}

impl EvaluatedCheck {
    /// Returns true when the check passed.
    #[must_use]
    pub const fn is_ok(&self) -> bool {
        matches!(self.outcome, CheckStatus::Ok)
    }
}

/// Evaluated decision for one transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionDecision {
    /// Stage the transition leaves.
    pub from: Stage,
    /// Stage the transition enters.
    pub to: Stage,
    /// Every declared check with its outcome.
    pub evaluated: Vec<EvaluatedCheck>,
}

impl TransitionDecision {
    /// Returns true when every check passed.
    #[must_use]
    pub fn is_allowed(&self) -> bool {
        self.evaluated.iter().all(EvaluatedCheck::is_ok)
    }

    /// Folds failed checks into halt blockers.
    #[must_use]
    pub fn blockers(&self) -> HaltBlockers {
        let mut blockers = HaltBlockers::default();
        for entry in &self.evaluated {
            if entry.is_ok() {
                continue;
            }
            match &entry.check {
                Check::Artifact { path, .. } => {
                    blockers.missing_artifacts.push(path.clone());
                }
                Check::Gate { id } => {
                    blockers.blocked_gates.push(id.as_str().to_string());
                }
                Check::Custom { name } => {
                    blockers.failed_checks.push(name.clone());
                }
            }
        }
        blockers
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Stage machine errors.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
#[derive(Debug, Error)]
pub enum AdvanceError {
    /// The transition's checks did not all pass.
    #[error("stage advance blocked: {} -> {}", decision.from, decision.to)]
    Blocked {
        /// Full decision with the evaluated check list.
        decision: TransitionDecision,
    },
    /// Multiple edges exist and `requested_next` was not supplied.
    #[error("stage {from} has multiple next stages; requested_next is required")]
    AmbiguousNext {
        /// Current stage.
        from: Stage,
        /// Candidate next stages.
        candidates: Vec<Stage>,
    },
    /// The requested transition is not a declared edge.
    #[error("no transition declared from {from} to {to}")]
    UnknownTransition {
        /// Current stage.
        from: Stage,
        /// Requested next stage.
        to: Stage,
    },
    /// The current stage is terminal.
    #[error("stage {0} is terminal")]
    Terminal(Stage),
}

impl AdvanceError {
    /// Returns the stable code for the error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Blocked { .. } => ErrorCode::StageAdvanceBlocked,
            Self::AmbiguousNext { .. } | Self::UnknownTransition { .. } => ErrorCode::InvalidArgs,
            Self::Terminal(_) => ErrorCode::InvalidState,
        }
    }
}

// ============================================================================
// SECTION: Transition Graph
// ============================================================================

/// Returns every declared edge from a stage, canonical edge first.
#[must_use]
pub fn edges_from(stage: Stage) -> Vec<Stage> {
    match stage {
        Stage::Init => vec![Stage::Perspectives, Stage::Wave1],
        Stage::Perspectives => vec![Stage::Wave1],
        Stage::Wave1 => vec![Stage::Pivot, Stage::Wave1],
        Stage::Pivot => vec![Stage::Wave2],
        Stage::Wave2 => vec![Stage::Citations],
        Stage::Citations => vec![Stage::Summaries],
        Stage::Summaries => vec![Stage::Synthesis],
        Stage::Synthesis => vec![Stage::Review],
        Stage::Review => vec![Stage::Finalize, Stage::Wave2, Stage::Synthesis],
        Stage::Finalize => vec![Stage::Done],
        Stage::Done => Vec::new(),
    }
}

/// Stages whose extra edges are only taken by explicit request.
///
/// The canonical next stage is the first declared edge; `init` and `wave1`
/// keep a unique inferred edge, while `review` requires an explicit request.
fn infer_next(from: Stage) -> Result<Stage, AdvanceError> {
    let candidates = edges_from(from);
    match from {
        Stage::Done => Err(AdvanceError::Terminal(from)),
        Stage::Review => Err(AdvanceError::AmbiguousNext {
            from,
            candidates,
        }),
        _ => candidates.first().copied().ok_or(AdvanceError::Terminal(from)),
    }
}

/// Returns the declared checks for a transition.
fn checks_for(layout: &RunLayout, from: Stage, to: Stage) -> Vec<Check> {
    /// Shorthand building an artifact check with a run-root-relative path.
    fn artifact(name: &str, root: &Path, path: PathBuf) -> Check {
        let display = path.strip_prefix(root).unwrap_or(&path).to_string_lossy().into_owned();
        Check::Artifact {
            name: name.to_string(),
            path: display,
        }
    }
    /// Shorthand building a custom predicate check.
    fn custom(name: &str) -> Check {
        Check::Custom {
            name: name.to_string(),
        }
    }

    let root = layout.root().as_path();
    match (from, to) {
        (Stage::Init, Stage::Perspectives) => Vec::new(),
        (Stage::Init | Stage::Perspectives, Stage::Wave1) => {
            let mut checks = vec![
                artifact("perspectives", root, layout.perspectives_path()),
                artifact("wave1_plan", root, layout.wave_plan_path(1)),
            ];
            if from == Stage::Perspectives {
                checks.insert(0, Check::Gate {
                    id: GateId::A,
                });
            }
            checks
        }
        (Stage::Wave1, Stage::Pivot) => vec![
            Check::Gate {
                id: GateId::B,
            },
            custom(predicates::WAVE1_OUTPUTS_COMPLETE),
        ],
        (Stage::Wave1, Stage::Wave1) => vec![custom(predicates::RETRY_DIRECTIVES_PRESENT)],
        (Stage::Pivot, Stage::Wave2) => vec![
            Check::Gate {
                id: GateId::C,
            },
            artifact("wave2_plan", root, layout.wave_plan_path(2)),
        ],
        (Stage::Wave2, Stage::Citations) => vec![
            Check::Gate {
                id: GateId::D,
            },
            custom(predicates::WAVE2_OUTPUTS_COMPLETE),
        ],
        (Stage::Citations, Stage::Summaries) => vec![
            artifact("url_map", root, layout.url_map_path()),
            artifact("citations", root, layout.citations_records_path()),
        ],
        (Stage::Summaries, Stage::Synthesis) => vec![custom(predicates::SUMMARIES_COMPLETE)],
        (Stage::Synthesis, Stage::Review) => {
            vec![artifact("final_synthesis", root, layout.synthesis_path())]
        }
        (Stage::Review, Stage::Finalize) => vec![
            Check::Gate {
                id: GateId::E,
            },
            Check::Gate {
                id: GateId::F,
            },
            artifact("review_bundle", root, layout.review_bundle_path()),
        ],
        (Stage::Review, Stage::Wave2) => vec![custom(predicates::GATE_D_REOPENED)],
        (Stage::Review, Stage::Synthesis) => vec![custom(predicates::SCAFFOLD_REWRITE_REQUESTED)],
        (Stage::Finalize, Stage::Done) => vec![
            Check::Gate {
                id: GateId::F,
            },
            artifact("final_synthesis", root, layout.synthesis_path()),
        ],
        _ => Vec::new(),
    }
}

// ============================================================================
// SECTION: Check Evaluation
// ============================================================================

/// Evaluates one artifact check: the path must exist and parse.
fn evaluate_artifact(root: &Path, relative: &str) -> CheckStatus {
    let path = root.join(relative);
    let bytes = match fs::read(&path) {
        Ok(bytes) => bytes,
        Err(err) => {
            return CheckStatus::Failed {
                reason: format!("artifact unreadable: {relative}: {err}"),
            };
        }
    };
    if bytes.is_empty() {
        return CheckStatus::Failed {
            reason: format!("artifact empty: {relative}"),
        };
    }
    let parse_failure = match path.extension().and_then(|ext| ext.to_str()) {
        Some("json") => serde_json::from_slice::<Value>(&bytes).err().map(|err| err.to_string()),
        Some("jsonl") => String::from_utf8(bytes.clone())
            .map_err(|err| err.to_string())
            .and_then(|text| {
                text.lines()
                    .filter(|line| !line.trim().is_empty())
                    .try_for_each(|line| {
                        serde_json::from_str::<Value>(line).map(|_| ()).map_err(|err| {
                            err.to_string()
                        })
                    })
            })
            .err(),
        _ => None,
    };
    match parse_failure {
        Some(reason) => CheckStatus::Failed {
            reason: format!("artifact failed to parse: {relative}: {reason}"),
        },
        None => CheckStatus::Ok,
    }
}

/// Evaluates one gate check.
fn evaluate_gate(gates: &GatesDoc, id: GateId) -> CheckStatus {
    let status = gates.status(id);
    if status == GateStatus::Pass {
        return CheckStatus::Ok;
    }
    CheckStatus::Failed {
        reason: format!("gate {id} is {} ({})", status.as_str(), id.description()),
    }
}

/// Evaluates one custom predicate check.
fn evaluate_custom(custom: &dyn CustomPredicate, name: &str) -> CheckStatus {
    match custom.holds(name) {
        Ok(true) => CheckStatus::Ok,
        Ok(false) => CheckStatus::Failed {
            reason: format!("predicate does not hold: {name}"),
        },
        Err(reason) => CheckStatus::Failed {
            reason,
        },
    }
}

// ============================================================================
// SECTION: Advance
// ============================================================================

/// Evaluation context for one advance decision.
pub struct AdvanceContext<'a> {
    /// Manifest snapshot the decision is evaluated against.
    pub manifest: &'a Manifest,
    /// Gates snapshot the decision is evaluated against.
    pub gates: &'a GatesDoc,
    /// Custom predicate evaluator.
    pub custom: &'a dyn CustomPredicate,
}

/// Evaluates the transition from the current stage.
///
/// The evaluation never mutates run state; callers commit the decision via
/// [`transition_patch`].
///
/// # Errors
///
/// Returns [`AdvanceError::Blocked`] carrying the full evaluated check list
/// when any check fails, and argument errors for unknown or ambiguous
/// transitions.
pub fn advance(
    ctx: &AdvanceContext<'_>,
    requested_next: Option<Stage>,
) -> Result<TransitionDecision, AdvanceError> {
    let from = ctx.manifest.stage.current;
    let to = match requested_next {
        Some(requested) => {
            if !edges_from(from).contains(&requested) {
                return Err(AdvanceError::UnknownTransition {
                    from,
                    to: requested,
                });
            }
            requested
        }
        None => infer_next(from)?,
    };

    let layout = RunLayout::from_manifest(ctx.manifest);
    let checks = checks_for(&layout, from, to);
    let evaluated = checks
        .into_iter()
        .map(|check| {
            let outcome = match &check {
                Check::Artifact { path, .. } => evaluate_artifact(layout.root(), path),
                Check::Gate { id } => evaluate_gate(ctx.gates, *id),
                Check::Custom { name } => evaluate_custom(ctx.custom, name),
            };
            EvaluatedCheck {
                check,
                outcome,
            }
        })
        .collect::<Vec<EvaluatedCheck>>();

    let decision = TransitionDecision {
        from,
        to,
        evaluated,
    };
    if decision.is_allowed() {
        return Ok(decision);
    }
    Err(AdvanceError::Blocked {
        decision,
    })
}

// ============================================================================
// SECTION: Commit Patch
// ============================================================================

/// Builds the manifest patch committing an allowed decision.
///
/// The patch writes `stage.current` last alongside the history append and
/// `last_progress_at`; the `init -> wave1` shortcut records both hops.
#[must_use]
pub fn transition_patch(manifest: &Manifest, decision: &TransitionDecision, now: Timestamp) -> Value {
    let mut history = manifest.stage.history.clone();
    if decision.from == Stage::Init && decision.to == Stage::Wave1 {
        history.push(StageTransition {
            from: Stage::Init,
            to: Stage::Perspectives,
            at: now,
        });
        history.push(StageTransition {
            from: Stage::Perspectives,
            to: Stage::Wave1,
            at: now,
        });
    } else {
        history.push(StageTransition {
            from: decision.from,
            to: decision.to,
            at: now,
        });
    }
    json!({
        "stage": {
            "current": decision.to,
            "started_at": now,
            "last_progress_at": now,
            "history": history,
        }
    })
}
