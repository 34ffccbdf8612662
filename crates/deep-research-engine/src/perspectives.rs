// crates/deep-research-engine/src/perspectives.rs
// ============================================================================
// Module: Perspectives Merge and Promotion
// Description: Deterministic candidate merge, prompt rendering, and wave
//              plans.
// Purpose: Turn drafted perspective candidates into the promoted document and
//          digest-pinned wave plans.
// Dependencies: deep-research-core, deep-research-store, serde
// ============================================================================

//! ## Overview
//! The merge coalesces candidates by the canonical key
//! `sha256(track ‖ title ‖ questions)`, set-unions list fields, and orders
//! the result by `(track weight, domain, title)`. Any candidate flagged for
//! human review holds the merge in `awaiting_human_review` instead of
//! promoting. Promotion writes the perspectives document and regenerates the
//! wave-1 plan pinned to its digest.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::fmt::Write as _;

use deep_research_core::CandidateDoc;
use deep_research_core::CodedError;
use deep_research_core::ErrorCode;
use deep_research_core::PERSPECTIVES_SCHEMA_VERSION;
use deep_research_core::Perspective;
use deep_research_core::PerspectiveCandidate;
use deep_research_core::PerspectiveId;
use deep_research_core::PerspectivesDoc;
use deep_research_core::QuerySpec;
use deep_research_core::RunId;
use deep_research_core::Timestamp;
use deep_research_core::ToolPolicy;
use deep_research_core::WAVE_PLAN_SCHEMA_VERSION;
use deep_research_core::WavePlan;
use deep_research_core::WavePlanEntry;
use deep_research_core::digest_value;
use serde::Deserialize;
use serde::Serialize;

use crate::error::EngineError;

// ============================================================================
// SECTION: Perspectives State
// ============================================================================

/// Schema version for the perspectives collection state document.
pub const PERSPECTIVES_STATE_SCHEMA_VERSION: &str = "perspectives_state.v1";

/// Collection status for perspective drafting.
///
/// # Invariants
/// - Variants are stable for serialization and contract matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PerspectivesStateStatus {
    /// Candidate documents are still being ingested.
    Collecting,
    /// The merge is held for human review.
    AwaitingHumanReview,
    /// The merged document was promoted.
    Promoted,
}

/// Durable perspectives collection state
/// (`operator/state/perspectives-state.json`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerspectivesState {
    /// State schema version.
    pub schema_version: String,
    /// Collection status.
    pub status: PerspectivesStateStatus,
    /// Drafting agents whose candidates have been ingested.
    pub ingested: Vec<String>,
    /// Digest of the merged document, once promoted.
    pub merged_digest: Option<String>,
    /// Instant of the last state change.
    pub updated_at: Timestamp,
}

impl PerspectivesState {
    /// Creates a collecting state.
    #[must_use]
    pub fn collecting(now: Timestamp) -> Self {
        Self {
            schema_version: PERSPECTIVES_STATE_SCHEMA_VERSION.to_string(),
            status: PerspectivesStateStatus::Collecting,
            ingested: Vec::new(),
            merged_digest: None,
            updated_at: now,
        }
    }
}

// ============================================================================
// SECTION: Merge
// ============================================================================

/// Merge result status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeStatus {
    /// The merged document may be promoted.
    Promoted,
    /// A candidate demands human review before promotion.
    AwaitingHumanReview,
}

/// Outcome of a deterministic candidate merge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeOutcome {
    /// Merge status.
    pub status: MergeStatus,
    /// Merged document (a draft when awaiting review).
    pub doc: PerspectivesDoc,
}

/// Merges candidate documents deterministically.
///
/// Duplicates coalesce by `sha256(track ‖ title ‖ questions)`; list fields
/// are set-unioned then sorted; ordering is `(track weight, domain, title)`.
///
/// # Errors
///
/// Returns [`EngineError`] when a candidate is invalid or hashing fails.
pub fn merge_candidates(
    run_id: &RunId,
    docs: &[CandidateDoc],
) -> Result<MergeOutcome, EngineError> {
    let mut merged: BTreeMap<String, PerspectiveCandidate> = BTreeMap::new();
    let mut human_review = false;

    for doc in docs {
        if &doc.run_id != run_id {
            return Err(EngineError::Coded(CodedError::new(
                ErrorCode::PerspectivesOutputInvalid,
                format!("candidate doc targets run {} but this run is {run_id}", doc.run_id),
            )));
        }
        for candidate in &doc.candidates {
            human_review = human_review || candidate.flags.human_review_required;
            let key = digest_value(&(
                candidate.track.as_str(),
                candidate.title.as_str(),
                &candidate.questions,
            ))?;
            match merged.get_mut(&key) {
                Some(existing) => coalesce(existing, candidate),
                None => {
                    merged.insert(key, candidate.clone());
                }
            }
        }
    }

    let mut candidates: Vec<PerspectiveCandidate> = merged.into_values().collect();
    candidates.sort_by(|a, b| {
        (a.track.weight(), a.domain.as_str(), a.title.as_str()).cmp(&(
            b.track.weight(),
            b.domain.as_str(),
            b.title.as_str(),
        ))
    });

    let perspectives = assign_identifiers(candidates)?;
    let doc = PerspectivesDoc {
        schema_version: PERSPECTIVES_SCHEMA_VERSION.to_string(),
        run_id: run_id.clone(),
        perspectives,
    };
    let status = if human_review {
        MergeStatus::AwaitingHumanReview
    } else {
        MergeStatus::Promoted
    };
    Ok(MergeOutcome {
        status,
        doc,
    })
}

/// Coalesces a duplicate candidate into the existing one.
fn coalesce(existing: &mut PerspectiveCandidate, duplicate: &PerspectiveCandidate) {
    existing.platform_requirements = union_sorted(
        &existing.platform_requirements,
        &duplicate.platform_requirements,
    );
    existing.tool_policy = ToolPolicy {
        primary: union_sorted(&existing.tool_policy.primary, &duplicate.tool_policy.primary),
        secondary: union_sorted(&existing.tool_policy.secondary, &duplicate.tool_policy.secondary),
        forbidden: union_sorted(&existing.tool_policy.forbidden, &duplicate.tool_policy.forbidden),
    };
    existing.flags.human_review_required =
        existing.flags.human_review_required || duplicate.flags.human_review_required;
}

/// Set-unions two string lists, returning a sorted vector.
fn union_sorted(a: &[String], b: &[String]) -> Vec<String> {
    let mut set: BTreeSet<String> = a.iter().cloned().collect();
    set.extend(b.iter().cloned());
    set.into_iter().collect()
}

/// Assigns deterministic, unique identifiers to merged candidates.
fn assign_identifiers(
    candidates: Vec<PerspectiveCandidate>,
) -> Result<Vec<Perspective>, EngineError> {
    let mut used: BTreeSet<String> = BTreeSet::new();
    let mut perspectives = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        let base = candidate
            .id
            .as_ref()
            .map_or_else(|| slugify(&candidate.title), |id| id.as_str().to_string());
        let mut assigned = base.clone();
        let mut suffix = 2_u32;
        while used.contains(&assigned) {
            assigned = format!("{base}-{suffix}");
            suffix += 1;
        }
        used.insert(assigned.clone());
        let id = PerspectiveId::new(assigned).map_err(|err| {
            EngineError::Coded(CodedError::new(
                ErrorCode::PerspectivesOutputInvalid,
                format!("merged perspective id invalid: {err}"),
            ))
        })?;
        perspectives.push(Perspective {
            id,
            title: candidate.title,
            domain: candidate.domain,
            track: candidate.track,
            agent_type: candidate.agent_type,
            questions: candidate.questions,
            prompt_contract: candidate.prompt_contract,
            platform_requirements: candidate.platform_requirements,
            tool_policy: candidate.tool_policy,
        });
    }
    Ok(perspectives)
}

/// Produces a path-safe slug from a title.
fn slugify(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    let mut last_dash = true;
    for character in title.chars() {
        if character.is_ascii_alphanumeric() {
            slug.push(character.to_ascii_lowercase());
            last_dash = false;
        } else if !last_dash {
            slug.push('-');
            last_dash = true;
        }
        if slug.len() >= 48 {
            break;
        }
    }
    let trimmed = slug.trim_matches('-').to_string();
    if trimmed.is_empty() { "perspective".to_string() } else { trimmed }
}

// ============================================================================
// SECTION: Candidate Validation
// ============================================================================

/// Validates and normalizes a raw candidate document.
///
/// # Errors
///
/// Returns a `PERSPECTIVES_OUTPUT_INVALID` error naming the first violation.
pub fn normalize_candidate_doc(
    run_id: &RunId,
    raw: &serde_json::Value,
) -> Result<CandidateDoc, EngineError> {
    let doc: CandidateDoc = serde_json::from_value(raw.clone()).map_err(|err| {
        EngineError::Coded(CodedError::new(
            ErrorCode::PerspectivesOutputInvalid,
            format!("candidate doc failed to parse: {err}"),
        ))
    })?;
    if &doc.run_id != run_id {
        return Err(EngineError::Coded(CodedError::new(
            ErrorCode::PerspectivesOutputInvalid,
            format!("candidate doc targets run {} but this run is {run_id}", doc.run_id),
        )));
    }
    if doc.candidates.is_empty() {
        return Err(EngineError::Coded(CodedError::new(
            ErrorCode::PerspectivesOutputInvalid,
            "candidate doc contains no candidates",
        )));
    }
    for (index, candidate) in doc.candidates.iter().enumerate() {
        validate_candidate(index, candidate)?;
    }
    Ok(doc)
}

/// Validates one candidate entry.
fn validate_candidate(index: usize, candidate: &PerspectiveCandidate) -> Result<(), EngineError> {
    /// Builds the invalid-candidate error for a field violation.
    fn invalid(index: usize, message: &str) -> EngineError {
        EngineError::Coded(CodedError::new(
            ErrorCode::PerspectivesOutputInvalid,
            format!("candidates[{index}]: {message}"),
        ))
    }

    if candidate.title.trim().is_empty() {
        return Err(invalid(index, "title must not be empty"));
    }
    if candidate.domain.trim().is_empty() {
        return Err(invalid(index, "domain must not be empty"));
    }
    if candidate.questions.is_empty() {
        return Err(invalid(index, "questions must not be empty"));
    }
    if candidate.prompt_contract.max_words == 0 {
        return Err(invalid(index, "prompt_contract.max_words must be > 0"));
    }
    if candidate.prompt_contract.max_sources == 0 {
        return Err(invalid(index, "prompt_contract.max_sources must be > 0"));
    }
    if candidate.prompt_contract.tool_budget == 0 {
        return Err(invalid(index, "prompt_contract.tool_budget must be > 0"));
    }
    Ok(())
}

// ============================================================================
// SECTION: Prompt Rendering
// ============================================================================

/// Renders the wave prompt for one perspective deterministically.
#[must_use]
pub fn render_wave_prompt(query: &QuerySpec, perspective: &Perspective, wave: u8) -> String {
    let mut prompt = String::new();
    let _ = writeln!(prompt, "# Research Assignment (wave {wave})");
    let _ = writeln!(prompt);
    let _ = writeln!(prompt, "## Query");
    let _ = writeln!(prompt);
    let _ = writeln!(prompt, "{}", query.text);
    if !query.constraints.is_empty() {
        let _ = writeln!(prompt);
        let _ = writeln!(prompt, "## Constraints");
        let _ = writeln!(prompt);
        for constraint in &query.constraints {
            let _ = writeln!(prompt, "- {constraint}");
        }
    }
    let _ = writeln!(prompt);
    let _ = writeln!(prompt, "## Angle: {}", perspective.title);
    let _ = writeln!(prompt);
    let _ = writeln!(prompt, "- Domain: {}", perspective.domain);
    let _ = writeln!(prompt, "- Track: {}", perspective.track.as_str());
    let _ = writeln!(prompt, "- Agent type: {}", perspective.agent_type);
    let _ = writeln!(prompt);
    let _ = writeln!(prompt, "## Questions");
    let _ = writeln!(prompt);
    for question in &perspective.questions {
        let _ = writeln!(prompt, "- {question}");
    }
    let _ = writeln!(prompt);
    let _ = writeln!(prompt, "## Output Contract");
    let _ = writeln!(prompt);
    let _ = writeln!(prompt, "- Max words: {}", perspective.prompt_contract.max_words);
    let _ = writeln!(prompt, "- Max sources: {}", perspective.prompt_contract.max_sources);
    let _ = writeln!(prompt, "- Tool budget: {}", perspective.prompt_contract.tool_budget);
    for section in &perspective.prompt_contract.must_include_sections {
        let _ = writeln!(prompt, "- Must include section: {section}");
    }
    if !perspective.platform_requirements.is_empty() {
        let _ = writeln!(prompt);
        let _ = writeln!(prompt, "## Platform Requirements");
        let _ = writeln!(prompt);
        for platform in &perspective.platform_requirements {
            let _ = writeln!(prompt, "- {platform}");
        }
    }
    let _ = writeln!(prompt);
    let _ = writeln!(prompt, "## Tool Policy");
    let _ = writeln!(prompt);
    let _ = writeln!(prompt, "- Primary: {}", perspective.tool_policy.primary.join(", "));
    let _ = writeln!(prompt, "- Secondary: {}", perspective.tool_policy.secondary.join(", "));
    let _ = writeln!(prompt, "- Forbidden: {}", perspective.tool_policy.forbidden.join(", "));
    prompt
}

/// Renders the drafting prompt for one perspectives drafting agent.
#[must_use]
pub fn render_drafting_prompt(run_id: &RunId, query: &QuerySpec, draft_agent: &str) -> String {
    let mut prompt = String::new();
    let _ = writeln!(prompt, "# Perspective Drafting Assignment ({draft_agent})");
    let _ = writeln!(prompt);
    let _ = writeln!(prompt, "Run: {run_id}");
    let _ = writeln!(prompt);
    let _ = writeln!(prompt, "## Query");
    let _ = writeln!(prompt);
    let _ = writeln!(prompt, "{}", query.text);
    let _ = writeln!(prompt);
    let _ = writeln!(prompt, "## Instructions");
    let _ = writeln!(prompt);
    let _ = writeln!(
        prompt,
        "Produce a JSON candidate document with run_id \"{run_id}\" and a \
         candidates array covering standard, independent, and contrarian tracks."
    );
    prompt
}

// ============================================================================
// SECTION: Wave Plans
// ============================================================================

/// Builds a digest-pinned wave plan from the promoted perspectives document.
///
/// # Errors
///
/// Returns [`EngineError`] when the perspectives digest cannot be computed.
pub fn build_wave_plan(
    wave: u8,
    query: &QuerySpec,
    doc: &PerspectivesDoc,
    max_agents: u32,
) -> Result<WavePlan, EngineError> {
    let perspectives_digest = doc.digest()?;
    let entries = doc
        .perspectives
        .iter()
        .take(usize::try_from(max_agents).unwrap_or(usize::MAX))
        .map(|perspective| WavePlanEntry {
            perspective_id: perspective.id.clone(),
            prompt_md: render_wave_prompt(query, perspective, wave),
        })
        .collect();
    Ok(WavePlan {
        schema_version: WAVE_PLAN_SCHEMA_VERSION.to_string(),
        wave,
        perspectives_digest,
        entries,
    })
}
