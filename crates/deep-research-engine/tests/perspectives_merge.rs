// crates/deep-research-engine/tests/perspectives_merge.rs
// ============================================================================
// Module: Perspectives Merge Tests
// Description: Verifies deterministic merge, promotion, and the human-review
//              hold.
// ============================================================================
//! ## Overview
//! Candidates coalesce by the canonical `(track, title, questions)` key with
//! set-unioned lists; ordering is `(track weight, domain, title)`;
//! promotion regenerates the wave-1 plan and advances to wave1, while a
//! human-review flag holds the merge with a draft.

#![allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only output and panic-based assertions are permitted."
)]

mod common;

use deep_research_core::CandidateDoc;
use deep_research_core::CandidateFlags;
use deep_research_core::ErrorCode;
use deep_research_core::PerspectiveCandidate;
use deep_research_core::PerspectivesDoc;
use deep_research_core::PromptContract;
use deep_research_core::RunId;
use deep_research_core::Stage;
use deep_research_core::ToolPolicy;
use deep_research_core::Track;
use deep_research_core::WavePlan;
use deep_research_core::digest_value;
use deep_research_engine::MergeStatus;
use deep_research_engine::PerspectivesState;
use deep_research_engine::merge_candidates;
use deep_research_engine::perspectives_draft;
use deep_research_engine::stage_advance;
use deep_research_store::read_json;
use deep_research_store::read_manifest;
use deep_research_store::write_json_atomic;

fn candidate(
    title: &str,
    domain: &str,
    track: Track,
    platforms: &[&str],
    review: bool,
) -> PerspectiveCandidate {
    PerspectiveCandidate {
        id: None,
        title: title.to_string(),
        domain: domain.to_string(),
        track,
        agent_type: "researcher".to_string(),
        questions: vec![format!("What is known about {title}?")],
        prompt_contract: PromptContract {
            max_words: 1200,
            max_sources: 10,
            tool_budget: 20,
            must_include_sections: vec!["Findings".to_string()],
        },
        platform_requirements: platforms.iter().map(ToString::to_string).collect(),
        tool_policy: ToolPolicy {
            primary: vec!["web_search".to_string()],
            secondary: Vec::new(),
            forbidden: Vec::new(),
        },
        flags: CandidateFlags {
            human_review_required: review,
        },
    }
}

fn doc(run_id: &RunId, candidates: Vec<PerspectiveCandidate>) -> CandidateDoc {
    CandidateDoc {
        run_id: run_id.clone(),
        candidates,
    }
}

#[test]
fn duplicates_coalesce_with_set_unioned_lists() {
    let run_id = RunId::new("r1").expect("run id");
    let a = doc(&run_id, vec![candidate(
        "Grid stability",
        "energy",
        Track::Standard,
        &["arxiv", "news"],
        false,
    )]);
    let b = doc(&run_id, vec![candidate(
        "Grid stability",
        "energy",
        Track::Standard,
        &["news", "forums"],
        false,
    )]);

    let outcome = merge_candidates(&run_id, &[a, b]).expect("merge");
    assert_eq!(outcome.status, MergeStatus::Promoted);
    assert_eq!(outcome.doc.perspectives.len(), 1);
    assert_eq!(outcome.doc.perspectives[0].platform_requirements, vec![
        "arxiv".to_string(),
        "forums".to_string(),
        "news".to_string(),
    ]);
}

#[test]
fn ordering_is_track_weight_then_domain_then_title() {
    let run_id = RunId::new("r1").expect("run id");
    let input = doc(&run_id, vec![
        candidate("Z angle", "zoology", Track::Contrarian, &[], false),
        candidate("B angle", "biology", Track::Standard, &[], false),
        candidate("M angle", "biology", Track::Independent, &[], false),
        candidate("A angle", "biology", Track::Standard, &[], false),
    ]);

    let outcome = merge_candidates(&run_id, &[input]).expect("merge");
    let titles: Vec<&str> =
        outcome.doc.perspectives.iter().map(|p| p.title.as_str()).collect();
    assert_eq!(titles, vec!["A angle", "B angle", "M angle", "Z angle"]);
    let tracks: Vec<Track> = outcome.doc.perspectives.iter().map(|p| p.track).collect();
    assert_eq!(tracks, vec![
        Track::Standard,
        Track::Standard,
        Track::Independent,
        Track::Contrarian,
    ]);
}

#[test]
fn human_review_flag_holds_the_merge() {
    let run_id = RunId::new("r1").expect("run id");
    let input = doc(&run_id, vec![
        candidate("Safe angle", "general", Track::Standard, &[], false),
        candidate("Sensitive angle", "general", Track::Contrarian, &[], true),
    ]);
    let outcome = merge_candidates(&run_id, &[input]).expect("merge");
    assert_eq!(outcome.status, MergeStatus::AwaitingHumanReview);
}

#[test]
fn assigned_identifiers_are_unique_slugs() {
    let run_id = RunId::new("r1").expect("run id");
    let input = doc(&run_id, vec![
        candidate("Same Title", "a-domain", Track::Standard, &[], false),
        candidate("Same Title", "b-domain", Track::Standard, &[], false),
    ]);
    let outcome = merge_candidates(&run_id, &[input]).expect("merge");
    let ids: Vec<&str> =
        outcome.doc.perspectives.iter().map(|p| p.id.as_str()).collect();
    assert_eq!(ids, vec!["same-title", "same-title-2"]);
}

#[test]
fn draft_promotion_advances_run_to_wave1() {
    let dir = tempfile::tempdir().expect("tempdir");
    let run = common::bare_run(dir.path());

    // Move to the perspectives stage and drop two candidate documents in.
    let _ = stage_advance(&run.manifest_path, None, "enter perspectives").expect("advance");
    let run_id = RunId::new("r1").expect("run id");
    let outputs = run.layout.operator_perspectives_dir();
    write_json_atomic(
        &outputs.join("draft-1.json"),
        &doc(&run_id, vec![candidate("Alpha", "general", Track::Standard, &["arxiv"], false)]),
    )
    .expect("draft 1");
    write_json_atomic(
        &outputs.join("draft-2.json"),
        &doc(&run_id, vec![candidate("Beta", "general", Track::Contrarian, &[], false)]),
    )
    .expect("draft 2");

    let result = perspectives_draft(&run.manifest_path, false).expect("promote");
    assert_eq!(result["status"], "promoted");
    assert_eq!(result["stage"], "wave1");

    let snapshot = read_manifest(&run.manifest_path).expect("read");
    assert_eq!(snapshot.manifest.stage.current, Stage::Wave1);

    let state: PerspectivesState =
        read_json(&run.layout.perspectives_state_path()).expect("state");
    assert_eq!(
        serde_json::to_value(state.status).expect("status"),
        serde_json::json!("promoted")
    );

    // The regenerated plan pins the promoted document.
    let promoted: PerspectivesDoc =
        read_json(&run.layout.perspectives_path()).expect("perspectives");
    let plan: WavePlan = read_json(&run.layout.wave_plan_path(1)).expect("plan");
    assert_eq!(plan.perspectives_digest, digest_value(&promoted).expect("digest"));
}

#[test]
fn draft_with_review_flag_holds_and_writes_draft() {
    let dir = tempfile::tempdir().expect("tempdir");
    let run = common::bare_run(dir.path());
    let _ = stage_advance(&run.manifest_path, None, "enter perspectives").expect("advance");

    let run_id = RunId::new("r1").expect("run id");
    write_json_atomic(
        &run.layout.operator_perspectives_dir().join("draft-1.json"),
        &doc(&run_id, vec![candidate("Gamma", "general", Track::Standard, &[], true)]),
    )
    .expect("draft");

    let err = perspectives_draft(&run.manifest_path, false).expect_err("must hold");
    assert_eq!(err.into_coded().code, ErrorCode::HumanReviewRequired);
    assert!(run.layout.perspectives_draft_path().exists());

    // Approving the held draft promotes it.
    let result = perspectives_draft(&run.manifest_path, true).expect("approve");
    assert_eq!(result["status"], "promoted");
}

#[test]
fn run_id_mismatch_is_invalid() {
    let run_id = RunId::new("r1").expect("run id");
    let foreign = RunId::new("other").expect("other id");
    let input = doc(&foreign, vec![candidate("Angle", "general", Track::Standard, &[], false)]);
    let err = merge_candidates(&run_id, &[input]).expect_err("mismatch");
    assert_eq!(err.into_coded().code, ErrorCode::PerspectivesOutputInvalid);
}
