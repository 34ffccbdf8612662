// crates/deep-research-core/tests/stage_machine.rs
// ============================================================================
// Module: Stage Machine Tests
// Description: Verifies the transition graph, check evaluation, and dry-run
//              purity.
// ============================================================================
//! ## Overview
//! Exercises transition inference, gate enforcement (including the explicit
//! Gate F check on review -> finalize), blocked-decision reporting, and the
//! filesystem purity of dry-run evaluation.

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

use std::fs;

use deep_research_core::AdvanceContext;
use deep_research_core::AdvanceError;
use deep_research_core::Check;
use deep_research_core::CustomPredicate;
use deep_research_core::GateId;
use deep_research_core::GateStatus;
use deep_research_core::GatesDoc;
use deep_research_core::Manifest;
use deep_research_core::NoCustomPredicates;
use deep_research_core::QuerySpec;
use deep_research_core::RunId;
use deep_research_core::Sensitivity;
use deep_research_core::Stage;
use deep_research_core::Timestamp;
use deep_research_core::advance;
use deep_research_core::edges_from;
use deep_research_core::transition_patch;

/// Custom predicate evaluator with a fixed answer.
struct FixedPredicates(bool);

impl CustomPredicate for FixedPredicates {
    fn holds(&self, _name: &str) -> Result<bool, String> {
        Ok(self.0)
    }
}

fn manifest_at(stage: Stage, root: &std::path::Path) -> Manifest {
    let now = Timestamp::now();
    let mut manifest = Manifest::new(
        RunId::new("r1").expect("run id"),
        QuerySpec {
            text: "Q".to_string(),
            sensitivity: Sensitivity::Normal,
            constraints: Vec::new(),
        },
        root.to_path_buf(),
        now,
    );
    manifest.stage.current = stage;
    manifest
}

#[test]
fn init_infers_perspectives_as_canonical_next() {
    let dir = tempfile::tempdir().expect("tempdir");
    let manifest = manifest_at(Stage::Init, dir.path());
    let gates = GatesDoc::default();
    let ctx = AdvanceContext {
        manifest: &manifest,
        gates: &gates,
        custom: &NoCustomPredicates,
    };
    let decision = advance(&ctx, None).expect("advance");
    assert_eq!(decision.from, Stage::Init);
    assert_eq!(decision.to, Stage::Perspectives);
    assert!(decision.evaluated.is_empty());
}

#[test]
fn review_requires_requested_next() {
    let dir = tempfile::tempdir().expect("tempdir");
    let manifest = manifest_at(Stage::Review, dir.path());
    let gates = GatesDoc::default();
    let ctx = AdvanceContext {
        manifest: &manifest,
        gates: &gates,
        custom: &NoCustomPredicates,
    };
    let err = advance(&ctx, None).expect_err("must be ambiguous");
    match err {
        AdvanceError::AmbiguousNext { from, candidates } => {
            assert_eq!(from, Stage::Review);
            assert_eq!(candidates, vec![Stage::Finalize, Stage::Wave2, Stage::Synthesis]);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn unknown_transition_is_rejected() {
    let dir = tempfile::tempdir().expect("tempdir");
    let manifest = manifest_at(Stage::Init, dir.path());
    let gates = GatesDoc::default();
    let ctx = AdvanceContext {
        manifest: &manifest,
        gates: &gates,
        custom: &NoCustomPredicates,
    };
    let err = advance(&ctx, Some(Stage::Done)).expect_err("must reject");
    assert!(matches!(err, AdvanceError::UnknownTransition { .. }));
}

#[test]
fn done_is_terminal() {
    assert!(edges_from(Stage::Done).is_empty());
    let dir = tempfile::tempdir().expect("tempdir");
    let manifest = manifest_at(Stage::Done, dir.path());
    let gates = GatesDoc::default();
    let ctx = AdvanceContext {
        manifest: &manifest,
        gates: &gates,
        custom: &NoCustomPredicates,
    };
    let err = advance(&ctx, None).expect_err("terminal");
    assert!(matches!(err, AdvanceError::Terminal(Stage::Done)));
}

#[test]
fn review_to_finalize_requires_gate_f() {
    let dir = tempfile::tempdir().expect("tempdir");
    let manifest = manifest_at(Stage::Review, dir.path());

    // Review bundle artifact present so only the gate checks can fail.
    let review_dir = dir.path().join("review");
    fs::create_dir_all(&review_dir).expect("review dir");
    fs::write(review_dir.join("review-bundle.json"), b"{\"decision\":\"approve\"}\n")
        .expect("bundle");

    let now = Timestamp::now();
    let mut gates = GatesDoc::default();
    gates.record_pass(GateId::E, now, None);
    gates.record_fail(GateId::F, now, None);

    let ctx = AdvanceContext {
        manifest: &manifest,
        gates: &gates,
        custom: &NoCustomPredicates,
    };
    let err = advance(&ctx, Some(Stage::Finalize)).expect_err("must block");
    let AdvanceError::Blocked { decision } = err else {
        panic!("expected a blocked decision");
    };
    assert_eq!(decision.from, Stage::Review);
    assert_eq!(decision.to, Stage::Finalize);
    let failed_gate_f = decision.evaluated.iter().any(|entry| {
        !entry.is_ok()
            && matches!(
                entry.check,
                Check::Gate {
                    id: GateId::F
                }
            )
    });
    assert!(failed_gate_f, "evaluated must contain a failing check for gate F");
    let blockers = decision.blockers();
    assert!(blockers.blocked_gates.contains(&"F".to_string()));
}

#[test]
fn review_to_finalize_passes_with_gates_and_bundle() {
    let dir = tempfile::tempdir().expect("tempdir");
    let manifest = manifest_at(Stage::Review, dir.path());
    let review_dir = dir.path().join("review");
    fs::create_dir_all(&review_dir).expect("review dir");
    fs::write(review_dir.join("review-bundle.json"), b"{\"decision\":\"approve\"}\n")
        .expect("bundle");

    let now = Timestamp::now();
    let mut gates = GatesDoc::default();
    gates.record_pass(GateId::E, now, None);
    gates.record_pass(GateId::F, now, None);

    let ctx = AdvanceContext {
        manifest: &manifest,
        gates: &gates,
        custom: &NoCustomPredicates,
    };
    let decision = advance(&ctx, Some(Stage::Finalize)).expect("advance");
    assert!(decision.is_allowed());
    assert_eq!(decision.evaluated.len(), 3);
}

#[test]
fn wave1_self_edge_requires_retry_directives_predicate() {
    let dir = tempfile::tempdir().expect("tempdir");
    let manifest = manifest_at(Stage::Wave1, dir.path());
    let gates = GatesDoc::default();

    let allowing = FixedPredicates(true);
    let ctx = AdvanceContext {
        manifest: &manifest,
        gates: &gates,
        custom: &allowing,
    };
    let decision = advance(&ctx, Some(Stage::Wave1)).expect("self edge");
    assert_eq!(decision.to, Stage::Wave1);

    let denying = FixedPredicates(false);
    let ctx = AdvanceContext {
        manifest: &manifest,
        gates: &gates,
        custom: &denying,
    };
    let err = advance(&ctx, Some(Stage::Wave1)).expect_err("must block");
    assert!(matches!(err, AdvanceError::Blocked { .. }));
}

#[test]
fn missing_artifact_is_reported_as_blocker() {
    let dir = tempfile::tempdir().expect("tempdir");
    let manifest = manifest_at(Stage::Citations, dir.path());
    let gates = GatesDoc::default();
    let ctx = AdvanceContext {
        manifest: &manifest,
        gates: &gates,
        custom: &NoCustomPredicates,
    };
    let err = advance(&ctx, None).expect_err("must block");
    let AdvanceError::Blocked { decision } = err else {
        panic!("expected a blocked decision");
    };
    let blockers = decision.blockers();
    assert!(blockers.missing_artifacts.iter().any(|path| path.contains("url-map.json")));
    assert!(blockers.missing_artifacts.iter().any(|path| path.contains("citations.jsonl")));
}

#[test]
fn dry_run_never_mutates_run_documents() {
    let dir = tempfile::tempdir().expect("tempdir");
    let manifest = manifest_at(Stage::Review, dir.path());
    let gates = GatesDoc::default();

    let manifest_path = dir.path().join("manifest.json");
    let gates_path = dir.path().join("gates.json");
    fs::write(&manifest_path, serde_json::to_vec_pretty(&manifest).expect("manifest bytes"))
        .expect("manifest write");
    fs::write(&gates_path, serde_json::to_vec_pretty(&gates).expect("gates bytes"))
        .expect("gates write");
    let manifest_before = fs::read(&manifest_path).expect("manifest before");
    let gates_before = fs::read(&gates_path).expect("gates before");

    let ctx = AdvanceContext {
        manifest: &manifest,
        gates: &gates,
        custom: &NoCustomPredicates,
    };
    let _ = advance(&ctx, Some(Stage::Finalize));

    assert_eq!(fs::read(&manifest_path).expect("manifest after"), manifest_before);
    assert_eq!(fs::read(&gates_path).expect("gates after"), gates_before);
}

#[test]
fn init_shortcut_records_both_hops_in_history() {
    let dir = tempfile::tempdir().expect("tempdir");
    let manifest = manifest_at(Stage::Init, dir.path());

    // Seed the shortcut artifacts so the transition is allowed.
    fs::write(dir.path().join("perspectives.json"), b"{\"perspectives\":[]}\n")
        .expect("perspectives");
    let wave_dir = dir.path().join("wave-1");
    fs::create_dir_all(&wave_dir).expect("wave dir");
    fs::write(wave_dir.join("wave1-plan.json"), b"{\"entries\":[]}\n").expect("plan");

    let gates = GatesDoc::default();
    let ctx = AdvanceContext {
        manifest: &manifest,
        gates: &gates,
        custom: &NoCustomPredicates,
    };
    let decision = advance(&ctx, Some(Stage::Wave1)).expect("shortcut");
    let patch = transition_patch(&manifest, &decision, Timestamp::now());

    let history = patch["stage"]["history"].as_array().expect("history");
    assert_eq!(history.len(), 2);
    assert_eq!(history[0]["from"], "init");
    assert_eq!(history[0]["to"], "perspectives");
    assert_eq!(history[1]["from"], "perspectives");
    assert_eq!(history[1]["to"], "wave1");
    assert_eq!(patch["stage"]["current"], "wave1");
}

#[test]
fn gate_status_defaults_to_pending() {
    let gates = GatesDoc::default();
    assert_eq!(gates.status(GateId::A), GateStatus::Pending);
}
