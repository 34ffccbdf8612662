// crates/deep-research-engine/tests/citations_ladder.rs
// ============================================================================
// Module: Citation Ladder Tests
// Description: Verifies within-rung retry and blocked/failed classification.
// ============================================================================
//! ## Overview
//! The ladder retries transient failures within a rung's attempt budget,
//! classifies refusals as blocked, and reports failure when every configured
//! rung is exhausted.

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

use std::sync::Mutex;
use std::sync::atomic::AtomicU32;
use std::sync::atomic::Ordering;

use deep_research_core::LadderPolicy;
use deep_research_core::Tool;
use deep_research_core::ToolResult;
use deep_research_engine::CitationLadder;
use deep_research_engine::CitationStatus;
use deep_research_engine::CitationValidatorTool;
use deep_research_resolver::FetchFailure;
use deep_research_resolver::FetchMethod;
use deep_research_resolver::FetchResponse;
use deep_research_resolver::UrlFetcher;
use serde_json::json;

/// One scripted fetch step.
enum Step {
    /// Respond with this status.
    Status(u16),
    /// Fail with a transient transport error.
    Transient,
}

/// Fetcher replaying scripted steps and counting calls.
struct ScriptedFetcher {
    /// Remaining steps.
    steps: Mutex<Vec<Step>>,
    /// Total fetch calls.
    calls: AtomicU32,
}

impl ScriptedFetcher {
    fn new(steps: Vec<Step>) -> Self {
        Self {
            steps: Mutex::new(steps),
            calls: AtomicU32::new(0),
        }
    }
}

impl UrlFetcher for ScriptedFetcher {
    fn fetch(&self, _method: FetchMethod, url: &str) -> Result<FetchResponse, FetchFailure> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.steps.lock().expect("steps").remove(0) {
            Step::Status(status) => Ok(FetchResponse {
                status,
                final_url: url.to_string(),
                retry_after_seconds: None,
            }),
            Step::Transient => Err(FetchFailure {
                message: "socket hang up".to_string(),
                transient: true,
            }),
        }
    }
}

fn two_attempt_policy() -> LadderPolicy {
    LadderPolicy {
        direct_fetch_max_attempts: 2,
        brightdata_max_attempts: 1,
        apify_max_attempts: 1,
    }
}

#[test]
fn transient_then_success_validates_with_exactly_two_direct_fetches() {
    let fetcher = ScriptedFetcher::new(vec![Step::Transient, Step::Status(200)]);
    let ladder = CitationLadder::direct_only(&two_attempt_policy(), Box::new(fetcher));

    let record = ladder.validate("https://example.com/paper");
    assert_eq!(record.status, CitationStatus::Valid);
    assert_eq!(record.rung.as_deref(), Some("direct"));
    assert_eq!(record.attempts, 2, "exactly two direct fetches");
}

#[test]
fn first_attempt_success_validates_with_one_fetch() {
    let fetcher = ScriptedFetcher::new(vec![Step::Status(200)]);
    let ladder = CitationLadder::direct_only(&two_attempt_policy(), Box::new(fetcher));
    let record = ladder.validate("https://example.com/paper");
    assert_eq!(record.status, CitationStatus::Valid);
    assert_eq!(record.attempts, 1);
}

#[test]
fn refusal_classifies_as_blocked() {
    let fetcher = ScriptedFetcher::new(vec![Step::Status(403)]);
    let ladder = CitationLadder::direct_only(&two_attempt_policy(), Box::new(fetcher));
    let record = ladder.validate("https://walled.example/paper");
    assert_eq!(record.status, CitationStatus::Blocked);
    assert_eq!(record.attempts, 1, "refusals do not retry within the rung");
}

#[test]
fn exhausted_budget_reports_failure() {
    let fetcher = ScriptedFetcher::new(vec![Step::Status(503), Step::Status(503)]);
    let ladder = CitationLadder::direct_only(&two_attempt_policy(), Box::new(fetcher));
    let record = ladder.validate("https://down.example/paper");
    assert_eq!(record.status, CitationStatus::Failed);
    assert_eq!(record.attempts, 2);
    assert!(record.error.is_some());
}

#[test]
fn validator_tool_wraps_records_and_blocked_lists() {
    let fetcher = ScriptedFetcher::new(vec![Step::Status(200), Step::Status(403)]);
    let tool =
        CitationValidatorTool::new(CitationLadder::direct_only(&two_attempt_policy(), Box::new(fetcher)));

    let result = tool.execute(&json!({
        "urls": ["https://ok.example/a", "https://walled.example/b"],
    }));
    let ToolResult::Ok(value) = result else {
        panic!("validator must succeed");
    };
    let records = value["records"].as_array().expect("records");
    assert_eq!(records.len(), 2);
    assert_eq!(records[0]["status"], "valid");
    assert_eq!(records[1]["status"], "blocked");
    assert_eq!(value["blocked"], json!(["https://walled.example/b"]));
}

#[test]
fn validator_tool_rejects_malformed_args() {
    let fetcher = ScriptedFetcher::new(Vec::new());
    let tool =
        CitationValidatorTool::new(CitationLadder::direct_only(&two_attempt_policy(), Box::new(fetcher)));
    let result = tool.execute(&json!({ "not_urls": [] }));
    assert!(matches!(result, ToolResult::Err(_)));
}
