// crates/deep-research-config/tests/policy_resolution.rs
// ============================================================================
// Module: Policy Resolution Tests
// Description: Verifies layered policy resolution and fail-closed validation.
// ============================================================================
//! ## Overview
//! Ensures defaults apply without a policy document, the document overrides
//! defaults, environment overrides win over both, and invalid values fail
//! closed.

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

use deep_research_config::ConfigError;
use deep_research_config::MapEnv;
use deep_research_config::resolve_policy;
use deep_research_config::validate_policy;
use deep_research_core::RunPolicy;
use deep_research_core::Stage;

#[test]
fn defaults_apply_without_a_policy_document() {
    let dir = tempfile::tempdir().expect("tempdir");
    let policy = resolve_policy(dir.path(), &MapEnv::default()).expect("resolve");
    assert_eq!(policy.resolver.concurrency, 3);
    assert_eq!(policy.resolver.ttl_seconds, 7 * 24 * 3_600);
    assert_eq!(policy.ladder.direct_fetch_max_attempts, 2);
    assert_eq!(policy.stage_timeouts.for_stage(Stage::Wave1), 3_600);
    assert_eq!(policy.stage_timeouts.for_stage(Stage::Review), 900);
}

#[test]
fn policy_document_overrides_defaults() {
    let dir = tempfile::tempdir().expect("tempdir");
    let policy_dir = dir.path().join("run-config");
    fs::create_dir_all(&policy_dir).expect("dirs");
    fs::write(
        policy_dir.join("policy.json"),
        br#"{
  "schema_version": "run_policy.v1",
  "stage_timeouts_seconds_v1": { "default_seconds": 120, "overrides": { "wave1": 600 } },
  "resolver": {
    "ttl_seconds": 3600,
    "max_attempts": 5,
    "initial_delay_ms": 100,
    "max_delay_ms": 400,
    "concurrency": 2,
    "request_timeout_ms": 2000
  }
}
"#,
    )
    .expect("policy write");

    let policy = resolve_policy(dir.path(), &MapEnv::default()).expect("resolve");
    assert_eq!(policy.stage_timeouts.for_stage(Stage::Wave1), 600);
    assert_eq!(policy.stage_timeouts.for_stage(Stage::Pivot), 120);
    assert_eq!(policy.resolver.max_attempts, 5);
    assert_eq!(policy.resolver.concurrency, 2);
}

#[test]
fn environment_overrides_win() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut env = MapEnv::default();
    env.values.insert(
        "DEEP_RESEARCH_STAGE_TIMEOUT_WAVE1_SECONDS".to_string(),
        "42".to_string(),
    );
    env.values
        .insert("DEEP_RESEARCH_RESOLVER_CONCURRENCY".to_string(), "7".to_string());
    env.values.insert(
        "DEEP_RESEARCH_DIRECT_FETCH_MAX_ATTEMPTS".to_string(),
        "4".to_string(),
    );

    let policy = resolve_policy(dir.path(), &env).expect("resolve");
    assert_eq!(policy.stage_timeouts.for_stage(Stage::Wave1), 42);
    assert_eq!(policy.resolver.concurrency, 7);
    assert_eq!(policy.ladder.direct_fetch_max_attempts, 4);
}

#[test]
fn invalid_environment_override_fails_closed() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut env = MapEnv::default();
    env.values.insert(
        "DEEP_RESEARCH_RESOLVER_CONCURRENCY".to_string(),
        "lots".to_string(),
    );
    let err = resolve_policy(dir.path(), &env).expect_err("must fail");
    assert!(matches!(err, ConfigError::InvalidOverride { .. }));
}

#[test]
fn zero_concurrency_fails_validation() {
    let mut policy = RunPolicy::default();
    policy.resolver.concurrency = 0;
    let err = validate_policy(&policy).expect_err("must fail");
    assert!(matches!(err, ConfigError::Invalid(_)));
}

#[test]
fn zero_stage_timeout_fails_validation() {
    let mut policy = RunPolicy::default();
    policy.stage_timeouts.overrides.insert(Stage::Citations, 0);
    let err = validate_policy(&policy).expect_err("must fail");
    assert!(matches!(err, ConfigError::Invalid(_)));
}

#[test]
fn delay_cap_below_initial_fails_validation() {
    let mut policy = RunPolicy::default();
    policy.resolver.initial_delay_ms = 5_000;
    policy.resolver.max_delay_ms = 100;
    let err = validate_policy(&policy).expect_err("must fail");
    assert!(matches!(err, ConfigError::Invalid(_)));
}

#[test]
fn default_policy_validates() {
    validate_policy(&RunPolicy::default()).expect("defaults must validate");
}
