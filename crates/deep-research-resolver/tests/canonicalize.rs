// crates/deep-research-resolver/tests/canonicalize.rs
// ============================================================================
// Module: URL Canonicalization Tests
// Description: Verifies redirector unwrapping and tracking-parameter
//              stripping.
// ============================================================================
//! ## Overview
//! Ensures known-wrapper URLs unwrap before tracking parameters are
//! stripped, and that grounding-redirect finals are rejected outright.

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

use deep_research_resolver::CanonicalizeError;
use deep_research_resolver::canonicalize_url;

#[test]
fn google_redirector_unwraps_then_strips_tracking() {
    let resolved =
        canonicalize_url("https://www.google.com/url?q=https://example.com/article?utm_source=x")
            .expect("canonicalize");
    assert_eq!(resolved, "https://example.com/article");
}

#[test]
fn bare_google_host_is_not_unwrapped() {
    let resolved = canonicalize_url("https://www.google.com/search?q=rust").expect("canonicalize");
    assert_eq!(resolved, "https://www.google.com/search?q=rust");
}

#[test]
fn perimeterx_wrapper_unwraps() {
    let resolved = canonicalize_url(
        "https://captcha.perimeterx.example/?url=https://news.example.com/story",
    )
    .expect("canonicalize");
    assert_eq!(resolved, "https://news.example.com/story");
}

#[test]
fn tracking_params_strip_preserves_remaining_order() {
    let resolved = canonicalize_url(
        "https://example.com/a?keep1=1&utm_medium=email&keep2=2&fbclid=abc&gclid=x",
    )
    .expect("canonicalize");
    assert_eq!(resolved, "https://example.com/a?keep1=1&keep2=2");
}

#[test]
fn all_tracking_params_yield_no_query() {
    let resolved = canonicalize_url("https://example.com/a?utm_source=x&utm_campaign=y&ref=z")
        .expect("canonicalize");
    assert_eq!(resolved, "https://example.com/a");
}

#[test]
fn untracked_urls_pass_through() {
    let resolved =
        canonicalize_url("https://example.com/path?page=2&sort=asc").expect("canonicalize");
    assert_eq!(resolved, "https://example.com/path?page=2&sort=asc");
}

#[test]
fn grounding_redirect_host_is_rejected() {
    let err = canonicalize_url(
        "https://vertexaisearch.cloud.google.com/grounding-api-redirect/abc123",
    )
    .expect_err("must reject");
    assert!(matches!(err, CanonicalizeError::GroundingRedirect(_)));
}

#[test]
fn invalid_input_is_rejected() {
    let err = canonicalize_url("not a url").expect_err("must reject");
    assert!(matches!(err, CanonicalizeError::Invalid(_)));
}

#[test]
fn nested_google_wrapper_unwraps_fully() {
    let inner = "https://example.com/deep?utm_source=wrapped";
    let once = format!("https://www.google.com/url?q={inner}");
    let resolved = canonicalize_url(&once).expect("canonicalize");
    assert_eq!(resolved, "https://example.com/deep");
}
