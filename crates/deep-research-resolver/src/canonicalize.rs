// crates/deep-research-resolver/src/canonicalize.rs
// ============================================================================
// Module: URL Canonicalization
// Description: Redirector unwrapping and tracking-parameter stripping.
// Purpose: Reduce resolved URLs to their stable, citable form.
// Dependencies: url
// ============================================================================

//! ## Overview
//! Canonicalization runs in two passes: first unwrap known redirector hosts
//! (Google `/url?q=...`, PerimeterX wrappers) until a non-wrapper URL
//! remains, then strip tracking query parameters. A final URL on the
//! grounding-redirect host is rejected outright; it is a proxy, not a
//! citable destination.

// ============================================================================
// SECTION: Imports
// ============================================================================

use thiserror::Error;
use url::Url;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Maximum wrapper-unwrapping passes before giving up.
const MAX_UNWRAP_DEPTH: usize = 4;

/// Grounding redirect host whose URLs are never citable destinations.
pub const GROUNDING_REDIRECT_HOST: &str = "vertexaisearch.cloud.google.com";

/// Tracking query parameters stripped from canonical URLs.
const TRACKING_PARAMS: &[&str] = &[
    "gclid", "fbclid", "msclkid", "mc_cid", "mc_eid", "ref", "ref_src", "spm", "igshid", "si",
    "s_kwcid",
];

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Canonicalization errors.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CanonicalizeError {
    /// Input failed to parse as a URL.
    #[error("invalid url: {0}")]
    Invalid(String),
    /// Final URL is on the grounding-redirect host.
    #[error("url resolves to the grounding redirect host: {0}")]
    GroundingRedirect(String),
}

// ============================================================================
// SECTION: Canonicalization
// ============================================================================

/// Canonicalizes a final URL: unwrap known redirectors, then strip tracking
/// parameters.
///
/// # Errors
///
/// Returns [`CanonicalizeError`] when the input is unparseable or the final
/// host is the grounding-redirect host.
pub fn canonicalize_url(input: &str) -> Result<String, CanonicalizeError> {
    let mut url =
        Url::parse(input).map_err(|_| CanonicalizeError::Invalid(input.to_string()))?;

    for _ in 0 .. MAX_UNWRAP_DEPTH {
        match unwrap_redirector(&url) {
            Some(inner) => url = inner,
            None => break,
        }
    }

    if host_matches(&url, GROUNDING_REDIRECT_HOST) {
        return Err(CanonicalizeError::GroundingRedirect(url.to_string()));
    }

    strip_tracking_params(&mut url);
    Ok(url.to_string())
}

/// Unwraps one layer of a known redirector, when the URL is one.
fn unwrap_redirector(url: &Url) -> Option<Url> {
    let host = url.host_str()?.to_ascii_lowercase();
    let wrapped = if is_google_redirector(&host, url.path()) {
        query_param(url, "q").or_else(|| query_param(url, "url"))
    } else if host.contains("perimeterx") {
        query_param(url, "url")
    } else {
        None
    }?;
    Url::parse(&wrapped).ok()
}

/// Returns true for Google `/url` redirector URLs.
fn is_google_redirector(host: &str, path: &str) -> bool {
    (host == "www.google.com" || host == "google.com") && path == "/url"
}

/// Returns the first value of a query parameter.
fn query_param(url: &Url, name: &str) -> Option<String> {
    url.query_pairs().find(|(key, _)| key == name).map(|(_, value)| value.into_owned())
}

/// Returns true when the URL's host equals the given label.
fn host_matches(url: &Url, host: &str) -> bool {
    url.host_str().is_some_and(|candidate| candidate.eq_ignore_ascii_case(host))
}

/// Strips tracking query parameters, preserving the remaining order.
fn strip_tracking_params(url: &mut Url) {
    let retained: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| !is_tracking_param(key))
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();
    if retained.is_empty() {
        url.set_query(None);
        return;
    }
    let mut serializer = url::form_urlencoded::Serializer::new(String::new());
    for (key, value) in &retained {
        serializer.append_pair(key, value);
    }
    let query = serializer.finish();
    url.set_query(Some(&query));
}

/// Returns true when a query parameter is a tracking parameter.
fn is_tracking_param(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    lower.starts_with("utm_") || TRACKING_PARAMS.contains(&lower.as_str())
}
