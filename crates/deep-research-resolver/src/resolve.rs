// crates/deep-research-resolver/src/resolve.rs
// ============================================================================
// Module: Redirect Resolution
// Description: Per-URL redirect resolution with retry and backoff.
// Purpose: Resolve redirect URLs to canonical final destinations, fail-closed
//          on policy violations.
// Dependencies: deep-research-core, rand, reqwest, url
// ============================================================================

//! ## Overview
//! Each URL gets up to `max_attempts` HEAD requests, falling back to GET on
//! 403/405. Retryable statuses are 408, 429, and 5xx; known transient
//! network failures retry too. Backoff is exponential with full jitter,
//! capped at the configured maximum and floored by any `Retry-After` value.
//! Successful finals are canonicalized; a grounding-redirect final is
//! rejected without retry.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::time::Duration;

use deep_research_core::ResolverPolicy;
use rand::Rng;
use serde::Deserialize;
use serde::Serialize;

use crate::canonicalize::canonicalize_url;

// ============================================================================
// SECTION: Fetch Seam
// ============================================================================

/// HTTP method used for a resolution request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchMethod {
    /// HEAD request.
    Head,
    /// GET request (fallback for HEAD-hostile hosts).
    Get,
}

/// Response observed for one resolution request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResponse {
    /// Final HTTP status.
    pub status: u16,
    /// Final URL after following redirects.
    pub final_url: String,
    /// Parsed `Retry-After` seconds, when present.
    pub retry_after_seconds: Option<u64>,
}

/// Transport-level fetch failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchFailure {
    /// Failure text.
    pub message: String,
    /// True when the failure is a known transient network error.
    pub transient: bool,
}

/// Fetch seam so resolution logic stays testable without sockets.
pub trait UrlFetcher {
    /// Performs one request and reports the final status and URL.
    ///
    /// # Errors
    ///
    /// Returns [`FetchFailure`] on transport-level failure.
    fn fetch(&self, method: FetchMethod, url: &str) -> Result<FetchResponse, FetchFailure>;
}

/// Fetcher backed by a blocking `reqwest` client following redirects.
pub struct HttpFetcher {
    /// Underlying HTTP client.
    client: reqwest::blocking::Client,
}

impl HttpFetcher {
    /// Builds a fetcher honoring the policy's request timeout.
    ///
    /// # Errors
    ///
    /// Returns the client build failure text.
    pub fn new(policy: &ResolverPolicy) -> Result<Self, String> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_millis(policy.request_timeout_ms))
            .redirect(reqwest::redirect::Policy::limited(10))
            .user_agent("deep-research/0.1")
            .build()
            .map_err(|err| err.to_string())?;
        Ok(Self {
            client,
        })
    }
}

impl UrlFetcher for HttpFetcher {
    fn fetch(&self, method: FetchMethod, url: &str) -> Result<FetchResponse, FetchFailure> {
        let request = match method {
            FetchMethod::Head => self.client.head(url),
            FetchMethod::Get => self.client.get(url),
        };
        let response = request.send().map_err(|err| FetchFailure {
            message: err.to_string(),
            transient: is_transient_error_text(&err.to_string()),
        })?;
        let retry_after_seconds = response
            .headers()
            .get("retry-after")
            .and_then(|value| value.to_str().ok())
            .and_then(|text| text.trim().parse::<u64>().ok());
        Ok(FetchResponse {
            status: response.status().as_u16(),
            final_url: response.url().to_string(),
            retry_after_seconds,
        })
    }
}

/// Returns true for known transient network error texts.
fn is_transient_error_text(text: &str) -> bool {
    const TRANSIENT_MARKERS: &[&str] = &[
        "ECONNRESET",
        "ETIMEDOUT",
        "ENOTFOUND",
        "ECONNREFUSED",
        "EPIPE",
        "EAI_AGAIN",
        "socket hang up",
        "timed out",
        "connection reset",
        "connection closed",
        "dns error",
    ];
    let lower = text.to_ascii_lowercase();
    TRANSIENT_MARKERS.iter().any(|marker| lower.contains(&marker.to_ascii_lowercase()))
}

// ============================================================================
// SECTION: Sleep Seam
// ============================================================================

/// Sleep seam so backoff stays testable without real delays.
pub trait Sleeper {
    /// Sleeps for the given duration.
    fn sleep(&self, duration: Duration);
}

/// Sleeper backed by the OS.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

// ============================================================================
// SECTION: Resolution
// ============================================================================

/// Outcome of resolving one URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    /// Input URL as given.
    pub input_url: String,
    /// Canonical final URL, when resolution succeeded.
    pub resolved_url: Option<String>,
    /// Attempts performed for this resolution (0 for cache hits).
    pub attempts: u32,
    /// Last HTTP status observed.
    pub last_status: Option<u16>,
    /// Last error text observed.
    pub last_error: Option<String>,
    /// True when the result came from the cache.
    pub from_cache: bool,
}

/// Returns the backoff delay for an attempt: exponential with full jitter,
/// capped, and floored by any `Retry-After` value.
#[must_use]
pub fn backoff_delay(
    policy: &ResolverPolicy,
    attempt: u32,
    retry_after_seconds: Option<u64>,
) -> Duration {
    let exponent = attempt.min(20);
    let uncapped = policy.initial_delay_ms.saturating_mul(1_u64 << exponent);
    let capped = uncapped.min(policy.max_delay_ms);
    let jittered = rand::thread_rng().gen_range(0 ..= capped);
    let floor_ms = retry_after_seconds.unwrap_or(0).saturating_mul(1_000);
    Duration::from_millis(jittered.max(floor_ms))
}

/// Resolves one URL through the fetch seam.
///
/// Performs up to `max_attempts` attempts; each attempt starts with a HEAD
/// and falls back to GET on 403/405. The final URL of a 2xx response is
/// canonicalized; canonicalization rejections are terminal.
pub fn resolve_url(
    fetcher: &dyn UrlFetcher,
    sleeper: &dyn Sleeper,
    policy: &ResolverPolicy,
    input_url: &str,
) -> Resolution {
    let mut attempts: u32 = 0;
    let mut last_status: Option<u16> = None;
    let mut last_error: Option<String> = None;

    while attempts < policy.max_attempts {
        let attempt_index = attempts;
        attempts += 1;

        let response = match fetcher.fetch(FetchMethod::Head, input_url) {
            Ok(response) if response.status == 403 || response.status == 405 => {
                fetcher.fetch(FetchMethod::Get, input_url)
            }
            other => other,
        };

        match response {
            Ok(response) => {
                last_status = Some(response.status);
                if (200 .. 300).contains(&response.status) {
                    match canonicalize_url(&response.final_url) {
                        Ok(resolved) => {
                            return Resolution {
                                input_url: input_url.to_string(),
                                resolved_url: Some(resolved),
                                attempts,
                                last_status,
                                last_error: None,
                                from_cache: false,
                            };
                        }
                        Err(err) => {
                            last_error = Some(err.to_string());
                            break;
                        }
                    }
                }
                if is_retryable_status(response.status) && attempts < policy.max_attempts {
                    sleeper.sleep(backoff_delay(
                        policy,
                        attempt_index,
                        response.retry_after_seconds,
                    ));
                    continue;
                }
                last_error = Some(format!("http status {}", response.status));
                break;
            }
            Err(failure) => {
                last_error = Some(failure.message);
                if failure.transient && attempts < policy.max_attempts {
                    sleeper.sleep(backoff_delay(policy, attempt_index, None));
                    continue;
                }
                break;
            }
        }
    }

    Resolution {
        input_url: input_url.to_string(),
        resolved_url: None,
        attempts,
        last_status,
        last_error,
        from_cache: false,
    }
}

/// Returns true for retryable HTTP statuses: 408, 429, and 5xx.
#[must_use]
pub const fn is_retryable_status(status: u16) -> bool {
    status == 408 || status == 429 || (status >= 500 && status < 600)
}
