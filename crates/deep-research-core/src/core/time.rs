// crates/deep-research-core/src/core/time.rs
// ============================================================================
// Module: Deep Research Time Model
// Description: Canonical UTC timestamps for manifests, ledgers, and telemetry.
// Purpose: Provide one RFC 3339 wire form for every recorded instant.
// Dependencies: serde, time
// ============================================================================

//! ## Overview
//! Every durable record in a run root carries explicit UTC instants in
//! RFC 3339 form. The wrapper keeps wall-clock reads at the edges: procedures
//! take a caller-supplied `now` so replay and tests stay deterministic.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use time::Duration;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

// ============================================================================
// SECTION: Timestamp
// ============================================================================

/// Canonical UTC timestamp used across run artifacts.
///
/// # Invariants
/// - Serializes as an RFC 3339 string; parsing rejects non-RFC 3339 input.
/// - Comparisons follow instant ordering, independent of textual offset form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(#[serde(with = "time::serde::rfc3339")] OffsetDateTime);

impl Timestamp {
    /// Returns the current wall-clock instant in UTC.
    #[must_use]
    pub fn now() -> Self {
        Self(OffsetDateTime::now_utc())
    }

    /// Wraps an explicit instant.
    #[must_use]
    pub const fn from_odt(value: OffsetDateTime) -> Self {
        Self(value)
    }

    /// Returns the wrapped instant.
    #[must_use]
    pub const fn as_odt(&self) -> OffsetDateTime {
        self.0
    }

    /// Returns the instant as unix seconds.
    #[must_use]
    pub const fn unix_seconds(&self) -> i64 {
        self.0.unix_timestamp()
    }

    /// Returns whole seconds elapsed from `self` to `now`, saturating at zero.
    #[must_use]
    pub fn elapsed_seconds(&self, now: Self) -> u64 {
        let elapsed = now.0 - self.0;
        if elapsed.is_negative() {
            return 0;
        }
        u64::try_from(elapsed.whole_seconds()).unwrap_or(0)
    }

    /// Returns a timestamp shifted by the given number of seconds.
    #[must_use]
    pub fn plus_seconds(&self, seconds: i64) -> Self {
        Self(self.0.saturating_add(Duration::seconds(seconds)))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.format(&Rfc3339) {
            Ok(text) => f.write_str(&text),
            Err(_) => f.write_str("<invalid-timestamp>"),
        }
    }
}
