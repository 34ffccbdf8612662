// crates/deep-research-core/src/core/policy.rs
// ============================================================================
// Module: Deep Research Run Policy
// Description: Per-run execution policy (timeouts, retries, ladder, resolver).
// Purpose: Make every timing and budget decision explicit and replayable.
// Dependencies: crate::core::stage, serde
// ============================================================================

//! ## Overview
//! The run policy collects every tunable the engine consults at runtime:
//! per-stage watchdog timeouts, tick cadence, lock lease and heartbeat
//! settings, the citation ladder attempt budgets, and the redirect resolver
//! parameters. It is resolved from `run-config/policy.json` plus environment
//! overrides by the config crate and validated fail-closed.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;

use crate::core::stage::Stage;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Schema version for the run policy document.
pub const RUN_POLICY_SCHEMA_VERSION: &str = "run_policy.v1";
/// Age after which a tick-in-progress marker is prior-crash evidence.
pub const STALE_TICK_MARKER_SECONDS: u64 = 5 * 60;

// ============================================================================
// SECTION: Stage Timeouts
// ============================================================================

/// Per-stage watchdog timeouts, in seconds.
///
/// # Invariants
/// - Stages absent from the map fall back to `default_seconds`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageTimeouts {
    /// Fallback timeout for stages without an explicit entry.
    pub default_seconds: u64,
    /// Explicit per-stage timeouts keyed by stage label.
    #[serde(default)]
    pub overrides: BTreeMap<Stage, u64>,
}

impl Default for StageTimeouts {
    fn default() -> Self {
        let mut overrides = BTreeMap::new();
        overrides.insert(Stage::Wave1, 3_600);
        overrides.insert(Stage::Wave2, 3_600);
        overrides.insert(Stage::Citations, 1_800);
        overrides.insert(Stage::Synthesis, 1_800);
        Self {
            default_seconds: 900,
            overrides,
        }
    }
}

impl StageTimeouts {
    /// Returns the timeout for a stage, in seconds.
    #[must_use]
    pub fn for_stage(&self, stage: Stage) -> u64 {
        self.overrides.get(&stage).copied().unwrap_or(self.default_seconds)
    }
}

// ============================================================================
// SECTION: Tick Policy
// ============================================================================

/// Lock lease and heartbeat settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatPolicy {
    /// Lock lease duration, in seconds.
    pub lease_seconds: u64,
    /// Heartbeat refresh interval, in milliseconds.
    pub interval_ms: u64,
    /// Consecutive refresh failures before the loss callback fires.
    pub max_failures: u32,
}

impl Default for HeartbeatPolicy {
    fn default() -> Self {
        Self {
            lease_seconds: 60,
            interval_ms: 10_000,
            max_failures: 3,
        }
    }
}

/// Tick cadence settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickPolicy {
    /// Refresh `run-metrics.json` every N ticks (stage boundaries always refresh).
    pub metrics_refresh_interval_ticks: u64,
    /// Age in seconds after which a tick marker is treated as stale.
    pub stale_marker_seconds: u64,
    /// Lock lease and heartbeat settings.
    pub heartbeat: HeartbeatPolicy,
}

impl Default for TickPolicy {
    fn default() -> Self {
        Self {
            metrics_refresh_interval_ticks: 5,
            stale_marker_seconds: STALE_TICK_MARKER_SECONDS,
            heartbeat: HeartbeatPolicy::default(),
        }
    }
}

// ============================================================================
// SECTION: Citation Ladder
// ============================================================================

/// Attempt budgets for the citation validator ladder.
///
/// # Invariants
/// - Rungs are consulted in order: direct fetch, then BrightData, then Apify.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LadderPolicy {
    /// Direct fetch attempts per URL.
    pub direct_fetch_max_attempts: u32,
    /// BrightData attempts per URL.
    pub brightdata_max_attempts: u32,
    /// Apify attempts per URL.
    pub apify_max_attempts: u32,
}

impl Default for LadderPolicy {
    fn default() -> Self {
        Self {
            direct_fetch_max_attempts: 2,
            brightdata_max_attempts: 1,
            apify_max_attempts: 1,
        }
    }
}

// ============================================================================
// SECTION: Retry Budget
// ============================================================================

/// Retry budgets for stage self-edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryBudget {
    /// Maximum wave-1 retries driven by retry directives.
    pub max_wave1_retries: u32,
}

impl Default for RetryBudget {
    fn default() -> Self {
        Self {
            max_wave1_retries: 2,
        }
    }
}

// ============================================================================
// SECTION: Resolver Policy
// ============================================================================

/// Redirect resolver parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolverPolicy {
    /// Cache freshness TTL, in seconds.
    pub ttl_seconds: u64,
    /// Resolution attempts per URL.
    pub max_attempts: u32,
    /// Initial backoff delay, in milliseconds.
    pub initial_delay_ms: u64,
    /// Backoff delay cap, in milliseconds.
    pub max_delay_ms: u64,
    /// Bounded worker-pool concurrency.
    pub concurrency: u32,
    /// Per-request timeout, in milliseconds.
    pub request_timeout_ms: u64,
}

impl Default for ResolverPolicy {
    fn default() -> Self {
        Self {
            ttl_seconds: 7 * 24 * 3_600,
            max_attempts: 3,
            initial_delay_ms: 500,
            max_delay_ms: 8_000,
            concurrency: 3,
            request_timeout_ms: 10_000,
        }
    }
}

// ============================================================================
// SECTION: Run Policy
// ============================================================================

/// Complete per-run execution policy.
///
/// # Invariants
/// - All budgets and delays are validated fail-closed before use.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RunPolicy {
    /// Per-stage watchdog timeouts.
    #[serde(default, rename = "stage_timeouts_seconds_v1")]
    pub stage_timeouts: StageTimeouts,
    /// Tick cadence settings.
    #[serde(default)]
    pub tick: TickPolicy,
    /// Citation ladder budgets.
    #[serde(default)]
    pub ladder: LadderPolicy,
    /// Stage retry budgets.
    #[serde(default)]
    pub retry: RetryBudget,
    /// Redirect resolver parameters.
    #[serde(default)]
    pub resolver: ResolverPolicy,
}
