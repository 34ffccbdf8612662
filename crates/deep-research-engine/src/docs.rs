// crates/deep-research-engine/src/docs.rs
// ============================================================================
// Module: Engine Documents
// Description: Retry directives, review bundle, url map, and summary
//              sidecars.
// Purpose: Model the stage-procedure documents not owned by the core schemas.
// Dependencies: deep-research-core, serde
// ============================================================================

//! ## Overview
//! These documents are produced and consumed by stage procedures: the
//! at-most-once retry directives for the wave-1 self-edge, the review bundle
//! backing gates E and F, the url map from the citations stage, and summary
//! sidecars.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use deep_research_core::PerspectiveId;
use deep_research_core::Timestamp;
use serde::Deserialize;
use serde::Serialize;

use crate::citations::CitationStatus;

// ============================================================================
// SECTION: Retry Directives
// ============================================================================

/// Schema version for retry directives.
pub const RETRY_DIRECTIVES_SCHEMA_VERSION: &str = "retry_directives.v1";

/// Operator-authored retry directives for the wave-1 self-edge.
///
/// # Invariants
/// - Directives are consumed at most once: `consumed_at` is set before the
///   retry executes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryDirectives {
    /// Directives schema version.
    pub schema_version: String,
    /// Perspectives whose outputs must be re-acquired.
    pub perspective_ids: Vec<PerspectiveId>,
    /// Operator-supplied reason.
    pub reason: String,
    /// Instant the directives were written.
    pub created_at: Timestamp,
    /// Instant the directives were consumed, once taken.
    pub consumed_at: Option<Timestamp>,
}

// ============================================================================
// SECTION: Review Bundle
// ============================================================================

/// Schema version for the review bundle.
pub const REVIEW_BUNDLE_SCHEMA_VERSION: &str = "review_bundle.v1";

/// Reviewer decision for the synthesis.
///
/// # Invariants
/// - Variants are stable for serialization and contract matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewDecision {
    /// Synthesis accepted; the run may finalize.
    Approve,
    /// Synthesis scaffold must be recomposed.
    RewriteSynthesis,
    /// Wave-2 coverage is insufficient; regress to wave2.
    RerunWave2,
}

/// Review bundle document (`review/review-bundle.json`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewBundle {
    /// Bundle schema version.
    pub schema_version: String,
    /// Reviewer decision.
    pub decision: ReviewDecision,
    /// Review iteration, starting at 1.
    pub iteration: u32,
    /// Fraction of citation URLs that validated.
    pub citation_coverage: f64,
    /// Fraction of repeated synthesis lines.
    pub duplicate_rate: f64,
    /// Numeric claims without nearby citations.
    pub uncited_numeric_count: u32,
    /// Reviewer notes.
    pub notes: Vec<String>,
    /// Instant the bundle was generated.
    pub generated_at: Timestamp,
}

// ============================================================================
// SECTION: URL Map
// ============================================================================

/// Schema version for the url map.
pub const URL_MAP_SCHEMA_VERSION: &str = "url_map.v1";

/// One url map entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UrlMapEntry {
    /// Validation status.
    pub status: CitationStatus,
    /// Canonical resolved URL, when redirect resolution produced one.
    pub resolved_url: Option<String>,
}

/// URL map document (`citations/url-map.json`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UrlMapDoc {
    /// URL map schema version.
    pub schema_version: String,
    /// Entries keyed by input URL.
    pub entries: BTreeMap<String, UrlMapEntry>,
}

/// Schema version for the blocked urls document.
pub const BLOCKED_URLS_SCHEMA_VERSION: &str = "blocked_urls.v1";

/// Blocked URLs document (`citations/blocked-urls.json`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockedUrlsDoc {
    /// Blocked urls schema version.
    pub schema_version: String,
    /// URLs that refused access on every ladder rung.
    pub blocked: Vec<String>,
}

// ============================================================================
// SECTION: Summary Sidecar
// ============================================================================

/// Schema version for summary sidecars.
pub const SUMMARY_META_SCHEMA_VERSION: &str = "summary_meta.v1";

/// Sidecar for one generated summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryMeta {
    /// Sidecar schema version.
    pub schema_version: String,
    /// Source output path the summary was derived from.
    pub source_path: String,
    /// Digest of the source output bytes.
    pub source_digest: String,
    /// Instant the summary was generated.
    pub generated_at: Timestamp,
}

// ============================================================================
// SECTION: Online Fixtures
// ============================================================================

/// Schema version for captured online fixtures.
pub const ONLINE_FIXTURES_SCHEMA_VERSION: &str = "online_fixtures.v1";

/// Captured tool envelopes for offline replay
/// (`citations/online-fixtures.<token>.json`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OnlineFixturesDoc {
    /// Fixtures schema version.
    pub schema_version: String,
    /// Capture token (tick-derived).
    pub token: String,
    /// Instant of the capture.
    pub captured_at: Timestamp,
    /// Recorded tool calls in execution order.
    pub calls: Vec<crate::drivers::RecordedToolCall>,
}
