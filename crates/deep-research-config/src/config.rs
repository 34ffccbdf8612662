// crates/deep-research-config/src/config.rs
// ============================================================================
// Module: Run Configuration
// Description: Run config document and fail-closed policy resolution.
// Purpose: Resolve the effective run policy from defaults, the policy file,
//          and environment overrides.
// Dependencies: deep-research-core, deep-research-store, serde
// ============================================================================

//! ## Overview
//! Policy resolution is layered: built-in defaults, then
//! `run-config/policy.json` when present, then `DEEP_RESEARCH_*` environment
//! overrides. The resolved policy is validated fail-closed before the engine
//! consumes it; a zero budget or timeout is a configuration error, never a
//! silent no-op.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::path::Path;

use deep_research_core::ErrorCode;
use deep_research_core::QuerySpec;
use deep_research_core::RUN_POLICY_SCHEMA_VERSION;
use deep_research_core::RunId;
use deep_research_core::RunLayout;
use deep_research_core::RunLimits;
use deep_research_core::RunPolicy;
use deep_research_core::Stage;
use deep_research_core::Timestamp;
use deep_research_store::StoreError;
use deep_research_store::read_json_optional;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Schema version for the run config document.
pub const RUN_CONFIG_SCHEMA_VERSION: &str = "run_config.v1";
/// Environment prefix for policy overrides.
pub const ENV_PREFIX: &str = "DEEP_RESEARCH_";

// ============================================================================
// SECTION: Run Config Document
// ============================================================================

/// Run configuration document (`run-config.json`), written once by `init`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunConfigDoc {
    /// Run config schema version.
    pub schema_version: String,
    /// Run the configuration belongs to.
    pub run_id: RunId,
    /// Instant the run was configured.
    pub created_at: Timestamp,
    /// Query echoed from the manifest for offline inspection.
    pub query: QuerySpec,
    /// Limits echoed from the manifest for offline inspection.
    pub limits: RunLimits,
}

impl RunConfigDoc {
    /// Creates the run config document for a new run.
    #[must_use]
    pub fn new(run_id: RunId, query: QuerySpec, limits: RunLimits, created_at: Timestamp) -> Self {
        Self {
            schema_version: RUN_CONFIG_SCHEMA_VERSION.to_string(),
            run_id,
            created_at,
            query,
            limits,
        }
    }
}

// ============================================================================
// SECTION: Policy Document
// ============================================================================

/// On-disk policy document (`run-config/policy.json`).
///
/// All sections are optional; absent sections fall back to defaults.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PolicyDoc {
    /// Policy schema version.
    #[serde(default = "default_policy_schema_version")]
    pub schema_version: String,
    /// The policy body, deep-merged over defaults.
    #[serde(flatten)]
    pub policy: RunPolicy,
}

/// Returns the default policy schema version.
fn default_policy_schema_version() -> String {
    RUN_POLICY_SCHEMA_VERSION.to_string()
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Configuration errors.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Policy document failed to load.
    #[error("policy document failed to load: {0}")]
    Load(#[from] StoreError),
    /// An environment override failed to parse.
    #[error("environment override {name} is invalid: {value}")]
    InvalidOverride {
        /// Environment variable name.
        name: String,
        /// Offending value.
        value: String,
    },
    /// The resolved policy failed validation.
    #[error("policy validation failed: {0}")]
    Invalid(String),
}

impl ConfigError {
    /// Returns the stable code for the error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Load(_) => ErrorCode::InvalidState,
            Self::InvalidOverride { .. } | Self::Invalid(_) => ErrorCode::InvalidArgs,
        }
    }
}

// ============================================================================
// SECTION: Resolution
// ============================================================================

/// Environment reader seam so tests stay hermetic.
pub trait EnvReader {
    /// Returns the value of an environment variable when set.
    fn get(&self, name: &str) -> Option<String>;
}

/// Environment reader backed by the process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnv;

impl EnvReader for ProcessEnv {
    fn get(&self, name: &str) -> Option<String> {
        std::env::var(name).ok()
    }
}

/// Environment reader backed by a fixed map (test seam).
#[derive(Debug, Clone, Default)]
pub struct MapEnv {
    /// Variable values keyed by name.
    pub values: BTreeMap<String, String>,
}

impl EnvReader for MapEnv {
    fn get(&self, name: &str) -> Option<String> {
        self.values.get(name).cloned()
    }
}

/// Resolves the effective run policy for a run root.
///
/// Layering: defaults, then `run-config/policy.json` when present, then
/// `DEEP_RESEARCH_*` environment overrides. The result is validated
/// fail-closed.
///
/// # Errors
///
/// Returns [`ConfigError`] when the policy document is unreadable, an
/// override fails to parse, or validation fails.
pub fn resolve_policy(run_root: &Path, env: &dyn EnvReader) -> Result<RunPolicy, ConfigError> {
    let layout = RunLayout::from_root(run_root.to_path_buf());
    let mut policy = read_json_optional::<PolicyDoc>(&layout.policy_path())?
        .map(|doc| doc.policy)
        .unwrap_or_default();

    apply_env_overrides(&mut policy, env)?;
    validate_policy(&policy)?;
    Ok(policy)
}

/// Applies `DEEP_RESEARCH_*` environment overrides onto a policy.
fn apply_env_overrides(policy: &mut RunPolicy, env: &dyn EnvReader) -> Result<(), ConfigError> {
    if let Some(value) = env.get("DEEP_RESEARCH_STAGE_TIMEOUT_DEFAULT_SECONDS") {
        policy.stage_timeouts.default_seconds = parse_u64("DEEP_RESEARCH_STAGE_TIMEOUT_DEFAULT_SECONDS", &value)?;
    }
    for stage in deep_research_core::ALL_STAGES {
        let name = format!(
            "{ENV_PREFIX}STAGE_TIMEOUT_{}_SECONDS",
            stage.as_str().to_ascii_uppercase()
        );
        if let Some(value) = env.get(&name) {
            let seconds = parse_u64(&name, &value)?;
            policy.stage_timeouts.overrides.insert(stage, seconds);
        }
    }
    if let Some(value) = env.get("DEEP_RESEARCH_METRICS_REFRESH_INTERVAL_TICKS") {
        policy.tick.metrics_refresh_interval_ticks =
            parse_u64("DEEP_RESEARCH_METRICS_REFRESH_INTERVAL_TICKS", &value)?;
    }
    if let Some(value) = env.get("DEEP_RESEARCH_STALE_MARKER_SECONDS") {
        policy.tick.stale_marker_seconds = parse_u64("DEEP_RESEARCH_STALE_MARKER_SECONDS", &value)?;
    }
    if let Some(value) = env.get("DEEP_RESEARCH_LOCK_LEASE_SECONDS") {
        policy.tick.heartbeat.lease_seconds = parse_u64("DEEP_RESEARCH_LOCK_LEASE_SECONDS", &value)?;
    }
    if let Some(value) = env.get("DEEP_RESEARCH_DIRECT_FETCH_MAX_ATTEMPTS") {
        policy.ladder.direct_fetch_max_attempts =
            parse_u32("DEEP_RESEARCH_DIRECT_FETCH_MAX_ATTEMPTS", &value)?;
    }
    if let Some(value) = env.get("DEEP_RESEARCH_RESOLVER_TTL_SECONDS") {
        policy.resolver.ttl_seconds = parse_u64("DEEP_RESEARCH_RESOLVER_TTL_SECONDS", &value)?;
    }
    if let Some(value) = env.get("DEEP_RESEARCH_RESOLVER_MAX_ATTEMPTS") {
        policy.resolver.max_attempts = parse_u32("DEEP_RESEARCH_RESOLVER_MAX_ATTEMPTS", &value)?;
    }
    if let Some(value) = env.get("DEEP_RESEARCH_RESOLVER_CONCURRENCY") {
        policy.resolver.concurrency = parse_u32("DEEP_RESEARCH_RESOLVER_CONCURRENCY", &value)?;
    }
    Ok(())
}

/// Parses an unsigned 64-bit override value.
fn parse_u64(name: &str, value: &str) -> Result<u64, ConfigError> {
    value.trim().parse::<u64>().map_err(|_| ConfigError::InvalidOverride {
        name: name.to_string(),
        value: value.to_string(),
    })
}

/// Parses an unsigned 32-bit override value.
fn parse_u32(name: &str, value: &str) -> Result<u32, ConfigError> {
    value.trim().parse::<u32>().map_err(|_| ConfigError::InvalidOverride {
        name: name.to_string(),
        value: value.to_string(),
    })
}

// ============================================================================
// SECTION: Validation
// ============================================================================

/// Validates a resolved policy fail-closed.
///
/// # Errors
///
/// Returns [`ConfigError::Invalid`] naming the first violated constraint.
pub fn validate_policy(policy: &RunPolicy) -> Result<(), ConfigError> {
    if policy.stage_timeouts.default_seconds == 0 {
        return Err(ConfigError::Invalid(
            "stage_timeouts.default_seconds must be > 0".to_string(),
        ));
    }
    for (stage, seconds) in &policy.stage_timeouts.overrides {
        if *seconds == 0 {
            return Err(ConfigError::Invalid(format!(
                "stage_timeouts.overrides.{stage} must be > 0"
            )));
        }
    }
    if policy.tick.metrics_refresh_interval_ticks == 0 {
        return Err(ConfigError::Invalid(
            "tick.metrics_refresh_interval_ticks must be > 0".to_string(),
        ));
    }
    if policy.tick.stale_marker_seconds == 0 {
        return Err(ConfigError::Invalid("tick.stale_marker_seconds must be > 0".to_string()));
    }
    if policy.tick.heartbeat.lease_seconds == 0 {
        return Err(ConfigError::Invalid("tick.heartbeat.lease_seconds must be > 0".to_string()));
    }
    if policy.tick.heartbeat.max_failures == 0 {
        return Err(ConfigError::Invalid("tick.heartbeat.max_failures must be > 0".to_string()));
    }
    if policy.ladder.direct_fetch_max_attempts == 0 {
        return Err(ConfigError::Invalid(
            "ladder.direct_fetch_max_attempts must be > 0".to_string(),
        ));
    }
    if policy.resolver.max_attempts == 0 {
        return Err(ConfigError::Invalid("resolver.max_attempts must be > 0".to_string()));
    }
    if policy.resolver.concurrency == 0 {
        return Err(ConfigError::Invalid("resolver.concurrency must be > 0".to_string()));
    }
    if policy.resolver.ttl_seconds == 0 {
        return Err(ConfigError::Invalid("resolver.ttl_seconds must be > 0".to_string()));
    }
    if policy.resolver.max_delay_ms < policy.resolver.initial_delay_ms {
        return Err(ConfigError::Invalid(
            "resolver.max_delay_ms must be >= resolver.initial_delay_ms".to_string(),
        ));
    }
    Ok(())
}

/// Returns the watchdog timeout for a stage under a policy, in seconds.
#[must_use]
pub fn stage_timeout_seconds(policy: &RunPolicy, stage: Stage) -> u64 {
    policy.stage_timeouts.for_stage(stage)
}
