// crates/deep-research-config/src/lib.rs
// ============================================================================
// Module: Deep Research Config Library
// Description: Run configuration model and policy resolution.
// Purpose: Single source of truth for run-config.json and policy.json
//          semantics.
// Dependencies: deep-research-core, deep-research-store, serde
// ============================================================================

//! ## Overview
//! `deep-research-config` defines the run configuration document and
//! resolves the effective run policy from defaults, the on-disk policy
//! document, and environment overrides. Validation is strict and
//! fail-closed: a nonsensical budget is a configuration error, never a
//! silent fallback.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod config;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use config::ConfigError;
pub use config::ENV_PREFIX;
pub use config::EnvReader;
pub use config::MapEnv;
pub use config::PolicyDoc;
pub use config::ProcessEnv;
pub use config::RUN_CONFIG_SCHEMA_VERSION;
pub use config::RunConfigDoc;
pub use config::resolve_policy;
pub use config::stage_timeout_seconds;
pub use config::validate_policy;
