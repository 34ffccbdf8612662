// crates/deep-research-engine/src/error.rs
// ============================================================================
// Module: Engine Errors
// Description: Unified engine error with stable code conversion.
// Purpose: Funnel every subsystem failure into one coded tick boundary.
// Dependencies: deep-research-config, deep-research-core, deep-research-store
// ============================================================================

//! ## Overview
//! Engine operations raise [`EngineError`]; the tick boundary converts it to
//! a [`CodedError`] so halt artifacts and CLI envelopes always carry a
//! stable code. Blocked stage advances attach the full evaluated check list
//! as structured details.

// ============================================================================
// SECTION: Imports
// ============================================================================

use deep_research_config::ConfigError;
use deep_research_core::AdvanceError;
use deep_research_core::CodedError;
use deep_research_core::DriverError;
use deep_research_core::ErrorCode;
use deep_research_core::HashError;
use deep_research_store::LockError;
use deep_research_store::PathError;
use deep_research_store::StoreError;
use thiserror::Error;

// ============================================================================
// SECTION: Engine Error
// ============================================================================

/// Unified engine error.
///
/// # Invariants
/// - Every variant maps to a stable [`ErrorCode`].
#[derive(Debug, Error)]
pub enum EngineError {
    /// Durable store failure.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Run lock failure.
    #[error(transparent)]
    Lock(#[from] LockError),
    /// Path containment failure.
    #[error(transparent)]
    Path(#[from] PathError),
    /// Configuration failure.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// Stage machine failure.
    #[error(transparent)]
    Advance(#[from] AdvanceError),
    /// Driver failure.
    #[error(transparent)]
    Driver(#[from] DriverError),
    /// Canonical hashing failure.
    #[error(transparent)]
    Hash(#[from] HashError),
    /// Already-coded failure.
    #[error(transparent)]
    Coded(#[from] CodedError),
}

impl EngineError {
    /// Returns the stable code for the error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Store(err) => err.code(),
            Self::Lock(err) => err.code(),
            Self::Path(err) => err.code(),
            Self::Config(err) => err.code(),
            Self::Advance(err) => err.code(),
            Self::Driver(err) => err.code(),
            Self::Hash(_) => ErrorCode::InvalidState,
            Self::Coded(err) => err.code,
        }
    }

    /// Converts the error into the coded tick-boundary form.
    #[must_use]
    pub fn into_coded(self) -> CodedError {
        match self {
            Self::Coded(err) => err,
            Self::Advance(AdvanceError::Blocked { decision }) => {
                let details = serde_json::to_value(&decision).unwrap_or(serde_json::Value::Null);
                CodedError::with_details(
                    ErrorCode::StageAdvanceBlocked,
                    format!("stage advance blocked: {} -> {}", decision.from, decision.to),
                    details,
                )
            }
            other => CodedError::new(other.code(), other.to_string()),
        }
    }
}
