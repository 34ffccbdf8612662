// crates/deep-research-core/src/core/identifiers.rs
// ============================================================================
// Module: Deep Research Identifiers
// Description: Canonical opaque identifiers for runs, perspectives, and agents.
// Purpose: Provide strongly typed, path-safe identifiers with stable wire forms.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! This module defines the canonical identifiers used throughout the
//! orchestrator. Run and perspective identifiers are embedded into on-disk
//! paths, so they enforce safe-path-segment invariants at construction
//! boundaries. Agent run identifiers are opaque strings supplied by drivers.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

// ============================================================================
// SECTION: Limits
// ============================================================================

/// Maximum length of a path-safe identifier segment.
const MAX_SEGMENT_LENGTH: usize = 128;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised when constructing path-safe identifiers.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdentifierError {
    /// Identifier is empty.
    #[error("identifier must not be empty")]
    Empty,
    /// Identifier exceeds the maximum segment length.
    #[error("identifier exceeds {MAX_SEGMENT_LENGTH} characters: {0}")]
    TooLong(String),
    /// Identifier contains a character outside the safe set.
    #[error("identifier contains unsafe character {character:?}: {value}")]
    UnsafeCharacter {
        /// Offending identifier value.
        value: String,
        /// First unsafe character encountered.
        character: char,
    },
    /// Identifier is a reserved path segment (`.` or `..`).
    #[error("identifier is a reserved path segment: {0}")]
    Reserved(String),
}

/// Validates a path-safe identifier segment.
///
/// # Errors
///
/// Returns [`IdentifierError`] when the segment is empty, too long, reserved,
/// or contains characters outside `[A-Za-z0-9._-]`.
fn validate_segment(value: &str) -> Result<(), IdentifierError> {
    if value.is_empty() {
        return Err(IdentifierError::Empty);
    }
    if value.len() > MAX_SEGMENT_LENGTH {
        return Err(IdentifierError::TooLong(value.to_string()));
    }
    if value == "." || value == ".." {
        return Err(IdentifierError::Reserved(value.to_string()));
    }
    for character in value.chars() {
        let safe = character.is_ascii_alphanumeric()
            || character == '-'
            || character == '_'
            || character == '.';
        if !safe {
            return Err(IdentifierError::UnsafeCharacter {
                value: value.to_string(),
                character,
            });
        }
    }
    Ok(())
}

// ============================================================================
// SECTION: Run Identifier
// ============================================================================

/// Run identifier naming one orchestrated research run.
///
/// # Invariants
/// - Always a safe path segment: `[A-Za-z0-9._-]`, non-empty, not `.`/`..`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(String);

impl RunId {
    /// Creates a run identifier after validating path safety.
    ///
    /// # Errors
    ///
    /// Returns [`IdentifierError`] when the value is not a safe path segment.
    pub fn new(value: impl Into<String>) -> Result<Self, IdentifierError> {
        let value = value.into();
        validate_segment(&value)?;
        Ok(Self(value))
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// ============================================================================
// SECTION: Perspective Identifier
// ============================================================================

/// Perspective identifier naming one research angle inside a run.
///
/// # Invariants
/// - Always a safe path segment: `[A-Za-z0-9._-]`, non-empty, not `.`/`..`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PerspectiveId(String);

impl PerspectiveId {
    /// Creates a perspective identifier after validating path safety.
    ///
    /// # Errors
    ///
    /// Returns [`IdentifierError`] when the value is not a safe path segment.
    pub fn new(value: impl Into<String>) -> Result<Self, IdentifierError> {
        let value = value.into();
        validate_segment(&value)?;
        Ok(Self(value))
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PerspectiveId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// ============================================================================
// SECTION: Agent Run Identifier
// ============================================================================

/// Agent run identifier assigned by the driver that produced an output.
///
/// # Invariants
/// - Opaque UTF-8 string; no normalization or validation is applied by this type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentRunId(String);

impl AgentRunId {
    /// Creates a new agent run identifier.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AgentRunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for AgentRunId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for AgentRunId {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}
