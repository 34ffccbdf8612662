// crates/deep-research-store/src/paths.rs
// ============================================================================
// Module: Path Containment
// Description: Single resolver asserting every path stays inside the run root.
// Purpose: Defeat traversal and symlink escapes for externally influenced
//          paths.
// Dependencies: deep-research-core
// ============================================================================

//! ## Overview
//! Every path composed from external input passes through this resolver:
//! normalize, reject absolute components and `..` segments, then real-path
//! resolve both sides and assert containment against the run root. Real-path
//! resolution canonicalizes the deepest existing ancestor so not-yet-created
//! artifacts are still checked, and symlinked prefixes (`/var` vs
//! `/private/var`) compare equal.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs;
use std::path::Component;
use std::path::Path;
use std::path::PathBuf;

use deep_research_core::ErrorCode;
use thiserror::Error;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Path containment errors.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
#[derive(Debug, Error)]
pub enum PathError {
    /// Path escapes the run root.
    #[error("path escapes the run root: {0}")]
    Escapes(PathBuf),
    /// Relative path contains an absolute or parent component.
    #[error("path contains a forbidden component: {0}")]
    ForbiddenComponent(PathBuf),
    /// Filesystem resolution failed.
    #[error("path resolution failed for {path}: {message}")]
    Io {
        /// Path the resolution targeted.
        path: PathBuf,
        /// Underlying error text.
        message: String,
    },
}

impl PathError {
    /// Returns the stable code for the error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Escapes(_) | Self::ForbiddenComponent(_) => ErrorCode::PathTraversal,
            Self::Io { .. } => ErrorCode::InvalidState,
        }
    }
}

// ============================================================================
// SECTION: Containment
// ============================================================================

/// Resolves a relative path against the run root with containment asserted.
///
/// # Errors
///
/// Returns [`PathError`] when the relative path is empty, absolute, carries
/// `..` components, or resolves outside the run root.
pub fn contain_relative(run_root: &Path, relative: &str) -> Result<PathBuf, PathError> {
    let candidate = Path::new(relative);
    if relative.is_empty() || candidate.is_absolute() {
        return Err(PathError::ForbiddenComponent(candidate.to_path_buf()));
    }
    for component in candidate.components() {
        match component {
            Component::Normal(_) => {}
            _ => return Err(PathError::ForbiddenComponent(candidate.to_path_buf())),
        }
    }
    contain_absolute(run_root, &run_root.join(candidate))
}

/// Asserts that an absolute path resolves inside the run root.
///
/// # Errors
///
/// Returns [`PathError::Escapes`] when the real path lies outside the real
/// run root, and [`PathError::Io`] when resolution fails.
pub fn contain_absolute(run_root: &Path, candidate: &Path) -> Result<PathBuf, PathError> {
    let real_root = resolve_existing_prefix(run_root)?;
    let real_candidate = resolve_existing_prefix(candidate)?;
    if real_candidate.starts_with(&real_root) {
        return Ok(candidate.to_path_buf());
    }
    Err(PathError::Escapes(candidate.to_path_buf()))
}

/// Canonicalizes the deepest existing ancestor and re-appends the remainder.
fn resolve_existing_prefix(path: &Path) -> Result<PathBuf, PathError> {
    let mut existing = path.to_path_buf();
    let mut remainder: Vec<std::ffi::OsString> = Vec::new();
    loop {
        if existing.exists() {
            break;
        }
        match (existing.file_name(), existing.parent()) {
            (Some(name), Some(parent)) => {
                remainder.push(name.to_os_string());
                existing = parent.to_path_buf();
            }
            _ => break,
        }
    }
    let mut resolved = fs::canonicalize(&existing).map_err(|err| PathError::Io {
        path: existing.clone(),
        message: err.to_string(),
    })?;
    for segment in remainder.iter().rev() {
        // The remainder was already screened for `..` by the caller; re-check
        // so absolute-path callers get the same guarantee.
        if segment == ".." {
            return Err(PathError::ForbiddenComponent(path.to_path_buf()));
        }
        resolved.push(segment);
    }
    Ok(resolved)
}
