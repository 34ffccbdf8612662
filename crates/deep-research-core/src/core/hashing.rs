// crates/deep-research-core/src/core/hashing.rs
// ============================================================================
// Module: Deep Research Canonical Hashing
// Description: RFC 8785 JSON canonicalization and digest utilities.
// Purpose: Provide deterministic digests for plans, prompts, and audit records.
// Dependencies: serde, serde_jcs, sha2
// ============================================================================

//! ## Overview
//! Every digest used for idempotency binds to RFC 8785 (JCS) canonical JSON:
//! object keys sorted, numbers normalized. Two semantically equal values
//! always produce the same digest. Prompt digests hash the raw markdown
//! bytes. Digest strings carry a `sha256:` prefix so the algorithm is
//! self-describing on disk.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Serialize;
use sha2::Digest;
use sha2::Sha256;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Prefix identifying SHA-256 digest strings.
pub const SHA256_PREFIX: &str = "sha256:";

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised when computing canonical digests.
#[derive(Debug, Error)]
pub enum HashError {
    /// JSON canonicalization failed.
    #[error("failed to canonicalize json: {0}")]
    Canonicalization(String),
}

// ============================================================================
// SECTION: Digest Helpers
// ============================================================================

/// Returns canonical JSON bytes for a serializable value using RFC 8785.
///
/// # Errors
///
/// Returns [`HashError::Canonicalization`] when serialization fails.
pub fn canonical_json_bytes<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, HashError> {
    serde_jcs::to_vec(value).map_err(|err| HashError::Canonicalization(err.to_string()))
}

/// Digests a serializable value over its canonical JSON form.
///
/// # Errors
///
/// Returns [`HashError::Canonicalization`] when serialization fails.
pub fn digest_value<T: Serialize + ?Sized>(value: &T) -> Result<String, HashError> {
    let bytes = canonical_json_bytes(value)?;
    Ok(digest_bytes(&bytes))
}

/// Digests a prompt or other text over its raw UTF-8 bytes.
#[must_use]
pub fn digest_text(text: &str) -> String {
    digest_bytes(text.as_bytes())
}

/// Digests raw bytes, producing a `sha256:`-prefixed lowercase hex string.
#[must_use]
pub fn digest_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    let mut out = String::with_capacity(SHA256_PREFIX.len() + digest.len() * 2);
    out.push_str(SHA256_PREFIX);
    out.push_str(&hex_encode(&digest));
    out
}

// ============================================================================
// SECTION: Hex Encoding
// ============================================================================

/// Encodes bytes as a lowercase hex string.
fn hex_encode(bytes: &[u8]) -> String {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push(HEX[(byte >> 4) as usize] as char);
        out.push(HEX[(byte & 0x0f) as usize] as char);
    }
    out
}
