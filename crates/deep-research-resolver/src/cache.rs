// crates/deep-research-resolver/src/cache.rs
// ============================================================================
// Module: Redirect Cache
// Description: On-disk TTL cache for resolved redirect URLs.
// Purpose: Make repeated resolution of the same URL set perform zero network
//          I/O within the TTL.
// Dependencies: deep-research-core, serde, serde_json, uuid
// ============================================================================

//! ## Overview
//! The cache lives at `<session_dir>/research-shell/cache/redirects.json`.
//! An entry is fresh when `resolved_url` is set and `resolved_at` is within
//! the TTL. Saves are atomic (tmp + rename) with owner-only permissions;
//! save failures are reported but never fail a batch. A corrupt cache file
//! is replaced with an empty cache, reported to the caller.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;

use deep_research_core::Timestamp;
use serde::Deserialize;
use serde::Serialize;
use uuid::Uuid;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Cache schema version.
pub const CACHE_SCHEMA_VERSION: u32 = 1;
/// Cache sub-path under the session directory.
pub const CACHE_RELATIVE_PATH: &str = "research-shell/cache/redirects.json";

/// Returns the cache path for a session directory.
#[must_use]
pub fn cache_path(session_dir: &Path) -> PathBuf {
    session_dir.join(CACHE_RELATIVE_PATH)
}

// ============================================================================
// SECTION: Cache Model
// ============================================================================

/// One cached resolution attempt record.
///
/// # Invariants
/// - `attempts` counts lifetime resolution attempts for the URL.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Final resolved URL, when resolution has succeeded.
    pub resolved_url: Option<String>,
    /// Instant of the successful resolution.
    pub resolved_at: Option<Timestamp>,
    /// Instant of the most recent attempt.
    pub last_tried_at: Option<Timestamp>,
    /// Lifetime attempt count.
    pub attempts: u32,
    /// Last HTTP status observed.
    pub last_status: Option<u16>,
    /// Last error text observed.
    pub last_error: Option<String>,
}

impl CacheEntry {
    /// Returns true when the entry is fresh at `now` under the TTL.
    #[must_use]
    pub fn is_fresh(&self, now: Timestamp, ttl_seconds: u64) -> bool {
        match (&self.resolved_url, self.resolved_at) {
            (Some(_), Some(resolved_at)) => resolved_at.elapsed_seconds(now) <= ttl_seconds,
            _ => false,
        }
    }
}

/// Durable redirect cache document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedirectCache {
    /// Cache schema version.
    pub schema_version: u32,
    /// Entries keyed by input URL.
    #[serde(default)]
    pub entries: BTreeMap<String, CacheEntry>,
}

impl Default for RedirectCache {
    fn default() -> Self {
        Self {
            schema_version: CACHE_SCHEMA_VERSION,
            entries: BTreeMap::new(),
        }
    }
}

// ============================================================================
// SECTION: Load / Save
// ============================================================================

/// Loads the cache; a missing or corrupt file yields an empty cache.
///
/// The second element carries the load problem, when one occurred.
#[must_use]
pub fn load_cache(path: &Path) -> (RedirectCache, Option<String>) {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return (RedirectCache::default(), None);
        }
        Err(err) => return (RedirectCache::default(), Some(err.to_string())),
    };
    match serde_json::from_slice::<RedirectCache>(&bytes) {
        Ok(cache) if cache.schema_version == CACHE_SCHEMA_VERSION => (cache, None),
        Ok(cache) => (
            RedirectCache::default(),
            Some(format!("unsupported cache schema version: {}", cache.schema_version)),
        ),
        Err(err) => (RedirectCache::default(), Some(err.to_string())),
    }
}

/// Saves the cache atomically with owner-only permissions.
///
/// # Errors
///
/// Returns the failure text; callers report it without failing the batch.
pub fn save_cache(path: &Path, cache: &RedirectCache) -> Result<(), String> {
    let parent = path.parent().ok_or_else(|| "cache path has no parent".to_string())?;
    fs::create_dir_all(parent).map_err(|err| err.to_string())?;
    restrict_dir_permissions(parent);

    let tmp = parent.join(format!(".tmp-{}", Uuid::new_v4()));
    let mut bytes = serde_json::to_vec_pretty(cache).map_err(|err| err.to_string())?;
    bytes.push(b'\n');

    let mut file = fs::File::create(&tmp).map_err(|err| err.to_string())?;
    file.write_all(&bytes).map_err(|err| err.to_string())?;
    file.sync_all().map_err(|err| err.to_string())?;
    drop(file);
    restrict_file_permissions(&tmp);

    fs::rename(&tmp, path).map_err(|err| err.to_string())
}

/// Sets owner-only (0o700) permissions on the cache directory.
#[cfg(unix)]
fn restrict_dir_permissions(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    let _ = fs::set_permissions(path, fs::Permissions::from_mode(0o700));
}

/// Sets owner-only (0o600) permissions on the cache file.
#[cfg(unix)]
fn restrict_file_permissions(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    let _ = fs::set_permissions(path, fs::Permissions::from_mode(0o600));
}

/// Permissions narrowing is a no-op on non-unix targets.
#[cfg(not(unix))]
fn restrict_dir_permissions(_path: &Path) {}

/// Permissions narrowing is a no-op on non-unix targets.
#[cfg(not(unix))]
fn restrict_file_permissions(_path: &Path) {}
