// crates/deep-research-store/src/store.rs
// ============================================================================
// Module: Durable Run Store
// Description: Atomic manifest writes with optimistic concurrency and JSONL
//              streams.
// Purpose: Persist run state so readers never observe a torn file.
// Dependencies: deep-research-core, serde_json, uuid
// ============================================================================

//! ## Overview
//! The store owns every byte written into a run root. Manifest mutations are
//! optimistic-concurrency writes: the caller presents the revision it read,
//! the store deep-merges the patch, bumps the revision by exactly one, keeps
//! `updated_at` monotone, and replaces the file atomically (tmp + fsync +
//! rename). Each successful write appends an audit record whose
//! `patch_digest` is canonical, so semantically equal patches audit
//! identically. Documents are untrusted on load and fail closed.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;

use deep_research_core::AuditRecord;
use deep_research_core::ErrorCode;
use deep_research_core::HashError;
use deep_research_core::MANIFEST_SCHEMA_VERSION;
use deep_research_core::Manifest;
use deep_research_core::ManifestError;
use deep_research_core::Timestamp;
use deep_research_core::digest_value;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Map;
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Durable store errors.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Filesystem operation failed.
    #[error("store io error at {path}: {message}")]
    Io {
        /// Path the operation targeted.
        path: PathBuf,
        /// Underlying error text.
        message: String,
    },
    /// Document failed to parse as JSON.
    #[error("store parse error at {path}: {message}")]
    Parse {
        /// Path the operation targeted.
        path: PathBuf,
        /// Underlying error text.
        message: String,
    },
    /// Document is not a JSON object.
    #[error("document is not a json object: {path}")]
    NotObject {
        /// Path the operation targeted.
        path: PathBuf,
    },
    /// Manifest schema version is not supported.
    #[error("unsupported manifest schema version: {found}")]
    SchemaVersion {
        /// Schema version found in the document.
        found: String,
    },
    /// On-disk revision did not match the writer's expectation.
    #[error("manifest revision conflict (expected {expected}, found {actual})")]
    RevisionConflict {
        /// Revision the writer expected.
        expected: u64,
        /// Revision found on disk.
        actual: u64,
    },
    /// Merged manifest failed invariant validation.
    #[error("manifest invalid after merge: {0}")]
    InvalidManifest(#[from] ManifestError),
    /// Canonical digest computation failed.
    #[error("store hashing failure: {0}")]
    Hashing(#[from] HashError),
}

impl StoreError {
    /// Returns the stable code for the error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::RevisionConflict { .. } => ErrorCode::RevisionConflict,
            Self::Io { .. }
            | Self::Parse { .. }
            | Self::NotObject { .. }
            | Self::SchemaVersion { .. }
            | Self::InvalidManifest(_)
            | Self::Hashing(_) => ErrorCode::InvalidState,
        }
    }
}

/// Maps an I/O error to a [`StoreError::Io`].
fn io_error(path: &Path, err: &std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.to_path_buf(),
        message: err.to_string(),
    }
}

// ============================================================================
// SECTION: Atomic JSON
// ============================================================================

/// Serializes a value to pretty JSON terminated with a newline.
///
/// # Errors
///
/// Returns [`StoreError::Parse`] when serialization fails.
pub fn to_json_bytes<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<Vec<u8>, StoreError> {
    let mut bytes = serde_json::to_vec_pretty(value).map_err(|err| StoreError::Parse {
        path: path.to_path_buf(),
        message: err.to_string(),
    })?;
    bytes.push(b'\n');
    Ok(bytes)
}

/// Writes a JSON document atomically: tmp file, fsync, rename, dir fsync.
///
/// # Errors
///
/// Returns [`StoreError`] when serialization or any filesystem step fails.
pub fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), StoreError> {
    let bytes = to_json_bytes(path, value)?;
    write_bytes_atomic(path, &bytes)
}

/// Writes raw bytes atomically: tmp file, fsync, rename, dir fsync.
///
/// # Errors
///
/// Returns [`StoreError`] when any filesystem step fails.
pub fn write_bytes_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let parent = path.parent().ok_or_else(|| StoreError::Io {
        path: path.to_path_buf(),
        message: "path has no parent directory".to_string(),
    })?;
    fs::create_dir_all(parent).map_err(|err| io_error(parent, &err))?;

    let tmp_name = match path.file_name().and_then(|name| name.to_str()) {
        Some(name) => format!("{name}.tmp-{}", Uuid::new_v4()),
        None => format!(".tmp-{}", Uuid::new_v4()),
    };
    let tmp_path = parent.join(tmp_name);

    let mut file = fs::File::create(&tmp_path).map_err(|err| io_error(&tmp_path, &err))?;
    file.write_all(bytes).map_err(|err| io_error(&tmp_path, &err))?;
    file.sync_all().map_err(|err| io_error(&tmp_path, &err))?;
    drop(file);

    fs::rename(&tmp_path, path).map_err(|err| io_error(path, &err))?;
    if let Ok(dir) = fs::File::open(parent) {
        let _ = dir.sync_all();
    }
    Ok(())
}

/// Reads and deserializes a JSON document.
///
/// # Errors
///
/// Returns [`StoreError`] when the file is unreadable or fails to parse.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, StoreError> {
    let bytes = fs::read(path).map_err(|err| io_error(path, &err))?;
    serde_json::from_slice(&bytes).map_err(|err| StoreError::Parse {
        path: path.to_path_buf(),
        message: err.to_string(),
    })
}

/// Reads a JSON document, returning `None` when the file does not exist.
///
/// # Errors
///
/// Returns [`StoreError`] when the file exists but is unreadable or invalid.
pub fn read_json_optional<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
    if !path.exists() {
        return Ok(None);
    }
    read_json(path).map(Some)
}

// ============================================================================
// SECTION: JSONL Streams
// ============================================================================

/// Appends one newline-terminated record to a JSONL stream.
///
/// Parent directories are created as needed.
///
/// # Errors
///
/// Returns [`StoreError`] when serialization or the append fails.
pub fn append_jsonl<T: Serialize + ?Sized>(path: &Path, record: &T) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|err| io_error(parent, &err))?;
    }
    let mut line = serde_json::to_vec(record).map_err(|err| StoreError::Parse {
        path: path.to_path_buf(),
        message: err.to_string(),
    })?;
    line.push(b'\n');
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|err| io_error(path, &err))?;
    file.write_all(&line).map_err(|err| io_error(path, &err))?;
    file.sync_all().map_err(|err| io_error(path, &err))?;
    Ok(())
}

/// Reads every record of a JSONL stream; a missing file reads as empty.
///
/// # Errors
///
/// Returns [`StoreError`] when the file is unreadable or any line fails to
/// parse.
pub fn read_jsonl<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>, StoreError> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let text = fs::read_to_string(path).map_err(|err| io_error(path, &err))?;
    let mut records = Vec::new();
    for line in text.lines() {
        if line.trim().is_empty() {
            continue;
        }
        let record = serde_json::from_str(line).map_err(|err| StoreError::Parse {
            path: path.to_path_buf(),
            message: err.to_string(),
        })?;
        records.push(record);
    }
    Ok(records)
}

// ============================================================================
// SECTION: Manifest Access
// ============================================================================

/// Manifest snapshot returned by [`read_manifest`].
#[derive(Debug, Clone)]
pub struct ManifestSnapshot {
    /// Parsed and validated manifest.
    pub manifest: Manifest,
    /// Revision read from disk.
    pub revision: u64,
}

/// Reads and validates the manifest document.
///
/// # Errors
///
/// Returns [`StoreError`] when the document is unreadable, not an object,
/// carries an unsupported schema version, or fails invariant validation.
pub fn read_manifest(path: &Path) -> Result<ManifestSnapshot, StoreError> {
    let value: Value = read_json(path)?;
    let Value::Object(object) = &value else {
        return Err(StoreError::NotObject {
            path: path.to_path_buf(),
        });
    };
    let found = object
        .get("schema_version")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    if found != MANIFEST_SCHEMA_VERSION {
        return Err(StoreError::SchemaVersion {
            found,
        });
    }
    let manifest: Manifest = serde_json::from_value(value).map_err(|err| StoreError::Parse {
        path: path.to_path_buf(),
        message: err.to_string(),
    })?;
    manifest.validate()?;
    let revision = manifest.revision;
    Ok(ManifestSnapshot {
        manifest,
        revision,
    })
}

/// Creates the initial manifest document at revision 1.
///
/// # Errors
///
/// Returns [`StoreError`] when the manifest is invalid or the write fails.
pub fn create_manifest(path: &Path, manifest: &Manifest) -> Result<(), StoreError> {
    manifest.validate()?;
    write_json_atomic(path, manifest)
}

/// Applies a patch to the manifest with optimistic concurrency.
///
/// The patch is deep-merged into the loaded document; `revision` bumps by
/// exactly one and `updated_at` stays monotone. A successful write appends
/// an audit record to `logs/audit.jsonl` next to the manifest.
///
/// # Errors
///
/// Returns [`StoreError::RevisionConflict`] when the on-disk revision does
/// not equal `expected_revision`, and other [`StoreError`] variants for
/// parse, validation, or I/O failures.
pub fn write_manifest(
    path: &Path,
    expected_revision: u64,
    patch: &Value,
    reason: &str,
) -> Result<u64, StoreError> {
    let mut doc: Value = read_json(path)?;
    if !doc.is_object() {
        return Err(StoreError::NotObject {
            path: path.to_path_buf(),
        });
    }
    let actual = doc.get("revision").and_then(Value::as_u64).unwrap_or(0);
    if actual != expected_revision {
        return Err(StoreError::RevisionConflict {
            expected: expected_revision,
            actual,
        });
    }

    deep_merge(&mut doc, patch);

    let new_revision = expected_revision + 1;
    let now = Timestamp::now();
    let updated_at = doc
        .get("updated_at")
        .and_then(Value::as_str)
        .and_then(|text| serde_json::from_value::<Timestamp>(Value::String(text.to_string())).ok())
        .map_or(now, |previous| if now < previous { previous } else { now });
    if let Value::Object(object) = &mut doc {
        object.insert("revision".to_string(), Value::from(new_revision));
        object.insert(
            "updated_at".to_string(),
            serde_json::to_value(updated_at).unwrap_or(Value::Null),
        );
    }

    let manifest: Manifest = serde_json::from_value(doc.clone()).map_err(|err| {
        StoreError::Parse {
            path: path.to_path_buf(),
            message: err.to_string(),
        }
    })?;
    manifest.validate()?;

    write_json_atomic(path, &doc)?;

    let audit_path = audit_path_for_manifest(path);
    let record = AuditRecord {
        ts: updated_at,
        reason: reason.to_string(),
        expected_revision,
        new_revision,
        patch_digest: digest_value(patch)?,
    };
    append_jsonl(&audit_path, &record)?;

    Ok(new_revision)
}

/// Returns the audit stream path for a manifest path.
fn audit_path_for_manifest(manifest_path: &Path) -> PathBuf {
    manifest_path
        .parent()
        .map_or_else(|| PathBuf::from("logs/audit.jsonl"), |root| {
            root.join("logs").join("audit.jsonl")
        })
}

// ============================================================================
// SECTION: Deep Merge
// ============================================================================

/// Deep-merges `patch` into `doc`.
///
/// Objects merge recursively; a `null` patch value removes the key; arrays
/// and scalars replace wholesale.
pub fn deep_merge(doc: &mut Value, patch: &Value) {
    match (doc, patch) {
        (Value::Object(doc_map), Value::Object(patch_map)) => {
            merge_objects(doc_map, patch_map);
        }
        (doc_slot, other) => {
            *doc_slot = other.clone();
        }
    }
}

/// Merges one object level, recursing into shared object keys.
fn merge_objects(doc: &mut Map<String, Value>, patch: &Map<String, Value>) {
    for (key, patch_value) in patch {
        if patch_value.is_null() {
            doc.remove(key);
            continue;
        }
        match doc.get_mut(key) {
            Some(doc_value) if doc_value.is_object() && patch_value.is_object() => {
                deep_merge(doc_value, patch_value);
            }
            _ => {
                doc.insert(key.clone(), patch_value.clone());
            }
        }
    }
}
