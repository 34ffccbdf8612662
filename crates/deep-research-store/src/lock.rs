// crates/deep-research-store/src/lock.rs
// ============================================================================
// Module: Run Lock
// Description: Exclusive leased file lock with a heartbeat refresher.
// Purpose: Serialize every mutation of a run root behind one owner.
// Dependencies: deep-research-core, serde, serde_json, uuid
// ============================================================================

//! ## Overview
//! The run lock is an exclusive lease at `<run_root>/.lock`. Acquisition is
//! an atomic create; unparseable or expired lock files are replaced. A
//! heartbeat thread refreshes the lease and, after a configured number of
//! consecutive refresh failures, invokes the loss callback exactly once.
//! Callers must treat that callback as lock loss.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs;
use std::fs::OpenOptions;
use std::io::ErrorKind;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;
use std::sync::mpsc;
use std::sync::mpsc::RecvTimeoutError;
use std::thread;
use std::thread::JoinHandle;
use std::time::Duration;

use deep_research_core::ErrorCode;
use deep_research_core::Timestamp;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Schema version for the lock file.
pub const LOCK_SCHEMA_VERSION: &str = "run_lock.v1";
/// Lock file name inside the run root.
pub const LOCK_FILE_NAME: &str = ".lock";

// ============================================================================
// SECTION: Lock File
// ============================================================================

/// Durable lease contents of the lock file.
///
/// # Invariants
/// - A lock is stale when `acquired_at + lease_seconds` is in the past.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockFile {
    /// Lock schema version.
    pub schema_version: String,
    /// Opaque owner identifier.
    pub owner_id: String,
    /// Instant the lease was acquired or last refreshed.
    pub acquired_at: Timestamp,
    /// Lease duration, in seconds.
    pub lease_seconds: u64,
    /// Operator-supplied reason for holding the lock.
    pub reason: String,
}

impl LockFile {
    /// Returns true when the lease has expired at `now`.
    #[must_use]
    pub fn is_expired(&self, now: Timestamp) -> bool {
        let lease = i64::try_from(self.lease_seconds).unwrap_or(i64::MAX);
        self.acquired_at.plus_seconds(lease) < now
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Run lock errors.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
#[derive(Debug, Error)]
pub enum LockError {
    /// The lock is held by another live owner.
    #[error("run lock held by {owner_id} since {acquired_at}")]
    Held {
        /// Owner recorded in the lock file.
        owner_id: String,
        /// Instant the lease was acquired.
        acquired_at: Timestamp,
    },
    /// The handle no longer owns the lock.
    #[error("run lock not owned (found owner {found_owner})")]
    NotOwned {
        /// Owner recorded in the lock file.
        found_owner: String,
    },
    /// Filesystem operation failed.
    #[error("run lock io error at {path}: {message}")]
    Io {
        /// Path the operation targeted.
        path: PathBuf,
        /// Underlying error text.
        message: String,
    },
}

impl LockError {
    /// Returns the stable code for the error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Held { .. } => ErrorCode::LockHeld,
            Self::NotOwned { .. } => ErrorCode::LockNotOwned,
            Self::Io { .. } => ErrorCode::InvalidState,
        }
    }
}

/// Maps an I/O error to a [`LockError::Io`].
fn io_error(path: &Path, err: &std::io::Error) -> LockError {
    LockError::Io {
        path: path.to_path_buf(),
        message: err.to_string(),
    }
}

// ============================================================================
// SECTION: Lock Handle
// ============================================================================

/// Handle proving lock ownership.
///
/// # Invariants
/// - `owner_id` matches the on-disk lock file for as long as the lease holds.
#[derive(Debug, Clone)]
pub struct LockHandle {
    /// Path of the lock file.
    lock_path: PathBuf,
    /// Opaque owner identifier.
    owner_id: String,
    /// Reason recorded at acquisition.
    reason: String,
}

impl LockHandle {
    /// Returns the opaque owner identifier.
    #[must_use]
    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    /// Returns the lock file path.
    #[must_use]
    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }
}

// ============================================================================
// SECTION: Acquire / Refresh / Release
// ============================================================================

/// Acquires the exclusive run lock.
///
/// Unparseable or expired lock files are replaced; a live foreign lease
/// yields [`LockError::Held`].
///
/// # Errors
///
/// Returns [`LockError`] when the lock is held or the filesystem fails.
pub fn acquire_lock(
    run_root: &Path,
    lease_seconds: u64,
    reason: &str,
) -> Result<LockHandle, LockError> {
    let lock_path = run_root.join(LOCK_FILE_NAME);
    let owner_id = Uuid::new_v4().to_string();
    // Two passes: the second runs after a stale lock file was removed.
    for _ in 0 .. 2 {
        match try_create(&lock_path, &owner_id, lease_seconds, reason) {
            Ok(()) => {
                return Ok(LockHandle {
                    lock_path,
                    owner_id,
                    reason: reason.to_string(),
                });
            }
            Err(CreateOutcome::Exists) => {
                let now = Timestamp::now();
                match read_lock_file(&lock_path) {
                    Ok(existing) if !existing.is_expired(now) => {
                        return Err(LockError::Held {
                            owner_id: existing.owner_id,
                            acquired_at: existing.acquired_at,
                        });
                    }
                    // Expired or unparseable: replace.
                    Ok(_) | Err(_) => {
                        if let Err(err) = fs::remove_file(&lock_path)
                            && err.kind() != ErrorKind::NotFound
                        {
                            return Err(io_error(&lock_path, &err));
                        }
                    }
                }
            }
            Err(CreateOutcome::Io(err)) => return Err(err),
        }
    }
    Err(LockError::Held {
        owner_id: "unknown".to_string(),
        acquired_at: Timestamp::now(),
    })
}

/// Outcome of one exclusive-create attempt.
enum CreateOutcome {
    /// The lock file already exists.
    Exists,
    /// The create failed for another reason.
    Io(LockError),
}

/// Attempts an atomic exclusive create of the lock file.
fn try_create(
    lock_path: &Path,
    owner_id: &str,
    lease_seconds: u64,
    reason: &str,
) -> Result<(), CreateOutcome> {
    if let Some(parent) = lock_path.parent() {
        fs::create_dir_all(parent)
            .map_err(|err| CreateOutcome::Io(io_error(parent, &err)))?;
    }
    let mut file = match OpenOptions::new().write(true).create_new(true).open(lock_path) {
        Ok(file) => file,
        Err(err) if err.kind() == ErrorKind::AlreadyExists => return Err(CreateOutcome::Exists),
        Err(err) => return Err(CreateOutcome::Io(io_error(lock_path, &err))),
    };
    let contents = LockFile {
        schema_version: LOCK_SCHEMA_VERSION.to_string(),
        owner_id: owner_id.to_string(),
        acquired_at: Timestamp::now(),
        lease_seconds,
        reason: reason.to_string(),
    };
    let mut bytes = serde_json::to_vec_pretty(&contents)
        .map_err(|err| {
            CreateOutcome::Io(LockError::Io {
                path: lock_path.to_path_buf(),
                message: err.to_string(),
            })
        })?;
    bytes.push(b'\n');
    file.write_all(&bytes).map_err(|err| CreateOutcome::Io(io_error(lock_path, &err)))?;
    file.sync_all().map_err(|err| CreateOutcome::Io(io_error(lock_path, &err)))?;
    Ok(())
}

/// Reads and parses the lock file.
fn read_lock_file(lock_path: &Path) -> Result<LockFile, LockError> {
    let bytes = fs::read(lock_path).map_err(|err| io_error(lock_path, &err))?;
    serde_json::from_slice(&bytes).map_err(|err| LockError::Io {
        path: lock_path.to_path_buf(),
        message: err.to_string(),
    })
}

/// Refreshes the lease, keeping the same owner.
///
/// # Errors
///
/// Returns [`LockError::NotOwned`] when the on-disk owner differs, and
/// [`LockError::Io`] for filesystem failures.
pub fn refresh_lock(handle: &LockHandle, lease_seconds: u64) -> Result<(), LockError> {
    let existing = read_lock_file(&handle.lock_path)?;
    if existing.owner_id != handle.owner_id {
        return Err(LockError::NotOwned {
            found_owner: existing.owner_id,
        });
    }
    let refreshed = LockFile {
        schema_version: LOCK_SCHEMA_VERSION.to_string(),
        owner_id: handle.owner_id.clone(),
        acquired_at: Timestamp::now(),
        lease_seconds,
        reason: handle.reason.clone(),
    };
    let mut bytes = serde_json::to_vec_pretty(&refreshed).map_err(|err| LockError::Io {
        path: handle.lock_path.clone(),
        message: err.to_string(),
    })?;
    bytes.push(b'\n');
    fs::write(&handle.lock_path, bytes).map_err(|err| io_error(&handle.lock_path, &err))
}

/// Releases the lock when still owned; foreign locks are left alone.
pub fn release_lock(handle: &LockHandle) {
    let Ok(existing) = read_lock_file(&handle.lock_path) else {
        return;
    };
    if existing.owner_id == handle.owner_id {
        let _ = fs::remove_file(&handle.lock_path);
    }
}

// ============================================================================
// SECTION: Heartbeat
// ============================================================================

/// Running heartbeat refresher for a lock handle.
///
/// # Invariants
/// - The loss callback fires exactly once, after `max_failures` consecutive
///   refresh failures.
pub struct Heartbeat {
    /// Stop signal sender.
    stop_tx: mpsc::Sender<()>,
    /// Refresher thread handle.
    thread: Option<JoinHandle<()>>,
}

impl Heartbeat {
    /// Stops the refresher and joins the thread.
    pub fn stop(mut self) {
        let _ = self.stop_tx.send(());
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for Heartbeat {
    fn drop(&mut self) {
        let _ = self.stop_tx.send(());
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// Starts a heartbeat refresher for the lock.
///
/// The refresher re-writes the lease every `interval`; after `max_failures`
/// consecutive refresh failures it invokes `on_failure` exactly once and
/// exits. Callers must treat the callback as lock loss.
#[must_use]
pub fn start_heartbeat(
    handle: LockHandle,
    interval: Duration,
    lease_seconds: u64,
    max_failures: u32,
    on_failure: Box<dyn FnOnce() + Send>,
) -> Heartbeat {
    let (stop_tx, stop_rx) = mpsc::channel::<()>();
    let thread = thread::spawn(move || {
        let mut callback = Some(on_failure);
        let mut consecutive_failures: u32 = 0;
        loop {
            match stop_rx.recv_timeout(interval) {
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                Err(RecvTimeoutError::Timeout) => {}
            }
            match refresh_lock(&handle, lease_seconds) {
                Ok(()) => {
                    consecutive_failures = 0;
                }
                Err(_) => {
                    consecutive_failures = consecutive_failures.saturating_add(1);
                    if consecutive_failures >= max_failures {
                        if let Some(callback) = callback.take() {
                            callback();
                        }
                        break;
                    }
                }
            }
        }
    });
    Heartbeat {
        stop_tx,
        thread: Some(thread),
    }
}
