// crates/deep-research-store/src/lib.rs
// ============================================================================
// Module: Deep Research Store Library
// Description: Durable, atomic persistence for run roots.
// Purpose: Expose manifest OCC writes, JSONL streams, the run lock, and path
//          containment.
// Dependencies: crate::{lock, paths, store}
// ============================================================================

//! ## Overview
//! `deep-research-store` owns every byte written into a run root: atomic
//! JSON replaces, optimistic-concurrency manifest writes with audit records,
//! append-only JSONL streams, the exclusive leased run lock with heartbeat,
//! and the single path-containment resolver.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod lock;
pub mod paths;
pub mod store;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use lock::Heartbeat;
pub use lock::LOCK_FILE_NAME;
pub use lock::LOCK_SCHEMA_VERSION;
pub use lock::LockError;
pub use lock::LockFile;
pub use lock::LockHandle;
pub use lock::acquire_lock;
pub use lock::refresh_lock;
pub use lock::release_lock;
pub use lock::start_heartbeat;
pub use paths::PathError;
pub use paths::contain_absolute;
pub use paths::contain_relative;
pub use store::ManifestSnapshot;
pub use store::StoreError;
pub use store::append_jsonl;
pub use store::create_manifest;
pub use store::deep_merge;
pub use store::read_json;
pub use store::read_json_optional;
pub use store::read_jsonl;
pub use store::read_manifest;
pub use store::write_bytes_atomic;
pub use store::write_json_atomic;
pub use store::write_manifest;
