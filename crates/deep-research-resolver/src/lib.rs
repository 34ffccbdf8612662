// crates/deep-research-resolver/src/lib.rs
// ============================================================================
// Module: Deep Research Resolver Library
// Description: Citation redirect resolution with cache, retry, and pooling.
// Purpose: Resolve redirect URLs to canonical destinations for the citations
//          stage.
// Dependencies: crate::{cache, canonicalize, pool, resolve}
// ============================================================================

//! ## Overview
//! `deep-research-resolver` is the standalone utility behind the citations
//! stage: redirect canonicalization (known-wrapper unwrapping and
//! tracking-parameter stripping), an on-disk TTL cache with atomic
//! owner-only saves, retrying per-URL resolution with full-jitter backoff,
//! and a bounded worker pool for batches.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod cache;
pub mod canonicalize;
pub mod pool;
pub mod resolve;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use cache::CACHE_SCHEMA_VERSION;
pub use cache::CacheEntry;
pub use cache::RedirectCache;
pub use cache::cache_path;
pub use cache::load_cache;
pub use cache::save_cache;
pub use canonicalize::CanonicalizeError;
pub use canonicalize::GROUNDING_REDIRECT_HOST;
pub use canonicalize::canonicalize_url;
pub use pool::BatchOutcome;
pub use pool::resolve_batch;
pub use resolve::FetchFailure;
pub use resolve::FetchMethod;
pub use resolve::FetchResponse;
pub use resolve::HttpFetcher;
pub use resolve::Resolution;
pub use resolve::Sleeper;
pub use resolve::ThreadSleeper;
pub use resolve::UrlFetcher;
pub use resolve::backoff_delay;
pub use resolve::is_retryable_status;
pub use resolve::resolve_url;
