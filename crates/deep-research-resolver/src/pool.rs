// crates/deep-research-resolver/src/pool.rs
// ============================================================================
// Module: Batch Resolution Pool
// Description: Bounded worker pool draining a deduplicated URL queue.
// Purpose: Resolve URL sets with fixed concurrency and cache reuse.
// Dependencies: crate::{cache, resolve}, deep-research-core
// ============================================================================

//! ## Overview
//! Batch resolution deduplicates the input by URL while preserving first
//! occurrence order, serves fresh cache entries without network I/O, and
//! drains the remainder through a fixed-size worker pool (default 3). The
//! cache is updated and saved atomically afterwards; save failures are
//! reported in the outcome without failing the batch.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeSet;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::Mutex;
use std::thread;

use deep_research_core::ResolverPolicy;
use deep_research_core::Timestamp;
use serde::Deserialize;
use serde::Serialize;

use crate::cache::CacheEntry;
use crate::cache::load_cache;
use crate::cache::save_cache;
use crate::resolve::Resolution;
use crate::resolve::Sleeper;
use crate::resolve::UrlFetcher;
use crate::resolve::resolve_url;

// ============================================================================
// SECTION: Batch Outcome
// ============================================================================

/// Outcome of one batch resolution.
///
/// # Invariants
/// - `resolutions` is deduplicated by input URL and preserves input order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchOutcome {
    /// Per-URL resolutions in input order.
    pub resolutions: Vec<Resolution>,
    /// Cache load problem, when one occurred.
    pub cache_load_error: Option<String>,
    /// Cache save problem, when one occurred.
    pub cache_save_error: Option<String>,
}

// ============================================================================
// SECTION: Batch Resolution
// ============================================================================

/// Resolves a URL set with bounded concurrency and cache reuse.
///
/// Identical fully-cached input sets produce identical outputs with zero
/// network I/O.
pub fn resolve_batch<F, S>(
    fetcher: &F,
    sleeper: &S,
    policy: &ResolverPolicy,
    cache_file: &Path,
    urls: &[String],
    now: Timestamp,
) -> BatchOutcome
where
    F: UrlFetcher + Sync,
    S: Sleeper + Sync,
{
    let (mut cache, cache_load_error) = load_cache(cache_file);

    // Dedupe by input URL, preserving first-occurrence order.
    let mut seen = BTreeSet::new();
    let ordered: Vec<String> =
        urls.iter().filter(|url| seen.insert((*url).clone())).cloned().collect();

    let mut slots: Vec<Option<Resolution>> = vec![None; ordered.len()];
    let mut queue: VecDeque<(usize, String)> = VecDeque::new();

    for (index, url) in ordered.iter().enumerate() {
        match cache.entries.get(url) {
            Some(entry) if entry.is_fresh(now, policy.ttl_seconds) => {
                slots[index] = Some(Resolution {
                    input_url: url.clone(),
                    resolved_url: entry.resolved_url.clone(),
                    attempts: 0,
                    last_status: entry.last_status,
                    last_error: None,
                    from_cache: true,
                });
            }
            _ => queue.push_back((index, url.clone())),
        }
    }

    if !queue.is_empty() {
        let worker_count =
            usize::try_from(policy.concurrency).unwrap_or(1).clamp(1, queue.len().max(1));
        let queue = Mutex::new(queue);
        let results = Mutex::new(Vec::<(usize, Resolution)>::new());

        thread::scope(|scope| {
            for _ in 0 .. worker_count {
                scope.spawn(|| {
                    loop {
                        let next = {
                            let Ok(mut guard) = queue.lock() else {
                                break;
                            };
                            guard.pop_front()
                        };
                        let Some((index, url)) = next else {
                            break;
                        };
                        let resolution = resolve_url(fetcher, sleeper, policy, &url);
                        if let Ok(mut guard) = results.lock() {
                            guard.push((index, resolution));
                        }
                    }
                });
            }
        });

        if let Ok(resolved) = results.into_inner() {
            for (index, resolution) in resolved {
                if let Some(slot) = slots.get_mut(index) {
                    *slot = Some(resolution);
                }
            }
        }
    }

    let resolutions: Vec<Resolution> = slots
        .into_iter()
        .zip(&ordered)
        .map(|(slot, url)| {
            slot.unwrap_or_else(|| Resolution {
                input_url: url.clone(),
                resolved_url: None,
                attempts: 0,
                last_status: None,
                last_error: Some("resolution worker dropped the url".to_string()),
                from_cache: false,
            })
        })
        .collect();

    for resolution in &resolutions {
        if resolution.from_cache {
            continue;
        }
        let entry = cache.entries.entry(resolution.input_url.clone()).or_insert_with(
            CacheEntry::default,
        );
        entry.last_tried_at = Some(now);
        entry.attempts = entry.attempts.saturating_add(resolution.attempts);
        entry.last_status = resolution.last_status;
        entry.last_error = resolution.last_error.clone();
        if let Some(resolved_url) = &resolution.resolved_url {
            entry.resolved_url = Some(resolved_url.clone());
            entry.resolved_at = Some(now);
            entry.last_error = None;
        }
    }

    let cache_save_error = save_cache(cache_file, &cache).err();

    BatchOutcome {
        resolutions,
        cache_load_error,
        cache_save_error,
    }
}
