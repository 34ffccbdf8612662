// crates/deep-research-resolver/tests/cache.rs
// ============================================================================
// Module: Redirect Cache Tests
// Description: Verifies TTL freshness, corrupt-cache recovery, and atomic
//              saves.
// ============================================================================
//! ## Overview
//! Ensures entries are fresh only within the TTL, corrupt caches reset to
//! empty with the problem reported, and saves are atomic with owner-only
//! permissions.

#![allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only output and panic-based assertions are permitted."
)]

use std::fs;

use deep_research_core::Timestamp;
use deep_research_resolver::CacheEntry;
use deep_research_resolver::RedirectCache;
use deep_research_resolver::cache_path;
use deep_research_resolver::load_cache;
use deep_research_resolver::save_cache;

#[test]
fn cache_path_is_under_research_shell() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = cache_path(dir.path());
    assert!(path.ends_with("research-shell/cache/redirects.json"));
}

#[test]
fn missing_cache_loads_empty_without_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (cache, problem) = load_cache(&cache_path(dir.path()));
    assert!(cache.entries.is_empty());
    assert!(problem.is_none());
}

#[test]
fn corrupt_cache_resets_to_empty_and_reports() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = cache_path(dir.path());
    fs::create_dir_all(path.parent().expect("parent")).expect("dirs");
    fs::write(&path, b"{ definitely not json").expect("corrupt");

    let (cache, problem) = load_cache(&path);
    assert!(cache.entries.is_empty());
    assert!(problem.is_some());
}

#[test]
fn unsupported_schema_version_resets_to_empty() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = cache_path(dir.path());
    fs::create_dir_all(path.parent().expect("parent")).expect("dirs");
    fs::write(&path, b"{\"schema_version\":9,\"entries\":{}}\n").expect("write");

    let (cache, problem) = load_cache(&path);
    assert!(cache.entries.is_empty());
    assert!(problem.expect("problem").contains("schema"));
}

#[test]
fn save_then_load_round_trips() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = cache_path(dir.path());
    let now = Timestamp::now();

    let mut cache = RedirectCache::default();
    cache.entries.insert("https://in.example/".to_string(), CacheEntry {
        resolved_url: Some("https://out.example/".to_string()),
        resolved_at: Some(now),
        last_tried_at: Some(now),
        attempts: 1,
        last_status: Some(200),
        last_error: None,
    });
    save_cache(&path, &cache).expect("save");

    let (loaded, problem) = load_cache(&path);
    assert!(problem.is_none());
    assert_eq!(loaded, cache);
}

#[test]
fn entry_freshness_respects_ttl() {
    let now = Timestamp::now();
    let entry = CacheEntry {
        resolved_url: Some("https://out.example/".to_string()),
        resolved_at: Some(now),
        last_tried_at: Some(now),
        attempts: 1,
        last_status: Some(200),
        last_error: None,
    };
    assert!(entry.is_fresh(now, 60));
    assert!(entry.is_fresh(now.plus_seconds(60), 60));
    assert!(!entry.is_fresh(now.plus_seconds(61), 60));
}

#[test]
fn unresolved_entries_are_never_fresh() {
    let now = Timestamp::now();
    let entry = CacheEntry {
        resolved_url: None,
        resolved_at: None,
        last_tried_at: Some(now),
        attempts: 3,
        last_status: Some(503),
        last_error: Some("http status 503".to_string()),
    };
    assert!(!entry.is_fresh(now, u64::MAX));
}

#[cfg(unix)]
#[test]
fn saved_cache_has_owner_only_permissions() {
    use std::os::unix::fs::PermissionsExt;

    let dir = tempfile::tempdir().expect("tempdir");
    let path = cache_path(dir.path());
    save_cache(&path, &RedirectCache::default()).expect("save");

    let file_mode = fs::metadata(&path).expect("file meta").permissions().mode() & 0o777;
    assert_eq!(file_mode, 0o600);
    let dir_mode = fs::metadata(path.parent().expect("parent"))
        .expect("dir meta")
        .permissions()
        .mode()
        & 0o777;
    assert_eq!(dir_mode, 0o700);
}

#[test]
fn save_leaves_no_tmp_files() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = cache_path(dir.path());
    save_cache(&path, &RedirectCache::default()).expect("save");

    let leftovers: Vec<String> = fs::read_dir(path.parent().expect("parent"))
        .expect("read dir")
        .filter_map(Result::ok)
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .filter(|name| name.starts_with(".tmp-"))
        .collect();
    assert!(leftovers.is_empty(), "tmp files must not survive: {leftovers:?}");
}
