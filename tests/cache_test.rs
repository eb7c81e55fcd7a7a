//! Compiled-artifact cache tests against the in-memory store.

mod common;

use common::*;
use quantscript::adapters::memory_cache::MemoryCacheStore;
use quantscript::domain::cache::ArtifactCache;
use quantscript::domain::compiler::{CacheKey, compile};
use quantscript::domain::engine::{ExecutionLimits, execute};
use quantscript::domain::error::ErrorCode;
use quantscript::domain::stdlib::StdlibVersion;
use quantscript::ports::cache_port::CachePort;
use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

const SMA: &str = "@calculate\n  return indicator.sma.close(3)\n";

fn memory_cache(capacity: usize, ttl: Duration) -> (ArtifactCache, Arc<MemoryCacheStore>) {
    let store = Arc::new(MemoryCacheStore::new(capacity));
    let cache = ArtifactCache::new(Box::new(Shared(Arc::clone(&store))), ttl);
    (cache, store)
}

#[test]
fn hit_is_equal_to_fresh_compile() {
    let (cache, store) = memory_cache(8, Duration::from_secs(60));
    let first = cache.get_or_compile(SMA, "1.1").unwrap();
    let second = cache.get_or_compile(SMA, "1.1").unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(*second, compile(SMA, "1.1").unwrap());
    assert_eq!(store.len(), 1);

    let stats = cache.stats();
    assert_eq!((stats.hits, stats.misses, stats.compilations), (1, 1, 1));
}

#[test]
fn cached_program_executes_like_a_fresh_one() {
    let (cache, _) = memory_cache(8, Duration::from_secs(60));
    cache.get_or_compile(SMA, "1.1").unwrap();
    let cached = cache.get_or_compile(SMA, "1.1").unwrap();
    let input = closes(&[1.0, 2.0, 3.0, 4.0, 5.0]);
    let from_cache = execute(cached, input.clone(), HashMap::new(), ExecutionLimits::default()).unwrap();
    let fresh = run(SMA, input).unwrap();
    assert_series_eq(from_cache.series().unwrap(), fresh.series().unwrap());
}

#[test]
fn stdlib_version_is_part_of_the_key() {
    let (cache, store) = memory_cache(8, Duration::from_secs(60));
    let old = cache.get_or_compile(SMA, "1.0").unwrap();
    let new = cache.get_or_compile(SMA, "1.1").unwrap();
    assert_ne!(old.key, new.key);
    assert_eq!(old.stdlib_version, StdlibVersion::V1_0);
    assert_eq!(new.stdlib_version, StdlibVersion::V1_1);
    assert_eq!(store.len(), 2);
    assert_eq!(old.key, CacheKey::compute(SMA, StdlibVersion::V1_0));
}

#[test]
fn version_specific_symbols_are_not_served_across_versions() {
    let (cache, _) = memory_cache(8, Duration::from_secs(60));
    let source = "@calculate\n  return stdev(close, 3)\n";
    cache.get_or_compile(source, "1.0").unwrap();
    let err = cache.get_or_compile(source, "1.1").unwrap_err();
    assert_eq!(err.code, ErrorCode::UndefinedName);
}

#[test]
fn compile_errors_are_not_cached() {
    let store = Arc::new(CountingStore::default());
    let cache = ArtifactCache::new(Box::new(Shared(Arc::clone(&store))), Duration::from_secs(60));
    for _ in 0..3 {
        cache.get_or_compile("@calculate\n  return foo(close)\n", "1.1").unwrap_err();
    }
    assert_eq!(store.puts.load(Ordering::SeqCst), 0);
    assert_eq!(cache.stats().compilations, 3);
}

#[test]
fn expired_entries_recompile() {
    let (cache, store) = memory_cache(8, Duration::ZERO);
    cache.get_or_compile(SMA, "1.1").unwrap();
    cache.get_or_compile(SMA, "1.1").unwrap();
    assert_eq!(cache.stats().compilations, 2);
    assert_eq!(store.purge_expired(), 1);
    assert!(store.is_empty());
}

#[test]
fn eviction_keeps_held_programs_valid() {
    let (cache, store) = memory_cache(1, Duration::from_secs(60));
    let held = cache.get_or_compile(SMA, "1.1").unwrap();
    cache
        .get_or_compile("@calculate\n  return indicator.ema.close(3)\n", "1.1")
        .unwrap();
    assert_eq!(store.len(), 1);
    assert!(store.get(&held.key).unwrap().is_none());

    let result = execute(held, closes(&[1.0, 2.0, 3.0]), HashMap::new(), ExecutionLimits::default()).unwrap();
    assert_eq!(result.series().unwrap()[2], 2.0);
}

#[test]
fn broken_store_degrades_to_compiling() {
    let store = Arc::new(CountingStore::failing());
    let cache = ArtifactCache::new(Box::new(Shared(Arc::clone(&store))), Duration::from_secs(60));
    let a = cache.get_or_compile(SMA, "1.1").unwrap();
    let b = cache.get_or_compile(SMA, "1.1").unwrap();
    assert_eq!(*a, *b);
    let stats = cache.stats();
    assert_eq!(stats.compilations, 2);
    assert!(stats.store_errors >= 2);
}

#[test]
fn concurrent_misses_compile_once() {
    let store = Arc::new(CountingStore::default());
    let cache = Arc::new(ArtifactCache::new(
        Box::new(Shared(Arc::clone(&store))),
        Duration::from_secs(60),
    ));
    let barrier = Arc::new(Barrier::new(12));
    let handles: Vec<_> = (0..12)
        .map(|_| {
            let cache = Arc::clone(&cache);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                cache.get_or_compile(SMA, "1.1").unwrap()
            })
        })
        .collect();
    let programs: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert!(programs.windows(2).all(|w| w[0] == w[1]));
    assert_eq!(cache.stats().compilations, 1);
    assert_eq!(store.puts.load(Ordering::SeqCst), 1);
}

#[test]
fn entry_records_compilation_metadata() {
    let (cache, store) = memory_cache(8, Duration::from_secs(60));
    let program = cache.get_or_compile(SMA, "1.1").unwrap();
    let info = store.info(&program.key).unwrap();
    assert_eq!(info.size, program.approx_size());
    assert!(info.compiled_at <= chrono::Utc::now());
}
