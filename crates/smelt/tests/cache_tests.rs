// Compilation cache tests — At-most-once compilation, failure policy,
// eviction, pinning

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use smelt::{
    CacheConfig, CompilationCache, CompilationKey, CompileError, CompileMeta, CompiledArtifact,
    DeviceClass, Digest,
};

// Helpers

fn key(tag: u8) -> CompilationKey {
    CompilationKey::derive(
        &Digest::from_bytes([tag; 32]),
        &[],
        &DeviceClass::new("cpu-sync"),
        &Digest::from_bytes([0; 32]),
    )
}

fn artifact(size: usize) -> CompiledArtifact {
    CompiledArtifact::new(
        vec![0u8; size],
        DeviceClass::new("cpu-sync"),
        CompileMeta {
            duration: Duration::from_millis(1),
            compiler_version: "stub-0.1".to_string(),
        },
    )
}

fn cache() -> CompilationCache {
    CompilationCache::new(CacheConfig::default())
}

// At-most-once

#[test]
fn test_compiles_once_then_hits() {
    let cache = cache();
    let calls = AtomicUsize::new(0);
    let k = key(1);

    let first = cache
        .get_or_compile(k, || {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(artifact(16))
        })
        .unwrap();
    let second = cache
        .get_or_compile(k, || {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(artifact(16))
        })
        .unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    // Identity, not just equality: the hit path returns the same artifact.
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(first.id(), second.id());

    let stats = cache.stats();
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.hits, 1);
}

#[test]
fn test_concurrent_callers_single_producer() {
    let cache = Arc::new(cache());
    let calls = Arc::new(AtomicUsize::new(0));
    let barrier = Arc::new(Barrier::new(8));
    let k = key(2);

    let mut handles = Vec::new();
    for _ in 0..8 {
        let cache = Arc::clone(&cache);
        let calls = Arc::clone(&calls);
        let barrier = Arc::clone(&barrier);
        handles.push(thread::spawn(move || {
            barrier.wait();
            cache.get_or_compile(k, || {
                calls.fetch_add(1, Ordering::SeqCst);
                // Hold the Pending state long enough that the others join.
                thread::sleep(Duration::from_millis(50));
                Ok(artifact(8))
            })
        }));
    }

    let results: Vec<_> = handles
        .into_iter()
        .map(|h| h.join().unwrap().unwrap())
        .collect();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    for pair in results.windows(2) {
        assert_eq!(pair[0].id(), pair[1].id());
    }
}

#[test]
fn test_waiters_observe_producer_failure() {
    let cache = Arc::new(cache());
    let calls = Arc::new(AtomicUsize::new(0));
    let barrier = Arc::new(Barrier::new(4));
    let k = key(3);

    let mut handles = Vec::new();
    for _ in 0..4 {
        let cache = Arc::clone(&cache);
        let calls = Arc::clone(&calls);
        let barrier = Arc::clone(&barrier);
        handles.push(thread::spawn(move || {
            barrier.wait();
            cache.get_or_compile(k, || {
                calls.fetch_add(1, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(50));
                Err(CompileError::permanent("bad program"))
            })
        }));
    }

    for h in handles {
        let err = h.join().unwrap().unwrap_err();
        assert!(err.is_permanent());
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

// Failure policy

#[test]
fn test_permanent_failure_is_cached() {
    let cache = cache();
    let calls = AtomicUsize::new(0);
    let k = key(4);

    for _ in 0..3 {
        let err = cache
            .get_or_compile(k, || {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(CompileError::permanent("unsupported construct"))
            })
            .unwrap_err();
        assert!(err.is_permanent());
        assert!(err.to_string().contains("unsupported construct"));
    }
    // Only the first submission reached the compiler.
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_transient_failure_is_retried() {
    let cache = cache();
    let calls = AtomicUsize::new(0);
    let k = key(5);

    let err = cache
        .get_or_compile(k, || {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(CompileError::transient("out of memory"))
        })
        .unwrap_err();
    assert!(!err.is_permanent());

    // Next submission compiles afresh and can succeed.
    let ok = cache
        .get_or_compile(k, || {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(artifact(8))
        })
        .unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(ok.size_bytes(), 8);
}

#[test]
fn test_retry_budget_exhaustion_caches_failure() {
    let cache = CompilationCache::new(CacheConfig::default().with_retry_limit(2));
    let calls = AtomicUsize::new(0);
    let k = key(6);

    for _ in 0..5 {
        let _ = cache.get_or_compile(k, || {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(CompileError::transient("flaky toolchain"))
        });
    }
    // Two real attempts; the rest replayed the cached failure.
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[test]
fn test_invalidate_clears_cached_failure() {
    let cache = cache();
    let calls = AtomicUsize::new(0);
    let k = key(7);

    let _ = cache.get_or_compile(k, || {
        calls.fetch_add(1, Ordering::SeqCst);
        Err(CompileError::permanent("bad program"))
    });
    assert!(cache.invalidate(&k));

    let ok = cache.get_or_compile(k, || {
        calls.fetch_add(1, Ordering::SeqCst);
        Ok(artifact(8))
    });
    assert!(ok.is_ok());
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

// Eviction

#[test]
fn test_eviction_is_least_recently_used() {
    let cache = CompilationCache::new(CacheConfig::default().with_max_bytes(150));
    let (ka, kb, kc) = (key(10), key(11), key(12));

    cache.get_or_compile(ka, || Ok(artifact(60))).unwrap();
    cache.get_or_compile(kb, || Ok(artifact(60))).unwrap();
    // Touch A so B becomes the least recently used.
    assert!(cache.lookup(&ka).is_some());
    cache.get_or_compile(kc, || Ok(artifact(60))).unwrap();

    assert!(cache.lookup(&kb).is_none(), "LRU entry should be evicted");
    assert!(cache.lookup(&ka).is_some());
    assert!(cache.lookup(&kc).is_some());

    let stats = cache.stats();
    assert_eq!(stats.evictions, 1);
    assert_eq!(stats.bytes, 120);
}

#[test]
fn test_evicted_entry_recompiles() {
    let cache = CompilationCache::new(CacheConfig::default().with_max_bytes(100));
    let calls = AtomicUsize::new(0);
    let (ka, kb) = (key(13), key(14));

    let produce = |calls: &AtomicUsize| {
        calls.fetch_add(1, Ordering::SeqCst);
        Ok(artifact(80))
    };
    cache.get_or_compile(ka, || produce(&calls)).unwrap();
    cache.get_or_compile(kb, || produce(&calls)).unwrap(); // evicts A
    cache.get_or_compile(ka, || produce(&calls)).unwrap(); // recompiles A

    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[test]
fn test_pinned_entries_survive_eviction() {
    let cache = CompilationCache::new(CacheConfig::default().with_max_bytes(100));
    let (ka, kb) = (key(15), key(16));

    cache.get_or_compile(ka, || Ok(artifact(60))).unwrap();
    assert!(cache.pin(&ka));
    cache.get_or_compile(kb, || Ok(artifact(60))).unwrap();

    // Over budget, but A is pinned: only B is evictable.
    assert!(cache.lookup(&ka).is_some());

    // Unpinned again, the next pressure evicts A (it is now the LRU).
    cache.unpin(&ka);
    let kc = key(17);
    cache.get_or_compile(kc, || Ok(artifact(60))).unwrap();
    assert!(cache.lookup(&ka).is_none());
}

#[test]
fn test_lookup_does_not_compile() {
    let cache = cache();
    assert!(cache.lookup(&key(20)).is_none());
    assert_eq!(cache.stats().misses, 0);
}
