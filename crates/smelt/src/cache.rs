// CompilationCache — CompilationKey → CompiledArtifact, compiled at most once
//
// The one structure shared across every session in the process. Layout:
//
//   map lock   — guards the key → entry table and the byte total
//   entry lock — guards one entry's state machine (Pending/Ready/Failed)
//                plus its condvar for waiter fan-out
//
// Lock order is map before entry, and no path blocks on an entry lock
// while holding the map lock (eviction uses try_lock, which cannot
// deadlock). Compilation itself runs with no lock held, so unrelated keys
// never serialize behind a slow compile.
//
// Entry lifecycle:
//
//   Vacant ──create──▶ Pending ──▶ Ready(artifact)
//                         │
//                         └──────▶ Failed(error)
//
// Pending→terminal happens exactly once per flight; waiters parked on the
// condvar all observe that flight's outcome. A Failed entry with a
// transient error is retriable: the next caller flips it back to Pending
// and becomes the new producer. Permanent failures (and transient ones
// past the retry budget) replay from cache until invalidated.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};

use tracing::{debug, warn};

use smelt_core::{CompilationKey, CompileError, CompiledArtifact};

use crate::config::CacheConfig;
use crate::persist::DiskStore;

// Statistics

/// Snapshot of cache counters.
#[derive(Debug, Clone, Copy)]
pub struct CacheStats {
    /// Requests served from a Ready entry (including waiters that joined
    /// an in-flight compilation and received its artifact).
    pub hits: u64,
    /// Requests that became the producer for a key.
    pub misses: u64,
    /// Ready entries evicted under the byte budget.
    pub evictions: u64,
    /// Misses satisfied from the disk store instead of the compiler.
    pub restored: u64,
    /// Entries currently resident (any state).
    pub entries: usize,
    /// Bytes of Ready artifacts currently resident.
    pub bytes: usize,
}

// Entry

enum EntryState {
    Pending,
    Ready(Arc<CompiledArtifact>),
    Failed(CompileError),
}

struct EntryBody {
    state: EntryState,
    /// Transient failures recorded against this key.
    attempts: u32,
}

struct CacheEntry {
    key: CompilationKey,
    body: Mutex<EntryBody>,
    ready: Condvar,
    pinned: AtomicBool,
    last_used: AtomicU64,
}

impl CacheEntry {
    fn pending(key: CompilationKey) -> Self {
        CacheEntry {
            key,
            body: Mutex::new(EntryBody {
                state: EntryState::Pending,
                attempts: 0,
            }),
            ready: Condvar::new(),
            pinned: AtomicBool::new(false),
            last_used: AtomicU64::new(0),
        }
    }
}

/// Publishes a transient failure if the producer unwinds, so waiters never
/// park forever on a Pending entry whose producer is gone.
struct PendingGuard<'a> {
    entry: &'a CacheEntry,
    armed: bool,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut body = self.entry.body.lock().unwrap();
        body.state = EntryState::Failed(CompileError::transient(
            "compilation aborted before producing a result",
        ));
        drop(body);
        self.entry.ready.notify_all();
    }
}

// Cache

struct CacheMap {
    entries: HashMap<CompilationKey, Arc<CacheEntry>>,
    /// Total size of Ready artifacts. Pending and Failed entries count 0.
    bytes: usize,
}

/// The process-wide compilation cache.
pub struct CompilationCache {
    map: Mutex<CacheMap>,
    config: CacheConfig,
    store: Option<DiskStore>,
    clock: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    restored: AtomicU64,
}

impl CompilationCache {
    /// Build a cache from policy. If the persistence directory cannot be
    /// prepared the cache runs memory-only and says so once.
    pub fn new(config: CacheConfig) -> Self {
        let store = match &config.persist_dir {
            Some(dir) => match DiskStore::new(dir.clone()) {
                Ok(store) => Some(store),
                Err(err) => {
                    warn!(dir = %dir.display(), %err, "artifact store unavailable, running memory-only");
                    None
                }
            },
            None => None,
        };
        CompilationCache {
            map: Mutex::new(CacheMap {
                entries: HashMap::new(),
                bytes: 0,
            }),
            config,
            store,
            clock: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            restored: AtomicU64::new(0),
        }
    }

    /// Return the artifact for `key`, producing it at most once.
    ///
    /// Ready entries return immediately. If another caller is already
    /// compiling this key, the current thread blocks until that flight
    /// resolves and returns its outcome — success or failure. Otherwise
    /// the caller becomes the producer and runs `produce` with no cache
    /// lock held.
    pub fn get_or_compile<F>(
        &self,
        key: CompilationKey,
        produce: F,
    ) -> Result<Arc<CompiledArtifact>, CompileError>
    where
        F: FnOnce() -> Result<CompiledArtifact, CompileError>,
    {
        let (entry, created) = {
            let mut map = self.map.lock().unwrap();
            match map.entries.get(&key) {
                Some(entry) => (Arc::clone(entry), false),
                None => {
                    let entry = Arc::new(CacheEntry::pending(key));
                    map.entries.insert(key, Arc::clone(&entry));
                    (entry, true)
                }
            }
        };

        if created {
            return self.run_producer(&entry, produce);
        }

        let mut body = entry.body.lock().unwrap();

        if matches!(body.state, EntryState::Pending) {
            // Join the in-flight compilation and take its outcome, whatever
            // it is. A Failed→Pending flip by a retrying caller just
            // extends the wait onto the new flight.
            while matches!(body.state, EntryState::Pending) {
                body = entry.ready.wait(body).unwrap();
            }
            return match &body.state {
                EntryState::Ready(artifact) => {
                    let artifact = Arc::clone(artifact);
                    drop(body);
                    self.touch(&entry);
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    Ok(artifact)
                }
                EntryState::Failed(err) => Err(err.clone()),
                EntryState::Pending => unreachable!("wait loop exits on terminal state"),
            };
        }

        match &body.state {
            EntryState::Ready(artifact) => {
                let artifact = Arc::clone(artifact);
                drop(body);
                self.touch(&entry);
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!(key = %key, "compilation cache hit");
                Ok(artifact)
            }
            EntryState::Failed(err) => {
                let retriable = !err.is_permanent() && body.attempts < self.config.retry_limit;
                if !retriable {
                    let err = err.clone();
                    drop(body);
                    debug!(key = %key, "replaying cached compile failure");
                    return Err(err);
                }
                // Take over as producer for a fresh attempt.
                body.state = EntryState::Pending;
                drop(body);
                self.run_producer(&entry, produce)
            }
            EntryState::Pending => unreachable!("pending handled above"),
        }
    }

    /// Probe for a Ready artifact without triggering compilation.
    pub fn lookup(&self, key: &CompilationKey) -> Option<Arc<CompiledArtifact>> {
        let entry = {
            let map = self.map.lock().unwrap();
            Arc::clone(map.entries.get(key)?)
        };
        let body = entry.body.lock().unwrap();
        match &body.state {
            EntryState::Ready(artifact) => {
                let artifact = Arc::clone(artifact);
                drop(body);
                self.touch(&entry);
                Some(artifact)
            }
            _ => None,
        }
    }

    /// Exempt `key` from eviction. Returns false if the key is not resident.
    pub fn pin(&self, key: &CompilationKey) -> bool {
        let map = self.map.lock().unwrap();
        match map.entries.get(key) {
            Some(entry) => {
                entry.pinned.store(true, Ordering::Relaxed);
                true
            }
            None => false,
        }
    }

    /// Make `key` evictable again. Returns false if the key is not resident.
    pub fn unpin(&self, key: &CompilationKey) -> bool {
        let map = self.map.lock().unwrap();
        match map.entries.get(key) {
            Some(entry) => {
                entry.pinned.store(false, Ordering::Relaxed);
                true
            }
            None => false,
        }
    }

    /// Drop a terminal entry (and its persisted artifact), forcing the next
    /// submission to compile afresh. Pending entries are left alone —
    /// removing an in-flight compilation could duplicate work. Returns
    /// whether an entry was removed.
    pub fn invalidate(&self, key: &CompilationKey) -> bool {
        let mut map = self.map.lock().unwrap();
        let Some(entry) = map.entries.get(key) else {
            return false;
        };
        let Ok(body) = entry.body.try_lock() else {
            return false;
        };
        let size = match &body.state {
            EntryState::Pending => return false,
            EntryState::Ready(artifact) => artifact.size_bytes(),
            EntryState::Failed(_) => 0,
        };
        drop(body);
        map.entries.remove(key);
        map.bytes -= size;
        if let Some(store) = &self.store {
            store.remove(key);
        }
        debug!(key = %key, "cache entry invalidated");
        true
    }

    pub fn stats(&self) -> CacheStats {
        let map = self.map.lock().unwrap();
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            restored: self.restored.load(Ordering::Relaxed),
            entries: map.entries.len(),
            bytes: map.bytes,
        }
    }

    // Producer path

    fn run_producer<F>(
        &self,
        entry: &Arc<CacheEntry>,
        produce: F,
    ) -> Result<Arc<CompiledArtifact>, CompileError>
    where
        F: FnOnce() -> Result<CompiledArtifact, CompileError>,
    {
        self.misses.fetch_add(1, Ordering::Relaxed);

        // Disk restore happens before the compiler is even consulted.
        if let Some(store) = &self.store {
            if let Some(artifact) = store.load(&entry.key) {
                let artifact = Arc::new(artifact);
                self.publish_ready(entry, &artifact, false);
                self.restored.fetch_add(1, Ordering::Relaxed);
                debug!(key = %entry.key, "artifact restored from disk store");
                return Ok(artifact);
            }
        }

        let mut guard = PendingGuard {
            entry: entry.as_ref(),
            armed: true,
        };
        let result = produce();
        guard.armed = false;
        drop(guard);

        match result {
            Ok(artifact) => {
                let artifact = Arc::new(artifact);
                debug!(
                    key = %entry.key,
                    bytes = artifact.size_bytes(),
                    elapsed_us = artifact.meta().duration.as_micros() as u64,
                    "compilation finished"
                );
                self.publish_ready(entry, &artifact, true);
                Ok(artifact)
            }
            Err(err) => {
                let mut body = entry.body.lock().unwrap();
                if !err.is_permanent() {
                    body.attempts += 1;
                    if body.attempts >= self.config.retry_limit {
                        warn!(
                            key = %entry.key,
                            attempts = body.attempts,
                            "transient failures exhausted retry budget, caching failure"
                        );
                    }
                }
                body.state = EntryState::Failed(err.clone());
                drop(body);
                entry.ready.notify_all();
                Err(err)
            }
        }
    }

    fn publish_ready(&self, entry: &CacheEntry, artifact: &Arc<CompiledArtifact>, persist: bool) {
        {
            let mut body = entry.body.lock().unwrap();
            body.state = EntryState::Ready(Arc::clone(artifact));
            body.attempts = 0;
        }
        entry.ready.notify_all();
        self.touch(entry);

        {
            let mut map = self.map.lock().unwrap();
            map.bytes += artifact.size_bytes();
        }
        self.enforce_budget();

        if persist {
            if let Some(store) = &self.store {
                if let Err(err) = store.save(&entry.key, artifact) {
                    warn!(key = %entry.key, %err, "failed to persist artifact");
                }
            }
        }
    }

    fn touch(&self, entry: &CacheEntry) {
        let now = self.clock.fetch_add(1, Ordering::Relaxed) + 1;
        entry.last_used.store(now, Ordering::Relaxed);
    }

    /// Evict Ready, unpinned entries, least-recently-used first, until the
    /// byte budget holds. Pending entries are untouchable; so are entries
    /// whose lock is contended right now (someone is actively using them).
    fn enforce_budget(&self) {
        let mut map = self.map.lock().unwrap();
        if map.bytes <= self.config.max_bytes {
            return;
        }

        let mut candidates: Vec<(CompilationKey, u64, usize)> = Vec::new();
        for (key, entry) in &map.entries {
            if entry.pinned.load(Ordering::Relaxed) {
                continue;
            }
            let Ok(body) = entry.body.try_lock() else {
                continue;
            };
            if let EntryState::Ready(artifact) = &body.state {
                candidates.push((
                    *key,
                    entry.last_used.load(Ordering::Relaxed),
                    artifact.size_bytes(),
                ));
            }
        }
        candidates.sort_by_key(|&(_, used, _)| used);

        for (key, _, size) in candidates {
            if map.bytes <= self.config.max_bytes {
                break;
            }
            map.entries.remove(&key);
            map.bytes -= size;
            self.evictions.fetch_add(1, Ordering::Relaxed);
            debug!(key = %key, bytes = size, "evicted artifact");
        }
    }
}
