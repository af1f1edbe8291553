// Configuration — Explicit policy inputs
//
// Eviction thresholds, retry budgets, and persistence are policy, not
// behavior the engine hardcodes. Everything here is plain data with
// builder-style setters.

use std::path::PathBuf;

use smelt_core::CompilerConfig;

/// Policy for the process-wide compilation cache.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Byte budget for Ready artifacts. Exceeding it evicts unpinned
    /// entries in least-recently-used order. Pending entries never count
    /// and are never evicted.
    pub max_bytes: usize,
    /// Transient compile failures tolerated per key before the failure is
    /// cached like a permanent one. `invalidate` clears the count.
    pub retry_limit: u32,
    /// Directory for write-through artifact persistence. `None` disables
    /// it. A stored artifact that fails validation on restore is a miss,
    /// never an error.
    pub persist_dir: Option<PathBuf>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            max_bytes: 256 << 20,
            retry_limit: 8,
            persist_dir: None,
        }
    }
}

impl CacheConfig {
    pub fn with_max_bytes(mut self, max_bytes: usize) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    pub fn with_retry_limit(mut self, retry_limit: u32) -> Self {
        self.retry_limit = retry_limit;
        self
    }

    pub fn with_persist_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.persist_dir = Some(dir.into());
        self
    }
}

/// Engine-wide configuration: cache policy plus the compiler configuration
/// every session applies (and fingerprints into its compilation keys).
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    pub cache: CacheConfig,
    pub compiler: CompilerConfig,
}

impl EngineConfig {
    pub fn with_cache(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_compiler(mut self, compiler: CompilerConfig) -> Self {
        self.compiler = compiler;
        self
    }
}
