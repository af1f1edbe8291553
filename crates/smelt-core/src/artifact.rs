// CompiledArtifact — Immutable compiler output
//
// The bytes are opaque to the engine; only the runtime that loads them
// knows their encoding. Artifacts carry compile metadata and a
// process-unique identity so callers can assert "the cache handed me the
// same artifact, not a recompile".

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::device::DeviceClass;

static NEXT_ARTIFACT_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique artifact identity, assigned at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ArtifactId(u64);

impl fmt::Display for ArtifactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "artifact#{}", self.0)
    }
}

/// Metadata recorded when the compiler produced an artifact.
#[derive(Debug, Clone)]
pub struct CompileMeta {
    /// Wall-clock time the compiler spent.
    pub duration: Duration,
    /// Version string reported by the compiler that produced the bytes.
    pub compiler_version: String,
}

/// Immutable output of one compilation.
#[derive(Debug)]
pub struct CompiledArtifact {
    id: ArtifactId,
    bytes: Vec<u8>,
    class: DeviceClass,
    meta: CompileMeta,
}

impl CompiledArtifact {
    pub fn new(bytes: Vec<u8>, class: DeviceClass, meta: CompileMeta) -> Self {
        CompiledArtifact {
            id: ArtifactId(NEXT_ARTIFACT_ID.fetch_add(1, Ordering::Relaxed)),
            bytes,
            class,
            meta,
        }
    }

    pub fn id(&self) -> ArtifactId {
        self.id
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// The capability class this artifact was compiled for.
    pub fn class(&self) -> &DeviceClass {
        &self.class
    }

    pub fn meta(&self) -> &CompileMeta {
        &self.meta
    }

    pub fn size_bytes(&self) -> usize {
        self.bytes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn artifact() -> CompiledArtifact {
        CompiledArtifact::new(
            vec![1, 2, 3],
            DeviceClass::new("cpu-sync"),
            CompileMeta {
                duration: Duration::from_millis(5),
                compiler_version: "test-0.1".to_string(),
            },
        )
    }

    #[test]
    fn test_artifact_ids_are_unique() {
        let a = artifact();
        let b = artifact();
        assert_ne!(a.id(), b.id());
        assert_eq!(a.size_bytes(), 3);
    }
}
