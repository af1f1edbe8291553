// Digest / CompilationKey — content fingerprints for compilation dedup
//
// A CompilationKey identifies one unit of compilation work: the transformed
// program, the identity of every transformation step that produced it (in
// order), the target capability class, and the compiler configuration.
// Two submissions with equal keys are interchangeable in cache lookup.

use std::fmt;

use sha2::{Digest as _, Sha256};

use crate::device::DeviceClass;

/// A 32-byte sha-256 content hash.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Digest([u8; 32]);

impl Digest {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Digest(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Full lowercase hex rendering (64 chars).
    pub fn to_hex(&self) -> String {
        let mut s = String::with_capacity(64);
        for b in &self.0 {
            s.push_str(&format!("{b:02x}"));
        }
        s
    }

    /// Parse a 64-char lowercase hex string back into a digest.
    pub fn parse_hex(s: &str) -> Option<Self> {
        if s.len() != 64 {
            return None;
        }
        let mut out = [0u8; 32];
        for (i, chunk) in s.as_bytes().chunks(2).enumerate() {
            let hi = (chunk[0] as char).to_digit(16)?;
            let lo = (chunk[1] as char).to_digit(16)?;
            out[i] = ((hi << 4) | lo) as u8;
        }
        Some(Digest(out))
    }
}

impl fmt::Display for Digest {
    /// Short form: the first 16 hex chars. Use [`Digest::to_hex`] for the full hash.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0[..8] {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({self})")
    }
}

/// Incremental sha-256 builder used by the fingerprinting code paths.
///
/// Strings and byte slices are length-prefixed so that adjacent fields can
/// never alias each other ("ab"+"c" hashes differently from "a"+"bc").
pub(crate) struct Fingerprint {
    hasher: Sha256,
}

impl Fingerprint {
    pub(crate) fn new(domain: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(domain.as_bytes());
        Fingerprint { hasher }
    }

    pub(crate) fn raw(&mut self, bytes: &[u8]) {
        self.hasher.update(bytes);
    }

    pub(crate) fn bytes(&mut self, bytes: &[u8]) {
        self.hasher.update((bytes.len() as u64).to_le_bytes());
        self.hasher.update(bytes);
    }

    pub(crate) fn str(&mut self, s: &str) {
        self.bytes(s.as_bytes());
    }

    pub(crate) fn u32(&mut self, v: u32) {
        self.hasher.update(v.to_le_bytes());
    }

    pub(crate) fn f64(&mut self, v: f64) {
        self.hasher.update(v.to_bits().to_le_bytes());
    }

    pub(crate) fn finish(self) -> Digest {
        Digest(self.hasher.finalize().into())
    }
}

// CompilationKey

/// Identifies one distinct unit of compilation work.
///
/// Derived from the transformed program's content hash, the ordered step
/// identities that produced it, the target device class, and the compiler
/// configuration digest. The cache guarantees at most one in-flight
/// compilation per key.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct CompilationKey(Digest);

impl CompilationKey {
    pub fn derive(
        program: &Digest,
        step_identities: &[String],
        target: &DeviceClass,
        config: &Digest,
    ) -> Self {
        let mut fp = Fingerprint::new("smelt-compilation-key-v1");
        fp.raw(program.as_bytes());
        fp.u32(step_identities.len() as u32);
        for name in step_identities {
            fp.str(name);
        }
        fp.str(target.as_str());
        fp.raw(config.as_bytes());
        CompilationKey(fp.finish())
    }

    pub fn digest(&self) -> &Digest {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        self.0.to_hex()
    }
}

impl fmt::Display for CompilationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for CompilationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CompilationKey({})", self.0)
    }
}
