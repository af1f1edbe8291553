// DiskStore — Write-through artifact persistence
//
// Binary artifact file format (.smeltc, all integers little-endian):
//
//   Header:
//     magic:    [u8; 4]  = b"SMLC"
//     version:  u32      = 1
//     key:      [u8; 32] (the compilation key the artifact was stored under)
//
//   Metadata:
//     class_len:   u32, class:   [u8; class_len]   (UTF-8)
//     version_len: u32, version: [u8; version_len] (UTF-8, compiler version)
//     duration_us: u64
//
//   Payload:
//     content_sha: [u8; 32] (sha-256 of data)
//     data_len:    u64
//     data:        [u8; data_len]
//
// Restore is strict: wrong magic, wrong version, key mismatch, checksum
// mismatch, or any read error all degrade to a cache miss. A key computed
// identically either yields the byte-identical artifact or nothing.

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::PathBuf;
use std::time::Duration;

use sha2::{Digest as _, Sha256};
use tracing::{debug, warn};

use smelt_core::{CompilationKey, CompileMeta, CompiledArtifact, DeviceClass};

const MAGIC: &[u8; 4] = b"SMLC";
const VERSION: u32 = 1;

pub(crate) struct DiskStore {
    dir: PathBuf,
}

impl DiskStore {
    pub(crate) fn new(dir: PathBuf) -> io::Result<Self> {
        fs::create_dir_all(&dir)?;
        Ok(DiskStore { dir })
    }

    fn path_for(&self, key: &CompilationKey) -> PathBuf {
        self.dir.join(format!("{}.smeltc", key.to_hex()))
    }

    pub(crate) fn save(&self, key: &CompilationKey, artifact: &CompiledArtifact) -> io::Result<()> {
        let path = self.path_for(key);
        let mut w = BufWriter::new(File::create(&path)?);

        w.write_all(MAGIC)?;
        w.write_all(&VERSION.to_le_bytes())?;
        w.write_all(key.digest().as_bytes())?;

        write_str(&mut w, artifact.class().as_str())?;
        write_str(&mut w, &artifact.meta().compiler_version)?;
        w.write_all(&(artifact.meta().duration.as_micros() as u64).to_le_bytes())?;

        let sha: [u8; 32] = Sha256::digest(artifact.bytes()).into();
        w.write_all(&sha)?;
        w.write_all(&(artifact.bytes().len() as u64).to_le_bytes())?;
        w.write_all(artifact.bytes())?;
        w.flush()?;

        debug!(key = %key, path = %path.display(), "artifact persisted");
        Ok(())
    }

    /// Restore the artifact stored under `key`, or `None` if there is no
    /// valid one. Never an error: a bad file is a miss.
    pub(crate) fn load(&self, key: &CompilationKey) -> Option<CompiledArtifact> {
        let path = self.path_for(key);
        let file = File::open(&path).ok()?;
        match read_artifact(BufReader::new(file), key) {
            Ok(artifact) => Some(artifact),
            Err(reason) => {
                warn!(key = %key, path = %path.display(), %reason, "discarding invalid stored artifact");
                None
            }
        }
    }

    pub(crate) fn remove(&self, key: &CompilationKey) {
        let _ = fs::remove_file(self.path_for(key));
    }
}

fn read_artifact<R: Read>(mut r: R, key: &CompilationKey) -> Result<CompiledArtifact, String> {
    let mut magic = [0u8; 4];
    read_exact(&mut r, &mut magic)?;
    if &magic != MAGIC {
        return Err(format!("bad magic {magic:?}"));
    }
    let version = read_u32(&mut r)?;
    if version != VERSION {
        return Err(format!("unsupported store version {version}"));
    }
    let mut stored_key = [0u8; 32];
    read_exact(&mut r, &mut stored_key)?;
    if &stored_key != key.digest().as_bytes() {
        return Err("stored under a different key".to_string());
    }

    let class = read_string(&mut r)?;
    let compiler_version = read_string(&mut r)?;
    let duration_us = read_u64(&mut r)?;

    let mut expected_sha = [0u8; 32];
    read_exact(&mut r, &mut expected_sha)?;
    let data_len = read_u64(&mut r)? as usize;
    let mut data = vec![0u8; data_len];
    read_exact(&mut r, &mut data)?;

    let actual_sha: [u8; 32] = Sha256::digest(&data).into();
    if actual_sha != expected_sha {
        return Err("content checksum mismatch".to_string());
    }

    Ok(CompiledArtifact::new(
        data,
        DeviceClass::new(class),
        CompileMeta {
            duration: Duration::from_micros(duration_us),
            compiler_version,
        },
    ))
}

// LE field helpers

fn write_str<W: Write>(w: &mut W, s: &str) -> io::Result<()> {
    w.write_all(&(s.len() as u32).to_le_bytes())?;
    w.write_all(s.as_bytes())
}

fn read_exact<R: Read>(r: &mut R, buf: &mut [u8]) -> Result<(), String> {
    r.read_exact(buf).map_err(|e| format!("short read: {e}"))
}

fn read_u32<R: Read>(r: &mut R) -> Result<u32, String> {
    let mut buf = [0u8; 4];
    read_exact(r, &mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_u64<R: Read>(r: &mut R) -> Result<u64, String> {
    let mut buf = [0u8; 8];
    read_exact(r, &mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

fn read_string<R: Read>(r: &mut R) -> Result<String, String> {
    let len = read_u32(r)? as usize;
    if len > 1 << 20 {
        return Err(format!("unreasonable string length {len}"));
    }
    let mut buf = vec![0u8; len];
    read_exact(r, &mut buf)?;
    String::from_utf8(buf).map_err(|e| format!("invalid UTF-8: {e}"))
}
