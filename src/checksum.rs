use std::fs::{self, File};
use std::io::{BufReader, Read, Write};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::errors::{CeremonyError, Result};

/// Extension appended to an artifact path for its checksum sidecar.
pub const SIDECAR_EXT: &str = "sha256";

/// Streams a file through SHA-256 and returns the lowercase hex digest.
pub fn sha256_file(path: &Path) -> Result<String> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

pub fn sha256_bytes(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// `foo.key` becomes `foo.key.sha256`.
pub fn sidecar_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".");
    name.push(SIDECAR_EXT);
    PathBuf::from(name)
}

/// Writes a sidecar in sha256sum layout next to the artifact and returns the
/// digest. The layout keeps the file checkable with `sha256sum -c`.
pub fn write_sidecar(path: &Path) -> Result<String> {
    let digest = sha256_file(path)?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    let mut file = File::create(sidecar_path(path))?;
    writeln!(file, "{digest}  {name}")?;
    Ok(digest)
}

/// Reads the digest recorded in an artifact's sidecar, or None when no
/// sidecar exists.
pub fn read_sidecar(path: &Path) -> Result<Option<String>> {
    let sidecar = sidecar_path(path);
    if !sidecar.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(&sidecar)?;
    match content.split_whitespace().next() {
        Some(digest) => Ok(Some(digest.to_string())),
        None => Ok(None),
    }
}

/// Recomputes an artifact's digest and compares it to an expected value.
pub fn verify_file(path: &Path, expected: &str) -> Result<()> {
    let actual = sha256_file(path)?;
    if actual != expected {
        return Err(CeremonyError::ChecksumMismatch {
            path: path.to_path_buf(),
            expected: expected.to_string(),
            actual,
        });
    }
    Ok(())
}
