//! The checksum manifest is the one document an auditor needs: every ceremony
//! artifact with its digest, closed by a self-checksum line so the manifest
//! itself cannot drift unnoticed.

use std::fs;
use std::path::Path;

use crate::chain::ChainDir;
use crate::checksum;
use crate::config::CeremonyConfig;
use crate::errors::{CeremonyError, Result};

pub const MANIFEST_FILE: &str = "checksum_manifest.txt";

/// Label on the trailing self-checksum line.
pub const SELF_CHECK_LABEL: &str = "MANIFEST";

#[derive(Debug, Clone, Default)]
pub struct Manifest {
    entries: Vec<(String, String)>,
}

impl Manifest {
    pub fn new() -> Self {
        Manifest::default()
    }

    pub fn push(&mut self, sha256: String, name: String) {
        self.entries.push((sha256, name));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[(String, String)] {
        &self.entries
    }

    fn body(&self) -> String {
        let mut out = String::new();
        for (sha256, name) in &self.entries {
            out.push_str(sha256);
            out.push_str("  ");
            out.push_str(name);
            out.push('\n');
        }
        out
    }

    /// Digest over the raw bytes of every entry line, newlines included.
    pub fn self_checksum(&self) -> String {
        checksum::sha256_bytes(self.body().as_bytes())
    }

    pub fn render(&self) -> String {
        let mut out = self.body();
        out.push_str(&self.self_checksum());
        out.push_str("  ");
        out.push_str(SELF_CHECK_LABEL);
        out.push('\n');
        out
    }

    pub fn write_to(&self, path: &Path) -> Result<()> {
        fs::write(path, self.render())?;
        Ok(())
    }
}

/// Re-derives the trailing self-checksum from the entry lines actually on
/// disk and compares. Returns the number of entry lines covered.
pub fn verify_file(path: &Path) -> Result<usize> {
    let content = fs::read_to_string(path)?;
    let body_end = match content.trim_end().rfind('\n') {
        Some(i) => i + 1,
        None => {
            return Err(CeremonyError::ManifestMismatch(format!(
                "{} has no entry lines",
                path.display()
            )))
        }
    };
    let body = &content[..body_end];
    let last = content[body_end..].trim_end();
    let expected = format!("{}  {}", checksum::sha256_bytes(body.as_bytes()), SELF_CHECK_LABEL);
    if last != expected {
        return Err(CeremonyError::ManifestMismatch(format!(
            "{} self-checksum line does not match its entries",
            path.display()
        )));
    }
    Ok(body.lines().count())
}

/// Rebuilds the manifest from scratch: pinned parameters first, then every
/// chain entry in index order, then the final key and verification key when
/// they exist. Running it twice in a row produces identical bytes.
pub fn regenerate(config: &CeremonyConfig, chain: &ChainDir) -> Result<Manifest> {
    let mut manifest = Manifest::new();
    for pinned in [&config.r1cs, &config.ptau] {
        manifest.push(checksum::sha256_file(&pinned.path)?, pinned.file_name());
    }
    for entry in chain.entries()? {
        manifest.push(checksum::sha256_file(&entry.path)?, entry.file_name());
    }
    let final_key = chain.final_key_path();
    if final_key.exists() {
        manifest.push(
            checksum::sha256_file(&final_key)?,
            chain.final_key_name(),
        );
    }
    let vkey = chain.verification_key_path();
    if vkey.exists() {
        manifest.push(
            checksum::sha256_file(&vkey)?,
            chain.verification_key_name(),
        );
    }
    manifest.write_to(&chain.root().join(MANIFEST_FILE))?;
    Ok(manifest)
}
