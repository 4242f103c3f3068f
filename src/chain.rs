//! On-disk layout of the canonical contribution chain.
//!
//! The chain directory is the only shared state between roles. Every entry is
//! an immutable `<circuit>_<index>.key` file with a `.sha256` sidecar; the
//! index is always four zero-padded digits assigned at integration time.

use std::cmp::Ordering;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use crate::checksum;
use crate::errors::{CeremonyError, Result};

pub const KEY_EXT: &str = ".key";
pub const TMP_MARKER: &str = "_tmp_";
pub const FINAL_SUFFIX: &str = "_final.key";
pub const FINAL_STAGING_SUFFIX: &str = "_final.key.part";
pub const VERIFICATION_KEY_SUFFIX: &str = "_verification_key.json";
pub const BEACON_RECORD_SUFFIX: &str = "_final_beacon.json";
pub const CONTRIBUTOR_RECORD_SUFFIX: &str = "_contributor.txt";

/// Extension appended to a pending artifact path for its attribution sidecar.
pub const LABEL_EXT: &str = "label";

/// Highest index the four zero-padded digits of an entry name can carry.
pub const MAX_ENTRY_INDEX: u32 = 9999;

/// How a pending artifact announced itself. Self-declared indices are
/// accepted for ordering but never trusted: the aggregator always assigns
/// the next chain index itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContributionName {
    Indexed(u32),
    Temporary,
}

/// Parses a pending artifact name. Accepts `<circuit>_NNNN.key` and
/// `<circuit>_tmp_<suffix>.key`; anything else is malformed.
pub fn parse_contribution_name(circuit: &str, file_name: &str) -> Option<ContributionName> {
    let stem = file_name.strip_suffix(KEY_EXT)?;
    let rest = stem.strip_prefix(circuit)?.strip_prefix('_')?;
    if let Some(suffix) = rest.strip_prefix("tmp_") {
        if suffix.is_empty() {
            return None;
        }
        return Some(ContributionName::Temporary);
    }
    if rest.len() == 4 && rest.bytes().all(|b| b.is_ascii_digit()) {
        // leading zeros make the unwrap-free parse infallible here
        return rest.parse::<u32>().ok().map(ContributionName::Indexed);
    }
    None
}

/// Strict form used for canonical entries: exactly `<circuit>_NNNN.key`.
pub fn parse_entry_index(circuit: &str, file_name: &str) -> Option<u32> {
    match parse_contribution_name(circuit, file_name) {
        Some(ContributionName::Indexed(index)) => Some(index),
        _ => None,
    }
}

/// `foo.key` becomes `foo.key.label`: where the submitter records the
/// attribution label for the aggregator to carry into the contributor record.
pub fn label_path(key_path: &Path) -> PathBuf {
    let mut name = key_path.as_os_str().to_owned();
    name.push(".");
    name.push(LABEL_EXT);
    PathBuf::from(name)
}

pub fn write_label(key_path: &Path, label: &str) -> Result<()> {
    fs::write(label_path(key_path), format!("{label}\n"))?;
    Ok(())
}

/// Reads the label recorded next to a pending artifact. None when the
/// submitter left nothing behind or the file is blank.
pub fn read_label(key_path: &Path) -> Result<Option<String>> {
    let path = label_path(key_path);
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(&path)?;
    let label = raw.trim();
    if label.is_empty() {
        return Ok(None);
    }
    Ok(Some(label.to_string()))
}

/// One artifact found in the pending directory.
#[derive(Debug, Clone)]
pub struct PendingContribution {
    pub path: PathBuf,
    pub file_name: String,
    pub size: u64,
    /// None means the name did not parse and the artifact must be rejected.
    pub name: Option<ContributionName>,
}

/// Protocol invariant: candidates are admitted in exactly this order, the
/// raw file name compared byte-wise. Nothing else (mtime, directory
/// iteration order, an index embedded in the name) may influence it, so two
/// aggregators looking at the same directory always agree on the sequence.
pub fn submission_order(a: &PendingContribution, b: &PendingContribution) -> Ordering {
    a.file_name.as_bytes().cmp(b.file_name.as_bytes())
}

/// Lists every `.key` file in the pending directory, sorted by
/// [`submission_order`].
pub fn scan_pending(pending_dir: &Path, circuit: &str) -> Result<Vec<PendingContribution>> {
    let mut out = Vec::new();
    if !pending_dir.is_dir() {
        return Ok(out);
    }
    for entry in fs::read_dir(pending_dir)? {
        let entry = entry?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let file_name = match path.file_name().and_then(|n| n.to_str()) {
            Some(n) => n.to_string(),
            None => continue,
        };
        if !file_name.ends_with(KEY_EXT) {
            continue;
        }
        let size = entry.metadata()?.len();
        let name = parse_contribution_name(circuit, &file_name);
        out.push(PendingContribution {
            path,
            file_name,
            size,
            name,
        });
    }
    out.sort_by(submission_order);
    Ok(out)
}

/// One canonical chain entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainEntry {
    pub index: u32,
    pub path: PathBuf,
}

impl ChainEntry {
    pub fn file_name(&self) -> String {
        match self.path.file_name() {
            Some(name) => name.to_string_lossy().into_owned(),
            None => self.path.display().to_string(),
        }
    }
}

/// Fails on the first gap in the zero-based index sequence.
pub fn ensure_contiguous(entries: &[ChainEntry]) -> Result<()> {
    for (expected, entry) in entries.iter().enumerate() {
        if entry.index != expected as u32 {
            return Err(CeremonyError::ChainGap {
                expected: expected as u32,
                found: entry.index,
            });
        }
    }
    Ok(())
}

/// Handle on the chain directory for one circuit.
#[derive(Debug, Clone)]
pub struct ChainDir {
    root: PathBuf,
    circuit: String,
}

impl ChainDir {
    pub fn new(root: impl Into<PathBuf>, circuit: impl Into<String>) -> Self {
        ChainDir {
            root: root.into(),
            circuit: circuit.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn entry_name(&self, index: u32) -> String {
        format!("{}_{:04}{}", self.circuit, index, KEY_EXT)
    }

    pub fn entry_path(&self, index: u32) -> PathBuf {
        self.root.join(self.entry_name(index))
    }

    pub fn final_key_name(&self) -> String {
        format!("{}{}", self.circuit, FINAL_SUFFIX)
    }

    pub fn final_key_path(&self) -> PathBuf {
        self.root.join(self.final_key_name())
    }

    /// Unverified beacon output is staged here; only a key that passed
    /// verification may be renamed to the final name.
    pub fn final_key_staging_path(&self) -> PathBuf {
        self.root
            .join(format!("{}{}", self.circuit, FINAL_STAGING_SUFFIX))
    }

    pub fn verification_key_name(&self) -> String {
        format!("{}{}", self.circuit, VERIFICATION_KEY_SUFFIX)
    }

    pub fn verification_key_path(&self) -> PathBuf {
        self.root.join(self.verification_key_name())
    }

    pub fn beacon_record_path(&self) -> PathBuf {
        self.root.join(format!("{}{}", self.circuit, BEACON_RECORD_SUFFIX))
    }

    pub fn contributor_record_path(&self, index: u32) -> PathBuf {
        self.root
            .join(format!("{}_{:04}{}", self.circuit, index, CONTRIBUTOR_RECORD_SUFFIX))
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.root.join(crate::manifest::MANIFEST_FILE)
    }

    pub fn has_final_key(&self) -> bool {
        self.final_key_path().is_file()
    }

    /// All canonical entries, sorted by index. Files that do not match the
    /// strict entry pattern are not entries and are ignored here.
    pub fn entries(&self) -> Result<Vec<ChainEntry>> {
        let mut out = Vec::new();
        if !self.root.is_dir() {
            return Ok(out);
        }
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let file_name = match path.file_name().and_then(|n| n.to_str()) {
                Some(n) => n,
                None => continue,
            };
            if let Some(index) = parse_entry_index(&self.circuit, file_name) {
                out.push(ChainEntry { index, path });
            }
        }
        out.sort_by_key(|e| e.index);
        Ok(out)
    }

    /// Highest-indexed entry, the predecessor for the next contribution.
    pub fn tip(&self) -> Result<Option<ChainEntry>> {
        Ok(self.entries()?.into_iter().last())
    }

    pub fn next_index(&self) -> Result<u32> {
        let next = match self.tip()? {
            Some(entry) => entry.index + 1,
            None => 0,
        };
        // a fifth digit would produce a name the strict entry pattern never
        // matches, silently dropping the entry from every future listing
        if next > MAX_ENTRY_INDEX {
            return Err(CeremonyError::ChainFull(next));
        }
        Ok(next)
    }

    /// Moves a verified pending artifact into the chain as entry `index`.
    ///
    /// The copy lands in a temp file first and is re-hashed before the rename,
    /// so a partial write can never become a canonical entry. On success the
    /// source artifact and its sidecars are removed from the pending
    /// directory. Returns the entry digest.
    pub fn integrate(&self, source: &Path, index: u32) -> Result<String> {
        if index > MAX_ENTRY_INDEX {
            return Err(CeremonyError::ChainFull(index));
        }
        fs::create_dir_all(&self.root)?;
        let source_sha = checksum::sha256_file(source)?;
        let mut tmp = NamedTempFile::new_in(&self.root)?;
        let mut reader = File::open(source)?;
        io::copy(&mut reader, tmp.as_file_mut())?;
        let copy_sha = checksum::sha256_file(tmp.path())?;
        if copy_sha != source_sha {
            return Err(CeremonyError::ChecksumMismatch {
                path: source.to_path_buf(),
                expected: source_sha,
                actual: copy_sha,
            });
        }
        let target = self.entry_path(index);
        tmp.persist(&target).map_err(|e| e.error)?;
        checksum::write_sidecar(&target)?;
        fs::remove_file(source)?;
        let source_sidecar = checksum::sidecar_path(source);
        if source_sidecar.exists() {
            fs::remove_file(&source_sidecar)?;
        }
        let source_label = label_path(source);
        if source_label.exists() {
            fs::remove_file(&source_label)?;
        }
        Ok(source_sha)
    }
}
