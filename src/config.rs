use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::checksum;
use crate::errors::{CeremonyError, Result};

/// Reference checksum of the giftcard Merkle constraint system, fixed when the
/// ceremony was announced.
pub const GIFTCARD_R1CS_SHA256: &str =
    "61c6a993c53c3adcba0abf44d83860c25731acfe991e8c31118b16d723168a71";

/// Reference checksum of the phase-1 powers of tau transcript.
pub const POWERS_OF_TAU_SHA256: &str =
    "718d8f33891d54ef92442773b72149feba0c32154f3126b723396cf2bc5eabc9";

/// One pinned parameter file: where it lives, what it must hash to and the
/// smallest size a non-truncated copy can have.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PinnedFile {
    pub path: PathBuf,
    pub sha256: String,
    pub min_bytes: u64,
}

impl PinnedFile {
    /// Checks existence, minimum size and checksum against the pinned
    /// reference. Any mismatch is reported as a parameter integrity failure.
    pub fn verify(&self) -> Result<String> {
        let meta = fs::metadata(&self.path).map_err(|e| {
            CeremonyError::ParamsIntegrity(format!("{} is unreadable: {}", self.path.display(), e))
        })?;
        if meta.len() < self.min_bytes {
            return Err(CeremonyError::ParamsIntegrity(format!(
                "{} is {} bytes, below the pinned minimum of {}",
                self.path.display(),
                meta.len(),
                self.min_bytes
            )));
        }
        let actual = checksum::sha256_file(&self.path)?;
        if actual != self.sha256 {
            return Err(CeremonyError::ParamsIntegrity(format!(
                "{} hashes to {}, pinned reference is {}",
                self.path.display(),
                actual,
                self.sha256
            )));
        }
        Ok(actual)
    }

    pub fn file_name(&self) -> String {
        match self.path.file_name() {
            Some(name) => name.to_string_lossy().into_owned(),
            None => self.path.display().to_string(),
        }
    }
}

/// Bounded retry schedule for the randomness fetch.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay_secs: u64,
}

/// Full ceremony configuration, shared by all four roles.
///
/// The defaults describe the giftcard Merkle phase-2 ceremony; operators
/// override them with a JSON file passed on the command line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CeremonyConfig {
    pub ceremony_name: String,
    pub circuit_name: String,
    pub r1cs: PinnedFile,
    pub ptau: PinnedFile,
    pub chain_dir: PathBuf,
    pub pending_dir: PathBuf,
    pub log_dir: PathBuf,
    pub contribution_min_bytes: u64,
    pub verify_timeout_secs: u64,
    pub toolkit_cmd: String,
    pub beacon_url: String,
    pub beacon_strength: u32,
    pub beacon_connect_timeout_secs: u64,
    pub beacon_timeout_secs: u64,
    pub beacon_retry: RetryPolicy,
}

impl Default for CeremonyConfig {
    fn default() -> Self {
        CeremonyConfig {
            ceremony_name: "giftcard-merkle-phase2".to_string(),
            circuit_name: "giftcard_merkle".to_string(),
            r1cs: PinnedFile {
                path: PathBuf::from("ceremony/params/giftcard_merkle.r1cs"),
                sha256: GIFTCARD_R1CS_SHA256.to_string(),
                min_bytes: 64 * 1024,
            },
            ptau: PinnedFile {
                path: PathBuf::from("ceremony/params/powersoftau28_final.ptau"),
                sha256: POWERS_OF_TAU_SHA256.to_string(),
                min_bytes: 1024 * 1024,
            },
            chain_dir: PathBuf::from("ceremony/chain"),
            pending_dir: PathBuf::from("ceremony/pending"),
            log_dir: PathBuf::from("ceremony/logs"),
            contribution_min_bytes: 64 * 1024,
            verify_timeout_secs: 300,
            toolkit_cmd: "snarkjs".to_string(),
            beacon_url: "https://api.drand.sh".to_string(),
            beacon_strength: 10,
            beacon_connect_timeout_secs: 10,
            beacon_timeout_secs: 30,
            beacon_retry: RetryPolicy {
                max_attempts: 3,
                delay_secs: 5,
            },
        }
    }
}

impl CeremonyConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        let config: CeremonyConfig = serde_json::from_reader(reader)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads the given file, or falls back to the built-in giftcard defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::load(p),
            None => {
                let config = Self::default();
                config.validate()?;
                Ok(config)
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = File::create(path)?;
        let writer = BufWriter::new(file);
        serde_json::to_writer_pretty(writer, self)?;
        Ok(())
    }

    /// Rejects configurations that could silently weaken the protocol.
    pub fn validate(&self) -> Result<()> {
        if self.circuit_name.is_empty() {
            return Err(CeremonyError::Config("circuit_name is empty".to_string()));
        }
        if self.circuit_name.contains(['/', '\\']) {
            return Err(CeremonyError::Config(format!(
                "circuit_name {:?} contains path separators",
                self.circuit_name
            )));
        }
        for (field, value) in [("r1cs", &self.r1cs.sha256), ("ptau", &self.ptau.sha256)] {
            if value.len() != 64 || !value.chars().all(|c| c.is_ascii_hexdigit()) {
                return Err(CeremonyError::Config(format!(
                    "{field} reference checksum {value:?} is not a sha256 hex digest"
                )));
            }
        }
        if self.beacon_strength == 0 {
            return Err(CeremonyError::Config("beacon_strength must be positive".to_string()));
        }
        if self.beacon_retry.max_attempts == 0 {
            return Err(CeremonyError::Config(
                "beacon_retry.max_attempts must be positive".to_string(),
            ));
        }
        if self.verify_timeout_secs == 0 {
            return Err(CeremonyError::Config(
                "verify_timeout_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
