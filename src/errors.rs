use std::path::PathBuf;

use thiserror::Error;

/// Error types shared by every ceremony role.
#[derive(Error, Debug)]
pub enum CeremonyError {
    #[error("pinned parameter integrity failure: {0}")]
    ParamsIntegrity(String),

    #[error("canonical chain is empty: no base key to build on")]
    NoBaseKey,

    #[error("base key is untrustworthy: {0}")]
    BaseKeyCorrupted(String),

    #[error("chain is already finalized ({})", .0.display())]
    ChainFinalized(PathBuf),

    #[error("final key failed verification: {0}")]
    FinalKeyInvalid(String),

    #[error("beacon fetch failed transiently: {0}")]
    BeaconTransient(String),

    #[error("toolkit invocation failed: {0}")]
    Toolkit(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("manifest self-check failed: {0}")]
    ManifestMismatch(String),

    #[error("checksum mismatch for {}: expected {expected}, got {actual}", .path.display())]
    ChecksumMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    #[error("chain index sequence is broken: expected {expected}, found {found}")]
    ChainGap { expected: u32, found: u32 },

    #[error("chain index space is exhausted: entry {0} does not fit four digits")]
    ChainFull(u32),

    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),
}

impl CeremonyError {
    /// True for conditions where the correct reaction is to try the same
    /// invocation again later rather than page an operator.
    pub fn is_retry_later(&self) -> bool {
        matches!(self, CeremonyError::BeaconTransient(_))
    }
}

pub type Result<T> = std::result::Result<T, CeremonyError>;
