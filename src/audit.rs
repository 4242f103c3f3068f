use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Local;
use serde::Serialize;

use crate::errors::Result;

/// Structured events appended to the per-run audit log. One JSON object per
/// line; the files are only ever appended to, never rewritten.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AuditEvent {
    ParamsVerified {
        r1cs_sha256: String,
        ptau_sha256: String,
    },
    BaseKeyCreated {
        sha256: String,
    },
    ContributionAccepted {
        index: u32,
        source: String,
        sha256: String,
        seconds: f64,
    },
    ContributionRejected {
        source: String,
        size: u64,
        reason: String,
    },
    ManifestRegenerated {
        entries: usize,
        self_sha256: String,
    },
    ChainFinalized {
        round: u64,
        beacon_value: String,
        sha256: String,
    },
    VerificationKeyExported {
        sha256: String,
    },
}

#[derive(Serialize)]
struct AuditRecord<'a> {
    ts: String,
    #[serde(flatten)]
    event: &'a AuditEvent,
}

pub struct AuditLog {
    path: PathBuf,
    file: File,
}

impl AuditLog {
    /// Opens a fresh audit file for this run, creating the log directory if
    /// needed.
    pub fn open(log_dir: &Path) -> Result<Self> {
        fs::create_dir_all(log_dir)?;
        let stamp = Local::now().format("%Y-%m-%d_%H%M%S");
        let path = log_dir.join(format!("ceremony_audit_{stamp}.log"));
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(AuditLog { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&mut self, event: &AuditEvent) -> Result<()> {
        let record = AuditRecord {
            ts: Local::now().to_rfc3339(),
            event,
        };
        let mut line = serde_json::to_string(&record)?;
        line.push('\n');
        self.file.write_all(line.as_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn events_append_as_json_lines() {
        let dir = tempdir().unwrap();
        let mut log = AuditLog::open(dir.path()).unwrap();
        log.append(&AuditEvent::BaseKeyCreated {
            sha256: "ab".repeat(32),
        })
        .unwrap();
        log.append(&AuditEvent::ContributionRejected {
            source: "giftcard_merkle_tmp_0001.key".to_string(),
            size: 12,
            reason: "artifact too small".to_string(),
        })
        .unwrap();

        let content = fs::read_to_string(log.path()).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["event"], "base_key_created");
        assert!(first["ts"].is_string());
        let second: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second["event"], "contribution_rejected");
        assert_eq!(second["size"], 12);
    }
}
