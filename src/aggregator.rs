//! The trusted operator role: drains the pending directory into the
//! canonical chain.
//!
//! A run walks a fixed sequence. Verify the pinned parameters, make sure a
//! trustworthy base key exists, process every pending candidate in
//! deterministic order, then regenerate the checksum manifest. A candidate
//! that fails validation is logged and skipped; it never stops the batch and
//! never consumes a chain index.

use std::fmt;
use std::fs::File;
use std::io::Write;
use std::time::{Duration, Instant};

use chrono::Local;
use serde::{Deserialize, Serialize};

use crate::audit::{AuditEvent, AuditLog};
use crate::chain::{self, ChainDir, PendingContribution};
use crate::checksum;
use crate::config::CeremonyConfig;
use crate::errors::{CeremonyError, Result};
use crate::manifest;
use crate::toolkit::{ProvingToolkit, Verdict};

/// Per-entry provenance record, written next to the entry it describes.
#[derive(Debug, Serialize, Deserialize)]
pub struct ContributorRecord {
    pub contribution_no: u32,
    pub date: String,
    pub name: String,
    pub source: String,
    pub prev_key_hash: String,
    pub current_key_hash: String,
    pub time_taken_seconds: f64,
}

impl fmt::Display for ContributorRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "### Contribution No: {:02}\n\n\
            **Date:** {}\n\n\
            Name: {}\n\n\
            Submitted as: {}\n\n\
            Previous key hash:\n    SHA-256: {}\n\n\
            Response key hash:\n    SHA-256: {}\n\n\
            Time taken: ~{} seconds",
            self.contribution_no,
            self.date,
            self.name,
            self.source,
            self.prev_key_hash,
            self.current_key_hash,
            self.time_taken_seconds,
        )
    }
}

#[derive(Debug, Clone)]
pub struct Rejection {
    pub source: String,
    pub size: u64,
    pub reason: String,
}

/// Tri-state result of one aggregation run, for automation to branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateOutcome {
    /// At least one contribution integrated, nothing rejected.
    Advance,
    /// At least one rejection; a human should look before the next batch.
    NeedsReview,
    /// Nothing was pending.
    NoOp,
}

#[derive(Debug)]
pub struct AggregateReport {
    pub found: usize,
    pub accepted: usize,
    pub rejections: Vec<Rejection>,
    pub tip_index: Option<u32>,
    pub base_key_created: bool,
}

impl AggregateReport {
    pub fn outcome(&self) -> AggregateOutcome {
        if !self.rejections.is_empty() {
            AggregateOutcome::NeedsReview
        } else if self.accepted > 0 {
            AggregateOutcome::Advance
        } else {
            AggregateOutcome::NoOp
        }
    }
}

impl fmt::Display for AggregateReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "pending: {} found, {} accepted, {} rejected",
            self.found,
            self.accepted,
            self.rejections.len()
        )?;
        for r in &self.rejections {
            writeln!(f, "  rejected {} ({} bytes): {}", r.source, r.size, r.reason)?;
        }
        match self.tip_index {
            Some(index) => write!(f, "chain tip is now entry {index:04}"),
            None => write!(f, "chain is empty"),
        }
    }
}

pub struct Aggregator<'a, T: ProvingToolkit> {
    config: &'a CeremonyConfig,
    toolkit: &'a T,
    chain: ChainDir,
    audit: AuditLog,
}

impl<'a, T: ProvingToolkit> Aggregator<'a, T> {
    pub fn new(config: &'a CeremonyConfig, toolkit: &'a T) -> Result<Self> {
        let chain = ChainDir::new(&config.chain_dir, &config.circuit_name);
        let audit = AuditLog::open(&config.log_dir)?;
        Ok(Aggregator {
            config,
            toolkit,
            chain,
            audit,
        })
    }

    fn verify_timeout(&self) -> Duration {
        Duration::from_secs(self.config.verify_timeout_secs)
    }

    pub fn run(&mut self) -> Result<AggregateReport> {
        let started = Instant::now();
        println!("verifying pinned parameters...");
        let r1cs_sha256 = self.config.r1cs.verify()?;
        let ptau_sha256 = self.config.ptau.verify()?;
        self.audit.append(&AuditEvent::ParamsVerified {
            r1cs_sha256,
            ptau_sha256,
        })?;

        let base_key_created = self.ensure_base_key()?;

        let pending = chain::scan_pending(&self.config.pending_dir, &self.config.circuit_name)?;
        let found = pending.len();
        let mut accepted = 0usize;
        let mut rejections = Vec::new();

        if self.chain.has_final_key() && !pending.is_empty() {
            // a finalized chain never grows; leave the artifacts in place
            // for the operator to dispose of
            for p in &pending {
                self.reject(&mut rejections, p, "chain is already finalized".to_string())?;
            }
        } else if !pending.is_empty() {
            let mut next_index = self.chain.next_index()?;
            let mut prev_sha256 = match self.chain.tip()? {
                Some(tip) => checksum::sha256_file(&tip.path)?,
                None => return Err(CeremonyError::NoBaseKey),
            };
            for p in &pending {
                match self.validate_pending(p)? {
                    Some(reason) => self.reject(&mut rejections, p, reason)?,
                    None => {
                        let item_started = Instant::now();
                        // read before integrate, which consumes the sidecars
                        let label = chain::read_label(&p.path)?
                            .unwrap_or_else(|| "anonymous".to_string());
                        let sha256 = self.chain.integrate(&p.path, next_index)?;
                        self.write_contributor_record(
                            next_index,
                            &label,
                            &p.file_name,
                            &prev_sha256,
                            &sha256,
                            item_started.elapsed().as_secs_f64(),
                        )?;
                        self.audit.append(&AuditEvent::ContributionAccepted {
                            index: next_index,
                            source: p.file_name.clone(),
                            sha256: sha256.clone(),
                            seconds: item_started.elapsed().as_secs_f64(),
                        })?;
                        println!("integrated {} as entry {:04}", p.file_name, next_index);
                        prev_sha256 = sha256;
                        next_index += 1;
                        accepted += 1;
                    }
                }
            }
        }

        // every run, not only chain-changing ones: a crash between an
        // integration and its manifest rewrite must be healed by the next run
        let manifest = manifest::regenerate(self.config, &self.chain)?;
        self.audit.append(&AuditEvent::ManifestRegenerated {
            entries: manifest.len(),
            self_sha256: manifest.self_checksum(),
        })?;

        let entries = self.chain.entries()?;
        chain::ensure_contiguous(&entries)?;

        let report = AggregateReport {
            found,
            accepted,
            rejections,
            tip_index: entries.last().map(|e| e.index),
            base_key_created,
        };
        println!(
            "aggregation finished in {:.2}s",
            started.elapsed().as_secs_f64()
        );
        Ok(report)
    }

    /// Entry 0 either exists and still verifies, or is synthesized from the
    /// pinned parameters and immediately verified before anything builds on
    /// it. Returns true when a new base key was created.
    fn ensure_base_key(&mut self) -> Result<bool> {
        let base = self.chain.entry_path(0);
        if base.is_file() {
            if let Some(recorded) = checksum::read_sidecar(&base)? {
                checksum::verify_file(&base, &recorded)
                    .map_err(|e| CeremonyError::BaseKeyCorrupted(e.to_string()))?;
            }
            return match self
                .toolkit
                .verify(&self.config.r1cs.path, &self.config.ptau.path, &base, self.verify_timeout())?
            {
                Verdict::Valid => Ok(false),
                Verdict::Invalid { detail } => Err(CeremonyError::BaseKeyCorrupted(detail)),
                Verdict::TimedOut => Err(CeremonyError::BaseKeyCorrupted(format!(
                    "verification timed out after {}s",
                    self.config.verify_timeout_secs
                ))),
            };
        }

        println!("chain is empty, synthesizing base key...");
        std::fs::create_dir_all(self.chain.root())?;
        self.toolkit
            .setup(&self.config.r1cs.path, &self.config.ptau.path, &base)?;
        match self
            .toolkit
            .verify(&self.config.r1cs.path, &self.config.ptau.path, &base, self.verify_timeout())?
        {
            Verdict::Valid => {}
            other => {
                // never leave an untrusted entry 0 behind
                let _ = std::fs::remove_file(&base);
                let detail = match other {
                    Verdict::Invalid { detail } => detail,
                    _ => "verification timed out".to_string(),
                };
                return Err(CeremonyError::BaseKeyCorrupted(format!(
                    "freshly synthesized base key failed verification: {detail}"
                )));
            }
        }
        let sha256 = checksum::write_sidecar(&base)?;
        self.audit.append(&AuditEvent::BaseKeyCreated { sha256 })?;
        println!("base key created as {}", self.chain.entry_name(0));
        Ok(true)
    }

    /// Returns a rejection reason, or None when the candidate is fit to
    /// integrate. Cheap checks run before the cryptographic one.
    fn validate_pending(&self, p: &PendingContribution) -> Result<Option<String>> {
        if p.name.is_none() {
            return Ok(Some("unrecognized contribution file name".to_string()));
        }
        if p.size < self.config.contribution_min_bytes {
            return Ok(Some(format!(
                "artifact is {} bytes, below the {} byte minimum",
                p.size, self.config.contribution_min_bytes
            )));
        }
        if let Some(recorded) = checksum::read_sidecar(&p.path)? {
            let actual = checksum::sha256_file(&p.path)?;
            if actual != recorded {
                return Ok(Some(format!(
                    "sidecar records {recorded}, artifact hashes to {actual}"
                )));
            }
        }
        let verdict = match self.toolkit.verify(
            &self.config.r1cs.path,
            &self.config.ptau.path,
            &p.path,
            self.verify_timeout(),
        ) {
            Ok(v) => v,
            // a toolkit that cannot run leaves the candidate unjudged, which
            // is still grounds to keep it out of the chain
            Err(e) => return Ok(Some(format!("verification could not run: {e}"))),
        };
        Ok(match verdict {
            Verdict::Valid => None,
            Verdict::Invalid { detail } => {
                Some(format!("cryptographic verification failed: {detail}"))
            }
            Verdict::TimedOut => Some(format!(
                "verification timed out after {}s",
                self.config.verify_timeout_secs
            )),
        })
    }

    fn reject(
        &mut self,
        rejections: &mut Vec<Rejection>,
        p: &PendingContribution,
        reason: String,
    ) -> Result<()> {
        println!("rejecting {}: {}", p.file_name, reason);
        self.audit.append(&AuditEvent::ContributionRejected {
            source: p.file_name.clone(),
            size: p.size,
            reason: reason.clone(),
        })?;
        rejections.push(Rejection {
            source: p.file_name.clone(),
            size: p.size,
            reason,
        });
        Ok(())
    }

    fn write_contributor_record(
        &self,
        index: u32,
        label: &str,
        source: &str,
        prev_sha256: &str,
        sha256: &str,
        seconds: f64,
    ) -> Result<()> {
        let record = ContributorRecord {
            contribution_no: index,
            date: Local::now().format("%Y-%m-%d").to_string(),
            name: label.to_string(),
            source: source.to_string(),
            prev_key_hash: prev_sha256.to_string(),
            current_key_hash: sha256.to_string(),
            time_taken_seconds: (seconds * 100.0).round() / 100.0,
        };
        let mut file = File::create(self.chain.contributor_record_path(index))?;
        writeln!(file, "{record}")?;
        Ok(())
    }
}
