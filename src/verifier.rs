//! Independent auditor role. Trusts nothing on disk: every digest is
//! recomputed, every key is re-verified cryptographically. The six passes
//! run regardless of earlier failures so one report shows the full picture.

use std::fmt;
use std::time::Duration;

use crate::chain::{self, ChainDir};
use crate::checksum;
use crate::config::CeremonyConfig;
use crate::errors::Result;
use crate::manifest;
use crate::toolkit::{ProvingToolkit, Verdict};

pub const PASS_TOOLKIT: &str = "toolkit availability";
pub const PASS_PARAMS: &str = "pinned parameters";
pub const PASS_CONSTRAINT_SYSTEM: &str = "constraint system integrity";
pub const PASS_ENTRIES: &str = "chain entry re-verification";
pub const PASS_MANIFEST: &str = "manifest self-consistency";
pub const PASS_CONTRIBUTIONS: &str = "contribution count";

#[derive(Debug)]
pub struct PassReport {
    pub name: &'static str,
    pub passed: bool,
    pub detail: String,
}

#[derive(Debug, Default)]
pub struct VerifyReport {
    pub passes: Vec<PassReport>,
    pub warnings: Vec<String>,
    pub entries_checked: usize,
}

impl VerifyReport {
    fn record(&mut self, name: &'static str, result: std::result::Result<String, String>) {
        match result {
            Ok(detail) => self.passes.push(PassReport {
                name,
                passed: true,
                detail,
            }),
            Err(detail) => self.passes.push(PassReport {
                name,
                passed: false,
                detail,
            }),
        }
    }

    pub fn failed(&self) -> usize {
        self.passes.iter().filter(|p| !p.passed).count()
    }

    pub fn ok(&self) -> bool {
        self.failed() == 0
    }

    /// True when the pinned parameters themselves cannot be trusted. This is
    /// the one condition that must out-rank every other failure class.
    pub fn integrity_failure(&self) -> bool {
        self.passes
            .iter()
            .any(|p| !p.passed && (p.name == PASS_PARAMS || p.name == PASS_CONSTRAINT_SYSTEM))
    }
}

impl fmt::Display for VerifyReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, pass) in self.passes.iter().enumerate() {
            writeln!(
                f,
                "pass {}/{} {:<32} {}  {}",
                i + 1,
                self.passes.len(),
                pass.name,
                if pass.passed { "ok" } else { "FAILED" },
                pass.detail
            )?;
        }
        for warning in &self.warnings {
            writeln!(f, "warning: {warning}")?;
        }
        if self.ok() {
            write!(f, "all {} passes clean", self.passes.len())
        } else {
            write!(f, "{} of {} passes failed", self.failed(), self.passes.len())
        }
    }
}

pub struct CeremonyVerifier<'a, T: ProvingToolkit> {
    config: &'a CeremonyConfig,
    toolkit: &'a T,
    chain: ChainDir,
}

impl<'a, T: ProvingToolkit> CeremonyVerifier<'a, T> {
    pub fn new(config: &'a CeremonyConfig, toolkit: &'a T) -> Self {
        let chain = ChainDir::new(&config.chain_dir, &config.circuit_name);
        CeremonyVerifier {
            config,
            toolkit,
            chain,
        }
    }

    pub fn run(&self) -> Result<VerifyReport> {
        let mut report = VerifyReport::default();
        let mut entries_checked = 0usize;
        let mut warnings = Vec::new();

        report.record(PASS_TOOLKIT, self.check_toolkit());
        report.record(PASS_PARAMS, self.check_params());
        report.record(PASS_CONSTRAINT_SYSTEM, self.check_constraint_system());
        let entries = self.check_entries(&mut entries_checked, &mut warnings);
        report.record(PASS_ENTRIES, entries);
        report.record(PASS_MANIFEST, self.check_manifest());
        let contributions = self.check_contributions(&mut warnings);
        report.record(PASS_CONTRIBUTIONS, contributions);

        report.entries_checked = entries_checked;
        report.warnings = warnings;
        Ok(report)
    }

    fn check_toolkit(&self) -> std::result::Result<String, String> {
        match self.toolkit.preflight() {
            Ok(()) => Ok("toolkit answers".to_string()),
            Err(e) => Err(e.to_string()),
        }
    }

    fn check_params(&self) -> std::result::Result<String, String> {
        let r1cs = self.config.r1cs.verify().map_err(|e| e.to_string())?;
        let ptau = self.config.ptau.verify().map_err(|e| e.to_string())?;
        Ok(format!("r1cs {}..., ptau {}...", &r1cs[..12], &ptau[..12]))
    }

    /// Re-stats and re-hashes the constraint system on its own. Deliberately
    /// overlaps the previous pass: the file that defines the circuit deserves
    /// an independently reported verdict.
    fn check_constraint_system(&self) -> std::result::Result<String, String> {
        let digest = self.config.r1cs.verify().map_err(|e| e.to_string())?;
        Ok(format!("{} intact ({}...)", self.config.r1cs.file_name(), &digest[..12]))
    }

    fn check_entries(
        &self,
        entries_checked: &mut usize,
        warnings: &mut Vec<String>,
    ) -> std::result::Result<String, String> {
        let entries = self.chain.entries().map_err(|e| e.to_string())?;
        let mut failures = Vec::new();

        if let Err(e) = chain::ensure_contiguous(&entries) {
            failures.push(e.to_string());
        }

        let timeout = Duration::from_secs(self.config.verify_timeout_secs);
        let mut keys: Vec<(String, std::path::PathBuf)> = entries
            .iter()
            .map(|e| (e.file_name(), e.path.clone()))
            .collect();
        if self.chain.has_final_key() {
            keys.push((self.chain.final_key_name(), self.chain.final_key_path()));
        }

        for (name, path) in &keys {
            match checksum::read_sidecar(path) {
                Ok(Some(recorded)) => {
                    if let Err(e) = checksum::verify_file(path, &recorded) {
                        failures.push(format!("{name}: {e}"));
                        continue;
                    }
                }
                Ok(None) => warnings.push(format!("{name} has no checksum sidecar")),
                Err(e) => {
                    failures.push(format!("{name}: sidecar unreadable: {e}"));
                    continue;
                }
            }
            match self
                .toolkit
                .verify(&self.config.r1cs.path, &self.config.ptau.path, path, timeout)
            {
                Ok(Verdict::Valid) => {}
                Ok(Verdict::Invalid { detail }) => failures.push(format!("{name}: {detail}")),
                Ok(Verdict::TimedOut) => failures.push(format!("{name}: verification timed out")),
                Err(e) => failures.push(format!("{name}: {e}")),
            }
            *entries_checked += 1;
        }

        if failures.is_empty() {
            Ok(format!("{} keys re-verified", keys.len()))
        } else {
            Err(failures.join("; "))
        }
    }

    fn check_manifest(&self) -> std::result::Result<String, String> {
        let path = self.chain.manifest_path();
        if !path.is_file() {
            return Err(format!("{} is missing", path.display()));
        }
        match manifest::verify_file(&path) {
            Ok(entries) => Ok(format!("self-checksum covers {entries} lines")),
            Err(e) => Err(e.to_string()),
        }
    }

    fn check_contributions(
        &self,
        warnings: &mut Vec<String>,
    ) -> std::result::Result<String, String> {
        let entries = self.chain.entries().map_err(|e| e.to_string())?;
        let beyond_base = entries.iter().filter(|e| e.index > 0).count();
        if beyond_base == 0 {
            // base key alone means the ceremony still rests on one machine
            warnings.push(
                "no contributions beyond the base key; the chain has no multi-party resilience yet"
                    .to_string(),
            );
        }
        Ok(format!("{beyond_base} contributions beyond the base key"))
    }
}
