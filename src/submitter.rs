use std::fs;
use std::path::PathBuf;
use std::time::Instant;

use rand::rngs::OsRng;
use rand::RngCore;

use crate::chain::{self, ChainDir, TMP_MARKER};
use crate::checksum;
use crate::config::CeremonyConfig;
use crate::errors::{CeremonyError, Result};
use crate::toolkit::ProvingToolkit;

/// What a finished submission looks like to the caller.
#[derive(Debug)]
pub struct SubmitOutcome {
    pub pending_path: PathBuf,
    pub sha256: String,
    pub predecessor_index: u32,
}

/// The contributor role: extend the current chain tip with fresh local
/// entropy and drop the result into the pending directory for the
/// aggregator to pick up.
pub struct Submitter<'a, T: ProvingToolkit> {
    config: &'a CeremonyConfig,
    toolkit: &'a T,
}

impl<'a, T: ProvingToolkit> Submitter<'a, T> {
    pub fn new(config: &'a CeremonyConfig, toolkit: &'a T) -> Self {
        Submitter { config, toolkit }
    }

    pub fn run(&self, label: &str) -> Result<SubmitOutcome> {
        let chain = ChainDir::new(&self.config.chain_dir, &self.config.circuit_name);
        if chain.has_final_key() {
            return Err(CeremonyError::ChainFinalized(chain.final_key_path()));
        }
        let tip = chain.tip()?.ok_or(CeremonyError::NoBaseKey)?;
        println!(
            "contributing on top of {} as \"{}\"",
            tip.file_name(),
            label
        );

        // entropy stays in memory only, it is never logged or written out
        let mut entropy = [0u8; 32];
        OsRng.fill_bytes(&mut entropy);
        let entropy_hex = hex::encode(entropy);

        fs::create_dir_all(&self.config.pending_dir)?;
        let out = self.fresh_pending_path()?;

        let started = Instant::now();
        self.toolkit
            .contribute(&tip.path, &entropy_hex, label, &out)?;
        let sha256 = checksum::write_sidecar(&out)?;
        // the label rides along as a sidecar so the aggregator can name the
        // contributor in the per-entry record
        chain::write_label(&out, label)?;
        println!(
            "contribution written to {} in {:.2}s",
            out.display(),
            started.elapsed().as_secs_f64()
        );

        Ok(SubmitOutcome {
            pending_path: out,
            sha256,
            predecessor_index: tip.index,
        })
    }

    /// Placeholder name with a random suffix; the real index is assigned by
    /// the aggregator at integration time.
    fn fresh_pending_path(&self) -> Result<PathBuf> {
        for _ in 0..16 {
            let suffix = OsRng.next_u32() % 100_000;
            let name = format!(
                "{}{}{:05}{}",
                self.config.circuit_name,
                TMP_MARKER,
                suffix,
                crate::chain::KEY_EXT
            );
            let candidate = self.config.pending_dir.join(name);
            if !candidate.exists() {
                return Ok(candidate);
            }
        }
        Err(CeremonyError::Config(
            "could not find a free pending file name".to_string(),
        ))
    }
}
