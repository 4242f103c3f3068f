//! Closes the ceremony with a public randomness beacon.
//!
//! The round number is committed publicly before the randomness exists, so
//! nobody (including the operator running this) can grind the final
//! contribution. The run is idempotent: once the final key is on disk,
//! repeat invocations return without writing a single byte.

use std::fs::{self, File};
use std::io::BufWriter;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::audit::{AuditEvent, AuditLog};
use crate::beacon::{self, FetchOutcome, RandomnessBeacon};
use crate::chain::ChainDir;
use crate::checksum;
use crate::config::CeremonyConfig;
use crate::errors::{CeremonyError, Result};
use crate::manifest;
use crate::toolkit::{ProvingToolkit, Verdict};

/// Public record of how the final contribution was derived, written next to
/// the final key so any observer can recompute the beacon value.
#[derive(Debug, Serialize, Deserialize)]
pub struct BeaconRecord {
    pub round: u64,
    pub randomness: String,
    pub beacon_value: String,
    pub strength: u32,
    pub final_key_sha256: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinalizeOutcome {
    /// The chain was already closed; nothing was touched.
    AlreadyFinal,
    Finalized {
        round: u64,
        beacon_value: String,
        final_sha256: String,
        vkey_sha256: String,
    },
    /// The randomness is not obtainable right now; invoke again later.
    RetryLater { reason: String },
}

pub struct Finalizer<'a, T: ProvingToolkit, B: RandomnessBeacon> {
    config: &'a CeremonyConfig,
    toolkit: &'a T,
    beacon: &'a B,
}

impl<'a, T: ProvingToolkit, B: RandomnessBeacon> Finalizer<'a, T, B> {
    pub fn new(config: &'a CeremonyConfig, toolkit: &'a T, beacon: &'a B) -> Self {
        Finalizer {
            config,
            toolkit,
            beacon,
        }
    }

    pub async fn run(&self, round: u64) -> Result<FinalizeOutcome> {
        let chain = ChainDir::new(&self.config.chain_dir, &self.config.circuit_name);
        if chain.has_final_key() {
            println!(
                "{} already exists, nothing to do",
                chain.final_key_name()
            );
            return Ok(FinalizeOutcome::AlreadyFinal);
        }

        self.config.r1cs.verify()?;
        self.config.ptau.verify()?;
        let tip = chain.tip()?.ok_or(CeremonyError::NoBaseKey)?;

        println!("fetching beacon round {round}...");
        let randomness = match beacon::fetch_with_retry(self.beacon, round, self.config.beacon_retry)
            .await
        {
            Ok(FetchOutcome::Ready { randomness, .. }) => randomness,
            Ok(FetchOutcome::NotYetAvailable) => {
                return Ok(FinalizeOutcome::RetryLater {
                    reason: format!("round {round} is not published yet"),
                })
            }
            Err(CeremonyError::BeaconTransient(detail)) => {
                return Ok(FinalizeOutcome::RetryLater { reason: detail })
            }
            Err(e) => return Err(e),
        };
        let beacon_value = beacon::derive_beacon_value(&randomness);
        println!("beacon value {beacon_value}");

        let mut audit = AuditLog::open(&self.config.log_dir)?;
        let started = Instant::now();
        let final_path = chain.final_key_path();
        // the beacon output lands under a staging name first and is only
        // renamed after verification, so the idempotency gate can never
        // bless a key that verification did not clear
        let staging = chain.final_key_staging_path();
        self.toolkit.beacon(
            &tip.path,
            &beacon_value,
            self.config.beacon_strength,
            &staging,
        )?;

        let timeout = Duration::from_secs(self.config.verify_timeout_secs);
        match self
            .toolkit
            .verify(&self.config.r1cs.path, &self.config.ptau.path, &staging, timeout)
        {
            Ok(Verdict::Valid) => {}
            Ok(Verdict::Invalid { detail }) => {
                let _ = fs::remove_file(&staging);
                return Err(CeremonyError::FinalKeyInvalid(detail));
            }
            Ok(Verdict::TimedOut) => {
                let _ = fs::remove_file(&staging);
                return Err(CeremonyError::FinalKeyInvalid(format!(
                    "verification timed out after {}s",
                    self.config.verify_timeout_secs
                )));
            }
            Err(e) => {
                let _ = fs::remove_file(&staging);
                return Err(e);
            }
        }
        fs::rename(&staging, &final_path)?;
        let final_sha256 = checksum::write_sidecar(&final_path)?;
        audit.append(&AuditEvent::ChainFinalized {
            round,
            beacon_value: beacon_value.clone(),
            sha256: final_sha256.clone(),
        })?;

        let record = BeaconRecord {
            round,
            randomness: hex::encode(&randomness),
            beacon_value: beacon_value.clone(),
            strength: self.config.beacon_strength,
            final_key_sha256: final_sha256.clone(),
        };
        let writer = BufWriter::new(File::create(chain.beacon_record_path())?);
        serde_json::to_writer_pretty(writer, &record)?;

        let vkey_path = chain.verification_key_path();
        self.toolkit
            .export_verification_key(&final_path, &vkey_path)?;
        let vkey_sha256 = checksum::write_sidecar(&vkey_path)?;
        audit.append(&AuditEvent::VerificationKeyExported {
            sha256: vkey_sha256.clone(),
        })?;

        let manifest = manifest::regenerate(self.config, &chain)?;
        audit.append(&AuditEvent::ManifestRegenerated {
            entries: manifest.len(),
            self_sha256: manifest.self_checksum(),
        })?;

        println!(
            "ceremony finalized on top of entry {:04} in {:.2}s",
            tip.index,
            started.elapsed().as_secs_f64()
        );
        Ok(FinalizeOutcome::Finalized {
            round,
            beacon_value,
            final_sha256,
            vkey_sha256,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::Aggregator;
    use crate::beacon::testkit::ScriptedBeacon;
    use crate::toolkit::testkit::ScriptedToolkit;
    use std::path::Path;
    use tempfile::tempdir;

    fn test_config(root: &Path) -> CeremonyConfig {
        let mut config = CeremonyConfig::default();
        config.chain_dir = root.join("chain");
        config.pending_dir = root.join("pending");
        config.log_dir = root.join("logs");
        config.r1cs.path = root.join("params/giftcard_merkle.r1cs");
        config.ptau.path = root.join("params/powersoftau28_final.ptau");
        config.r1cs.min_bytes = 8;
        config.ptau.min_bytes = 8;
        config.contribution_min_bytes = 64;
        config.beacon_retry.delay_secs = 0;
        config
    }

    fn write_params(config: &mut CeremonyConfig) {
        fs::create_dir_all(config.r1cs.path.parent().unwrap()).unwrap();
        fs::write(&config.r1cs.path, b"r1cs parameter bytes").unwrap();
        fs::write(&config.ptau.path, b"ptau parameter bytes").unwrap();
        config.r1cs.sha256 = checksum::sha256_file(&config.r1cs.path).unwrap();
        config.ptau.sha256 = checksum::sha256_file(&config.ptau.path).unwrap();
    }

    fn build_chain(config: &CeremonyConfig) {
        let mut payload = b"contribution payload".to_vec();
        payload.resize(256, b'.');
        fs::create_dir_all(&config.pending_dir).unwrap();
        fs::write(config.pending_dir.join("giftcard_merkle_tmp_0001.key"), payload).unwrap();
        let toolkit = ScriptedToolkit::new();
        Aggregator::new(config, &toolkit).unwrap().run().unwrap();
    }

    fn dir_snapshot(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[tokio::test]
    async fn finalizes_on_top_of_the_tip() {
        let dir = tempdir().unwrap();
        let mut config = test_config(dir.path());
        write_params(&mut config);
        build_chain(&config);

        let toolkit = ScriptedToolkit::new();
        let beacon_client = ScriptedBeacon::ready(b"public randomness", 4242);
        let outcome = Finalizer::new(&config, &toolkit, &beacon_client)
            .run(4242)
            .await
            .unwrap();

        let chain = ChainDir::new(&config.chain_dir, &config.circuit_name);
        let expected_value = beacon::derive_beacon_value(b"public randomness");
        match outcome {
            FinalizeOutcome::Finalized {
                round,
                beacon_value,
                final_sha256,
                vkey_sha256,
            } => {
                assert_eq!(round, 4242);
                assert_eq!(beacon_value, expected_value);
                assert_eq!(
                    checksum::sha256_file(&chain.final_key_path()).unwrap(),
                    final_sha256
                );
                assert_eq!(
                    checksum::sha256_file(&chain.verification_key_path()).unwrap(),
                    vkey_sha256
                );
            }
            other => panic!("expected Finalized, got {other:?}"),
        }

        let record: BeaconRecord =
            serde_json::from_str(&fs::read_to_string(chain.beacon_record_path()).unwrap()).unwrap();
        assert_eq!(record.round, 4242);
        assert_eq!(record.randomness, hex::encode(b"public randomness"));
        assert_eq!(record.beacon_value, expected_value);
        assert_eq!(record.strength, config.beacon_strength);

        crate::manifest::verify_file(&chain.manifest_path()).unwrap();
        let manifest_text = fs::read_to_string(chain.manifest_path()).unwrap();
        assert!(manifest_text.contains(&chain.final_key_name()));
        assert!(manifest_text.contains(&chain.verification_key_name()));
    }

    #[tokio::test]
    async fn second_run_changes_nothing() {
        let dir = tempdir().unwrap();
        let mut config = test_config(dir.path());
        write_params(&mut config);
        build_chain(&config);

        let toolkit = ScriptedToolkit::new();
        let beacon_client = ScriptedBeacon::ready(b"public randomness", 7);
        Finalizer::new(&config, &toolkit, &beacon_client)
            .run(7)
            .await
            .unwrap();

        let chain_before = dir_snapshot(&config.chain_dir);
        let logs_before = dir_snapshot(&config.log_dir);

        let second_toolkit = ScriptedToolkit::new();
        let second_beacon = ScriptedBeacon::new(vec![]);
        let outcome = Finalizer::new(&config, &second_toolkit, &second_beacon)
            .run(7)
            .await
            .unwrap();

        assert_eq!(outcome, FinalizeOutcome::AlreadyFinal);
        assert!(second_toolkit.calls().is_empty());
        assert!(second_beacon.rounds_seen.borrow().is_empty());
        assert_eq!(dir_snapshot(&config.chain_dir), chain_before);
        assert_eq!(dir_snapshot(&config.log_dir), logs_before);
    }

    #[tokio::test]
    async fn unpublished_round_asks_to_retry() {
        let dir = tempdir().unwrap();
        let mut config = test_config(dir.path());
        write_params(&mut config);
        build_chain(&config);

        let toolkit = ScriptedToolkit::new();
        let beacon_client = ScriptedBeacon::new(vec![Ok(FetchOutcome::NotYetAvailable)]);
        let outcome = Finalizer::new(&config, &toolkit, &beacon_client)
            .run(99)
            .await
            .unwrap();

        assert!(matches!(outcome, FinalizeOutcome::RetryLater { .. }));
        let chain = ChainDir::new(&config.chain_dir, &config.circuit_name);
        assert!(!chain.has_final_key());
        // no beacon call ever reached the toolkit
        assert!(!toolkit.calls().iter().any(|c| c.starts_with("beacon")));
    }

    #[tokio::test]
    async fn exhausted_retries_ask_to_retry_not_fail() {
        let dir = tempdir().unwrap();
        let mut config = test_config(dir.path());
        config.beacon_retry.max_attempts = 2;
        write_params(&mut config);
        build_chain(&config);

        let toolkit = ScriptedToolkit::new();
        let beacon_client = ScriptedBeacon::new(vec![
            Err(CeremonyError::BeaconTransient("unreachable".to_string())),
            Err(CeremonyError::BeaconTransient("unreachable".to_string())),
        ]);
        let outcome = Finalizer::new(&config, &toolkit, &beacon_client)
            .run(5)
            .await
            .unwrap();
        assert!(matches!(outcome, FinalizeOutcome::RetryLater { .. }));
    }

    #[tokio::test]
    async fn invalid_final_key_is_fatal_and_removed() {
        let dir = tempdir().unwrap();
        let mut config = test_config(dir.path());
        write_params(&mut config);
        build_chain(&config);

        let mut toolkit = ScriptedToolkit::new();
        toolkit
            .invalid
            .insert("giftcard_merkle_final.key.part".to_string());
        let beacon_client = ScriptedBeacon::ready(b"r", 1);
        let err = Finalizer::new(&config, &toolkit, &beacon_client)
            .run(1)
            .await
            .unwrap_err();

        assert!(matches!(err, CeremonyError::FinalKeyInvalid(_)));
        let chain = ChainDir::new(&config.chain_dir, &config.circuit_name);
        assert!(!chain.has_final_key());
        assert!(!chain.final_key_staging_path().exists());
        assert!(!chain.verification_key_path().exists());
        // manifest still reflects the unfinalized chain
        crate::manifest::verify_file(&chain.manifest_path()).unwrap();
        let manifest_text = fs::read_to_string(chain.manifest_path()).unwrap();
        assert!(!manifest_text.contains(&chain.final_key_name()));
    }

    #[tokio::test]
    async fn failed_verification_leaves_no_final_key_behind() {
        let dir = tempdir().unwrap();
        let mut config = test_config(dir.path());
        write_params(&mut config);
        build_chain(&config);

        // the verifier does not even get to run against the staged output
        let mut toolkit = ScriptedToolkit::new();
        toolkit
            .failing
            .insert("giftcard_merkle_final.key.part".to_string());
        let beacon_client = ScriptedBeacon::ready(b"public randomness", 12);
        let err = Finalizer::new(&config, &toolkit, &beacon_client)
            .run(12)
            .await
            .unwrap_err();
        assert!(matches!(err, CeremonyError::Toolkit(_)));

        let chain = ChainDir::new(&config.chain_dir, &config.circuit_name);
        assert!(!chain.has_final_key());
        assert!(!chain.final_key_staging_path().exists());

        // the next invocation runs the full pipeline instead of trusting
        // leftovers from the failed one
        let retry_toolkit = ScriptedToolkit::new();
        let retry_beacon = ScriptedBeacon::ready(b"public randomness", 12);
        let outcome = Finalizer::new(&config, &retry_toolkit, &retry_beacon)
            .run(12)
            .await
            .unwrap();
        assert!(matches!(outcome, FinalizeOutcome::Finalized { .. }));
        assert!(chain.has_final_key());
        assert!(chain.verification_key_path().is_file());
        assert!(retry_toolkit
            .calls()
            .contains(&"verify:giftcard_merkle_final.key.part".to_string()));
    }

    #[tokio::test]
    async fn empty_chain_cannot_finalize() {
        let dir = tempdir().unwrap();
        let mut config = test_config(dir.path());
        write_params(&mut config);

        let toolkit = ScriptedToolkit::new();
        let beacon_client = ScriptedBeacon::ready(b"r", 1);
        let err = Finalizer::new(&config, &toolkit, &beacon_client)
            .run(1)
            .await
            .unwrap_err();
        assert!(matches!(err, CeremonyError::NoBaseKey));
    }

    #[tokio::test]
    async fn tampered_params_stop_finalization_before_the_fetch() {
        let dir = tempdir().unwrap();
        let mut config = test_config(dir.path());
        write_params(&mut config);
        build_chain(&config);
        fs::write(&config.ptau.path, b"swapped transcript").unwrap();

        let toolkit = ScriptedToolkit::new();
        let beacon_client = ScriptedBeacon::ready(b"r", 1);
        let err = Finalizer::new(&config, &toolkit, &beacon_client)
            .run(1)
            .await
            .unwrap_err();
        assert!(matches!(err, CeremonyError::ParamsIntegrity(_)));
        assert!(beacon_client.rounds_seen.borrow().is_empty());
    }
}
