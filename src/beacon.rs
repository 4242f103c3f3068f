//! Randomness beacon client.
//!
//! The finalizer commits to a future beacon round before any randomness is
//! published, then fetches that round here. A round the network has not
//! reached yet is a normal condition, not an error, and is reported as
//! [`FetchOutcome::NotYetAvailable`] so callers can come back later.

use std::time::Duration;

use serde::Deserialize;
use sha2::{Digest, Sha256};

use crate::config::RetryPolicy;
use crate::errors::{CeremonyError, Result};

/// JSON body of a published drand-style round.
#[derive(Debug, Clone, Deserialize)]
pub struct BeaconRoundBody {
    pub round: u64,
    pub randomness: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    Ready { round: u64, randomness: Vec<u8> },
    NotYetAvailable,
}

#[allow(async_fn_in_trait)]
pub trait RandomnessBeacon {
    async fn fetch_round(&self, round: u64) -> Result<FetchOutcome>;
}

/// HTTP client for a drand-style `{base}/public/{round}` endpoint.
pub struct HttpBeacon {
    client: reqwest::Client,
    base_url: String,
}

impl HttpBeacon {
    pub fn new(base_url: &str, connect_timeout: Duration, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(timeout)
            .build()?;
        Ok(HttpBeacon {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn round_url(&self, round: u64) -> String {
        format!("{}/public/{}", self.base_url, round)
    }
}

impl RandomnessBeacon for HttpBeacon {
    async fn fetch_round(&self, round: u64) -> Result<FetchOutcome> {
        let response = self
            .client
            .get(self.round_url(round))
            .send()
            .await
            .map_err(|e| CeremonyError::BeaconTransient(e.to_string()))?;
        // the reference network answers 404 for rounds it has not reached
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(FetchOutcome::NotYetAvailable);
        }
        if !response.status().is_success() {
            return Err(CeremonyError::BeaconTransient(format!(
                "beacon answered http {}",
                response.status()
            )));
        }
        let body: BeaconRoundBody = response
            .json()
            .await
            .map_err(|e| CeremonyError::BeaconTransient(format!("malformed round body: {e}")))?;
        if body.round != round {
            return Err(CeremonyError::BeaconTransient(format!(
                "asked for round {round}, beacon answered round {}",
                body.round
            )));
        }
        let randomness = hex::decode(&body.randomness)
            .map_err(|e| CeremonyError::BeaconTransient(format!("randomness is not hex: {e}")))?;
        if randomness.is_empty() {
            return Err(CeremonyError::BeaconTransient(
                "beacon answered empty randomness".to_string(),
            ));
        }
        Ok(FetchOutcome::Ready { round, randomness })
    }
}

/// Retries transient fetch failures on a fixed schedule. A round reported as
/// not yet available is returned immediately: waiting a few seconds will not
/// publish a future round.
pub async fn fetch_with_retry<B: RandomnessBeacon>(
    beacon: &B,
    round: u64,
    policy: RetryPolicy,
) -> Result<FetchOutcome> {
    let mut last_detail = String::new();
    for attempt in 1..=policy.max_attempts {
        match beacon.fetch_round(round).await {
            Ok(outcome) => return Ok(outcome),
            Err(CeremonyError::BeaconTransient(detail)) => {
                println!(
                    "beacon fetch attempt {}/{} failed: {}",
                    attempt, policy.max_attempts, detail
                );
                last_detail = detail;
                if attempt < policy.max_attempts {
                    tokio::time::sleep(Duration::from_secs(policy.delay_secs)).await;
                }
            }
            Err(e) => return Err(e),
        }
    }
    Err(CeremonyError::BeaconTransient(format!(
        "giving up after {} attempts: {}",
        policy.max_attempts, last_detail
    )))
}

/// Deterministic beacon value: SHA-256 over the raw randomness bytes, hex
/// encoded. Any observer can recompute it from the published round alone.
pub fn derive_beacon_value(randomness: &[u8]) -> String {
    hex::encode(Sha256::digest(randomness))
}


#[cfg(test)]
mod tests {
    use super::testkit::ScriptedBeacon;
    use super::*;

    #[test]
    fn beacon_value_matches_known_vector() {
        // sha256("abc")
        assert_eq!(
            derive_beacon_value(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn round_url_has_no_double_slash() {
        let beacon = HttpBeacon::new(
            "https://api.drand.sh/",
            Duration::from_secs(1),
            Duration::from_secs(2),
        )
        .unwrap();
        assert_eq!(beacon.round_url(42), "https://api.drand.sh/public/42");
    }

    #[tokio::test]
    async fn retry_recovers_from_transient_failures() {
        let beacon = ScriptedBeacon::new(vec![
            Err(CeremonyError::BeaconTransient("reset".to_string())),
            Err(CeremonyError::BeaconTransient("reset".to_string())),
            Ok(FetchOutcome::Ready {
                round: 7,
                randomness: vec![1, 2, 3],
            }),
        ]);
        let policy = RetryPolicy {
            max_attempts: 3,
            delay_secs: 0,
        };
        let outcome = fetch_with_retry(&beacon, 7, policy).await.unwrap();
        assert_eq!(
            outcome,
            FetchOutcome::Ready {
                round: 7,
                randomness: vec![1, 2, 3]
            }
        );
        assert_eq!(beacon.rounds_seen.borrow().len(), 3);
    }

    #[tokio::test]
    async fn retry_gives_up_after_budget() {
        let beacon = ScriptedBeacon::new(vec![
            Err(CeremonyError::BeaconTransient("down".to_string())),
            Err(CeremonyError::BeaconTransient("down".to_string())),
        ]);
        let policy = RetryPolicy {
            max_attempts: 2,
            delay_secs: 0,
        };
        let err = fetch_with_retry(&beacon, 9, policy).await.unwrap_err();
        assert!(err.is_retry_later());
    }

    #[tokio::test]
    async fn not_yet_available_short_circuits_the_retry_loop() {
        let beacon = ScriptedBeacon::new(vec![Ok(FetchOutcome::NotYetAvailable)]);
        let policy = RetryPolicy {
            max_attempts: 5,
            delay_secs: 0,
        };
        let outcome = fetch_with_retry(&beacon, 11, policy).await.unwrap();
        assert_eq!(outcome, FetchOutcome::NotYetAvailable);
        assert_eq!(beacon.rounds_seen.borrow().len(), 1);
    }
}
