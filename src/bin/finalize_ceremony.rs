use clap::Parser;
use mpc_ceremony::beacon::HttpBeacon;
use mpc_ceremony::config::CeremonyConfig;
use mpc_ceremony::finalizer::{FinalizeOutcome, Finalizer};
use mpc_ceremony::toolkit::SnarkCli;
use mpc_ceremony::{EXIT_FATAL, EXIT_NO_OP, EXIT_OK};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Config {
    /// Ceremony configuration file (JSON); built-in defaults when omitted
    #[arg(long, value_name = "CONFIG")]
    config: Option<PathBuf>,

    /// Publicly pre-committed beacon round number
    #[arg(long, value_name = "ROUND")]
    round: u64,
}

//cargo run --release --bin finalize_ceremony -- --round 4837291
#[tokio::main]
async fn main() {
    let args = Config::parse();
    let config = match CeremonyConfig::load_or_default(args.config.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: could not load configuration: {}", e);
            std::process::exit(EXIT_FATAL);
        }
    };
    println!("ceremony: {}", config.ceremony_name);

    let toolkit = SnarkCli::new(&config.toolkit_cmd);
    let beacon = match HttpBeacon::new(
        &config.beacon_url,
        Duration::from_secs(config.beacon_connect_timeout_secs),
        Duration::from_secs(config.beacon_timeout_secs),
    ) {
        Ok(b) => b,
        Err(e) => {
            eprintln!("Error: could not build beacon client: {}", e);
            std::process::exit(EXIT_FATAL);
        }
    };

    match Finalizer::new(&config, &toolkit, &beacon).run(args.round).await {
        Ok(FinalizeOutcome::Finalized {
            round,
            beacon_value,
            final_sha256,
            vkey_sha256,
        }) => {
            println!("finalized with round {} value {}", round, beacon_value);
            println!("final key sha256 {}", final_sha256);
            println!("verification key sha256 {}", vkey_sha256);
            std::process::exit(EXIT_OK);
        }
        Ok(FinalizeOutcome::AlreadyFinal) => {
            println!("chain was already finalized; nothing written");
            std::process::exit(EXIT_OK);
        }
        Ok(FinalizeOutcome::RetryLater { reason }) => {
            println!("not finalizing yet: {}", reason);
            std::process::exit(EXIT_NO_OP);
        }
        Err(e) => {
            eprintln!("Error: finalization failed: {}", e);
            std::process::exit(EXIT_FATAL);
        }
    }
}
