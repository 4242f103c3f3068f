use clap::Parser;
use mpc_ceremony::config::CeremonyConfig;
use mpc_ceremony::toolkit::SnarkCli;
use mpc_ceremony::verifier::CeremonyVerifier;
use mpc_ceremony::{EXIT_FATAL, EXIT_NEEDS_REVIEW, EXIT_OK};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Config {
    /// Ceremony configuration file (JSON); built-in defaults when omitted
    #[arg(long, value_name = "CONFIG")]
    config: Option<PathBuf>,
}

//cargo run --release --bin verify_ceremony -- --config ceremony.json
fn main() {
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
    match CeremonyVerifier::new(&config, &toolkit).run() {
        Ok(report) => {
            println!("{}", report);
            if report.ok() {
                std::process::exit(EXIT_OK);
            }
            // tampered parameters out-rank every other failure
            if report.integrity_failure() {
                std::process::exit(EXIT_FATAL);
            }
            std::process::exit(EXIT_NEEDS_REVIEW);
        }
        Err(e) => {
            eprintln!("Error: verification could not run: {}", e);
            std::process::exit(EXIT_FATAL);
        }
    }
}
