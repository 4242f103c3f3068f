use clap::Parser;
use mpc_ceremony::aggregator::{AggregateOutcome, Aggregator};
use mpc_ceremony::config::CeremonyConfig;
use mpc_ceremony::toolkit::SnarkCli;
use mpc_ceremony::{EXIT_FATAL, EXIT_NEEDS_REVIEW, EXIT_NO_OP, EXIT_OK};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Config {
    /// Ceremony configuration file (JSON); built-in defaults when omitted
    #[arg(long, value_name = "CONFIG")]
    config: Option<PathBuf>,
}

//cargo run --release --bin integrate_pending -- --config ceremony.json
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
    let mut aggregator = match Aggregator::new(&config, &toolkit) {
        Ok(a) => a,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(EXIT_FATAL);
        }
    };
    match aggregator.run() {
        Ok(report) => {
            println!("{}", report);
            let code = match report.outcome() {
                AggregateOutcome::Advance => EXIT_OK,
                AggregateOutcome::NoOp => EXIT_NO_OP,
                AggregateOutcome::NeedsReview => EXIT_NEEDS_REVIEW,
            };
            std::process::exit(code);
        }
        Err(e) => {
            eprintln!("Error: aggregation halted: {}", e);
            std::process::exit(EXIT_FATAL);
        }
    }
}
