use clap::Parser;
use mpc_ceremony::config::CeremonyConfig;
use mpc_ceremony::submitter::Submitter;
use mpc_ceremony::toolkit::SnarkCli;
use mpc_ceremony::{EXIT_FATAL, EXIT_OK};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Config {
    /// Ceremony configuration file (JSON); built-in defaults when omitted
    #[arg(long, value_name = "CONFIG")]
    config: Option<PathBuf>,

    /// Attribution label baked into the contribution
    #[arg(long, value_name = "NAME", default_value = "anonymous")]
    name: String,
}

//cargo run --release --bin contribute -- --name "alice"
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
    match Submitter::new(&config, &toolkit).run(&args.name) {
        Ok(outcome) => {
            println!(
                "submitted {} (sha256 {}) on top of entry {:04}",
                outcome.pending_path.display(),
                outcome.sha256,
                outcome.predecessor_index
            );
            std::process::exit(EXIT_OK);
        }
        Err(e) => {
            eprintln!("Error: contribution failed: {}", e);
            std::process::exit(EXIT_FATAL);
        }
    }
}
