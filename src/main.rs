//! DSS qualifier - conformance test engine for UTM Discovery and Synchronization Services
//!
//! Runs test suites of scenarios against one or more DSS instances and
//! reports which requirements each participant passed or failed.

use std::path::PathBuf;

use clap::Parser;
use commands::Commands;
use dss_qualifier::common::{config::Config, logging};
use dss_qualifier::{cli, commands};

#[derive(Parser)]
#[command(name = "dss-qualifier", about = "UTM DSS conformance test engine")]
#[command(version, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (default: the user config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Show passed checks and debug logs
    #[arg(long, short, global = true)]
    verbose: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match Config::load_or_default(cli.config.as_ref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    let log_guard = logging::init(cli.verbose, config.logging.file);
    if let Some(path) = log_guard.log_file() {
        tracing::debug!(path = %path.display(), "Mirroring logs to file");
    }

    if let Err(e) = cli::dispatch(cli.command, &config, cli.verbose).await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
