//! CLI command definitions
//!
//! Defines the clap commands for the qualifier CLI.

use clap::Subcommand;
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum Commands {
    /// Run a test suite against the DSS instances it declares
    Run {
        /// Path to the suite definition (YAML)
        suite: PathBuf,

        /// Where to write the JSON report (default: the report directory)
        #[arg(long, short)]
        report: Option<PathBuf>,
    },

    /// Check that a suite parses and all its scenarios can be built
    Validate {
        /// Path to the suite definition (YAML)
        suite: PathBuf,
    },

    /// List available scenario types
    #[command(alias = "ls")]
    List,

    /// Print a summary of a previously written report
    Summarize {
        /// Path to a JSON report written by 'run'
        report: PathBuf,
    },
}
