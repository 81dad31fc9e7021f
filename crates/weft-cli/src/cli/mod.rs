//! CLI command definitions for the `weft` binary.
//!
//! Uses clap derive macros for argument parsing. Every command accepts the
//! global `--json` flag and prints machine-readable output when it is set.

pub mod list;
pub mod run;
pub mod steps;
pub mod validate;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;

/// Run declarative workflow graphs.
#[derive(Parser)]
#[command(name = "weft", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for verbose, -vv for debug/trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Export spans through OpenTelemetry (stdout exporter).
    #[arg(long, global = true)]
    pub otel: bool,

    /// Data directory holding config.toml, workflows/ and runs.jsonl.
    #[arg(long, env = "WEFT_DATA_DIR", global = true)]
    pub data_dir: Option<PathBuf>,

    /// Explicit config file; errors in it are fatal.
    #[arg(long, env = "WEFT_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Execute a workflow and print its run record.
    Run(RunArgs),

    /// Validate a workflow definition without running it.
    Validate {
        /// Path to a JSON or YAML definition.
        file: PathBuf,
    },

    /// List registered step types.
    Steps,

    /// List workflows in the workflows directory.
    #[command(alias = "ls")]
    List,

    /// Generate shell completions.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}

#[derive(Args, Debug, Clone)]
#[command(group(
    clap::ArgGroup::new("definition").required(true).args(["file", "id"])
))]
pub struct RunArgs {
    /// Path to a JSON or YAML definition.
    pub file: Option<PathBuf>,

    /// Workflow id to load from the workflows directory.
    #[arg(long)]
    pub id: Option<String>,

    /// Global input as inline JSON.
    #[arg(long, conflicts_with = "input_file")]
    pub input: Option<String>,

    /// Global input read from a JSON file.
    #[arg(long)]
    pub input_file: Option<PathBuf>,

    /// Maximum nodes executing at once (overrides config).
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Append the run record to this JSON-lines file instead of the default log.
    #[arg(long, conflicts_with = "no_record")]
    pub record: Option<PathBuf>,

    /// Do not append the run record anywhere.
    #[arg(long)]
    pub no_record: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_requires_file_or_id() {
        assert!(Cli::try_parse_from(["weft", "run"]).is_err());
        assert!(Cli::try_parse_from(["weft", "run", "wf.json", "--id", "x"]).is_err());

        let cli = Cli::try_parse_from(["weft", "run", "--id", "orders", "--json"]).unwrap();
        assert!(cli.json);
        match cli.command {
            Commands::Run(args) => assert_eq!(args.id.as_deref(), Some("orders")),
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn input_flags_conflict() {
        let result = Cli::try_parse_from([
            "weft", "run", "wf.json", "--input", "{}", "--input-file", "in.json",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn global_flags_parse_anywhere() {
        let cli = Cli::try_parse_from(["weft", "-vv", "validate", "wf.yaml", "--quiet"]).unwrap();
        assert_eq!(cli.verbose, 2);
        assert!(cli.quiet);
        assert!(matches!(cli.command, Commands::Validate { .. }));
    }
}
