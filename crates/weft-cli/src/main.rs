//! Weft CLI entry point.
//!
//! Binary name: `weft`
//!
//! Parses CLI arguments, sets up tracing, loads configuration, then
//! dispatches to the command handler. The process exits non-zero when a run
//! fails or a definition is invalid.

mod cli;
mod state;

use std::process::ExitCode;

use clap::Parser;
use clap_complete::generate;
use weft_observe::tracing_setup::{filter_for_verbosity, init_tracing, shutdown_tracing, TracingOptions};

use cli::{Cli, Commands};
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    // Shell completions don't need tracing or config
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = <Cli as clap::CommandFactory>::command();
        generate(*shell, &mut cmd, "weft", &mut std::io::stdout());
        return Ok(ExitCode::SUCCESS);
    }

    init_tracing(&TracingOptions {
        default_filter: filter_for_verbosity(cli.verbose, cli.quiet).to_string(),
        json_logs: cli.json,
        otel: cli.otel,
    })
    .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {e}"))?;

    let result = dispatch(cli).await;
    shutdown_tracing();
    result
}

async fn dispatch(cli: Cli) -> anyhow::Result<ExitCode> {
    let state = AppState::init(cli.data_dir, cli.config).await?;

    match cli.command {
        Commands::Run(args) => cli::run::run_workflow(&state, args, cli.json, cli.quiet).await,
        Commands::Validate { file } => cli::validate::validate_workflow(&state, &file, cli.json).await,
        Commands::Steps => {
            cli::steps::list_steps(&state, cli.json).await?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::List => {
            cli::list::list_workflows(&state, cli.json).await?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Completions { .. } => Ok(ExitCode::SUCCESS),
    }
}
