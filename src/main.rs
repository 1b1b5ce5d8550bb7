//! Stagehand - local buildpack staging
//!
//! CLI entry point that dispatches to subcommands.

use clap::Parser;
use console::style;
use stagehand::cli::{commands, Cli, Commands};
use stagehand::config::ConfigManager;
use stagehand::error::StagehandResult;
use std::process::ExitCode;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {}", style("Error:").red().bold(), e);
            if let Some(hint) = e.hint() {
                eprintln!("{} {}", style("Hint:").yellow(), hint);
            }
            ExitCode::FAILURE
        }
    }
}

async fn run() -> StagehandResult<()> {
    let cli = Cli::parse();

    // 0 = warn (spinners only), 1 = info, 2+ = debug
    let filter = match cli.verbose {
        0 => EnvFilter::new("stagehand=warn"),
        1 => EnvFilter::new("stagehand=info"),
        _ => EnvFilter::new("stagehand=debug"),
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .init();

    let manager = match cli.config {
        Some(path) => ConfigManager::with_path(path),
        None => ConfigManager::new(),
    };
    debug!("Loading configuration from {}", manager.path().display());
    let config = manager.load().await?;

    match cli.command {
        Commands::Deploy(args) => commands::deploy(args, &config).await,
        Commands::Delete(args) => commands::delete(args, &config).await,
        Commands::Buildpacks(args) => commands::buildpacks(args, &config).await,
        Commands::Config(args) => commands::config(args, &manager, &config).await,
    }
}
