//! CLI argument definitions using clap derive

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Stagehand - stage and run buildpack apps on a local container engine
///
/// Reproduces a platform push: builds the lifecycle, bundles buildpacks,
/// stages the app in a stack container and runs the droplet.
#[derive(Parser, Debug)]
#[command(name = "stagehand")]
#[command(author, version, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Configuration file path
    #[arg(short, long, global = true, env = "STAGEHAND_CONFIG")]
    pub config: Option<PathBuf>,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Stage an app and run it
    Deploy(DeployArgs),

    /// Remove a deployed app and its artifacts
    Delete(DeleteArgs),

    /// List the buildpack catalog
    Buildpacks(BuildpacksArgs),

    /// Show configuration
    Config(ConfigArgs),
}

/// Arguments for the deploy command
#[derive(Parser, Debug)]
pub struct DeployArgs {
    /// App name, also used as the container name
    pub name: String,

    /// App source directory
    pub path: PathBuf,

    /// Buildpack to use, by catalog name (repeatable; skips detection)
    #[arg(short, long = "buildpack")]
    pub buildpacks: Vec<String>,

    /// Environment variable for staging and runtime (KEY=VALUE)
    #[arg(short, long, value_parser = parse_env_var)]
    pub env: Vec<(String, String)>,

    /// Stage without internet access
    #[arg(long)]
    pub no_internet: bool,

    /// Stack to stage and run on (defaults to config)
    #[arg(long)]
    pub stack: Option<String>,

    /// Output format for the deployment
    #[arg(short, long, default_value = "table")]
    pub format: OutputFormat,
}

/// Arguments for the delete command
#[derive(Parser, Debug)]
pub struct DeleteArgs {
    /// App name
    pub name: String,
}

/// Arguments for the buildpacks command
#[derive(Parser, Debug)]
pub struct BuildpacksArgs {
    /// Output format
    #[arg(short, long, default_value = "table")]
    pub format: OutputFormat,
}

/// Arguments for the config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    /// Subcommand for config
    #[command(subcommand)]
    pub action: Option<ConfigAction>,
}

/// Config subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Show configuration file path
    Path,

    /// Write the default configuration
    Init {
        /// Overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },
}

/// Output format for listings
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable table
    Table,
    /// JSON output
    Json,
    /// Simple text (one per line)
    Plain,
}

/// Parse environment variable in KEY=VALUE format
fn parse_env_var(s: &str) -> Result<(String, String), String> {
    let pos = s
        .find('=')
        .ok_or_else(|| format!("invalid KEY=VALUE format: no '=' found in '{s}'"))?;
    if pos == 0 {
        return Err(format!("invalid KEY=VALUE format: empty key in '{s}'"));
    }
    Ok((s[..pos].to_string(), s[pos + 1..].to_string()))
}
