//! Buildpacks command - list the buildpack catalog

use crate::buildpacks::{Buildpack, BuildpacksRegistry};
use crate::cli::args::{BuildpacksArgs, OutputFormat};
use crate::config::Config;
use crate::error::StagehandResult;
use crate::ui::{self, TaskSpinner, UiContext};
use console::style;

/// Execute the buildpacks command
pub async fn execute(args: BuildpacksArgs, config: &Config) -> StagehandResult<()> {
    let ctx = UiContext::detect();
    let registry = BuildpacksRegistry::new(config.registry.clone(), config.registry.resolved_token());

    let mut spinner = TaskSpinner::new(&ctx);
    spinner.start("Resolving latest buildpack releases");
    let listed = tokio::task::spawn_blocking(move || registry.list()).await?;
    let buildpacks = match listed {
        Ok(buildpacks) => {
            spinner.clear();
            buildpacks
        }
        Err(e) => {
            spinner.stop_error("Resolving buildpacks failed");
            return Err(e);
        }
    };

    match args.format {
        OutputFormat::Table => print_table(&ctx, &buildpacks),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&buildpacks)?),
        OutputFormat::Plain => {
            for buildpack in &buildpacks {
                println!("{}", buildpack.name);
            }
        }
    }

    Ok(())
}

fn print_table(ctx: &UiContext, buildpacks: &[Buildpack]) {
    ui::section(ctx, "Buildpacks");
    println!("{:<28} {}", style("NAME").bold(), style("URI").bold());
    for buildpack in buildpacks {
        println!("{:<28} {}", buildpack.name, buildpack.uri);
    }
    println!();
    println!("{} buildpack(s)", buildpacks.len());
}
