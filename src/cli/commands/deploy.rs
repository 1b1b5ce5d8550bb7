//! Deploy command - stage an app and run it

use crate::cli::args::{DeployArgs, OutputFormat};
use crate::config::Config;
use crate::engine::CliEngine;
use crate::error::StagehandResult;
use crate::pipeline::{Deployment, Logs};
use crate::platform::{DeployRequest, EnginePlatform, Platform};
use crate::ui::{self, TaskSpinner, UiContext};
use console::style;
use std::sync::Arc;
use tracing::debug;

/// Execute the deploy command
pub async fn execute(args: DeployArgs, config: &Config) -> StagehandResult<()> {
    let ctx = UiContext::detect();
    let engine = Arc::new(CliEngine::new(&config.engine.binary));
    let platform = EnginePlatform::new(config, engine);
    debug!("Deploying with the {} engine", platform.name());

    let mut request = DeployRequest::new(&args.name, &args.path)
        .with_buildpacks(args.buildpacks)
        .with_env(args.env);
    if let Some(stack) = args.stack {
        request = request.with_stack(stack);
    }
    if args.no_internet {
        request = request.without_internet_access();
    }

    let logs = Logs::new();
    let mut spinner = TaskSpinner::new(&ctx);
    spinner.start(&format!("Deploying {}", style(&args.name).cyan()));

    match platform.deploy(&request, &logs).await {
        Ok(deployment) => {
            spinner.stop(&format!("Deployed {}", style(&args.name).cyan()));
            print_deployment(&ctx, &deployment, args.format)
        }
        Err(e) => {
            spinner.stop_error(&format!("Deploying {} failed", args.name));
            if !logs.is_empty() {
                ui::section(&ctx, "Staging logs");
                eprint!("{}", logs);
            }
            Err(e)
        }
    }
}

fn print_deployment(
    ctx: &UiContext,
    deployment: &Deployment,
    format: OutputFormat,
) -> StagehandResult<()> {
    match format {
        OutputFormat::Table => {
            ui::key_value(ctx, "external", &deployment.external_url);
            ui::key_value(ctx, "internal", &deployment.internal_url);
        }
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(deployment)?),
        OutputFormat::Plain => {
            println!("{}", deployment.external_url);
            println!("{}", deployment.internal_url);
        }
    }
    Ok(())
}
