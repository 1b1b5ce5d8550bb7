//! Delete command - remove a deployed app

use crate::cli::args::DeleteArgs;
use crate::config::Config;
use crate::engine::CliEngine;
use crate::error::StagehandResult;
use crate::platform::{EnginePlatform, Platform};
use crate::ui::{self, UiContext};
use console::style;
use std::sync::Arc;

/// Execute the delete command
pub async fn execute(args: DeleteArgs, config: &Config) -> StagehandResult<()> {
    let ctx = UiContext::detect();
    let engine = Arc::new(CliEngine::new(&config.engine.binary));
    let platform = EnginePlatform::new(config, engine);

    platform.delete(&args.name).await?;

    ui::step_ok(&ctx, &format!("Deleted {}", style(&args.name).cyan()));
    Ok(())
}
