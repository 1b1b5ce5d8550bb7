//! Teardown: remove everything a deployment left behind

use super::Backend;
use crate::error::{StagehandError, StagehandResult};
use crate::network::INTERNAL_NETWORK;
use std::path::Path;
use tracing::{debug, info};

#[derive(Clone)]
pub struct Teardown {
    backend: Backend,
}

impl Teardown {
    pub fn new(backend: Backend) -> Self {
        Self { backend }
    }

    /// Remove the app container, the internal network if unused, and the
    /// app's workspace files. Anything already gone is skipped.
    pub async fn run(&self, name: &str) -> StagehandResult<()> {
        match self.backend.engine.remove_container(name, true).await {
            Ok(()) => debug!("Removed container {}", name),
            Err(e) if e.is_benign() => debug!("No container named {}", name),
            Err(e) => return Err(e),
        }

        self.backend.networks.delete(INTERNAL_NETWORK).await?;

        let workspace = &self.backend.workspace;
        for file in workspace.app_files(name) {
            remove(&file, false).await?;
        }
        remove(&workspace.buildpacks_bundle(name), true).await?;

        info!("Tore down {}", name);
        Ok(())
    }
}

async fn remove(path: &Path, dir: bool) -> StagehandResult<()> {
    let result = if dir {
        tokio::fs::remove_dir_all(path).await
    } else {
        tokio::fs::remove_file(path).await
    };
    match result.map_err(|e| StagehandError::io(format!("removing {}", path.display()), e)) {
        Err(e) if e.is_benign() => Ok(()),
        other => other,
    }
}
