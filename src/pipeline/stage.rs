//! Stage: run the builder and collect its outputs

use super::setup::{OUTPUT_CACHE, OUTPUT_DROPLET, OUTPUT_METADATA};
use super::{Backend, Logs};
use crate::archive;
use crate::error::{StagehandError, StagehandResult};
use serde::Deserialize;
use std::path::Path;
use tracing::{debug, info, warn};

/// Contents of the builder's result metadata
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StagingResult {
    #[serde(default)]
    pub processes: Vec<Process>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Process {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub command: String,
}

impl StagingResult {
    /// Command of the `web` process, if the buildpack declared one
    pub fn web_command(&self) -> Option<&str> {
        self.processes
            .iter()
            .find(|p| p.kind == "web")
            .map(|p| p.command.as_str())
    }
}

#[derive(Clone)]
pub struct Stage {
    backend: Backend,
}

impl Stage {
    pub fn new(backend: Backend) -> Self {
        Self { backend }
    }

    /// Run the staging container to completion and return the start command.
    ///
    /// The container is removed on every outcome; the first error wins.
    pub async fn run(&self, logs: &Logs, container_id: &str, name: &str) -> StagehandResult<String> {
        let staged = self.stage(logs, container_id, name).await;

        let removed = self.backend.engine.remove_container(container_id, true).await;
        let result = match (staged, removed) {
            (Ok(result), Ok(())) => result,
            (Ok(_), Err(e)) => return Err(e),
            (Err(e), removed) => {
                if let Err(cleanup) = removed {
                    warn!("Failed to remove staging container {}: {}", container_id, cleanup);
                }
                return Err(e);
            }
        };

        match result.web_command() {
            Some(command) => {
                info!("Staged {} with start command: {}", name, command);
                Ok(command.to_string())
            }
            None => {
                warn!("Staging result for {} declares no web process", name);
                Ok(String::new())
            }
        }
    }

    async fn stage(&self, logs: &Logs, container_id: &str, name: &str) -> StagehandResult<StagingResult> {
        let engine = &self.backend.engine;

        let status = match engine.start_container(container_id).await {
            Ok(()) => engine.wait_container(container_id).await,
            Err(e) => Err(e),
        };

        match engine.container_logs(container_id).await {
            Ok(output) => {
                logs.write(&output.stdout);
                logs.write(&output.stderr);
            }
            Err(e) => warn!("Failed to read logs of staging container {}: {}", container_id, e),
        }

        let code = status?;
        if code != 0 {
            return Err(StagehandError::StagingFailed { code });
        }
        self.collect(container_id, name).await
    }

    async fn collect(&self, container_id: &str, name: &str) -> StagehandResult<StagingResult> {
        let engine = &self.backend.engine;
        let workspace = &self.backend.workspace;

        let stream = engine.copy_from_container(container_id, OUTPUT_DROPLET).await?;
        let droplet = archive::extract_entry(&stream, "droplet", OUTPUT_DROPLET)?;
        write_file(&workspace.droplet(name), &droplet).await?;

        let stream = engine
            .copy_from_container(container_id, OUTPUT_METADATA)
            .await?;
        let metadata = archive::extract_entry(&stream, "result.json", OUTPUT_METADATA)?;
        let result: StagingResult = serde_json::from_slice(&metadata)?;

        match engine.copy_from_container(container_id, OUTPUT_CACHE).await {
            Ok(stream) => {
                let cache = archive::extract_entry(&stream, "output-cache", OUTPUT_CACHE)?;
                write_file(&workspace.build_cache(name), &cache).await?;
            }
            Err(e) => debug!("No build cache produced for {}: {}", name, e),
        }

        Ok(result)
    }
}

async fn write_file(path: &Path, contents: &[u8]) -> StagehandResult<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(|e| {
            StagehandError::io(format!("creating directory {}", parent.display()), e)
        })?;
    }
    tokio::fs::write(path, contents)
        .await
        .map_err(|e| StagehandError::io(format!("writing {}", path.display()), e))
}
