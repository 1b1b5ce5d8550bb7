//! Deployment pipeline
//!
//! `Deploy` runs Setup, Stage and Start in order and stops at the first
//! failing phase. `Delete` runs Teardown. Every phase configuration is a
//! value: the `with_*` methods return configured copies.

mod setup;
mod stage;
mod start;
mod teardown;

pub use setup::Setup;
pub use stage::{Stage, StagingResult};
pub use start::Start;
pub use teardown::Teardown;

use crate::engine::ContainerEngine;
use crate::error::{StagehandError, StagehandResult};
use crate::network::NetworkManager;
use crate::workspace::Workspace;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::info;

/// A running app
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Deployment {
    pub name: String,
    /// URL reachable from the host
    pub external_url: String,
    /// URL reachable from other containers on the internal network
    pub internal_url: String,
}

/// Staging and build output handed back to the caller.
///
/// Clones share the same buffer, so a caller keeps its handle and reads the
/// logs whether or not the deployment succeeded.
#[derive(Debug, Clone, Default)]
pub struct Logs(Arc<Mutex<String>>);

impl Logs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append raw text
    pub fn write(&self, text: &str) {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_str(text);
    }

    /// Append a line, adding the trailing newline
    pub fn line(&self, text: &str) {
        let mut buf = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        buf.push_str(text);
        buf.push('\n');
    }

    pub fn contents(&self) -> String {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn is_empty(&self) -> bool {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).is_empty()
    }
}

impl fmt::Display for Logs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.contents())
    }
}

/// Stack identifier and the image it runs on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stack {
    pub name: String,
    pub image: String,
}

impl Stack {
    /// Stack with the image published for it
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let image = format!("cloudfoundry/{name}:latest");
        Self { name, image }
    }

    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        let image = image.into();
        if !image.is_empty() {
            self.image = image;
        }
        self
    }
}

impl Default for Stack {
    fn default() -> Self {
        Self::new("cflinuxfs3")
    }
}

/// Collaborators shared by every phase
#[derive(Clone)]
pub struct Backend {
    pub engine: Arc<dyn ContainerEngine>,
    pub networks: NetworkManager,
    pub workspace: Workspace,
}

impl Backend {
    pub fn new(engine: Arc<dyn ContainerEngine>, workspace: Workspace) -> Self {
        Self {
            networks: NetworkManager::new(engine.clone()),
            engine,
            workspace,
        }
    }
}

/// Merge `KEY=VALUE` style pairs into an environment map
pub(crate) fn merge_env<I, K, V>(env: &mut BTreeMap<String, String>, vars: I)
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
{
    env.extend(vars.into_iter().map(|(k, v)| (k.into(), v.into())));
}

/// Render an environment map as `KEY=VALUE` strings, sorted by key
pub(crate) fn env_list(env: &BTreeMap<String, String>) -> Vec<String> {
    env.iter().map(|(k, v)| format!("{k}={v}")).collect()
}

/// Setup, Stage and Start for one app
#[derive(Clone)]
pub struct Deploy {
    setup: Setup,
    stage: Stage,
    start: Start,
}

impl Deploy {
    pub fn new(setup: Setup, stage: Stage, start: Start) -> Self {
        Self {
            setup,
            stage,
            start,
        }
    }

    pub fn with_buildpacks<I, S>(&self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            setup: self.setup.with_buildpacks(names),
            ..self.clone()
        }
    }

    /// Environment for both the staging and the running container
    pub fn with_env<I, K, V>(&self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let vars: Vec<(String, String)> = vars
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        Self {
            setup: self.setup.with_env(vars.clone()),
            stage: self.stage.clone(),
            start: self.start.with_env(vars),
        }
    }

    pub fn with_services<I, S>(&self, services: I) -> Self
    where
        I: IntoIterator<Item = (S, serde_json::Value)>,
        S: Into<String>,
    {
        Self {
            start: self.start.with_services(services),
            ..self.clone()
        }
    }

    pub fn with_stack(&self, stack: Stack) -> Self {
        Self {
            setup: self.setup.with_stack(stack.clone()),
            stage: self.stage.clone(),
            start: self.start.with_stack(stack),
        }
    }

    pub fn without_internet_access(&self) -> Self {
        Self {
            setup: self.setup.without_internet_access(),
            ..self.clone()
        }
    }

    /// Stage the app at `source` and run it as `name`.
    ///
    /// Build output accumulates in `logs` whatever the outcome. A failed phase
    /// leaves its resources behind for `Delete` to clean up.
    pub async fn execute(
        &self,
        logs: &Logs,
        name: &str,
        source: &Path,
    ) -> StagehandResult<Deployment> {
        info!("Deploying {} from {}", name, source.display());

        let container_id = self
            .setup
            .run(logs, name, source)
            .await
            .map_err(|e| StagehandError::phase("setup", e))?;

        let command = self
            .stage
            .run(logs, &container_id, name)
            .await
            .map_err(|e| StagehandError::phase("stage", e))?;

        let (external_url, internal_url) = self
            .start
            .run(logs, name, &command)
            .await
            .map_err(|e| StagehandError::phase("start", e))?;

        info!("Deployed {} at {}", name, external_url);
        Ok(Deployment {
            name: name.to_string(),
            external_url,
            internal_url,
        })
    }
}

/// Teardown for one app
#[derive(Clone)]
pub struct Delete {
    teardown: Teardown,
}

impl Delete {
    pub fn new(teardown: Teardown) -> Self {
        Self { teardown }
    }

    pub async fn execute(&self, name: &str) -> StagehandResult<()> {
        info!("Deleting {}", name);
        self.teardown.run(name).await
    }
}
