//! Deployment backends
//!
//! A [`Platform`] stages and runs apps behind one contract. [`EnginePlatform`]
//! does it with a local container engine.

use crate::buildpacks::{BuildpacksCache, BuildpacksManager, BuildpacksRegistry};
use crate::config::Config;
use crate::engine::ContainerEngine;
use crate::error::StagehandResult;
use crate::lifecycle::{GoToolchain, LifecycleManager, Toolchain};
use crate::pipeline::{
    Backend, Delete, Deploy, Deployment, Logs, Setup, Stack, Stage, Start, Teardown,
};
use crate::workspace::Workspace;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// What to deploy and how
#[derive(Debug, Clone)]
pub struct DeployRequest {
    pub name: String,
    pub source: PathBuf,
    pub buildpacks: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub services: BTreeMap<String, serde_json::Value>,
    pub stack: Option<String>,
    pub internet_access: bool,
}

impl DeployRequest {
    pub fn new(name: impl Into<String>, source: impl AsRef<Path>) -> Self {
        Self {
            name: name.into(),
            source: source.as_ref().to_path_buf(),
            buildpacks: Vec::new(),
            env: BTreeMap::new(),
            services: BTreeMap::new(),
            stack: None,
            internet_access: true,
        }
    }

    pub fn with_buildpacks<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.buildpacks.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn with_env<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.env
            .extend(vars.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    pub fn with_services<I, S>(mut self, services: I) -> Self
    where
        I: IntoIterator<Item = (S, serde_json::Value)>,
        S: Into<String>,
    {
        self.services
            .extend(services.into_iter().map(|(k, v)| (k.into(), v)));
        self
    }

    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }

    pub fn without_internet_access(mut self) -> Self {
        self.internet_access = false;
        self
    }
}

/// A backend that can stage, run and remove apps
#[async_trait]
pub trait Platform: Send + Sync {
    /// Human-readable backend name
    fn name(&self) -> &str;

    /// Stage and run an app. Build output is appended to `logs` whether or
    /// not the deployment succeeds.
    async fn deploy(&self, request: &DeployRequest, logs: &Logs) -> StagehandResult<Deployment>;

    /// Remove an app and everything it left behind
    async fn delete(&self, name: &str) -> StagehandResult<()>;
}

/// Platform backed by a container engine
pub struct EnginePlatform {
    engine_name: String,
    registry: Arc<BuildpacksRegistry>,
    deploy: Deploy,
    delete: Delete,
}

impl EnginePlatform {
    pub fn new(config: &Config, engine: Arc<dyn ContainerEngine>) -> Self {
        let toolchain = Arc::new(GoToolchain::new(&config.lifecycle));
        Self::with_toolchain(config, engine, toolchain)
    }

    /// Build with a specific toolchain for the lifecycle executables
    pub fn with_toolchain(
        config: &Config,
        engine: Arc<dyn ContainerEngine>,
        toolchain: Arc<dyn Toolchain>,
    ) -> Self {
        let workspace = Workspace::new(&config.workspace.path);
        debug!("Using workspace {}", workspace.root().display());

        let registry = Arc::new(BuildpacksRegistry::new(
            config.registry.clone(),
            config.registry.resolved_token(),
        ));
        let cache = Arc::new(BuildpacksCache::new(workspace.buildpacks_cache_dir()));
        let buildpacks = BuildpacksManager::new(cache, registry.clone());
        let lifecycle = Arc::new(LifecycleManager::new(toolchain));
        let stack = Stack::new(&config.stack.name).with_image(&config.stack.image);

        let engine_name = engine.name().to_string();
        let backend = Backend::new(engine, workspace);
        let deploy = Deploy::new(
            Setup::new(
                backend.clone(),
                lifecycle,
                &config.lifecycle.source_uri,
                buildpacks,
            ),
            Stage::new(backend.clone()),
            Start::new(backend.clone()),
        )
        .with_stack(stack);

        Self {
            engine_name,
            registry,
            deploy,
            delete: Delete::new(Teardown::new(backend)),
        }
    }

    /// Buildpack catalog used for staging
    pub fn registry(&self) -> &Arc<BuildpacksRegistry> {
        &self.registry
    }
}

#[async_trait]
impl Platform for EnginePlatform {
    fn name(&self) -> &str {
        &self.engine_name
    }

    async fn deploy(&self, request: &DeployRequest, logs: &Logs) -> StagehandResult<Deployment> {
        let mut deploy = self.deploy.clone();
        if let Some(stack) = &request.stack {
            deploy = deploy.with_stack(Stack::new(stack));
        }
        if !request.buildpacks.is_empty() {
            deploy = deploy.with_buildpacks(request.buildpacks.clone());
        }
        if !request.env.is_empty() {
            deploy = deploy.with_env(request.env.clone());
        }
        if !request.services.is_empty() {
            deploy = deploy.with_services(request.services.clone());
        }
        if !request.internet_access {
            deploy = deploy.without_internet_access();
        }

        deploy.execute(logs, &request.name, &request.source).await
    }

    async fn delete(&self, name: &str) -> StagehandResult<()> {
        self.delete.execute(name).await
    }
}
