//! Setup: build artifacts and create the staging container

use super::{env_list, merge_env, Backend, Logs, Stack};
use crate::archive::{self, Archiver};
use crate::buildpacks::builder::BUILDPACKS_PREFIX;
use crate::buildpacks::BuildpacksManager;
use crate::engine::ContainerSpec;
use crate::error::{StagehandError, StagehandResult};
use crate::lifecycle::{LifecycleManager, LIFECYCLE_PREFIX};
use crate::network::{EGRESS_NETWORK, INTERNAL_DRIVER, INTERNAL_NETWORK};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// In-container app source directory
pub const APP_DIR: &str = "/tmp/app";
/// In-container build cache read by the builder
pub const CACHE_DIR: &str = "/tmp/cache";
/// Where the builder writes the updated build cache
pub const OUTPUT_CACHE: &str = "/tmp/output-cache";
/// Where the builder writes the droplet
pub const OUTPUT_DROPLET: &str = "/tmp/droplet";
/// Where the builder writes the staging result
pub const OUTPUT_METADATA: &str = "/tmp/result.json";

const USER: &str = "vcap";
const HOME: &str = "/home/vcap";

#[derive(Clone)]
pub struct Setup {
    backend: Backend,
    lifecycle: Arc<LifecycleManager>,
    lifecycle_source: String,
    buildpacks: BuildpacksManager,
    stack: Stack,
    env: BTreeMap<String, String>,
    internet_access: bool,
}

impl Setup {
    pub fn new(
        backend: Backend,
        lifecycle: Arc<LifecycleManager>,
        lifecycle_source: impl Into<String>,
        buildpacks: BuildpacksManager,
    ) -> Self {
        Self {
            backend,
            lifecycle,
            lifecycle_source: lifecycle_source.into(),
            buildpacks,
            stack: Stack::default(),
            env: BTreeMap::new(),
            internet_access: true,
        }
    }

    pub fn with_buildpacks<I, S>(&self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            buildpacks: self.buildpacks.with_buildpacks(names),
            ..self.clone()
        }
    }

    pub fn with_env<I, K, V>(&self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut setup = self.clone();
        merge_env(&mut setup.env, vars);
        setup
    }

    pub fn with_stack(&self, stack: Stack) -> Self {
        Self {
            stack,
            ..self.clone()
        }
    }

    pub fn without_internet_access(&self) -> Self {
        Self {
            internet_access: false,
            ..self.clone()
        }
    }

    /// Prepare a staging container for `source` and return its id
    pub async fn run(&self, logs: &Logs, name: &str, source: &Path) -> StagehandResult<String> {
        if !source.is_dir() {
            return Err(StagehandError::PathNotFound(source.to_path_buf()));
        }
        let workspace = &self.backend.workspace;
        let engine = &self.backend.engine;

        let lifecycle = self
            .lifecycle
            .build(&self.lifecycle_source, &workspace.lifecycle_dir())
            .await?;

        let buildpacks = {
            let manager = self.buildpacks.clone();
            let dir = workspace.buildpacks_dir();
            let name = name.to_string();
            tokio::task::spawn_blocking(move || manager.build(&dir, &name)).await??
        };

        let source_tarball = workspace.source_tarball(name);
        {
            let archiver = Archiver::new().with_prefix(APP_DIR);
            let source = source.to_path_buf();
            let tarball = source_tarball.clone();
            tokio::task::spawn_blocking(move || archiver.compress(&source, &tarball)).await??;
        }

        let progress = logs.clone();
        engine
            .pull_image(&self.stack.image, &move |line| progress.line(&line))
            .await?;

        self.backend
            .networks
            .create(INTERNAL_NETWORK, INTERNAL_DRIVER, true)
            .await?;

        let (order, skip_detect) = {
            let manager = self.buildpacks.clone();
            tokio::task::spawn_blocking(move || manager.order()).await??
        };

        let spec = self.staging_spec(name, &order, skip_detect);
        let id = engine.create_container(&spec).await?;
        debug!("Created staging container {} for {}", id, name);

        if self.internet_access {
            self.backend.networks.connect(&id, EGRESS_NETWORK).await?;
        }

        for tarball in [&lifecycle, &buildpacks, &source_tarball] {
            engine.copy_to_container(&id, "/", tarball).await?;
        }

        if let Some(cache) = self.build_cache(name).await? {
            engine.copy_to_container(&id, "/", cache.path()).await?;
        }

        info!("Staging container for {} ready ({})", name, id);
        Ok(id)
    }

    fn staging_spec(&self, name: &str, order: &str, skip_detect: bool) -> ContainerSpec {
        let mut env = BTreeMap::new();
        env.insert("CF_STACK".to_string(), self.stack.name.clone());
        merge_env(&mut env, self.env.clone());

        ContainerSpec {
            name: name.to_string(),
            image: self.stack.image.clone(),
            command: vec![
                format!("{LIFECYCLE_PREFIX}/builder"),
                format!("--buildArtifactsCacheDir={CACHE_DIR}"),
                format!("--buildDir={APP_DIR}"),
                format!("--buildpacksDir={BUILDPACKS_PREFIX}"),
                format!("--outputBuildArtifactsCache={OUTPUT_CACHE}"),
                format!("--outputDroplet={OUTPUT_DROPLET}"),
                format!("--outputMetadata={OUTPUT_METADATA}"),
                format!("--buildpackOrder={order}"),
                format!("--skipDetect={skip_detect}"),
            ],
            user: USER.to_string(),
            env: env_list(&env),
            workdir: HOME.to_string(),
            exposed_ports: Vec::new(),
            network: INTERNAL_NETWORK.to_string(),
            publish_all: false,
        }
    }

    /// Re-pack a previous build cache under [`CACHE_DIR`]
    async fn build_cache(&self, name: &str) -> StagehandResult<Option<tempfile::NamedTempFile>> {
        let saved: PathBuf = self.backend.workspace.build_cache(name);
        if !saved.is_file() {
            return Ok(None);
        }
        debug!("Restoring build cache from {}", saved.display());

        let packed = tokio::task::spawn_blocking(move || {
            let scratch = tempfile::tempdir()
                .map_err(|e| StagehandError::io("creating build cache scratch directory", e))?;
            let file = std::fs::File::open(&saved)
                .map_err(|e| StagehandError::io(format!("opening {}", saved.display()), e))?;
            archive::decompress(std::io::BufReader::new(file), scratch.path(), 0)?;

            let packed = tempfile::Builder::new()
                .suffix(".tar.gz")
                .tempfile()
                .map_err(|e| StagehandError::io("creating build cache archive", e))?;
            Archiver::new()
                .with_prefix(CACHE_DIR)
                .compress(scratch.path(), packed.path())?;
            Ok::<_, StagehandError>(packed)
        })
        .await??;

        Ok(Some(packed))
    }
}
