//! Buildpack bundle assembly

use super::cache::BuildpacksCache;
use super::registry::{Buildpack, BuildpacksRegistry};
use crate::archive::{self, Archiver};
use crate::error::{StagehandError, StagehandResult};
use md5::{Digest, Md5};
use std::fs;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// In-container directory the staging builder reads buildpacks from
pub const BUILDPACKS_PREFIX: &str = "/tmp/buildpacks";

/// Builds the buildpack bundle for one app from a registry and a cache
#[derive(Clone)]
pub struct BuildpacksManager {
    archiver: Archiver,
    cache: Arc<BuildpacksCache>,
    registry: Arc<BuildpacksRegistry>,
    filter: Vec<String>,
}

impl BuildpacksManager {
    pub fn new(cache: Arc<BuildpacksCache>, registry: Arc<BuildpacksRegistry>) -> Self {
        Self {
            archiver: Archiver::new().with_prefix(BUILDPACKS_PREFIX),
            cache,
            registry,
            filter: Vec::new(),
        }
    }

    /// Return a copy restricted to the named buildpacks, in the given order
    pub fn with_buildpacks<I, S>(&self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            filter: names.into_iter().map(Into::into).collect(),
            ..self.clone()
        }
    }

    pub fn registry(&self) -> &BuildpacksRegistry {
        &self.registry
    }

    /// Comma-separated buildpack order and whether detection is skipped.
    ///
    /// Detection is skipped exactly when an explicit filter was supplied.
    pub fn order(&self) -> StagehandResult<(String, bool)> {
        if !self.filter.is_empty() {
            return Ok((self.filter.join(","), true));
        }
        let names: Vec<String> = self.registry.list()?.into_iter().map(|b| b.name).collect();
        Ok((names.join(","), false))
    }

    /// Assemble `<dir>/<name>/<md5 of buildpack>/...` and pack it into
    /// `<dir>/<name>.tar.gz` under [`BUILDPACKS_PREFIX`].
    pub fn build(&self, dir: &Path, name: &str) -> StagehandResult<PathBuf> {
        let bundle = dir.join(name);
        let tarball = dir.join(format!("{name}.tar.gz"));

        for buildpack in self.selected()? {
            let target = bundle.join(bundle_dir_name(&buildpack.name));
            debug!("Extracting {} into {}", buildpack.name, target.display());

            let file = self.cache.fetch(&buildpack.uri)?;
            if target.exists() {
                fs::remove_dir_all(&target).map_err(|e| {
                    StagehandError::io(format!("clearing {}", target.display()), e)
                })?;
            }
            archive::decompress(BufReader::new(file), &target, 0)?;
        }

        fs::create_dir_all(&bundle)
            .map_err(|e| StagehandError::io(format!("creating {}", bundle.display()), e))?;
        self.archiver.compress(&bundle, &tarball)?;

        info!("Buildpacks for {} packed at {}", name, tarball.display());
        Ok(tarball)
    }

    fn selected(&self) -> StagehandResult<Vec<Buildpack>> {
        let all = self.registry.list()?;
        if self.filter.is_empty() {
            return Ok(all);
        }
        self.filter
            .iter()
            .map(|wanted| {
                all.iter()
                    .find(|b| &b.name == wanted)
                    .cloned()
                    .ok_or_else(|| StagehandError::BuildpackNotFound(wanted.clone()))
            })
            .collect()
    }
}

/// Directory name the in-container builder expects for a buildpack
pub fn bundle_dir_name(buildpack: &str) -> String {
    hex::encode(Md5::digest(buildpack.as_bytes()))
}
