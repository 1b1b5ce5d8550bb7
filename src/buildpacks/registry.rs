//! Buildpack catalog
//!
//! Resolves each catalog name to the download URI of its latest release via
//! the GitHub releases API. Resolutions are memoized; `override_buildpacks`
//! pins a name to a specific URI (tests use this to stage against a known
//! artifact version).

use crate::config::schema::RegistryConfig;
use crate::error::{StagehandError, StagehandResult};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, info};
use url::Url;

/// Catalog buildpacks, in staging order
pub const DEFAULT_BUILDPACKS: [&str; 11] = [
    "staticfile",
    "java",
    "ruby",
    "dotnet-core",
    "nodejs",
    "go",
    "python",
    "php",
    "nginx",
    "r",
    "binary",
];

/// A buildpack and where to get it
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Buildpack {
    /// Catalog key, e.g. `go_buildpack`
    pub name: String,
    /// Download URI or local path
    pub uri: String,
}

impl Buildpack {
    pub fn new(name: impl Into<String>, uri: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            uri: uri.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct Release {
    assets: Vec<ReleaseAsset>,
}

#[derive(Debug, Deserialize)]
struct ReleaseAsset {
    name: String,
    browser_download_url: String,
}

/// Catalog key for a default buildpack: `dotnet-core` -> `dotnet_core_buildpack`
pub fn catalog_name(name: &str) -> String {
    format!("{}_buildpack", name.replace('-', "_"))
}

/// Name -> URI catalog backed by remote release lookups
pub struct BuildpacksRegistry {
    config: RegistryConfig,
    token: Option<String>,
    agent: ureq::Agent,
    index: DashMap<String, String>,
}

impl BuildpacksRegistry {
    pub fn new(config: RegistryConfig, token: Option<String>) -> Self {
        Self {
            config,
            token: token.filter(|t| !t.is_empty()),
            agent: ureq::Agent::new_with_defaults(),
            index: DashMap::new(),
        }
    }

    /// Default buildpacks in fixed order, then any extra names sorted by name
    pub fn list(&self) -> StagehandResult<Vec<Buildpack>> {
        let mut buildpacks = Vec::with_capacity(DEFAULT_BUILDPACKS.len());
        let mut defaults = HashSet::new();

        for name in DEFAULT_BUILDPACKS {
            let key = catalog_name(name);
            let known = self.index.get(&key).map(|uri| uri.value().clone());
            let uri = match known {
                Some(uri) => uri,
                None => {
                    let uri = self.lookup(name)?;
                    self.index.entry(key.clone()).or_insert(uri).value().clone()
                }
            };
            defaults.insert(key.clone());
            buildpacks.push(Buildpack::new(key, uri));
        }

        let mut extras: Vec<Buildpack> = self
            .index
            .iter()
            .filter(|entry| !defaults.contains(entry.key()))
            .map(|entry| Buildpack::new(entry.key().clone(), entry.value().clone()))
            .collect();
        extras.sort_by(|a, b| a.name.cmp(&b.name));
        buildpacks.extend(extras);

        Ok(buildpacks)
    }

    /// Pin names to URIs, taking priority over remote resolution
    pub fn override_buildpacks(&self, buildpacks: impl IntoIterator<Item = Buildpack>) {
        for buildpack in buildpacks {
            debug!("Overriding buildpack {} -> {}", buildpack.name, buildpack.uri);
            self.index.insert(buildpack.name, buildpack.uri);
        }
    }

    fn lookup(&self, name: &str) -> StagehandResult<String> {
        let raw = format!(
            "{}/repos/{}/{}-buildpack/releases/latest",
            self.config.api.trim_end_matches('/'),
            self.config.org,
            name
        );
        let url = Url::parse(&raw).map_err(|e| StagehandError::RegistryUrl {
            name: name.to_string(),
            reason: e.to_string(),
        })?;

        debug!("Looking up latest release: {}", url);
        let mut request = self
            .agent
            .get(url.as_str())
            .header("Accept", "application/vnd.github+json");
        if let Some(token) = &self.token {
            request = request.header("Authorization", &format!("Bearer {token}"));
        }

        let response = match request.call() {
            Ok(response) => response,
            Err(ureq::Error::StatusCode(status)) => {
                return Err(StagehandError::RegistryStatus {
                    name: name.to_string(),
                    status,
                })
            }
            Err(e) => {
                return Err(StagehandError::RegistryRequest {
                    name: name.to_string(),
                    reason: e.to_string(),
                })
            }
        };

        let release: Release = serde_json::from_reader(response.into_body().into_reader())
            .map_err(|e| StagehandError::RegistryResponse {
                name: name.to_string(),
                reason: e.to_string(),
            })?;

        let asset = release
            .assets
            .into_iter()
            .find(|asset| asset.name.ends_with(&self.config.asset_suffix))
            .ok_or_else(|| StagehandError::NoMatchingAsset {
                name: name.to_string(),
                suffix: self.config.asset_suffix.clone(),
            })?;

        info!("Resolved buildpack {} -> {}", name, asset.browser_download_url);
        Ok(asset.browser_download_url)
    }
}
