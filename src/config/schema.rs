//! Configuration schema for Stagehand
//!
//! Configuration is stored at `~/.config/stagehand/config.toml`

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Workspace settings
    pub workspace: WorkspaceConfig,

    /// Container engine settings
    pub engine: EngineConfig,

    /// Stack image settings
    pub stack: StackConfig,

    /// Buildpack registry settings
    pub registry: RegistryConfig,

    /// Lifecycle build settings
    pub lifecycle: LifecycleConfig,
}

/// Where build artifacts live on disk
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspaceConfig {
    /// Workspace root directory
    pub path: PathBuf,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            path: dirs::cache_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("stagehand"),
        }
    }
}

/// Container engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Engine CLI binary (docker or podman)
    pub binary: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            binary: "docker".to_string(),
        }
    }
}

/// Stack configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StackConfig {
    /// Stack identifier exposed to buildpacks as CF_STACK
    pub name: String,

    /// Stack image; derived from the name when empty
    pub image: String,
}

impl Default for StackConfig {
    fn default() -> Self {
        Self {
            name: "cflinuxfs3".to_string(),
            image: String::new(),
        }
    }
}

/// Buildpack release registry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// GitHub API base URL
    pub api: String,

    /// Organization publishing the buildpacks
    pub org: String,

    /// Suffix of the release asset to download
    pub asset_suffix: String,

    /// API token; falls back to GITHUB_TOKEN when empty
    pub token: String,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            api: "https://api.github.com".to_string(),
            org: "cloudfoundry".to_string(),
            asset_suffix: ".zip".to_string(),
            token: String::new(),
        }
    }
}

impl RegistryConfig {
    /// Configured token, or the GITHUB_TOKEN environment variable
    pub fn resolved_token(&self) -> Option<String> {
        if !self.token.is_empty() {
            return Some(self.token.clone());
        }
        std::env::var("GITHUB_TOKEN").ok().filter(|t| !t.is_empty())
    }
}

/// Lifecycle source and toolchain configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// Archive of the lifecycle source repository
    pub source_uri: String,

    /// Go toolchain binary
    pub go: String,

    /// Target operating system of the compiled executables
    pub goos: String,

    /// Target architecture of the compiled executables
    pub goarch: String,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            source_uri:
                "https://github.com/cloudfoundry/buildpackapplifecycle/archive/refs/heads/main.zip"
                    .to_string(),
            go: "go".to_string(),
            goos: "linux".to_string(),
            goarch: "amd64".to_string(),
        }
    }
}
