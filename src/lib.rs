//! Stagehand - local buildpack staging
//!
//! Reproduces a platform push on a local container engine: builds the
//! buildpack app lifecycle, bundles buildpacks, stages the app in a stack
//! container and runs the resulting droplet.

pub mod archive;
pub mod buildpacks;
pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod lifecycle;
pub mod network;
pub mod pipeline;
pub mod platform;
pub(crate) mod process;
pub mod ui;
pub mod workspace;

#[cfg(test)]
mod testing;

pub use error::{StagehandError, StagehandResult};
pub use pipeline::{Deployment, Logs};
pub use platform::{DeployRequest, EnginePlatform, Platform};
