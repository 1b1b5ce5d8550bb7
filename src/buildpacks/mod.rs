//! Buildpack artifacts: download cache, release catalog and bundle builder
//!
//! The registry maps catalog names to download URIs, the cache makes sure
//! each URI is downloaded at most once, and the manager assembles the
//! `/tmp/buildpacks` bundle a staging container expects.

pub mod builder;
pub mod cache;
pub mod registry;

pub use builder::BuildpacksManager;
pub use cache::BuildpacksCache;
pub use registry::{Buildpack, BuildpacksRegistry, DEFAULT_BUILDPACKS};
