//! CLI command implementations

pub mod buildpacks;
pub mod config;
pub mod delete;
pub mod deploy;

pub use buildpacks::execute as buildpacks;
pub use config::execute as config;
pub use delete::execute as delete;
pub use deploy::execute as deploy;
