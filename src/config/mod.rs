//! Loading and persisting `config.toml`
//!
//! A missing file means "all defaults". A file that parses but leaves the
//! engine binary or stack name blank is rejected up front, before any
//! container command is attempted with it.

pub mod schema;

pub use schema::Config;

use crate::error::{StagehandError, StagehandResult};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

/// Reads and writes the stagehand configuration file
pub struct ConfigManager {
    file: PathBuf,
}

impl ConfigManager {
    /// Manager for `<config dir>/stagehand/config.toml`
    pub fn new() -> Self {
        let base = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
        Self::with_path(base.join("stagehand").join("config.toml"))
    }

    /// Manager for an explicit file, as given by `--config`
    pub fn with_path(file: PathBuf) -> Self {
        Self { file }
    }

    pub fn path(&self) -> &Path {
        &self.file
    }

    pub async fn load(&self) -> StagehandResult<Config> {
        let text = match fs::read_to_string(&self.file).await {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No config at {}, using defaults", self.file.display());
                return Ok(Config::default());
            }
            Err(e) => {
                return Err(StagehandError::io(
                    format!("reading {}", self.file.display()),
                    e,
                ))
            }
        };

        let config: Config = toml::from_str(&text).map_err(|e| self.invalid(e.message()))?;
        check(&config).map_err(|reason| self.invalid(reason))?;
        Ok(config)
    }

    /// Write `config`, replacing the file in one rename
    pub async fn save(&self, config: &Config) -> StagehandResult<()> {
        check(config).map_err(|reason| self.invalid(reason))?;

        if let Some(dir) = self.file.parent() {
            fs::create_dir_all(dir)
                .await
                .map_err(|source| StagehandError::ConfigDirCreate {
                    path: dir.to_path_buf(),
                    source,
                })?;
        }

        let staged = self.file.with_extension("toml.tmp");
        fs::write(&staged, toml::to_string_pretty(config)?)
            .await
            .map_err(|e| StagehandError::io(format!("writing {}", staged.display()), e))?;
        fs::rename(&staged, &self.file)
            .await
            .map_err(|e| StagehandError::io(format!("replacing {}", self.file.display()), e))?;

        info!("Wrote {}", self.file.display());
        Ok(())
    }

    fn invalid(&self, reason: impl Into<String>) -> StagehandError {
        StagehandError::ConfigInvalid {
            path: self.file.clone(),
            reason: reason.into(),
        }
    }
}

impl Default for ConfigManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Settings every command depends on must be non-blank
fn check(config: &Config) -> Result<(), String> {
    let required = [
        ("engine.binary", config.engine.binary.as_str()),
        ("stack.name", config.stack.name.as_str()),
    ];
    match required.iter().find(|(_, value)| value.trim().is_empty()) {
        Some((key, _)) => Err(format!("{key} must not be empty")),
        None => Ok(()),
    }
}
