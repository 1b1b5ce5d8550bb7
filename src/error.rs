//! Error types for Stagehand
//!
//! All modules use `StagehandResult<T>` as their return type.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for Stagehand operations
pub type StagehandResult<T> = Result<T, StagehandError>;

/// All errors that can occur in Stagehand
#[derive(Error, Debug)]
pub enum StagehandError {
    // Configuration and input errors
    #[error("Invalid configuration at {path}: {reason}")]
    ConfigInvalid { path: PathBuf, reason: String },

    #[error("Failed to create config directory {path}: {source}")]
    ConfigDirCreate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid URI {uri}: {reason}")]
    InvalidUri { uri: String, reason: String },

    #[error("Path not found: {0}")]
    PathNotFound(PathBuf),

    // Remote resource errors
    #[error("HTTP request to {url} failed: {reason}")]
    Http { url: String, reason: String },

    #[error("HTTP request to {url} returned unexpected status {status}")]
    HttpStatus { url: String, status: u16 },

    #[error("Failed to build release lookup URL for buildpack {name}: {reason}")]
    RegistryUrl { name: String, reason: String },

    #[error("Failed to look up latest release of buildpack {name}: {reason}")]
    RegistryRequest { name: String, reason: String },

    #[error("Latest release lookup for buildpack {name} returned status {status}")]
    RegistryStatus { name: String, status: u16 },

    #[error("Malformed release response for buildpack {name}: {reason}")]
    RegistryResponse { name: String, reason: String },

    #[error("Latest release of buildpack {name} has no asset ending in {suffix}")]
    NoMatchingAsset { name: String, suffix: String },

    #[error("Buildpack not found in registry: {0}")]
    BuildpackNotFound(String),

    // Build errors
    #[error("Archive error ({context}): {reason}")]
    Archive { context: String, reason: String },

    #[error("Entry {entry} not found in archive copied from {source_path}")]
    ArchiveEntryMissing { entry: String, source_path: String },

    #[error("Command failed: {command}")]
    CommandFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Lifecycle build failed during {step}:\n{output}")]
    LifecycleBuild { step: String, output: String },

    // Container engine errors
    #[error("Container engine operation {operation} failed: {stderr}")]
    Engine { operation: String, stderr: String },

    #[error("Image pull failed: {image}: {reason}")]
    ImagePull { image: String, reason: String },

    #[error("Container not found: {0}")]
    ContainerNotFound(String),

    #[error("No such network: {0}")]
    NetworkNotFound(String),

    #[error("Network {0} still has containers attached")]
    NetworkInUse(String),

    #[error("Failed to read container {container} metadata: {reason}")]
    ContainerInspect { container: String, reason: String },

    // Staging outcome
    #[error("App staging failed: container exited with non-zero status code ({code})")]
    StagingFailed { code: i64 },

    // Pipeline wrapping
    #[error("failed to run {phase} step: {source}")]
    Phase {
        phase: &'static str,
        #[source]
        source: Box<StagehandError>,
    },

    // IO errors
    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

impl StagehandError {
    /// Create an IO error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create a command failed error
    pub fn command_failed(command: impl Into<String>, source: std::io::Error) -> Self {
        Self::CommandFailed {
            command: command.into(),
            source,
        }
    }

    /// Create a container engine error for the named operation
    pub fn engine(operation: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self::Engine {
            operation: operation.into(),
            stderr: stderr.into(),
        }
    }

    /// Create an archive error
    pub fn archive(context: impl Into<String>, reason: impl ToString) -> Self {
        Self::Archive {
            context: context.into(),
            reason: reason.to_string(),
        }
    }

    /// Wrap an error with the pipeline phase it came from
    pub fn phase(phase: &'static str, source: StagehandError) -> Self {
        Self::Phase {
            phase,
            source: Box::new(source),
        }
    }

    /// Whether this error is a cleanup condition that teardown treats as success
    pub fn is_benign(&self) -> bool {
        match self {
            Self::ContainerNotFound(_) | Self::NetworkNotFound(_) | Self::NetworkInUse(_) => true,
            Self::Io { source, .. } => source.kind() == std::io::ErrorKind::NotFound,
            _ => false,
        }
    }

    /// The innermost error, skipping pipeline phase wrappers
    pub fn root(&self) -> &StagehandError {
        match self {
            Self::Phase { source, .. } => source.root(),
            other => other,
        }
    }

    /// Get actionable hint for the error
    pub fn hint(&self) -> Option<&'static str> {
        match self.root() {
            Self::RegistryStatus { status: 401 | 403, .. } => {
                Some("Set GITHUB_TOKEN or registry.token to raise the GitHub API rate limit")
            }
            Self::CommandFailed { .. } => {
                Some("Check that the container engine and the Go toolchain are on PATH")
            }
            Self::StagingFailed { .. } => Some("The staging logs above show why the build failed"),
            _ => None,
        }
    }
}
