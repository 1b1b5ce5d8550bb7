//! Container engine abstraction
//!
//! The deployment pipeline only talks to [`ContainerEngine`]. [`CliEngine`]
//! drives the docker or podman command line; tests substitute an in-memory
//! engine.

mod cli;
#[cfg(test)]
pub(crate) mod fake;

pub use cli::CliEngine;

use crate::error::StagehandResult;
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

/// Everything needed to create a container
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub command: Vec<String>,
    pub user: String,
    /// `KEY=VALUE` pairs
    pub env: Vec<String>,
    pub workdir: String,
    /// Container ports such as `8080/tcp`
    pub exposed_ports: Vec<String>,
    /// Network the container is attached to at creation
    pub network: String,
    /// Publish every exposed port on a random host port
    pub publish_all: bool,
}

/// Demultiplexed container output
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerLogs {
    pub stdout: String,
    pub stderr: String,
}

/// The subset of `inspect` output the pipeline reads
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ContainerDetails {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub network_settings: NetworkSettings,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct NetworkSettings {
    #[serde(default)]
    pub ports: HashMap<String, Option<Vec<PortBinding>>>,
    #[serde(default)]
    pub networks: HashMap<String, EndpointSettings>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PortBinding {
    #[serde(default)]
    pub host_ip: String,
    #[serde(default)]
    pub host_port: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EndpointSettings {
    #[serde(rename = "IPAddress", default)]
    pub ip_address: String,
    #[serde(rename = "NetworkID", default)]
    pub network_id: String,
}

impl ContainerDetails {
    /// First host port bound to `container_port` (e.g. `8080/tcp`)
    pub fn host_port(&self, container_port: &str) -> Option<&str> {
        self.network_settings
            .ports
            .get(container_port)?
            .as_ref()?
            .iter()
            .map(|b| b.host_port.as_str())
            .find(|p| !p.is_empty())
    }

    /// Address assigned on the named network
    pub fn ip_address(&self, network: &str) -> Option<&str> {
        self.network_settings
            .networks
            .get(network)
            .map(|e| e.ip_address.as_str())
            .filter(|ip| !ip.is_empty())
    }
}

/// A network as reported by `list_networks`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkSummary {
    pub id: String,
    pub name: String,
}

/// Container and network operations consumed by the deployment pipeline.
///
/// Missing containers surface as `ContainerNotFound`, missing networks as
/// `NetworkNotFound` and networks with attached containers as
/// `NetworkInUse`, so callers can decide what is benign.
#[async_trait]
pub trait ContainerEngine: Send + Sync {
    /// Human-readable engine name
    fn name(&self) -> &str;

    /// Pull an image, reporting progress lines as they arrive
    async fn pull_image(
        &self,
        image: &str,
        on_progress: &(dyn Fn(String) + Send + Sync),
    ) -> StagehandResult<()>;

    /// Create (but do not start) a container and return its id
    async fn create_container(&self, spec: &ContainerSpec) -> StagehandResult<String>;

    /// Extract a tar archive from the host into `dest` inside the container
    async fn copy_to_container(&self, id: &str, dest: &str, archive: &Path)
        -> StagehandResult<()>;

    /// Copy `src` out of the container as an uncompressed tar stream
    async fn copy_from_container(&self, id: &str, src: &str) -> StagehandResult<Vec<u8>>;

    async fn start_container(&self, id: &str) -> StagehandResult<()>;

    /// Block until the container stops and return its exit status
    async fn wait_container(&self, id: &str) -> StagehandResult<i64>;

    async fn container_logs(&self, id: &str) -> StagehandResult<ContainerLogs>;

    async fn inspect_container(&self, id: &str) -> StagehandResult<ContainerDetails>;

    /// Remove a container by id or name
    async fn remove_container(&self, id: &str, force: bool) -> StagehandResult<()>;

    async fn list_networks(&self) -> StagehandResult<Vec<NetworkSummary>>;

    /// Create a network and return its id
    async fn create_network(&self, name: &str, driver: &str, internal: bool)
        -> StagehandResult<String>;

    async fn connect_network(&self, network_id: &str, container: &str) -> StagehandResult<()>;

    async fn remove_network(&self, network_id: &str) -> StagehandResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    const INSPECT: &str = r#"{
        "Id": "abc123",
        "Name": "/myapp",
        "NetworkSettings": {
            "Ports": {
                "8080/tcp": [
                    {"HostIp": "0.0.0.0", "HostPort": "49153"},
                    {"HostIp": "::", "HostPort": "49153"}
                ],
                "9090/tcp": null
            },
            "Networks": {
                "stagehand-internal": {"IPAddress": "172.18.0.2", "NetworkID": "n1"},
                "bridge": {"IPAddress": "", "NetworkID": "n2"}
            }
        }
    }"#;

    #[test]
    fn parses_inspect_output() {
        let details: ContainerDetails = serde_json::from_str(INSPECT).unwrap();

        assert_eq!(details.id, "abc123");
        assert_eq!(details.host_port("8080/tcp"), Some("49153"));
        assert_eq!(details.host_port("9090/tcp"), None);
        assert_eq!(details.host_port("1234/tcp"), None);
        assert_eq!(details.ip_address("stagehand-internal"), Some("172.18.0.2"));
        assert_eq!(details.ip_address("bridge"), None);
    }

    #[test]
    fn tolerates_missing_sections() {
        let details: ContainerDetails = serde_json::from_str(r#"{"Id": "x"}"#).unwrap();
        assert!(details.network_settings.ports.is_empty());
        assert_eq!(details.ip_address("stagehand-internal"), None);
    }
}
