//! In-memory engine for pipeline tests

use super::{
    ContainerDetails, ContainerEngine, ContainerLogs, ContainerSpec, EndpointSettings,
    NetworkSettings, NetworkSummary, PortBinding,
};
use crate::error::{StagehandError, StagehandResult};
use crate::testing::tar_with_entry;
use async_trait::async_trait;
use flate2::read::GzDecoder;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Mutex;

/// Host port every published container port is mapped to
pub(crate) const HOST_PORT: &str = "49153";

#[derive(Debug, Clone)]
pub(crate) struct FakeContainer {
    pub id: String,
    pub spec: ContainerSpec,
    pub networks: Vec<String>,
    pub started: bool,
}

#[derive(Debug, Clone)]
pub(crate) struct FakeNetwork {
    pub id: String,
    pub name: String,
    pub driver: String,
    pub internal: bool,
}

#[derive(Default)]
struct State {
    calls: Vec<String>,
    containers: BTreeMap<String, FakeContainer>,
    networks: BTreeMap<String, FakeNetwork>,
    created: Vec<ContainerSpec>,
    copies: Vec<CopiedArchive>,
    next_id: u64,
}

/// An archive copied into a container
#[derive(Debug, Clone)]
pub(crate) struct CopiedArchive {
    pub container: String,
    pub dest: String,
    pub entries: Vec<String>,
}

impl State {
    fn next_id(&mut self, kind: &str) -> String {
        self.next_id += 1;
        format!("{kind}{:04}", self.next_id)
    }

    fn container_key(&self, id_or_name: &str) -> Option<String> {
        self.containers
            .iter()
            .find(|(id, c)| id.as_str() == id_or_name || c.spec.name == id_or_name)
            .map(|(id, _)| id.clone())
    }

    fn network_name(&self, id: &str) -> Option<String> {
        self.networks.get(id).map(|n| n.name.clone())
    }
}

/// Records every call and simulates a staging container's outputs
pub(crate) struct FakeEngine {
    state: Mutex<State>,
    exit_code: i64,
    logs: ContainerLogs,
    result_json: String,
    droplet: Vec<u8>,
    output_cache: Option<Vec<u8>>,
    wait_error: Option<String>,
}

impl Default for FakeEngine {
    fn default() -> Self {
        let mut state = State::default();
        state.networks.insert(
            "bridge0".to_string(),
            FakeNetwork {
                id: "bridge0".to_string(),
                name: "bridge".to_string(),
                driver: "bridge".to_string(),
                internal: false,
            },
        );
        Self {
            state: Mutex::new(state),
            exit_code: 0,
            logs: ContainerLogs {
                stdout: "-----> Staticfile Buildpack\n".to_string(),
                stderr: String::new(),
            },
            result_json: r#"{"processes":[{"type":"web","command":"sh boot.sh"}]}"#.to_string(),
            droplet: b"droplet-bytes".to_vec(),
            output_cache: None,
            wait_error: None,
        }
    }
}

impl FakeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_exit_code(mut self, code: i64) -> Self {
        self.exit_code = code;
        self
    }

    pub fn with_logs(mut self, stdout: &str, stderr: &str) -> Self {
        self.logs = ContainerLogs {
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
        };
        self
    }

    pub fn with_result(mut self, json: &str) -> Self {
        self.result_json = json.to_string();
        self
    }

    pub fn with_output_cache(mut self, contents: &[u8]) -> Self {
        self.output_cache = Some(contents.to_vec());
        self
    }

    /// Make `wait_container` fail with this engine message
    pub fn with_wait_error(mut self, stderr: &str) -> Self {
        self.wait_error = Some(stderr.to_string());
        self
    }

    fn record(&self, call: String) -> std::sync::MutexGuard<'_, State> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(call);
        state
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Current container with this name, if any
    pub fn container(&self, name: &str) -> Option<FakeContainer> {
        let state = self.state.lock().unwrap();
        state
            .containers
            .values()
            .find(|c| c.spec.name == name)
            .cloned()
    }

    /// Every container ever created, in creation order
    pub fn created_specs(&self) -> Vec<ContainerSpec> {
        self.state.lock().unwrap().created.clone()
    }

    /// Archives copied into containers named `name`, oldest first
    pub fn copies(&self, name: &str) -> Vec<CopiedArchive> {
        let state = self.state.lock().unwrap();
        state
            .copies
            .iter()
            .filter(|c| c.container == name)
            .cloned()
            .collect()
    }

    pub fn container_count(&self) -> usize {
        self.state.lock().unwrap().containers.len()
    }

    pub fn network(&self, name: &str) -> Option<FakeNetwork> {
        let state = self.state.lock().unwrap();
        state.networks.values().find(|n| n.name == name).cloned()
    }

    pub fn network_count(&self) -> usize {
        self.state.lock().unwrap().networks.len()
    }
}

/// Entry names of a gzip tarball; empty for anything else
fn archive_entries(archive: &Path) -> Vec<String> {
    let Ok(file) = std::fs::File::open(archive) else {
        return Vec::new();
    };
    let mut tar = tar::Archive::new(GzDecoder::new(file));
    let Ok(entries) = tar.entries() else {
        return Vec::new();
    };
    entries
        .filter_map(Result::ok)
        .filter_map(|e| e.path().ok().map(|p| p.to_string_lossy().into_owned()))
        .collect()
}

#[async_trait]
impl ContainerEngine for FakeEngine {
    fn name(&self) -> &str {
        "fake"
    }

    async fn pull_image(
        &self,
        image: &str,
        on_progress: &(dyn Fn(String) + Send + Sync),
    ) -> StagehandResult<()> {
        drop(self.record(format!("pull {image}")));
        on_progress(format!("Pulling {image}"));
        on_progress("Download complete".to_string());
        Ok(())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> StagehandResult<String> {
        let mut state = self.record(format!("create {}", spec.name));
        if state.container_key(&spec.name).is_some() {
            return Err(StagehandError::engine(
                "create container",
                format!("container name {} is already in use", spec.name),
            ));
        }
        if !spec.network.is_empty() && !state.networks.values().any(|n| n.name == spec.network) {
            return Err(StagehandError::NetworkNotFound(spec.network.clone()));
        }

        let id = state.next_id("c");
        state.containers.insert(
            id.clone(),
            FakeContainer {
                id: id.clone(),
                spec: spec.clone(),
                networks: vec![spec.network.clone()],
                started: false,
            },
        );
        state.created.push(spec.clone());
        Ok(id)
    }

    async fn copy_to_container(
        &self,
        id: &str,
        dest: &str,
        archive: &Path,
    ) -> StagehandResult<()> {
        let entries = archive_entries(archive);
        let mut state = self.record(format!("copy-to {id}:{dest}"));
        let key = state
            .container_key(id)
            .ok_or_else(|| StagehandError::ContainerNotFound(id.to_string()))?;
        let container = state.containers[&key].spec.name.clone();
        state.copies.push(CopiedArchive {
            container,
            dest: dest.to_string(),
            entries,
        });
        Ok(())
    }

    async fn copy_from_container(&self, id: &str, src: &str) -> StagehandResult<Vec<u8>> {
        let state = self.record(format!("copy-from {id}:{src}"));
        state
            .container_key(id)
            .ok_or_else(|| StagehandError::ContainerNotFound(id.to_string()))?;

        match src {
            "/tmp/droplet" => Ok(tar_with_entry("droplet", &self.droplet)),
            "/tmp/result.json" => Ok(tar_with_entry("result.json", self.result_json.as_bytes())),
            "/tmp/output-cache" => match &self.output_cache {
                Some(contents) => Ok(tar_with_entry("output-cache", contents)),
                None => Err(StagehandError::engine(
                    "copy from container",
                    "Could not find the file /tmp/output-cache",
                )),
            },
            other => Err(StagehandError::engine(
                "copy from container",
                format!("Could not find the file {other}"),
            )),
        }
    }

    async fn start_container(&self, id: &str) -> StagehandResult<()> {
        let mut state = self.record(format!("start {id}"));
        let key = state
            .container_key(id)
            .ok_or_else(|| StagehandError::ContainerNotFound(id.to_string()))?;
        if let Some(container) = state.containers.get_mut(&key) {
            container.started = true;
        }
        Ok(())
    }

    async fn wait_container(&self, id: &str) -> StagehandResult<i64> {
        let state = self.record(format!("wait {id}"));
        state
            .container_key(id)
            .ok_or_else(|| StagehandError::ContainerNotFound(id.to_string()))?;
        match &self.wait_error {
            Some(stderr) => Err(StagehandError::engine("wait container", stderr.clone())),
            None => Ok(self.exit_code),
        }
    }

    async fn container_logs(&self, id: &str) -> StagehandResult<ContainerLogs> {
        let state = self.record(format!("logs {id}"));
        state
            .container_key(id)
            .ok_or_else(|| StagehandError::ContainerNotFound(id.to_string()))?;
        Ok(self.logs.clone())
    }

    async fn inspect_container(&self, id: &str) -> StagehandResult<ContainerDetails> {
        let state = self.record(format!("inspect {id}"));
        let key = state
            .container_key(id)
            .ok_or_else(|| StagehandError::ContainerNotFound(id.to_string()))?;
        let container = &state.containers[&key];

        let ports = if container.spec.publish_all {
            container
                .spec
                .exposed_ports
                .iter()
                .map(|port| {
                    let binding = PortBinding {
                        host_ip: "0.0.0.0".to_string(),
                        host_port: HOST_PORT.to_string(),
                    };
                    (port.clone(), Some(vec![binding]))
                })
                .collect()
        } else {
            HashMap::new()
        };
        let networks = container
            .networks
            .iter()
            .enumerate()
            .map(|(i, name)| {
                let endpoint = EndpointSettings {
                    ip_address: format!("172.18.0.{}", i + 2),
                    network_id: String::new(),
                };
                (name.clone(), endpoint)
            })
            .collect();

        Ok(ContainerDetails {
            id: container.id.clone(),
            name: format!("/{}", container.spec.name),
            network_settings: NetworkSettings { ports, networks },
        })
    }

    async fn remove_container(&self, id: &str, force: bool) -> StagehandResult<()> {
        let mut state = self.record(format!("remove {id} force={force}"));
        let key = state
            .container_key(id)
            .ok_or_else(|| StagehandError::ContainerNotFound(id.to_string()))?;
        state.containers.remove(&key);
        Ok(())
    }

    async fn list_networks(&self) -> StagehandResult<Vec<NetworkSummary>> {
        let state = self.record("network ls".to_string());
        Ok(state
            .networks
            .values()
            .map(|n| NetworkSummary {
                id: n.id.clone(),
                name: n.name.clone(),
            })
            .collect())
    }

    async fn create_network(
        &self,
        name: &str,
        driver: &str,
        internal: bool,
    ) -> StagehandResult<String> {
        let mut state = self.record(format!("network create {name}"));
        let id = state.next_id("n");
        state.networks.insert(
            id.clone(),
            FakeNetwork {
                id: id.clone(),
                name: name.to_string(),
                driver: driver.to_string(),
                internal,
            },
        );
        Ok(id)
    }

    async fn connect_network(&self, network_id: &str, container: &str) -> StagehandResult<()> {
        let mut state = self.record(format!("network connect {network_id} {container}"));
        let name = state
            .network_name(network_id)
            .ok_or_else(|| StagehandError::NetworkNotFound(network_id.to_string()))?;
        let key = state
            .container_key(container)
            .ok_or_else(|| StagehandError::ContainerNotFound(container.to_string()))?;
        if let Some(container) = state.containers.get_mut(&key) {
            container.networks.push(name);
        }
        Ok(())
    }

    async fn remove_network(&self, network_id: &str) -> StagehandResult<()> {
        let mut state = self.record(format!("network rm {network_id}"));
        let name = state
            .network_name(network_id)
            .ok_or_else(|| StagehandError::NetworkNotFound(network_id.to_string()))?;
        if state.containers.values().any(|c| c.networks.contains(&name)) {
            return Err(StagehandError::NetworkInUse(name));
        }
        state.networks.remove(network_id);
        Ok(())
    }
}
