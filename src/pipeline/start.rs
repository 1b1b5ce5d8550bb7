//! Start: run the staged droplet

use super::{env_list, merge_env, Backend, Logs, Stack};
use crate::engine::ContainerSpec;
use crate::error::{StagehandError, StagehandResult};
use crate::lifecycle::LIFECYCLE_PREFIX;
use crate::network::{EGRESS_NETWORK, INTERNAL_NETWORK};
use serde_json::json;
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Port every app listens on inside its container
pub const APP_PORT: u16 = 8080;

/// Memory limit advertised to the app, in megabytes
const MEMORY_LIMIT_MB: u64 = 1024;

const USER: &str = "vcap";
const HOME: &str = "/home/vcap";

#[derive(Clone)]
pub struct Start {
    backend: Backend,
    stack: Stack,
    env: BTreeMap<String, String>,
    services: BTreeMap<String, serde_json::Value>,
}

impl Start {
    pub fn new(backend: Backend) -> Self {
        Self {
            backend,
            stack: Stack::default(),
            env: BTreeMap::new(),
            services: BTreeMap::new(),
        }
    }

    pub fn with_env<I, K, V>(&self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut start = self.clone();
        merge_env(&mut start.env, vars);
        start
    }

    /// Bind user-provided services, by name, with their credentials
    pub fn with_services<I, S>(&self, services: I) -> Self
    where
        I: IntoIterator<Item = (S, serde_json::Value)>,
        S: Into<String>,
    {
        let mut start = self.clone();
        start
            .services
            .extend(services.into_iter().map(|(name, creds)| (name.into(), creds)));
        start
    }

    pub fn with_stack(&self, stack: Stack) -> Self {
        Self {
            stack,
            ..self.clone()
        }
    }

    /// Launch `name` with `command` and return its external and internal URLs
    pub async fn run(
        &self,
        logs: &Logs,
        name: &str,
        command: &str,
    ) -> StagehandResult<(String, String)> {
        let engine = &self.backend.engine;
        let workspace = &self.backend.workspace;

        let droplet = workspace.droplet(name);
        if !droplet.is_file() {
            return Err(StagehandError::PathNotFound(droplet));
        }

        logs.line(&format!("-----> Starting {name}"));
        let spec = self.app_spec(name, command);
        let id = engine.create_container(&spec).await?;
        debug!("Created app container {} for {}", id, name);

        engine
            .copy_to_container(&id, "/", &workspace.lifecycle_tarball())
            .await?;
        engine.copy_to_container(&id, HOME, &droplet).await?;

        self.backend.networks.connect(&id, EGRESS_NETWORK).await?;
        engine.start_container(&id).await?;

        let details = engine.inspect_container(&id).await?;
        let port = format!("{APP_PORT}/tcp");
        let host_port = details
            .host_port(&port)
            .ok_or_else(|| StagehandError::ContainerInspect {
                container: name.to_string(),
                reason: format!("no host port published for {port}"),
            })?;
        let ip = details
            .ip_address(INTERNAL_NETWORK)
            .ok_or_else(|| StagehandError::ContainerInspect {
                container: name.to_string(),
                reason: format!("no address on network {INTERNAL_NETWORK}"),
            })?;

        let external = format!("http://localhost:{host_port}");
        let internal = format!("http://{ip}:{APP_PORT}");
        info!("Started {} at {} ({})", name, external, internal);
        Ok((external, internal))
    }

    fn app_spec(&self, name: &str, command: &str) -> ContainerSpec {
        ContainerSpec {
            name: name.to_string(),
            image: self.stack.image.clone(),
            command: vec![
                format!("{LIFECYCLE_PREFIX}/launcher"),
                format!("{HOME}/app"),
                command.to_string(),
                String::new(),
            ],
            user: USER.to_string(),
            env: env_list(&self.environment(name)),
            workdir: HOME.to_string(),
            exposed_ports: vec![format!("{APP_PORT}/tcp")],
            network: INTERNAL_NETWORK.to_string(),
            publish_all: true,
        }
    }

    /// Platform variables, overridden by caller variables, with the port pinned
    fn environment(&self, name: &str) -> BTreeMap<String, String> {
        let application = json!({
            "application_name": name,
            "name": name,
            "process_type": "web",
            "limits": { "mem": MEMORY_LIMIT_MB },
        });

        let mut env = BTreeMap::new();
        env.insert("LANG".to_string(), "en_US.UTF-8".to_string());
        env.insert("MEMORY_LIMIT".to_string(), format!("{MEMORY_LIMIT_MB}m"));
        env.insert("PORT".to_string(), APP_PORT.to_string());
        env.insert("VCAP_APPLICATION".to_string(), application.to_string());
        env.insert("VCAP_SERVICES".to_string(), self.vcap_services());
        env.insert("VCAP_PLATFORM_OPTIONS".to_string(), "{}".to_string());

        merge_env(&mut env, self.env.clone());
        env.insert("PORT".to_string(), APP_PORT.to_string());
        env
    }

    fn vcap_services(&self) -> String {
        if self.services.is_empty() {
            return "{}".to_string();
        }
        let bindings: Vec<_> = self
            .services
            .iter()
            .map(|(name, credentials)| {
                json!({
                    "name": name,
                    "label": "user-provided",
                    "tags": [],
                    "credentials": credentials,
                })
            })
            .collect();
        json!({ "user-provided": bindings }).to_string()
    }
}
