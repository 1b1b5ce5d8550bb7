//! Container engine driven through the docker/podman command line

use super::{ContainerDetails, ContainerEngine, ContainerLogs, ContainerSpec, NetworkSummary};
use crate::error::{StagehandError, StagehandResult};
use crate::process;
use async_trait::async_trait;
use std::path::Path;
use std::process::{Output, Stdio};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info};

/// Engine backed by a docker-compatible CLI binary
pub struct CliEngine {
    binary: String,
}

impl CliEngine {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    fn command(&self, args: &[&str]) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    /// Execute an engine command and return the output
    async fn exec(&self, args: &[&str]) -> StagehandResult<Output> {
        debug!("Executing: {} {:?}", self.binary, args);

        self.command(args)
            .output()
            .await
            .map_err(|e| StagehandError::command_failed(format!("{} {:?}", self.binary, args), e))
    }

    /// Execute and fail with the operation name on a non-zero exit
    async fn exec_ok(&self, operation: &str, args: &[&str]) -> StagehandResult<Output> {
        let output = self.exec(args).await?;
        if output.status.success() {
            Ok(output)
        } else {
            Err(StagehandError::engine(operation, stderr_of(&output)))
        }
    }
}

fn stderr_of(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).trim().to_string()
}

fn stdout_of(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

fn is_missing(stderr: &str, kind: &str) -> bool {
    let stderr = stderr.to_lowercase();
    stderr.contains(&format!("no such {kind}"))
        || stderr.contains(&format!("no {kind} with"))
        || stderr.contains("not found")
}

fn is_in_use(stderr: &str) -> bool {
    let stderr = stderr.to_lowercase();
    stderr.contains("active endpoints")
        || stderr.contains("in use")
        || stderr.contains("being used")
}

/// Classify a failed container operation
fn container_error(operation: &str, id: &str, output: &Output) -> StagehandError {
    let stderr = stderr_of(output);
    if is_missing(&stderr, "container") {
        StagehandError::ContainerNotFound(id.to_string())
    } else {
        StagehandError::engine(operation, stderr)
    }
}

/// Parse `network ls --format '{{.ID}}\t{{.Name}}'` output
fn parse_networks(stdout: &str) -> Vec<NetworkSummary> {
    stdout
        .lines()
        .filter_map(|line| {
            let (id, name) = line.trim().split_once('\t')?;
            Some(NetworkSummary {
                id: id.to_string(),
                name: name.to_string(),
            })
        })
        .collect()
}

/// Arguments of `create` for a container spec
fn create_args(spec: &ContainerSpec) -> Vec<String> {
    let mut args = vec!["create".to_string()];

    if !spec.name.is_empty() {
        args.push("--name".to_string());
        args.push(spec.name.clone());
    }
    if !spec.user.is_empty() {
        args.push("--user".to_string());
        args.push(spec.user.clone());
    }
    if !spec.workdir.is_empty() {
        args.push("--workdir".to_string());
        args.push(spec.workdir.clone());
    }
    if !spec.network.is_empty() {
        args.push("--network".to_string());
        args.push(spec.network.clone());
    }
    for var in &spec.env {
        args.push("--env".to_string());
        args.push(var.clone());
    }
    for port in &spec.exposed_ports {
        args.push("--expose".to_string());
        args.push(port.clone());
    }
    if spec.publish_all {
        args.push("--publish-all".to_string());
    }

    args.push(spec.image.clone());
    args.extend(spec.command.iter().cloned());
    args
}

#[async_trait]
impl ContainerEngine for CliEngine {
    fn name(&self) -> &str {
        &self.binary
    }

    async fn pull_image(
        &self,
        image: &str,
        on_progress: &(dyn Fn(String) + Send + Sync),
    ) -> StagehandResult<()> {
        info!("Pulling image: {}", image);

        let mut child = self
            .command(&["pull", image])
            .spawn()
            .map_err(|e| StagehandError::command_failed(format!("{} pull", self.binary), e))?;
        let lines = process::stream_child_output(&mut child, on_progress).await;
        let status = child
            .wait()
            .await
            .map_err(|e| StagehandError::command_failed(format!("{} pull", self.binary), e))?;

        if status.success() {
            Ok(())
        } else {
            Err(StagehandError::ImagePull {
                image: image.to_string(),
                reason: process::error_output(&lines.join("\n"), ""),
            })
        }
    }

    async fn create_container(&self, spec: &ContainerSpec) -> StagehandResult<String> {
        let args = create_args(spec);
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        let output = self.exec_ok("create container", &args).await?;

        let id = stdout_of(&output);
        debug!("Created container {} ({})", spec.name, id);
        Ok(id)
    }

    async fn copy_to_container(
        &self,
        id: &str,
        dest: &str,
        archive: &Path,
    ) -> StagehandResult<()> {
        debug!("Copying {} into {}:{}", archive.display(), id, dest);

        let target = format!("{id}:{dest}");
        let mut file = tokio::fs::File::open(archive)
            .await
            .map_err(|e| StagehandError::io(format!("opening {}", archive.display()), e))?;

        let mut cmd = self.command(&["cp", "-", &target]);
        cmd.stdin(Stdio::piped());
        let mut child = cmd
            .spawn()
            .map_err(|e| StagehandError::command_failed(format!("{} cp", self.binary), e))?;

        if let Some(mut stdin) = child.stdin.take() {
            tokio::io::copy(&mut file, &mut stdin)
                .await
                .map_err(|e| StagehandError::io(format!("streaming {}", archive.display()), e))?;
            stdin
                .shutdown()
                .await
                .map_err(|e| StagehandError::io("closing copy stream", e))?;
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| StagehandError::command_failed(format!("{} cp", self.binary), e))?;
        if output.status.success() {
            Ok(())
        } else {
            Err(container_error("copy to container", id, &output))
        }
    }

    async fn copy_from_container(&self, id: &str, src: &str) -> StagehandResult<Vec<u8>> {
        let source = format!("{id}:{src}");
        let output = self.exec(&["cp", &source, "-"]).await?;
        if output.status.success() {
            Ok(output.stdout)
        } else {
            Err(container_error("copy from container", id, &output))
        }
    }

    async fn start_container(&self, id: &str) -> StagehandResult<()> {
        let output = self.exec(&["start", id]).await?;
        if output.status.success() {
            Ok(())
        } else {
            Err(container_error("start container", id, &output))
        }
    }

    async fn wait_container(&self, id: &str) -> StagehandResult<i64> {
        let output = self.exec(&["wait", id]).await?;
        if !output.status.success() {
            return Err(container_error("wait container", id, &output));
        }

        let stdout = stdout_of(&output);
        stdout
            .lines()
            .last()
            .and_then(|line| line.trim().parse().ok())
            .ok_or_else(|| {
                StagehandError::engine("wait container", format!("unexpected exit status: {stdout}"))
            })
    }

    async fn container_logs(&self, id: &str) -> StagehandResult<ContainerLogs> {
        let output = self.exec(&["logs", id]).await?;
        if !output.status.success() {
            return Err(container_error("container logs", id, &output));
        }
        Ok(ContainerLogs {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    async fn inspect_container(&self, id: &str) -> StagehandResult<ContainerDetails> {
        let output = self.exec(&["inspect", "--type", "container", id]).await?;
        if !output.status.success() {
            return Err(container_error("inspect container", id, &output));
        }

        let mut details: Vec<ContainerDetails> = serde_json::from_slice(&output.stdout)
            .map_err(|e| StagehandError::ContainerInspect {
                container: id.to_string(),
                reason: e.to_string(),
            })?;
        details.pop().ok_or_else(|| StagehandError::ContainerInspect {
            container: id.to_string(),
            reason: "empty inspect result".to_string(),
        })
    }

    async fn remove_container(&self, id: &str, force: bool) -> StagehandResult<()> {
        debug!("Removing container: {}", id);

        let args: &[&str] = if force { &["rm", "-f", id] } else { &["rm", id] };
        let output = self.exec(args).await?;
        if output.status.success() {
            Ok(())
        } else {
            Err(container_error("remove container", id, &output))
        }
    }

    async fn list_networks(&self) -> StagehandResult<Vec<NetworkSummary>> {
        let output = self
            .exec_ok(
                "list networks",
                &["network", "ls", "--no-trunc", "--format", "{{.ID}}\t{{.Name}}"],
            )
            .await?;
        Ok(parse_networks(&String::from_utf8_lossy(&output.stdout)))
    }

    async fn create_network(
        &self,
        name: &str,
        driver: &str,
        internal: bool,
    ) -> StagehandResult<String> {
        let mut args = vec!["network", "create", "--driver", driver];
        if internal {
            args.push("--internal");
        }
        args.push(name);

        let output = self.exec_ok("create network", &args).await?;
        Ok(stdout_of(&output))
    }

    async fn connect_network(&self, network_id: &str, container: &str) -> StagehandResult<()> {
        let output = self.exec(&["network", "connect", network_id, container]).await?;
        if output.status.success() {
            return Ok(());
        }

        let stderr = stderr_of(&output);
        if is_missing(&stderr, "network") {
            Err(StagehandError::NetworkNotFound(network_id.to_string()))
        } else if is_missing(&stderr, "container") {
            Err(StagehandError::ContainerNotFound(container.to_string()))
        } else {
            Err(StagehandError::engine("connect network", stderr))
        }
    }

    async fn remove_network(&self, network_id: &str) -> StagehandResult<()> {
        let output = self.exec(&["network", "rm", network_id]).await?;
        if output.status.success() {
            return Ok(());
        }

        let stderr = stderr_of(&output);
        if is_in_use(&stderr) {
            Err(StagehandError::NetworkInUse(network_id.to_string()))
        } else if is_missing(&stderr, "network") {
            Err(StagehandError::NetworkNotFound(network_id.to_string()))
        } else {
            Err(StagehandError::engine("remove network", stderr))
        }
    }
}
