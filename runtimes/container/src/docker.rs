use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::path::PathBuf;
use std::process::{Output, Stdio};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tracing::{debug, trace};

use crate::engine::{push_tail, ContainerEngine, ContainerId, ContainerOutput, ContainerSpec};
use crate::logs::LogSink;

/// [`ContainerEngine`] backed by the `docker` command line client.
#[derive(Debug, Clone)]
pub struct DockerCli {
    binary: PathBuf,
}

impl DockerCli {
    pub fn new() -> Self {
        Self::with_binary("docker")
    }

    pub fn with_binary(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Server version of the reachable docker daemon.
    pub async fn version(&self) -> Result<String> {
        let output = self
            .run(&["version", "--format", "{{.Server.Version}}"])
            .await?;
        check_status(&output, "docker version")?;
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    async fn run(&self, args: &[&str]) -> Result<Output> {
        trace!("{} {}", self.binary.display(), args.join(" "));
        Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("failed to run {}", self.binary.display()))
    }
}

impl Default for DockerCli {
    fn default() -> Self {
        Self::new()
    }
}

fn check_status(output: &Output, what: &str) -> Result<()> {
    if output.status.success() {
        return Ok(());
    }
    bail!(
        "{} failed ({}): {}",
        what,
        output.status,
        String::from_utf8_lossy(&output.stderr).trim()
    )
}

/// Arguments for `docker create` from a spec.
pub fn create_args(spec: &ContainerSpec) -> Vec<String> {
    let mut args = vec!["create".to_string(), "--interactive".to_string()];

    for (key, value) in &spec.env {
        args.push("--env".to_string());
        args.push(format!("{}={}", key, value));
    }

    for mount in &spec.mounts {
        let mut volume = format!("{}:{}", mount.host_path.display(), mount.container_path);
        if mount.read_only {
            volume.push_str(":ro");
        }
        args.push("--volume".to_string());
        args.push(volume);
    }

    for port in &spec.published_ports {
        args.push("--publish".to_string());
        args.push(format!("{}:{}", port, port));
    }

    if let Some(memory) = spec.memory_limit_mb {
        args.push("--memory".to_string());
        args.push(format!("{}m", memory));
    }

    if let Some(network) = &spec.network {
        args.push("--network".to_string());
        args.push(network.clone());
    }

    for (key, value) in &spec.labels {
        args.push("--label".to_string());
        args.push(format!("{}={}", key, value));
    }

    // `--entrypoint` only takes the executable, the rest go after the image
    let mut trailing = Vec::new();
    if let Some((executable, rest)) = spec.entrypoint.as_ref().and_then(|e| e.split_first()) {
        args.push("--entrypoint".to_string());
        args.push(executable.clone());
        trailing.extend(rest.iter().cloned());
    }

    args.push(spec.image.clone());
    args.extend(trailing);
    args.extend(spec.command.iter().cloned());
    args
}

#[async_trait]
impl ContainerEngine for DockerCli {
    async fn image_exists(&self, image: &str) -> Result<bool> {
        let output = self
            .run(&["image", "inspect", "--format", "{{.Id}}", image])
            .await?;
        Ok(output.status.success())
    }

    async fn pull_image(&self, image: &str) -> Result<()> {
        let output = self.run(&["pull", image]).await?;
        check_status(&output, "docker pull")
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<ContainerId> {
        let args = create_args(spec);
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        let output = self.run(&args).await?;
        check_status(&output, "docker create")?;

        let id = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if id.is_empty() {
            bail!("docker create returned no container id");
        }
        Ok(ContainerId(id))
    }

    async fn run_attached(
        &self,
        id: &ContainerId,
        stdin: Bytes,
        logs: LogSink,
    ) -> Result<ContainerOutput> {
        let mut child = Command::new(&self.binary)
            .args(["start", "--attach", "--interactive", id.0.as_str()])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to run {}", self.binary.display()))?;

        let mut child_stdin = child.stdin.take().ok_or_else(|| anyhow!("stdin not captured"))?;
        let mut child_stdout = child.stdout.take().ok_or_else(|| anyhow!("stdout not captured"))?;
        let child_stderr = child.stderr.take().ok_or_else(|| anyhow!("stderr not captured"))?;

        let write_payload = async move {
            child_stdin.write_all(&stdin).await?;
            child_stdin.shutdown().await
        };

        let read_stdout = async move {
            let mut buffer = Vec::new();
            child_stdout.read_to_end(&mut buffer).await.map(|_| buffer)
        };

        // Read raw bytes to EOF; closing the pipe early would SIGPIPE the function
        let read_stderr = async move {
            let mut tail = String::new();
            let mut reader = BufReader::new(child_stderr);
            let mut buffer = Vec::new();
            loop {
                buffer.clear();
                match reader.read_until(b'\n', &mut buffer).await {
                    Ok(0) => break,
                    Ok(_) => {
                        let line = String::from_utf8_lossy(&buffer);
                        let line = line.trim_end_matches(&['\n', '\r'][..]);
                        push_tail(&mut tail, line);
                        logs.write_line(line);
                    }
                    Err(e) => {
                        debug!("Stopped reading stderr of container {}: {}", id, e);
                        break;
                    }
                }
            }
            tail
        };

        let (written, stdout, stderr_tail) = tokio::join!(write_payload, read_stdout, read_stderr);
        if let Err(e) = written {
            // The process may exit without reading its input
            debug!("Could not write payload to container {}: {}", id, e);
        }
        let stdout = stdout.context("failed to read container output")?;
        let status = child.wait().await.context("failed to wait for container")?;

        Ok(ContainerOutput {
            exit_code: status.code().map(i64::from).unwrap_or(-1),
            stdout: Bytes::from(stdout),
            stderr_tail,
        })
    }

    async fn remove_container(&self, id: &ContainerId) -> Result<()> {
        let output = self.run(&["rm", "--force", "--volumes", id.0.as_str()]).await?;
        check_status(&output, "docker rm")
    }
}
