use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use crate::logs::LogSink;

/// Bytes of container stderr kept for crash diagnostics.
pub const DIAGNOSTIC_TAIL_BYTES: usize = 4096;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContainerId(pub String);

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Short form, like `docker ps`
        let short: String = self.0.chars().take(12).collect();
        f.write_str(&short)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mount {
    pub host_path: PathBuf,
    pub container_path: String,
    pub read_only: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ContainerSpec {
    pub image: String,
    /// Replaces the image entrypoint; the first element is the executable.
    pub entrypoint: Option<Vec<String>>,
    pub command: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub mounts: Vec<Mount>,
    /// Ports published on the same number on the host.
    pub published_ports: Vec<u16>,
    pub memory_limit_mb: Option<u32>,
    pub network: Option<String>,
    pub labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct ContainerOutput {
    pub exit_code: i64,
    pub stdout: Bytes,
    /// Last [`DIAGNOSTIC_TAIL_BYTES`] of stderr.
    pub stderr_tail: String,
}

/// The subset of a container engine the invoker needs.
///
/// `run_attached` launches the created container, writes `stdin` to it, and
/// resolves once the process exits. Dropping the returned future must detach
/// from the container; removal happens through `remove_container`.
#[async_trait]
pub trait ContainerEngine: Send + Sync {
    async fn image_exists(&self, image: &str) -> Result<bool>;
    async fn pull_image(&self, image: &str) -> Result<()>;
    async fn create_container(&self, spec: &ContainerSpec) -> Result<ContainerId>;
    async fn run_attached(
        &self,
        id: &ContainerId,
        stdin: Bytes,
        logs: LogSink,
    ) -> Result<ContainerOutput>;
    async fn remove_container(&self, id: &ContainerId) -> Result<()>;
}

/// Appends a line to a bounded diagnostic tail, dropping the oldest bytes.
pub fn push_tail(tail: &mut String, line: &str) {
    tail.push_str(line);
    tail.push('\n');

    if tail.len() > DIAGNOSTIC_TAIL_BYTES {
        let mut cut = tail.len() - DIAGNOSTIC_TAIL_BYTES;
        while !tail.is_char_boundary(cut) {
            cut += 1;
        }
        tail.drain(..cut);
    }
}
