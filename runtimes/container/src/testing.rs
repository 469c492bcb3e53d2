//! In-memory [`ContainerEngine`] for exercising the invocation pipeline
//! without a docker daemon.

use anyhow::{bail, Result};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::engine::{push_tail, ContainerEngine, ContainerId, ContainerOutput, ContainerSpec};
use crate::logs::LogSink;

type Responder = Arc<dyn Fn(&Bytes, &BTreeMap<String, String>) -> String + Send + Sync>;

/// What a container does once it is run.
#[derive(Clone)]
pub enum Behavior {
    /// Prints a JSON document holding the payload and the environment.
    Echo,
    /// Prints whatever the closure returns and exits 0.
    Respond(Responder),
    /// Never exits.
    Hang,
    /// Exits with `exit_code`, writing `stderr` and nothing on stdout.
    Crash { exit_code: i64, stderr: String },
}

fn echo_document(stdin: &Bytes, env: &BTreeMap<String, String>) -> String {
    serde_json::json!({
        "payload": String::from_utf8_lossy(stdin),
        "env": env,
    })
    .to_string()
}

impl Behavior {
    pub fn respond<F>(f: F) -> Self
    where
        F: Fn(&Bytes, &BTreeMap<String, String>) -> String + Send + Sync + 'static,
    {
        Behavior::Respond(Arc::new(f))
    }
}

pub struct ScriptedEngine {
    behavior: Behavior,
    cached_images: Mutex<HashSet<String>>,
    fail_pull: bool,
    fail_create: bool,
    latency: Option<Duration>,
    pull_latency: Option<Duration>,
    specs: Mutex<HashMap<ContainerId, ContainerSpec>>,
    removed_ids: Mutex<Vec<ContainerId>>,
    created: AtomicUsize,
    runs: AtomicUsize,
    removed: AtomicUsize,
    pulls: AtomicUsize,
}

impl ScriptedEngine {
    pub fn new(behavior: Behavior) -> Self {
        Self {
            behavior,
            cached_images: Mutex::new(HashSet::new()),
            fail_pull: false,
            fail_create: false,
            latency: None,
            pull_latency: None,
            specs: Mutex::new(HashMap::new()),
            removed_ids: Mutex::new(Vec::new()),
            created: AtomicUsize::new(0),
            runs: AtomicUsize::new(0),
            removed: AtomicUsize::new(0),
            pulls: AtomicUsize::new(0),
        }
    }

    pub fn with_cached_image(self, image: impl Into<String>) -> Self {
        self.cached_images.lock().insert(image.into());
        self
    }

    pub fn failing_pull(mut self) -> Self {
        self.fail_pull = true;
        self
    }

    pub fn failing_create(mut self) -> Self {
        self.fail_create = true;
        self
    }

    /// Delay before a run produces its output.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Delay before a pull completes.
    pub fn with_pull_latency(mut self, latency: Duration) -> Self {
        self.pull_latency = Some(latency);
        self
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }

    pub fn removed(&self) -> usize {
        self.removed.load(Ordering::SeqCst)
    }

    pub fn pulls(&self) -> usize {
        self.pulls.load(Ordering::SeqCst)
    }

    pub fn removed_ids(&self) -> Vec<ContainerId> {
        self.removed_ids.lock().clone()
    }

    pub fn spec_for(&self, id: &ContainerId) -> Option<ContainerSpec> {
        self.specs.lock().get(id).cloned()
    }

    /// Every `ContainerSpec` passed to `create`, in no particular order.
    pub fn specs(&self) -> Vec<ContainerSpec> {
        self.specs.lock().values().cloned().collect()
    }
}

#[async_trait]
impl ContainerEngine for ScriptedEngine {
    async fn image_exists(&self, image: &str) -> Result<bool> {
        Ok(self.cached_images.lock().contains(image))
    }

    async fn pull_image(&self, image: &str) -> Result<()> {
        self.pulls.fetch_add(1, Ordering::SeqCst);
        if let Some(latency) = self.pull_latency {
            tokio::time::sleep(latency).await;
        }
        if self.fail_pull {
            bail!("pull access denied for {}", image);
        }
        self.cached_images.lock().insert(image.to_string());
        Ok(())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<ContainerId> {
        if self.fail_create {
            bail!("Cannot connect to the Docker daemon");
        }
        let n = self.created.fetch_add(1, Ordering::SeqCst);
        let id = ContainerId(format!("{:064x}", n + 1));
        self.specs.lock().insert(id.clone(), spec.clone());
        Ok(id)
    }

    async fn run_attached(
        &self,
        id: &ContainerId,
        stdin: Bytes,
        logs: LogSink,
    ) -> Result<ContainerOutput> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        let Some(spec) = self.spec_for(id) else {
            bail!("No such container: {}", id.0);
        };

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let mut tail = String::new();
        let start_line = format!("START {}", id);
        push_tail(&mut tail, &start_line);
        logs.write_line(start_line);

        match &self.behavior {
            Behavior::Echo => Ok(ContainerOutput {
                exit_code: 0,
                stdout: Bytes::from(echo_document(&stdin, &spec.env)),
                stderr_tail: tail,
            }),
            Behavior::Respond(responder) => Ok(ContainerOutput {
                exit_code: 0,
                stdout: Bytes::from(responder(&stdin, &spec.env)),
                stderr_tail: tail,
            }),
            Behavior::Hang => std::future::pending().await,
            Behavior::Crash { exit_code, stderr } => {
                for line in stderr.lines() {
                    push_tail(&mut tail, line);
                    logs.write_line(line);
                }
                Ok(ContainerOutput {
                    exit_code: *exit_code,
                    stdout: Bytes::new(),
                    stderr_tail: tail,
                })
            }
        }
    }

    async fn remove_container(&self, id: &ContainerId) -> Result<()> {
        self.removed.fetch_add(1, Ordering::SeqCst);
        self.removed_ids.lock().push(id.clone());
        Ok(())
    }
}
