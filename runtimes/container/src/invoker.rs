use bytes::Bytes;
use dashmap::DashMap;
use sam_local_shared::ContainerError;
use std::collections::BTreeMap;
use std::ops::Deref;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    engine::{ContainerEngine, ContainerSpec, Mount},
    logs::LogSink,
    session::{ContainerSession, SessionRequest},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullPolicy {
    /// Pull on every start; a failed pull is fine if the image is cached.
    Always,
    IfNotPresent,
    Never,
}

#[derive(Debug, Clone)]
pub struct InvokerConfig {
    pub pull_policy: PullPolicy,
    pub network: Option<String>,
    /// Where the function code is mounted inside the container.
    pub code_mount_target: String,
}

impl Default for InvokerConfig {
    fn default() -> Self {
        Self {
            pull_policy: PullPolicy::IfNotPresent,
            network: None,
            code_mount_target: "/var/task".to_string(),
        }
    }
}

/// Raw stdout of a container that ran to completion.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub stdout: Bytes,
    pub duration: Duration,
}

/// Starts, feeds and tears down per-invocation containers.
///
/// Cheap to clone; clones share the engine handle and the active session set.
#[derive(Clone)]
pub struct ContainerInvoker {
    engine: Arc<dyn ContainerEngine>,
    config: Arc<InvokerConfig>,
    logs: LogSink,
    active: Arc<DashMap<Uuid, ContainerSession>>,
}

impl ContainerInvoker {
    pub fn new(engine: Arc<dyn ContainerEngine>, config: InvokerConfig, logs: LogSink) -> Self {
        Self {
            engine,
            config: Arc::new(config),
            logs,
            active: Arc::new(DashMap::new()),
        }
    }

    pub fn config(&self) -> &InvokerConfig {
        &self.config
    }

    /// Sessions started but not yet stopped.
    pub fn active_sessions(&self) -> usize {
        self.active.len()
    }

    /// Provisions a container for one invocation.
    ///
    /// The returned guard stops the container when released, or in the
    /// background if it is dropped without being released.
    pub async fn start(&self, request: SessionRequest) -> Result<SessionGuard, ContainerError> {
        self.prepare_image(&request.image).await?;
        self.create(request).await
    }

    /// Creates the container for `request`, assuming its image is already
    /// available. See [`ContainerInvoker::prepare_image`].
    pub async fn create(&self, request: SessionRequest) -> Result<SessionGuard, ContainerError> {
        let started_at = Instant::now();
        let id = Uuid::new_v4();
        let spec = self.container_spec(id, &request);
        let container_id = self
            .engine
            .create_container(&spec)
            .await
            .map_err(|e| ContainerError::Start {
                image: request.image.clone(),
                reason: e.to_string(),
            })?;

        let session = ContainerSession {
            id,
            container_id,
            image: request.image,
            code_mount: request.code_mount,
            env: request.env,
            debug_port: request.debug_port,
            started_at,
        };
        self.active.insert(id, session.clone());
        metrics::counter!("sam_local_container_starts_total").increment(1);

        debug!(
            "Started container {} from {} in {:?}",
            session.container_id,
            session.image,
            started_at.elapsed()
        );

        Ok(SessionGuard {
            invoker: self.clone(),
            session,
            armed: true,
        })
    }

    /// Delivers `payload` to the session and waits up to `deadline` for it to
    /// finish.
    pub async fn send(
        &self,
        session: &ContainerSession,
        payload: Bytes,
        deadline: Duration,
    ) -> Result<RawResponse, ContainerError> {
        let started = Instant::now();
        let run = self
            .engine
            .run_attached(&session.container_id, payload, self.logs.clone());

        match timeout(deadline, run).await {
            Err(_) => {
                metrics::counter!("sam_local_container_timeouts_total").increment(1);
                warn!(
                    "Container {} did not finish within {:?}",
                    session.container_id, deadline
                );
                Err(ContainerError::Timeout(deadline))
            }
            Ok(Err(e)) => Err(ContainerError::Engine(e.to_string())),
            Ok(Ok(output)) => {
                let responded = output.stdout.iter().any(|b| !b.is_ascii_whitespace());

                if output.exit_code != 0 || !responded {
                    metrics::counter!("sam_local_container_crashes_total").increment(1);
                    warn!(
                        "Container {} exited with code {} ({} bytes of output)",
                        session.container_id,
                        output.exit_code,
                        output.stdout.len()
                    );
                    return Err(ContainerError::Crash {
                        exit_code: output.exit_code,
                        stdout: output.stdout,
                        diagnostics: output.stderr_tail,
                    });
                }

                Ok(RawResponse {
                    stdout: output.stdout,
                    duration: started.elapsed(),
                })
            }
        }
    }

    /// Removes the session's container. Stopping a session twice is a no-op;
    /// engine errors are logged and swallowed.
    pub async fn stop(&self, session: &ContainerSession) {
        if self.active.remove(&session.id).is_none() {
            debug!("Session {} already stopped", session.id);
            return;
        }

        match self.engine.remove_container(&session.container_id).await {
            Ok(()) => debug!(
                "Removed container {} after {:?}",
                session.container_id,
                session.started_at.elapsed()
            ),
            Err(e) => warn!("Failed to remove container {}: {}", session.container_id, e),
        }
        metrics::counter!("sam_local_container_stops_total").increment(1);
    }

    /// Makes `image` available locally according to the pull policy.
    pub async fn prepare_image(&self, image: &str) -> Result<(), ContainerError> {
        let start_error = |reason: String| ContainerError::Start {
            image: image.to_string(),
            reason,
        };

        match self.config.pull_policy {
            PullPolicy::Never => Ok(()),
            PullPolicy::IfNotPresent => {
                if self.engine.image_exists(image).await.unwrap_or(false) {
                    return Ok(());
                }
                info!("Fetching {} image...", image);
                self.engine
                    .pull_image(image)
                    .await
                    .map_err(|e| start_error(format!("image pull failed: {}", e)))
            }
            PullPolicy::Always => {
                info!("Fetching {} image...", image);
                let Err(e) = self.engine.pull_image(image).await else {
                    return Ok(());
                };

                if self.engine.image_exists(image).await.unwrap_or(false) {
                    warn!("Could not pull {}, using cached image: {}", image, e);
                    Ok(())
                } else {
                    Err(start_error(format!("image pull failed: {}", e)))
                }
            }
        }
    }

    fn container_spec(&self, session_id: Uuid, request: &SessionRequest) -> ContainerSpec {
        let mut labels = BTreeMap::new();
        labels.insert("sam-local.session".to_string(), session_id.to_string());

        ContainerSpec {
            image: request.image.clone(),
            entrypoint: request.entrypoint.clone(),
            command: request.command.clone(),
            env: request.env.clone(),
            mounts: vec![Mount {
                host_path: request.code_mount.clone(),
                container_path: self.config.code_mount_target.clone(),
                read_only: true,
            }],
            published_ports: request.debug_port.into_iter().collect(),
            memory_limit_mb: request.memory_limit_mb,
            network: self.config.network.clone(),
            labels,
        }
    }
}

/// Scoped ownership of a [`ContainerSession`].
pub struct SessionGuard {
    invoker: ContainerInvoker,
    session: ContainerSession,
    armed: bool,
}

impl SessionGuard {
    pub async fn release(mut self) {
        self.invoker.stop(&self.session).await;
        self.armed = false;
    }
}

impl Deref for SessionGuard {
    type Target = ContainerSession;

    fn deref(&self) -> &ContainerSession {
        &self.session
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        let invoker = self.invoker.clone();
        let session = self.session.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                debug!("Session {} dropped without release, stopping in background", session.id);
                handle.spawn(async move {
                    invoker.stop(&session).await;
                });
            }
            Err(_) => warn!(
                "Container {} leaked: no runtime available to remove it",
                session.container_id
            ),
        }
    }
}
