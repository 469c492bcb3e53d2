use async_trait::async_trait;
use sam_local_container::{ContainerInvoker, SessionRequest};
use sam_local_shared::{
    merge_environment, AdapterError, ContainerError, EnvOverrides, FunctionDescriptor,
    FunctionInvoker, InvocationEvent, InvocationResult,
};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::framing::{self, InvocationContext};
use crate::kind::{RuntimeKind, DEFAULT_IMAGE_REPOSITORY};

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Directory code locations are resolved against.
    pub base_dir: PathBuf,
    /// Skip functions whose code directory does not exist on this host.
    pub check_code_dir: bool,
    pub default_timeout: Duration,
    pub default_memory_mb: u32,
    pub image_repository: String,
    pub region: String,
    /// Debug port applied to functions that do not set their own.
    pub debug_port: Option<u16>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("."),
            check_code_dir: true,
            default_timeout: Duration::from_secs(3),
            default_memory_mb: 128,
            image_repository: DEFAULT_IMAGE_REPOSITORY.to_string(),
            region: "us-east-1".to_string(),
            debug_port: None,
        }
    }
}

/// Host credentials passed through when set.
const FORWARDED_HOST_VARIABLES: [&str; 3] =
    ["AWS_ACCESS_KEY_ID", "AWS_SECRET_ACCESS_KEY", "AWS_SESSION_TOKEN"];

/// Invokes one function in a fresh container per request.
pub struct LambdaRuntime {
    function: Arc<FunctionDescriptor>,
    kind: RuntimeKind,
    image: String,
    code_path: PathBuf,
    environment: BTreeMap<String, String>,
    timeout: Duration,
    memory_mb: u32,
    debug_port: Option<u16>,
    invoker: ContainerInvoker,
}

impl LambdaRuntime {
    pub fn new(
        function: Arc<FunctionDescriptor>,
        invoker: ContainerInvoker,
        config: &RuntimeConfig,
        overrides: &EnvOverrides,
    ) -> Result<Self, AdapterError> {
        Self::with_host_env(function, invoker, config, overrides, |key| std::env::var(key).ok())
    }

    /// Like [`LambdaRuntime::new`] with an explicit host environment lookup.
    pub fn with_host_env<F>(
        function: Arc<FunctionDescriptor>,
        invoker: ContainerInvoker,
        config: &RuntimeConfig,
        overrides: &EnvOverrides,
        host_lookup: F,
    ) -> Result<Self, AdapterError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let kind: RuntimeKind = function.runtime.parse()?;
        let code_path =
            resolve_code_path(&config.base_dir, &function.code_uri, config.check_code_dir)?;

        let timeout = function.overrides.timeout.unwrap_or(config.default_timeout);
        let memory_mb = function.overrides.memory_mb.unwrap_or(config.default_memory_mb);
        let debug_port = function.overrides.debug_port.or(config.debug_port);

        let base = base_environment(&function, config, timeout, memory_mb, &host_lookup);
        let environment = merge_environment(
            &base,
            &function.overrides.environment,
            &host_lookup,
            overrides.for_function(&function.name),
        );

        if debug_port.is_some() && kind.debug_entrypoint(0, memory_mb).is_none() {
            warn!(
                "{} has no debug entrypoint for {}, the port is only published",
                function.name, kind
            );
        }

        debug!(
            "Prepared {} ({}) with {} environment variables, timeout {:?}",
            function.name,
            kind,
            environment.len(),
            timeout
        );

        Ok(Self {
            image: kind.image(&config.image_repository),
            function,
            kind,
            code_path,
            environment,
            timeout,
            memory_mb,
            debug_port,
            invoker,
        })
    }

    pub fn function(&self) -> &FunctionDescriptor {
        &self.function
    }

    pub fn kind(&self) -> RuntimeKind {
        self.kind
    }

    pub fn image(&self) -> &str {
        &self.image
    }

    pub fn code_path(&self) -> &Path {
        &self.code_path
    }

    pub fn environment(&self) -> &BTreeMap<String, String> {
        &self.environment
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn session_request(&self, context: &InvocationContext) -> SessionRequest {
        let mut env = self.environment.clone();
        env.extend(context.environment(self.kind.family()));

        SessionRequest {
            image: self.image.clone(),
            code_mount: self.code_path.clone(),
            env,
            debug_port: self.debug_port,
            entrypoint: self
                .debug_port
                .and_then(|port| self.kind.debug_entrypoint(port, self.memory_mb)),
            command: vec![self.function.handler.clone()],
            memory_limit_mb: Some(self.memory_mb),
        }
    }

    async fn run(&self, event: InvocationEvent) -> InvocationResult {
        if let Err(e) = self.invoker.prepare_image(&self.image).await {
            return self.failure(e);
        }

        // Stamped after the pull: the injected deadline is the one `send` enforces
        let context =
            InvocationContext::new(&event, &self.function.name, self.memory_mb, self.timeout);

        let guard = match self.invoker.create(self.session_request(&context)).await {
            Ok(guard) => guard,
            Err(e) => return self.failure(e),
        };

        let payload = match framing::frame_event(&event, &context) {
            Ok(payload) => payload,
            Err(e) => {
                guard.release().await;
                return InvocationResult::runtime_error(e.to_string());
            }
        };

        let result = match self.invoker.send(&guard, payload, self.timeout).await {
            Ok(raw) => {
                debug!("{} responded in {:?}", self.function.name, raw.duration);
                match framing::unframe(&raw.stdout).and_then(|response| response.into_result()) {
                    Ok(result) => result,
                    Err(e) => match framing::error_message(&raw.stdout) {
                        Some(message) => InvocationResult::runtime_error(message),
                        None => {
                            warn!("{} returned an unusable response: {}", self.function.name, e);
                            InvocationResult::runtime_error(e.to_string())
                        }
                    },
                }
            }
            Err(ContainerError::Timeout(deadline)) => {
                // Teardown proceeds in the background; the client is not kept waiting
                tokio::spawn(guard.release());
                return InvocationResult::timed_out(deadline);
            }
            Err(e) => self.failure(e),
        };

        guard.release().await;
        result
    }

    fn failure(&self, error: ContainerError) -> InvocationResult {
        match error {
            ContainerError::Timeout(deadline) => InvocationResult::timed_out(deadline),
            ContainerError::Crash {
                exit_code,
                stdout,
                diagnostics,
            } => {
                if !diagnostics.is_empty() {
                    warn!("{} crashed:\n{}", self.function.name, diagnostics.trim_end());
                }
                match framing::error_message(&stdout) {
                    Some(message) => InvocationResult::runtime_error(message),
                    None => InvocationResult::runtime_error(format!(
                        "Function {} exited with code {} before responding",
                        self.function.name, exit_code
                    )),
                }
            }
            e @ (ContainerError::Start { .. } | ContainerError::Engine(_)) => {
                warn!("Could not run {}: {}", self.function.name, e);
                InvocationResult::infrastructure_error(e.to_string())
            }
        }
    }
}

#[async_trait]
impl FunctionInvoker for LambdaRuntime {
    async fn invoke(&self, event: InvocationEvent) -> InvocationResult {
        let started = Instant::now();
        let request_id = event.request_id;

        let result = self.run(event).await;

        let elapsed = started.elapsed();
        metrics::counter!("sam_local_invocations_total", "outcome" => result.outcome.as_str())
            .increment(1);
        metrics::histogram!("sam_local_invocation_duration_ms")
            .record(elapsed.as_secs_f64() * 1000.0);
        info!(
            "REPORT RequestId: {} Function: {} Duration: {:.2} ms Status: {} Outcome: {}",
            request_id,
            self.function.name,
            elapsed.as_secs_f64() * 1000.0,
            result.status,
            result.outcome.as_str()
        );

        result
    }
}

fn resolve_code_path(
    base_dir: &Path,
    code_uri: &Path,
    check_exists: bool,
) -> Result<PathBuf, AdapterError> {
    let joined = if code_uri.is_absolute() {
        code_uri.to_path_buf()
    } else {
        base_dir.join(code_uri)
    };

    if !check_exists {
        return Ok(joined);
    }

    // docker needs an absolute host path for bind mounts
    std::fs::canonicalize(&joined).map_err(|_| AdapterError::CodePathNotFound(joined))
}

fn base_environment<F>(
    function: &FunctionDescriptor,
    config: &RuntimeConfig,
    timeout: Duration,
    memory_mb: u32,
    host_lookup: &F,
) -> BTreeMap<String, String>
where
    F: Fn(&str) -> Option<String>,
{
    let mut env = BTreeMap::new();
    env.insert("AWS_SAM_LOCAL".to_string(), "true".to_string());
    env.insert("AWS_REGION".to_string(), config.region.clone());
    env.insert("AWS_DEFAULT_REGION".to_string(), config.region.clone());
    env.insert("AWS_LAMBDA_FUNCTION_NAME".to_string(), function.name.clone());
    env.insert("AWS_LAMBDA_FUNCTION_HANDLER".to_string(), function.handler.clone());
    env.insert("AWS_LAMBDA_FUNCTION_MEMORY_SIZE".to_string(), memory_mb.to_string());
    env.insert("AWS_LAMBDA_FUNCTION_TIMEOUT".to_string(), timeout.as_secs().max(1).to_string());

    for key in FORWARDED_HOST_VARIABLES {
        if let Some(value) = host_lookup(key) {
            env.insert(key.to_string(), value);
        }
    }
    env
}
