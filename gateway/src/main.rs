//! sam-local: serve a SAM template's API functions from local containers.

use anyhow::{Context, Result};
use clap::Parser;
use sam_local_container::{ContainerInvoker, DockerCli, LogSink};
use sam_local_gateway::{
    mount_functions, serve, template, AppState, Cli, Command, GatewayConfig, StaticFiles,
};
use sam_local_shared::EnvOverrides;
use std::fs::File;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::io::AsyncWrite;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Lines of container output buffered before new lines are dropped.
const CONTAINER_LOG_CAPACITY: usize = 1024;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let Command::Start(args) = cli.command;
    let config = GatewayConfig::from(args);

    let log_file = match open_log_file(&config) {
        Ok(file) => file,
        Err(e) => {
            eprintln!("{:#}", e);
            return ExitCode::FAILURE;
        }
    };
    init_tracing(log_file.as_ref());

    match start(config, log_file).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn open_log_file(config: &GatewayConfig) -> Result<Option<File>> {
    config
        .log_file
        .as_ref()
        .map(|path| {
            File::create(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))
        })
        .transpose()
}

fn init_tracing(log_file: Option<&File>) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(env_filter);

    match log_file.and_then(|file| file.try_clone().ok()) {
        Some(file) => registry
            .with(fmt::layer().with_ansi(false).with_writer(Arc::new(file)))
            .init(),
        None => registry.with(fmt::layer().with_writer(std::io::stderr)).init(),
    }
}

fn container_log_writer(log_file: Option<File>) -> Box<dyn AsyncWrite + Unpin + Send> {
    match log_file {
        Some(file) => Box::new(tokio::fs::File::from_std(file)),
        None => Box::new(tokio::io::stderr()),
    }
}

async fn start(config: GatewayConfig, log_file: Option<File>) -> Result<()> {
    let functions = template::load(&config.template)?;

    let docker = DockerCli::new();
    let version = docker.version().await.map_err(|e| {
        anyhow::anyhow!(
            "Running AWS SAM projects locally requires Docker. Have you got it installed?\n{:#}",
            e
        )
    })?;
    info!("Connected to Docker {}", version);

    let overrides = match &config.env_vars {
        Some(path) => EnvOverrides::from_file(path)?,
        None => EnvOverrides::empty(),
    };

    let (logs, _log_writer) =
        LogSink::spawn(container_log_writer(log_file), CONTAINER_LOG_CAPACITY);
    let invoker = ContainerInvoker::new(Arc::new(docker), config.invoker_config(), logs);

    let (router, report) =
        mount_functions(functions, &invoker, &config.runtime_config(), &overrides)
            .map_err(|e| anyhow::anyhow!("ERROR: {}", e))?;
    if !report.skipped.is_empty() {
        warn!("{} functions were not mounted", report.skipped.len());
    }

    let mounts = router.mounts();
    let mut state = AppState::new(Arc::new(router));
    if let Some(root) = config.static_root() {
        match StaticFiles::new(&root) {
            Ok(files) => {
                eprintln!("Mounting static files from {} at /", files.root().display());
                state = state.with_static_files(files);
            }
            Err(e) => warn!("Could not mount static files: {:#}", e),
        }
    }

    eprintln!();
    for mount in mounts {
        eprintln!(
            "Mounting {} ({}) at {}{} {}",
            mount.handler,
            mount.runtime,
            config.base_url(),
            mount.path,
            mount.methods_label()
        );
    }
    eprintln!();
    eprintln!("You can now browse to the above endpoints to invoke your functions.");
    eprintln!("You do not need to restart/reload while working on your functions,");
    eprintln!("changes will be reflected instantly/automatically. You only need to restart");
    eprintln!("if you update your SAM template.");
    eprintln!();

    serve(config.listen_addr()?, state).await
}
