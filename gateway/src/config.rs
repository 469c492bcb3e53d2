//! Command-line arguments and the configuration derived from them.

use clap::{Args, Parser, Subcommand};
use sam_local_container::{InvokerConfig, PullPolicy};
use sam_local_lambda::RuntimeConfig;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::template::resolve_template_path;

pub const DEFAULT_TEMPLATE: &str = "template.yaml";
pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_STATIC_DIR: &str = "public";
pub const DEFAULT_REGION: &str = "us-east-1";
pub const DEFAULT_TIMEOUT_SECS: u64 = 3;

/// Run serverless functions locally behind an API Gateway style HTTP server.
#[derive(Parser, Debug, Clone)]
#[command(name = "sam-local")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Serve the template's Api events on a local HTTP server
    #[command(alias = "start-api")]
    Start(StartArgs),
}

#[derive(Args, Debug, Clone)]
pub struct StartArgs {
    /// SAM template; falls back to template.yml when template.yaml is missing
    #[arg(short, long, default_value = DEFAULT_TEMPLATE)]
    pub template: PathBuf,

    /// Address to bind the HTTP server to
    #[arg(long, default_value = DEFAULT_HOST)]
    pub host: String,

    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// JSON file of per-function environment overrides: {"Function": {"VAR": "value"}}
    #[arg(short = 'n', long)]
    pub env_vars: Option<PathBuf>,

    /// Base directory for function code as seen by the docker host.
    /// Not checked for existence, so it may name a path on a remote host.
    #[arg(short = 'v', long)]
    pub docker_volume_basedir: Option<PathBuf>,

    /// Start functions with a debugger listening on this port
    #[arg(short, long, env = "SAM_DEBUG_PORT")]
    pub debug_port: Option<u16>,

    /// Directory of static assets served for unrouted paths, relative to the code base directory
    #[arg(short, long, default_value = DEFAULT_STATIC_DIR)]
    pub static_dir: String,

    /// Write logs and container output to this file instead of stderr
    #[arg(short, long)]
    pub log: Option<PathBuf>,

    /// Use cached runtime images without checking for newer ones
    #[arg(long)]
    pub skip_pull_image: bool,

    /// Docker network to attach function containers to
    #[arg(long, env = "SAM_DOCKER_NETWORK")]
    pub docker_network: Option<String>,

    #[arg(long, env = "AWS_REGION", default_value = DEFAULT_REGION)]
    pub region: String,

    /// Timeout in seconds for functions that do not declare one
    #[arg(long, default_value_t = DEFAULT_TIMEOUT_SECS)]
    pub default_timeout: u64,
}

/// Everything `start` needs, resolved from the arguments.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub template: PathBuf,
    pub host: String,
    pub port: u16,
    pub env_vars: Option<PathBuf>,
    /// Directory code locations and the static directory are resolved against.
    pub base_dir: PathBuf,
    /// False when the base directory was given explicitly.
    pub check_code_dirs: bool,
    pub debug_port: Option<u16>,
    /// Empty disables static files.
    pub static_dir: String,
    pub log_file: Option<PathBuf>,
    pub pull_policy: PullPolicy,
    pub docker_network: Option<String>,
    pub region: String,
    pub default_timeout: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            template: PathBuf::from(DEFAULT_TEMPLATE),
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            env_vars: None,
            base_dir: PathBuf::from("."),
            check_code_dirs: true,
            debug_port: None,
            static_dir: DEFAULT_STATIC_DIR.to_string(),
            log_file: None,
            pull_policy: PullPolicy::Always,
            docker_network: None,
            region: DEFAULT_REGION.to_string(),
            default_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

impl From<StartArgs> for GatewayConfig {
    fn from(args: StartArgs) -> Self {
        let template = resolve_template_path(&args.template);
        let (base_dir, check_code_dirs) = match args.docker_volume_basedir {
            Some(dir) => (dir, false),
            None => (template_dir(&template), true),
        };

        Self {
            template,
            host: args.host,
            port: args.port,
            env_vars: args.env_vars,
            base_dir,
            check_code_dirs,
            debug_port: args.debug_port,
            static_dir: args.static_dir,
            log_file: args.log,
            pull_policy: if args.skip_pull_image {
                PullPolicy::IfNotPresent
            } else {
                PullPolicy::Always
            },
            docker_network: args.docker_network,
            region: args.region,
            default_timeout: Duration::from_secs(args.default_timeout.max(1)),
        }
    }
}

fn template_dir(template: &Path) -> PathBuf {
    match template.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

impl GatewayConfig {
    pub fn runtime_config(&self) -> RuntimeConfig {
        RuntimeConfig {
            base_dir: self.base_dir.clone(),
            check_code_dir: self.check_code_dirs,
            default_timeout: self.default_timeout,
            region: self.region.clone(),
            debug_port: self.debug_port,
            ..Default::default()
        }
    }

    pub fn invoker_config(&self) -> InvokerConfig {
        InvokerConfig {
            pull_policy: self.pull_policy,
            network: self.docker_network.clone(),
            ..Default::default()
        }
    }

    /// The static directory, if one is configured.
    pub fn static_root(&self) -> Option<PathBuf> {
        if self.static_dir.is_empty() {
            return None;
        }
        Some(self.base_dir.join(&self.static_dir))
    }

    /// Host part as written, for mount diagnostics.
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    pub fn listen_addr(&self) -> anyhow::Result<SocketAddr> {
        let host = if self.host == "localhost" { DEFAULT_HOST } else { self.host.as_str() };
        format!("{}:{}", host, self.port)
            .parse()
            .map_err(|e| {
                anyhow::anyhow!("invalid listen address {}:{}: {}", self.host, self.port, e)
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn start_args(extra: &[&str]) -> StartArgs {
        let mut argv = vec!["sam-local", "start"];
        argv.extend_from_slice(extra);
        match Cli::try_parse_from(argv).unwrap().command {
            Command::Start(args) => args,
        }
    }

    #[test]
    fn test_defaults() {
        let config = GatewayConfig::from(start_args(&[]));

        assert_eq!(config.port, 3000);
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.static_dir, "public");
        assert_eq!(config.base_dir, PathBuf::from("."));
        assert!(config.check_code_dirs);
        assert_eq!(config.pull_policy, PullPolicy::Always);
        assert_eq!(config.default_timeout, Duration::from_secs(3));
        assert_eq!(config.listen_addr().unwrap().port(), 3000);
    }

    #[test]
    fn test_explicit_basedir_disables_checks() {
        let config = GatewayConfig::from(start_args(&[
            "-t",
            "project/template.yaml",
            "-v",
            "/remote/project",
            "--skip-pull-image",
            "-d",
            "5858",
            "-p",
            "8080",
        ]));

        assert_eq!(config.base_dir, PathBuf::from("/remote/project"));
        assert!(!config.check_code_dirs);
        assert_eq!(config.pull_policy, PullPolicy::IfNotPresent);

        let runtime = config.runtime_config();
        assert_eq!(runtime.debug_port, Some(5858));
        assert!(!runtime.check_code_dir);
        assert_eq!(config.base_url(), "http://127.0.0.1:8080");
    }

    #[test]
    fn test_code_base_defaults_to_template_directory() {
        let config = GatewayConfig::from(start_args(&[
            "--template",
            "project/template.yaml",
            "-s",
            "",
        ]));

        assert_eq!(config.base_dir, PathBuf::from("project"));
        assert!(config.static_root().is_none());
    }

    #[test]
    fn test_start_api_alias() {
        assert!(Cli::try_parse_from(["sam-local", "start-api", "--port", "4000"]).is_ok());
    }
}
