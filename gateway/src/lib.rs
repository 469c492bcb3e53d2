//! Local API gateway for serverless functions: routes HTTP requests declared
//! by a SAM template to functions running in per-invocation containers.

pub mod config;
pub mod event;
pub mod mount;
pub mod route;
pub mod router;
pub mod server;
pub mod static_files;
pub mod template;

pub use config::{Cli, Command, GatewayConfig, StartArgs};
pub use event::HttpRequest;
pub use mount::{mount_functions, mount_with, MountError, MountReport, Skipped};
pub use route::{
    MountSummary, NoMatch, PathPattern, RejectReason, Rejection, RouteEntry, RouteMatch, RouteTable,
};
pub use router::{DispatchOutcome, ServerlessRouter};
pub use server::{app, serve, AppState};
pub use static_files::StaticFiles;

#[cfg(test)]
mod tests;
