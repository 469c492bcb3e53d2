pub mod docker;
pub mod engine;
pub mod invoker;
pub mod logs;
pub mod session;
#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use docker::DockerCli;
pub use engine::{ContainerEngine, ContainerId, ContainerOutput, ContainerSpec, Mount};
pub use invoker::{ContainerInvoker, InvokerConfig, PullPolicy, RawResponse, SessionGuard};
pub use logs::LogSink;
pub use session::{ContainerSession, SessionRequest};
