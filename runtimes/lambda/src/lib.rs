pub mod adapter;
pub mod framing;
pub mod kind;

pub use adapter::{LambdaRuntime, RuntimeConfig};
pub use framing::{InvocationContext, ProxyResponse};
pub use kind::{RuntimeFamily, RuntimeKind};
