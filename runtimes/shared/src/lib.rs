use async_trait::async_trait;

pub mod env;
pub mod errors;
pub mod function;
pub mod invocation;

pub use env::*;
pub use errors::*;
pub use function::*;
pub use invocation::*;

/// Turns one request event into one response.
///
/// Implementations fold every failure into the returned result's outcome, so
/// callers always get something they can put on the wire.
#[async_trait]
pub trait FunctionInvoker: Send + Sync {
    async fn invoke(&self, event: InvocationEvent) -> InvocationResult;
}
