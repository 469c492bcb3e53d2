use sam_local_container::ContainerInvoker;
use sam_local_lambda::{LambdaRuntime, RuntimeConfig};
use sam_local_shared::{AdapterError, EnvOverrides, FunctionDescriptor, FunctionInvoker};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

use crate::route::{RejectReason, RouteTable};
use crate::router::ServerlessRouter;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MountError {
    #[error("No Serverless functions were found in your SAM template.")]
    NoFunctions,

    #[error(
        "None of the Serverless functions in your SAM template were able to be mounted. \
         See above for errors."
    )]
    NothingMounted,
}

/// A function left out of the router, and why.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Skipped {
    pub function: String,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct MountReport {
    pub skipped: Vec<Skipped>,
}

/// Creates one runtime per function and routes the ones that can be served.
///
/// A function that cannot be initialized or routed is logged and left out;
/// the others still mount. Left-out functions stay out until restart.
pub fn mount_functions(
    functions: Vec<FunctionDescriptor>,
    invoker: &ContainerInvoker,
    config: &RuntimeConfig,
    overrides: &EnvOverrides,
) -> Result<(ServerlessRouter, MountReport), MountError> {
    mount_with(functions, |function| {
        LambdaRuntime::new(function, invoker.clone(), config, overrides)
            .map(|runtime| Arc::new(runtime) as Arc<dyn FunctionInvoker>)
    })
}

/// As [`mount_functions`], with the invoker for each function built by
/// `make_invoker`.
pub fn mount_with<F>(
    functions: Vec<FunctionDescriptor>,
    mut make_invoker: F,
) -> Result<(ServerlessRouter, MountReport), MountError>
where
    F: FnMut(Arc<FunctionDescriptor>) -> Result<Arc<dyn FunctionInvoker>, AdapterError>,
{
    if functions.is_empty() {
        return Err(MountError::NoFunctions);
    }

    let mut report = MountReport::default();
    let mut initialized = Vec::new();
    let mut invokers = HashMap::new();

    for function in functions {
        let function = Arc::new(function);
        match make_invoker(function.clone()) {
            Ok(invoker) => {
                invokers.insert(function.name.clone(), invoker);
                initialized.push(function);
            }
            Err(e) => {
                let reason = match &e {
                    AdapterError::UnsupportedRuntime(runtime) => {
                        format!("unsupported runtime ({})", runtime)
                    }
                    other => format!("{} runtime init error: {}", function.runtime, other),
                };
                warn!("Ignoring {} ({}) due to {}", function.name, function.handler, reason);
                report.skipped.push(Skipped {
                    function: function.name.clone(),
                    reason,
                });
            }
        }
    }

    let (table, rejections) = RouteTable::build_lenient(&initialized);
    for rejection in rejections {
        let handler = initialized
            .iter()
            .find(|f| f.name == rejection.function)
            .map(|f| f.handler.as_str())
            .unwrap_or_default();
        match &rejection.reason {
            RejectReason::NoEvents => warn!(
                "Ignoring {} ({}) as no API event sources are defined",
                rejection.function, handler
            ),
            RejectReason::Route(e) => warn!("Ignoring {} ({}): {}", rejection.function, handler, e),
        }
        invokers.remove(&rejection.function);
        report.skipped.push(Skipped {
            function: rejection.function.clone(),
            reason: rejection.to_string(),
        });
    }

    if table.is_empty() {
        return Err(MountError::NothingMounted);
    }

    info!("Mounted {} routes for {} functions", table.len(), invokers.len());
    Ok((ServerlessRouter::new(table, invokers), report))
}
