use sam_local_shared::{FunctionInvoker, InvocationResult};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error};

use crate::event::{build_event, HttpRequest};
use crate::route::{MountSummary, NoMatch, RouteEntry, RouteTable};

/// What dispatching one request produced.
#[derive(Debug)]
pub enum DispatchOutcome {
    Invoked(InvocationResult),
    NoMatch(NoMatch),
}

/// Matches requests against a [`RouteTable`] and hands them to the owning
/// function's invoker.
///
/// Immutable after construction; dispatches share nothing and may run
/// concurrently.
pub struct ServerlessRouter {
    table: RouteTable,
    invokers: HashMap<String, Arc<dyn FunctionInvoker>>,
}

impl ServerlessRouter {
    /// `invokers` is keyed by function name.
    pub fn new(table: RouteTable, invokers: HashMap<String, Arc<dyn FunctionInvoker>>) -> Self {
        Self { table, invokers }
    }

    pub fn table(&self) -> &RouteTable {
        &self.table
    }

    pub fn routes(&self) -> &[RouteEntry] {
        self.table.routes()
    }

    pub fn mounts(&self) -> Vec<MountSummary> {
        self.table.mounts()
    }

    pub async fn dispatch(&self, request: HttpRequest) -> DispatchOutcome {
        let matched = match self.table.match_route(&request.method, request.path()) {
            Ok(matched) => matched,
            Err(no_match) => {
                debug!(
                    "No route for {} {} (allowed: {:?})",
                    request.method,
                    request.path(),
                    no_match.allowed_methods
                );
                return DispatchOutcome::NoMatch(no_match);
            }
        };

        let function = &matched.entry.function.name;
        let Some(invoker) = self.invokers.get(function) else {
            error!(
                "Route {} {} has no invoker for {}",
                matched.entry.method, matched.entry.pattern, function
            );
            return DispatchOutcome::Invoked(InvocationResult::infrastructure_error(format!(
                "Function {} is not available",
                function
            )));
        };

        let event = build_event(&request, &matched);
        debug!(
            "Dispatching {} {} to {} (request {})",
            event.method, event.path, function, event.request_id
        );
        DispatchOutcome::Invoked(invoker.invoke(event).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bytes::Bytes;
    use sam_local_shared::{FunctionDescriptor, InvocationEvent};

    /// Answers with the function name and the matched resource.
    struct NamedInvoker(&'static str);

    #[async_trait]
    impl FunctionInvoker for NamedInvoker {
        async fn invoke(&self, event: InvocationEvent) -> InvocationResult {
            let body = format!("{} {}", self.0, event.resource);
            InvocationResult::success(200, vec![], Bytes::from(body))
        }
    }

    fn router() -> ServerlessRouter {
        let functions = vec![
            Arc::new(
                FunctionDescriptor::new("Hello", "nodejs6.10", "index.hello")
                    .with_event("GET", "/hello"),
            ),
            Arc::new(
                FunctionDescriptor::new("Orphan", "nodejs6.10", "index.orphan")
                    .with_event("GET", "/orphan"),
            ),
        ];
        let table = RouteTable::build(&functions).unwrap();

        let mut invokers: HashMap<String, Arc<dyn FunctionInvoker>> = HashMap::new();
        invokers.insert("Hello".to_string(), Arc::new(NamedInvoker("Hello")));
        ServerlessRouter::new(table, invokers)
    }

    #[tokio::test]
    async fn test_dispatch_invokes_matched_function() {
        let outcome = router()
            .dispatch(HttpRequest::new("GET", "/hello/".parse().unwrap()))
            .await;

        match outcome {
            DispatchOutcome::Invoked(result) => assert_eq!(&result.body[..], b"Hello /hello"),
            other => panic!("expected invocation, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_dispatch_reports_no_match() {
        let router = router();

        let outcome = router.dispatch(HttpRequest::new("POST", "/hello".parse().unwrap())).await;
        assert!(matches!(
            outcome,
            DispatchOutcome::NoMatch(ref m) if m.allowed_methods == vec!["GET"]
        ));

        let outcome = router.dispatch(HttpRequest::new("GET", "/missing".parse().unwrap())).await;
        assert!(matches!(outcome, DispatchOutcome::NoMatch(ref m) if m.allowed_methods.is_empty()));
    }

    #[tokio::test]
    async fn test_missing_invoker_is_an_infrastructure_error() {
        let outcome = router().dispatch(HttpRequest::new("GET", "/orphan".parse().unwrap())).await;
        match outcome {
            DispatchOutcome::Invoked(result) => assert_eq!(result.status, 500),
            other => panic!("expected invocation, got {:?}", other),
        }
    }
}
