//! HTTP front: every request goes to the router; unrouted paths may fall back
//! to static files.

use anyhow::{Context, Result};
use axum::body::Body;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::header::{ALLOW, CONTENT_TYPE};
use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Router;
use sam_local_shared::InvocationResult;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use crate::event::HttpRequest;
use crate::route::NoMatch;
use crate::router::{DispatchOutcome, ServerlessRouter};
use crate::static_files::StaticFiles;

/// Largest request body accepted, the synchronous invocation payload limit.
pub const MAX_BODY_BYTES: usize = 6 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    router: Arc<ServerlessRouter>,
    static_files: Option<Arc<StaticFiles>>,
}

impl AppState {
    pub fn new(router: Arc<ServerlessRouter>) -> Self {
        Self {
            router,
            static_files: None,
        }
    }

    pub fn with_static_files(mut self, files: StaticFiles) -> Self {
        self.static_files = Some(Arc::new(files));
        self
    }
}

pub fn app(state: AppState) -> Router {
    Router::new().fallback(handle).with_state(state)
}

async fn handle(State(state): State<AppState>, request: Request) -> Response {
    let (parts, body) = request.into_parts();
    let body = match axum::body::to_bytes(body, MAX_BODY_BYTES).await {
        Ok(body) => body,
        Err(e) => {
            debug!("Rejecting request body for {}: {}", parts.uri, e);
            return message(StatusCode::PAYLOAD_TOO_LARGE, "Request Too Long");
        }
    };

    let source_ip = parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string());
    let request = HttpRequest {
        method: parts.method.as_str().to_string(),
        uri: parts.uri,
        headers: parts.headers,
        body,
        source_ip,
    };
    let method = request.method.clone();
    let path = request.path().to_string();

    // Detached so a client going away does not cancel the invocation
    let router = state.router.clone();
    let outcome = match tokio::spawn(async move { router.dispatch(request).await }).await {
        Ok(outcome) => outcome,
        Err(e) => {
            error!("Dispatch of {} {} failed: {}", method, path, e);
            return render(InvocationResult::infrastructure_error("Internal server error"));
        }
    };

    match outcome {
        DispatchOutcome::Invoked(result) => {
            info!("{} {} {}", method, path, result.status);
            render(result)
        }
        DispatchOutcome::NoMatch(no_match) => not_routed(&state, &method, &path, no_match).await,
    }
}

async fn not_routed(state: &AppState, method: &str, path: &str, no_match: NoMatch) -> Response {
    if !no_match.allowed_methods.is_empty() {
        let mut response = message(StatusCode::METHOD_NOT_ALLOWED, "Method Not Allowed");
        if let Ok(allow) = HeaderValue::from_str(&no_match.allowed_methods.join(", ")) {
            response.headers_mut().insert(ALLOW, allow);
        }
        return response;
    }

    if let Some(files) = &state.static_files {
        if method == "GET" || method == "HEAD" {
            if let Some(file) = files.load(path).await {
                return ([(CONTENT_TYPE, file.content_type)], file.body).into_response();
            }
        }
    }

    message(StatusCode::NOT_FOUND, &format!("No function found for {} {}", method, path))
}

fn message(status: StatusCode, message: &str) -> Response {
    let body = json!({ "message": message }).to_string();
    (status, [(CONTENT_TYPE, "application/json")], body).into_response()
}

/// Writes an invocation result onto the wire. Headers that are not valid
/// HTTP are dropped.
pub fn render(result: InvocationResult) -> Response {
    let status = StatusCode::from_u16(result.status).unwrap_or(StatusCode::BAD_GATEWAY);
    let mut response = Response::new(Body::from(result.body));
    *response.status_mut() = status;

    let headers = response.headers_mut();
    for (name, value) in &result.headers {
        match (HeaderName::from_bytes(name.as_bytes()), HeaderValue::from_str(value)) {
            (Ok(name), Ok(value)) => {
                headers.append(name, value);
            }
            _ => warn!("Dropping invalid response header {}", name),
        }
    }
    response
}

/// Serves `state` on `addr` until Ctrl-C.
pub async fn serve(addr: SocketAddr, state: AppState) -> Result<()> {
    let listener = TcpListener::bind(addr).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::AddrInUse {
            anyhow::anyhow!(
                "Port {} is already in use. Use --port to pick a different one.",
                addr.port()
            )
        } else {
            anyhow::anyhow!("Failed to bind {}: {}", addr, e)
        }
    })?;

    info!("Listening on http://{}", addr);
    axum::serve(
        listener,
        app(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("HTTP server failed")
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Could not listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutting down");
}
