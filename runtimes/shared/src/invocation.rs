use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::time::Duration;
use uuid::Uuid;

/// Everything a function sees about the HTTP request that triggered it.
#[derive(Debug, Clone)]
pub struct InvocationEvent {
    pub request_id: Uuid,
    pub method: String,
    /// The route pattern that matched, e.g. `/users/{id}`.
    pub resource: String,
    pub path: String,
    pub path_parameters: BTreeMap<String, String>,
    pub query_parameters: BTreeMap<String, String>,
    pub headers: BTreeMap<String, String>,
    pub body: Bytes,
    pub source_ip: Option<String>,
}

impl InvocationEvent {
    pub fn new(
        method: impl Into<String>,
        resource: impl Into<String>,
        path: impl Into<String>,
    ) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            method: method.into(),
            resource: resource.into(),
            path: path.into(),
            path_parameters: BTreeMap::new(),
            query_parameters: BTreeMap::new(),
            headers: BTreeMap::new(),
            body: Bytes::new(),
            source_ip: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InvocationOutcome {
    Success,
    TimedOut,
    RuntimeError,
    InfrastructureError,
}

impl InvocationOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvocationOutcome::Success => "success",
            InvocationOutcome::TimedOut => "timed-out",
            InvocationOutcome::RuntimeError => "runtime-error",
            InvocationOutcome::InfrastructureError => "infrastructure-error",
        }
    }
}

#[derive(Debug, Clone)]
pub struct InvocationResult {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
    pub outcome: InvocationOutcome,
}

impl InvocationResult {
    pub fn success(status: u16, headers: Vec<(String, String)>, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers,
            body: body.into(),
            outcome: InvocationOutcome::Success,
        }
    }

    pub fn timed_out(timeout: Duration) -> Self {
        Self::failure(
            504,
            InvocationOutcome::TimedOut,
            format!("Function timed out after {:.2} seconds", timeout.as_secs_f64()),
        )
    }

    pub fn runtime_error(message: impl Into<String>) -> Self {
        Self::failure(502, InvocationOutcome::RuntimeError, message.into())
    }

    pub fn infrastructure_error(message: impl Into<String>) -> Self {
        Self::failure(500, InvocationOutcome::InfrastructureError, message.into())
    }

    fn failure(status: u16, outcome: InvocationOutcome, message: String) -> Self {
        let body = json!({ "message": message }).to_string();
        Self {
            status,
            headers: vec![("Content-Type".to_string(), "application/json".to_string())],
            body: Bytes::from(body),
            outcome,
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome == InvocationOutcome::Success
    }

    /// First value of a header, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}
