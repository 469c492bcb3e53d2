//! API Gateway proxy framing: how an [`InvocationEvent`] is presented to a
//! function and how its answer is read back.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::Bytes;
use sam_local_shared::{FramingError, InvocationEvent, InvocationResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use uuid::Uuid;

use crate::kind::RuntimeFamily;

/// Per-invocation context handed to the runtime alongside the event.
#[derive(Debug, Clone)]
pub struct InvocationContext {
    pub request_id: Uuid,
    pub function_name: String,
    pub memory_mb: u32,
    pub timeout: Duration,
    /// Wall-clock deadline in milliseconds since the epoch.
    pub deadline_ms: u64,
}

impl InvocationContext {
    pub fn new(
        event: &InvocationEvent,
        function_name: &str,
        memory_mb: u32,
        timeout: Duration,
    ) -> Self {
        let now_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();

        Self {
            request_id: event.request_id,
            function_name: function_name.to_string(),
            memory_mb,
            timeout,
            deadline_ms: now_ms + timeout.as_millis() as u64,
        }
    }

    /// Variables injected into the container for this invocation only.
    pub fn environment(&self, family: RuntimeFamily) -> BTreeMap<String, String> {
        let mut env = BTreeMap::new();
        env.insert("AWS_LAMBDA_REQUEST_ID".to_string(), self.request_id.to_string());
        env.insert("AWS_LAMBDA_DEADLINE_MS".to_string(), self.deadline_ms.to_string());
        env.insert(
            "AWS_LAMBDA_REMAINING_TIME_MS".to_string(),
            self.timeout.as_millis().to_string(),
        );
        env.insert("DOCKER_LAMBDA_USE_STDIN".to_string(), "1".to_string());

        if family == RuntimeFamily::Python {
            // Keeps stderr logging interleaved with the invocation
            env.insert("PYTHONUNBUFFERED".to_string(), "1".to_string());
        }
        env
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ProxyEvent<'a> {
    http_method: &'a str,
    body: Option<String>,
    resource: &'a str,
    path: &'a str,
    request_context: RequestContext<'a>,
    query_string_parameters: Option<&'a BTreeMap<String, String>>,
    headers: Option<&'a BTreeMap<String, String>>,
    path_parameters: Option<&'a BTreeMap<String, String>>,
    stage_variables: Option<BTreeMap<String, String>>,
    is_base64_encoded: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RequestContext<'a> {
    account_id: &'a str,
    api_id: &'a str,
    resource_path: &'a str,
    http_method: &'a str,
    request_id: String,
    stage: &'a str,
    identity: Identity<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Identity<'a> {
    source_ip: &'a str,
}

fn non_empty(map: &BTreeMap<String, String>) -> Option<&BTreeMap<String, String>> {
    (!map.is_empty()).then_some(map)
}

/// Encodes the event as the API Gateway proxy request document.
pub fn frame_event(
    event: &InvocationEvent,
    context: &InvocationContext,
) -> Result<Bytes, FramingError> {
    let (body, is_base64_encoded) = if event.body.is_empty() {
        (None, false)
    } else {
        match std::str::from_utf8(&event.body) {
            Ok(text) => (Some(text.to_string()), false),
            Err(_) => (Some(BASE64.encode(&event.body)), true),
        }
    };

    let document = ProxyEvent {
        http_method: &event.method,
        body,
        resource: &event.resource,
        path: &event.path,
        request_context: RequestContext {
            account_id: "123456789012",
            api_id: "1234567890",
            resource_path: &event.resource,
            http_method: &event.method,
            request_id: context.request_id.to_string(),
            stage: "prod",
            identity: Identity {
                source_ip: event.source_ip.as_deref().unwrap_or("127.0.0.1"),
            },
        },
        query_string_parameters: non_empty(&event.query_parameters),
        headers: non_empty(&event.headers),
        path_parameters: non_empty(&event.path_parameters),
        stage_variables: None,
        is_base64_encoded,
    };

    serde_json::to_vec(&document)
        .map(Bytes::from)
        .map_err(|e| FramingError::Encode(e.to_string()))
}

/// The API Gateway proxy response a function prints as its result.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyResponse {
    pub status_code: Option<Value>,
    pub headers: Option<HashMap<String, Value>>,
    pub body: Option<Value>,
    pub is_base64_encoded: Option<bool>,
}

/// Reads the proxy response from raw container stdout.
///
/// Runtimes may print other things first; the result is the last non-empty
/// line.
pub fn unframe(stdout: &[u8]) -> Result<ProxyResponse, FramingError> {
    let text = String::from_utf8_lossy(stdout);
    let line = text
        .lines()
        .rev()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .ok_or(FramingError::EmptyResponse)?;

    let value: Value =
        serde_json::from_str(line).map_err(|e| FramingError::InvalidResponse(e.to_string()))?;
    if !value.is_object() {
        return Err(FramingError::InvalidResponse(format!("expected an object, got {}", line)));
    }

    let response: ProxyResponse =
        serde_json::from_value(value).map_err(|e| FramingError::InvalidResponse(e.to_string()))?;
    if response.status_code.is_none() && response.headers.is_none() && response.body.is_none() {
        return Err(FramingError::InvalidResponse(line.to_string()));
    }
    Ok(response)
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

impl ProxyResponse {
    pub fn into_result(self) -> Result<InvocationResult, FramingError> {
        let status = match &self.status_code {
            None => 200,
            Some(value) => value_to_string(value)
                .parse::<u16>()
                .ok()
                .filter(|code| (100..=599).contains(code))
                .ok_or_else(|| {
                    FramingError::InvalidResponse(format!("invalid statusCode {}", value))
                })?,
        };

        let mut headers: Vec<(String, String)> = self
            .headers
            .unwrap_or_default()
            .into_iter()
            .map(|(key, value)| (key, value_to_string(&value)))
            .collect();
        headers.sort();
        if !headers.iter().any(|(key, _)| key.eq_ignore_ascii_case("content-type")) {
            headers.push(("Content-Type".to_string(), "application/json".to_string()));
        }

        let body = match self.body {
            None | Some(Value::Null) => Bytes::new(),
            Some(value) => {
                let text = value_to_string(&value);
                if self.is_base64_encoded.unwrap_or(false) {
                    BASE64
                        .decode(text.as_bytes())
                        .map(Bytes::from)
                        .map_err(|e| {
                            FramingError::InvalidResponse(format!("invalid base64 body: {}", e))
                        })?
                } else {
                    Bytes::from(text)
                }
            }
        };

        Ok(InvocationResult::success(status, headers, body))
    }
}

/// `errorMessage` from a runtime's error document, if stdout holds one.
pub fn error_message(stdout: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(stdout);
    let line = text.lines().rev().map(str::trim).find(|l| !l.is_empty())?;
    let value: Value = serde_json::from_str(line).ok()?;
    value.get("errorMessage").map(value_to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event() -> InvocationEvent {
        let mut event = InvocationEvent::new("GET", "/users/{id}", "/users/42");
        event.path_parameters.insert("id".to_string(), "42".to_string());
        event.query_parameters.insert("x".to_string(), "1".to_string());
        event
    }

    fn context(event: &InvocationEvent) -> InvocationContext {
        InvocationContext::new(event, "Users", 128, Duration::from_secs(3))
    }

    #[test]
    fn test_frame_event_carries_params() {
        let event = event();
        let payload = frame_event(&event, &context(&event)).unwrap();
        let document: Value = serde_json::from_slice(&payload).unwrap();

        assert_eq!(document["httpMethod"], "GET");
        assert_eq!(document["resource"], "/users/{id}");
        assert_eq!(document["path"], "/users/42");
        assert_eq!(document["pathParameters"]["id"], "42");
        assert_eq!(document["queryStringParameters"]["x"], "1");
        assert_eq!(document["headers"], Value::Null);
        assert_eq!(document["body"], Value::Null);
        assert_eq!(document["isBase64Encoded"], false);
        assert_eq!(document["requestContext"]["requestId"], event.request_id.to_string());
        assert_eq!(document["requestContext"]["identity"]["sourceIp"], "127.0.0.1");
    }

    #[test]
    fn test_binary_body_is_base64() {
        let mut event = event();
        event.body = Bytes::from_static(&[0xff, 0xfe, 0x00]);
        let payload = frame_event(&event, &context(&event)).unwrap();
        let document: Value = serde_json::from_slice(&payload).unwrap();

        assert_eq!(document["isBase64Encoded"], true);
        assert_eq!(document["body"], "//4A");
    }

    #[test]
    fn test_context_environment() {
        let event = event();
        let ctx = context(&event);
        let env = ctx.environment(RuntimeFamily::Python);

        assert_eq!(env["AWS_LAMBDA_REQUEST_ID"], event.request_id.to_string());
        assert_eq!(env["AWS_LAMBDA_REMAINING_TIME_MS"], "3000");
        assert_eq!(env["PYTHONUNBUFFERED"], "1");
        assert!(!ctx.environment(RuntimeFamily::Node).contains_key("PYTHONUNBUFFERED"));
    }

    #[test]
    fn test_unframe_takes_last_line() {
        let stdout = b"Picked up _JAVA_OPTIONS\n{\"statusCode\": 201, \"body\": \"created\"}\n\n";
        let result = unframe(stdout).unwrap().into_result().unwrap();

        assert_eq!(result.status, 201);
        assert_eq!(&result.body[..], b"created");
        assert_eq!(result.header("content-type"), Some("application/json"));
    }

    #[test]
    fn test_unframe_rejects_invalid_documents() {
        assert!(matches!(unframe(b""), Err(FramingError::EmptyResponse)));
        assert!(matches!(unframe(b"hello"), Err(FramingError::InvalidResponse(_))));
        assert!(matches!(unframe(b"\"hello\""), Err(FramingError::InvalidResponse(_))));
        assert!(matches!(unframe(b"{\"foo\": 1}"), Err(FramingError::InvalidResponse(_))));
    }

    #[test]
    fn test_response_conversion() {
        let document = serde_json::json!({
            "statusCode": "404",
            "headers": {"X-Count": 3, "content-type": "text/plain"},
            "body": "aGk=",
            "isBase64Encoded": true
        });
        let response = unframe(document.to_string().as_bytes()).unwrap();
        let result = response.into_result().unwrap();

        assert_eq!(result.status, 404);
        assert_eq!(result.header("x-count"), Some("3"));
        assert_eq!(result.header("Content-Type"), Some("text/plain"));
        assert_eq!(&result.body[..], b"hi");

        let bad = unframe(br#"{"statusCode": 9000}"#).unwrap().into_result();
        assert!(bad.is_err());
    }

    #[test]
    fn test_error_message_extraction() {
        let stdout = br#"{"errorMessage": "name 'x' is not defined", "errorType": "NameError"}"#;
        assert_eq!(error_message(stdout).as_deref(), Some("name 'x' is not defined"));
        assert_eq!(error_message(b"segfault"), None);
    }
}
