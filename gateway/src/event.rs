use axum::extract::Query;
use axum::http::{HeaderMap, Uri};
use bytes::Bytes;
use sam_local_shared::InvocationEvent;
use std::collections::BTreeMap;
use tracing::debug;

use crate::route::RouteMatch;

/// A buffered HTTP request, as the router sees it.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: String,
    pub uri: Uri,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub source_ip: Option<String>,
}

impl HttpRequest {
    pub fn new(method: impl Into<String>, uri: Uri) -> Self {
        Self {
            method: method.into(),
            uri,
            headers: HeaderMap::new(),
            body: Bytes::new(),
            source_ip: None,
        }
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn path(&self) -> &str {
        self.uri.path()
    }
}

/// Decoded query parameters; for a repeated key the last value wins.
pub fn query_parameters(uri: &Uri) -> BTreeMap<String, String> {
    if uri.query().map_or(true, str::is_empty) {
        return BTreeMap::new();
    }
    match Query::<BTreeMap<String, String>>::try_from_uri(uri) {
        Ok(Query(params)) => params,
        Err(e) => {
            debug!("Ignoring unparseable query string in {}: {}", uri, e);
            BTreeMap::new()
        }
    }
}

/// Header map flattened to one value per name; repeated headers are joined
/// with `,` and values that are not valid UTF-8 are dropped.
pub fn flatten_headers(headers: &HeaderMap) -> BTreeMap<String, String> {
    let mut flat: BTreeMap<String, String> = BTreeMap::new();
    for (name, value) in headers {
        let Ok(value) = value.to_str() else {
            continue;
        };
        flat.entry(name.as_str().to_string())
            .and_modify(|existing| {
                existing.push(',');
                existing.push_str(value);
            })
            .or_insert_with(|| value.to_string());
    }
    flat
}

/// Builds the event for a matched request.
pub fn build_event(request: &HttpRequest, matched: &RouteMatch<'_>) -> InvocationEvent {
    let mut event = InvocationEvent::new(
        request.method.to_ascii_uppercase(),
        matched.entry.pattern.as_str(),
        request.path(),
    );
    event.path_parameters = matched.path_parameters.clone();
    event.query_parameters = query_parameters(&request.uri);
    event.headers = flatten_headers(&request.headers);
    event.body = request.body.clone();
    event.source_ip = request.source_ip.clone();
    event
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::route::RouteTable;
    use axum::http::HeaderValue;
    use sam_local_shared::FunctionDescriptor;
    use std::sync::Arc;

    #[test]
    fn test_query_parameters_are_decoded() {
        let uri: Uri = "/search?q=hello%20world&page=2&page=3".parse().unwrap();
        let params = query_parameters(&uri);

        assert_eq!(params["q"], "hello world");
        assert_eq!(params["page"], "3");
        assert!(query_parameters(&"/search".parse().unwrap()).is_empty());
    }

    #[test]
    fn test_repeated_headers_are_joined() {
        let mut headers = HeaderMap::new();
        headers.append("accept", HeaderValue::from_static("text/html"));
        headers.append("accept", HeaderValue::from_static("application/json"));
        headers.insert("x-request", HeaderValue::from_static("1"));

        let flat = flatten_headers(&headers);
        assert_eq!(flat["accept"], "text/html,application/json");
        assert_eq!(flat["x-request"], "1");
    }

    #[test]
    fn test_build_event_from_match() {
        let table = RouteTable::build(&[Arc::new(
            FunctionDescriptor::new("Users", "python3.6", "app.handler")
                .with_event("GET", "/users/{id}"),
        )])
        .unwrap();

        let request = HttpRequest::new("get", "/users/42?x=1".parse().unwrap()).with_body("ping");
        let matched = table.match_route(&request.method, request.path()).unwrap();
        let event = build_event(&request, &matched);

        assert_eq!(event.method, "GET");
        assert_eq!(event.resource, "/users/{id}");
        assert_eq!(event.path, "/users/42");
        assert_eq!(event.path_parameters["id"], "42");
        assert_eq!(event.query_parameters["x"], "1");
        assert_eq!(&event.body[..], b"ping");
    }
}
