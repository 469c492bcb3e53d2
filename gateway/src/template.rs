//! Reads `AWS::Serverless::Function` resources out of a SAM template.
//!
//! Only what the local gateway needs is interpreted: runtime, handler, code
//! location, timeout, memory, environment variables and `Api` events.
//! `Globals.Function` supplies defaults for all of them. Intrinsic functions
//! are not resolved; values that need one are dropped with a warning.

use sam_local_shared::{EventSource, FunctionDescriptor, TemplateError, ANY_METHOD};
use serde_yaml::{Mapping, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

pub const SERVERLESS_FUNCTION: &str = "AWS::Serverless::Function";

/// `template.yaml`, or `template.yml` when only that one exists.
pub fn resolve_template_path(requested: &Path) -> PathBuf {
    if requested.exists() {
        return requested.to_path_buf();
    }
    if requested.extension().is_some_and(|e| e == "yaml") {
        let alternate = requested.with_extension("yml");
        if alternate.exists() {
            return alternate;
        }
    }
    requested.to_path_buf()
}

pub fn load(path: &Path) -> Result<Vec<FunctionDescriptor>, TemplateError> {
    let contents = std::fs::read_to_string(path).map_err(|source| TemplateError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse(&contents)
}

/// Functions in declaration order.
pub fn parse(contents: &str) -> Result<Vec<FunctionDescriptor>, TemplateError> {
    let document: Value =
        serde_yaml::from_str(contents).map_err(|e| TemplateError::Parse(e.to_string()))?;
    let root = document
        .as_mapping()
        .ok_or_else(|| TemplateError::Invalid("the template is not a mapping".to_string()))?;

    let globals = root
        .get("Globals")
        .and_then(|g| g.get("Function"))
        .and_then(Value::as_mapping)
        .cloned()
        .unwrap_or_default();

    let resources = match root.get("Resources") {
        None | Some(Value::Null) => return Ok(Vec::new()),
        Some(Value::Mapping(resources)) => resources,
        Some(_) => return Err(TemplateError::Invalid("Resources must be a mapping".to_string())),
    };

    let mut functions = Vec::new();
    for (name, resource) in resources {
        let Some(name) = name.as_str() else {
            return Err(TemplateError::Invalid(format!("resource name {:?} is not a string", name)));
        };
        if resource.get("Type").and_then(Value::as_str) != Some(SERVERLESS_FUNCTION) {
            continue;
        }

        let empty = Mapping::new();
        let properties = resource
            .get("Properties")
            .and_then(Value::as_mapping)
            .unwrap_or(&empty);
        functions.push(function(name, properties, &globals));
    }

    debug!("Template declares {} serverless functions", functions.len());
    Ok(functions)
}

fn property<'a>(key: &str, properties: &'a Mapping, globals: &'a Mapping) -> Option<&'a Value> {
    properties
        .get(key)
        .filter(|v| !v.is_null())
        .or_else(|| globals.get(key).filter(|v| !v.is_null()))
}

fn function(name: &str, properties: &Mapping, globals: &Mapping) -> FunctionDescriptor {
    let text = |key: &str| {
        property(key, properties, globals)
            .and_then(scalar_to_string)
            .unwrap_or_default()
    };

    let mut descriptor = FunctionDescriptor::new(name, text("Runtime"), text("Handler"));

    match property("CodeUri", properties, globals) {
        None => {}
        Some(Value::String(uri)) => descriptor.code_uri = PathBuf::from(uri),
        Some(_) => warn!("{}: CodeUri is not a local path, using the template directory", name),
    }

    if let Some(seconds) = property("Timeout", properties, globals).and_then(as_u64) {
        descriptor.overrides.timeout = Some(Duration::from_secs(seconds));
    }
    if let Some(memory) = property("MemorySize", properties, globals).and_then(as_u64) {
        descriptor.overrides.memory_mb = u32::try_from(memory).ok();
    }

    let mut environment = variables(name, globals);
    environment.extend(variables(name, properties));
    descriptor.overrides.environment = environment;

    if let Some(Value::Mapping(events)) = properties.get("Events") {
        for (event_name, event) in events {
            if let Some(source) = api_event(name, event_name, event) {
                descriptor.events.push(source);
            }
        }
    }

    descriptor
}

fn variables(function: &str, properties: &Mapping) -> BTreeMap<String, String> {
    let Some(Value::Mapping(declared)) = properties
        .get("Environment")
        .and_then(|e| e.get("Variables"))
    else {
        return BTreeMap::new();
    };

    let mut variables = BTreeMap::new();
    for (key, value) in declared {
        let Some(key) = key.as_str() else { continue };
        match scalar_to_string(value) {
            Some(value) => {
                variables.insert(key.to_string(), value);
            }
            None => warn!(
                "{}: dropping environment variable {} (intrinsic functions are not supported)",
                function, key
            ),
        }
    }
    variables
}

fn api_event(function: &str, event_name: &Value, event: &Value) -> Option<EventSource> {
    if event.get("Type").and_then(Value::as_str) != Some("Api") {
        return None;
    }

    let properties = event.get("Properties");
    let path = properties.and_then(|p| p.get("Path")).and_then(Value::as_str);
    let method = properties.and_then(|p| p.get("Method")).and_then(Value::as_str);
    match (path, method) {
        (Some(path), Some(method)) => {
            let method = if method.eq_ignore_ascii_case("any") {
                ANY_METHOD.to_string()
            } else {
                method.to_string()
            };
            Some(EventSource::new(method, path))
        }
        _ => {
            warn!(
                "{}: Api event {} needs both Path and Method",
                function,
                event_name.as_str().unwrap_or("?")
            );
            None
        }
    }
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn as_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
