use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// Wildcard method token matching every HTTP method.
pub const ANY_METHOD: &str = "ANY";

/// A declared HTTP trigger for a function.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EventSource {
    pub method: String,
    pub path: String,
}

impl EventSource {
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
        }
    }

    /// Method token normalized to upper case; `any` becomes [`ANY_METHOD`].
    pub fn normalized_method(&self) -> String {
        self.method.trim().to_ascii_uppercase()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct FunctionOverrides {
    pub memory_mb: Option<u32>,
    pub timeout: Option<Duration>,
    /// Variables declared by the template for this function.
    pub environment: BTreeMap<String, String>,
    pub debug_port: Option<u16>,
}

/// One invokable function as declared by the template.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FunctionDescriptor {
    /// Logical name, unique within a template.
    pub name: String,
    /// Runtime identifier as written in the template (e.g. `nodejs6.10`).
    pub runtime: String,
    pub handler: String,
    /// Code location, relative to the code base directory unless absolute.
    pub code_uri: PathBuf,
    pub events: Vec<EventSource>,
    pub overrides: FunctionOverrides,
}

impl FunctionDescriptor {
    pub fn new(
        name: impl Into<String>,
        runtime: impl Into<String>,
        handler: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            runtime: runtime.into(),
            handler: handler.into(),
            code_uri: PathBuf::from("."),
            events: Vec::new(),
            overrides: FunctionOverrides::default(),
        }
    }

    pub fn with_code_uri(mut self, code_uri: impl Into<PathBuf>) -> Self {
        self.code_uri = code_uri.into();
        self
    }

    pub fn with_event(mut self, method: impl Into<String>, path: impl Into<String>) -> Self {
        self.events.push(EventSource::new(method, path));
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.overrides.timeout = Some(timeout);
        self
    }

    pub fn with_memory(mut self, memory_mb: u32) -> Self {
        self.overrides.memory_mb = Some(memory_mb);
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.overrides.environment.insert(key.into(), value.into());
        self
    }

    pub fn with_debug_port(mut self, port: u16) -> Self {
        self.overrides.debug_port = Some(port);
        self
    }
}
